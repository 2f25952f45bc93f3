//! Presenter Selection
//!
//! The platform flag picks the presenter once, when the orchestrator is wired.

use std::sync::Arc;

use checkout_core::config::CheckoutConfig;
use checkout_core::error::{CheckoutError, Result};
use checkout_core::gateway::PaymentGatewayClient;
use checkout_core::model::Platform;
use checkout_core::presenter::{CardForm, PaymentPresenter};
use checkout_core::sdk::{CardGatewayFactory, NativePaymentSheet};

use crate::native::NativeSheetPresenter;
use crate::web::WebModalPresenter;

/// SDK surface available to this client build
pub enum PaymentSurface {
    Native {
        sheet: Arc<dyn NativePaymentSheet>,
    },
    Web {
        client: Arc<PaymentGatewayClient>,
        factory: Arc<dyn CardGatewayFactory>,
        form: Arc<dyn CardForm>,
    },
}

impl PaymentSurface {
    pub fn platform(&self) -> Platform {
        match self {
            PaymentSurface::Native { .. } => Platform::Native,
            PaymentSurface::Web { .. } => Platform::Web,
        }
    }
}

/// Build the presenter for the configured platform
pub fn presenter_for(config: &CheckoutConfig, surface: PaymentSurface) -> Result<Arc<dyn PaymentPresenter>> {
    if surface.platform() != config.platform {
        return Err(CheckoutError::Config(format!(
            "{} surface supplied for a {} checkout",
            surface.platform().as_str(),
            config.platform.as_str()
        )));
    }

    tracing::debug!(platform = config.platform.as_str(), "Selected payment presenter");

    Ok(match surface {
        PaymentSurface::Native { sheet } => {
            Arc::new(NativeSheetPresenter::new(sheet, config.merchant_display_name.clone()))
        }
        PaymentSurface::Web { client, factory, form } => Arc::new(WebModalPresenter::new(client, factory, form)),
    })
}
