//! Native Payment Sheet Presenter

use std::sync::Arc;

use async_trait::async_trait;

use checkout_core::error::{CheckoutError, Result};
use checkout_core::model::{PaymentReference, Platform};
use checkout_core::presenter::PaymentPresenter;
use checkout_core::pricing::PriceSummary;
use checkout_core::sdk::{NativePaymentSheet, SheetOutcome};
use checkout_core::secret::{ClientSecret, SecretValidator};

/// Embedded sheet: card entry and confirmation both happen inside the SDK
pub struct NativeSheetPresenter {
    sheet: Arc<dyn NativePaymentSheet>,
    merchant_display_name: String,
}

impl NativeSheetPresenter {
    pub fn new(sheet: Arc<dyn NativePaymentSheet>, merchant_display_name: impl Into<String>) -> Self {
        Self {
            sheet,
            merchant_display_name: merchant_display_name.into(),
        }
    }
}

#[async_trait]
impl PaymentPresenter for NativeSheetPresenter {
    fn platform(&self) -> Platform {
        Platform::Native
    }

    async fn collect_and_confirm(
        &self,
        summary: &PriceSummary,
        secret: &ClientSecret,
        _billing_name: &str,
    ) -> Result<PaymentReference> {
        let secret = SecretValidator::revalidate(secret)?;
        self.sheet.init(&secret, &self.merchant_display_name).await?;

        tracing::debug!(intent_id = %secret.intent_id(), total = %summary.total_display(), "Presenting payment sheet");

        match self.sheet.present().await? {
            SheetOutcome::Completed => Ok(secret.payment_reference()),
            SheetOutcome::Canceled => Err(CheckoutError::UserCancelled),
            SheetOutcome::Failed { code, message } => {
                Err(CheckoutError::PaymentDeclined(format!("{message} ({code})")))
            }
        }
    }
}
