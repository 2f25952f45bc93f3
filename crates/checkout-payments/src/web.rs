//! Web Card Modal Presenter
//!
//! Card entry in a browser-hosted form. The gateway client is created lazily
//! from the resolved publishable key; confirming before it exists fails with
//! `GatewayNotReady`.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::OnceCell;

use checkout_core::error::{CheckoutError, Result};
use checkout_core::gateway::PaymentGatewayClient;
use checkout_core::model::{PaymentReference, Platform};
use checkout_core::presenter::{CardForm, PaymentPresenter};
use checkout_core::pricing::PriceSummary;
use checkout_core::sdk::{CardGateway, CardGatewayFactory};
use checkout_core::secret::ClientSecret;

pub struct WebModalPresenter {
    client: Arc<PaymentGatewayClient>,
    factory: Arc<dyn CardGatewayFactory>,
    form: Arc<dyn CardForm>,
    gateway: OnceCell<Arc<dyn CardGateway>>,
}

impl WebModalPresenter {
    pub fn new(
        client: Arc<PaymentGatewayClient>,
        factory: Arc<dyn CardGatewayFactory>,
        form: Arc<dyn CardForm>,
    ) -> Self {
        Self {
            client,
            factory,
            form,
            gateway: OnceCell::new(),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.gateway.initialized()
    }
}

#[async_trait]
impl PaymentPresenter for WebModalPresenter {
    fn platform(&self) -> Platform {
        Platform::Web
    }

    async fn prepare(&self, business_code: &str) -> Result<()> {
        self.gateway
            .get_or_try_init(|| async {
                let key = self.client.resolve_public_key(business_code).await?;
                self.factory.create(&key)
            })
            .await?;
        Ok(())
    }

    async fn collect_and_confirm(
        &self,
        summary: &PriceSummary,
        secret: &ClientSecret,
        billing_name: &str,
    ) -> Result<PaymentReference> {
        let gateway = self
            .gateway
            .get()
            .ok_or_else(|| CheckoutError::GatewayNotReady("card gateway has not been initialized".into()))?;

        let Some(card) = self.form.collect(summary).await? else {
            return Err(CheckoutError::UserCancelled);
        };

        let method = gateway.create_payment_method(&card, billing_name).await?;
        self.client.confirm_payment(gateway.as_ref(), secret, &method).await
    }
}
