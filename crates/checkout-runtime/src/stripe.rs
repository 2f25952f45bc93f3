//! Stripe REST Card Gateway
//!
//! Browser-equivalent gateway client authenticated with the publishable key:
//! tokenizes a card into a payment method and confirms an intent with it.
//! Secret-key operations never happen here.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::Value;

use checkout_core::error::{CheckoutError, Result};
use checkout_core::model::PaymentReference;
use checkout_core::sdk::{
    CardDetails, CardGateway, CardGatewayFactory, PaymentMethodId, PublishableKey, SetupFutureUsage,
};
use checkout_core::secret::ClientSecret;

use crate::backend::transport;
use crate::config::{BackendConfig, join};

/// Card gateway scoped to one publishable key
pub struct StripeRestGateway {
    client: Client,
    api_base: String,
    key: PublishableKey,
}

impl StripeRestGateway {
    /// Only a connect timeout: confirmation may legitimately take long and
    /// still succeed, so no overall request timeout is set.
    pub fn new(api_base: impl Into<String>, key: PublishableKey, connect_timeout: std::time::Duration) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| CheckoutError::Config(format!("gateway HTTP client: {e}")))?;
        Ok(Self {
            client,
            api_base: api_base.into(),
            key,
        })
    }

    fn request(&self, path: &str, form: &[(String, String)]) -> reqwest::RequestBuilder {
        self.client
            .post(join(&self.api_base, path))
            .bearer_auth(self.key.as_str())
            .form(form)
    }

    async fn post_form(&self, path: &str, form: &[(String, String)]) -> Result<(bool, Value)> {
        let response = self.request(path, form).send().await.map_err(|e| transport(&e))?;

        let ok = response.status().is_success();
        let body = response.text().await.map_err(|e| transport(&e))?;
        let value = serde_json::from_str(&body).unwrap_or(Value::Null);
        Ok((ok, value))
    }

    /// Like `post_form`, but once the request may have reached the gateway every
    /// transport failure is `ConfirmationUnknown`
    async fn post_confirmation(&self, path: &str, form: &[(String, String)]) -> Result<(StatusCode, Value)> {
        let response = match self.request(path, form).send().await {
            Ok(response) => response,
            // Never left the client
            Err(e) if e.is_connect() || e.is_builder() => return Err(transport(&e)),
            Err(e) => {
                return Err(CheckoutError::ConfirmationUnknown(format!(
                    "no reply to confirmation: {e}"
                )));
            }
        };

        let status = response.status();
        let body = match response.text().await {
            Ok(body) => body,
            Err(e) if status.is_success() || status.is_server_error() => {
                return Err(CheckoutError::ConfirmationUnknown(format!(
                    "unreadable confirmation reply ({status}): {e}"
                )));
            }
            Err(_) => String::new(),
        };
        Ok((status, serde_json::from_str(&body).unwrap_or(Value::Null)))
    }
}

/// Form fields for a card payment method
pub fn payment_method_form(card: &CardDetails, billing_name: &str) -> Vec<(String, String)> {
    let mut form = vec![
        ("type".to_string(), "card".to_string()),
        ("card[number]".to_string(), card.number.trim().replace(' ', "")),
        ("card[exp_month]".to_string(), card.exp_month.to_string()),
        ("card[exp_year]".to_string(), card.exp_year.to_string()),
        ("card[cvc]".to_string(), card.cvc.trim().to_string()),
    ];
    if !billing_name.trim().is_empty() {
        form.push(("billing_details[name]".to_string(), billing_name.trim().to_string()));
    }
    if let Some(postal) = card.postal_code.as_deref().map(str::trim).filter(|p| !p.is_empty()) {
        form.push(("billing_details[address][postal_code]".to_string(), postal.to_string()));
    }
    form
}

/// Form fields for confirming an intent
pub fn confirm_form(
    secret: &ClientSecret,
    method: &PaymentMethodId,
    setup_future_usage: SetupFutureUsage,
) -> Vec<(String, String)> {
    vec![
        ("client_secret".to_string(), secret.expose().to_string()),
        ("payment_method".to_string(), method.as_str().to_string()),
        ("setup_future_usage".to_string(), setup_future_usage.as_str().to_string()),
    ]
}

/// Human-readable reason from a gateway error object
pub fn error_message(body: &Value) -> String {
    let error = &body["error"];
    let message = error["message"].as_str().unwrap_or("the payment gateway refused the request");
    match error["decline_code"].as_str().or_else(|| error["code"].as_str()) {
        Some(code) => format!("{message} ({code})"),
        None => message.to_string(),
    }
}

/// Map a confirmation reply to a payment reference or a decline
///
/// Only an explicit gateway refusal is a decline. A 2xx without a readable
/// intent, or a 5xx, may hide a completed charge and is `ConfirmationUnknown`.
pub fn interpret_confirmation(status: StatusCode, body: &Value) -> Result<PaymentReference> {
    if status.is_server_error() {
        return Err(CheckoutError::ConfirmationUnknown(format!(
            "gateway answered {status}: {}",
            error_message(body)
        )));
    }
    if !status.is_success() {
        return Err(CheckoutError::PaymentDeclined(error_message(body)));
    }

    let id = body["id"].as_str().ok_or_else(|| {
        CheckoutError::ConfirmationUnknown(format!("{status} confirmation reply carried no intent id"))
    })?;

    match body["status"].as_str().unwrap_or_default() {
        "succeeded" | "processing" | "requires_capture" => Ok(PaymentReference::new(id)),
        "requires_action" => Err(CheckoutError::PaymentDeclined(
            "card requires additional authentication".into(),
        )),
        other => Err(CheckoutError::PaymentDeclined(
            body["last_payment_error"]["message"]
                .as_str()
                .map_or_else(|| format!("payment ended in status '{other}'"), str::to_string),
        )),
    }
}

#[async_trait]
impl CardGateway for StripeRestGateway {
    async fn create_payment_method(&self, card: &CardDetails, billing_name: &str) -> Result<PaymentMethodId> {
        let (ok, body) = self
            .post_form("/v1/payment_methods", &payment_method_form(card, billing_name))
            .await?;

        if !ok {
            return Err(CheckoutError::PaymentDeclined(error_message(&body)));
        }

        let id = body["id"]
            .as_str()
            .ok_or_else(|| CheckoutError::PaymentDeclined("payment method reply had no id".into()))?;
        tracing::debug!(last4 = %card.last4(), "Created card payment method");
        Ok(PaymentMethodId::new(id))
    }

    async fn confirm_card_payment(
        &self,
        secret: &ClientSecret,
        method: &PaymentMethodId,
        setup_future_usage: SetupFutureUsage,
    ) -> Result<PaymentReference> {
        let path = format!("/v1/payment_intents/{}/confirm", secret.intent_id());
        let (status, body) = self
            .post_confirmation(&path, &confirm_form(secret, method, setup_future_usage))
            .await?;
        interpret_confirmation(status, &body)
    }
}

/// Creates `StripeRestGateway`s once the key is resolved
pub struct StripeGatewayFactory {
    api_base: String,
    connect_timeout: std::time::Duration,
}

impl StripeGatewayFactory {
    pub fn new(config: &BackendConfig) -> Self {
        Self {
            api_base: config.stripe_api_base.clone(),
            connect_timeout: config.connect_timeout(),
        }
    }
}

impl CardGatewayFactory for StripeGatewayFactory {
    fn create(&self, key: &PublishableKey) -> Result<Arc<dyn CardGateway>> {
        tracing::debug!(test_mode = key.is_test_mode(), "Creating card gateway client");
        Ok(Arc::new(StripeRestGateway::new(
            self.api_base.clone(),
            key.clone(),
            self.connect_timeout,
        )?))
    }
}
