//! Payment Gateway Client
//!
//! Negotiates payment intents and publishable keys with the backend and hands
//! confirmed payment methods to the gateway. Never retries on its own: a second
//! confirmation attempt could charge twice.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{CheckoutError, Result};
use crate::model::PaymentReference;
use crate::pricing::{PriceSummary, format_money};
use crate::sdk::{CardGateway, PaymentMethodId, PublishableKey, SetupFutureUsage};
use crate::secret::{ClientSecret, SecretValidator};

/// Field names the key endpoint has used for the publishable key
pub const PUBLISHABLE_KEY_FIELDS: [&str; 2] = ["publicKey", "PUBLISHABLE_KEY"];

/// Body of the payment-intent request
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntentRequest {
    pub customer_uid: String,
    pub business_code: String,
    pub payment_summary: IntentAmounts,
}

/// Decimal-string amounts sent with the intent request
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntentAmounts {
    pub tax: String,
    pub total: String,
}

/// Backend endpoints behind the gateway client
#[async_trait]
pub trait PaymentBackend: Send + Sync {
    /// POST the intent request; returns the raw response body.
    /// Non-success status must surface as `IntentCreationFailed`.
    async fn post_payment_intent(&self, request: &IntentRequest) -> Result<String>;

    /// Fetch the publishable-key document for an environment code
    async fn fetch_publishable_key(&self, environment_code: &str) -> Result<serde_json::Value>;
}

/// Map a business code to the gateway environment used for key lookup
///
/// Only the two known codes are mapped; anything else passes through.
pub fn environment_code(business_code: &str) -> &str {
    match business_code {
        "ECTEST" => "PMTEST",
        "EC" => "PM",
        other => other,
    }
}

/// Pull the client secret out of an intent response body
///
/// The endpoint returns a bare string, but a JSON string or a
/// `{"clientSecret": ...}` object are accepted too.
pub fn extract_client_secret(body: &str) -> String {
    match serde_json::from_str::<serde_json::Value>(body.trim()) {
        Ok(serde_json::Value::String(s)) => s,
        Ok(serde_json::Value::Object(map)) => ["clientSecret", "client_secret"]
            .iter()
            .find_map(|k| map.get(*k).and_then(|v| v.as_str()))
            .map_or_else(|| body.to_string(), str::to_string),
        _ => body.to_string(),
    }
}

/// Read the publishable key under either naming convention
pub fn extract_publishable_key(document: &serde_json::Value) -> Option<PublishableKey> {
    PUBLISHABLE_KEY_FIELDS
        .iter()
        .filter_map(|field| document.get(*field).and_then(|v| v.as_str()))
        .map(str::trim)
        .find(|key| !key.is_empty())
        .map(PublishableKey::new)
}

/// Client for intent negotiation and confirmation
pub struct PaymentGatewayClient {
    backend: Arc<dyn PaymentBackend>,
}

impl PaymentGatewayClient {
    pub fn new(backend: Arc<dyn PaymentBackend>) -> Self {
        Self { backend }
    }

    /// Create a payment intent for the summary's total; returns the raw secret
    pub async fn create_intent(&self, buyer_id: &str, business_code: &str, summary: &PriceSummary) -> Result<String> {
        let request = IntentRequest {
            customer_uid: buyer_id.to_string(),
            business_code: business_code.to_string(),
            payment_summary: IntentAmounts {
                tax: format_money(summary.fee),
                total: format_money(summary.total),
            },
        };

        tracing::debug!(
            buyer_id = %buyer_id,
            business_code = %business_code,
            total = %request.payment_summary.total,
            "Requesting payment intent"
        );

        let body = self.backend.post_payment_intent(&request).await.map_err(|e| match e {
            CheckoutError::IntentCreationFailed(_) => e,
            other => CheckoutError::IntentCreationFailed(other.to_string()),
        })?;

        Ok(extract_client_secret(&body))
    }

    /// Resolve the publishable key for a business code
    pub async fn resolve_public_key(&self, business_code: &str) -> Result<PublishableKey> {
        let env = environment_code(business_code);
        let document = self
            .backend
            .fetch_publishable_key(env)
            .await
            .map_err(|e| CheckoutError::KeyResolutionFailed(format!("{env}: {e}")))?;

        let key = extract_publishable_key(&document).ok_or_else(|| {
            CheckoutError::KeyResolutionFailed(format!(
                "{env}: none of {PUBLISHABLE_KEY_FIELDS:?} present in response"
            ))
        })?;

        tracing::debug!(environment = %env, test_mode = key.is_test_mode(), "Resolved publishable key");
        Ok(key)
    }

    /// Confirm an intent with a payment method through the gateway
    ///
    /// The secret is re-validated right before it leaves the client.
    pub async fn confirm_payment(
        &self,
        gateway: &dyn CardGateway,
        secret: &ClientSecret,
        method: &PaymentMethodId,
    ) -> Result<PaymentReference> {
        let secret = SecretValidator::revalidate(secret)?;

        let reference = gateway
            .confirm_card_payment(&secret, method, SetupFutureUsage::OffSession)
            .await?;

        tracing::info!(payment_ref = %reference, "Gateway confirmed payment");
        Ok(reference)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ItemRef, LineItem};
    use crate::pricing::PriceAggregator;
    use rust_decimal_macros::dec;
    use std::sync::Mutex;

    struct FakeBackend {
        intent_body: String,
        key_doc: serde_json::Value,
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl PaymentBackend for FakeBackend {
        async fn post_payment_intent(&self, request: &IntentRequest) -> Result<String> {
            self.seen.lock().unwrap().push(serde_json::to_string(request).unwrap());
            Ok(self.intent_body.clone())
        }

        async fn fetch_publishable_key(&self, environment_code: &str) -> Result<serde_json::Value> {
            self.seen.lock().unwrap().push(environment_code.to_string());
            Ok(self.key_doc.clone())
        }
    }

    fn backend(body: &str, key_doc: serde_json::Value) -> Arc<FakeBackend> {
        Arc::new(FakeBackend {
            intent_body: body.into(),
            key_doc,
            seen: Mutex::new(Vec::new()),
        })
    }

    #[test]
    fn test_environment_mapping() {
        assert_eq!(environment_code("ECTEST"), "PMTEST");
        assert_eq!(environment_code("EC"), "PM");
        assert_eq!(environment_code("MYSPACE"), "MYSPACE");
    }

    #[test]
    fn test_secret_extraction_shapes() {
        assert_eq!(extract_client_secret("pi_1_secret_2"), "pi_1_secret_2");
        assert_eq!(extract_client_secret("\"pi_1_secret_2\""), "pi_1_secret_2");
        assert_eq!(extract_client_secret(r#"{"clientSecret":"pi_1_secret_2"}"#), "pi_1_secret_2");
    }

    #[test]
    fn test_either_key_convention() {
        let a = serde_json::json!({ "publicKey": "pk_test_a" });
        let b = serde_json::json!({ "PUBLISHABLE_KEY": "pk_live_b" });
        let none = serde_json::json!({ "key": "pk_x" });

        assert_eq!(extract_publishable_key(&a).unwrap().as_str(), "pk_test_a");
        assert_eq!(extract_publishable_key(&b).unwrap().as_str(), "pk_live_b");
        assert!(extract_publishable_key(&none).is_none());
    }

    #[tokio::test]
    async fn test_create_intent_sends_decimal_strings() {
        let fake = backend("pi_9_secret_z", serde_json::Value::Null);
        let client = PaymentGatewayClient::new(fake.clone());
        let items = vec![LineItem::new(ItemRef::Service("bs-1".into()), dec!(10), 2, "biz")];
        let summary = PriceAggregator::compute_summary(&items, dec!(0.03), true).unwrap();

        let raw = client.create_intent("buyer-1", "EC", &summary).await.unwrap();
        assert_eq!(raw, "pi_9_secret_z");

        let sent: serde_json::Value = serde_json::from_str(&fake.seen.lock().unwrap()[0]).unwrap();
        assert_eq!(sent["customer_uid"], "buyer-1");
        assert_eq!(sent["payment_summary"]["tax"], "0.60");
        assert_eq!(sent["payment_summary"]["total"], "20.60");
    }

    #[tokio::test]
    async fn test_key_resolution_uses_environment_code() {
        let fake = backend("", serde_json::json!({ "publicKey": "pk_test_1" }));
        let client = PaymentGatewayClient::new(fake.clone());

        let key = client.resolve_public_key("ECTEST").await.unwrap();
        assert_eq!(key.as_str(), "pk_test_1");
        assert_eq!(fake.seen.lock().unwrap()[0], "PMTEST");
    }

    #[tokio::test]
    async fn test_missing_key_fails() {
        let fake = backend("", serde_json::json!({}));
        let client = PaymentGatewayClient::new(fake);
        let err = client.resolve_public_key("EC").await.unwrap_err();
        assert!(matches!(err, CheckoutError::KeyResolutionFailed(_)));
    }
}
