//! Payment SDK Boundary
//!
//! The third-party payment surfaces the presenters drive. These calls and their
//! error shapes are given; implementations wrap a mobile SDK, a browser SDK or
//! the gateway's REST API.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::model::PaymentReference;
use crate::secret::ClientSecret;

/// Publishable gateway key for one environment
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PublishableKey(String);

impl PublishableKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Test-mode keys are safe to log in full
    pub fn is_test_mode(&self) -> bool {
        self.0.starts_with("pk_test_")
    }
}

impl std::fmt::Display for PublishableKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Gateway-issued payment method handle (`pm_...`)
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PaymentMethodId(String);

impl PaymentMethodId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Card entered in the web modal
///
/// `Debug` never prints the number or CVC.
#[derive(Clone)]
pub struct CardDetails {
    pub number: String,
    pub exp_month: u8,
    pub exp_year: u16,
    pub cvc: String,
    pub postal_code: Option<String>,
}

impl CardDetails {
    pub fn last4(&self) -> &str {
        let digits = self.number.trim();
        digits.get(digits.len().saturating_sub(4)..).unwrap_or("")
    }
}

impl std::fmt::Debug for CardDetails {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CardDetails")
            .field("last4", &self.last4())
            .field("exp_month", &self.exp_month)
            .field("exp_year", &self.exp_year)
            .finish_non_exhaustive()
    }
}

/// How the gateway may reuse the payment method
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SetupFutureUsage {
    OnSession,
    OffSession,
}

impl SetupFutureUsage {
    pub fn as_str(&self) -> &'static str {
        match self {
            SetupFutureUsage::OnSession => "on_session",
            SetupFutureUsage::OffSession => "off_session",
        }
    }
}

/// Result of presenting the native payment sheet
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SheetOutcome {
    Completed,
    Canceled,
    Failed { code: String, message: String },
}

/// Native embedded payment sheet
#[async_trait]
pub trait NativePaymentSheet: Send + Sync {
    /// Prepare the sheet for one intent
    async fn init(&self, secret: &ClientSecret, merchant_display_name: &str) -> Result<()>;

    /// Show the sheet and wait for the buyer
    async fn present(&self) -> Result<SheetOutcome>;
}

/// Browser-side card gateway, scoped to one publishable key
#[async_trait]
pub trait CardGateway: Send + Sync {
    /// Tokenize the entered card
    async fn create_payment_method(&self, card: &CardDetails, billing_name: &str) -> Result<PaymentMethodId>;

    /// Confirm the intent with a payment method
    ///
    /// No client-side timeout: a slow confirmation may still succeed.
    async fn confirm_card_payment(
        &self,
        secret: &ClientSecret,
        method: &PaymentMethodId,
        setup_future_usage: SetupFutureUsage,
    ) -> Result<PaymentReference>;
}

/// Builds a card gateway once the publishable key is known
pub trait CardGatewayFactory: Send + Sync {
    fn create(&self, key: &PublishableKey) -> Result<std::sync::Arc<dyn CardGateway>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_card_debug_hides_number() {
        let card = CardDetails {
            number: "4242424242424242".into(),
            exp_month: 12,
            exp_year: 2030,
            cvc: "123".into(),
            postal_code: None,
        };
        let shown = format!("{card:?}");
        assert!(!shown.contains("42424242"));
        assert!(!shown.contains("123"));
        assert!(shown.contains("\"4242\""));
    }
}
