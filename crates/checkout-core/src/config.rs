//! Checkout Configuration

use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{CheckoutError, Result};
use crate::model::Platform;
use crate::pricing::DEFAULT_FEE_RATE;
use crate::reconciliation::RetryPolicy;

/// Orchestrator configuration, fixed at construction
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CheckoutConfig {
    /// Selects the presenter variant and whether the fee applies
    pub platform: Platform,

    /// Web-path surcharge rate
    pub fee_rate: Decimal,

    /// Shown on the native payment sheet
    pub merchant_display_name: String,

    /// Business code sent with intent requests and used for key lookup
    pub business_code: String,

    /// When false every paid checkout is refused before any network call
    pub payments_enabled: bool,

    pub retry_policy: RetryPolicy,
}

impl Default for CheckoutConfig {
    fn default() -> Self {
        Self {
            platform: Platform::Native,
            fee_rate: DEFAULT_FEE_RATE,
            merchant_display_name: "Marketplace".into(),
            business_code: "EC".into(),
            payments_enabled: true,
            retry_policy: RetryPolicy::default(),
        }
    }
}

impl CheckoutConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let platform = match std::env::var("CHECKOUT_PLATFORM") {
            Ok(p) => p.parse()?,
            Err(_) => defaults.platform,
        };

        let fee_rate = match std::env::var("CHECKOUT_FEE_RATE") {
            Ok(raw) => {
                let rate = Decimal::from_str(raw.trim())
                    .map_err(|e| CheckoutError::Config(format!("CHECKOUT_FEE_RATE '{raw}': {e}")))?;
                if rate.is_sign_negative() {
                    return Err(CheckoutError::Config(format!("CHECKOUT_FEE_RATE must be non-negative, got {rate}")));
                }
                rate
            }
            Err(_) => defaults.fee_rate,
        };

        let payments_enabled = std::env::var("CHECKOUT_PAYMENTS_ENABLED")
            .ok()
            .map_or(defaults.payments_enabled, |v| parse_flag(&v));

        Ok(Self {
            platform,
            fee_rate,
            merchant_display_name: std::env::var("CHECKOUT_MERCHANT_NAME")
                .unwrap_or(defaults.merchant_display_name),
            business_code: std::env::var("CHECKOUT_BUSINESS_CODE").unwrap_or(defaults.business_code),
            payments_enabled,
            retry_policy: defaults.retry_policy,
        })
    }

    pub fn with_platform(mut self, platform: Platform) -> Self {
        self.platform = platform;
        self
    }

    /// Fee applies only on the web card-entry path
    pub fn applies_fee(&self) -> bool {
        self.platform.applies_fee() && !self.fee_rate.is_zero()
    }
}

fn parse_flag(raw: &str) -> bool {
    matches!(raw.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CheckoutConfig::default();
        assert_eq!(config.fee_rate, DEFAULT_FEE_RATE);
        assert!(config.payments_enabled);
        assert!(!config.applies_fee());
        assert!(config.with_platform(Platform::Web).applies_fee());
    }

    #[test]
    fn test_flag_parsing() {
        assert!(parse_flag("TRUE"));
        assert!(parse_flag(" 1 "));
        assert!(!parse_flag("off"));
        assert!(!parse_flag(""));
    }
}
