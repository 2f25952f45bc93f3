//! Backend Configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Where the checkout backends live
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Marketplace API root, e.g. `https://api.example.com`
    pub base_url: String,

    pub intent_path: String,

    /// Environment code is appended as the last path segment
    pub key_path: String,

    pub transactions_path: String,

    /// Operator server holding the reconciliation queue
    pub reconciliation_url: String,

    /// Gateway REST API root
    pub stripe_api_base: String,

    /// Connection timeout in seconds
    pub connect_timeout_secs: u64,

    /// Whole-request timeout for backend calls (not applied to gateway confirmation)
    pub request_timeout_secs: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".into(),
            intent_path: "/payments/intent".into(),
            key_path: "/payments/publishable-key".into(),
            transactions_path: "/transactions".into(),
            reconciliation_url: "http://localhost:3000".into(),
            stripe_api_base: "https://api.stripe.com".into(),
            connect_timeout_secs: 10,
            request_timeout_secs: 30,
        }
    }
}

impl BackendConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let connect_timeout_secs = std::env::var("CHECKOUT_CONNECT_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.connect_timeout_secs);

        Self {
            base_url: std::env::var("CHECKOUT_BACKEND_URL").unwrap_or(defaults.base_url),
            reconciliation_url: std::env::var("CHECKOUT_RECONCILIATION_URL")
                .unwrap_or(defaults.reconciliation_url),
            stripe_api_base: std::env::var("STRIPE_API_BASE").unwrap_or(defaults.stripe_api_base),
            connect_timeout_secs,
            ..defaults
        }
    }

    pub fn intent_url(&self) -> String {
        join(&self.base_url, &self.intent_path)
    }

    pub fn key_url(&self, environment_code: &str) -> String {
        format!("{}/{environment_code}", join(&self.base_url, &self.key_path))
    }

    pub fn transactions_url(&self) -> String {
        join(&self.base_url, &self.transactions_path)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Join a base URL and a path without doubling or dropping the slash
pub(crate) fn join(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
}
