//! # checkout-runtime
//!
//! Concrete collaborators for the checkout engine.
//!
//! ## Backends
//!
//! - **Marketplace API**: payment intents, publishable keys, transaction ledger
//! - **Stripe REST**: card tokenization and intent confirmation with the publishable key
//! - **Operator server**: reconciliation queue intake
//!
//! ## Usage
//!
//! ```rust,ignore
//! use checkout_runtime::{BackendConfig, HttpPaymentBackend, HttpTransactionRecorder};
//!
//! let config = BackendConfig::from_env();
//! let gateway = PaymentGatewayClient::new(Arc::new(HttpPaymentBackend::new(config.clone())?));
//! let recorder = Arc::new(HttpTransactionRecorder::new(&config)?);
//! ```

pub mod backend;
pub mod config;
pub mod reconciliation;
pub mod stripe;

pub use backend::{HttpPaymentBackend, HttpTransactionRecorder};
pub use config::BackendConfig;
pub use reconciliation::HttpReconciliationSink;
pub use stripe::{StripeGatewayFactory, StripeRestGateway};

// Re-export core types for convenience
pub use checkout_core::{CheckoutError, PaymentGatewayClient, Result};
