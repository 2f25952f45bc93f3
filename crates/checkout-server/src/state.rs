//! Application State

use std::sync::Arc;

use checkout_core::{CheckoutConfig, ReconciliationQueue, Reconciler};
use checkout_payments::WebhookHandler;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Pricing settings used for summary previews
    pub checkout: Arc<CheckoutConfig>,

    /// Captured-but-unrecorded payments
    pub queue: Arc<dyn ReconciliationQueue>,

    /// Re-records queued payments against the ledger
    pub reconciler: Arc<Reconciler>,

    /// Stripe event processing
    pub webhook: Arc<WebhookHandler>,

    /// Stripe webhook signing secret (optional - None if not configured)
    pub webhook_secret: Option<Arc<str>>,
}
