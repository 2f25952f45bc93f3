//! Error Types
//!
//! The checkout failure taxonomy. Everything before `Confirmed` is recoverable by
//! discarding the session; `RequiresReconciliation` is the one post-charge failure.

use thiserror::Error;

use crate::reconciliation::ReconciliationTicket;
use crate::session::SessionStatus;

/// Result type alias for checkout operations
pub type Result<T> = std::result::Result<T, CheckoutError>;

/// Checkout error types
#[derive(Error, Debug)]
pub enum CheckoutError {
    /// Nothing purchasable was left to check out
    #[error("Nothing to purchase: {0}")]
    EmptyPurchase(String),

    /// A line item carried an amount that is not a non-negative number
    #[error("Invalid amount for item(s): {}", .item_ids.join(", "))]
    InvalidAmount { item_ids: Vec<String> },

    /// Backend refused or failed to create a payment intent
    #[error("Payment intent creation failed: {0}")]
    IntentCreationFailed(String),

    /// Publishable key lookup returned nothing usable
    #[error("Publishable key resolution failed: {0}")]
    KeyResolutionFailed(String),

    /// Client secret did not have the `<intent-id>_secret_<random>` shape
    #[error("Malformed client secret: {0}")]
    MalformedSecret(String),

    /// Confirmation attempted before the gateway client finished initializing
    #[error("Payment gateway not ready: {0}")]
    GatewayNotReady(String),

    /// Gateway declined the charge (carries the gateway's reason)
    #[error("Payment declined: {0}")]
    PaymentDeclined(String),

    /// The gateway may have charged, but its reply did not say so
    #[error("Payment confirmation outcome unknown: {0}")]
    ConfirmationUnknown(String),

    /// Buyer backed out of payment entry
    #[error("Checkout cancelled by user")]
    UserCancelled,

    /// Transactions endpoint rejected the record
    #[error("Transaction recording failed: {0}")]
    RecordingFailed(String),

    /// Recording failed after the charge succeeded
    #[error("Payment {} captured but not recorded: {source}", .ticket.payment_ref)]
    RequiresReconciliation {
        ticket: Box<ReconciliationTicket>,
        #[source]
        source: Box<CheckoutError>,
    },

    /// Cart has a checkout session in flight
    #[error("Cart {0} is locked by an active checkout")]
    CartLocked(String),

    /// Cart was charged but its transaction is still being reconciled
    #[error("Cart {0} has a payment awaiting reconciliation")]
    ReconciliationPending(String),

    /// Abort requested after the charge was confirmed
    #[error("Checkout can no longer be cancelled once payment is confirmed")]
    CancellationNotAllowed,

    /// State machine was asked for an illegal transition
    #[error("Invalid checkout transition: {from:?} -> {to:?}")]
    InvalidTransition { from: SessionStatus, to: SessionStatus },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Local store failure (cart store, reconciliation queue)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Transport-level failure talking to a backend
    #[error("Network error: {0}")]
    Network(String),

    /// Gateway webhook could not be verified or parsed
    #[error("Webhook error: {0}")]
    Webhook(String),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CheckoutError {
    /// Whether the buyer can safely start over from `Idle`
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CheckoutError::IntentCreationFailed(_)
                | CheckoutError::KeyResolutionFailed(_)
                | CheckoutError::MalformedSecret(_)
                | CheckoutError::GatewayNotReady(_)
                | CheckoutError::PaymentDeclined(_)
                | CheckoutError::UserCancelled
                | CheckoutError::Network(_)
        )
    }

    /// Whether money has (or may have) already moved for this failure
    pub fn is_post_charge(&self) -> bool {
        matches!(
            self,
            CheckoutError::RequiresReconciliation { .. } | CheckoutError::ConfirmationUnknown(_)
        )
    }

    /// Terminal status a session lands in when it fails with this error
    pub fn terminal_status(&self) -> SessionStatus {
        match self {
            CheckoutError::UserCancelled => SessionStatus::UserCancelled,
            _ => SessionStatus::Failed,
        }
    }

    /// Reconciliation ticket, when the failure happened after the charge
    pub fn reconciliation_ticket(&self) -> Option<&ReconciliationTicket> {
        match self {
            CheckoutError::RequiresReconciliation { ticket, .. } => Some(&**ticket),
            _ => None,
        }
    }

    /// Convert to a buyer-facing message
    pub fn user_message(&self) -> String {
        match self {
            CheckoutError::RequiresReconciliation { source, .. }
                if matches!(**source, CheckoutError::ConfirmationUnknown(_)) =>
            {
                source.user_message()
            }
            CheckoutError::RequiresReconciliation { .. } => {
                "Your payment was received. We're finalizing your order and will confirm it shortly.".into()
            }
            CheckoutError::ConfirmationUnknown(_) => {
                "We're still confirming your payment with the card processor. Please don't pay again; your order will update shortly.".into()
            }
            CheckoutError::UserCancelled => "Checkout was cancelled. Your cart has not been changed.".into(),
            CheckoutError::PaymentDeclined(reason) => {
                format!("Your payment was declined: {reason}. Please try another card.")
            }
            CheckoutError::InvalidAmount { .. } => {
                "Some items in your cart have an invalid price and were left out.".into()
            }
            CheckoutError::CartLocked(_) => "A checkout for this cart is already in progress.".into(),
            CheckoutError::ReconciliationPending(_) => {
                "Your previous payment for this cart is still being finalized.".into()
            }
            CheckoutError::CancellationNotAllowed => {
                "Your payment has already gone through and can no longer be cancelled.".into()
            }
            _ => "Something went wrong while processing your payment. Please try again.".into(),
        }
    }
}
