//! Checkout Session
//!
//! Working state for one checkout, and the transition table it must follow.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{CheckoutError, Result};
use crate::model::{PaymentReference, Platform};
use crate::pricing::PriceSummary;
use crate::secret::ClientSecret;

/// Unique session identifier
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(String);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Checkout state machine states
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Idle,
    IntentCreated,
    SecretValidated,
    AwaitingConfirmation,
    Confirmed,
    Recorded,
    Failed,
    UserCancelled,
}

impl SessionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionStatus::Recorded | SessionStatus::Failed | SessionStatus::UserCancelled
        )
    }

    /// At or past the point where money has moved
    pub fn is_charged(self) -> bool {
        matches!(self, SessionStatus::Confirmed | SessionStatus::Recorded)
    }

    /// Legal next states
    pub fn can_advance_to(self, next: SessionStatus) -> bool {
        use SessionStatus::{
            AwaitingConfirmation, Confirmed, Failed, IntentCreated, Recorded, SecretValidated, UserCancelled,
        };
        match self {
            // Zero-cost purchases go straight to Confirmed
            SessionStatus::Idle => matches!(next, IntentCreated | Confirmed | Failed | UserCancelled),
            IntentCreated => matches!(next, SecretValidated | Failed),
            SecretValidated => matches!(next, AwaitingConfirmation | Failed | UserCancelled),
            AwaitingConfirmation => matches!(next, Confirmed | Failed | UserCancelled),
            Confirmed => matches!(next, Recorded | Failed),
            Recorded | Failed | UserCancelled => false,
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

/// The orchestrator's working state for one checkout
#[derive(Clone, Debug)]
pub struct CheckoutSession {
    pub id: SessionId,
    pub buyer_id: String,
    pub cart_id: Option<String>,
    pub platform: Platform,
    status: SessionStatus,
    summary: Option<PriceSummary>,
    secret: Option<ClientSecret>,
    payment_ref: Option<PaymentReference>,
    requires_reconciliation: bool,
    history: Vec<(SessionStatus, DateTime<Utc>)>,
}

impl CheckoutSession {
    pub fn new(buyer_id: impl Into<String>, cart_id: Option<String>, platform: Platform) -> Self {
        Self {
            id: SessionId::new(),
            buyer_id: buyer_id.into(),
            cart_id,
            platform,
            status: SessionStatus::Idle,
            summary: None,
            secret: None,
            payment_ref: None,
            requires_reconciliation: false,
            history: vec![(SessionStatus::Idle, Utc::now())],
        }
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn summary(&self) -> Option<&PriceSummary> {
        self.summary.as_ref()
    }

    pub fn secret(&self) -> Option<&ClientSecret> {
        self.secret.as_ref()
    }

    pub fn payment_ref(&self) -> Option<&PaymentReference> {
        self.payment_ref.as_ref()
    }

    /// Failed after the charge went through
    pub fn requires_reconciliation(&self) -> bool {
        self.requires_reconciliation
    }

    /// Every state visited, in order
    pub fn history(&self) -> impl Iterator<Item = SessionStatus> + '_ {
        self.history.iter().map(|(s, _)| *s)
    }

    pub fn set_summary(&mut self, summary: PriceSummary) {
        self.summary = Some(summary);
    }

    /// Move to the next state, enforcing the transition table
    pub fn advance(&mut self, next: SessionStatus) -> Result<()> {
        if !self.status.can_advance_to(next) {
            return Err(CheckoutError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        tracing::debug!(session_id = %self.id, from = %self.status, to = %next, "Checkout transition");
        self.status = next;
        self.history.push((next, Utc::now()));
        Ok(())
    }

    pub fn intent_created(&mut self) -> Result<()> {
        self.advance(SessionStatus::IntentCreated)
    }

    pub fn secret_validated(&mut self, secret: ClientSecret) -> Result<()> {
        self.advance(SessionStatus::SecretValidated)?;
        self.secret = Some(secret);
        Ok(())
    }

    pub fn confirmed(&mut self, payment_ref: Option<PaymentReference>) -> Result<()> {
        self.advance(SessionStatus::Confirmed)?;
        self.payment_ref = payment_ref;
        Ok(())
    }

    /// Land in the terminal state matching an error
    pub fn fail(&mut self, error: &CheckoutError) -> Result<()> {
        self.requires_reconciliation = error.is_post_charge();
        self.advance(error.terminal_status())
    }

    /// Buyer-initiated abort; only allowed before the charge is confirmed
    pub fn cancel(&mut self) -> Result<()> {
        if self.status.is_charged() {
            return Err(CheckoutError::CancellationNotAllowed);
        }
        self.advance(SessionStatus::UserCancelled)
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}
