//! Reconciliation
//!
//! A payment that was captured but could not be recorded is queued here and the
//! recording alone is retried with backoff. The charge itself is never retried.
//!
//! ```text
//!  Confirmed ──record()──▶ Recorded
//!      │ fails
//!      ▼
//!  enqueue(ticket) ──▶ Reconciler: retry record() at 30s, 60s, 120s ... (cap 15m)
//!                          │ 6 failures
//!                          ▼
//!                      Escalated (operator follow-up)
//! ```

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cart::{Cart, CartStore};
use crate::error::{CheckoutError, Result};
use crate::ledger::{TransactionRecord, TransactionRecorder};
use crate::model::{CartBinding, PaymentReference};

/// Everything needed to record a captured payment without charging again
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationTicket {
    pub payment_ref: PaymentReference,
    pub buyer_id: String,
    pub session_id: String,
    pub record: TransactionRecord,
    #[serde(default)]
    pub cart: Option<CartBinding>,
    pub failed_at: DateTime<Utc>,
    /// The gateway never clearly confirmed the charge; recorded only after it does
    #[serde(default)]
    pub outcome_unknown: bool,
}

/// Where an entry stands
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryState {
    Pending,
    /// Retries exhausted; needs an operator
    Escalated,
    /// Recorded, but the entry could not be removed yet
    Recorded,
}

/// Queued ticket with retry bookkeeping
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationEntry {
    pub ticket: ReconciliationTicket,
    pub state: EntryState,
    pub attempts: u32,
    pub next_attempt_at: DateTime<Utc>,
    pub last_error: Option<String>,
    /// Set when the gateway webhook confirmed the charge independently
    #[serde(default)]
    pub gateway_confirmed: bool,
}

impl ReconciliationEntry {
    pub fn new(ticket: ReconciliationTicket, policy: &RetryPolicy) -> Self {
        let next_attempt_at = ticket.failed_at + policy.delay_after(1);
        Self {
            ticket,
            state: EntryState::Pending,
            attempts: 0,
            next_attempt_at,
            last_error: None,
            gateway_confirmed: false,
        }
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.state == EntryState::Pending
            && self.next_attempt_at <= now
            && (self.gateway_confirmed || !self.ticket.outcome_unknown)
    }
}

/// Backoff for re-recording
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay_secs: u64,
    pub multiplier: u32,
    pub max_delay_secs: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 6,
            initial_delay_secs: 30,
            multiplier: 2,
            max_delay_secs: 15 * 60,
        }
    }
}

impl RetryPolicy {
    /// Wait before attempt `n` (1-based)
    pub fn delay_after(&self, attempt: u32) -> chrono::Duration {
        let factor = u64::from(self.multiplier).saturating_pow(attempt.saturating_sub(1));
        let secs = self.initial_delay_secs.saturating_mul(factor).min(self.max_delay_secs);
        chrono::Duration::seconds(i64::try_from(secs).unwrap_or(i64::MAX))
    }

    pub fn exhausted(&self, attempts: u32) -> bool {
        attempts >= self.max_attempts
    }
}

/// Write side, used by the orchestrator
#[async_trait]
pub trait ReconciliationSink: Send + Sync {
    /// Queue a captured-but-unrecorded payment
    async fn enqueue(&self, ticket: ReconciliationTicket) -> Result<()>;

    /// Drop the entry once its transaction is recorded
    async fn resolve(&self, payment_ref: &PaymentReference) -> Result<()>;

    /// Whether a cart still has a payment waiting to be recorded
    async fn pending_for_cart(&self, cart_id: &str) -> Result<bool>;
}

/// Full queue, used by the reconciler and operators
#[async_trait]
pub trait ReconciliationQueue: ReconciliationSink {
    async fn list(&self) -> Result<Vec<ReconciliationEntry>>;

    async fn due(&self, now: DateTime<Utc>) -> Result<Vec<ReconciliationEntry>>;

    async fn update(&self, entry: ReconciliationEntry) -> Result<()>;

    /// Gateway says the charge succeeded: make the entry due now.
    /// Returns false when no entry matches.
    async fn mark_gateway_confirmed(&self, payment_ref: &PaymentReference) -> Result<bool>;
}

/// In-memory queue (for development/testing and the operator server)
pub struct MemoryReconciliationQueue {
    entries: RwLock<HashMap<PaymentReference, ReconciliationEntry>>,
    policy: RetryPolicy,
}

impl Default for MemoryReconciliationQueue {
    fn default() -> Self {
        Self::new(RetryPolicy::default())
    }
}

impl MemoryReconciliationQueue {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            policy,
        }
    }
}

#[async_trait]
impl ReconciliationSink for MemoryReconciliationQueue {
    async fn enqueue(&self, ticket: ReconciliationTicket) -> Result<()> {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        // A re-reported ticket keeps its retry history
        entries
            .entry(ticket.payment_ref.clone())
            .or_insert_with(|| ReconciliationEntry::new(ticket, &self.policy));
        Ok(())
    }

    async fn resolve(&self, payment_ref: &PaymentReference) -> Result<()> {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.remove(payment_ref);
        Ok(())
    }

    async fn pending_for_cart(&self, cart_id: &str) -> Result<bool> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.values().any(|e| {
            e.state != EntryState::Recorded && e.ticket.cart.as_ref().is_some_and(|c| c.cart_id == cart_id)
        }))
    }
}

#[async_trait]
impl ReconciliationQueue for MemoryReconciliationQueue {
    async fn list(&self) -> Result<Vec<ReconciliationEntry>> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        let mut list: Vec<_> = entries.values().cloned().collect();
        list.sort_by(|a, b| a.ticket.failed_at.cmp(&b.ticket.failed_at));
        Ok(list)
    }

    async fn due(&self, now: DateTime<Utc>) -> Result<Vec<ReconciliationEntry>> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        let mut due: Vec<_> = entries.values().filter(|e| e.is_due(now)).cloned().collect();
        due.sort_by(|a, b| a.next_attempt_at.cmp(&b.next_attempt_at));
        Ok(due)
    }

    async fn update(&self, entry: ReconciliationEntry) -> Result<()> {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.insert(entry.ticket.payment_ref.clone(), entry);
        Ok(())
    }

    async fn mark_gateway_confirmed(&self, payment_ref: &PaymentReference) -> Result<bool> {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let Some(entry) = entries.get_mut(payment_ref) else {
            return Ok(false);
        };
        entry.gateway_confirmed = true;
        if entry.state == EntryState::Pending {
            entry.next_attempt_at = Utc::now();
        }
        Ok(true)
    }
}

/// Outcome of one reconciliation pass
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileReport {
    pub recorded: Vec<PaymentReference>,
    pub rescheduled: Vec<PaymentReference>,
    pub escalated: Vec<PaymentReference>,
}

/// Retries recording for queued tickets
pub struct Reconciler {
    queue: Arc<dyn ReconciliationQueue>,
    recorder: Arc<dyn TransactionRecorder>,
    carts: Option<Arc<dyn CartStore>>,
    policy: RetryPolicy,
    /// One pass at a time, so an entry is never recorded twice concurrently
    pass: tokio::sync::Mutex<()>,
}

impl Reconciler {
    pub fn new(
        queue: Arc<dyn ReconciliationQueue>,
        recorder: Arc<dyn TransactionRecorder>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            queue,
            recorder,
            carts: None,
            policy,
            pass: tokio::sync::Mutex::new(()),
        }
    }

    /// Clear the buyer's cart when a ticket finally records (client-side use)
    pub fn with_cart_store(mut self, carts: Arc<dyn CartStore>) -> Self {
        self.carts = Some(carts);
        self
    }

    pub fn queue(&self) -> &Arc<dyn ReconciliationQueue> {
        &self.queue
    }

    /// Retry every due entry once
    pub async fn run_once(&self, now: DateTime<Utc>) -> Result<ReconcileReport> {
        let _pass = self.pass.lock().await;
        let mut report = ReconcileReport::default();

        // Entries recorded on an earlier pass whose removal failed
        for parked in self.queue.list().await? {
            if parked.state == EntryState::Recorded {
                if let Err(e) = self.queue.resolve(&parked.ticket.payment_ref).await {
                    tracing::warn!(payment_ref = %parked.ticket.payment_ref, error = %e, "Recorded entry still not removed");
                }
            }
        }

        for mut entry in self.queue.due(now).await? {
            let payment_ref = entry.ticket.payment_ref.clone();
            entry.attempts += 1;

            match self.recorder.record(&entry.ticket.record).await {
                Ok(transaction) => {
                    tracing::info!(
                        payment_ref = %payment_ref,
                        attempts = entry.attempts,
                        transaction_id = ?transaction.transaction_id,
                        "Reconciled captured payment"
                    );
                    // Recorded: from here on nothing may send this entry back to `record`
                    if let (Some(carts), Some(binding)) = (&self.carts, &entry.ticket.cart) {
                        if let Err(e) = Cart::clear(carts.as_ref(), &binding.business_ids) {
                            tracing::warn!(cart_id = %binding.cart_id, error = %e, "Failed to clear cart after reconciling");
                        }
                    }
                    if let Err(e) = self.queue.resolve(&payment_ref).await {
                        tracing::warn!(payment_ref = %payment_ref, error = %e, "Failed to remove reconciled entry; parking it");
                        entry.state = EntryState::Recorded;
                        entry.last_error = Some(e.to_string());
                        if let Err(e) = self.queue.update(entry).await {
                            tracing::error!(payment_ref = %payment_ref, error = %e, "Failed to park reconciled entry");
                        }
                    }
                    report.recorded.push(payment_ref);
                }
                Err(e) => {
                    entry.last_error = Some(e.to_string());
                    if self.policy.exhausted(entry.attempts) {
                        entry.state = EntryState::Escalated;
                        tracing::error!(
                            payment_ref = %payment_ref,
                            buyer_id = %entry.ticket.buyer_id,
                            amount = %entry.ticket.record.total_amount_paid,
                            attempts = entry.attempts,
                            error = %e,
                            "Reconciliation retries exhausted; escalating to operator"
                        );
                        report.escalated.push(payment_ref.clone());
                    } else {
                        entry.next_attempt_at = now + self.policy.delay_after(entry.attempts + 1);
                        tracing::warn!(
                            payment_ref = %payment_ref,
                            attempts = entry.attempts,
                            next_attempt_at = %entry.next_attempt_at,
                            error = %e,
                            "Reconciliation attempt failed"
                        );
                        report.rescheduled.push(payment_ref.clone());
                    }
                    if let Err(e) = self.queue.update(entry).await {
                        tracing::error!(payment_ref = %payment_ref, error = %e, "Failed to reschedule entry");
                    }
                }
            }
        }

        Ok(report)
    }

    /// Poll the queue until `shutdown` flips to true
    pub async fn run(self: Arc<Self>, poll_interval: Duration, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        tracing::info!(poll_secs = poll_interval.as_secs(), "Reconciler started");
        loop {
            if let Err(e) = self.run_once(Utc::now()).await {
                tracing::warn!(error = %e, "Reconciliation pass failed");
            }

            tokio::select! {
                () = tokio::time::sleep(poll_interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::info!("Reconciler stopped");
    }
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler").field("policy", &self.policy).finish_non_exhaustive()
    }
}

/// Reject a cart checkout while an earlier charge for it is unrecorded
pub async fn ensure_no_pending(sink: &dyn ReconciliationSink, cart_id: &str) -> Result<()> {
    if sink.pending_for_cart(cart_id).await? {
        return Err(CheckoutError::ReconciliationPending(cart_id.to_string()));
    }
    Ok(())
}
