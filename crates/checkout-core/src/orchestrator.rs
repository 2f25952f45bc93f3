//! Checkout Orchestrator
//!
//! One state machine for every purchase flow (cart, expertise listing, wish
//! response). Each step is awaited before the next starts:
//!
//! ```text
//! Idle ─▶ IntentCreated ─▶ SecretValidated ─▶ AwaitingConfirmation ─▶ Confirmed ─▶ Recorded
//!   │            │                 │                    │                 │
//!   └────────────┴─────────────────┴────────────────────┴──▶ Failed / UserCancelled
//! ```
//!
//! Nothing before `Confirmed` touches the cart. After `Confirmed` the charge is
//! never retried; only recording is, through the reconciliation queue.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::cart::{Cart, CartLease, CartLocks, CartStore};
use crate::config::CheckoutConfig;
use crate::error::{CheckoutError, Result};
use crate::gateway::PaymentGatewayClient;
use crate::ledger::{Transaction, TransactionRecord, TransactionRecorder};
use crate::model::{CartBinding, LineItem, PaymentReference, PurchaseContext};
use crate::presenter::{FeeDisclosure, FeeNotice, PaymentPresenter};
use crate::pricing::{PriceAggregator, PriceSummary, SkippedItem};
use crate::reconciliation::{
    MemoryReconciliationQueue, ReconciliationQueue, ReconciliationSink, ReconciliationTicket, ensure_no_pending,
};
use crate::secret::SecretValidator;
use crate::session::{CheckoutSession, SessionId, SessionStatus};

/// Collaborators the orchestrator is wired with
pub struct CheckoutDeps {
    pub gateway: Arc<PaymentGatewayClient>,
    pub presenter: Arc<dyn PaymentPresenter>,
    pub recorder: Arc<dyn TransactionRecorder>,
    pub carts: Arc<dyn CartStore>,
    pub disclosure: Arc<dyn FeeDisclosure>,
    pub reconciliation: Arc<dyn ReconciliationSink>,
}

/// Result of a completed checkout
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CheckoutReceipt {
    pub session_id: SessionId,
    pub transaction: Transaction,
    pub summary: PriceSummary,
    pub payment_ref: Option<PaymentReference>,

    /// Items left out of pricing (bad cart data or invalid amounts)
    pub skipped: Vec<SkippedItem>,

    /// States visited, `Idle` through `Recorded`
    pub history: Vec<SessionStatus>,
}

/// Drives a purchase from price computation to a recorded transaction
pub struct CheckoutOrchestrator {
    config: CheckoutConfig,
    deps: CheckoutDeps,
    locks: CartLocks,
    /// Tickets the reconciliation sink refused; they block their cart until recorded
    stranded: Arc<MemoryReconciliationQueue>,
}

impl CheckoutOrchestrator {
    pub fn new(config: CheckoutConfig, deps: CheckoutDeps) -> Result<Self> {
        if deps.presenter.platform() != config.platform {
            return Err(CheckoutError::Config(format!(
                "presenter serves {} but checkout is configured for {}",
                deps.presenter.platform().as_str(),
                config.platform.as_str()
            )));
        }
        Ok(Self {
            stranded: Arc::new(MemoryReconciliationQueue::new(config.retry_policy.clone())),
            config,
            deps,
            locks: CartLocks::new(),
        })
    }

    /// Share an existing lock registry with the cart-editing UI
    pub fn with_cart_locks(mut self, locks: CartLocks) -> Self {
        self.locks = locks;
        self
    }

    pub fn config(&self) -> &CheckoutConfig {
        &self.config
    }

    pub fn cart_locks(&self) -> &CartLocks {
        &self.locks
    }

    /// Refuse cart edits while a checkout of that cart is in flight
    pub fn ensure_cart_editable(&self, cart_id: &str) -> Result<()> {
        self.locks.ensure_editable(cart_id)
    }

    /// Price the purchase the way checkout would, without charging
    pub fn preview(&self, items: &[LineItem]) -> Result<PriceSummary> {
        PriceAggregator::compute_summary(items, self.config.fee_rate, self.config.applies_fee())
    }

    /// Run one checkout to a terminal state
    pub async fn checkout(&self, ctx: PurchaseContext) -> Result<CheckoutReceipt> {
        if ctx.items.is_empty() {
            return Err(CheckoutError::EmptyPurchase(format!("no items for buyer {}", ctx.buyer_id)));
        }

        let lease = match ctx.cart_id() {
            Some(cart_id) => {
                ensure_no_pending(self.stranded.as_ref(), cart_id).await?;
                ensure_no_pending(self.deps.reconciliation.as_ref(), cart_id).await?;
                Some(self.locks.try_acquire(cart_id)?)
            }
            None => None,
        };

        let mut session = CheckoutSession::new(
            ctx.buyer_id.clone(),
            ctx.cart_id().map(str::to_string),
            self.config.platform,
        );
        tracing::info!(
            session_id = %session.id,
            buyer_id = %ctx.buyer_id,
            seller = %ctx.seller.id(),
            platform = self.config.platform.as_str(),
            zero_cost = ctx.zero_cost,
            "Checkout started"
        );

        match self.drive(&mut session, &ctx, lease).await {
            Ok(transaction) => {
                session.advance(SessionStatus::Recorded)?;
                tracing::info!(
                    session_id = %session.id,
                    transaction_id = ?transaction.transaction_id,
                    amount = %transaction.record.total_amount_paid,
                    "Checkout recorded"
                );

                let summary = session.summary().cloned().unwrap_or_else(PriceSummary::empty);
                let mut skipped = ctx.rejected.clone();
                skipped.extend(summary.skipped.iter().cloned());

                Ok(CheckoutReceipt {
                    session_id: session.id.clone(),
                    payment_ref: session.payment_ref().cloned(),
                    history: session.history().collect(),
                    transaction,
                    summary,
                    skipped,
                })
            }
            Err(e) => {
                if let Err(transition) = session.fail(&e) {
                    tracing::warn!(session_id = %session.id, error = %transition, "Session already terminal");
                }
                match session.status() {
                    SessionStatus::UserCancelled => {
                        tracing::info!(session_id = %session.id, "Checkout cancelled by buyer");
                    }
                    _ if session.requires_reconciliation() => {}
                    _ => tracing::warn!(session_id = %session.id, error = %e, "Checkout failed"),
                }
                Err(e)
            }
        }
    }

    async fn drive(
        &self,
        session: &mut CheckoutSession,
        ctx: &PurchaseContext,
        lease: Option<CartLease>,
    ) -> Result<Transaction> {
        let summary = self.price(ctx).await?;
        session.set_summary(summary.clone());

        if ctx.zero_cost || !summary.is_chargeable() {
            if summary.is_chargeable() {
                return Err(CheckoutError::Config(format!(
                    "zero-cost purchase carries a charge of {}",
                    summary.total_display()
                )));
            }
            session.confirmed(None)?;
            return self.finalize(session, ctx, &summary, None, lease, None).await;
        }

        if !self.config.payments_enabled {
            return Err(CheckoutError::GatewayNotReady("payments are disabled".into()));
        }

        self.deps.presenter.prepare(&self.config.business_code).await?;

        let raw = self
            .deps
            .gateway
            .create_intent(&ctx.buyer_id, &self.config.business_code, &summary)
            .await?;
        session.intent_created()?;

        let secret = SecretValidator::validate(&raw)?;
        tracing::debug!(session_id = %session.id, intent_id = %secret.intent_id(), "Client secret validated");
        session.secret_validated(secret.clone())?;

        session.advance(SessionStatus::AwaitingConfirmation)?;
        let confirmation = self
            .deps
            .presenter
            .collect_and_confirm(&summary, &secret, &ctx.billing_name)
            .await;
        let payment_ref = match confirmation {
            Ok(payment_ref) => payment_ref,
            // Possibly charged: queue it unrecorded instead of inviting a second attempt
            Err(unknown @ CheckoutError::ConfirmationUnknown(_)) => {
                tracing::error!(session_id = %session.id, intent_id = %secret.intent_id(), error = %unknown, "Payment outcome unknown");
                let payment_ref = secret.payment_reference();
                return self
                    .finalize(session, ctx, &summary, Some(payment_ref), lease, Some(unknown))
                    .await;
            }
            Err(e) => return Err(e),
        };
        session.confirmed(Some(payment_ref.clone()))?;
        tracing::info!(session_id = %session.id, payment_ref = %payment_ref, amount = %summary.total_display(), "Payment confirmed");

        self.finalize(session, ctx, &summary, Some(payment_ref), lease, None).await
    }

    /// Compute the summary, showing the fee notice first on the surcharged path
    async fn price(&self, ctx: &PurchaseContext) -> Result<PriceSummary> {
        let apply_fee = self.config.applies_fee() && !ctx.zero_cost;
        if !apply_fee {
            return PriceAggregator::compute_summary(&ctx.items, self.config.fee_rate, false);
        }

        let base = PriceAggregator::compute_summary(&ctx.items, self.config.fee_rate, false)?;
        let notice = FeeNotice::preview(&base, self.config.fee_rate);
        if !self.deps.disclosure.acknowledge(&notice).await? {
            return Err(CheckoutError::UserCancelled);
        }

        PriceAggregator::compute_summary(&ctx.items, self.config.fee_rate, true)
    }

    /// Record the purchase on a detached task
    ///
    /// Dropping the caller's future past this point must not lose a captured
    /// payment, so recording (and enqueueing on failure) runs to completion
    /// on its own task, holding the cart lease until it is done. With
    /// `unconfirmed` set nothing is recorded; the ticket is only queued.
    async fn finalize(
        &self,
        session: &CheckoutSession,
        ctx: &PurchaseContext,
        summary: &PriceSummary,
        payment_ref: Option<PaymentReference>,
        lease: Option<CartLease>,
        unconfirmed: Option<CheckoutError>,
    ) -> Result<Transaction> {
        let record = TransactionRecord::build(&ctx.buyer_id, &ctx.seller, payment_ref.clone(), summary);
        let ticket = payment_ref.map(|payment_ref| ReconciliationTicket {
            payment_ref,
            buyer_id: ctx.buyer_id.clone(),
            session_id: session.id.to_string(),
            record: record.clone(),
            cart: ctx.cart.clone(),
            failed_at: Utc::now(),
            outcome_unknown: unconfirmed.is_some(),
        });

        let task = Recording {
            recorder: Arc::clone(&self.deps.recorder),
            carts: Arc::clone(&self.deps.carts),
            reconciliation: Arc::clone(&self.deps.reconciliation),
            stranded: Arc::clone(&self.stranded),
            record,
            cart: ctx.cart.clone(),
            ticket: ticket.clone(),
            lease,
            unconfirmed,
        };

        match tokio::spawn(task.run()).await {
            Ok(result) => result,
            Err(join) => {
                let source = CheckoutError::RecordingFailed(format!("recording task aborted: {join}"));
                match ticket {
                    Some(ticket) => {
                        tracing::error!(payment_ref = %ticket.payment_ref, error = %source, "Recording task lost");
                        if let Err(e) = self.stranded.enqueue(ticket.clone()).await {
                            tracing::error!(payment_ref = %ticket.payment_ref, error = %e, "Failed to hold ticket locally");
                        }
                        Err(CheckoutError::RequiresReconciliation {
                            ticket: Box::new(ticket),
                            source: Box::new(source),
                        })
                    }
                    None => Err(source),
                }
            }
        }
    }

    /// Retry recording for a captured payment; never charges again
    ///
    /// Once the ledger accepts the record this succeeds, even if the queue
    /// entry or the cart cannot be cleaned up.
    pub async fn retry_recording(&self, ticket: &ReconciliationTicket) -> Result<Transaction> {
        if ticket.outcome_unknown {
            return Err(CheckoutError::ConfirmationUnknown(format!(
                "{} is recorded once the gateway confirms it",
                ticket.payment_ref
            )));
        }

        let _lease = match &ticket.cart {
            Some(binding) => Some(self.locks.try_acquire(&binding.cart_id)?),
            None => None,
        };

        let transaction = self.deps.recorder.record(&ticket.record).await?;
        tracing::info!(payment_ref = %ticket.payment_ref, "Reconciled payment on retry");

        self.stranded.resolve(&ticket.payment_ref).await?;
        if let Err(e) = self.deps.reconciliation.resolve(&ticket.payment_ref).await {
            tracing::error!(
                payment_ref = %ticket.payment_ref,
                error = %e,
                "Recorded, but the reconciliation entry could not be removed"
            );
        }
        if let Some(binding) = &ticket.cart {
            if let Err(e) = Cart::clear(self.deps.carts.as_ref(), &binding.business_ids) {
                tracing::warn!(cart_id = %binding.cart_id, error = %e, "Failed to clear cart after recording");
            }
        }
        Ok(transaction)
    }

    /// Tickets held locally because the reconciliation sink refused them
    pub async fn stranded(&self) -> Result<Vec<ReconciliationTicket>> {
        Ok(self.stranded.list().await?.into_iter().map(|e| e.ticket).collect())
    }

    /// Offer stranded tickets to the reconciliation sink again
    ///
    /// Returns how many were handed over; the rest stay local.
    pub async fn hand_over_stranded(&self) -> Result<usize> {
        let mut handed = 0;
        for ticket in self.stranded().await? {
            let payment_ref = ticket.payment_ref.clone();
            match self.deps.reconciliation.enqueue(ticket).await {
                Ok(()) => {
                    self.stranded.resolve(&payment_ref).await?;
                    handed += 1;
                }
                Err(e) => {
                    tracing::warn!(payment_ref = %payment_ref, error = %e, "Reconciliation sink still unavailable");
                }
            }
        }
        Ok(handed)
    }
}

/// Owned state for the detached recording step
struct Recording {
    recorder: Arc<dyn TransactionRecorder>,
    carts: Arc<dyn CartStore>,
    reconciliation: Arc<dyn ReconciliationSink>,
    stranded: Arc<MemoryReconciliationQueue>,
    record: TransactionRecord,
    cart: Option<CartBinding>,
    ticket: Option<ReconciliationTicket>,
    lease: Option<CartLease>,
    unconfirmed: Option<CheckoutError>,
}

impl Recording {
    async fn run(self) -> Result<Transaction> {
        let result = match self.unconfirmed {
            Some(unknown) => Err(unknown),
            None => self.recorder.record(&self.record).await,
        };

        let outcome = match result {
            Ok(transaction) => {
                if let Some(binding) = &self.cart {
                    // Already recorded; a stale cart is not worth failing the checkout over
                    if let Err(e) = Cart::clear(self.carts.as_ref(), &binding.business_ids) {
                        tracing::warn!(cart_id = %binding.cart_id, error = %e, "Failed to clear cart after recording");
                    }
                }
                Ok(transaction)
            }
            Err(source) => match self.ticket {
                // Zero-cost: nothing was charged, the buyer can simply retry
                None => Err(source),
                Some(mut ticket) => {
                    ticket.failed_at = Utc::now();
                    tracing::error!(
                        payment_ref = %ticket.payment_ref,
                        buyer_id = %ticket.buyer_id,
                        amount = %ticket.record.total_amount_paid,
                        error = %source,
                        "Payment not recorded; queued for reconciliation"
                    );
                    if let Err(e) = self.reconciliation.enqueue(ticket.clone()).await {
                        tracing::error!(
                            payment_ref = %ticket.payment_ref,
                            error = %e,
                            "Failed to enqueue reconciliation ticket; holding it locally"
                        );
                        if let Err(e) = self.stranded.enqueue(ticket.clone()).await {
                            tracing::error!(payment_ref = %ticket.payment_ref, error = %e, "Failed to hold ticket locally");
                        }
                    }
                    Err(CheckoutError::RequiresReconciliation {
                        ticket: Box::new(ticket),
                        source: Box::new(source),
                    })
                }
            },
        };

        drop(self.lease);
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cart::MemoryCartStore;
    use crate::gateway::{IntentRequest, PaymentBackend};
    use crate::ledger::Transaction;
    use crate::model::{ItemRef, LineItem, Platform};
    use crate::secret::ClientSecret;
    use async_trait::async_trait;
    use rust_decimal_macros::dec;
    use std::sync::Mutex;

    type Events = Arc<Mutex<Vec<String>>>;

    struct FakeBackend {
        events: Events,
        body: String,
    }

    #[async_trait]
    impl PaymentBackend for FakeBackend {
        async fn post_payment_intent(&self, request: &IntentRequest) -> Result<String> {
            self.events
                .lock()
                .unwrap()
                .push(format!("create_intent:{}", request.payment_summary.total));
            Ok(self.body.clone())
        }

        async fn fetch_publishable_key(&self, _environment_code: &str) -> Result<serde_json::Value> {
            Ok(serde_json::json!({ "publicKey": "pk_test_1" }))
        }
    }

    enum Outcome {
        Confirm,
        Cancel,
        Decline,
        Unknown,
    }

    struct FakePresenter {
        platform: Platform,
        events: Events,
        outcome: Outcome,
    }

    #[async_trait]
    impl crate::presenter::PaymentPresenter for FakePresenter {
        fn platform(&self) -> Platform {
            self.platform
        }

        async fn collect_and_confirm(
            &self,
            summary: &PriceSummary,
            secret: &ClientSecret,
            _billing_name: &str,
        ) -> Result<PaymentReference> {
            self.events
                .lock()
                .unwrap()
                .push(format!("present:{}", summary.total_display()));
            match self.outcome {
                Outcome::Confirm => Ok(secret.payment_reference()),
                Outcome::Cancel => Err(CheckoutError::UserCancelled),
                Outcome::Decline => Err(CheckoutError::PaymentDeclined("card_declined".into())),
                Outcome::Unknown => Err(CheckoutError::ConfirmationUnknown("reply body unreadable".into())),
            }
        }
    }

    struct FakeRecorder {
        events: Events,
        fail: Mutex<bool>,
        records: Mutex<Vec<TransactionRecord>>,
    }

    #[async_trait]
    impl TransactionRecorder for FakeRecorder {
        async fn record(&self, record: &TransactionRecord) -> Result<Transaction> {
            self.events.lock().unwrap().push("record".into());
            self.records.lock().unwrap().push(record.clone());
            if *self.fail.lock().unwrap() {
                return Err(CheckoutError::RecordingFailed("ledger returned success=false".into()));
            }
            Ok(Transaction {
                transaction_id: Some("tx-1".into()),
                record: record.clone(),
                recorded_at: Utc::now(),
            })
        }
    }

    struct FakeDisclosure {
        events: Events,
        accept: bool,
    }

    #[async_trait]
    impl FeeDisclosure for FakeDisclosure {
        async fn acknowledge(&self, notice: &FeeNotice) -> Result<bool> {
            self.events
                .lock()
                .unwrap()
                .push(format!("disclose:{}:{}", notice.rate_percent(), notice.total));
            Ok(self.accept)
        }
    }

    /// Memory queue behind a sink whose writes can go offline
    struct FlakySink {
        queue: Arc<MemoryReconciliationQueue>,
        down: Mutex<bool>,
    }

    impl FlakySink {
        fn check(&self) -> Result<()> {
            if *self.down.lock().unwrap() {
                return Err(CheckoutError::Network("connection refused".into()));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl ReconciliationSink for FlakySink {
        async fn enqueue(&self, ticket: ReconciliationTicket) -> Result<()> {
            self.check()?;
            self.queue.enqueue(ticket).await
        }

        async fn resolve(&self, payment_ref: &PaymentReference) -> Result<()> {
            self.check()?;
            self.queue.resolve(payment_ref).await
        }

        async fn pending_for_cart(&self, cart_id: &str) -> Result<bool> {
            self.queue.pending_for_cart(cart_id).await
        }
    }

    struct Harness {
        orchestrator: CheckoutOrchestrator,
        events: Events,
        recorder: Arc<FakeRecorder>,
        carts: Arc<MemoryCartStore>,
        queue: Arc<MemoryReconciliationQueue>,
        sink: Arc<FlakySink>,
    }

    struct Setup {
        platform: Platform,
        outcome: Outcome,
        accept_fee: bool,
        secret_body: &'static str,
        recorder_fails: bool,
        payments_enabled: bool,
        sink_down: bool,
    }

    impl Default for Setup {
        fn default() -> Self {
            Self {
                platform: Platform::Native,
                outcome: Outcome::Confirm,
                accept_fee: true,
                secret_body: "pi_abc123_secret_xyz789",
                recorder_fails: false,
                payments_enabled: true,
                sink_down: false,
            }
        }
    }

    fn harness(setup: Setup) -> Harness {
        let events: Events = Arc::new(Mutex::new(Vec::new()));
        let recorder = Arc::new(FakeRecorder {
            events: events.clone(),
            fail: Mutex::new(setup.recorder_fails),
            records: Mutex::new(Vec::new()),
        });
        let carts = Arc::new(MemoryCartStore::new());
        let queue = Arc::new(MemoryReconciliationQueue::default());
        let sink = Arc::new(FlakySink {
            queue: queue.clone(),
            down: Mutex::new(setup.sink_down),
        });

        let config = CheckoutConfig {
            platform: setup.platform,
            payments_enabled: setup.payments_enabled,
            ..CheckoutConfig::default()
        };
        let deps = CheckoutDeps {
            gateway: Arc::new(PaymentGatewayClient::new(Arc::new(FakeBackend {
                events: events.clone(),
                body: setup.secret_body.into(),
            }))),
            presenter: Arc::new(FakePresenter {
                platform: setup.platform,
                events: events.clone(),
                outcome: setup.outcome,
            }),
            recorder: recorder.clone(),
            carts: carts.clone(),
            disclosure: Arc::new(FakeDisclosure {
                events: events.clone(),
                accept: setup.accept_fee,
            }),
            reconciliation: sink.clone(),
        };

        Harness {
            orchestrator: CheckoutOrchestrator::new(config, deps).unwrap(),
            events,
            recorder,
            carts,
            queue,
            sink,
        }
    }

    /// One service at 10.00 × 2 in the buyer's cart
    fn seed_cart(h: &Harness) -> PurchaseContext {
        let mut cart = Cart::new("buyer-1");
        cart.add(LineItem::new(ItemRef::Service("bs-1".into()), dec!(10.00), 2, "biz-1"))
            .unwrap();
        cart.save(h.carts.as_ref()).unwrap();
        PurchaseContext::from_cart(&Cart::load(h.carts.as_ref(), "buyer-1").unwrap(), "Ada Buyer").unwrap()
    }

    fn cart_is_intact(h: &Harness) -> bool {
        !Cart::load(h.carts.as_ref(), "buyer-1").unwrap().is_empty()
    }

    fn events(h: &Harness) -> Vec<String> {
        h.events.lock().unwrap().clone()
    }

    #[tokio::test]
    async fn test_native_cart_checkout_records_once() {
        let h = harness(Setup::default());
        let ctx = seed_cart(&h);

        let receipt = h.orchestrator.checkout(ctx).await.unwrap();

        assert_eq!(receipt.summary.subtotal_display(), "20.00");
        assert_eq!(receipt.summary.fee_display(), "0.00");
        assert_eq!(receipt.summary.total_display(), "20.00");
        assert_eq!(receipt.payment_ref, Some(PaymentReference::new("pi_abc123")));
        assert_eq!(
            events(&h),
            vec!["create_intent:20.00", "present:20.00", "record"]
        );

        let records = h.recorder.records.lock().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].total_amount_paid, "20.00");
        assert_eq!(records[0].stripe_payment_intent, Some(PaymentReference::new("pi_abc123")));

        assert_eq!(receipt.history.last(), Some(&SessionStatus::Recorded));
        assert!(!cart_is_intact(&h));
        assert!(!h.orchestrator.cart_locks().is_locked("buyer-1"));
    }

    #[tokio::test]
    async fn test_web_checkout_discloses_fee_before_intent() {
        let h = harness(Setup {
            platform: Platform::Web,
            ..Setup::default()
        });
        let ctx = seed_cart(&h);

        let receipt = h.orchestrator.checkout(ctx).await.unwrap();

        assert_eq!(receipt.summary.fee_display(), "0.60");
        assert_eq!(receipt.summary.total_display(), "20.60");
        assert_eq!(
            events(&h),
            vec!["disclose:3%:20.60", "create_intent:20.60", "present:20.60", "record"]
        );
        assert_eq!(h.recorder.records.lock().unwrap()[0].total_taxes, "0.60");
    }

    #[tokio::test]
    async fn test_declined_fee_disclosure_cancels_before_intent() {
        let h = harness(Setup {
            platform: Platform::Web,
            accept_fee: false,
            ..Setup::default()
        });
        let ctx = seed_cart(&h);

        let err = h.orchestrator.checkout(ctx).await.unwrap_err();

        assert!(matches!(err, CheckoutError::UserCancelled));
        assert_eq!(events(&h), vec!["disclose:3%:20.60"]);
        assert!(cart_is_intact(&h));
    }

    #[tokio::test]
    async fn test_recording_failure_requires_reconciliation() {
        let h = harness(Setup {
            recorder_fails: true,
            ..Setup::default()
        });
        let ctx = seed_cart(&h);

        let err = h.orchestrator.checkout(ctx.clone()).await.unwrap_err();

        assert!(err.is_post_charge());
        assert_eq!(err.terminal_status(), SessionStatus::Failed);
        assert!(err.user_message().contains("payment was received"));
        let ticket = err.reconciliation_ticket().unwrap().clone();
        assert_eq!(ticket.payment_ref, PaymentReference::new("pi_abc123"));
        assert_eq!(ticket.record.total_amount_paid, "20.00");

        // Cart untouched and re-checkout blocked until recording succeeds
        assert!(cart_is_intact(&h));
        assert_eq!(h.queue.list().await.unwrap().len(), 1);
        let again = h.orchestrator.checkout(ctx).await.unwrap_err();
        assert!(matches!(again, CheckoutError::ReconciliationPending(_)));

        *h.recorder.fail.lock().unwrap() = false;
        h.orchestrator.retry_recording(&ticket).await.unwrap();

        assert!(!cart_is_intact(&h));
        assert!(h.queue.list().await.unwrap().is_empty());
        // Charged once, recorded on the retry alone
        let intents = events(&h).iter().filter(|e| e.starts_with("create_intent")).count();
        assert_eq!(intents, 1);
    }

    #[tokio::test]
    async fn test_unreachable_sink_still_blocks_recharge() {
        let h = harness(Setup {
            recorder_fails: true,
            sink_down: true,
            ..Setup::default()
        });
        let ctx = seed_cart(&h);

        let err = h.orchestrator.checkout(ctx.clone()).await.unwrap_err();
        let ticket = err.reconciliation_ticket().unwrap().clone();
        assert_eq!(h.orchestrator.stranded().await.unwrap(), vec![ticket.clone()]);

        let again = h.orchestrator.checkout(ctx).await.unwrap_err();
        assert!(matches!(again, CheckoutError::ReconciliationPending(_)));
        let intents = events(&h).iter().filter(|e| e.starts_with("create_intent")).count();
        assert_eq!(intents, 1);

        // Ledger back, queue still down: the retry records and succeeds anyway
        *h.recorder.fail.lock().unwrap() = false;
        h.orchestrator.retry_recording(&ticket).await.unwrap();
        assert!(h.orchestrator.stranded().await.unwrap().is_empty());
        assert!(!cart_is_intact(&h));
        assert_eq!(h.recorder.records.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_stranded_ticket_handed_over_when_sink_returns() {
        let h = harness(Setup {
            recorder_fails: true,
            sink_down: true,
            ..Setup::default()
        });
        let ctx = seed_cart(&h);
        h.orchestrator.checkout(ctx.clone()).await.unwrap_err();

        assert_eq!(h.orchestrator.hand_over_stranded().await.unwrap(), 0);

        *h.sink.down.lock().unwrap() = false;
        assert_eq!(h.orchestrator.hand_over_stranded().await.unwrap(), 1);
        assert!(h.orchestrator.stranded().await.unwrap().is_empty());
        assert_eq!(h.queue.list().await.unwrap().len(), 1);

        let again = h.orchestrator.checkout(ctx).await.unwrap_err();
        assert!(matches!(again, CheckoutError::ReconciliationPending(_)));
    }

    #[tokio::test]
    async fn test_unknown_outcome_is_queued_not_recorded() {
        let h = harness(Setup {
            outcome: Outcome::Unknown,
            ..Setup::default()
        });
        let ctx = seed_cart(&h);

        let err = h.orchestrator.checkout(ctx.clone()).await.unwrap_err();
        assert!(err.is_post_charge());
        assert!(!err.is_retryable());
        assert!(err.user_message().contains("don't pay again"));
        let ticket = err.reconciliation_ticket().unwrap().clone();
        assert!(ticket.outcome_unknown);
        assert_eq!(ticket.payment_ref, PaymentReference::new("pi_abc123"));

        assert!(h.recorder.records.lock().unwrap().is_empty());
        assert!(cart_is_intact(&h));
        let entry = &h.queue.list().await.unwrap()[0];
        assert!(!entry.is_due(Utc::now() + chrono::Duration::days(1)));

        let again = h.orchestrator.checkout(ctx).await.unwrap_err();
        assert!(matches!(again, CheckoutError::ReconciliationPending(_)));
        assert!(matches!(
            h.orchestrator.retry_recording(&ticket).await,
            Err(CheckoutError::ConfirmationUnknown(_))
        ));
    }

    #[tokio::test]
    async fn test_malformed_secret_never_reaches_presenter() {
        let h = harness(Setup {
            secret_body: "not_a_secret",
            ..Setup::default()
        });
        let ctx = seed_cart(&h);

        let err = h.orchestrator.checkout(ctx).await.unwrap_err();

        assert!(matches!(err, CheckoutError::MalformedSecret(_)));
        assert_eq!(events(&h), vec!["create_intent:20.00"]);
        assert!(cart_is_intact(&h));
    }

    #[tokio::test]
    async fn test_quoted_secret_is_normalized() {
        let h = harness(Setup {
            secret_body: "  \"pi_abc123_secret_xyz789\"  ",
            ..Setup::default()
        });
        let ctx = seed_cart(&h);

        let receipt = h.orchestrator.checkout(ctx).await.unwrap();
        assert_eq!(receipt.payment_ref, Some(PaymentReference::new("pi_abc123")));
    }

    #[tokio::test]
    async fn test_cancel_and_decline_leave_cart_untouched() {
        for outcome in [Outcome::Cancel, Outcome::Decline] {
            let h = harness(Setup {
                outcome,
                ..Setup::default()
            });
            let ctx = seed_cart(&h);

            let err = h.orchestrator.checkout(ctx.clone()).await.unwrap_err();
            assert!(err.is_retryable());
            assert!(cart_is_intact(&h));
            assert!(h.recorder.records.lock().unwrap().is_empty());
            assert!(!h.orchestrator.cart_locks().is_locked("buyer-1"));
        }
    }

    #[tokio::test]
    async fn test_zero_cost_wish_response_skips_gateway() {
        let h = harness(Setup::default());
        let ctx = PurchaseContext::wish_response("buyer-1", "responder-9", "wr-1", dec!(5));

        let receipt = h.orchestrator.checkout(ctx).await.unwrap();

        assert_eq!(events(&h), vec!["record"]);
        assert!(receipt.payment_ref.is_none());
        assert!(receipt.transaction.record.is_zero_cost());
        assert_eq!(receipt.transaction.record.items[0].bounty, "5.00");
        assert_eq!(
            receipt.history,
            vec![SessionStatus::Idle, SessionStatus::Confirmed, SessionStatus::Recorded]
        );
    }

    #[tokio::test]
    async fn test_zero_cost_recording_failure_is_plain() {
        let h = harness(Setup {
            recorder_fails: true,
            ..Setup::default()
        });
        let ctx = PurchaseContext::wish_response("buyer-1", "responder-9", "wr-1", dec!(5));

        let err = h.orchestrator.checkout(ctx).await.unwrap_err();
        assert!(matches!(err, CheckoutError::RecordingFailed(_)));
        assert!(h.queue.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_locked_cart_is_refused() {
        let h = harness(Setup::default());
        let ctx = seed_cart(&h);

        let _held = h.orchestrator.cart_locks().try_acquire("buyer-1").unwrap();
        assert!(h.orchestrator.ensure_cart_editable("buyer-1").is_err());

        let err = h.orchestrator.checkout(ctx).await.unwrap_err();
        assert!(matches!(err, CheckoutError::CartLocked(_)));
        assert!(events(&h).is_empty());
    }

    #[tokio::test]
    async fn test_disabled_payments_refuse_paid_checkout() {
        let h = harness(Setup {
            payments_enabled: false,
            ..Setup::default()
        });
        let ctx = PurchaseContext::expertise("buyer-1", "Ada", "expert-1", "ex-1", dec!(25), 1);

        let err = h.orchestrator.checkout(ctx).await.unwrap_err();
        assert!(matches!(err, CheckoutError::GatewayNotReady(_)));
        assert!(events(&h).is_empty());
    }

    #[tokio::test]
    async fn test_expertise_purchase_records_against_profile() {
        let h = harness(Setup::default());
        let ctx = PurchaseContext::expertise("buyer-1", "Ada", "expert-1", "ex-1", dec!(25), 1);

        let receipt = h.orchestrator.checkout(ctx).await.unwrap();
        assert_eq!(receipt.transaction.record.business_id, "expert-1");
        assert_eq!(receipt.transaction.record.total_amount_paid, "25.00");
    }

    #[test]
    fn test_presenter_platform_must_match_config() {
        let events: Events = Arc::new(Mutex::new(Vec::new()));
        let deps = CheckoutDeps {
            gateway: Arc::new(PaymentGatewayClient::new(Arc::new(FakeBackend {
                events: events.clone(),
                body: String::new(),
            }))),
            presenter: Arc::new(FakePresenter {
                platform: Platform::Web,
                events: events.clone(),
                outcome: Outcome::Confirm,
            }),
            recorder: Arc::new(FakeRecorder {
                events: events.clone(),
                fail: Mutex::new(false),
                records: Mutex::new(Vec::new()),
            }),
            carts: Arc::new(MemoryCartStore::new()),
            disclosure: Arc::new(FakeDisclosure { events, accept: true }),
            reconciliation: Arc::new(MemoryReconciliationQueue::default()),
        };

        let result = CheckoutOrchestrator::new(CheckoutConfig::default(), deps);
        assert!(matches!(result, Err(CheckoutError::Config(_))));
    }
}
