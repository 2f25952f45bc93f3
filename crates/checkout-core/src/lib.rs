//! # checkout-core
//!
//! Checkout state machine with platform-agnostic payment presentation and a
//! reconciliation path for payments that were captured but not recorded.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                      CheckoutOrchestrator                        │
//! │  ┌──────────────┐  ┌──────────────┐  ┌───────────────────────┐   │
//! │  │    Price     │  │   Gateway    │  │   PaymentPresenter    │   │
//! │  │  Aggregator  │──│    Client    │──│  (NativeSheet | Web)  │   │
//! │  └──────────────┘  └──────────────┘  └───────────────────────┘   │
//! │          │                                      │                │
//! │  ┌──────────────┐                    ┌───────────────────────┐   │
//! │  │  CartStore   │                    │  TransactionRecorder  │   │
//! │  │  + CartLocks │                    │  → Reconciliation     │   │
//! │  └──────────────┘                    └───────────────────────┘   │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every network and SDK collaborator sits behind a trait, so the same
//! orchestrator runs against HTTP backends, a native sheet, a browser card
//! form, or in-memory fakes.

pub mod cart;
pub mod config;
pub mod error;
pub mod gateway;
pub mod ledger;
pub mod model;
pub mod orchestrator;
pub mod presenter;
pub mod pricing;
pub mod reconciliation;
pub mod sdk;
pub mod secret;
pub mod session;

pub use cart::{Cart, CartLease, CartLocks, CartStore, MemoryCartStore};
pub use config::CheckoutConfig;
pub use error::{CheckoutError, Result};
pub use gateway::{PaymentBackend, PaymentGatewayClient};
pub use ledger::{Transaction, TransactionRecord, TransactionRecorder};
pub use model::{ItemRef, LineItem, PaymentReference, Platform, PurchaseContext, Seller};
pub use orchestrator::{CheckoutDeps, CheckoutOrchestrator, CheckoutReceipt};
pub use presenter::{CardForm, FeeDisclosure, FeeNotice, PaymentPresenter};
pub use pricing::{PriceAggregator, PriceSummary};
pub use reconciliation::{
    MemoryReconciliationQueue, ReconciliationEntry, ReconciliationQueue, ReconciliationSink, ReconciliationTicket,
    Reconciler, RetryPolicy,
};
pub use secret::{ClientSecret, SecretValidator};
pub use session::{CheckoutSession, SessionStatus};
