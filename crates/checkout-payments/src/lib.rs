//! # checkout-payments
//!
//! Platform payment presenters and gateway webhook handling.
//!
//! ## Presenters
//!
//! ### 1. Native sheet
//!
//! The platform SDK owns card entry and confirmation; the presenter only
//! initializes the sheet with the client secret and reads its outcome.
//!
//! ```text
//! ┌─────────────┐   init(secret)   ┌─────────────────┐
//! │  Presenter  │─────────────────▶│  Payment Sheet  │──▶ Completed | Canceled | Failed
//! └─────────────┘                  └─────────────────┘
//! ```
//!
//! ### 2. Web card modal
//!
//! The buyer accepts the processing fee, enters a card in the modal, and the
//! presenter tokenizes it and confirms the intent through a gateway client
//! scoped to the publishable key.
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌────────────────┐   ┌─────────────┐
//! │ Fee notice   │──▶│  Card form   │──▶│ payment method │──▶│   confirm   │
//! └──────────────┘   └──────────────┘   └────────────────┘   └─────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use checkout_payments::{presenter_for, PaymentSurface};
//!
//! let presenter = presenter_for(&config, PaymentSurface::Native { sheet })?;
//! ```

mod factory;
mod native;
mod web;
mod webhook;

pub use factory::{PaymentSurface, presenter_for};
pub use native::NativeSheetPresenter;
pub use web::WebModalPresenter;
pub use webhook::{GatewayEvent, WebhookHandler};
