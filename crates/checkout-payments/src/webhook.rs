//! Stripe Webhook Handling
//!
//! Gateway-side confirmation for payments that are waiting in the
//! reconciliation queue. A `payment_intent.succeeded` event for a queued
//! payment makes its recording retry due immediately; a
//! `payment_intent.payment_failed` event drops an entry whose outcome was
//! never known, since nothing was charged.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use stripe::{Event, EventObject, EventType, Webhook};

use checkout_core::error::{CheckoutError, Result};
use checkout_core::model::PaymentReference;
use checkout_core::reconciliation::ReconciliationQueue;

/// Parsed webhook event
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GatewayEvent {
    /// Charge captured at the gateway
    PaymentSucceeded {
        payment_ref: PaymentReference,
        /// Whether a queued reconciliation entry matched
        #[serde(default)]
        queued: bool,
    },

    /// Charge attempt failed at the gateway
    PaymentFailed {
        payment_ref: PaymentReference,
        reason: Option<String>,
        /// Whether an unconfirmed queue entry was dropped
        #[serde(default)]
        released: bool,
    },

    /// Unhandled event type
    Other { event_type: String },
}

/// Webhook handler
pub struct WebhookHandler {
    queue: Arc<dyn ReconciliationQueue>,
}

impl WebhookHandler {
    pub fn new(queue: Arc<dyn ReconciliationQueue>) -> Self {
        Self { queue }
    }

    /// Verify webhook signature and parse event
    pub fn parse_event(&self, payload: &str, signature: &str, secret: &str) -> Result<Event> {
        Webhook::construct_event(payload, signature, secret)
            .map_err(|e| CheckoutError::Webhook(format!("signature: {e}")))
    }

    /// Process a verified event
    pub async fn handle(&self, event: Event) -> Result<GatewayEvent> {
        tracing::info!(event_type = ?event.type_, "Processing Stripe webhook");
        let parsed = Self::interpret(&event)?;
        self.apply(parsed).await
    }

    /// Act on a parsed event
    pub async fn apply(&self, event: GatewayEvent) -> Result<GatewayEvent> {
        match event {
            GatewayEvent::PaymentSucceeded { payment_ref, .. } => {
                let queued = self.queue.mark_gateway_confirmed(&payment_ref).await?;
                if queued {
                    tracing::info!(payment_ref = %payment_ref, "Gateway confirmed a payment awaiting reconciliation");
                } else {
                    tracing::debug!(payment_ref = %payment_ref, "Gateway confirmed payment");
                }
                Ok(GatewayEvent::PaymentSucceeded { payment_ref, queued })
            }

            GatewayEvent::PaymentFailed { payment_ref, reason, .. } => {
                tracing::warn!(payment_ref = %payment_ref, reason = ?reason, "Gateway reported a failed payment");
                let unconfirmed = self
                    .queue
                    .list()
                    .await?
                    .into_iter()
                    .any(|e| e.ticket.payment_ref == payment_ref && e.ticket.outcome_unknown && !e.gateway_confirmed);
                if unconfirmed {
                    self.queue.resolve(&payment_ref).await?;
                    tracing::info!(payment_ref = %payment_ref, "Released unconfirmed payment; nothing was charged");
                }
                Ok(GatewayEvent::PaymentFailed {
                    payment_ref,
                    reason,
                    released: unconfirmed,
                })
            }

            GatewayEvent::Other { event_type } => {
                tracing::debug!(event_type = %event_type, "Unhandled webhook event");
                Ok(GatewayEvent::Other { event_type })
            }
        }
    }

    /// Parse Stripe event into our event type
    fn interpret(event: &Event) -> Result<GatewayEvent> {
        match event.type_ {
            EventType::PaymentIntentSucceeded => {
                if let EventObject::PaymentIntent(intent) = &event.data.object {
                    Ok(GatewayEvent::PaymentSucceeded {
                        payment_ref: PaymentReference::new(intent.id.to_string()),
                        queued: false,
                    })
                } else {
                    Err(CheckoutError::Webhook("Invalid payment intent data".into()))
                }
            }

            EventType::PaymentIntentPaymentFailed => {
                if let EventObject::PaymentIntent(intent) = &event.data.object {
                    Ok(GatewayEvent::PaymentFailed {
                        payment_ref: PaymentReference::new(intent.id.to_string()),
                        reason: intent.last_payment_error.as_ref().and_then(|e| e.message.clone()),
                        released: false,
                    })
                } else {
                    Err(CheckoutError::Webhook("Invalid payment intent data".into()))
                }
            }

            _ => Ok(GatewayEvent::Other {
                event_type: format!("{:?}", event.type_),
            }),
        }
    }
}
