//! Transaction Ledger
//!
//! The durable record of a completed purchase, and the seam that posts it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CheckoutError, Result};
use crate::model::{ItemRef, PaymentReference, Seller};
use crate::pricing::{PriceSummary, format_money};

/// One line of a recorded transaction
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionLine {
    #[serde(flatten)]
    pub item: ItemRef,
    pub bounty: String,
    pub quantity: u32,
    pub recommender_profile_id: Option<String>,
}

/// Body posted to the transactions endpoint
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub profile_id: String,
    pub business_id: String,

    /// Null only for zero-cost purchases
    pub stripe_payment_intent: Option<PaymentReference>,

    pub total_amount_paid: String,
    pub total_costs: String,
    pub total_taxes: String,
    pub items: Vec<TransactionLine>,
}

impl TransactionRecord {
    /// Build the record for a priced purchase
    pub fn build(
        buyer_id: &str,
        seller: &Seller,
        payment_ref: Option<PaymentReference>,
        summary: &PriceSummary,
    ) -> Self {
        Self {
            profile_id: buyer_id.to_string(),
            business_id: seller.id().to_string(),
            stripe_payment_intent: payment_ref,
            total_amount_paid: summary.total_display(),
            total_costs: summary.subtotal_display(),
            total_taxes: summary.fee_display(),
            items: summary
                .lines
                .iter()
                .map(|line| TransactionLine {
                    item: line.item.clone(),
                    bounty: format_money(line.unit_bounty),
                    quantity: line.quantity,
                    recommender_profile_id: line.recommender_id.clone(),
                })
                .collect(),
        }
    }

    pub fn is_zero_cost(&self) -> bool {
        self.stripe_payment_intent.is_none()
    }
}

/// Transactions endpoint reply
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct LedgerAck {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default, alias = "transaction_uid")]
    pub transaction_id: Option<String>,
}

impl LedgerAck {
    /// Turn the reply into a recorded transaction, or `RecordingFailed`
    pub fn into_transaction(self, record: TransactionRecord) -> Result<Transaction> {
        if !self.success {
            return Err(CheckoutError::RecordingFailed(
                self.message.unwrap_or_else(|| "transactions endpoint reported failure".into()),
            ));
        }
        Ok(Transaction {
            transaction_id: self.transaction_id,
            record,
            recorded_at: Utc::now(),
        })
    }
}

/// A recorded purchase; never mutated after creation
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Ledger id, when the backend returns one
    pub transaction_id: Option<String>,
    pub record: TransactionRecord,
    pub recorded_at: DateTime<Utc>,
}

/// Posts completed purchases to the backend ledger
///
/// Exactly one call per completed checkout; de-duplication is the
/// orchestrator's job, not the recorder's.
#[async_trait]
pub trait TransactionRecorder: Send + Sync {
    async fn record(&self, record: &TransactionRecord) -> Result<Transaction>;
}
