//! Payment Presenter Seam
//!
//! Card entry and confirmation differ per platform; the orchestrator only sees
//! this trait. Concrete presenters are chosen once, at construction.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::model::{PaymentReference, Platform};
use crate::pricing::{PriceSummary, format_money};
use crate::sdk::CardDetails;
use crate::secret::ClientSecret;

/// Drives buyer card entry and payment confirmation
#[async_trait]
pub trait PaymentPresenter: Send + Sync {
    /// Which client environment this presenter serves
    fn platform(&self) -> Platform;

    /// Warm up before a secret exists (key lookup, SDK client creation)
    async fn prepare(&self, _business_code: &str) -> Result<()> {
        Ok(())
    }

    /// Collect payment details and confirm the intent.
    ///
    /// Buyer cancellation is `UserCancelled`; gateway refusal is `PaymentDeclined`.
    async fn collect_and_confirm(
        &self,
        summary: &PriceSummary,
        secret: &ClientSecret,
        billing_name: &str,
    ) -> Result<PaymentReference>;
}

/// What the buyer is told before the surcharged web path
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FeeNotice {
    pub fee_rate: Decimal,
    pub subtotal: String,
    pub fee: String,
    pub total: String,
}

impl FeeNotice {
    pub fn from_summary(summary: &PriceSummary) -> Self {
        Self {
            fee_rate: summary.fee_rate,
            subtotal: summary.subtotal_display(),
            fee: summary.fee_display(),
            total: summary.total_display(),
        }
    }

    /// Notice built from the fee-less summary, before the surcharged one exists
    pub fn preview(base: &PriceSummary, fee_rate: Decimal) -> Self {
        let fee = base.subtotal.saturating_mul(fee_rate);
        Self {
            fee_rate,
            subtotal: base.subtotal_display(),
            fee: format_money(fee),
            total: format_money(base.subtotal.saturating_add(fee)),
        }
    }

    /// e.g. "3%"
    pub fn rate_percent(&self) -> String {
        format!("{}%", (self.fee_rate * Decimal::ONE_HUNDRED).normalize())
    }
}

/// Mandatory gate before the web card modal
#[async_trait]
pub trait FeeDisclosure: Send + Sync {
    /// Show the surcharge; `true` only if the buyer accepted it
    async fn acknowledge(&self, notice: &FeeNotice) -> Result<bool>;
}

/// Web card-entry form
#[async_trait]
pub trait CardForm: Send + Sync {
    /// Wait for the buyer to submit a card; `None` when the modal was closed
    async fn collect(&self, summary: &PriceSummary) -> Result<Option<CardDetails>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ItemRef, LineItem};
    use crate::pricing::{DEFAULT_FEE_RATE, PriceAggregator};
    use rust_decimal_macros::dec;

    #[test]
    fn test_fee_notice_text() {
        let items = vec![LineItem::new(ItemRef::Service("bs".into()), dec!(10), 2, "b")];
        let summary = PriceAggregator::compute_summary(&items, DEFAULT_FEE_RATE, true).unwrap();
        let notice = FeeNotice::from_summary(&summary);

        assert_eq!(notice.rate_percent(), "3%");
        assert_eq!(notice.fee, "0.60");
        assert_eq!(notice.total, "20.60");

        let base = PriceAggregator::compute_summary(&items, DEFAULT_FEE_RATE, false).unwrap();
        assert_eq!(FeeNotice::preview(&base, DEFAULT_FEE_RATE), notice);
    }
}
