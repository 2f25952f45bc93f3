//! Price Aggregation
//!
//! Groups line items, totals them and applies the web-path processing fee.
//! Amounts stay exact until they are displayed or sent over the wire.

use std::collections::HashMap;

use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::error::{CheckoutError, Result};
use crate::model::{ItemRef, LineItem};

/// Processing surcharge on the web card-entry path
pub const DEFAULT_FEE_RATE: Decimal = dec!(0.03);

/// Currency precision
pub const MONEY_SCALE: u32 = 2;

/// Round to currency precision, half away from zero
pub fn round_money(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(MONEY_SCALE, RoundingStrategy::MidpointAwayFromZero)
}

/// Decimal string as sent to the backend, e.g. `"20.60"`
pub fn format_money(amount: Decimal) -> String {
    format!("{:.2}", round_money(amount))
}

/// Items sharing an underlying item, merged
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GroupedLine {
    pub item: ItemRef,
    pub unit_cost: Decimal,
    pub unit_bounty: Decimal,
    pub quantity: u32,
    pub owner_id: String,
    pub recommender_id: Option<String>,

    /// unit_cost × summed quantity, unrounded
    pub line_total: Decimal,
}

/// An item left out of pricing, and why
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedItem {
    pub item_id: String,
    pub reason: String,
}

/// Totals for one checkout
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PriceSummary {
    pub lines: Vec<GroupedLine>,
    pub subtotal: Decimal,
    pub fee_rate: Decimal,
    pub fee: Decimal,
    pub total: Decimal,
    #[serde(default)]
    pub skipped: Vec<SkippedItem>,
}

impl PriceSummary {
    /// A summary with nothing to charge
    pub fn empty() -> Self {
        Self {
            lines: Vec::new(),
            subtotal: Decimal::ZERO,
            fee_rate: Decimal::ZERO,
            fee: Decimal::ZERO,
            total: Decimal::ZERO,
            skipped: Vec::new(),
        }
    }

    pub fn subtotal_display(&self) -> String {
        format_money(self.subtotal)
    }

    pub fn fee_display(&self) -> String {
        format_money(self.fee)
    }

    pub fn total_display(&self) -> String {
        format_money(self.total)
    }

    /// Whether any money would be charged
    pub fn is_chargeable(&self) -> bool {
        round_money(self.total) > Decimal::ZERO
    }

    pub fn total_quantity(&self) -> u32 {
        self.lines.iter().fold(0, |acc, l| acc.saturating_add(l.quantity))
    }
}

/// Stateless price computation
pub struct PriceAggregator;

impl PriceAggregator {
    /// Group, total and (optionally) surcharge a set of line items
    ///
    /// Items with invalid amounts are excluded and listed in `skipped`. Fails
    /// with `InvalidAmount` only when items were given and none were usable.
    pub fn compute_summary(items: &[LineItem], fee_rate: Decimal, apply_fee: bool) -> Result<PriceSummary> {
        if fee_rate.is_sign_negative() {
            return Err(CheckoutError::Config(format!("negative fee rate {fee_rate}")));
        }

        let mut lines: Vec<GroupedLine> = Vec::new();
        let mut index: HashMap<&ItemRef, usize> = HashMap::new();
        let mut skipped = Vec::new();

        for item in items {
            if let Err(reason) = item.validate() {
                skip(&mut skipped, item.item.id(), reason);
                continue;
            }

            match index.get(&item.item) {
                Some(&i) if lines[i].unit_cost != item.unit_cost => {
                    let reason = format!(
                        "unit cost {} differs from {} on an earlier entry",
                        item.unit_cost, lines[i].unit_cost
                    );
                    skip(&mut skipped, item.item.id(), reason);
                }
                Some(&i) => match lines[i].quantity.checked_add(item.quantity) {
                    Some(quantity) => lines[i].quantity = quantity,
                    None => skip(&mut skipped, item.item.id(), "quantity overflows".into()),
                },
                None => {
                    index.insert(&item.item, lines.len());
                    lines.push(GroupedLine {
                        item: item.item.clone(),
                        unit_cost: item.unit_cost,
                        unit_bounty: item.unit_bounty,
                        quantity: item.quantity,
                        owner_id: item.owner_id.clone(),
                        recommender_id: item.recommender_id.clone(),
                        line_total: Decimal::ZERO,
                    });
                }
            }
        }

        // Line totals only after grouping, so repeated adds combine instead of double-counting
        let mut subtotal = Decimal::ZERO;
        lines.retain_mut(|line| {
            let total = line
                .unit_cost
                .checked_mul(Decimal::from(line.quantity))
                .and_then(|total| subtotal.checked_add(total).map(|sum| (total, sum)));
            match total {
                Some((line_total, sum)) => {
                    line.line_total = line_total;
                    subtotal = sum;
                    true
                }
                None => {
                    skip(&mut skipped, line.item.id(), "amount overflows".into());
                    false
                }
            }
        });

        if lines.is_empty() && !skipped.is_empty() {
            return Err(CheckoutError::InvalidAmount {
                item_ids: skipped.into_iter().map(|s| s.item_id).collect(),
            });
        }

        let (fee_rate, fee) = if apply_fee {
            (fee_rate, subtotal.checked_mul(fee_rate))
        } else {
            (Decimal::ZERO, Some(Decimal::ZERO))
        };
        let Some((fee, total)) = fee.and_then(|fee| subtotal.checked_add(fee).map(|total| (fee, total))) else {
            return Err(CheckoutError::InvalidAmount {
                item_ids: lines.iter().map(|l| l.item.id().to_string()).collect(),
            });
        };

        Ok(PriceSummary {
            lines,
            subtotal,
            fee_rate,
            fee,
            total,
            skipped,
        })
    }
}

fn skip(skipped: &mut Vec<SkippedItem>, item_id: &str, reason: String) {
    tracing::warn!(item_id, %reason, "Skipping line item");
    skipped.push(SkippedItem {
        item_id: item_id.to_string(),
        reason,
    });
}
