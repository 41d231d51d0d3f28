//! Value objects carried inside commands and events.

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::ids::SkuId;

/// Monetary amount in minor units (cents) to avoid floating point issues.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Money(i64);

impl Money {
    pub fn from_cents(cents: i64) -> Self {
        Self(cents)
    }

    pub fn zero() -> Self {
        Self(0)
    }

    pub fn cents(&self) -> i64 {
        self.0
    }

    pub fn is_negative(&self) -> bool {
        self.0 < 0
    }

    /// Multiplies by a quantity, saturating on overflow.
    pub fn multiply(&self, quantity: u32) -> Money {
        Money(self.0.saturating_mul(i64::from(quantity)))
    }
}

impl std::fmt::Display for Money {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{sign}{}.{:02}", abs / 100, abs % 100)
    }
}

impl std::ops::Add for Money {
    type Output = Money;

    fn add(self, rhs: Self) -> Self::Output {
        Money(self.0.saturating_add(rhs.0))
    }
}

impl std::iter::Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Self {
        iter.fold(Money::zero(), |acc, m| acc + m)
    }
}

/// One line of an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    pub sku_id: SkuId,
    pub quantity: u32,
    pub unit_price: Money,
}

impl LineItem {
    pub fn new(sku_id: impl Into<SkuId>, quantity: u32, unit_price: Money) -> Self {
        Self {
            sku_id: sku_id.into(),
            quantity,
            unit_price,
        }
    }

    pub fn line_total(&self) -> Money {
        self.unit_price.multiply(self.quantity)
    }
}

/// Collapses line items to one `(sku, quantity)` pair per SKU.
///
/// An order listing the same SKU twice must reserve it once, otherwise two
/// requests for the same ledger would race within a single order.
/// Preserves first-seen order. Fails if a SKU's summed quantity does not
/// fit in a `u32`.
pub fn coalesce_line_items(line_items: &[LineItem]) -> Result<Vec<(SkuId, u32)>, ValidationError> {
    let mut coalesced: Vec<(SkuId, u32)> = Vec::with_capacity(line_items.len());
    for item in line_items {
        match coalesced.iter_mut().find(|(sku, _)| *sku == item.sku_id) {
            Some((_, quantity)) => {
                *quantity = quantity.checked_add(item.quantity).ok_or_else(|| {
                    ValidationError::QuantityOverflow {
                        sku_id: item.sku_id.clone(),
                    }
                })?;
            }
            None => coalesced.push((item.sku_id.clone(), item.quantity)),
        }
    }
    Ok(coalesced)
}
