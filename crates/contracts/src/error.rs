use thiserror::Error;

use crate::ids::SkuId;

/// A structurally malformed command.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Customer ID is required")]
    BlankCustomer,

    #[error("Order has no line items")]
    EmptyOrder,

    #[error("SKU is required")]
    BlankSku,

    #[error("Invalid quantity {quantity} for SKU {sku_id} (must be greater than 0)")]
    InvalidQuantity { sku_id: SkuId, quantity: u32 },

    #[error("Total quantity for SKU {sku_id} is too large")]
    QuantityOverflow { sku_id: SkuId },

    #[error("Invalid unit price {cents} for SKU {sku_id} (must not be negative)")]
    NegativePrice { sku_id: SkuId, cents: i64 },
}
