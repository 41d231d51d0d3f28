//! Commands exchanged between the contexts.

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::ids::{CustomerId, OrderId, SkuId};
use crate::request::RequestId;
use crate::values::{LineItem, coalesce_line_items};

/// Place a new order. Handled by the sales context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaceOrder {
    pub order_id: OrderId,
    pub customer_id: CustomerId,
    pub line_items: Vec<LineItem>,
}

impl PlaceOrder {
    /// Creates a command with a fresh order ID.
    pub fn new(customer_id: impl Into<CustomerId>, line_items: Vec<LineItem>) -> Self {
        Self {
            order_id: OrderId::new(),
            customer_id: customer_id.into(),
            line_items,
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.customer_id.is_blank() {
            return Err(ValidationError::BlankCustomer);
        }
        if self.line_items.is_empty() {
            return Err(ValidationError::EmptyOrder);
        }
        for item in &self.line_items {
            validate_sku_quantity(&item.sku_id, item.quantity)?;
            if item.unit_price.is_negative() {
                return Err(ValidationError::NegativePrice {
                    sku_id: item.sku_id.clone(),
                    cents: item.unit_price.cents(),
                });
            }
        }
        coalesce_line_items(&self.line_items)?;
        Ok(())
    }
}

/// Reserve stock for one SKU of an order. Handled by the inventory context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReserveStock {
    pub order_id: OrderId,
    pub request_id: RequestId,
    pub sku_id: SkuId,
    pub quantity: u32,
}

impl ReserveStock {
    /// Builds the request with its deterministic idempotency key.
    pub fn for_order(order_id: OrderId, sku_id: SkuId, quantity: u32) -> Self {
        Self {
            request_id: RequestId::for_reservation(order_id, &sku_id),
            order_id,
            sku_id,
            quantity,
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_sku_quantity(&self.sku_id, self.quantity)
    }
}

/// Return reserved stock to the available pool. Compensation for `ReserveStock`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseStock {
    pub order_id: OrderId,
    pub request_id: RequestId,
    /// Request ID of the reservation being undone.
    pub reservation_request_id: RequestId,
    pub sku_id: SkuId,
    pub quantity: u32,
}

impl ReleaseStock {
    pub fn for_order(order_id: OrderId, sku_id: SkuId, quantity: u32) -> Self {
        Self {
            request_id: RequestId::for_release(order_id, &sku_id),
            reservation_request_id: RequestId::for_reservation(order_id, &sku_id),
            order_id,
            sku_id,
            quantity,
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_sku_quantity(&self.sku_id, self.quantity)
    }
}

/// Cancel an order. Handled by the sales context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelOrder {
    pub order_id: OrderId,
    pub request_id: RequestId,
    pub reason: String,
    /// Set when the cancellation was caused by the reservation deadline.
    #[serde(default)]
    pub timed_out: bool,
}

impl CancelOrder {
    pub fn for_order(order_id: OrderId, reason: impl Into<String>, timed_out: bool) -> Self {
        Self {
            order_id,
            request_id: RequestId::for_cancellation(order_id),
            reason: reason.into(),
            timed_out,
        }
    }
}

fn validate_sku_quantity(sku_id: &SkuId, quantity: u32) -> Result<(), ValidationError> {
    if sku_id.is_blank() {
        return Err(ValidationError::BlankSku);
    }
    if quantity == 0 {
        return Err(ValidationError::InvalidQuantity {
            sku_id: sku_id.clone(),
            quantity,
        });
    }
    Ok(())
}

/// Closed set of commands the saga may issue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum Command {
    ReserveStock(ReserveStock),
    ReleaseStock(ReleaseStock),
    CancelOrder(CancelOrder),
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::ReserveStock(_) => "ReserveStock",
            Command::ReleaseStock(_) => "ReleaseStock",
            Command::CancelOrder(_) => "CancelOrder",
        }
    }

    pub fn order_id(&self) -> OrderId {
        match self {
            Command::ReserveStock(cmd) => cmd.order_id,
            Command::ReleaseStock(cmd) => cmd.order_id,
            Command::CancelOrder(cmd) => cmd.order_id,
        }
    }

    pub fn request_id(&self) -> RequestId {
        match self {
            Command::ReserveStock(cmd) => cmd.request_id,
            Command::ReleaseStock(cmd) => cmd.request_id,
            Command::CancelOrder(cmd) => cmd.request_id,
        }
    }
}

impl From<ReserveStock> for Command {
    fn from(cmd: ReserveStock) -> Self {
        Command::ReserveStock(cmd)
    }
}

impl From<ReleaseStock> for Command {
    fn from(cmd: ReleaseStock) -> Self {
        Command::ReleaseStock(cmd)
    }
}

impl From<CancelOrder> for Command {
    fn from(cmd: CancelOrder) -> Self {
        Command::CancelOrder(cmd)
    }
}
