//! Integration events published by the contexts.

use serde::{Deserialize, Serialize};

use crate::ids::{CustomerId, OrderId, SkuId};
use crate::request::RequestId;
use crate::values::LineItem;

/// An order was accepted by the sales context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderPlaced {
    pub order_id: OrderId,
    pub customer_id: CustomerId,
    pub line_items: Vec<LineItem>,
}

/// Stock was set aside for an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockReserved {
    pub order_id: OrderId,
    pub sku_id: SkuId,
    pub request_id: RequestId,
    pub quantity: u32,
}

/// Why a reservation could not be satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReservationFailureReason {
    UnknownSku,
    InsufficientStock,
}

impl ReservationFailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationFailureReason::UnknownSku => "UnknownSku",
            ReservationFailureReason::InsufficientStock => "InsufficientStock",
        }
    }
}

impl std::fmt::Display for ReservationFailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A reservation was refused. A business outcome, not an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockReservationFailed {
    pub order_id: OrderId,
    pub sku_id: SkuId,
    pub request_id: RequestId,
    pub quantity: u32,
    pub reason: ReservationFailureReason,
}

/// Previously reserved stock went back to the available pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockReleased {
    pub order_id: OrderId,
    pub sku_id: SkuId,
    pub request_id: RequestId,
    pub quantity: u32,
}

/// An order was cancelled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderCancelled {
    pub order_id: OrderId,
    pub request_id: RequestId,
    pub reason: String,
    #[serde(default)]
    pub timed_out: bool,
}

/// Result of handling a `ReserveStock` command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReservationOutcome {
    Reserved(StockReserved),
    Failed(StockReservationFailed),
}

impl ReservationOutcome {
    pub fn is_reserved(&self) -> bool {
        matches!(self, ReservationOutcome::Reserved(_))
    }

    pub fn into_event(self) -> IntegrationEvent {
        match self {
            ReservationOutcome::Reserved(event) => IntegrationEvent::StockReserved(event),
            ReservationOutcome::Failed(event) => IntegrationEvent::StockReservationFailed(event),
        }
    }
}

/// Closed set of events crossing the context boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum IntegrationEvent {
    OrderPlaced(OrderPlaced),
    StockReserved(StockReserved),
    StockReservationFailed(StockReservationFailed),
    StockReleased(StockReleased),
    OrderCancelled(OrderCancelled),
}

impl IntegrationEvent {
    /// Correlation key. Every integration event belongs to exactly one order.
    pub fn order_id(&self) -> OrderId {
        match self {
            IntegrationEvent::OrderPlaced(e) => e.order_id,
            IntegrationEvent::StockReserved(e) => e.order_id,
            IntegrationEvent::StockReservationFailed(e) => e.order_id,
            IntegrationEvent::StockReleased(e) => e.order_id,
            IntegrationEvent::OrderCancelled(e) => e.order_id,
        }
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            IntegrationEvent::OrderPlaced(_) => "OrderPlaced",
            IntegrationEvent::StockReserved(_) => "StockReserved",
            IntegrationEvent::StockReservationFailed(_) => "StockReservationFailed",
            IntegrationEvent::StockReleased(_) => "StockReleased",
            IntegrationEvent::OrderCancelled(_) => "OrderCancelled",
        }
    }
}
