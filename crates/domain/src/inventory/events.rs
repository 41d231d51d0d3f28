//! Stock ledger events.

use chrono::{DateTime, Utc};
use contracts::{OrderId, RequestId, ReservationFailureReason, SkuId};
use serde::{Deserialize, Serialize};

use crate::aggregate::DomainEvent;

/// Events recorded in a SKU's ledger stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum InventoryEvent {
    /// The SKU was added to the catalog with an initial quantity.
    LedgerOpened(LedgerOpenedData),

    StockReserved(StockReservedData),

    /// A reservation was refused. Recorded so that a replayed request gets
    /// the same answer.
    StockReservationFailed(StockReservationFailedData),

    StockReleased(StockReleasedData),
}

impl DomainEvent for InventoryEvent {
    fn event_type(&self) -> &'static str {
        match self {
            InventoryEvent::LedgerOpened(_) => "LedgerOpened",
            InventoryEvent::StockReserved(_) => "StockReserved",
            InventoryEvent::StockReservationFailed(_) => "StockReservationFailed",
            InventoryEvent::StockReleased(_) => "StockReleased",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerOpenedData {
    pub sku_id: SkuId,
    pub initial_quantity: u32,
    pub opened_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StockReservedData {
    pub sku_id: SkuId,
    pub order_id: OrderId,
    pub request_id: RequestId,
    pub quantity: u32,
    pub reserved_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StockReservationFailedData {
    pub sku_id: SkuId,
    pub order_id: OrderId,
    pub request_id: RequestId,
    pub quantity: u32,
    pub reason: ReservationFailureReason,
    pub failed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StockReleasedData {
    pub sku_id: SkuId,
    pub order_id: OrderId,
    /// Idempotency key of the release itself.
    pub request_id: RequestId,
    /// The reservation being undone.
    pub reservation_request_id: RequestId,
    pub quantity: u32,
    pub released_at: DateTime<Utc>,
}
