//! Order domain events.

use chrono::{DateTime, Utc};
use contracts::{CustomerId, LineItem, OrderId, RequestId, ReservationFailureReason, SkuId};
use serde::{Deserialize, Serialize};

use crate::aggregate::DomainEvent;

/// Events that can occur on an order aggregate.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum OrderEvent {
    /// Order was accepted.
    OrderPlaced(OrderPlacedData),

    /// Stock for one SKU was reserved by the inventory context.
    StockLineReserved(StockLineData),

    /// Stock for one SKU was refused by the inventory context.
    StockLineRejected(StockLineRejectedData),

    /// Every line has stock reserved.
    OrderConfirmed(OrderConfirmedData),

    /// Order was cancelled.
    OrderCancelled(OrderCancelledData),
}

impl DomainEvent for OrderEvent {
    fn event_type(&self) -> &'static str {
        match self {
            OrderEvent::OrderPlaced(_) => "OrderPlaced",
            OrderEvent::StockLineReserved(_) => "StockLineReserved",
            OrderEvent::StockLineRejected(_) => "StockLineRejected",
            OrderEvent::OrderConfirmed(_) => "OrderConfirmed",
            OrderEvent::OrderCancelled(_) => "OrderCancelled",
        }
    }
}

/// Data for OrderPlaced event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderPlacedData {
    pub order_id: OrderId,
    pub customer_id: CustomerId,
    pub line_items: Vec<LineItem>,
    pub placed_at: DateTime<Utc>,
}

/// Data for StockLineReserved event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StockLineData {
    pub sku_id: SkuId,
    pub request_id: RequestId,
    pub recorded_at: DateTime<Utc>,
}

/// Data for StockLineRejected event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StockLineRejectedData {
    pub sku_id: SkuId,
    pub request_id: RequestId,
    pub reason: ReservationFailureReason,
    pub recorded_at: DateTime<Utc>,
}

/// Data for OrderConfirmed event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderConfirmedData {
    pub confirmed_at: DateTime<Utc>,
}

/// Data for OrderCancelled event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderCancelledData {
    /// Idempotency key of the cancel request that produced this event.
    pub request_id: RequestId,

    pub reason: String,

    /// Set when the cancellation came from the reservation deadline.
    #[serde(default)]
    pub timed_out: bool,

    pub cancelled_at: DateTime<Utc>,
}

// Convenience constructors for events
impl OrderEvent {
    pub fn order_placed(
        order_id: OrderId,
        customer_id: CustomerId,
        line_items: Vec<LineItem>,
    ) -> Self {
        OrderEvent::OrderPlaced(OrderPlacedData {
            order_id,
            customer_id,
            line_items,
            placed_at: Utc::now(),
        })
    }

    pub fn stock_line_reserved(sku_id: SkuId, request_id: RequestId) -> Self {
        OrderEvent::StockLineReserved(StockLineData {
            sku_id,
            request_id,
            recorded_at: Utc::now(),
        })
    }

    pub fn stock_line_rejected(
        sku_id: SkuId,
        request_id: RequestId,
        reason: ReservationFailureReason,
    ) -> Self {
        OrderEvent::StockLineRejected(StockLineRejectedData {
            sku_id,
            request_id,
            reason,
            recorded_at: Utc::now(),
        })
    }

    pub fn order_confirmed() -> Self {
        OrderEvent::OrderConfirmed(OrderConfirmedData {
            confirmed_at: Utc::now(),
        })
    }

    pub fn order_cancelled(request_id: RequestId, reason: impl Into<String>, timed_out: bool) -> Self {
        OrderEvent::OrderCancelled(OrderCancelledData {
            request_id,
            reason: reason.into(),
            timed_out,
            cancelled_at: Utc::now(),
        })
    }
}
