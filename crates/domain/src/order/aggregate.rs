//! Order aggregate implementation.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use contracts::{
    AggregateId, CancelOrder, CustomerId, IntegrationEvent, LineItem, Money, OrderCancelled,
    OrderId, PlaceOrder, RequestId, ReservationFailureReason, SkuId,
};
use event_store::Version;
use serde::{Deserialize, Serialize};

use crate::aggregate::Aggregate;

use super::{
    OrderError, OrderEvent, OrderStatus,
    events::{OrderCancelledData, OrderPlacedData},
};

/// How an order was cancelled. Kept so a redelivered cancel can be answered
/// with the original outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cancellation {
    pub request_id: RequestId,
    pub reason: String,
    pub timed_out: bool,
    pub cancelled_at: DateTime<Utc>,
}

/// Order aggregate root.
///
/// Owns the order lifecycle. Stock outcomes from the inventory context move
/// the status forward but never cause the order to issue commands itself.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Order {
    id: Option<AggregateId>,

    #[serde(default)]
    version: Version,

    order_id: Option<OrderId>,

    customer_id: Option<CustomerId>,

    line_items: Vec<LineItem>,

    status: OrderStatus,

    reserved_skus: BTreeSet<SkuId>,

    rejected_skus: BTreeMap<SkuId, ReservationFailureReason>,

    cancellation: Option<Cancellation>,

    placed_at: Option<DateTime<Utc>>,

    confirmed_at: Option<DateTime<Utc>>,
}

impl Aggregate for Order {
    type Event = OrderEvent;
    type Error = OrderError;

    fn aggregate_type() -> &'static str {
        "Order"
    }

    fn id(&self) -> Option<AggregateId> {
        self.id
    }

    fn version(&self) -> Version {
        self.version
    }

    fn set_version(&mut self, version: Version) {
        self.version = version;
    }

    fn apply(&mut self, event: Self::Event) {
        match event {
            OrderEvent::OrderPlaced(data) => self.apply_order_placed(data),
            OrderEvent::StockLineReserved(data) => {
                self.status = OrderStatus::AwaitingInventory;
                self.reserved_skus.insert(data.sku_id);
            }
            OrderEvent::StockLineRejected(data) => {
                self.status = OrderStatus::AwaitingInventory;
                self.rejected_skus.insert(data.sku_id, data.reason);
            }
            OrderEvent::OrderConfirmed(data) => {
                self.status = OrderStatus::Confirmed;
                self.confirmed_at = Some(data.confirmed_at);
            }
            OrderEvent::OrderCancelled(data) => self.apply_order_cancelled(data),
        }
    }
}

// Query methods
impl Order {
    pub fn order_id(&self) -> Option<OrderId> {
        self.order_id
    }

    pub fn customer_id(&self) -> Option<&CustomerId> {
        self.customer_id.as_ref()
    }

    pub fn line_items(&self) -> &[LineItem] {
        &self.line_items
    }

    pub fn status(&self) -> OrderStatus {
        self.status
    }

    pub fn total_amount(&self) -> Money {
        self.line_items.iter().map(LineItem::line_total).sum()
    }

    /// Distinct SKUs on the order, in first-seen order.
    pub fn skus(&self) -> Vec<&SkuId> {
        let mut seen = BTreeSet::new();
        self.line_items
            .iter()
            .map(|item| &item.sku_id)
            .filter(|sku| seen.insert(*sku))
            .collect()
    }

    pub fn reserved_skus(&self) -> &BTreeSet<SkuId> {
        &self.reserved_skus
    }

    pub fn rejected_skus(&self) -> &BTreeMap<SkuId, ReservationFailureReason> {
        &self.rejected_skus
    }

    pub fn cancellation(&self) -> Option<&Cancellation> {
        self.cancellation.as_ref()
    }

    pub fn placed_at(&self) -> Option<DateTime<Utc>> {
        self.placed_at
    }

    pub fn confirmed_at(&self) -> Option<DateTime<Utc>> {
        self.confirmed_at
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// The cancellation as an integration event, if the order was cancelled.
    pub fn cancelled_event(&self) -> Option<OrderCancelled> {
        let order_id = self.order_id?;
        self.cancellation.as_ref().map(|c| OrderCancelled {
            order_id,
            request_id: c.request_id,
            reason: c.reason.clone(),
            timed_out: c.timed_out,
        })
    }

    fn has_line(&self, sku_id: &SkuId) -> bool {
        self.line_items.iter().any(|item| &item.sku_id == sku_id)
    }
}

// Command methods (return events)
impl Order {
    /// Accepts a new order. The order ID is the idempotency boundary: placing
    /// the same ID twice is rejected.
    pub fn place(&self, cmd: &PlaceOrder) -> Result<Vec<OrderEvent>, OrderError> {
        if self.id.is_some() {
            return Err(OrderError::DuplicateOrder(cmd.order_id));
        }

        cmd.validate()?;

        Ok(vec![OrderEvent::order_placed(
            cmd.order_id,
            cmd.customer_id.clone(),
            cmd.line_items.clone(),
        )])
    }

    /// Applies a stock outcome published by the inventory context.
    ///
    /// Duplicates, outcomes for SKUs not on the order and outcomes arriving
    /// after a terminal status are ignored.
    pub fn record_stock_outcome(
        &self,
        outcome: &IntegrationEvent,
    ) -> Result<Vec<OrderEvent>, OrderError> {
        let order_id = self.order_id.ok_or(OrderError::NotFound(outcome.order_id()))?;
        if !self.status.accepts_stock_outcomes() {
            return Ok(vec![]);
        }

        match outcome {
            IntegrationEvent::StockReserved(e) => {
                if e.order_id != order_id
                    || !self.has_line(&e.sku_id)
                    || self.reserved_skus.contains(&e.sku_id)
                {
                    return Ok(vec![]);
                }

                let mut events = vec![OrderEvent::stock_line_reserved(
                    e.sku_id.clone(),
                    e.request_id,
                )];

                let all_reserved = self
                    .skus()
                    .into_iter()
                    .all(|sku| sku == &e.sku_id || self.reserved_skus.contains(sku));
                if all_reserved && self.rejected_skus.is_empty() {
                    events.push(OrderEvent::order_confirmed());
                }
                Ok(events)
            }
            IntegrationEvent::StockReservationFailed(e) => {
                if e.order_id != order_id
                    || !self.has_line(&e.sku_id)
                    || self.rejected_skus.contains_key(&e.sku_id)
                    || self.reserved_skus.contains(&e.sku_id)
                {
                    return Ok(vec![]);
                }

                Ok(vec![OrderEvent::stock_line_rejected(
                    e.sku_id.clone(),
                    e.request_id,
                    e.reason,
                )])
            }
            _ => Ok(vec![]),
        }
    }

    /// Cancels the order.
    ///
    /// A cancel carrying the request ID that already cancelled the order is a
    /// replay and records nothing.
    pub fn cancel(&self, cmd: &CancelOrder) -> Result<Vec<OrderEvent>, OrderError> {
        if self.id.is_none() {
            return Err(OrderError::NotFound(cmd.order_id));
        }

        if let Some(cancellation) = &self.cancellation
            && cancellation.request_id == cmd.request_id
        {
            return Ok(vec![]);
        }

        if !self.status.can_cancel() {
            return Err(OrderError::InvalidStateTransition {
                current: self.status,
                action: "cancel",
            });
        }

        Ok(vec![OrderEvent::order_cancelled(
            cmd.request_id,
            cmd.reason.clone(),
            cmd.timed_out,
        )])
    }
}

// Apply event helpers
impl Order {
    fn apply_order_placed(&mut self, data: OrderPlacedData) {
        self.id = Some(data.order_id.stream_id());
        self.order_id = Some(data.order_id);
        self.customer_id = Some(data.customer_id);
        self.line_items = data.line_items;
        self.placed_at = Some(data.placed_at);
        self.status = OrderStatus::Pending;
    }

    fn apply_order_cancelled(&mut self, data: OrderCancelledData) {
        self.status = OrderStatus::Cancelled;
        self.cancellation = Some(Cancellation {
            request_id: data.request_id,
            reason: data.reason,
            timed_out: data.timed_out,
            cancelled_at: data.cancelled_at,
        });
    }
}
