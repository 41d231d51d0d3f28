//! Order status read model: one summary per order, as customers see it.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use contracts::{AggregateId, CustomerId, LineItem, Money, OrderId, SkuId};
use domain::{Aggregate, Order, OrderEvent};
use event_store::EventEnvelope;
use serde::Serialize;
use tokio::sync::RwLock;

use crate::Result;
use crate::projection::{Projection, ProjectionPosition};
use crate::read_model::ReadModel;

/// Status shown for an order. A cancellation caused by the reservation
/// deadline is told apart from other cancellations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderViewStatus {
    Pending,
    AwaitingInventory,
    Confirmed,
    Cancelled,
    CancelledTimeout,
}

#[derive(Debug, Clone, Serialize)]
pub struct OrderSummary {
    pub order_id: OrderId,
    pub customer_id: CustomerId,
    pub line_items: Vec<LineItem>,
    pub total_amount: Money,
    pub status: OrderViewStatus,
    pub reserved_skus: BTreeSet<SkuId>,
    pub rejected_skus: BTreeSet<SkuId>,
    pub cancellation_reason: Option<String>,
    pub placed_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

struct OrderStatusState {
    orders: HashMap<OrderId, OrderSummary>,
    /// Stream ID to order ID.
    streams: HashMap<AggregateId, OrderId>,
    position: ProjectionPosition,
}

/// Read model view of every order and its current status.
#[derive(Clone)]
pub struct OrderStatusView {
    state: Arc<RwLock<OrderStatusState>>,
}

impl OrderStatusView {
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(OrderStatusState {
                orders: HashMap::new(),
                streams: HashMap::new(),
                position: ProjectionPosition::zero(),
            })),
        }
    }

    pub async fn get_order(&self, order_id: OrderId) -> Option<OrderSummary> {
        self.state.read().await.orders.get(&order_id).cloned()
    }

    /// Orders in `status`, oldest first.
    pub async fn orders_by_status(&self, status: OrderViewStatus) -> Vec<OrderSummary> {
        let state = self.state.read().await;
        let mut orders: Vec<_> = state
            .orders
            .values()
            .filter(|o| o.status == status)
            .cloned()
            .collect();
        orders.sort_by_key(|o| o.placed_at);
        orders
    }

    pub async fn count_by_status(&self) -> HashMap<OrderViewStatus, usize> {
        let state = self.state.read().await;
        let mut counts = HashMap::new();
        for order in state.orders.values() {
            *counts.entry(order.status).or_insert(0) += 1;
        }
        counts
    }
}

impl Default for OrderStatusView {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Projection for OrderStatusView {
    fn name(&self) -> &'static str {
        "OrderStatusView"
    }

    async fn handle(&self, event: &EventEnvelope) -> Result<()> {
        let mut state = self.state.write().await;
        state.position = state.position.advance_to(event.position);

        if event.aggregate_type != Order::aggregate_type() {
            return Ok(());
        }

        let order_event: OrderEvent = event.decode()?;
        if let OrderEvent::OrderPlaced(data) = order_event {
            state.streams.insert(event.aggregate_id, data.order_id);
            let total_amount = data.line_items.iter().map(LineItem::line_total).sum();
            state.orders.insert(
                data.order_id,
                OrderSummary {
                    order_id: data.order_id,
                    customer_id: data.customer_id,
                    line_items: data.line_items,
                    total_amount,
                    status: OrderViewStatus::Pending,
                    reserved_skus: BTreeSet::new(),
                    rejected_skus: BTreeSet::new(),
                    cancellation_reason: None,
                    placed_at: data.placed_at,
                    updated_at: data.placed_at,
                },
            );
            return Ok(());
        }

        let order = match state.streams.get(&event.aggregate_id).copied() {
            Some(order_id) => state.orders.get_mut(&order_id),
            None => None,
        };
        let Some(order) = order else {
            tracing::warn!(aggregate_id = %event.aggregate_id, "event for unknown order skipped");
            return Ok(());
        };

        match order_event {
            OrderEvent::OrderPlaced(_) => {}
            OrderEvent::StockLineReserved(data) => {
                order.reserved_skus.insert(data.sku_id);
                order.status = OrderViewStatus::AwaitingInventory;
                order.updated_at = data.recorded_at;
            }
            OrderEvent::StockLineRejected(data) => {
                order.rejected_skus.insert(data.sku_id);
                order.status = OrderViewStatus::AwaitingInventory;
                order.updated_at = data.recorded_at;
            }
            OrderEvent::OrderConfirmed(data) => {
                order.status = OrderViewStatus::Confirmed;
                order.updated_at = data.confirmed_at;
            }
            OrderEvent::OrderCancelled(data) => {
                order.status = if data.timed_out {
                    OrderViewStatus::CancelledTimeout
                } else {
                    OrderViewStatus::Cancelled
                };
                order.cancellation_reason = Some(data.reason);
                order.updated_at = data.cancelled_at;
            }
        }

        Ok(())
    }

    async fn position(&self) -> ProjectionPosition {
        self.state.read().await.position
    }

    async fn reset(&self) -> Result<()> {
        let mut state = self.state.write().await;
        state.orders.clear();
        state.streams.clear();
        state.position = ProjectionPosition::zero();
        Ok(())
    }
}

impl ReadModel for OrderStatusView {
    fn name(&self) -> &'static str {
        "OrderStatusView"
    }

    fn count(&self) -> usize {
        // try_read never blocks; a held lock reads as empty
        self.state.try_read().map(|s| s.orders.len()).unwrap_or(0)
    }
}
