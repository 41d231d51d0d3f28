//! Order service providing the sales context's API.

use contracts::{CancelOrder, IntegrationEvent, OrderCancelled, OrderId, OrderPlaced, PlaceOrder};
use event_store::{EventEnvelope, EventStore};

use crate::command::{CommandHandler, CommandResult};
use crate::error::DomainError;

use super::{Order, OrderError, OrderStatus};

/// Service for managing orders.
///
/// Wraps the command handler and translates aggregate results into the
/// integration events the other context consumes.
pub struct OrderService<S: EventStore> {
    handler: CommandHandler<S, Order>,
}

impl<S: EventStore> OrderService<S> {
    pub fn new(store: S) -> Self {
        Self {
            handler: CommandHandler::new(store),
        }
    }

    pub fn handler(&self) -> &CommandHandler<S, Order> {
        &self.handler
    }

    /// Places a new order and returns the event to publish.
    #[tracing::instrument(skip(self, cmd), fields(order_id = %cmd.order_id))]
    pub async fn place_order(&self, cmd: PlaceOrder) -> Result<OrderPlaced, DomainError> {
        self.handler.handle(&cmd, |order| order.place(&cmd)).await?;

        metrics::counter!("orders_placed_total").increment(1);
        tracing::info!(customer_id = %cmd.customer_id, lines = cmd.line_items.len(), "order placed");

        Ok(OrderPlaced {
            order_id: cmd.order_id,
            customer_id: cmd.customer_id,
            line_items: cmd.line_items,
        })
    }

    /// Cancels an order.
    ///
    /// A redelivered cancel with the same request ID returns the original
    /// outcome without recording anything.
    #[tracing::instrument(skip(self, cmd), fields(order_id = %cmd.order_id, request_id = %cmd.request_id))]
    pub async fn cancel_order(&self, cmd: &CancelOrder) -> Result<OrderCancelled, DomainError> {
        let result = self.handler.handle(cmd, |order| order.cancel(cmd)).await?;

        if result.events.is_empty() {
            tracing::debug!("cancel replay, returning prior outcome");
        } else {
            metrics::counter!("orders_cancelled_total").increment(1);
            tracing::info!(reason = %cmd.reason, timed_out = cmd.timed_out, "order cancelled");
        }

        result.aggregate.cancelled_event().ok_or_else(|| {
            OrderError::InvalidStateTransition {
                current: result.aggregate.status(),
                action: "cancel",
            }
            .into()
        })
    }

    /// Applies a stock outcome to the order it belongs to.
    ///
    /// Returns the order's status afterwards, or None when the event is not a
    /// stock outcome.
    #[tracing::instrument(skip(self, event), fields(order_id = %event.order_id(), event_type = event.event_type()))]
    pub async fn record_stock_outcome(
        &self,
        event: &IntegrationEvent,
    ) -> Result<Option<OrderStatus>, DomainError> {
        if !matches!(
            event,
            IntegrationEvent::StockReserved(_) | IntegrationEvent::StockReservationFailed(_)
        ) {
            return Ok(None);
        }

        let result: CommandResult<Order> = self
            .handler
            .execute(event.order_id().stream_id(), |order| {
                order.record_stock_outcome(event)
            })
            .await?;

        let status = result.aggregate.status();
        if status == OrderStatus::Confirmed && !result.events.is_empty() {
            tracing::info!("order confirmed");
        }

        Ok(Some(status))
    }

    /// Loads an order by ID. Returns None if the order doesn't exist.
    pub async fn get_order(&self, order_id: OrderId) -> Result<Option<Order>, DomainError> {
        self.handler.load_existing(order_id.stream_id()).await
    }

    /// Raw event history of an order, oldest first.
    pub async fn history(&self, order_id: OrderId) -> Result<Vec<EventEnvelope>, DomainError> {
        Ok(self.handler.store().load(order_id.stream_id()).await?)
    }
}
