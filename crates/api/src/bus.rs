//! In-process command bus between the saga and the two contexts.

use std::sync::Arc;

use async_trait::async_trait;
use contracts::{Command, IntegrationEvent};
use domain::{DomainError, InventoryService, OrderService};
use event_store::EventStore;
use saga::{CommandBus, DispatchError};

use crate::router::{EventPublisher, RouterMessage};

/// Delivers saga commands to the owning service and publishes the outcome.
///
/// Outcomes are queued on the router rather than handled inline: the saga
/// that issued the command still holds its lock while dispatching.
pub struct InProcessCommandBus<S: EventStore> {
    orders: Arc<OrderService<S>>,
    inventory: Arc<InventoryService<S>>,
    publisher: EventPublisher,
}

impl<S: EventStore> InProcessCommandBus<S> {
    pub fn new(
        orders: Arc<OrderService<S>>,
        inventory: Arc<InventoryService<S>>,
        publisher: EventPublisher,
    ) -> Self {
        Self {
            orders,
            inventory,
            publisher,
        }
    }

    async fn execute(&self, command: Command) -> Result<IntegrationEvent, DomainError> {
        match command {
            Command::ReserveStock(cmd) => {
                Ok(self.inventory.reserve_stock(&cmd).await?.into_event())
            }
            Command::ReleaseStock(cmd) => Ok(IntegrationEvent::StockReleased(
                self.inventory.release_stock(&cmd).await?,
            )),
            Command::CancelOrder(cmd) => Ok(IntegrationEvent::OrderCancelled(
                self.orders.cancel_order(&cmd).await?,
            )),
        }
    }
}

#[async_trait]
impl<S: EventStore> CommandBus for InProcessCommandBus<S> {
    async fn dispatch(&self, command: Command) -> Result<(), DispatchError> {
        let name = command.name();
        let event = self.execute(command).await.map_err(|err| {
            metrics::counter!("command_bus_failures_total", "command" => name).increment(1);
            if err.is_transient() {
                DispatchError::Transient(err.to_string())
            } else {
                DispatchError::Rejected(err.to_string())
            }
        })?;

        if !self.publisher.publish(RouterMessage::Event(event)) {
            return Err(DispatchError::Transient(
                "event router is shut down".to_string(),
            ));
        }
        Ok(())
    }
}
