//! Startup: catalog seeding, saga recovery and orphaned order pickup.

use contracts::{IntegrationEvent, OrderPlaced, SagaId, SkuId};
use domain::{Aggregate, DomainError, InventoryError, Order, OrderEvent, OrderStatus};
use event_store::EventStore;
use saga::RecoveryReport;

use crate::AppState;
use crate::error::ServiceError;
use crate::router::RouterMessage;

/// What startup found and did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BootstrapReport {
    /// Ledgers opened by this start. Already open ledgers are left alone.
    pub seeded: usize,
    pub recovery: RecoveryReport,
    /// Pending orders whose saga never started, published again.
    pub republished: usize,
}

/// Brings a freshly built service up to date with its event store.
///
/// Runs before the router workers start; republished orders sit in the
/// router queues until then.
#[tracing::instrument(skip_all)]
pub async fn bootstrap<S>(
    state: &AppState<S>,
    seed_stock: &[(SkuId, u32)],
) -> Result<BootstrapReport, ServiceError>
where
    S: EventStore + Clone + 'static,
{
    let seeded = seed_catalog(state, seed_stock).await?;
    let recovery = state.sagas.recover().await?;
    let republished = republish_orphaned_orders(state).await?;
    state.processor.run_catch_up().await?;

    tracing::info!(seeded, republished, "bootstrap complete");
    Ok(BootstrapReport {
        seeded,
        recovery,
        republished,
    })
}

async fn seed_catalog<S>(
    state: &AppState<S>,
    seed_stock: &[(SkuId, u32)],
) -> Result<usize, ServiceError>
where
    S: EventStore + Clone + 'static,
{
    let mut seeded = 0;
    for (sku_id, quantity) in seed_stock {
        match state.inventory.open_ledger(sku_id.clone(), *quantity).await {
            Ok(_) => seeded += 1,
            Err(DomainError::Inventory(InventoryError::LedgerAlreadyOpen(_))) => {
                tracing::debug!(%sku_id, "ledger already open, seed skipped");
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(seeded)
}

/// An order accepted right before a crash may never have reached the saga.
async fn republish_orphaned_orders<S>(state: &AppState<S>) -> Result<usize, ServiceError>
where
    S: EventStore + Clone + 'static,
{
    let placed = state.store.get_events_by_type("OrderPlaced").await?;
    let mut republished = 0;

    for envelope in placed
        .iter()
        .filter(|e| e.aggregate_type == Order::aggregate_type())
    {
        let OrderEvent::OrderPlaced(data) = envelope.decode::<OrderEvent>()? else {
            continue;
        };
        if state.sagas.get_saga(SagaId::from(data.order_id)).await?.is_some() {
            continue;
        }
        let still_pending = state
            .orders
            .get_order(data.order_id)
            .await?
            .is_some_and(|order| order.status() == OrderStatus::Pending);
        if !still_pending {
            continue;
        }

        tracing::warn!(order_id = %data.order_id, "order has no saga, publishing it again");
        let event = IntegrationEvent::OrderPlaced(OrderPlaced {
            order_id: data.order_id,
            customer_id: data.customer_id,
            line_items: data.line_items,
        });
        if state.publisher.publish(RouterMessage::Event(event)) {
            republished += 1;
        }
    }

    Ok(republished)
}
