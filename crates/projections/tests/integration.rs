//! Integration tests: orders driven through the saga, then read back from
//! every view.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use contracts::{Command, IntegrationEvent, LineItem, Money, OrderId, PlaceOrder, SagaId, SkuId};
use domain::{InventoryService, OrderService};
use event_store::InMemoryEventStore;
use projections::{
    OrderStatusView, OrderViewStatus, ProjectionProcessor, SagaMonitorView, StockLevelsView,
};
use saga::{CommandBus, DispatchError, ManualClock, OrderSagaManager, SagaConfig, SagaState};

struct DirectBus {
    orders: OrderService<InMemoryEventStore>,
    inventory: InventoryService<InMemoryEventStore>,
    outbox: Mutex<VecDeque<IntegrationEvent>>,
}

#[async_trait]
impl CommandBus for DirectBus {
    async fn dispatch(&self, command: Command) -> Result<(), DispatchError> {
        let event = match command {
            Command::ReserveStock(cmd) => self
                .inventory
                .reserve_stock(&cmd)
                .await
                .map(|outcome| outcome.into_event()),
            Command::ReleaseStock(cmd) => self
                .inventory
                .release_stock(&cmd)
                .await
                .map(IntegrationEvent::StockReleased),
            Command::CancelOrder(cmd) => self
                .orders
                .cancel_order(&cmd)
                .await
                .map(IntegrationEvent::OrderCancelled),
        }
        .map_err(|err| DispatchError::Rejected(err.to_string()))?;
        self.outbox.lock().unwrap().push_back(event);
        Ok(())
    }
}

struct System {
    bus: Arc<DirectBus>,
    manager: OrderSagaManager<InMemoryEventStore, Arc<DirectBus>>,
    processor: ProjectionProcessor<InMemoryEventStore>,
    orders: OrderStatusView,
    sagas: SagaMonitorView,
    stock: StockLevelsView,
}

impl System {
    async fn new(stock: &[(&str, u32)]) -> Self {
        let store = InMemoryEventStore::new();
        let bus = Arc::new(DirectBus {
            orders: OrderService::new(store.clone()),
            inventory: InventoryService::new(store.clone()),
            outbox: Mutex::new(VecDeque::new()),
        });
        for (sku, quantity) in stock {
            bus.inventory
                .open_ledger(SkuId::new(*sku), *quantity)
                .await
                .unwrap();
        }

        let manager = OrderSagaManager::new(
            store.clone(),
            Arc::clone(&bus),
            Arc::new(ManualClock::default()),
            SagaConfig::default(),
        );

        let orders = OrderStatusView::new();
        let sagas = SagaMonitorView::new();
        let stock = StockLevelsView::new();
        let mut processor = ProjectionProcessor::new(store);
        processor.register(Arc::new(orders.clone()));
        processor.register(Arc::new(sagas.clone()));
        processor.register(Arc::new(stock.clone()));

        Self {
            bus,
            manager,
            processor,
            orders,
            sagas,
            stock,
        }
    }

    async fn place(&self, lines: &[(&str, u32)]) -> OrderId {
        let items = lines
            .iter()
            .map(|(sku, qty)| LineItem::new(*sku, *qty, Money::from_cents(1500)))
            .collect();
        let placed = self
            .bus
            .orders
            .place_order(PlaceOrder::new("CUST-042", items))
            .await
            .unwrap();
        let order_id = placed.order_id;

        let mut next = Some(IntegrationEvent::OrderPlaced(placed));
        while let Some(event) = next {
            self.bus.orders.record_stock_outcome(&event).await.unwrap();
            let state = self.manager.handle_event(&event).await.unwrap();
            if state == Some(SagaState::Compensating) {
                self.manager
                    .compensate(SagaId::from(event.order_id()))
                    .await
                    .unwrap();
            }
            next = self.bus.outbox.lock().unwrap().pop_front();
        }
        order_id
    }
}

#[tokio::test]
async fn test_confirmed_order_across_all_views() {
    let system = System::new(&[("IPHONE17", 10)]).await;

    let order_id = system.place(&[("IPHONE17", 3)]).await;
    system.processor.run_catch_up().await.unwrap();

    let order = system.orders.get_order(order_id).await.unwrap();
    assert_eq!(order.status, OrderViewStatus::Confirmed);
    assert_eq!(order.total_amount, Money::from_cents(4500));

    let saga = system.sagas.get_saga(SagaId::from(order_id)).await.unwrap();
    assert_eq!(saga.state, SagaState::Completed);
    assert_eq!(saga.reserved_lines, 1);

    let level = system.stock.get(&SkuId::new("IPHONE17")).await.unwrap();
    assert_eq!((level.available, level.reserved), (7, 3));
}

#[tokio::test]
async fn test_sold_out_order_across_all_views() {
    let system = System::new(&[("IPHONE17", 10), ("IPHONE17_SOLDOUT", 0)]).await;

    let order_id = system
        .place(&[("IPHONE17", 1), ("IPHONE17_SOLDOUT", 1)])
        .await;
    system.processor.run_catch_up().await.unwrap();

    let order = system.orders.get_order(order_id).await.unwrap();
    assert_eq!(order.status, OrderViewStatus::Cancelled);
    assert!(order.rejected_skus.contains(&SkuId::new("IPHONE17_SOLDOUT")));
    assert!(
        order
            .cancellation_reason
            .unwrap()
            .contains("InsufficientStock")
    );

    let saga = system.sagas.get_saga(SagaId::from(order_id)).await.unwrap();
    assert_eq!(saga.state, SagaState::Compensated);
    assert_eq!(saga.reserved_lines, 0);

    let level = system.stock.get(&SkuId::new("IPHONE17")).await.unwrap();
    assert_eq!((level.available, level.reserved), (10, 0));
}

#[tokio::test]
async fn test_incremental_catch_up_and_rebuild_agree() {
    let system = System::new(&[("A", 5)]).await;

    system.place(&[("A", 1)]).await;
    system.processor.run_catch_up().await.unwrap();
    system.place(&[("A", 2)]).await;
    system.processor.run_catch_up().await.unwrap();

    let incremental = system.stock.get(&SkuId::new("A")).await.unwrap();
    let confirmed = system
        .orders
        .orders_by_status(OrderViewStatus::Confirmed)
        .await
        .len();

    system.processor.rebuild_all().await.unwrap();

    let rebuilt = system.stock.get(&SkuId::new("A")).await.unwrap();
    assert_eq!(incremental.available, rebuilt.available);
    assert_eq!(rebuilt.available, 2);
    assert_eq!(
        system
            .orders
            .orders_by_status(OrderViewStatus::Confirmed)
            .await
            .len(),
        confirmed
    );
    assert_eq!(confirmed, 2);
    assert!(system.sagas.failed_sagas().await.is_empty());
}
