//! End-to-end tests for the order saga against both contexts.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::TimeDelta;
use contracts::{
    CancelOrder, Command, IntegrationEvent, LineItem, Money, OrderId, PlaceOrder, RequestId,
    SagaId, SkuId,
};
use domain::{DomainError, InventoryService, OrderService, OrderStatus};
use event_store::{EventStore, InMemoryEventStore};
use saga::{
    CommandBus, CompensationReason, DispatchError, LineStatus, ManualClock, OrderSagaManager,
    RetryPolicy, SagaConfig, SagaEvent, SagaState,
};

#[derive(Debug, Clone, Copy)]
enum Fault {
    /// Accepted by the bus but never delivered.
    Drop,
    Transient,
    Reject,
}

/// Routes commands to the real services and queues their outcome events.
/// Faults can be scripted per command name and SKU.
struct ScriptedBus {
    orders: OrderService<InMemoryEventStore>,
    inventory: InventoryService<InMemoryEventStore>,
    sent: Mutex<Vec<Command>>,
    outbox: Mutex<VecDeque<IntegrationEvent>>,
    faults: Mutex<HashMap<(&'static str, Option<SkuId>), VecDeque<Fault>>>,
}

impl ScriptedBus {
    fn new(store: InMemoryEventStore) -> Self {
        Self {
            orders: OrderService::new(store.clone()),
            inventory: InventoryService::new(store),
            sent: Mutex::new(Vec::new()),
            outbox: Mutex::new(VecDeque::new()),
            faults: Mutex::new(HashMap::new()),
        }
    }

    fn script(&self, command: &'static str, sku: Option<&str>, faults: &[Fault]) {
        self.faults
            .lock()
            .unwrap()
            .entry((command, sku.map(SkuId::new)))
            .or_default()
            .extend(faults.iter().copied());
    }

    fn next_fault(&self, command: &Command) -> Option<Fault> {
        let sku = match command {
            Command::ReserveStock(cmd) => Some(cmd.sku_id.clone()),
            Command::ReleaseStock(cmd) => Some(cmd.sku_id.clone()),
            Command::CancelOrder(_) => None,
        };
        let mut faults = self.faults.lock().unwrap();
        if sku.is_some()
            && let Some(fault) = faults
                .get_mut(&(command.name(), sku))
                .and_then(VecDeque::pop_front)
        {
            return Some(fault);
        }
        faults
            .get_mut(&(command.name(), None))
            .and_then(VecDeque::pop_front)
    }

    fn sent(&self, name: &str) -> Vec<Command> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.name() == name)
            .cloned()
            .collect()
    }

    fn publish(&self, event: IntegrationEvent) {
        self.outbox.lock().unwrap().push_back(event);
    }

    fn next_event(&self) -> Option<IntegrationEvent> {
        self.outbox.lock().unwrap().pop_front()
    }

    async fn deliver(&self, command: Command) -> Result<IntegrationEvent, DomainError> {
        Ok(match command {
            Command::ReserveStock(cmd) => self.inventory.reserve_stock(&cmd).await?.into_event(),
            Command::ReleaseStock(cmd) => {
                IntegrationEvent::StockReleased(self.inventory.release_stock(&cmd).await?)
            }
            Command::CancelOrder(cmd) => {
                IntegrationEvent::OrderCancelled(self.orders.cancel_order(&cmd).await?)
            }
        })
    }
}

#[async_trait]
impl CommandBus for ScriptedBus {
    async fn dispatch(&self, command: Command) -> Result<(), DispatchError> {
        self.sent.lock().unwrap().push(command.clone());

        match self.next_fault(&command) {
            Some(Fault::Drop) => return Ok(()),
            Some(Fault::Transient) => {
                return Err(DispatchError::Transient("connection reset".into()));
            }
            Some(Fault::Reject) => return Err(DispatchError::Rejected("refused".into())),
            None => {}
        }

        match self.deliver(command).await {
            Ok(event) => {
                self.publish(event);
                Ok(())
            }
            Err(err) if err.is_transient() => Err(DispatchError::Transient(err.to_string())),
            Err(err) => Err(DispatchError::Rejected(err.to_string())),
        }
    }
}

type Manager = OrderSagaManager<InMemoryEventStore, Arc<ScriptedBus>>;

struct TestHarness {
    store: InMemoryEventStore,
    bus: Arc<ScriptedBus>,
    clock: Arc<ManualClock>,
    config: SagaConfig,
    manager: Manager,
}

impl TestHarness {
    fn new() -> Self {
        Self::with_config(fast_config())
    }

    fn with_config(config: SagaConfig) -> Self {
        let store = InMemoryEventStore::new();
        let bus = Arc::new(ScriptedBus::new(store.clone()));
        let clock = Arc::new(ManualClock::default());
        let manager = OrderSagaManager::new(
            store.clone(),
            Arc::clone(&bus),
            clock.clone(),
            config.clone(),
        );
        Self {
            store,
            bus,
            clock,
            config,
            manager,
        }
    }

    /// A fresh manager over the same store, as after a process restart.
    fn restart(&mut self) {
        self.manager = OrderSagaManager::new(
            self.store.clone(),
            Arc::clone(&self.bus),
            self.clock.clone(),
            self.config.clone(),
        );
    }

    async fn seed(&self, stock: &[(&str, u32)]) {
        for (sku, quantity) in stock {
            self.bus
                .inventory
                .open_ledger(SkuId::new(*sku), *quantity)
                .await
                .unwrap();
        }
    }

    async fn place(&self, lines: &[(&str, u32)]) -> OrderId {
        let items = lines
            .iter()
            .map(|(sku, quantity)| LineItem::new(*sku, *quantity, Money::from_cents(1000)))
            .collect();
        let placed = self
            .bus
            .orders
            .place_order(PlaceOrder::new("CUST-001", items))
            .await
            .unwrap();
        let order_id = placed.order_id;
        self.bus.publish(IntegrationEvent::OrderPlaced(placed));
        self.pump().await;
        order_id
    }

    /// Delivers queued events until none are left: stock outcomes to the
    /// order first, then every event to the saga. A saga left compensating
    /// has its compensation driven right away.
    async fn pump(&self) {
        while let Some(event) = self.bus.next_event() {
            self.bus.orders.record_stock_outcome(&event).await.unwrap();
            let state = self.manager.handle_event(&event).await.unwrap();
            if state == Some(SagaState::Compensating) {
                self.manager
                    .compensate(SagaId::from(event.order_id()))
                    .await
                    .unwrap();
            }
        }
    }

    /// Places an order and delivers its events without driving
    /// compensation.
    async fn place_without_compensating(&self, lines: &[(&str, u32)]) -> OrderId {
        let items = lines
            .iter()
            .map(|(sku, quantity)| LineItem::new(*sku, *quantity, Money::from_cents(1000)))
            .collect();
        let placed = self
            .bus
            .orders
            .place_order(PlaceOrder::new("CUST-001", items))
            .await
            .unwrap();
        let order_id = placed.order_id;
        self.bus.publish(IntegrationEvent::OrderPlaced(placed));
        while let Some(event) = self.bus.next_event() {
            self.bus.orders.record_stock_outcome(&event).await.unwrap();
            self.manager.handle_event(&event).await.unwrap();
        }
        order_id
    }

    async fn advance(&self, seconds: i64) {
        self.clock.advance(TimeDelta::seconds(seconds));
        self.manager.fire_due_timeouts().await;
        self.pump().await;
    }

    async fn saga_state(&self, order_id: OrderId) -> SagaState {
        self.manager
            .get_saga(SagaId::from(order_id))
            .await
            .unwrap()
            .unwrap()
            .state()
    }

    async fn order_status(&self, order_id: OrderId) -> OrderStatus {
        self.bus
            .orders
            .get_order(order_id)
            .await
            .unwrap()
            .unwrap()
            .status()
    }

    async fn available(&self, sku: &str) -> u32 {
        self.bus
            .inventory
            .get_ledger(&SkuId::new(sku))
            .await
            .unwrap()
            .unwrap()
            .available()
    }

    async fn saga_events(&self, order_id: OrderId) -> Vec<SagaEvent> {
        self.manager
            .history(SagaId::from(order_id))
            .await
            .unwrap()
            .iter()
            .map(|e| e.decode().unwrap())
            .collect()
    }
}

fn fast_config() -> SagaConfig {
    SagaConfig {
        compensation_retry: RetryPolicy::builder()
            .initial_backoff(Duration::from_millis(10))
            .max_backoff(Duration::from_millis(40))
            .jitter(false)
            .build(),
        ..SagaConfig::default()
    }
}

#[tokio::test]
async fn test_happy_path_reserves_and_confirms() {
    let h = TestHarness::new();
    h.seed(&[("A", 10)]).await;

    let order_id = h.place(&[("A", 5)]).await;

    assert_eq!(h.saga_state(order_id).await, SagaState::Completed);
    assert_eq!(h.order_status(order_id).await, OrderStatus::Confirmed);
    assert_eq!(h.available("A").await, 5);
    assert!(h.manager.active_sagas().await.is_empty());
    assert!(h.bus.sent("CancelOrder").is_empty());
}

#[tokio::test]
async fn test_insufficient_stock_cancels_order() {
    let h = TestHarness::new();
    h.seed(&[("A", 3)]).await;

    let order_id = h.place(&[("A", 5)]).await;

    assert_eq!(h.saga_state(order_id).await, SagaState::Compensated);
    let order = h.bus.orders.get_order(order_id).await.unwrap().unwrap();
    assert_eq!(order.status(), OrderStatus::Cancelled);
    let cancellation = order.cancellation().unwrap();
    assert!(!cancellation.timed_out);
    assert!(cancellation.reason.contains("InsufficientStock"));
    assert_eq!(h.available("A").await, 3);
    assert!(h.bus.sent("ReleaseStock").is_empty());
}

#[tokio::test]
async fn test_unknown_sku_cancels_order() {
    let h = TestHarness::new();

    let order_id = h.place(&[("GHOST", 1)]).await;

    assert_eq!(h.saga_state(order_id).await, SagaState::Compensated);
    assert_eq!(h.order_status(order_id).await, OrderStatus::Cancelled);
}

#[tokio::test]
async fn test_partial_reservation_releases_reserved_lines() {
    let h = TestHarness::new();
    h.seed(&[("A", 10), ("B", 0)]).await;

    let order_id = h.place(&[("A", 2), ("B", 1)]).await;

    assert_eq!(h.saga_state(order_id).await, SagaState::Compensated);
    assert_eq!(h.order_status(order_id).await, OrderStatus::Cancelled);
    assert_eq!(h.available("A").await, 10);

    let releases = h.bus.sent("ReleaseStock");
    assert_eq!(releases.len(), 1);
    let Command::ReleaseStock(release) = &releases[0] else {
        unreachable!()
    };
    assert_eq!(release.sku_id, SkuId::new("A"));
    assert_eq!(
        release.request_id,
        RequestId::for_release(order_id, &SkuId::new("A"))
    );

    let saga = h
        .manager
        .get_saga(SagaId::from(order_id))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        saga.line(&SkuId::new("A")).unwrap().status,
        LineStatus::Released
    );
    assert_eq!(
        saga.line(&SkuId::new("B")).unwrap().status,
        LineStatus::Rejected
    );
}

#[tokio::test]
async fn test_repeated_sku_lines_reserve_once() {
    let h = TestHarness::new();
    h.seed(&[("A", 10)]).await;

    let order_id = h.place(&[("A", 2), ("A", 3)]).await;

    assert_eq!(h.saga_state(order_id).await, SagaState::Completed);
    assert_eq!(h.bus.sent("ReserveStock").len(), 1);
    assert_eq!(h.available("A").await, 5);
}

#[tokio::test]
async fn test_lost_reservation_is_reissued_with_same_request_id() {
    let h = TestHarness::new();
    h.seed(&[("A", 10)]).await;
    h.bus.script("ReserveStock", Some("A"), &[Fault::Drop]);

    let order_id = h.place(&[("A", 4)]).await;
    assert_eq!(h.saga_state(order_id).await, SagaState::ReservationRequested);

    h.advance(4).await;
    assert_eq!(h.bus.sent("ReserveStock").len(), 1);

    h.advance(2).await;
    assert_eq!(h.saga_state(order_id).await, SagaState::Completed);

    let reserves = h.bus.sent("ReserveStock");
    assert_eq!(reserves.len(), 2);
    assert_eq!(reserves[0].request_id(), reserves[1].request_id());
    assert_eq!(h.available("A").await, 6);

    let reissued = h
        .saga_events(order_id)
        .await
        .into_iter()
        .filter(|e| matches!(e, SagaEvent::ReservationRequested(data) if data.attempt == 2))
        .count();
    assert_eq!(reissued, 1);
}

#[tokio::test]
async fn test_reservation_lost_twice_succeeds_on_third_delivery() {
    let h = TestHarness::new();
    h.seed(&[("A", 10)]).await;
    h.bus
        .script("ReserveStock", Some("A"), &[Fault::Drop, Fault::Drop]);

    let order_id = h.place(&[("A", 4)]).await;

    h.advance(6).await;
    assert_eq!(h.saga_state(order_id).await, SagaState::ReservationRequested);
    assert_eq!(h.bus.sent("ReserveStock").len(), 2);

    h.advance(6).await;
    assert_eq!(h.saga_state(order_id).await, SagaState::Completed);
    assert_eq!(h.order_status(order_id).await, OrderStatus::Confirmed);

    let reserves = h.bus.sent("ReserveStock");
    assert_eq!(reserves.len(), 3);
    assert!(
        reserves
            .iter()
            .all(|c| c.request_id() == RequestId::for_reservation(order_id, &SkuId::new("A")))
    );
    assert_eq!(h.available("A").await, 6);
}

#[tokio::test]
async fn test_cancel_redelivered_after_compensation_changes_nothing() {
    let h = TestHarness::new();
    h.seed(&[("A", 3)]).await;

    let order_id = h.place(&[("A", 5)]).await;
    assert_eq!(h.saga_state(order_id).await, SagaState::Compensated);

    let saga_events = h.saga_events(order_id).await.len();
    let order_events = h.store.load(order_id.stream_id()).await.unwrap().len();

    let redelivered = CancelOrder::for_order(order_id, "InsufficientStock", false);
    h.bus.dispatch(redelivered.into()).await.unwrap();
    h.pump().await;

    assert_eq!(h.bus.sent("CancelOrder").len(), 2);
    assert_eq!(h.saga_state(order_id).await, SagaState::Compensated);
    assert_eq!(h.saga_events(order_id).await.len(), saga_events);
    assert_eq!(
        h.store.load(order_id.stream_id()).await.unwrap().len(),
        order_events
    );
    assert_eq!(h.order_status(order_id).await, OrderStatus::Cancelled);
}

#[tokio::test(start_paused = true)]
async fn test_events_are_recorded_while_compensation_backs_off() {
    let h = Arc::new(TestHarness::with_config(SagaConfig {
        compensation_retry: RetryPolicy::builder()
            .initial_backoff(Duration::from_secs(30))
            .jitter(false)
            .build(),
        ..SagaConfig::default()
    }));
    h.seed(&[("A", 10), ("B", 0)]).await;
    h.bus.script("CancelOrder", None, &[Fault::Transient]);

    let order_id = h.place_without_compensating(&[("A", 2), ("B", 1)]).await;
    assert_eq!(h.saga_state(order_id).await, SagaState::Compensating);

    let driver = {
        let h = Arc::clone(&h);
        tokio::spawn(async move { h.manager.compensate(SagaId::from(order_id)).await })
    };
    tokio::time::sleep(Duration::from_secs(1)).await;

    // A second driver for the same saga stands down.
    assert_eq!(
        h.manager.compensate(SagaId::from(order_id)).await.unwrap(),
        None
    );

    // The saga lock is free during the backoff: the saga still takes its
    // own events and an unrelated order runs to completion.
    let reserved_again = h
        .bus
        .inventory
        .reserve_stock(&contracts::ReserveStock::for_order(
            order_id,
            SkuId::new("A"),
            2,
        ))
        .await
        .unwrap()
        .into_event();
    assert_eq!(
        h.manager.handle_event(&reserved_again).await.unwrap(),
        Some(SagaState::Compensating)
    );

    let other = h.place_without_compensating(&[("A", 1)]).await;
    assert_eq!(h.saga_state(other).await, SagaState::Completed);
    assert_eq!(h.bus.sent("CancelOrder").len(), 1);

    let state = driver.await.unwrap().unwrap();
    assert_eq!(state, Some(SagaState::Compensated));
    assert_eq!(h.bus.sent("CancelOrder").len(), 2);
    h.pump().await;
    assert_eq!(h.available("A").await, 9);
}

#[tokio::test]
async fn test_deadline_cancels_order_as_timed_out() {
    let h = TestHarness::with_config(SagaConfig {
        reservation_timeout: Duration::from_secs(20),
        ..fast_config()
    });
    h.seed(&[("A", 10)]).await;
    h.bus.script("ReserveStock", Some("A"), &[Fault::Drop]);

    let order_id = h.place(&[("A", 4)]).await;

    h.advance(16).await;
    assert_eq!(h.saga_state(order_id).await, SagaState::Compensating);
    let order = h.bus.orders.get_order(order_id).await.unwrap().unwrap();
    assert_eq!(order.status(), OrderStatus::Cancelled);
    assert!(order.cancellation().unwrap().timed_out);

    let saga = h
        .manager
        .get_saga(SagaId::from(order_id))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        saga.compensation_reason(),
        Some(&CompensationReason::DeadlineExceeded)
    );

    // The line's outcome is still unknown: it is asked again, turns out
    // reserved, and is given back.
    h.advance(5).await;
    assert_eq!(h.saga_state(order_id).await, SagaState::Compensated);
    assert_eq!(h.available("A").await, 10);
    assert_eq!(h.bus.sent("ReleaseStock").len(), 1);
}

#[tokio::test]
async fn test_unresolved_reservation_fails_saga() {
    let h = TestHarness::with_config(SagaConfig {
        reservation_timeout: Duration::from_secs(20),
        max_reservation_attempts: 2,
        ..fast_config()
    });
    h.seed(&[("A", 10)]).await;
    h.bus
        .script("ReserveStock", Some("A"), &[Fault::Drop, Fault::Drop]);

    let order_id = h.place(&[("A", 1)]).await;
    h.advance(16).await;
    h.advance(5).await;
    assert_eq!(h.saga_state(order_id).await, SagaState::Compensating);

    h.advance(21).await;
    assert_eq!(h.saga_state(order_id).await, SagaState::Failed);
    assert_eq!(
        h.manager.failed_sagas().await,
        vec![SagaId::from(order_id)]
    );
    assert!(h.manager.active_sagas().await.is_empty());
}

#[tokio::test]
async fn test_external_cancellation_releases_stock() {
    let h = TestHarness::new();
    h.seed(&[("A", 10), ("B", 10)]).await;
    h.bus.script("ReserveStock", Some("B"), &[Fault::Drop]);

    let order_id = h.place(&[("A", 2), ("B", 3)]).await;
    assert_eq!(h.available("A").await, 8);

    let cancelled = h
        .bus
        .orders
        .cancel_order(&CancelOrder {
            order_id,
            request_id: RequestId::derive(order_id, contracts::Step::CancelOrder, "customer"),
            reason: "customer changed their mind".into(),
            timed_out: false,
        })
        .await
        .unwrap();
    h.bus.publish(IntegrationEvent::OrderCancelled(cancelled));
    h.pump().await;

    assert_eq!(h.saga_state(order_id).await, SagaState::Compensating);
    assert_eq!(h.available("A").await, 10);
    assert!(h.bus.sent("CancelOrder").is_empty());

    // B's reservation lands late and is released as well.
    h.advance(6).await;
    assert_eq!(h.saga_state(order_id).await, SagaState::Compensated);
    assert_eq!(h.available("B").await, 10);
}

#[tokio::test(start_paused = true)]
async fn test_compensation_retries_transient_failures() {
    let h = TestHarness::new();
    h.seed(&[("A", 3)]).await;
    h.bus.script(
        "CancelOrder",
        None,
        &[Fault::Transient, Fault::Transient],
    );

    let order_id = h.place(&[("A", 5)]).await;

    assert_eq!(h.saga_state(order_id).await, SagaState::Compensated);
    assert_eq!(h.bus.sent("CancelOrder").len(), 3);

    let cancels = h.bus.sent("CancelOrder");
    assert!(cancels.windows(2).all(|w| w[0].request_id() == w[1].request_id()));

    let saga = h
        .manager
        .get_saga(SagaId::from(order_id))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(saga.retry_count(), 2);

    let attempts: Vec<_> = h
        .saga_events(order_id)
        .await
        .into_iter()
        .filter_map(|e| match e {
            SagaEvent::CompensationAttempted(data) => Some((data.attempt, data.error.is_some())),
            _ => None,
        })
        .collect();
    assert_eq!(attempts, vec![(1, true), (2, true), (3, false)]);
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_compensation_fails_saga() {
    let h = TestHarness::new();
    h.seed(&[("A", 10), ("B", 0)]).await;
    h.bus.script(
        "ReleaseStock",
        Some("A"),
        &[Fault::Transient, Fault::Transient, Fault::Transient],
    );

    let order_id = h.place(&[("A", 2), ("B", 1)]).await;

    assert_eq!(h.saga_state(order_id).await, SagaState::Failed);
    assert_eq!(h.bus.sent("ReleaseStock").len(), 3);
    assert_eq!(h.order_status(order_id).await, OrderStatus::Cancelled);
    assert_eq!(h.available("A").await, 8);

    let saga = h
        .manager
        .get_saga(SagaId::from(order_id))
        .await
        .unwrap()
        .unwrap();
    assert!(saga.last_error().unwrap().contains("ReleaseStock"));
    assert_eq!(h.manager.failed_sagas().await, vec![SagaId::from(order_id)]);
}

#[tokio::test]
async fn test_rejected_compensation_is_not_retried() {
    let h = TestHarness::new();
    h.seed(&[("A", 3)]).await;
    h.bus.script("CancelOrder", None, &[Fault::Reject]);

    let order_id = h.place(&[("A", 5)]).await;

    assert_eq!(h.saga_state(order_id).await, SagaState::Failed);
    assert_eq!(h.bus.sent("CancelOrder").len(), 1);
}

#[tokio::test]
async fn test_transient_reservation_dispatch_is_recorded_and_reissued() {
    let h = TestHarness::new();
    h.seed(&[("A", 10)]).await;
    h.bus.script("ReserveStock", Some("A"), &[Fault::Transient]);

    let order_id = h.place(&[("A", 1)]).await;
    assert!(h.saga_events(order_id).await.iter().any(|e| matches!(
        e,
        SagaEvent::ReservationDispatchFailed(data) if data.attempt == 1
    )));

    h.advance(6).await;
    assert_eq!(h.saga_state(order_id).await, SagaState::Completed);
}

#[tokio::test]
async fn test_refused_reservation_dispatch_compensates() {
    let h = TestHarness::new();
    h.seed(&[("A", 10)]).await;
    h.bus.script("ReserveStock", Some("A"), &[Fault::Reject]);

    let order_id = h.place(&[("A", 1)]).await;

    let saga = h
        .manager
        .get_saga(SagaId::from(order_id))
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(
        saga.compensation_reason(),
        Some(CompensationReason::DispatchRejected { .. })
    ));
    assert_eq!(h.order_status(order_id).await, OrderStatus::Cancelled);
}

#[tokio::test]
async fn test_duplicate_events_are_absorbed() {
    let h = TestHarness::new();
    h.seed(&[("A", 10)]).await;

    let order_id = h.place(&[("A", 5)]).await;
    let recorded = h.saga_events(order_id).await.len();

    let order = h.bus.orders.get_order(order_id).await.unwrap().unwrap();
    let placed = IntegrationEvent::OrderPlaced(contracts::OrderPlaced {
        order_id,
        customer_id: order.customer_id().unwrap().clone(),
        line_items: order.line_items().to_vec(),
    });
    let reserved = h
        .bus
        .inventory
        .reserve_stock(&contracts::ReserveStock::for_order(
            order_id,
            SkuId::new("A"),
            5,
        ))
        .await
        .unwrap()
        .into_event();

    h.manager.handle_event(&placed).await.unwrap();
    h.manager.handle_event(&reserved).await.unwrap();

    assert_eq!(h.saga_events(order_id).await.len(), recorded);
    assert_eq!(h.bus.sent("ReserveStock").len(), 1);
    assert_eq!(h.available("A").await, 5);
}

#[tokio::test]
async fn test_recovery_resumes_in_flight_sagas() {
    let mut h = TestHarness::new();
    h.seed(&[("A", 10), ("B", 0)]).await;
    h.bus.script("ReserveStock", Some("A"), &[Fault::Drop]);

    let pending = h.place(&[("A", 1)]).await;
    let cancelled = h.place(&[("B", 1)]).await;

    h.restart();
    assert!(h.manager.active_sagas().await.is_empty());

    let report = h.manager.recover().await.unwrap();
    assert_eq!(report.resumed, 1);
    assert_eq!(report.archived, 1);
    assert_eq!(report.failed, 0);
    assert_eq!(h.manager.active_sagas().await, vec![SagaId::from(pending)]);

    h.pump().await;
    assert_eq!(h.saga_state(pending).await, SagaState::Completed);
    assert_eq!(h.saga_state(cancelled).await, SagaState::Compensated);

    let reserves = h.bus.sent("ReserveStock");
    let for_pending: Vec<_> = reserves
        .iter()
        .filter(|c| c.order_id() == pending)
        .collect();
    assert_eq!(for_pending.len(), 2);
    assert_eq!(for_pending[0].request_id(), for_pending[1].request_id());
}

#[tokio::test]
async fn test_recovery_lists_failed_sagas() {
    let mut h = TestHarness::new();
    h.seed(&[("A", 3)]).await;
    h.bus.script("CancelOrder", None, &[Fault::Reject]);
    let order_id = h.place(&[("A", 5)]).await;

    h.restart();
    let report = h.manager.recover().await.unwrap();

    assert_eq!(report.failed, 1);
    assert_eq!(h.manager.failed_sagas().await, vec![SagaId::from(order_id)]);
}

#[tokio::test]
async fn test_concurrent_orders_do_not_oversell() {
    let h = Arc::new(TestHarness::new());
    h.seed(&[("A", 5)]).await;

    let mut handles = Vec::new();
    for _ in 0..10 {
        let h = Arc::clone(&h);
        handles.push(tokio::spawn(async move { h.place(&[("A", 1)]).await }));
    }
    let mut orders = Vec::new();
    for handle in handles {
        orders.push(handle.await.unwrap());
    }
    h.pump().await;

    let mut completed = 0;
    for order_id in &orders {
        match h.saga_state(*order_id).await {
            SagaState::Completed => completed += 1,
            SagaState::Compensated => {}
            other => panic!("unexpected saga state {other}"),
        }
    }
    assert_eq!(completed, 5);
    assert_eq!(h.available("A").await, 0);
    assert!(
        h.store
            .load(SkuId::new("A").stream_id())
            .await
            .unwrap()
            .len()
            > 1
    );
}
