//! Composition root and HTTP server for the order saga backend.
//!
//! Wires the sales and inventory services, the order saga, the event
//! router and the read models together, and exposes them over REST with
//! structured logging (tracing) and Prometheus metrics.

pub mod bootstrap;
pub mod bus;
pub mod config;
pub mod error;
pub mod router;
pub mod routes;
pub mod sweeper;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use domain::{InventoryService, OrderService};
use event_store::EventStore;
use metrics_exporter_prometheus::PrometheusHandle;
use projections::{OrderStatusView, ProjectionProcessor, SagaMonitorView, StockLevelsView};
use saga::{Clock, OrderSagaManager, SagaConfig};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use bus::InProcessCommandBus;
use router::{EventPublisher, EventRouter};

/// The saga manager as wired in this service.
pub type SagaManager<S> = OrderSagaManager<S, InProcessCommandBus<S>>;

/// Shared application state accessible from all handlers.
pub struct AppState<S: EventStore> {
    pub store: S,
    pub orders: Arc<OrderService<S>>,
    pub inventory: Arc<InventoryService<S>>,
    pub sagas: Arc<SagaManager<S>>,
    pub publisher: EventPublisher,
    pub processor: Arc<ProjectionProcessor<S>>,
    pub order_view: OrderStatusView,
    pub saga_view: SagaMonitorView,
    pub stock_view: StockLevelsView,
    pub clock: Arc<dyn Clock>,
}

/// Builds the application state and the router that feeds it.
///
/// The router owns the receiving end of the queues the command bus
/// publishes to; nothing is processed until it is drained or spawned.
pub fn build_state<S: EventStore + Clone + 'static>(
    store: S,
    clock: Arc<dyn Clock>,
    saga_config: SagaConfig,
    router_shards: usize,
) -> (Arc<AppState<S>>, Arc<EventRouter<S>>) {
    let (publisher, queues) = router::channel(router_shards);

    let orders = Arc::new(OrderService::new(store.clone()));
    let inventory = Arc::new(InventoryService::new(store.clone()));
    let bus = InProcessCommandBus::new(
        Arc::clone(&orders),
        Arc::clone(&inventory),
        publisher.clone(),
    );
    let sagas = Arc::new(OrderSagaManager::new(
        store.clone(),
        bus,
        Arc::clone(&clock),
        saga_config,
    ));

    let order_view = OrderStatusView::new();
    let saga_view = SagaMonitorView::new();
    let stock_view = StockLevelsView::new();
    let mut processor = ProjectionProcessor::new(store.clone());
    processor.register(Arc::new(order_view.clone()));
    processor.register(Arc::new(saga_view.clone()));
    processor.register(Arc::new(stock_view.clone()));
    let processor = Arc::new(processor);

    let event_router = Arc::new(EventRouter::new(
        queues,
        Arc::clone(&orders),
        Arc::clone(&sagas),
        Arc::clone(&processor),
    ));

    let state = Arc::new(AppState {
        store,
        orders,
        inventory,
        sagas,
        publisher,
        processor,
        order_view,
        saga_view,
        stock_view,
        clock,
    });

    (state, event_router)
}

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S: EventStore + Clone + 'static>(
    state: Arc<AppState<S>>,
    metrics_handle: PrometheusHandle,
) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check::<S>))
        .route("/api/v1/orders", post(routes::orders::create::<S>))
        .route("/api/v1/orders/{id}", get(routes::orders::get::<S>))
        .route(
            "/api/v1/orders/{id}/history",
            get(routes::orders::history::<S>),
        )
        .route("/api/v1/orders/{id}/saga", get(routes::orders::saga::<S>))
        .route("/api/v1/sagas/failed", get(routes::sagas::failed::<S>))
        .route("/api/v1/inventory/{sku}", get(routes::inventory::get::<S>))
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}
