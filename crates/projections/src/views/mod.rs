//! Read model views for the query side.

pub mod order_status;
pub mod saga_monitor;
pub mod stock_levels;

pub use order_status::{OrderStatusView, OrderSummary, OrderViewStatus};
pub use saga_monitor::{SagaMonitorView, SagaSummary};
pub use stock_levels::{StockLevel, StockLevelsView};
