//! Order aggregate and related types (sales context).

mod aggregate;
mod commands;
mod events;
mod service;
mod state;

pub use aggregate::{Cancellation, Order};
pub use events::{
    OrderCancelledData, OrderConfirmedData, OrderEvent, OrderPlacedData, StockLineData,
    StockLineRejectedData,
};
pub use service::OrderService;
pub use state::OrderStatus;

use contracts::{OrderId, ValidationError};
use thiserror::Error;

/// Errors that can occur during order operations.
#[derive(Debug, Error)]
pub enum OrderError {
    /// An order with this ID already exists.
    #[error("Duplicate order: {0}")]
    DuplicateOrder(OrderId),

    #[error("Order not found: {0}")]
    NotFound(OrderId),

    /// Order is not in a status that allows the action.
    #[error("Invalid state transition: cannot {action} from {current} status")]
    InvalidStateTransition {
        current: OrderStatus,
        action: &'static str,
    },

    #[error("Invalid order: {0}")]
    Validation(#[from] ValidationError),
}
