//! Domain error types.

use contracts::ValidationError;
use event_store::EventStoreError;
use thiserror::Error;

use crate::inventory::InventoryError;
use crate::order::OrderError;

/// Errors that can occur during domain operations.
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("Event store error: {0}")]
    EventStore(#[from] EventStoreError),

    #[error("Order error: {0}")]
    Order(#[from] OrderError),

    #[error("Inventory error: {0}")]
    Inventory(#[from] InventoryError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl DomainError {
    /// Whether the failure is infrastructural and the command may be retried.
    ///
    /// Business rejections and validation failures are never transient.
    pub fn is_transient(&self) -> bool {
        match self {
            DomainError::EventStore(err) => err.is_transient(),
            _ => false,
        }
    }

    /// The validation error behind this failure, if any.
    pub fn validation(&self) -> Option<&ValidationError> {
        match self {
            DomainError::Order(OrderError::Validation(err)) => Some(err),
            DomainError::Inventory(InventoryError::Validation(err)) => Some(err),
            _ => None,
        }
    }
}
