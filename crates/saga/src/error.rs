//! Saga error types.

use event_store::EventStoreError;
use thiserror::Error;

/// Errors that can occur during saga operations.
///
/// Business failures never show up here: they are recorded in the saga
/// stream and drive compensation.
#[derive(Debug, Error)]
pub enum SagaError {
    /// Event store error.
    #[error("Event store error: {0}")]
    EventStore(#[from] EventStoreError),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Convenience type alias for saga results.
pub type Result<T> = std::result::Result<T, SagaError>;
