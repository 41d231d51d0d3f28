//! Stock ledger aggregate and related types (inventory context).

mod commands;
mod events;
mod ledger;
mod service;

pub use events::{
    InventoryEvent, LedgerOpenedData, StockReleasedData, StockReservationFailedData,
    StockReservedData,
};
pub use ledger::StockLedger;
pub use service::InventoryService;

use contracts::{RequestId, SkuId, ValidationError};
use thiserror::Error;

/// Errors that can occur during inventory operations.
///
/// Running out of stock is not an error: it is recorded as a
/// `StockReservationFailed` event.
#[derive(Debug, Error)]
pub enum InventoryError {
    #[error("Invalid stock request: {0}")]
    Validation(#[from] ValidationError),

    #[error("Ledger already open for SKU {0}")]
    LedgerAlreadyOpen(SkuId),

    /// The reservation to release never reserved stock or was already released.
    #[error("Nothing to release for reservation {request_id}")]
    NothingToRelease { request_id: RequestId },

    #[error("No outcome recorded for request {0}")]
    UnknownRequest(RequestId),
}
