//! Shared contract library for the sales and inventory contexts.
//!
//! Everything that crosses a context boundary lives here: identifiers,
//! value objects, commands, integration events and the idempotency-key
//! derivation scheme. Both contexts must agree on these definitions, so
//! the crate carries no behavior beyond structural validation.

pub mod commands;
pub mod error;
pub mod events;
pub mod ids;
pub mod request;
pub mod values;

pub use commands::{CancelOrder, Command, PlaceOrder, ReleaseStock, ReserveStock};
pub use error::ValidationError;
pub use events::{
    IntegrationEvent, OrderCancelled, OrderPlaced, ReservationFailureReason, ReservationOutcome,
    StockReleased, StockReservationFailed, StockReserved,
};
pub use ids::{AggregateId, CustomerId, OrderId, SagaId, SkuId};
pub use request::{RequestId, Step};
pub use values::{LineItem, Money, coalesce_line_items};
