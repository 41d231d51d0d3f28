//! Read models for the query side.
//!
//! - [`Projection`] trait for folding events into read models
//! - [`ReadModel`] trait for query access to denormalized data
//! - [`ProjectionProcessor`] for feeding the store's global log to projections
//! - Three views: order status, saga monitor and stock levels

pub mod error;
pub mod processor;
pub mod projection;
pub mod read_model;
pub mod views;

pub use error::{ProjectionError, Result};
pub use processor::ProjectionProcessor;
pub use projection::{Projection, ProjectionPosition};
pub use read_model::ReadModel;
pub use views::{
    OrderStatusView, OrderSummary, OrderViewStatus, SagaMonitorView, SagaSummary, StockLevel,
    StockLevelsView,
};
