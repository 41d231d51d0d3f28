//! Event store for the order and inventory streams.
//!
//! The store is the source of truth: aggregates and sagas are folds over
//! the streams kept here. The interface is deliberately narrow:
//! append with an expected version, and load a stream in order.

pub mod error;
pub mod event;
pub mod memory;
pub mod store;

pub use contracts::AggregateId;
pub use error::{EventStoreError, Result};
pub use event::{EventEnvelope, EventEnvelopeBuilder, EventId, Version};
pub use memory::InMemoryEventStore;
pub use store::{AppendOptions, EventStore, EventStream};
