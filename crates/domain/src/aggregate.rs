//! Core aggregate and domain event traits.

use contracts::AggregateId;
use event_store::Version;
use serde::{Serialize, de::DeserializeOwned};

/// A fact recorded in an aggregate's stream.
///
/// Events are a closed enum per aggregate; `event_type` names the variant
/// so the store can be filtered without decoding payloads.
pub trait DomainEvent: Serialize + DeserializeOwned + Send + Sync + Clone {
    fn event_type(&self) -> &'static str;
}

/// An event-sourced consistency boundary.
///
/// Current state is the fold of the stream through [`Aggregate::apply`].
/// Decisions are made by ordinary methods that inspect the state and
/// return the events to record; they never mutate state themselves.
pub trait Aggregate: Default + Send + Sync + Sized {
    type Event: DomainEvent;

    type Error: std::error::Error + Send + Sync;

    /// Stream kind recorded on every envelope, e.g. "Order".
    fn aggregate_type() -> &'static str;

    /// Stream ID, or None while the aggregate has not been created.
    fn id(&self) -> Option<AggregateId>;

    fn version(&self) -> Version;

    fn set_version(&mut self, version: Version);

    /// Folds one event into the state.
    ///
    /// Must be pure and infallible: the event already happened.
    fn apply(&mut self, event: Self::Event);

    fn apply_events(&mut self, events: impl IntoIterator<Item = Self::Event>) {
        for event in events {
            self.apply(event);
        }
    }
}
