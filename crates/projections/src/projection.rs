//! Core projection trait and position tracking.

use async_trait::async_trait;
use event_store::EventEnvelope;

use crate::Result;

/// How far a projection has read the global log.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProjectionPosition {
    /// Global position of the last event handled. Zero before the first.
    pub last_position: u64,

    /// Number of events handled since the last reset.
    pub events_processed: u64,
}

impl ProjectionPosition {
    pub fn zero() -> Self {
        Self::default()
    }

    /// Position after handling the event at `position`.
    pub fn advance_to(&self, position: u64) -> Self {
        Self {
            last_position: position.max(self.last_position),
            events_processed: self.events_processed + 1,
        }
    }

    /// Whether the event at `position` has already been handled.
    pub fn has_seen(&self, position: u64) -> bool {
        position <= self.last_position
    }
}

impl std::fmt::Display for ProjectionPosition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "position({}, {} processed)",
            self.last_position, self.events_processed
        )
    }
}

/// A projection that folds events into a read model.
///
/// Every event in the global log is offered to every projection. A
/// projection skips event kinds it does not care about but still advances
/// its position past them.
#[async_trait]
pub trait Projection: Send + Sync {
    fn name(&self) -> &'static str;

    async fn handle(&self, event: &EventEnvelope) -> Result<()>;

    async fn position(&self) -> ProjectionPosition;

    /// Clears the read model and rewinds to the start of the log.
    async fn reset(&self) -> Result<()>;
}
