//! Projection processor for feeding events to projections.

use std::sync::Arc;

use event_store::{EventEnvelope, EventStore};
use futures_util::StreamExt;
use tokio::sync::Mutex;

use crate::Result;
use crate::projection::Projection;

/// Feeds events from the store's global log to projections.
///
/// - Catch-up: each projection reads from its own last position onward
/// - Single event delivery: a newly appended event goes to every projection
///   that has not seen its position yet
/// - Rebuild: resets every projection and catches up from the start
///
/// Catch-up and rebuild are serialized so concurrent callers never deliver
/// the same position twice.
pub struct ProjectionProcessor<S: EventStore> {
    store: S,
    projections: Vec<Arc<dyn Projection>>,
    gate: Mutex<()>,
}

impl<S: EventStore> ProjectionProcessor<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            projections: Vec::new(),
            gate: Mutex::new(()),
        }
    }

    pub fn register(&mut self, projection: Arc<dyn Projection>) {
        self.projections.push(projection);
    }

    pub fn projection_count(&self) -> usize {
        self.projections.len()
    }

    /// Brings every projection up to the head of the log. Returns the number
    /// of deliveries made.
    #[tracing::instrument(skip(self))]
    pub async fn run_catch_up(&self) -> Result<u64> {
        let _gate = self.gate.lock().await;
        self.catch_up().await
    }

    async fn catch_up(&self) -> Result<u64> {
        let mut delivered = 0;

        for projection in &self.projections {
            let from = projection.position().await.last_position;
            let mut stream = self.store.stream_events_after(from).await?;

            while let Some(event) = stream.next().await {
                let event = event?;
                projection.handle(&event).await?;
                metrics::counter!("projections_events_processed", "projection" => projection.name())
                    .increment(1);
                delivered += 1;
            }
        }

        if delivered > 0 {
            tracing::debug!(delivered, "catch-up complete");
        }
        Ok(delivered)
    }

    /// Delivers one event to every projection that has not handled it.
    #[tracing::instrument(skip(self, event), fields(event_type = %event.event_type, position = event.position))]
    pub async fn process_event(&self, event: &EventEnvelope) -> Result<()> {
        let _gate = self.gate.lock().await;
        for projection in &self.projections {
            if projection.position().await.has_seen(event.position) {
                continue;
            }
            projection.handle(event).await?;
            metrics::counter!("projections_events_processed", "projection" => projection.name())
                .increment(1);
        }
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    pub async fn rebuild_all(&self) -> Result<u64> {
        let _gate = self.gate.lock().await;
        for projection in &self.projections {
            projection.reset().await?;
        }
        let delivered = self.catch_up().await?;
        tracing::info!(delivered, projections = self.projections.len(), "projections rebuilt");
        Ok(delivered)
    }
}
