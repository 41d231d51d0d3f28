//! Saga monitor read model: progress of every order saga, and the sagas
//! that need an operator.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use contracts::{AggregateId, OrderId, SagaId};
use domain::Aggregate;
use event_store::EventEnvelope;
use saga::{SagaEvent, SagaInstance, SagaState};
use serde::Serialize;
use tokio::sync::RwLock;

use crate::Result;
use crate::projection::{Projection, ProjectionPosition};
use crate::read_model::ReadModel;

#[derive(Debug, Clone, Serialize)]
pub struct SagaSummary {
    pub saga_id: SagaId,
    pub order_id: OrderId,
    pub state: SagaState,
    pub line_count: usize,
    pub reserved_lines: usize,
    pub compensation_reason: Option<String>,
    pub retry_count: u32,
    pub last_error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

struct SagaMonitorState {
    sagas: HashMap<SagaId, SagaSummary>,
    /// Stream ID to saga ID.
    streams: HashMap<AggregateId, SagaId>,
    position: ProjectionPosition,
}

/// Read model view of saga progress.
#[derive(Clone)]
pub struct SagaMonitorView {
    state: Arc<RwLock<SagaMonitorState>>,
}

impl SagaMonitorView {
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(SagaMonitorState {
                sagas: HashMap::new(),
                streams: HashMap::new(),
                position: ProjectionPosition::zero(),
            })),
        }
    }

    pub async fn get_saga(&self, saga_id: SagaId) -> Option<SagaSummary> {
        self.state.read().await.sagas.get(&saga_id).cloned()
    }

    /// Sagas stuck in Failed, most recently failed first.
    pub async fn failed_sagas(&self) -> Vec<SagaSummary> {
        let mut failed = self.sagas_in_state(SagaState::Failed).await;
        failed.reverse();
        failed
    }

    /// Sagas in `state`, oldest update first.
    pub async fn sagas_in_state(&self, state: SagaState) -> Vec<SagaSummary> {
        let view = self.state.read().await;
        let mut sagas: Vec<_> = view
            .sagas
            .values()
            .filter(|s| s.state == state)
            .cloned()
            .collect();
        sagas.sort_by_key(|s| s.updated_at);
        sagas
    }
}

impl Default for SagaMonitorView {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Projection for SagaMonitorView {
    fn name(&self) -> &'static str {
        "SagaMonitorView"
    }

    async fn handle(&self, event: &EventEnvelope) -> Result<()> {
        let mut state = self.state.write().await;
        state.position = state.position.advance_to(event.position);

        if event.aggregate_type != SagaInstance::aggregate_type() {
            return Ok(());
        }

        let saga_event: SagaEvent = event.decode()?;
        if let SagaEvent::SagaStarted(data) = saga_event {
            state.streams.insert(event.aggregate_id, data.saga_id);
            state.sagas.insert(
                data.saga_id,
                SagaSummary {
                    saga_id: data.saga_id,
                    order_id: data.order_id,
                    state: SagaState::Started,
                    line_count: data.lines.len(),
                    reserved_lines: 0,
                    compensation_reason: None,
                    retry_count: 0,
                    last_error: None,
                    started_at: data.started_at,
                    updated_at: data.started_at,
                },
            );
            return Ok(());
        }

        let summary = match state.streams.get(&event.aggregate_id).copied() {
            Some(saga_id) => state.sagas.get_mut(&saga_id),
            None => None,
        };
        let Some(summary) = summary else {
            tracing::warn!(aggregate_id = %event.aggregate_id, "event for unknown saga skipped");
            return Ok(());
        };
        summary.updated_at = event.timestamp;

        match saga_event {
            SagaEvent::SagaStarted(_) => {}
            SagaEvent::ReservationRequested(_) => {
                if summary.state == SagaState::Started {
                    summary.state = SagaState::ReservationRequested;
                }
            }
            SagaEvent::ReservationDispatchFailed(data) => summary.last_error = Some(data.error),
            SagaEvent::ReservationConfirmed(_) => summary.reserved_lines += 1,
            SagaEvent::StockReleaseAcknowledged(_) => {
                summary.reserved_lines = summary.reserved_lines.saturating_sub(1);
            }
            SagaEvent::ReservationRejected(_) | SagaEvent::CancellationAcknowledged(_) => {}
            SagaEvent::CompensationStarted(data) => {
                summary.state = SagaState::Compensating;
                summary.compensation_reason = Some(data.reason.describe());
            }
            SagaEvent::CompensationAttempted(data) => {
                if data.attempt > 1 {
                    summary.retry_count += 1;
                }
                if data.error.is_some() {
                    summary.last_error = data.error;
                }
            }
            SagaEvent::SagaCompleted(_) => summary.state = SagaState::Completed,
            SagaEvent::SagaCompensated(_) => summary.state = SagaState::Compensated,
            SagaEvent::SagaFailed(data) => {
                summary.state = SagaState::Failed;
                summary.last_error = Some(data.last_error);
            }
        }

        Ok(())
    }

    async fn position(&self) -> ProjectionPosition {
        self.state.read().await.position
    }

    async fn reset(&self) -> Result<()> {
        let mut state = self.state.write().await;
        state.sagas.clear();
        state.streams.clear();
        state.position = ProjectionPosition::zero();
        Ok(())
    }
}

impl ReadModel for SagaMonitorView {
    fn name(&self) -> &'static str {
        "SagaMonitorView"
    }

    fn count(&self) -> usize {
        self.state.try_read().map(|s| s.sagas.len()).unwrap_or(0)
    }
}
