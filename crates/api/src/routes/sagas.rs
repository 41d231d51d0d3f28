//! Saga operator endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use event_store::EventStore;
use projections::SagaSummary;

use crate::AppState;
use crate::error::ApiError;

/// GET /api/v1/sagas/failed: sagas that could not finish compensating,
/// most recent first.
#[tracing::instrument(skip(state))]
pub async fn failed<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
) -> Result<Json<Vec<SagaSummary>>, ApiError> {
    state.processor.run_catch_up().await?;
    Ok(Json(state.saga_view.failed_sagas().await))
}
