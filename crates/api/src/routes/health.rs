//! Health check endpoint.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use event_store::EventStore;
use projections::ReadModel;
use serde::Serialize;

use crate::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub active_sagas: usize,
    pub failed_sagas: usize,
    pub read_models: Vec<ReadModelStatus>,
}

#[derive(Serialize)]
pub struct ReadModelStatus {
    pub name: &'static str,
    pub entries: usize,
}

/// GET /health: returns system health status.
pub async fn check<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
) -> Json<HealthResponse> {
    let read_models: [&dyn ReadModel; 3] =
        [&state.order_view, &state.saga_view, &state.stock_view];

    Json(HealthResponse {
        status: "ok",
        active_sagas: state.sagas.active_sagas().await.len(),
        failed_sagas: state.sagas.failed_sagas().await.len(),
        read_models: read_models
            .iter()
            .map(|model| ReadModelStatus {
                name: model.name(),
                entries: model.count(),
            })
            .collect(),
    })
}
