//! Stock level endpoint.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use contracts::SkuId;
use event_store::EventStore;
use projections::StockLevel;

use crate::AppState;
use crate::error::ApiError;

/// GET /api/v1/inventory/{sku}: available and reserved units for a SKU.
#[tracing::instrument(skip(state))]
pub async fn get<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(sku): Path<String>,
) -> Result<Json<StockLevel>, ApiError> {
    let sku_id = SkuId::new(sku.trim());
    if sku_id.is_blank() {
        return Err(ApiError::BadRequest("SKU is required".to_string()));
    }

    state.processor.run_catch_up().await?;
    state
        .stock_view
        .get(&sku_id)
        .await
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("SKU {sku_id} not found")))
}
