//! Order placement and order query endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use contracts::{IntegrationEvent, LineItem, Money, OrderId, PlaceOrder, SagaId};
use event_store::{EventEnvelope, EventStore};
use projections::OrderSummary;
use saga::SagaInstance;
use serde::{Deserialize, Serialize};

use crate::AppState;
use crate::error::ApiError;
use crate::router::RouterMessage;

// -- Request types --

#[derive(Deserialize)]
pub struct PlaceOrderRequest {
    pub customer_id: String,
    pub line_items: Vec<LineItemRequest>,
}

#[derive(Deserialize)]
pub struct LineItemRequest {
    pub sku_id: String,
    pub quantity: u32,
    pub unit_price_cents: i64,
}

// -- Response types --

#[derive(Serialize)]
pub struct OrderAcceptedResponse {
    pub order_id: OrderId,
    pub status: &'static str,
}

#[derive(Serialize)]
pub struct EventEnvelopeResponse {
    pub event_id: String,
    pub event_type: String,
    pub version: i64,
    pub position: u64,
    pub timestamp: String,
    pub payload: serde_json::Value,
}

impl From<EventEnvelope> for EventEnvelopeResponse {
    fn from(e: EventEnvelope) -> Self {
        Self {
            event_id: e.event_id.to_string(),
            event_type: e.event_type,
            version: e.version.as_i64(),
            position: e.position,
            timestamp: e.timestamp.to_rfc3339(),
            payload: e.payload,
        }
    }
}

#[derive(Serialize)]
pub struct SagaResponse {
    pub saga: SagaInstance,
    pub history: Vec<EventEnvelopeResponse>,
}

// -- Handlers --

/// POST /api/v1/orders: accept an order and start its saga.
///
/// Returns 202: stock is reserved asynchronously, poll the order for the
/// outcome.
#[tracing::instrument(skip(state, req), fields(customer_id = %req.customer_id))]
pub async fn create<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Json(req): Json<PlaceOrderRequest>,
) -> Result<(StatusCode, Json<OrderAcceptedResponse>), ApiError> {
    let line_items = req
        .line_items
        .into_iter()
        .map(|item| {
            LineItem::new(
                item.sku_id,
                item.quantity,
                Money::from_cents(item.unit_price_cents),
            )
        })
        .collect();

    let placed = state
        .orders
        .place_order(PlaceOrder::new(req.customer_id.as_str(), line_items))
        .await?;
    let order_id = placed.order_id;

    if !state
        .publisher
        .publish(RouterMessage::Event(IntegrationEvent::OrderPlaced(placed)))
    {
        // The order is stored; startup picks it up again.
        tracing::error!(%order_id, "event router unavailable, saga start deferred");
    }

    Ok((
        StatusCode::ACCEPTED,
        Json(OrderAcceptedResponse {
            order_id,
            status: "PENDING",
        }),
    ))
}

/// GET /api/v1/orders/{id}: order summary from the read model.
#[tracing::instrument(skip(state))]
pub async fn get<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<OrderSummary>, ApiError> {
    let order_id = parse_order_id(&id)?;

    // Run catch-up to ensure the read model includes latest events
    state.processor.run_catch_up().await?;

    state
        .order_view
        .get_order(order_id)
        .await
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Order {id} not found")))
}

/// GET /api/v1/orders/{id}/history: raw event stream of the order.
#[tracing::instrument(skip(state))]
pub async fn history<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<Vec<EventEnvelopeResponse>>, ApiError> {
    let order_id = parse_order_id(&id)?;
    let envelopes = state.orders.history(order_id).await?;
    if envelopes.is_empty() {
        return Err(ApiError::NotFound(format!("Order {id} not found")));
    }

    Ok(Json(envelopes.into_iter().map(Into::into).collect()))
}

/// GET /api/v1/orders/{id}/saga: saga state and history for the order.
#[tracing::instrument(skip(state))]
pub async fn saga<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<SagaResponse>, ApiError> {
    let saga_id = SagaId::from(parse_order_id(&id)?);

    let saga = state
        .sagas
        .get_saga(saga_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Saga for order {id} not found")))?;
    let history = state.sagas.history(saga_id).await?;

    Ok(Json(SagaResponse {
        saga,
        history: history.into_iter().map(Into::into).collect(),
    }))
}

fn parse_order_id(id: &str) -> Result<OrderId, ApiError> {
    id.parse::<OrderId>()
        .map_err(|e| ApiError::BadRequest(format!("Invalid ID format: {e}")))
}
