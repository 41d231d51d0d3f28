//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use domain::{DomainError, InventoryError, OrderError};
use event_store::EventStoreError;
use projections::ProjectionError;
use saga::SagaError;
use thiserror::Error;

/// Failure while routing a message or bootstrapping the service.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    EventStore(#[from] EventStoreError),

    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error(transparent)]
    Saga(#[from] SagaError),

    #[error(transparent)]
    Projection(#[from] ProjectionError),
}

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Domain(DomainError),
    Saga(SagaError),
    Projection(ProjectionError),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Domain(err) => domain_status(err),
            ApiError::Saga(SagaError::EventStore(err)) => store_status(err),
            ApiError::Saga(_) | ApiError::Projection(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn message(&self) -> String {
        match self {
            ApiError::NotFound(msg) | ApiError::BadRequest(msg) => msg.clone(),
            ApiError::Domain(err) => err.to_string(),
            ApiError::Saga(err) => err.to_string(),
            ApiError::Projection(err) => err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = self.message();
        if status.is_server_error() {
            tracing::error!(error = %message, "internal server error");
        }

        let body = serde_json::json!({ "error": message });
        (status, axum::Json(body)).into_response()
    }
}

fn domain_status(err: &DomainError) -> StatusCode {
    if err.validation().is_some() {
        return StatusCode::BAD_REQUEST;
    }
    match err {
        DomainError::Order(OrderError::NotFound(_)) => StatusCode::NOT_FOUND,
        DomainError::Order(
            OrderError::DuplicateOrder(_) | OrderError::InvalidStateTransition { .. },
        ) => StatusCode::CONFLICT,
        DomainError::Inventory(
            InventoryError::LedgerAlreadyOpen(_) | InventoryError::NothingToRelease { .. },
        ) => StatusCode::CONFLICT,
        DomainError::EventStore(err) => store_status(err),
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn store_status(err: &EventStoreError) -> StatusCode {
    match err {
        EventStoreError::ConcurrencyConflict { .. } => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<DomainError> for ApiError {
    fn from(err: DomainError) -> Self {
        ApiError::Domain(err)
    }
}

impl From<SagaError> for ApiError {
    fn from(err: SagaError) -> Self {
        ApiError::Saga(err)
    }
}

impl From<ProjectionError> for ApiError {
    fn from(err: ProjectionError) -> Self {
        ApiError::Projection(err)
    }
}
