//! Events recorded in a saga's own stream.

use chrono::{DateTime, Utc};
use contracts::{OrderId, ReservationFailureReason, RequestId, SagaId, SkuId, Step};
use domain::DomainEvent;
use serde::{Deserialize, Serialize};

/// Events that can occur during an order saga.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum SagaEvent {
    /// OrderPlaced observed; the saga exists from here on.
    SagaStarted(SagaStartedData),

    /// ReserveStock issued (or re-issued) for one SKU.
    ReservationRequested(ReservationRequestedData),

    /// The ReserveStock command could not be handed to the inventory context.
    ReservationDispatchFailed(ReservationDispatchFailedData),

    ReservationConfirmed(ReservationOutcomeData),

    ReservationRejected(ReservationRejectedData),

    /// The order is being undone.
    CompensationStarted(CompensationStartedData),

    /// One delivery attempt of a compensating command.
    CompensationAttempted(CompensationAttemptedData),

    CancellationAcknowledged(CancellationAcknowledgedData),

    StockReleaseAcknowledged(ReservationOutcomeData),

    SagaCompleted(SagaFinishedData),

    SagaCompensated(SagaFinishedData),

    /// Compensation gave up. Requires an operator.
    SagaFailed(SagaFailedData),
}

impl DomainEvent for SagaEvent {
    fn event_type(&self) -> &'static str {
        match self {
            SagaEvent::SagaStarted(_) => "SagaStarted",
            SagaEvent::ReservationRequested(_) => "ReservationRequested",
            SagaEvent::ReservationDispatchFailed(_) => "ReservationDispatchFailed",
            SagaEvent::ReservationConfirmed(_) => "ReservationConfirmed",
            SagaEvent::ReservationRejected(_) => "ReservationRejected",
            SagaEvent::CompensationStarted(_) => "CompensationStarted",
            SagaEvent::CompensationAttempted(_) => "CompensationAttempted",
            SagaEvent::CancellationAcknowledged(_) => "CancellationAcknowledged",
            SagaEvent::StockReleaseAcknowledged(_) => "StockReleaseAcknowledged",
            SagaEvent::SagaCompleted(_) => "SagaCompleted",
            SagaEvent::SagaCompensated(_) => "SagaCompensated",
            SagaEvent::SagaFailed(_) => "SagaFailed",
        }
    }
}

/// One coalesced SKU line the saga has to reserve.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SagaLine {
    pub sku_id: SkuId,
    pub quantity: u32,
}

/// Data for SagaStarted event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SagaStartedData {
    pub saga_id: SagaId,
    pub order_id: OrderId,
    pub lines: Vec<SagaLine>,
    pub started_at: DateTime<Utc>,
    /// After this instant an unresolved reservation triggers compensation.
    pub deadline_at: DateTime<Utc>,
}

/// Data for ReservationRequested event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReservationRequestedData {
    pub sku_id: SkuId,
    pub request_id: RequestId,
    pub quantity: u32,
    /// 1 for the first request, incremented on every re-issue.
    pub attempt: u32,
    /// When the request is re-issued if no outcome arrived.
    pub timeout_at: DateTime<Utc>,
}

/// Data for ReservationDispatchFailed event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReservationDispatchFailedData {
    pub sku_id: SkuId,
    pub request_id: RequestId,
    pub attempt: u32,
    pub error: String,
}

/// Data for events that settle one SKU line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReservationOutcomeData {
    pub sku_id: SkuId,
    pub request_id: RequestId,
}

/// Data for ReservationRejected event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReservationRejectedData {
    pub sku_id: SkuId,
    pub request_id: RequestId,
    pub reason: ReservationFailureReason,
}

/// What made the saga start compensating.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum CompensationReason {
    ReservationRejected {
        sku_id: SkuId,
        reason: ReservationFailureReason,
    },
    DeadlineExceeded,
    /// The order was cancelled by someone other than the saga.
    OrderCancelledExternally,
    /// A reservation command was refused outright by the inventory context.
    DispatchRejected {
        error: String,
    },
}

impl CompensationReason {
    /// Whether the resulting cancellation is flagged as a timeout.
    pub fn timed_out(&self) -> bool {
        matches!(self, CompensationReason::DeadlineExceeded)
    }

    /// Reason carried on the CancelOrder command.
    pub fn describe(&self) -> String {
        match self {
            CompensationReason::ReservationRejected { sku_id, reason } => {
                format!("reservation of {sku_id} failed: {reason}")
            }
            CompensationReason::DeadlineExceeded => "reservation deadline exceeded".to_string(),
            CompensationReason::OrderCancelledExternally => "order cancelled".to_string(),
            CompensationReason::DispatchRejected { error } => {
                format!("reservation refused: {error}")
            }
        }
    }
}

/// Data for CompensationStarted event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompensationStartedData {
    pub reason: CompensationReason,
    pub started_at: DateTime<Utc>,
}

/// Data for CompensationAttempted event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompensationAttemptedData {
    pub step: Step,
    /// Set for stock releases.
    pub sku_id: Option<SkuId>,
    pub request_id: RequestId,
    pub attempt: u32,
    /// None when the attempt succeeded.
    pub error: Option<String>,
}

/// Data for CancellationAcknowledged event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CancellationAcknowledgedData {
    pub request_id: RequestId,
}

/// Data for SagaCompleted and SagaCompensated events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SagaFinishedData {
    pub finished_at: DateTime<Utc>,
}

/// Data for SagaFailed event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SagaFailedData {
    pub last_error: String,
    pub failed_at: DateTime<Utc>,
}

// Convenience constructors
impl SagaEvent {
    pub fn saga_started(
        order_id: OrderId,
        lines: Vec<SagaLine>,
        started_at: DateTime<Utc>,
        deadline_at: DateTime<Utc>,
    ) -> Self {
        SagaEvent::SagaStarted(SagaStartedData {
            saga_id: SagaId::from(order_id),
            order_id,
            lines,
            started_at,
            deadline_at,
        })
    }

    pub fn reservation_requested(
        order_id: OrderId,
        line: &SagaLine,
        attempt: u32,
        timeout_at: DateTime<Utc>,
    ) -> Self {
        SagaEvent::ReservationRequested(ReservationRequestedData {
            sku_id: line.sku_id.clone(),
            request_id: RequestId::for_reservation(order_id, &line.sku_id),
            quantity: line.quantity,
            attempt,
            timeout_at,
        })
    }

    pub fn reservation_dispatch_failed(
        sku_id: SkuId,
        request_id: RequestId,
        attempt: u32,
        error: impl Into<String>,
    ) -> Self {
        SagaEvent::ReservationDispatchFailed(ReservationDispatchFailedData {
            sku_id,
            request_id,
            attempt,
            error: error.into(),
        })
    }

    pub fn reservation_confirmed(sku_id: SkuId, request_id: RequestId) -> Self {
        SagaEvent::ReservationConfirmed(ReservationOutcomeData { sku_id, request_id })
    }

    pub fn reservation_rejected(
        sku_id: SkuId,
        request_id: RequestId,
        reason: ReservationFailureReason,
    ) -> Self {
        SagaEvent::ReservationRejected(ReservationRejectedData {
            sku_id,
            request_id,
            reason,
        })
    }

    pub fn compensation_started(reason: CompensationReason, started_at: DateTime<Utc>) -> Self {
        SagaEvent::CompensationStarted(CompensationStartedData { reason, started_at })
    }

    pub fn compensation_attempted(
        step: Step,
        sku_id: Option<SkuId>,
        request_id: RequestId,
        attempt: u32,
        error: Option<String>,
    ) -> Self {
        SagaEvent::CompensationAttempted(CompensationAttemptedData {
            step,
            sku_id,
            request_id,
            attempt,
            error,
        })
    }

    pub fn cancellation_acknowledged(request_id: RequestId) -> Self {
        SagaEvent::CancellationAcknowledged(CancellationAcknowledgedData { request_id })
    }

    pub fn stock_release_acknowledged(sku_id: SkuId, request_id: RequestId) -> Self {
        SagaEvent::StockReleaseAcknowledged(ReservationOutcomeData { sku_id, request_id })
    }

    pub fn saga_completed(finished_at: DateTime<Utc>) -> Self {
        SagaEvent::SagaCompleted(SagaFinishedData { finished_at })
    }

    pub fn saga_compensated(finished_at: DateTime<Utc>) -> Self {
        SagaEvent::SagaCompensated(SagaFinishedData { finished_at })
    }

    pub fn saga_failed(last_error: impl Into<String>, failed_at: DateTime<Utc>) -> Self {
        SagaEvent::SagaFailed(SagaFailedData {
            last_error: last_error.into(),
            failed_at,
        })
    }
}
