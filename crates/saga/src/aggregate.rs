//! Saga instance aggregate.

use chrono::{DateTime, TimeDelta, Utc};
use contracts::{
    AggregateId, CancelOrder, Command, OrderCancelled, OrderId, OrderPlaced, ReleaseStock,
    RequestId, ReserveStock, SagaId, SkuId, StockReleased, StockReservationFailed, StockReserved,
    coalesce_line_items,
};
use domain::Aggregate;
use event_store::Version;
use serde::{Deserialize, Serialize};

use crate::config::SagaConfig;
use crate::error::SagaError;
use crate::events::{CompensationReason, SagaEvent, SagaLine};
use crate::state::{LineStatus, SagaState};

/// Reservation progress for one SKU of the order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineTrack {
    pub sku_id: SkuId,
    pub quantity: u32,
    /// Deterministic key shared by every delivery of this reservation.
    pub request_id: RequestId,
    pub status: LineStatus,
    /// ReserveStock deliveries so far.
    pub attempts: u32,
    /// When an unanswered request is due for re-issue.
    pub timeout_at: Option<DateTime<Utc>>,
}

impl LineTrack {
    fn line(&self) -> SagaLine {
        SagaLine {
            sku_id: self.sku_id.clone(),
            quantity: self.quantity,
        }
    }

    fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == LineStatus::Requested && self.timeout_at.is_some_and(|at| now >= at)
    }
}

/// An event-sourced order saga.
///
/// The decision methods (`start`, `on_*`) never touch the state: they
/// return the events to record and the manager folds them in after the
/// append. Commands to issue are derived from the state afterwards, so a
/// saga rebuilt from its stream after a crash issues the same commands
/// with the same request IDs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SagaInstance {
    id: Option<AggregateId>,
    version: Version,
    saga_id: Option<SagaId>,
    order_id: Option<OrderId>,
    state: SagaState,
    lines: Vec<LineTrack>,
    started_at: Option<DateTime<Utc>>,
    deadline_at: Option<DateTime<Utc>>,
    compensation_reason: Option<CompensationReason>,
    cancellation_acknowledged: bool,
    retry_count: u32,
    last_error: Option<String>,
    finished_at: Option<DateTime<Utc>>,
}

impl Aggregate for SagaInstance {
    type Event = SagaEvent;
    type Error = SagaError;

    fn aggregate_type() -> &'static str {
        "OrderSaga"
    }

    fn id(&self) -> Option<AggregateId> {
        self.id
    }

    fn version(&self) -> Version {
        self.version
    }

    fn set_version(&mut self, version: Version) {
        self.version = version;
    }

    fn apply(&mut self, event: Self::Event) {
        match event {
            SagaEvent::SagaStarted(data) => {
                self.id = Some(data.saga_id.stream_id());
                self.saga_id = Some(data.saga_id);
                self.order_id = Some(data.order_id);
                self.lines = data
                    .lines
                    .into_iter()
                    .map(|line| LineTrack {
                        request_id: RequestId::for_reservation(data.order_id, &line.sku_id),
                        sku_id: line.sku_id,
                        quantity: line.quantity,
                        status: LineStatus::Requested,
                        attempts: 0,
                        timeout_at: None,
                    })
                    .collect();
                self.started_at = Some(data.started_at);
                self.deadline_at = Some(data.deadline_at);
                self.state = SagaState::Started;
            }
            SagaEvent::ReservationRequested(data) => {
                if let Some(track) = self.line_mut(&data.sku_id) {
                    track.attempts = data.attempt;
                    track.timeout_at = Some(data.timeout_at);
                }
                if self.state == SagaState::Started {
                    self.state = SagaState::ReservationRequested;
                }
            }
            SagaEvent::ReservationDispatchFailed(data) => {
                self.last_error = Some(data.error);
            }
            SagaEvent::ReservationConfirmed(data) => {
                if let Some(track) = self.line_mut(&data.sku_id) {
                    track.status = LineStatus::Reserved;
                    track.timeout_at = None;
                }
            }
            SagaEvent::ReservationRejected(data) => {
                if let Some(track) = self.line_mut(&data.sku_id) {
                    track.status = LineStatus::Rejected;
                    track.timeout_at = None;
                }
            }
            SagaEvent::CompensationStarted(data) => {
                self.state = SagaState::Compensating;
                self.compensation_reason = Some(data.reason);
            }
            SagaEvent::CompensationAttempted(data) => {
                if data.attempt > 1 {
                    self.retry_count += 1;
                }
                if let Some(error) = data.error {
                    self.last_error = Some(error);
                }
            }
            SagaEvent::CancellationAcknowledged(_) => {
                self.cancellation_acknowledged = true;
            }
            SagaEvent::StockReleaseAcknowledged(data) => {
                if let Some(track) = self.line_mut(&data.sku_id) {
                    track.status = LineStatus::Released;
                }
            }
            SagaEvent::SagaCompleted(data) => {
                self.state = SagaState::Completed;
                self.finished_at = Some(data.finished_at);
            }
            SagaEvent::SagaCompensated(data) => {
                self.state = SagaState::Compensated;
                self.finished_at = Some(data.finished_at);
            }
            SagaEvent::SagaFailed(data) => {
                self.state = SagaState::Failed;
                self.last_error = Some(data.last_error);
                self.finished_at = Some(data.failed_at);
            }
        }
    }
}

// Decisions
impl SagaInstance {
    /// Starts the saga for a placed order: one reservation per distinct SKU.
    ///
    /// A redelivered OrderPlaced records nothing.
    pub fn start(
        &self,
        placed: &OrderPlaced,
        now: DateTime<Utc>,
        config: &SagaConfig,
    ) -> Vec<SagaEvent> {
        if self.is_started() {
            return Vec::new();
        }

        // Placed orders passed validation, so this only trips on a corrupt event.
        let Ok(totals) = coalesce_line_items(&placed.line_items) else {
            tracing::warn!(order_id = %placed.order_id, "placed order has an overflowing quantity");
            return Vec::new();
        };
        let lines: Vec<SagaLine> = totals
            .into_iter()
            .map(|(sku_id, quantity)| SagaLine { sku_id, quantity })
            .collect();
        let deadline_at = later(now, config.pending_deadline_delta());
        let timeout_at = later(now, config.reservation_timeout_delta());

        let requests: Vec<SagaEvent> = lines
            .iter()
            .map(|line| SagaEvent::reservation_requested(placed.order_id, line, 1, timeout_at))
            .collect();

        let mut events = vec![SagaEvent::saga_started(
            placed.order_id,
            lines,
            now,
            deadline_at,
        )];
        events.extend(requests);
        events
    }

    pub fn on_stock_reserved(&self, event: &StockReserved, now: DateTime<Utc>) -> Vec<SagaEvent> {
        if !self.awaits_outcome(&event.sku_id, event.request_id) {
            return Vec::new();
        }
        self.settle(
            vec![SagaEvent::reservation_confirmed(
                event.sku_id.clone(),
                event.request_id,
            )],
            now,
        )
    }

    /// A refused reservation is a business outcome: it starts compensation
    /// and is never retried.
    pub fn on_reservation_failed(
        &self,
        event: &StockReservationFailed,
        now: DateTime<Utc>,
    ) -> Vec<SagaEvent> {
        if !self.awaits_outcome(&event.sku_id, event.request_id) {
            return Vec::new();
        }

        let mut events = vec![SagaEvent::reservation_rejected(
            event.sku_id.clone(),
            event.request_id,
            event.reason,
        )];
        if self.state.can_compensate() {
            events.push(SagaEvent::compensation_started(
                CompensationReason::ReservationRejected {
                    sku_id: event.sku_id.clone(),
                    reason: event.reason,
                },
                now,
            ));
        }
        self.settle(events, now)
    }

    /// An observed cancellation acknowledges the compensating CancelOrder.
    /// If the saga was not compensating yet, someone else cancelled the
    /// order and the saga still has reserved stock to give back.
    pub fn on_order_cancelled(&self, event: &OrderCancelled, now: DateTime<Utc>) -> Vec<SagaEvent> {
        if !self.is_started() || self.state.is_terminal() || self.cancellation_acknowledged {
            return Vec::new();
        }

        let mut events = Vec::with_capacity(2);
        if self.state.can_compensate() {
            events.push(SagaEvent::compensation_started(
                CompensationReason::OrderCancelledExternally,
                now,
            ));
        }
        events.push(SagaEvent::cancellation_acknowledged(event.request_id));
        self.settle(events, now)
    }

    pub fn on_stock_released(&self, event: &StockReleased, now: DateTime<Utc>) -> Vec<SagaEvent> {
        let Some(order_id) = self.order_id else {
            return Vec::new();
        };
        let Some(track) = self.line(&event.sku_id) else {
            return Vec::new();
        };
        if self.state != SagaState::Compensating
            || track.status != LineStatus::Reserved
            || event.request_id != RequestId::for_release(order_id, &event.sku_id)
        {
            return Vec::new();
        }
        self.settle(
            vec![SagaEvent::stock_release_acknowledged(
                event.sku_id.clone(),
                event.request_id,
            )],
            now,
        )
    }

    /// Acts on expired timers.
    ///
    /// While waiting for reservations, a line past its timeout is re-issued
    /// with the same request ID, and passing the pending deadline starts
    /// compensation. While compensating, unresolved lines keep being
    /// re-issued until `max_reservation_attempts`, then the saga fails.
    pub fn on_timeout(&self, now: DateTime<Utc>, config: &SagaConfig) -> Vec<SagaEvent> {
        match self.state {
            SagaState::Started | SagaState::ReservationRequested => {
                if self.deadline_at.is_some_and(|deadline| now >= deadline) {
                    return vec![SagaEvent::compensation_started(
                        CompensationReason::DeadlineExceeded,
                        now,
                    )];
                }
                self.reissue_due(now, config)
            }
            SagaState::Compensating => {
                if let Some(stuck) = self
                    .lines
                    .iter()
                    .find(|t| t.is_due(now) && t.attempts >= config.max_reservation_attempts)
                {
                    return vec![SagaEvent::saga_failed(
                        format!(
                            "reservation of {} unresolved after {} attempts",
                            stuck.sku_id, stuck.attempts
                        ),
                        now,
                    )];
                }
                self.reissue_due(now, config)
            }
            SagaState::Completed | SagaState::Compensated | SagaState::Failed => Vec::new(),
        }
    }

    /// Compensating commands still owed: CancelOrder until acknowledged,
    /// then ReleaseStock for every line that is still reserved.
    pub fn compensation_plan(&self) -> Vec<Command> {
        let Some(order_id) = self.order_id else {
            return Vec::new();
        };
        if self.state != SagaState::Compensating {
            return Vec::new();
        }

        let mut plan = Vec::new();
        if !self.cancellation_acknowledged {
            let reason = self
                .compensation_reason
                .clone()
                .unwrap_or(CompensationReason::OrderCancelledExternally);
            plan.push(CancelOrder::for_order(order_id, reason.describe(), reason.timed_out()).into());
        }
        plan.extend(
            self.lines
                .iter()
                .filter(|t| t.status == LineStatus::Reserved)
                .map(|t| ReleaseStock::for_order(order_id, t.sku_id.clone(), t.quantity).into()),
        );
        plan
    }

    /// ReserveStock commands whose outcome is still unknown.
    pub fn outstanding_reservations(&self) -> Vec<ReserveStock> {
        let Some(order_id) = self.order_id else {
            return Vec::new();
        };
        if self.state.is_terminal() {
            return Vec::new();
        }
        self.lines
            .iter()
            .filter(|t| t.status == LineStatus::Requested)
            .map(|t| ReserveStock::for_order(order_id, t.sku_id.clone(), t.quantity))
            .collect()
    }

    /// Terminal event owed by the current state, if any.
    pub fn completion_event(&self, now: DateTime<Utc>) -> Option<SagaEvent> {
        match self.state {
            SagaState::ReservationRequested
                if !self.lines.is_empty()
                    && self.lines.iter().all(|t| t.status == LineStatus::Reserved) =>
            {
                Some(SagaEvent::saga_completed(now))
            }
            SagaState::Compensating
                if self.cancellation_acknowledged
                    && self.lines.iter().all(|t| t.status.is_settled()) =>
            {
                Some(SagaEvent::saga_compensated(now))
            }
            _ => None,
        }
    }

    /// Earliest instant at which `on_timeout` has something to do.
    pub fn next_wakeup(&self) -> Option<DateTime<Utc>> {
        let timers = self
            .lines
            .iter()
            .filter(|t| t.status == LineStatus::Requested)
            .filter_map(|t| t.timeout_at);
        match self.state {
            SagaState::Started | SagaState::ReservationRequested => {
                timers.chain(self.deadline_at).min()
            }
            SagaState::Compensating => timers.min(),
            SagaState::Completed | SagaState::Compensated | SagaState::Failed => None,
        }
    }

    fn awaits_outcome(&self, sku_id: &SkuId, request_id: RequestId) -> bool {
        !self.state.is_terminal()
            && self
                .line(sku_id)
                .is_some_and(|t| t.request_id == request_id && t.status == LineStatus::Requested)
    }

    fn reissue_due(&self, now: DateTime<Utc>, config: &SagaConfig) -> Vec<SagaEvent> {
        let Some(order_id) = self.order_id else {
            return Vec::new();
        };
        let timeout_at = later(now, config.reservation_timeout_delta());
        self.lines
            .iter()
            .filter(|t| t.is_due(now))
            .map(|t| SagaEvent::reservation_requested(order_id, &t.line(), t.attempts + 1, timeout_at))
            .collect()
    }

    /// Appends the terminal event the state reaches after `events`, if any.
    fn settle(&self, mut events: Vec<SagaEvent>, now: DateTime<Utc>) -> Vec<SagaEvent> {
        let mut projected = self.clone();
        projected.apply_events(events.iter().cloned());
        if let Some(done) = projected.completion_event(now) {
            events.push(done);
        }
        events
    }

    fn line_mut(&mut self, sku_id: &SkuId) -> Option<&mut LineTrack> {
        self.lines.iter_mut().find(|t| &t.sku_id == sku_id)
    }
}

// Query methods
impl SagaInstance {
    pub fn is_started(&self) -> bool {
        self.saga_id.is_some()
    }

    pub fn saga_id(&self) -> Option<SagaId> {
        self.saga_id
    }

    pub fn order_id(&self) -> Option<OrderId> {
        self.order_id
    }

    pub fn state(&self) -> SagaState {
        self.state
    }

    pub fn lines(&self) -> &[LineTrack] {
        &self.lines
    }

    pub fn line(&self, sku_id: &SkuId) -> Option<&LineTrack> {
        self.lines.iter().find(|t| &t.sku_id == sku_id)
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn deadline_at(&self) -> Option<DateTime<Utc>> {
        self.deadline_at
    }

    pub fn compensation_reason(&self) -> Option<&CompensationReason> {
        self.compensation_reason.as_ref()
    }

    pub fn cancellation_acknowledged(&self) -> bool {
        self.cancellation_acknowledged
    }

    /// Re-deliveries of compensating commands so far.
    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.finished_at
    }
}

fn later(now: DateTime<Utc>, delta: TimeDelta) -> DateTime<Utc> {
    now.checked_add_signed(delta)
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{CustomerId, LineItem, Money, ReservationFailureReason};

    fn placed(lines: &[(&str, u32)]) -> OrderPlaced {
        OrderPlaced {
            order_id: OrderId::new(),
            customer_id: CustomerId::new("CUST-001"),
            line_items: lines
                .iter()
                .map(|(sku, qty)| LineItem::new(*sku, *qty, Money::from_cents(1000)))
                .collect(),
        }
    }

    fn started(lines: &[(&str, u32)], now: DateTime<Utc>) -> (SagaInstance, OrderId) {
        let event = placed(lines);
        let mut saga = SagaInstance::default();
        saga.apply_events(saga.start(&event, now, &SagaConfig::default()));
        (saga, event.order_id)
    }

    fn reserved(order_id: OrderId, sku: &str, quantity: u32) -> StockReserved {
        let sku_id = SkuId::new(sku);
        StockReserved {
            order_id,
            request_id: RequestId::for_reservation(order_id, &sku_id),
            sku_id,
            quantity,
        }
    }

    fn failed(order_id: OrderId, sku: &str, quantity: u32) -> StockReservationFailed {
        let sku_id = SkuId::new(sku);
        StockReservationFailed {
            order_id,
            request_id: RequestId::for_reservation(order_id, &sku_id),
            sku_id,
            quantity,
            reason: ReservationFailureReason::InsufficientStock,
        }
    }

    fn cancelled(order_id: OrderId) -> OrderCancelled {
        OrderCancelled {
            order_id,
            request_id: RequestId::for_cancellation(order_id),
            reason: "InsufficientStock".into(),
            timed_out: false,
        }
    }

    fn released(order_id: OrderId, sku: &str, quantity: u32) -> StockReleased {
        let sku_id = SkuId::new(sku);
        StockReleased {
            order_id,
            request_id: RequestId::for_release(order_id, &sku_id),
            sku_id,
            quantity,
        }
    }

    fn step(
        saga: &mut SagaInstance,
        decide: impl FnOnce(&SagaInstance) -> Vec<SagaEvent>,
    ) -> Vec<&'static str> {
        let events = decide(saga);
        let types = events.iter().map(|e| domain::DomainEvent::event_type(e)).collect();
        saga.apply_events(events);
        types
    }

    #[test]
    fn test_default_saga_instance() {
        let saga = SagaInstance::default();
        assert!(saga.id().is_none());
        assert!(!saga.is_started());
        assert_eq!(saga.state(), SagaState::Started);
        assert!(saga.compensation_plan().is_empty());
        assert!(saga.next_wakeup().is_none());
    }

    #[test]
    fn test_start_requests_one_reservation_per_sku() {
        let now = Utc::now();
        let (saga, order_id) = started(&[("A", 1), ("B", 2), ("A", 3)], now);

        assert_eq!(saga.state(), SagaState::ReservationRequested);
        assert_eq!(saga.saga_id(), Some(SagaId::from(order_id)));
        assert_eq!(saga.id(), Some(SagaId::from(order_id).stream_id()));
        assert_eq!(saga.lines().len(), 2);

        let a = saga.line(&SkuId::new("A")).unwrap();
        assert_eq!(a.quantity, 4);
        assert_eq!(a.attempts, 1);
        assert_eq!(a.request_id, RequestId::for_reservation(order_id, &SkuId::new("A")));
        assert_eq!(a.timeout_at, Some(now + TimeDelta::seconds(5)));
        assert_eq!(saga.deadline_at(), Some(now + TimeDelta::seconds(15)));
        assert_eq!(saga.next_wakeup(), Some(now + TimeDelta::seconds(5)));
    }

    #[test]
    fn test_duplicate_order_placed_is_ignored() {
        let now = Utc::now();
        let event = placed(&[("A", 1)]);
        let mut saga = SagaInstance::default();
        saga.apply_events(saga.start(&event, now, &SagaConfig::default()));

        assert!(saga.start(&event, now, &SagaConfig::default()).is_empty());
    }

    #[test]
    fn test_all_reserved_completes() {
        let now = Utc::now();
        let (mut saga, order_id) = started(&[("A", 1), ("B", 1)], now);

        let types = step(&mut saga, |s| s.on_stock_reserved(&reserved(order_id, "A", 1), now));
        assert_eq!(types, vec!["ReservationConfirmed"]);
        assert_eq!(saga.state(), SagaState::ReservationRequested);

        let types = step(&mut saga, |s| s.on_stock_reserved(&reserved(order_id, "B", 1), now));
        assert_eq!(types, vec!["ReservationConfirmed", "SagaCompleted"]);
        assert_eq!(saga.state(), SagaState::Completed);
        assert!(saga.next_wakeup().is_none());
    }

    #[test]
    fn test_duplicate_outcome_records_nothing() {
        let now = Utc::now();
        let (mut saga, order_id) = started(&[("A", 1), ("B", 1)], now);
        let outcome = reserved(order_id, "A", 1);
        step(&mut saga, |s| s.on_stock_reserved(&outcome, now));

        assert!(saga.on_stock_reserved(&outcome, now).is_empty());
    }

    #[test]
    fn test_outcome_with_foreign_request_id_is_ignored() {
        let now = Utc::now();
        let (saga, order_id) = started(&[("A", 1)], now);
        let mut outcome = reserved(order_id, "A", 1);
        outcome.request_id = RequestId::for_reservation(OrderId::new(), &SkuId::new("A"));

        assert!(saga.on_stock_reserved(&outcome, now).is_empty());
    }

    #[test]
    fn test_rejection_starts_compensation() {
        let now = Utc::now();
        let (mut saga, order_id) = started(&[("A", 20)], now);

        let types = step(&mut saga, |s| s.on_reservation_failed(&failed(order_id, "A", 20), now));
        assert_eq!(types, vec!["ReservationRejected", "CompensationStarted"]);
        assert_eq!(saga.state(), SagaState::Compensating);

        let plan = saga.compensation_plan();
        assert_eq!(plan.len(), 1);
        match &plan[0] {
            Command::CancelOrder(cmd) => {
                assert_eq!(cmd.request_id, RequestId::for_cancellation(order_id));
                assert!(!cmd.timed_out);
                assert!(cmd.reason.contains("InsufficientStock"));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_compensation_releases_reserved_lines() {
        let now = Utc::now();
        let (mut saga, order_id) = started(&[("A", 1), ("B", 5)], now);
        step(&mut saga, |s| s.on_stock_reserved(&reserved(order_id, "A", 1), now));
        step(&mut saga, |s| s.on_reservation_failed(&failed(order_id, "B", 5), now));

        let plan: Vec<_> = saga.compensation_plan().iter().map(|c| c.name()).collect();
        assert_eq!(plan, vec!["CancelOrder", "ReleaseStock"]);

        let types = step(&mut saga, |s| s.on_order_cancelled(&cancelled(order_id), now));
        assert_eq!(types, vec!["CancellationAcknowledged"]);
        assert_eq!(saga.state(), SagaState::Compensating);

        let types = step(&mut saga, |s| s.on_stock_released(&released(order_id, "A", 1), now));
        assert_eq!(types, vec!["StockReleaseAcknowledged", "SagaCompensated"]);
        assert_eq!(saga.state(), SagaState::Compensated);
        assert!(saga.compensation_plan().is_empty());
    }

    #[test]
    fn test_late_reservation_during_compensation_is_released() {
        let now = Utc::now();
        let (mut saga, order_id) = started(&[("A", 1), ("B", 5)], now);
        step(&mut saga, |s| s.on_reservation_failed(&failed(order_id, "B", 5), now));
        step(&mut saga, |s| s.on_order_cancelled(&cancelled(order_id), now));
        assert_eq!(saga.state(), SagaState::Compensating);

        let types = step(&mut saga, |s| s.on_stock_reserved(&reserved(order_id, "A", 1), now));
        assert_eq!(types, vec!["ReservationConfirmed"]);

        let plan: Vec<_> = saga.compensation_plan().iter().map(|c| c.name()).collect();
        assert_eq!(plan, vec!["ReleaseStock"]);
    }

    #[test]
    fn test_timeout_reissues_same_request() {
        let now = Utc::now();
        let config = SagaConfig::default();
        let (mut saga, order_id) = started(&[("A", 1)], now);

        assert!(saga.on_timeout(now + TimeDelta::seconds(1), &config).is_empty());

        let later = now + TimeDelta::seconds(6);
        let events = saga.on_timeout(later, &config);
        assert_eq!(events.len(), 1);
        match &events[0] {
            SagaEvent::ReservationRequested(data) => {
                assert_eq!(data.attempt, 2);
                assert_eq!(
                    data.request_id,
                    RequestId::for_reservation(order_id, &SkuId::new("A"))
                );
                assert_eq!(data.timeout_at, later + TimeDelta::seconds(5));
            }
            other => panic!("unexpected event {other:?}"),
        }
        saga.apply_events(events);
        assert_eq!(saga.state(), SagaState::ReservationRequested);
        assert_eq!(saga.line(&SkuId::new("A")).unwrap().attempts, 2);
    }

    #[test]
    fn test_deadline_starts_timed_out_compensation() {
        let now = Utc::now();
        let config = SagaConfig::default();
        let (mut saga, order_id) = started(&[("A", 1)], now);

        let types = step(&mut saga, |s| s.on_timeout(now + TimeDelta::seconds(15), &config));
        assert_eq!(types, vec!["CompensationStarted"]);
        assert_eq!(
            saga.compensation_reason(),
            Some(&CompensationReason::DeadlineExceeded)
        );

        match &saga.compensation_plan()[0] {
            Command::CancelOrder(cmd) => {
                assert!(cmd.timed_out);
                assert_eq!(cmd.order_id, order_id);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_unresolved_line_fails_after_attempt_budget() {
        let now = Utc::now();
        let config = SagaConfig {
            max_reservation_attempts: 2,
            ..SagaConfig::default()
        };
        let (mut saga, order_id) = started(&[("A", 1), ("B", 1)], now);
        step(&mut saga, |s| s.on_reservation_failed(&failed(order_id, "B", 1), now));
        step(&mut saga, |s| s.on_order_cancelled(&cancelled(order_id), now));

        // Line A is still unanswered: one re-issue, then give up.
        let t1 = now + TimeDelta::seconds(6);
        let types = step(&mut saga, |s| s.on_timeout(t1, &config));
        assert_eq!(types, vec!["ReservationRequested"]);

        let t2 = t1 + TimeDelta::seconds(6);
        let types = step(&mut saga, |s| s.on_timeout(t2, &config));
        assert_eq!(types, vec!["SagaFailed"]);
        assert_eq!(saga.state(), SagaState::Failed);
        assert!(saga.last_error().unwrap().contains("unresolved"));
    }

    #[test]
    fn test_external_cancellation_compensates_reserved_stock() {
        let now = Utc::now();
        let (mut saga, order_id) = started(&[("A", 1), ("B", 1)], now);
        step(&mut saga, |s| s.on_stock_reserved(&reserved(order_id, "A", 1), now));

        let types = step(&mut saga, |s| s.on_order_cancelled(&cancelled(order_id), now));
        assert_eq!(types, vec!["CompensationStarted", "CancellationAcknowledged"]);

        let plan: Vec<_> = saga.compensation_plan().iter().map(|c| c.name()).collect();
        assert_eq!(plan, vec!["ReleaseStock"]);
    }

    #[test]
    fn test_compensation_attempts_track_retries() {
        let now = Utc::now();
        let (mut saga, order_id) = started(&[("A", 1)], now);
        let request_id = RequestId::for_cancellation(order_id);
        saga.apply_events(vec![
            SagaEvent::compensation_attempted(
                contracts::Step::CancelOrder,
                None,
                request_id,
                1,
                Some("unavailable".into()),
            ),
            SagaEvent::compensation_attempted(contracts::Step::CancelOrder, None, request_id, 2, None),
        ]);

        assert_eq!(saga.retry_count(), 1);
        assert_eq!(saga.last_error(), Some("unavailable"));
    }

    #[test]
    fn test_terminal_saga_ignores_everything() {
        let now = Utc::now();
        let config = SagaConfig::default();
        let (mut saga, order_id) = started(&[("A", 1)], now);
        step(&mut saga, |s| s.on_stock_reserved(&reserved(order_id, "A", 1), now));
        assert_eq!(saga.state(), SagaState::Completed);

        assert!(saga.on_reservation_failed(&failed(order_id, "A", 1), now).is_empty());
        assert!(saga.on_order_cancelled(&cancelled(order_id), now).is_empty());
        assert!(saga.on_timeout(now + TimeDelta::hours(1), &config).is_empty());
        assert!(saga.outstanding_reservations().is_empty());
    }
}
