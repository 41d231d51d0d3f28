//! The order saga process manager.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use contracts::{Command, IntegrationEvent, ReserveStock, SagaId, Step};
use domain::{Aggregate, DomainEvent, KeyedLocks};
use event_store::{AppendOptions, EventEnvelope, EventStore};
use tokio::sync::{Mutex, RwLock};

use crate::aggregate::SagaInstance;
use crate::bus::{CommandBus, DispatchError};
use crate::clock::Clock;
use crate::config::SagaConfig;
use crate::error::Result;
use crate::events::{CompensationReason, SagaEvent};
use crate::retry::RetryOutcome;
use crate::state::SagaState;

/// Summary of a [`OrderSagaManager::recover`] run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Sagas that were still in flight and have been resumed.
    pub resumed: usize,
    /// Sagas found in Failed, listed for operators.
    pub failed: usize,
    /// Completed or Compensated sagas, left archived.
    pub archived: usize,
}

/// Drives every order saga.
///
/// Each saga is event-sourced in its own stream and handled under a
/// per-saga lock, so the events of one order are processed strictly one
/// at a time while different orders proceed in parallel. Between events a
/// saga holds no task or thread: it is a stream plus, for sagas still in
/// flight, an entry in the in-memory timer index.
///
/// Event handling never waits on a retry backoff. A saga that reaches
/// Compensating reports it, and its compensating commands are delivered
/// by [`Self::compensate`], which the caller runs wherever a backoff may
/// block without holding up other orders.
pub struct OrderSagaManager<S, B>
where
    S: EventStore,
    B: CommandBus,
{
    store: S,
    bus: B,
    clock: Arc<dyn Clock>,
    config: SagaConfig,
    locks: KeyedLocks<SagaId>,
    /// In-flight sagas and their next timer.
    active: RwLock<HashMap<SagaId, Option<DateTime<Utc>>>>,
    failed: RwLock<BTreeSet<SagaId>>,
    /// Sagas with a running compensation driver.
    compensating: Mutex<HashSet<SagaId>>,
}

impl<S, B> OrderSagaManager<S, B>
where
    S: EventStore,
    B: CommandBus,
{
    pub fn new(store: S, bus: B, clock: Arc<dyn Clock>, config: SagaConfig) -> Self {
        Self {
            store,
            bus,
            clock,
            config,
            locks: KeyedLocks::new(),
            active: RwLock::new(HashMap::new()),
            failed: RwLock::new(BTreeSet::new()),
            compensating: Mutex::new(HashSet::new()),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &SagaConfig {
        &self.config
    }

    /// Feeds one integration event to the saga of its order.
    ///
    /// Returns the saga's state afterwards, or None if the order has no
    /// saga (an outcome for an order this process never saw placed). A
    /// saga left in Compensating is waiting for [`Self::compensate`].
    #[tracing::instrument(skip(self, event), fields(order_id = %event.order_id(), event = event.event_type()))]
    pub async fn handle_event(&self, event: &IntegrationEvent) -> Result<Option<SagaState>> {
        let saga_id = SagaId::from(event.order_id());
        let _guard = self.locks.lock(saga_id).await;

        let mut saga = self.load(saga_id).await?;
        let now = self.clock.now();
        let events = match event {
            IntegrationEvent::OrderPlaced(placed) => saga.start(placed, now, &self.config),
            IntegrationEvent::StockReserved(reserved) => saga.on_stock_reserved(reserved, now),
            IntegrationEvent::StockReservationFailed(failed) => {
                saga.on_reservation_failed(failed, now)
            }
            IntegrationEvent::OrderCancelled(cancelled) => saga.on_order_cancelled(cancelled, now),
            IntegrationEvent::StockReleased(released) => saga.on_stock_released(released, now),
        };

        if !saga.is_started() && events.is_empty() {
            tracing::debug!("no saga for order, event ignored");
            return Ok(None);
        }

        self.process(saga_id, &mut saga, events).await?;
        Ok(Some(saga.state()))
    }

    /// Fires the saga's timers if any are due.
    #[tracing::instrument(skip(self), fields(%saga_id))]
    pub async fn on_timeout(&self, saga_id: SagaId) -> Result<Option<SagaState>> {
        let _guard = self.locks.lock(saga_id).await;

        let mut saga = self.load(saga_id).await?;
        if !saga.is_started() {
            return Ok(None);
        }

        let events = saga.on_timeout(self.clock.now(), &self.config);
        self.process(saga_id, &mut saga, events).await?;
        Ok(Some(saga.state()))
    }

    /// In-flight sagas whose next timer is at or before `now`.
    pub async fn due_sagas(&self, now: DateTime<Utc>) -> Vec<SagaId> {
        self.active
            .read()
            .await
            .iter()
            .filter(|(_, wakeup)| wakeup.is_some_and(|at| at <= now))
            .map(|(saga_id, _)| *saga_id)
            .collect()
    }

    /// Runs [`Self::on_timeout`] for every due saga, then drives the
    /// compensation of those left compensating. Returns how many fired.
    pub async fn fire_due_timeouts(&self) -> usize {
        let due = self.due_sagas(self.clock.now()).await;
        let mut fired = 0;
        for saga_id in due {
            let result = match self.on_timeout(saga_id).await {
                Ok(Some(SagaState::Compensating)) => self.compensate(saga_id).await.map(|_| ()),
                Ok(_) => Ok(()),
                Err(error) => Err(error),
            };
            match result {
                Ok(()) => fired += 1,
                Err(error) => tracing::error!(%saga_id, %error, "saga timeout failed"),
            }
        }
        fired
    }

    /// Delivers the compensating commands the saga still owes.
    ///
    /// Each command goes through the compensation retry policy with the
    /// saga lock released, so events for the order keep being recorded
    /// while a delivery backs off. The attempt log and the result are
    /// recorded under the lock once the command settles, and the plan is
    /// recomputed from the reloaded saga before the next command.
    ///
    /// Only one driver runs per saga. A call made while one is running
    /// returns `Ok(None)` at once: the running driver re-reads the plan
    /// under the lock, so it also delivers whatever the newer events added.
    #[tracing::instrument(skip(self), fields(%saga_id))]
    pub async fn compensate(&self, saga_id: SagaId) -> Result<Option<SagaState>> {
        if !self.compensating.lock().await.insert(saga_id) {
            tracing::debug!("compensation already running");
            return Ok(None);
        }

        let result = self.run_compensation(saga_id).await;
        if result.is_err() {
            self.compensating.lock().await.remove(&saga_id);
        }
        result
    }

    /// Rebuilds the active and failed indexes from the saga streams and
    /// resumes whatever the sagas still owe.
    ///
    /// Outstanding ReserveStock commands are sent again with their original
    /// request IDs and unfinished compensation is driven again. Both are
    /// absorbed downstream if they had already been applied.
    #[tracing::instrument(skip(self))]
    pub async fn recover(&self) -> Result<RecoveryReport> {
        let started = self.store.get_events_by_type("SagaStarted").await?;
        let mut report = RecoveryReport::default();
        let mut to_compensate = Vec::new();

        for envelope in started
            .iter()
            .filter(|e| e.aggregate_type == SagaInstance::aggregate_type())
        {
            let SagaEvent::SagaStarted(data) = envelope.decode::<SagaEvent>()? else {
                continue;
            };
            let saga_id = data.saga_id;
            let _guard = self.locks.lock(saga_id).await;
            let mut saga = self.load(saga_id).await?;

            match saga.state() {
                state if state.is_archivable() => report.archived += 1,
                SagaState::Failed => {
                    report.failed += 1;
                    self.track(&saga).await;
                }
                _ => {
                    report.resumed += 1;
                    for command in saga.outstanding_reservations() {
                        self.resend_reservation(command).await;
                    }
                    self.process(saga_id, &mut saga, Vec::new()).await?;
                    if saga.state() == SagaState::Compensating {
                        to_compensate.push(saga_id);
                    }
                }
            }
        }

        for saga_id in to_compensate {
            self.compensate(saga_id).await?;
        }

        tracing::info!(
            resumed = report.resumed,
            failed = report.failed,
            archived = report.archived,
            "saga recovery finished"
        );
        Ok(report)
    }

    /// Loads a saga. Returns None if the order never started one.
    pub async fn get_saga(&self, saga_id: SagaId) -> Result<Option<SagaInstance>> {
        let saga = self.load(saga_id).await?;
        Ok(saga.is_started().then_some(saga))
    }

    /// The saga's recorded events, oldest first.
    pub async fn history(&self, saga_id: SagaId) -> Result<Vec<EventEnvelope>> {
        Ok(self.store.load(saga_id.stream_id()).await?)
    }

    /// Sagas that are neither terminal nor failed.
    pub async fn active_sagas(&self) -> Vec<SagaId> {
        let mut active: Vec<SagaId> = self.active.read().await.keys().copied().collect();
        active.sort();
        active
    }

    /// Sagas waiting for an operator.
    pub async fn failed_sagas(&self) -> Vec<SagaId> {
        self.failed.read().await.iter().copied().collect()
    }

    async fn load(&self, saga_id: SagaId) -> Result<SagaInstance> {
        let envelopes = self.store.load(saga_id.stream_id()).await?;

        let mut saga = SagaInstance::default();
        for envelope in envelopes {
            let event: SagaEvent = envelope.decode()?;
            saga.apply(event);
            saga.set_version(envelope.version);
        }
        Ok(saga)
    }

    /// Records `events`, sends the reservations they request and settles
    /// the saga if it is done. Compensating commands are left to
    /// [`Self::compensate`].
    async fn process(
        &self,
        saga_id: SagaId,
        saga: &mut SagaInstance,
        events: Vec<SagaEvent>,
    ) -> Result<()> {
        let order_id = saga_id.order_id();
        let requests: Vec<ReserveStock> = events
            .iter()
            .filter_map(|event| match event {
                SagaEvent::ReservationRequested(data) => Some(ReserveStock::for_order(
                    order_id,
                    data.sku_id.clone(),
                    data.quantity,
                )),
                _ => None,
            })
            .collect();

        self.commit(saga_id, saga, events).await?;
        self.dispatch_reservations(saga_id, saga, requests).await?;

        if let Some(done) = saga.completion_event(self.clock.now()) {
            self.commit(saga_id, saga, vec![done]).await?;
        }

        self.track(saga).await;
        Ok(())
    }

    /// Sends freshly recorded ReserveStock requests.
    ///
    /// A transient failure is only noted: the line's timer re-issues the
    /// request. A refusal means the reservation can never be decided, so
    /// the saga compensates (or fails, if it already is).
    async fn dispatch_reservations(
        &self,
        saga_id: SagaId,
        saga: &mut SagaInstance,
        requests: Vec<ReserveStock>,
    ) -> Result<()> {
        for request in requests {
            if saga.state().is_terminal() {
                break;
            }
            let attempt = saga.line(&request.sku_id).map_or(1, |t| t.attempts);

            match self.bus.dispatch(request.clone().into()).await {
                Ok(()) => {}
                Err(DispatchError::Transient(error)) => {
                    let event = SagaEvent::reservation_dispatch_failed(
                        request.sku_id,
                        request.request_id,
                        attempt,
                        error,
                    );
                    self.commit(saga_id, saga, vec![event]).await?;
                }
                Err(DispatchError::Rejected(error)) => {
                    let now = self.clock.now();
                    let event = if saga.state().can_compensate() {
                        SagaEvent::compensation_started(
                            CompensationReason::DispatchRejected { error },
                            now,
                        )
                    } else {
                        SagaEvent::saga_failed(
                            format!("reservation of {} refused: {error}", request.sku_id),
                            now,
                        )
                    };
                    self.commit(saga_id, saga, vec![event]).await?;
                }
            }
        }
        Ok(())
    }

    async fn run_compensation(&self, saga_id: SagaId) -> Result<Option<SagaState>> {
        loop {
            let command = {
                let _guard = self.locks.lock(saga_id).await;
                let mut saga = self.load(saga_id).await?;
                match saga.compensation_plan().into_iter().next() {
                    Some(command) => command,
                    None => {
                        if let Some(done) = saga.completion_event(self.clock.now()) {
                            self.commit(saga_id, &mut saga, vec![done]).await?;
                        }
                        self.track(&saga).await;
                        // Cleared under the saga lock so no newer plan is missed.
                        self.compensating.lock().await.remove(&saga_id);
                        return Ok(saga.is_started().then_some(saga.state()));
                    }
                }
            };

            let (step, sku_id) = match &command {
                Command::CancelOrder(_) => (Step::CancelOrder, None),
                Command::ReleaseStock(cmd) => (Step::ReleaseStock, Some(cmd.sku_id.clone())),
                Command::ReserveStock(cmd) => (Step::ReserveStock, Some(cmd.sku_id.clone())),
            };
            let request_id = command.request_id();

            let report = self
                .config
                .compensation_retry
                .execute(request_id, step, |_| self.bus.dispatch(command.clone()))
                .await;

            let _guard = self.locks.lock(saga_id).await;
            let mut saga = self.load(saga_id).await?;

            let mut events: Vec<SagaEvent> = report
                .attempts
                .iter()
                .map(|attempt| {
                    SagaEvent::compensation_attempted(
                        step,
                        sku_id.clone(),
                        request_id,
                        attempt.attempt,
                        attempt.error.clone(),
                    )
                })
                .collect();

            // The outcome event may have been routed back while the lock was
            // free; then the command is settled and only the attempts remain.
            let still_owed = saga
                .compensation_plan()
                .iter()
                .any(|owed| owed.request_id() == request_id);
            if still_owed {
                let now = self.clock.now();
                match report.outcome {
                    RetryOutcome::Success(()) => events.extend(acknowledgement(&command)),
                    RetryOutcome::ExhaustedRetries { last_error } => {
                        events.push(SagaEvent::saga_failed(
                            format!("{} exhausted retries: {last_error}", command.name()),
                            now,
                        ));
                    }
                    RetryOutcome::Rejected { reason } => events.push(SagaEvent::saga_failed(
                        format!("{} rejected: {reason}", command.name()),
                        now,
                    )),
                }
            } else if saga.state().is_terminal() {
                // Finished while the command was in flight.
                events.clear();
            }

            self.commit(saga_id, &mut saga, events).await?;
        }
    }

    async fn resend_reservation(&self, command: ReserveStock) {
        let request_id = command.request_id;
        if let Err(error) = self.bus.dispatch(command.into()).await {
            tracing::warn!(%request_id, %error, "re-sending reservation failed");
        }
    }

    /// Appends events to the saga stream with the loaded version as the
    /// expectation, then folds them into `saga`.
    async fn commit(
        &self,
        saga_id: SagaId,
        saga: &mut SagaInstance,
        events: Vec<SagaEvent>,
    ) -> Result<()> {
        if events.is_empty() {
            return Ok(());
        }

        let current_version = saga.version();
        let mut version = current_version;
        let mut envelopes = Vec::with_capacity(events.len());
        for event in &events {
            version = version.next();
            envelopes.push(
                EventEnvelope::builder()
                    .event_type(event.event_type())
                    .aggregate_id(saga_id.stream_id())
                    .aggregate_type(SagaInstance::aggregate_type())
                    .version(version)
                    .payload(event)?
                    .build()?,
            );
        }

        let new_version = self
            .store
            .append(envelopes, AppendOptions::after(current_version))
            .await?;

        for event in &events {
            saga.apply(event.clone());
        }
        saga.set_version(new_version);

        for event in &events {
            observe(saga_id, saga, event);
        }
        Ok(())
    }

    /// Keeps the active and failed indexes in line with the saga's state.
    async fn track(&self, saga: &SagaInstance) {
        let Some(saga_id) = saga.saga_id() else {
            return;
        };

        let state = saga.state();
        if state.is_archivable() {
            if self.active.write().await.remove(&saga_id).is_some() {
                metrics::counter!("saga_archived_total").increment(1);
                tracing::info!(%saga_id, %state, "saga archived");
            }
        } else if state == SagaState::Failed {
            self.active.write().await.remove(&saga_id);
            self.failed.write().await.insert(saga_id);
        } else {
            self.active
                .write()
                .await
                .insert(saga_id, saga.next_wakeup());
        }
    }
}

/// The event recording that `command` was accepted.
fn acknowledgement(command: &Command) -> Option<SagaEvent> {
    match command {
        Command::CancelOrder(cmd) => Some(SagaEvent::cancellation_acknowledged(cmd.request_id)),
        Command::ReleaseStock(cmd) => Some(SagaEvent::stock_release_acknowledged(
            cmd.sku_id.clone(),
            cmd.request_id,
        )),
        Command::ReserveStock(_) => None,
    }
}

/// Logs and counts a recorded saga event.
fn observe(saga_id: SagaId, saga: &SagaInstance, event: &SagaEvent) {
    match event {
        SagaEvent::SagaStarted(data) => {
            metrics::counter!("saga_started_total").increment(1);
            tracing::info!(%saga_id, lines = data.lines.len(), "saga started");
        }
        SagaEvent::ReservationRequested(data) if data.attempt > 1 => {
            metrics::counter!("saga_reservation_reissued_total").increment(1);
            tracing::info!(
                %saga_id,
                sku_id = %data.sku_id,
                request_id = %data.request_id,
                attempt = data.attempt,
                "reservation re-issued"
            );
        }
        SagaEvent::ReservationRequested(data) => {
            tracing::info!(
                %saga_id,
                sku_id = %data.sku_id,
                request_id = %data.request_id,
                "reservation requested"
            );
        }
        SagaEvent::ReservationDispatchFailed(data) => {
            tracing::warn!(
                %saga_id,
                sku_id = %data.sku_id,
                attempt = data.attempt,
                error = %data.error,
                "reservation dispatch failed"
            );
        }
        SagaEvent::ReservationConfirmed(data) => {
            tracing::info!(%saga_id, sku_id = %data.sku_id, "reservation confirmed");
        }
        SagaEvent::ReservationRejected(data) => {
            tracing::info!(%saga_id, sku_id = %data.sku_id, reason = %data.reason, "reservation rejected");
        }
        SagaEvent::CompensationStarted(data) => {
            tracing::warn!(%saga_id, reason = %data.reason.describe(), "compensation started");
        }
        SagaEvent::SagaCompleted(_) => {
            metrics::counter!("saga_completed_total").increment(1);
            record_duration(saga);
            tracing::info!(%saga_id, "saga completed");
        }
        SagaEvent::SagaCompensated(_) => {
            metrics::counter!("saga_compensated_total").increment(1);
            record_duration(saga);
            tracing::info!(%saga_id, retries = saga.retry_count(), "saga compensated");
        }
        SagaEvent::SagaFailed(data) => {
            metrics::counter!("saga_failed_total").increment(1);
            record_duration(saga);
            tracing::error!(%saga_id, last_error = %data.last_error, "saga failed, needs an operator");
        }
        SagaEvent::CompensationAttempted(_)
        | SagaEvent::CancellationAcknowledged(_)
        | SagaEvent::StockReleaseAcknowledged(_) => {
            tracing::debug!(%saga_id, event = event.event_type(), "compensation progress");
        }
    }
}

fn record_duration(saga: &SagaInstance) {
    let (Some(started), Some(finished)) = (saga.started_at(), saga.finished_at()) else {
        return;
    };
    if let Ok(elapsed) = (finished - started).to_std() {
        metrics::histogram!("saga_duration_seconds").record(elapsed.as_secs_f64());
    }
}
