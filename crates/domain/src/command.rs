//! Command handling infrastructure.

use std::marker::PhantomData;

use contracts::AggregateId;
use event_store::{AppendOptions, EventEnvelope, EventStore, Version};

use crate::aggregate::{Aggregate, DomainEvent};
use crate::error::DomainError;
use crate::lock::KeyedLocks;

/// Result of command execution.
#[derive(Debug)]
pub struct CommandResult<A: Aggregate> {
    /// The aggregate after applying the new events.
    pub aggregate: A,

    /// The events that were recorded. Empty when the command was a no-op,
    /// for example a replay of an already-applied request.
    pub events: Vec<A::Event>,

    pub new_version: Version,
}

/// A command addressed to one aggregate stream.
pub trait Command: Send + Sync {
    type Aggregate: Aggregate;

    fn stream_id(&self) -> AggregateId;
}

/// Loads an aggregate, runs a decision against it and records the outcome.
///
/// The handler holds a per-stream lock for the whole cycle, so commands for
/// one stream are applied one at a time while other streams run freely.
/// The append still carries the loaded version as a guard against writers
/// outside this process.
pub struct CommandHandler<S, A>
where
    S: EventStore,
    A: Aggregate,
{
    store: S,
    locks: KeyedLocks<AggregateId>,
    _phantom: PhantomData<A>,
}

impl<S, A> CommandHandler<S, A>
where
    S: EventStore,
    A: Aggregate,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            locks: KeyedLocks::new(),
            _phantom: PhantomData,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Rebuilds the aggregate by folding its stream.
    ///
    /// A stream with no events yields `A::default()`.
    pub async fn load(&self, aggregate_id: AggregateId) -> Result<A, DomainError> {
        let envelopes = self.store.load(aggregate_id).await?;

        let mut aggregate = A::default();
        for envelope in envelopes {
            let event: A::Event = envelope.decode()?;
            aggregate.apply(event);
            aggregate.set_version(envelope.version);
        }

        Ok(aggregate)
    }

    /// Loads an aggregate, returning None if it was never created.
    pub async fn load_existing(&self, aggregate_id: AggregateId) -> Result<Option<A>, DomainError> {
        let aggregate = self.load(aggregate_id).await?;
        Ok(aggregate.id().is_some().then_some(aggregate))
    }

    /// Executes a decision against the current state and persists its events.
    pub async fn execute<F>(
        &self,
        aggregate_id: AggregateId,
        decide: F,
    ) -> Result<CommandResult<A>, DomainError>
    where
        F: FnOnce(&A) -> Result<Vec<A::Event>, A::Error>,
        DomainError: From<A::Error>,
    {
        let _guard = self.locks.lock(aggregate_id).await;

        let mut aggregate = self.load(aggregate_id).await?;
        let current_version = aggregate.version();

        let events = decide(&aggregate)?;
        if events.is_empty() {
            return Ok(CommandResult {
                aggregate,
                events,
                new_version: current_version,
            });
        }

        let envelopes = self.build_envelopes(aggregate_id, current_version, &events)?;
        let new_version = self
            .store
            .append(envelopes, AppendOptions::after(current_version))
            .await?;

        for event in &events {
            aggregate.apply(event.clone());
        }
        aggregate.set_version(new_version);

        tracing::debug!(
            aggregate_type = A::aggregate_type(),
            %aggregate_id,
            recorded = events.len(),
            version = %new_version,
            "events recorded"
        );

        Ok(CommandResult {
            aggregate,
            events,
            new_version,
        })
    }

    /// Executes a decision for a typed command.
    pub async fn handle<C, F>(&self, command: &C, decide: F) -> Result<CommandResult<A>, DomainError>
    where
        C: Command<Aggregate = A>,
        F: FnOnce(&A) -> Result<Vec<A::Event>, A::Error>,
        DomainError: From<A::Error>,
    {
        self.execute(command.stream_id(), decide).await
    }

    fn build_envelopes(
        &self,
        aggregate_id: AggregateId,
        current_version: Version,
        events: &[A::Event],
    ) -> Result<Vec<EventEnvelope>, DomainError> {
        let mut envelopes = Vec::with_capacity(events.len());
        let mut version = current_version;

        for event in events {
            version = version.next();
            let envelope = EventEnvelope::builder()
                .aggregate_id(aggregate_id)
                .aggregate_type(A::aggregate_type())
                .event_type(event.event_type())
                .version(version)
                .payload(event)?
                .build()?;
            envelopes.push(envelope);
        }

        Ok(envelopes)
    }
}
