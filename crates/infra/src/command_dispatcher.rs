//! Command execution pipeline.
//!
//! Every billing command runs the same lifecycle:
//!
//! ```text
//! Command
//!   -> load events from the store (account-scoped)
//!   -> rehydrate the aggregate from history
//!   -> handle the command (pure decision logic, produces events)
//!   -> append events (append-only, optimistic concurrency check)
//!   -> publish committed events to the bus
//! ```
//!
//! Centralizing the pipeline here keeps the domain crates pure: account
//! isolation, optimistic concurrency, and event ordering are enforced in one
//! place rather than per aggregate. The dispatcher composes the `EventStore`
//! and `EventBus` traits and contains no IO of its own.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use thiserror::Error;
use uuid::Uuid;

use tally_core::{Aggregate, AggregateId, AccountId, DomainError, ExpectedVersion};
use tally_events::{EventBus, EventEnvelope};

use crate::event_store::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};

#[derive(Debug, Error)]
pub enum DispatchError {
    /// Optimistic concurrency failure (e.g. stale aggregate version).
    #[error("concurrency conflict: {0}")]
    Concurrency(String),
    /// Account isolation violation (cross-account or cross-aggregate stream mixing).
    #[error("account isolation violation: {0}")]
    AccountIsolation(String),
    /// Domain validation failure (deterministic).
    #[error("validation failed: {0}")]
    Validation(String),
    /// The operation is not legal for the aggregate's current status.
    #[error("forbidden transition: {0}")]
    ForbiddenTransition(String),
    /// The aggregate's state cannot accept this operation at all.
    #[error("invalid state: {0}")]
    InvalidState(String),
    /// Domain-level not found (includes other-account resources).
    #[error("not found")]
    NotFound,
    /// Failed to deserialize historical event payloads into the aggregate event type.
    #[error("failed to deserialize event payload: {0}")]
    Deserialize(String),
    /// Persisting to the event store failed.
    #[error("event store error: {0}")]
    Store(#[source] EventStoreError),
    /// Publication failed after a successful append (at-least-once; retry may duplicate).
    #[error("publish failed: {0}")]
    Publish(String),
}

impl From<EventStoreError> for DispatchError {
    fn from(value: EventStoreError) -> Self {
        match &value {
            EventStoreError::Concurrency(msg) => DispatchError::Concurrency(msg.clone()),
            EventStoreError::AccountIsolation(msg) => DispatchError::AccountIsolation(msg.clone()),
            _ => DispatchError::Store(value),
        }
    }
}

impl From<DomainError> for DispatchError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::Validation(msg) => DispatchError::Validation(msg),
            DomainError::ForbiddenTransition(msg) => DispatchError::ForbiddenTransition(msg),
            DomainError::InvalidState(msg) => DispatchError::InvalidState(msg),
            DomainError::Conflict(msg) => DispatchError::Concurrency(msg),
            DomainError::NotFound => DispatchError::NotFound,
            DomainError::InvalidId(msg) => DispatchError::Validation(msg),
        }
    }
}

/// Reusable command execution engine for event-sourced aggregates.
///
/// Sits between the application layer and the store/bus. Events are persisted
/// before publication: if the append fails nothing is published, and if
/// publication fails the events are already durable, giving at-least-once
/// delivery to projections.
///
/// Generic over store and bus implementations so tests can run fully
/// in-memory and a real backend can be swapped in without touching domain
/// code.
#[derive(Debug)]
pub struct CommandDispatcher<S, B> {
    store: S,
    bus: B,
}

impl<S, B> CommandDispatcher<S, B> {
    pub fn new(store: S, bus: B) -> Self {
        Self { store, bus }
    }

    pub fn into_parts(self) -> (S, B) {
        (self.store, self.bus)
    }
}

impl<S, B> CommandDispatcher<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    /// Dispatch a command through the full pipeline.
    ///
    /// The `make_aggregate` closure produces a fresh (empty) aggregate
    /// instance for rehydration, e.g. `|_, id| Invoice::empty(InvoiceId(id))`.
    /// This keeps the dispatcher generic over aggregate construction.
    ///
    /// Concurrency is optimistic: the expected version is the stream version
    /// observed at load time, and a concurrent writer makes the append fail
    /// with [`DispatchError::Concurrency`]. Callers retry by re-executing the
    /// command against fresh state.
    ///
    /// Account isolation is defense in depth: events are loaded scoped to
    /// `account_id`, the loaded stream is re-validated, and new events carry
    /// the same `account_id`.
    pub fn dispatch<A>(
        &self,
        account_id: AccountId,
        aggregate_id: AggregateId,
        aggregate_type: impl Into<String>,
        command: A::Command,
        make_aggregate: impl FnOnce(AccountId, AggregateId) -> A,
    ) -> Result<Vec<StoredEvent>, DispatchError>
    where
        A: Aggregate<Error = DomainError>,
        A::Event: tally_events::Event + Serialize + DeserializeOwned,
    {
        // 1) Load history (account-scoped)
        let history = self.store.load_stream(account_id, aggregate_id)?;
        validate_loaded_stream(account_id, aggregate_id, &history)?;
        let expected = ExpectedVersion::Exact(stream_version(&history));

        // 2) Rehydrate aggregate
        let mut aggregate = make_aggregate(account_id, aggregate_id);
        apply_history::<A>(&mut aggregate, &history)?;

        // 3) Decide events (no mutation)
        let decided = aggregate.handle(&command).map_err(DispatchError::from)?;
        if decided.is_empty() {
            return Ok(vec![]);
        }

        // 4) Persist (append-only, optimistic)
        let aggregate_type = aggregate_type.into();
        let uncommitted = decided
            .iter()
            .map(|ev| {
                UncommittedEvent::from_typed(
                    account_id,
                    aggregate_id,
                    aggregate_type.clone(),
                    Uuid::now_v7(),
                    ev,
                )
            })
            .collect::<Result<Vec<_>, _>>()?;

        let committed = self.store.append(uncommitted, expected)?;

        // 5) Publish committed events (after append)
        for stored in &committed {
            self.bus
                .publish(stored.to_envelope())
                .map_err(|e| DispatchError::Publish(format!("{e:?}")))?;
        }

        tracing::debug!(
            aggregate_type = %aggregate_type,
            committed = committed.len(),
            "command dispatched"
        );

        Ok(committed)
    }
}

fn stream_version(stream: &[StoredEvent]) -> u64 {
    stream.last().map(|e| e.sequence_number).unwrap_or(0)
}

fn validate_loaded_stream(
    account_id: AccountId,
    aggregate_id: AggregateId,
    stream: &[StoredEvent],
) -> Result<(), DispatchError> {
    // Re-check account scoping even if a buggy backend returns foreign data,
    // and ensure sequence numbers are strictly increasing.
    let mut last = 0u64;
    for (idx, e) in stream.iter().enumerate() {
        if e.account_id != account_id {
            return Err(DispatchError::AccountIsolation(format!(
                "loaded stream contains wrong account_id at index {idx}"
            )));
        }
        if e.aggregate_id != aggregate_id {
            return Err(DispatchError::AccountIsolation(format!(
                "loaded stream contains wrong aggregate_id at index {idx}"
            )));
        }
        if e.sequence_number == 0 {
            return Err(DispatchError::Store(EventStoreError::InvalidAppend(
                "stored event has sequence_number=0".to_string(),
            )));
        }
        if e.sequence_number <= last {
            return Err(DispatchError::Store(EventStoreError::InvalidAppend(
                format!(
                    "non-monotonic sequence_number in loaded stream (last={last}, found={})",
                    e.sequence_number
                ),
            )));
        }
        last = e.sequence_number;
    }
    Ok(())
}

fn apply_history<A>(aggregate: &mut A, history: &[StoredEvent]) -> Result<(), DispatchError>
where
    A: Aggregate,
    A::Event: DeserializeOwned,
{
    // Ensure deterministic ordering.
    let mut sorted = history.to_vec();
    sorted.sort_by_key(|e| e.sequence_number);

    for stored in sorted {
        let ev: A::Event = serde_json::from_value(stored.payload)
            .map_err(|e| DispatchError::Deserialize(e.to_string()))?;
        aggregate.apply(&ev);
    }

    Ok(())
}
