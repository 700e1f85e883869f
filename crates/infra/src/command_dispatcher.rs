//! Command execution pipeline (application-level orchestration).
//!
//! ```text
//! Command
//!   ↓
//! 1. Load events from store
//!   ↓
//! 2. Rehydrate aggregate (apply historical events to rebuild state)
//!   ↓
//! 3. Handle command (pure decision logic, produces events)
//!   ↓
//! 4. Persist events to store (append-only, optimistic concurrency check)
//!   ↓
//! 5. Publish events to bus (projections, upstream contexts)
//! ```
//!
//! Steps 3 and 4 are also exposed separately ([`CommandDispatcher::prepare`] and
//! [`CommandDispatcher::commit_atomic`]) so that decisions over several aggregates can be
//! committed together, which is how a receipt and its invoice's transition to PAID are written.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{error, warn};
use uuid::Uuid;

use homeledger_core::{Aggregate, AggregateId, DomainError, ExpectedVersion};
use homeledger_events::{Command, EventBus, EventEnvelope};

use crate::event_store::{EventStore, EventStoreError, StoredEvent, StreamAppend, UncommittedEvent};

#[derive(Debug, Error)]
pub enum DispatchError {
    /// The aggregate rejected the command, or the stream version was stale.
    #[error(transparent)]
    Domain(#[from] DomainError),
    /// Failed to deserialize historical event payloads into the aggregate event type.
    #[error("failed to deserialize stored event: {0}")]
    Deserialize(String),
    /// Persisting to the event store failed.
    #[error(transparent)]
    Store(EventStoreError),
    /// Publication failed after a successful append (at-least-once; republish may duplicate).
    #[error("event publication failed: {0}")]
    Publish(String),
}

impl DispatchError {
    pub fn is_concurrency_conflict(&self) -> bool {
        matches!(self, DispatchError::Domain(DomainError::ConcurrentModification(_)))
    }
}

impl From<EventStoreError> for DispatchError {
    fn from(value: EventStoreError) -> Self {
        match value {
            EventStoreError::Concurrency(msg) => {
                DispatchError::Domain(DomainError::ConcurrentModification(msg))
            }
            other => DispatchError::Store(other),
        }
    }
}

/// Events decided for one aggregate but not yet appended.
#[derive(Debug, Clone)]
pub struct Prepared<A> {
    /// State after applying the decided events.
    pub aggregate: A,
    pub aggregate_id: AggregateId,
    pub expected_version: ExpectedVersion,
    pub events: Vec<UncommittedEvent>,
}

impl<A> Prepared<A> {
    pub fn stream_append(&self) -> StreamAppend {
        StreamAppend {
            aggregate_id: self.aggregate_id,
            expected_version: self.expected_version,
            events: self.events.clone(),
        }
    }
}

/// Result of a committed command.
#[derive(Debug, Clone)]
pub struct Dispatched<A> {
    pub aggregate: A,
    pub committed: Vec<StoredEvent>,
}

/// Reusable command execution engine for event-sourced aggregates.
///
/// - Events are persisted before publication; if append fails, nothing is published.
/// - Each command operates on a single aggregate instance, serialized by its stream version.
/// - If publication fails after a successful append the error is returned; the events are
///   already persisted, which gives at-least-once delivery.
#[derive(Debug)]
pub struct CommandDispatcher<S, B> {
    store: S,
    bus: B,
}

impl<S, B> CommandDispatcher<S, B> {
    pub fn new(store: S, bus: B) -> Self {
        Self { store, bus }
    }

    pub fn store(&self) -> &S {
        &self.store
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
    /// Load and rehydrate an aggregate from a snapshot of its stream.
    ///
    /// Returns the fresh aggregate (version 0) when the stream is empty.
    pub fn load<A>(
        &self,
        aggregate_id: AggregateId,
        make_aggregate: impl FnOnce(AggregateId) -> A,
    ) -> Result<A, DispatchError>
    where
        A: Aggregate,
        A::Event: DeserializeOwned,
    {
        let history = self.store.load_stream(aggregate_id)?;
        validate_loaded_stream(aggregate_id, A::AGGREGATE_TYPE, &history)?;

        let mut aggregate = make_aggregate(aggregate_id);
        apply_history::<A>(&mut aggregate, &history)?;
        Ok(aggregate)
    }

    /// Decide events for `command` against an already loaded aggregate, without persisting.
    pub fn prepare<A>(&self, aggregate: &A, command: &A::Command) -> Result<Prepared<A>, DispatchError>
    where
        A: Aggregate<Error = DomainError> + Clone,
        A::Command: Command,
        A::Event: homeledger_events::Event + Serialize,
    {
        let aggregate_id = command.target_aggregate_id();
        let expected_version = ExpectedVersion::Exact(aggregate.version());

        let decided = aggregate.handle(command)?;

        let mut next = aggregate.clone();
        let mut events = Vec::with_capacity(decided.len());
        for ev in &decided {
            events.push(UncommittedEvent::from_typed(
                aggregate_id,
                A::AGGREGATE_TYPE,
                Uuid::now_v7(),
                ev,
            )?);
            next.apply(ev);
        }

        Ok(Prepared {
            aggregate: next,
            aggregate_id,
            expected_version,
            events,
        })
    }

    /// Append a prepared decision to its stream and publish it.
    pub fn commit<A>(&self, prepared: Prepared<A>) -> Result<Dispatched<A>, DispatchError> {
        if prepared.events.is_empty() {
            return Ok(Dispatched {
                aggregate: prepared.aggregate,
                committed: vec![],
            });
        }

        let committed = self
            .store
            .append(prepared.events, prepared.expected_version)?;
        self.publish(&committed)?;

        Ok(Dispatched {
            aggregate: prepared.aggregate,
            committed,
        })
    }

    /// Decide several commands in order against one aggregate, as a single append.
    ///
    /// Each command is handled against the state left by the previous ones. All commands must
    /// target `aggregate`'s stream.
    pub fn prepare_all<A>(
        &self,
        aggregate: &A,
        commands: &[A::Command],
    ) -> Result<Prepared<A>, DispatchError>
    where
        A: Aggregate<Error = DomainError> + Clone,
        A::Command: Command,
        A::Event: homeledger_events::Event + Serialize,
    {
        let Some(first) = commands.first() else {
            return Err(DomainError::invariant("no commands to prepare").into());
        };
        let aggregate_id = first.target_aggregate_id();
        let expected_version = ExpectedVersion::Exact(aggregate.version());

        let mut next = aggregate.clone();
        let mut events = Vec::new();
        for command in commands {
            if command.target_aggregate_id() != aggregate_id {
                return Err(DomainError::invariant(format!(
                    "command targets {}, batch targets {aggregate_id}",
                    command.target_aggregate_id()
                ))
                .into());
            }
            for ev in next.handle(command)? {
                events.push(UncommittedEvent::from_typed(
                    aggregate_id,
                    A::AGGREGATE_TYPE,
                    Uuid::now_v7(),
                    &ev,
                )?);
                next.apply(&ev);
            }
        }

        Ok(Prepared {
            aggregate: next,
            aggregate_id,
            expected_version,
            events,
        })
    }

    /// Append several prepared decisions as one unit, then publish them.
    ///
    /// On a partial commit the streams that were written are still published before the
    /// error is returned, so read models see what the store holds.
    pub fn commit_atomic(&self, batch: Vec<StreamAppend>) -> Result<Vec<StoredEvent>, DispatchError> {
        match self.store.append_atomic(batch) {
            Ok(committed) => {
                self.publish(&committed)?;
                Ok(committed)
            }
            Err(EventStoreError::PartialCommit {
                committed,
                failed,
                reason,
                events,
            }) => {
                if let Err(e) = self.publish(&events) {
                    error!(%failed, error = %e, "failed to publish partially committed events");
                }
                Err(DispatchError::Store(EventStoreError::PartialCommit {
                    committed,
                    failed,
                    reason,
                    events,
                }))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Decide and commit against an already loaded aggregate.
    pub fn execute<A>(&self, aggregate: &A, command: &A::Command) -> Result<Dispatched<A>, DispatchError>
    where
        A: Aggregate<Error = DomainError> + Clone,
        A::Command: Command,
        A::Event: homeledger_events::Event + Serialize,
    {
        let prepared = self.prepare(aggregate, command)?;
        self.commit(prepared)
    }

    /// Dispatch a command through the full pipeline.
    ///
    /// The target stream is `command.target_aggregate_id()`. `make_aggregate` builds the empty
    /// instance that history is applied to (e.g. `Invoice::empty`).
    pub fn dispatch<A>(
        &self,
        command: A::Command,
        make_aggregate: impl FnOnce(AggregateId) -> A,
    ) -> Result<Dispatched<A>, DispatchError>
    where
        A: Aggregate<Error = DomainError> + Clone,
        A::Command: Command,
        A::Event: homeledger_events::Event + Serialize + DeserializeOwned,
    {
        let aggregate = self.load(command.target_aggregate_id(), make_aggregate)?;
        self.execute(&aggregate, &command)
    }

    /// Like [`dispatch`](Self::dispatch), retrying up to `retries` times on a stale stream.
    ///
    /// Only for commands that are idempotent by id (detail/item upserts and removals).
    pub fn dispatch_with_retries<A>(
        &self,
        command: A::Command,
        retries: u32,
        make_aggregate: impl Fn(AggregateId) -> A,
    ) -> Result<Dispatched<A>, DispatchError>
    where
        A: Aggregate<Error = DomainError> + Clone,
        A::Command: Command,
        A::Event: homeledger_events::Event + Serialize + DeserializeOwned,
    {
        let mut attempt = 0;
        loop {
            match self.dispatch(command.clone(), &make_aggregate) {
                Err(e) if e.is_concurrency_conflict() && attempt < retries => {
                    attempt += 1;
                    warn!(
                        aggregate_type = A::AGGREGATE_TYPE,
                        aggregate_id = %command.target_aggregate_id(),
                        attempt,
                        "stale stream version, retrying command"
                    );
                }
                other => return other,
            }
        }
    }

    /// Publish committed events (after append).
    pub fn publish(&self, committed: &[StoredEvent]) -> Result<(), DispatchError> {
        for stored in committed {
            if let Err(e) = self.bus.publish(stored.to_envelope()) {
                error!(
                    aggregate_id = %stored.aggregate_id,
                    sequence_number = stored.sequence_number,
                    error = ?e,
                    "committed event could not be published"
                );
                return Err(DispatchError::Publish(format!("{e:?}")));
            }
        }
        Ok(())
    }
}

fn validate_loaded_stream(
    aggregate_id: AggregateId,
    aggregate_type: &str,
    stream: &[StoredEvent],
) -> Result<(), DispatchError> {
    // A buggy backend must not be able to mix streams. Also ensure the stream is monotonically
    // increasing by sequence number.
    let mut last = 0u64;
    for (idx, e) in stream.iter().enumerate() {
        if e.aggregate_id != aggregate_id {
            return Err(DispatchError::Store(EventStoreError::InvalidAppend(format!(
                "loaded stream contains wrong aggregate_id at index {idx}"
            ))));
        }
        if e.aggregate_type != aggregate_type {
            return Err(DispatchError::Store(EventStoreError::AggregateTypeMismatch(
                format!(
                    "stream {aggregate_id} holds '{}', expected '{aggregate_type}'",
                    e.aggregate_type
                ),
            )));
        }
        if e.sequence_number <= last {
            return Err(DispatchError::Store(EventStoreError::InvalidAppend(format!(
                "non-monotonic sequence_number in loaded stream (last={last}, found={})",
                e.sequence_number
            ))));
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
    for stored in history {
        let ev: A::Event = serde_json::from_value(stored.payload.clone())
            .map_err(|e| DispatchError::Deserialize(e.to_string()))?;
        aggregate.apply(&ev);
    }

    Ok(())
}
