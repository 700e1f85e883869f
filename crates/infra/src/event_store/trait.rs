use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;
use uuid::Uuid;

use homeledger_core::{AggregateId, ExpectedVersion};
use std::sync::Arc;

/// An event ready to be appended to a stream (not yet assigned a sequence number).
///
/// Use `UncommittedEvent::from_typed()` to build one from a typed domain event: it serializes
/// the payload to JSON and captures the metadata (event type, schema version, occurrence time)
/// needed to deserialize it again on load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UncommittedEvent {
    pub event_id: Uuid,
    pub aggregate_id: AggregateId,
    pub aggregate_type: String,

    pub event_type: String,
    pub event_version: u32,
    pub occurred_at: DateTime<Utc>,

    pub payload: JsonValue,
}

/// A stored event in an append-only stream (assigned a sequence number).
///
/// Sequence numbers are assigned by the store on append: per stream, starting at 1, without
/// gaps. The sequence number of the last event is the stream version used for optimistic
/// concurrency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredEvent {
    pub event_id: Uuid,
    pub aggregate_id: AggregateId,
    pub aggregate_type: String,

    /// Monotonically increasing position in the aggregate stream.
    pub sequence_number: u64,

    pub event_type: String,
    pub event_version: u32,
    pub occurred_at: DateTime<Utc>,

    pub payload: JsonValue,
}

impl StoredEvent {
    pub fn stream_version(&self) -> u64 {
        self.sequence_number
    }

    /// Convert a stored event into an envelope for publication.
    pub fn to_envelope(&self) -> homeledger_events::EventEnvelope<JsonValue> {
        homeledger_events::EventEnvelope::new(
            self.event_id,
            self.aggregate_id,
            self.aggregate_type.clone(),
            self.sequence_number,
            self.event_type.clone(),
            self.occurred_at,
            self.payload.clone(),
        )
    }
}

/// One stream's share of a multi-stream append.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamAppend {
    pub aggregate_id: AggregateId,
    pub expected_version: ExpectedVersion,
    pub events: Vec<UncommittedEvent>,
}

/// Event store operation error.
///
/// These are infrastructure errors (storage, concurrency) as opposed to domain errors.
#[derive(Debug, Error)]
pub enum EventStoreError {
    #[error("optimistic concurrency check failed: {0}")]
    Concurrency(String),

    #[error("aggregate type mismatch: {0}")]
    AggregateTypeMismatch(String),

    #[error("invalid append: {0}")]
    InvalidAppend(String),

    /// The backend could not be reached or refused the write.
    #[error("event store unavailable: {0}")]
    Unavailable(String),

    /// A multi-stream append stopped half-way: `committed` streams were written, `failed` was not.
    ///
    /// `events` holds everything that was written, so it can still be published.
    #[error("partial commit: {failed} failed after {} stream(s) were committed: {reason}", committed.len())]
    PartialCommit {
        committed: Vec<AggregateId>,
        failed: AggregateId,
        reason: String,
        events: Vec<StoredEvent>,
    },
}

/// Append-only event store.
///
/// Events are organized into streams, one per aggregate instance, keyed by aggregate id.
///
/// `append()`:
/// - all events of a batch must target the same stream and aggregate type
/// - checks the expected version against the current stream version
/// - assigns sequence numbers starting at `current_version + 1`
/// - persists the batch atomically (all or nothing)
///
/// `load_stream()` returns the stream in sequence order, or an empty vector when the aggregate
/// was never created.
pub trait EventStore: Send + Sync {
    /// Append events to an aggregate stream (append-only).
    fn append(
        &self,
        events: Vec<UncommittedEvent>,
        expected_version: ExpectedVersion,
    ) -> Result<Vec<StoredEvent>, EventStoreError>;

    /// Load the full stream of an aggregate.
    fn load_stream(&self, aggregate_id: AggregateId) -> Result<Vec<StoredEvent>, EventStoreError>;

    /// Load every stored event, in commit order.
    ///
    /// Used to seed read models and number registries when a process starts against an
    /// existing store.
    fn load_all(&self) -> Result<Vec<StoredEvent>, EventStoreError>;

    /// Append to several streams as one unit.
    ///
    /// The default appends stream by stream and is **not** atomic: if a later stream fails after
    /// an earlier one was written, it returns [`EventStoreError::PartialCommit`]. Stores that can
    /// commit all streams together override this.
    fn append_atomic(&self, batch: Vec<StreamAppend>) -> Result<Vec<StoredEvent>, EventStoreError> {
        let mut committed_streams = Vec::new();
        let mut committed = Vec::new();
        for append in batch {
            let aggregate_id = append.aggregate_id;
            match self.append(append.events, append.expected_version) {
                Ok(stored) => {
                    committed_streams.push(aggregate_id);
                    committed.extend(stored);
                }
                Err(e) if committed_streams.is_empty() => return Err(e),
                Err(e) => {
                    return Err(EventStoreError::PartialCommit {
                        committed: committed_streams,
                        failed: aggregate_id,
                        reason: e.to_string(),
                        events: committed,
                    });
                }
            }
        }
        Ok(committed)
    }
}

impl<S> EventStore for Arc<S>
where
    S: EventStore + ?Sized,
{
    fn append(
        &self,
        events: Vec<UncommittedEvent>,
        expected_version: ExpectedVersion,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        (**self).append(events, expected_version)
    }

    fn load_stream(&self, aggregate_id: AggregateId) -> Result<Vec<StoredEvent>, EventStoreError> {
        (**self).load_stream(aggregate_id)
    }

    fn load_all(&self) -> Result<Vec<StoredEvent>, EventStoreError> {
        (**self).load_all()
    }

    fn append_atomic(&self, batch: Vec<StreamAppend>) -> Result<Vec<StoredEvent>, EventStoreError> {
        (**self).append_atomic(batch)
    }
}

impl UncommittedEvent {
    /// Convenience constructor from a typed domain event.
    pub fn from_typed<E>(
        aggregate_id: AggregateId,
        aggregate_type: impl Into<String>,
        event_id: Uuid,
        event: &E,
    ) -> Result<Self, EventStoreError>
    where
        E: homeledger_events::Event + Serialize,
    {
        let payload = serde_json::to_value(event).map_err(|e| {
            EventStoreError::InvalidAppend(format!("payload serialization failed: {e}"))
        })?;

        Ok(Self {
            event_id,
            aggregate_id,
            aggregate_type: aggregate_type.into(),
            event_type: event.event_type().to_string(),
            event_version: event.version(),
            occurred_at: event.occurred_at(),
            payload,
        })
    }
}
