use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::RwLock;

use homeledger_core::{AggregateId, ExpectedVersion};

use super::r#trait::{EventStore, EventStoreError, StoredEvent, StreamAppend, UncommittedEvent};

/// In-memory append-only event store.
///
/// Intended for tests/dev. Not optimized for performance. Multi-stream appends are committed
/// under a single write lock, so they are atomic.
#[derive(Debug, Default)]
pub struct InMemoryEventStore {
    streams: RwLock<Streams>,
}

#[derive(Debug, Default)]
struct Streams {
    by_id: HashMap<AggregateId, Vec<StoredEvent>>,
    /// Every committed event, in commit order.
    log: Vec<StoredEvent>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn current_version(stream: &[StoredEvent]) -> u64 {
        stream.last().map(|e| e.sequence_number).unwrap_or(0)
    }

    /// All events must target the same aggregate stream and type.
    fn batch_target(events: &[UncommittedEvent]) -> Result<(AggregateId, &str), EventStoreError> {
        let Some(first) = events.first() else {
            return Err(EventStoreError::InvalidAppend("empty batch".to_string()));
        };
        for (idx, e) in events.iter().enumerate() {
            if e.aggregate_id != first.aggregate_id {
                return Err(EventStoreError::InvalidAppend(format!(
                    "batch contains multiple aggregate_ids (index {idx})"
                )));
            }
            if e.aggregate_type != first.aggregate_type {
                return Err(EventStoreError::AggregateTypeMismatch(format!(
                    "batch contains multiple aggregate_types (index {idx})"
                )));
            }
        }
        Ok((first.aggregate_id, first.aggregate_type.as_str()))
    }

    /// Version and type checks against the current stream, without writing.
    fn check_stream(
        stream: Option<&Vec<StoredEvent>>,
        aggregate_type: &str,
        expected_version: ExpectedVersion,
    ) -> Result<(), EventStoreError> {
        let stream = stream.map(Vec::as_slice).unwrap_or(&[]);
        let current = Self::current_version(stream);

        if !expected_version.matches(current) {
            return Err(EventStoreError::Concurrency(format!(
                "expected {expected_version:?}, found {current}"
            )));
        }

        // Enforce aggregate type stability across the stream.
        if let Some(existing) = stream.first() {
            if existing.aggregate_type != aggregate_type {
                return Err(EventStoreError::AggregateTypeMismatch(format!(
                    "stream aggregate_type is '{}', attempted append with '{}'",
                    existing.aggregate_type, aggregate_type
                )));
            }
        }
        Ok(())
    }

    /// Assign sequence numbers and append (append-only). Checks must have passed.
    fn write(stream: &mut Vec<StoredEvent>, events: Vec<UncommittedEvent>) -> Vec<StoredEvent> {
        let mut next = Self::current_version(stream) + 1;
        let mut committed = Vec::with_capacity(events.len());
        for e in events {
            let stored = StoredEvent {
                event_id: e.event_id,
                aggregate_id: e.aggregate_id,
                aggregate_type: e.aggregate_type,
                sequence_number: next,
                event_type: e.event_type,
                event_version: e.event_version,
                occurred_at: e.occurred_at,
                payload: e.payload,
            };
            next += 1;
            stream.push(stored.clone());
            committed.push(stored);
        }
        committed
    }
}

impl EventStore for InMemoryEventStore {
    fn append(
        &self,
        events: Vec<UncommittedEvent>,
        expected_version: ExpectedVersion,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        if events.is_empty() {
            return Ok(vec![]);
        }

        let (aggregate_id, aggregate_type) = Self::batch_target(&events)?;
        let aggregate_type = aggregate_type.to_string();

        let mut streams = self
            .streams
            .write()
            .map_err(|_| EventStoreError::Unavailable("lock poisoned".to_string()))?;

        Self::check_stream(streams.by_id.get(&aggregate_id), &aggregate_type, expected_version)?;
        let stream = streams.by_id.entry(aggregate_id).or_default();
        let committed = Self::write(stream, events);
        streams.log.extend(committed.iter().cloned());
        Ok(committed)
    }

    fn load_stream(&self, aggregate_id: AggregateId) -> Result<Vec<StoredEvent>, EventStoreError> {
        let streams = self
            .streams
            .read()
            .map_err(|_| EventStoreError::Unavailable("lock poisoned".to_string()))?;

        Ok(streams.by_id.get(&aggregate_id).cloned().unwrap_or_default())
    }

    fn load_all(&self) -> Result<Vec<StoredEvent>, EventStoreError> {
        let streams = self
            .streams
            .read()
            .map_err(|_| EventStoreError::Unavailable("lock poisoned".to_string()))?;

        Ok(streams.log.clone())
    }

    fn append_atomic(&self, batch: Vec<StreamAppend>) -> Result<Vec<StoredEvent>, EventStoreError> {
        let batch: Vec<StreamAppend> = batch.into_iter().filter(|a| !a.events.is_empty()).collect();

        let mut seen = HashSet::new();
        for append in &batch {
            let (aggregate_id, _) = Self::batch_target(&append.events)?;
            if aggregate_id != append.aggregate_id {
                return Err(EventStoreError::InvalidAppend(format!(
                    "events target {aggregate_id}, append declared {}",
                    append.aggregate_id
                )));
            }
            if !seen.insert(aggregate_id) {
                return Err(EventStoreError::InvalidAppend(format!(
                    "stream {aggregate_id} appears more than once in an atomic batch"
                )));
            }
        }

        let mut streams = self
            .streams
            .write()
            .map_err(|_| EventStoreError::Unavailable("lock poisoned".to_string()))?;

        // Check every stream before writing any of them.
        for append in &batch {
            Self::check_stream(
                streams.by_id.get(&append.aggregate_id),
                &append.events[0].aggregate_type,
                append.expected_version,
            )?;
        }

        let mut committed = Vec::new();
        for append in batch {
            let stream = streams.by_id.entry(append.aggregate_id).or_default();
            committed.extend(Self::write(stream, append.events));
        }
        streams.log.extend(committed.iter().cloned());
        Ok(committed)
    }
}
