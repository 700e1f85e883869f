//! Append-only event store boundary.
//!
//! Defines the storage abstraction for document event streams without making any storage
//! assumptions, plus the in-memory implementation used in tests and development.

pub mod in_memory;
pub mod r#trait;

pub use in_memory::InMemoryEventStore;
pub use r#trait::{EventStore, EventStoreError, StoredEvent, StreamAppend, UncommittedEvent};
