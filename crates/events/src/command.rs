use homeledger_core::AggregateId;

/// A command targets exactly one aggregate stream.
///
/// Commands are transient intent ("add this detail to invoice X"); the aggregate turns accepted
/// commands into events. Routing uses `target_aggregate_id()`, so every command type carries the
/// id of the document it mutates.
pub trait Command: Clone + core::fmt::Debug + Send + Sync + 'static {
    fn target_aggregate_id(&self) -> AggregateId;
}
