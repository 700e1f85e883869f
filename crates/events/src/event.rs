use chrono::{DateTime, Utc};

/// A domain event: an immutable, versioned fact about a document.
///
/// Event payloads record what the caller asked for and what the engine derived (e.g. a detail's
/// computed amount). Document totals are never part of a payload; they are recomputed from the
/// lines whenever events are applied.
pub trait Event: Clone + core::fmt::Debug + Send + Sync + 'static {
    /// Stable event name (e.g. "invoicing.invoice.detail_upserted").
    fn event_type(&self) -> &'static str;

    /// Schema version for this event type.
    fn version(&self) -> u32;

    /// When the event occurred (UTC instant, business time).
    fn occurred_at(&self) -> DateTime<Utc>;
}
