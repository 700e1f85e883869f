//! Projection implementations (read model builders).
//!
//! Projections consume published envelopes and build query-optimized read models.
//! All projections are:
//! - **Rebuildable**: Can be reconstructed from the event stream
//! - **Idempotent**: Safe for at-least-once delivery

pub mod document_summaries;

pub use document_summaries::{
    DocumentSummaryProjection, DocumentSummaryProjectionError, InvoiceFilter, InvoiceSummary,
    LineOwner, VoucherSummary,
};
