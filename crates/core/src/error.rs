//! Domain error model.
//!
//! Every failure the financial-document engine can report is a variant here, grouped into the
//! four categories of [`ErrorKind`]. Infrastructure failures (storage, publication) live in the
//! infra crate and wrap this type rather than extending it.

use thiserror::Error;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Coarse classification of a [`DomainError`].
///
/// Validation and state errors are rejected before any state change and can be fixed by the
/// caller. Consistency errors either need a retry (`ConcurrentModification`) or escalation.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Validation,
    State,
    Consistency,
    NotFound,
}

/// Domain-level error.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Line quantity was zero or negative.
    #[error("invalid quantity {quantity}: must be greater than zero")]
    InvalidQuantity { quantity: String },

    /// Unit price was negative, or missing where the service type has no fixed price.
    #[error("invalid unit price: {0}")]
    InvalidPrice(String),

    /// VAT rate outside `[0, 100]`.
    #[error("invalid VAT rate {rate}: must be between 0 and 100")]
    InvalidVatRate { rate: String },

    #[error("invoice number '{0}' is already in use")]
    DuplicateInvoiceNumber(String),

    /// A receipt or voucher number collided with an existing document.
    #[error("document number '{0}' is already in use")]
    DuplicateDocumentNumber(String),

    /// A field failed validation.
    #[error("invalid {field}: {message}")]
    Validation { field: &'static str, message: String },

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// Details may only change while the invoice is a draft.
    #[error("invoice is not editable in status {status}")]
    InvoiceNotEditable { status: String },

    /// Items may only change while the voucher is a draft.
    #[error("voucher is not editable in status {status}")]
    VoucherNotEditable { status: String },

    #[error("cannot change status from {from} to {to}: {reason}")]
    InvalidStatusTransition {
        from: String,
        to: String,
        reason: String,
    },

    /// The document was already created under this id.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Stale aggregate version (optimistic concurrency).
    #[error("concurrent modification: {0}")]
    ConcurrentModification(String),

    /// A domain invariant was violated (arithmetic overflow, corrupted history).
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    #[error("invoice not found")]
    InvoiceNotFound,

    #[error("voucher not found")]
    VoucherNotFound,

    #[error("invoice detail not found")]
    DetailNotFound,

    #[error("voucher item not found")]
    ItemNotFound,

    #[error("receipt not found")]
    ReceiptNotFound,
}

impl DomainError {
    pub fn validation(field: &'static str, message: impl Into<String>) -> Self {
        Self::Validation {
            field,
            message: message.into(),
        }
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn concurrent(msg: impl Into<String>) -> Self {
        Self::ConcurrentModification(msg.into())
    }

    pub fn transition(
        from: impl core::fmt::Display,
        to: impl core::fmt::Display,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidStatusTransition {
            from: from.to_string(),
            to: to.to_string(),
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            DomainError::InvalidQuantity { .. }
            | DomainError::InvalidPrice(_)
            | DomainError::InvalidVatRate { .. }
            | DomainError::DuplicateInvoiceNumber(_)
            | DomainError::DuplicateDocumentNumber(_)
            | DomainError::Validation { .. }
            | DomainError::InvalidId(_) => ErrorKind::Validation,
            DomainError::InvoiceNotEditable { .. }
            | DomainError::VoucherNotEditable { .. }
            | DomainError::InvalidStatusTransition { .. }
            | DomainError::AlreadyExists(_) => ErrorKind::State,
            DomainError::ConcurrentModification(_) | DomainError::InvariantViolation(_) => {
                ErrorKind::Consistency
            }
            DomainError::InvoiceNotFound
            | DomainError::VoucherNotFound
            | DomainError::DetailNotFound
            | DomainError::ItemNotFound
            | DomainError::ReceiptNotFound => ErrorKind::NotFound,
        }
    }

    /// The offending input field, when the error is tied to one.
    pub fn field(&self) -> Option<&'static str> {
        match self {
            DomainError::InvalidQuantity { .. } => Some("quantity"),
            DomainError::InvalidPrice(_) => Some("unit_price"),
            DomainError::InvalidVatRate { .. } => Some("vat_rate"),
            DomainError::DuplicateInvoiceNumber(_) => Some("invoice_no"),
            DomainError::DuplicateDocumentNumber(_) => Some("number"),
            DomainError::Validation { field, .. } => Some(*field),
            _ => None,
        }
    }
}
