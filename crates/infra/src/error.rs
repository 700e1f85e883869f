use thiserror::Error;

use homeledger_core::{DomainError, ErrorKind, InvoiceId, ReceiptId, VoucherId};

use crate::command_dispatcher::DispatchError;
use crate::config::ConfigError;

/// Error returned by [`FinancialDocumentService`](crate::service::FinancialDocumentService)
/// operations.
#[derive(Debug, Error)]
pub enum FinanceError {
    /// Rejected by a document rule, or a stale version. Nothing was written.
    #[error(transparent)]
    Domain(#[from] DomainError),

    /// The receipt was committed but the invoice's transition to PAID was not.
    ///
    /// Needs manual reconciliation; never retried automatically.
    #[error(
        "receipt {receipt_id} was recorded but invoice {invoice_id} could not be marked paid: {reason}"
    )]
    ReceiptReconciliation {
        receipt_id: ReceiptId,
        invoice_id: InvoiceId,
        reason: String,
    },

    /// The receipt and the invoice's PAID status were committed but the requested
    /// reconciliation voucher was not.
    #[error("receipt {receipt_id} was recorded but reconciliation voucher {voucher_id} was not: {reason}")]
    ReconciliationVoucherMissing {
        receipt_id: ReceiptId,
        voucher_id: VoucherId,
        reason: String,
    },

    /// The service configuration failed validation.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Event store or bus failure.
    #[error("storage failure: {0}")]
    Storage(String),
}

impl FinanceError {
    /// Only stale-version conflicts are worth retrying as-is.
    pub fn is_retryable(&self) -> bool {
        matches!(self, FinanceError::Domain(DomainError::ConcurrentModification(_)))
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            FinanceError::Domain(e) => e.kind(),
            FinanceError::ReceiptReconciliation { .. }
            | FinanceError::ReconciliationVoucherMissing { .. }
            | FinanceError::Storage(_) => ErrorKind::Consistency,
            FinanceError::Config(_) => ErrorKind::Validation,
        }
    }

    pub fn domain(&self) -> Option<&DomainError> {
        match self {
            FinanceError::Domain(e) => Some(e),
            _ => None,
        }
    }
}

impl From<DispatchError> for FinanceError {
    fn from(value: DispatchError) -> Self {
        match value {
            DispatchError::Domain(e) => FinanceError::Domain(e),
            other => FinanceError::Storage(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_store::EventStoreError;

    #[test]
    fn store_conflicts_become_retryable_domain_errors() {
        let err: FinanceError =
            DispatchError::from(EventStoreError::Concurrency("expected 3, found 4".into())).into();
        assert!(err.is_retryable());
        assert_eq!(err.kind(), ErrorKind::Consistency);
    }

    #[test]
    fn other_failures_are_not_retryable() {
        let err: FinanceError = DispatchError::Publish("bus down".into()).into();
        assert!(matches!(err, FinanceError::Storage(_)));
        assert!(!err.is_retryable());

        let err = FinanceError::from(DomainError::InvoiceNotFound);
        assert!(!err.is_retryable());
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
}
