//! Document number registry.
//!
//! Invoice, voucher and receipt numbers are unique per document kind. Numbers are reserved
//! before the document's first append and released again if that append fails, so a rejected
//! create never burns a number.
//!
//! Numbers committed by other processes are learned from stored and published events through
//! [`DocumentNumberRegistry::observe`].

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use chrono::NaiveDate;
use serde_json::Value as JsonValue;
use tracing::warn;

use homeledger_core::{Aggregate, AggregateId, DomainError, DomainResult};
use homeledger_events::EventEnvelope;
use homeledger_invoicing::{Invoice, InvoiceEvent, Receipt, ReceiptEvent};
use homeledger_vouchers::{Voucher, VoucherEvent};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum DocumentKind {
    Invoice,
    Voucher,
    Receipt,
    /// Monthly billing run for one apartment, keyed `{apartment_id}/{yyyy-mm}`. Held only while
    /// the run is in progress.
    MonthlyBilling,
}

impl DocumentKind {
    fn duplicate(self, number: &str) -> DomainError {
        match self {
            DocumentKind::Invoice => DomainError::DuplicateInvoiceNumber(number.to_string()),
            DocumentKind::Voucher | DocumentKind::Receipt => {
                DomainError::DuplicateDocumentNumber(number.to_string())
            }
            DocumentKind::MonthlyBilling => {
                DomainError::AlreadyExists(format!("monthly billing {number} is in progress"))
            }
        }
    }
}

#[derive(Debug, Default)]
struct Registry {
    taken: HashMap<DocumentKind, HashSet<String>>,
    /// Last generated sequence per prefix (`INV-20250301`, `PC-2025`).
    sequences: HashMap<String, u32>,
    /// Last observed sequence number per stream.
    observed: HashMap<AggregateId, u64>,
}

impl Registry {
    fn is_taken(&self, kind: DocumentKind, number: &str) -> bool {
        self.taken.get(&kind).is_some_and(|s| s.contains(number))
    }

    fn next_free(&mut self, kind: DocumentKind, prefix: String, width: usize) -> String {
        let seq = self.sequences.entry(prefix.clone()).or_insert(0);
        loop {
            *seq += 1;
            let candidate = format!("{prefix}-{:0width$}", *seq);
            if !self.taken.get(&kind).is_some_and(|s| s.contains(&candidate)) {
                return candidate;
            }
        }
    }
}

/// In-process registry of used document numbers.
#[derive(Debug, Default)]
pub struct DocumentNumberRegistry {
    inner: Mutex<Registry>,
}

impl DocumentNumberRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> DomainResult<MutexGuard<'_, Registry>> {
        self.inner
            .lock()
            .map_err(|_| DomainError::invariant("document number registry lock poisoned"))
    }

    /// Reserve `number` for a new document.
    ///
    /// The reservation is released when the returned guard is dropped without
    /// [`Reservation::confirm`].
    pub fn reserve(&self, kind: DocumentKind, number: &str) -> DomainResult<Reservation<'_>> {
        let mut registry = self.lock()?;
        if registry.is_taken(kind, number) {
            return Err(kind.duplicate(number));
        }
        registry
            .taken
            .entry(kind)
            .or_default()
            .insert(number.to_string());

        Ok(Reservation {
            registry: self,
            kind,
            number: number.to_string(),
            confirmed: false,
        })
    }

    /// Free a number whose document was deleted.
    pub fn release(&self, kind: DocumentKind, number: &str) {
        if let Ok(mut registry) = self.lock() {
            if let Some(set) = registry.taken.get_mut(&kind) {
                set.remove(number);
            }
        }
    }

    /// Mark `number` as used by a committed document.
    pub fn claim(&self, kind: DocumentKind, number: &str) {
        if let Ok(mut registry) = self.lock() {
            registry
                .taken
                .entry(kind)
                .or_default()
                .insert(number.to_string());
        }
    }

    /// Learn from a committed event: creations claim their number, deletions release it.
    ///
    /// Envelopes at or below the last observed sequence of their stream are ignored.
    pub fn observe(&self, envelope: &EventEnvelope<JsonValue>) {
        let stream = envelope.aggregate_type();
        if stream != Invoice::AGGREGATE_TYPE
            && stream != Receipt::AGGREGATE_TYPE
            && stream != Voucher::AGGREGATE_TYPE
        {
            return;
        }

        {
            let Ok(mut registry) = self.lock() else {
                return;
            };
            let last = registry.observed.entry(envelope.aggregate_id()).or_insert(0);
            if envelope.sequence_number() <= *last {
                return;
            }
            *last = envelope.sequence_number();
        }

        let payload = envelope.payload().clone();
        let decoded = if stream == Invoice::AGGREGATE_TYPE {
            serde_json::from_value::<InvoiceEvent>(payload).map(|ev| match ev {
                InvoiceEvent::InvoiceCreated(e) => Some((DocumentKind::Invoice, e.invoice_no, true)),
                InvoiceEvent::InvoiceDeleted(e) => {
                    Some((DocumentKind::Invoice, e.invoice_no, false))
                }
                _ => None,
            })
        } else if stream == Receipt::AGGREGATE_TYPE {
            serde_json::from_value::<ReceiptEvent>(payload).map(|ev| match ev {
                ReceiptEvent::ReceiptRecorded(e) => {
                    Some((DocumentKind::Receipt, e.receipt_no, true))
                }
            })
        } else {
            serde_json::from_value::<VoucherEvent>(payload).map(|ev| match ev {
                VoucherEvent::VoucherCreated(e) => {
                    e.voucher_no.map(|no| (DocumentKind::Voucher, no, true))
                }
                VoucherEvent::VoucherDeleted(e) => {
                    e.voucher_no.map(|no| (DocumentKind::Voucher, no, false))
                }
                _ => None,
            })
        };

        match decoded {
            Ok(Some((kind, number, true))) => self.claim(kind, &number),
            Ok(Some((kind, number, false))) => self.release(kind, &number),
            Ok(None) => {}
            Err(e) => warn!(
                aggregate_id = %envelope.aggregate_id(),
                event_type = envelope.event_type(),
                error = %e,
                "event payload not readable; document number not tracked"
            ),
        }
    }

    pub fn is_taken(&self, kind: DocumentKind, number: &str) -> bool {
        self.lock()
            .map(|r| r.is_taken(kind, number))
            .unwrap_or(false)
    }

    /// Next free invoice number for an issue date: `INV-{yyyyMMdd}-{seq:04}`.
    pub fn next_invoice_no(&self, issue_date: NaiveDate) -> DomainResult<String> {
        let mut registry = self.lock()?;
        let prefix = format!("INV-{}", issue_date.format("%Y%m%d"));
        Ok(registry.next_free(DocumentKind::Invoice, prefix, 4))
    }

    /// Next free voucher number for a year: `PC-{year}-{seq:03}`.
    pub fn next_voucher_no(&self, year: i32) -> DomainResult<String> {
        let mut registry = self.lock()?;
        Ok(registry.next_free(DocumentKind::Voucher, format!("PC-{year}"), 3))
    }
}

/// A reserved document number.
#[derive(Debug)]
#[must_use = "a reservation is released when dropped unless confirmed"]
pub struct Reservation<'a> {
    registry: &'a DocumentNumberRegistry,
    kind: DocumentKind,
    number: String,
    confirmed: bool,
}

impl Reservation<'_> {
    pub fn number(&self) -> &str {
        &self.number
    }

    /// Keep the number: the document was committed.
    pub fn confirm(mut self) {
        self.confirmed = true;
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if !self.confirmed {
            self.registry.release(self.kind, &self.number);
        }
    }
}
