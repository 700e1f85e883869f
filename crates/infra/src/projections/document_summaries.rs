//! Document summaries projection.
//!
//! Builds list-friendly summaries of invoices and vouchers from published envelopes, plus an
//! index from line ids (invoice details, voucher items) to their owning document so that line
//! operations can be addressed by line id alone.
//!
//! - **Rebuildable**: can be reconstructed from the event stream
//! - **Idempotent**: envelopes at or below the per-stream cursor are skipped
//! - Amounts are recomputed from line amounts, never copied from a document total

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::NaiveDate;
use serde::Serialize;
use serde_json::Value as JsonValue;
use thiserror::Error;

use homeledger_core::{
    AggregateId, ApartmentId, InvoiceId, JournalEntryId, LineId, Money, ReceiptId, VoucherId,
};
use homeledger_events::EventEnvelope;
use homeledger_invoicing::{InvoiceEvent, InvoiceStatus};
use homeledger_pricing::{DocumentTotals, LineAmounts};
use homeledger_vouchers::{VoucherEvent, VoucherStatus};

use crate::read_model::{InMemoryReadStore, ReadStore};

const INVOICE_STREAM: &str = "invoicing.invoice";
const VOUCHER_STREAM: &str = "vouchers.voucher";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InvoiceSummary {
    pub invoice_id: InvoiceId,
    pub invoice_no: String,
    pub apartment_id: ApartmentId,
    pub issue_date: NaiveDate,
    pub due_date: NaiveDate,
    pub status: InvoiceStatus,
    pub subtotal: Money,
    pub tax: Money,
    pub total: Money,
    pub detail_count: usize,
    pub receipt_id: Option<ReceiptId>,
    #[serde(skip)]
    lines: Vec<(LineId, LineAmounts)>,
}

impl InvoiceSummary {
    pub fn effective_status(&self, today: NaiveDate) -> InvoiceStatus {
        if self.status == InvoiceStatus::Issued && self.due_date < today {
            InvoiceStatus::Overdue
        } else {
            self.status
        }
    }

    fn recompute(&mut self) -> Result<(), DocumentSummaryProjectionError> {
        let totals = DocumentTotals::from_lines(self.lines.iter().map(|(_, a)| *a))
            .map_err(|e| DocumentSummaryProjectionError::Totals(e.to_string()))?;
        self.subtotal = totals.subtotal;
        self.tax = totals.tax;
        self.total = totals.total;
        self.detail_count = self.lines.len();
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VoucherSummary {
    pub voucher_id: VoucherId,
    pub voucher_no: Option<String>,
    pub voucher_date: NaiveDate,
    pub counterparty: Option<String>,
    pub status: VoucherStatus,
    pub total: Money,
    pub item_count: usize,
    pub journal_entry_id: Option<JournalEntryId>,
    #[serde(skip)]
    items: Vec<(LineId, Money)>,
}

impl VoucherSummary {
    fn recompute(&mut self) -> Result<(), DocumentSummaryProjectionError> {
        self.total = Money::try_sum(self.items.iter().map(|(_, m)| *m))
            .map_err(|e| DocumentSummaryProjectionError::Totals(e.to_string()))?;
        self.item_count = self.items.len();
        Ok(())
    }
}

/// Invoice list filter. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InvoiceFilter {
    /// Matched against the effective status (so `Overdue` works).
    pub status: Option<InvoiceStatus>,
    pub apartment_id: Option<ApartmentId>,
    /// Inclusive.
    pub issued_from: Option<NaiveDate>,
    /// Inclusive.
    pub issued_to: Option<NaiveDate>,
}

impl InvoiceFilter {
    pub fn matches(&self, summary: &InvoiceSummary, today: NaiveDate) -> bool {
        self.status
            .is_none_or(|s| summary.effective_status(today) == s)
            && self.apartment_id.is_none_or(|a| summary.apartment_id == a)
            && self.issued_from.is_none_or(|d| summary.issue_date >= d)
            && self.issued_to.is_none_or(|d| summary.issue_date <= d)
    }
}

/// The document a line belongs to.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum LineOwner {
    Invoice(InvoiceId),
    Voucher(VoucherId),
}

#[derive(Debug, Error)]
pub enum DocumentSummaryProjectionError {
    #[error("failed to deserialize document event: {0}")]
    Deserialize(String),

    #[error("stream mismatch: {0}")]
    StreamMismatch(String),

    #[error("non-monotonic sequence number (last={last}, found={found})")]
    NonMonotonicSequence { last: u64, found: u64 },

    #[error("event for a document the projection has not seen: {0}")]
    UnknownDocument(AggregateId),

    #[error("totals could not be recomputed: {0}")]
    Totals(String),
}

type InvoiceStore = Arc<InMemoryReadStore<InvoiceId, InvoiceSummary>>;
type VoucherStore = Arc<InMemoryReadStore<VoucherId, VoucherSummary>>;

#[derive(Debug)]
pub struct DocumentSummaryProjection<I = InvoiceStore, V = VoucherStore>
where
    I: ReadStore<InvoiceId, InvoiceSummary>,
    V: ReadStore<VoucherId, VoucherSummary>,
{
    invoices: I,
    vouchers: V,
    line_owners: RwLock<HashMap<LineId, LineOwner>>,
    cursors: RwLock<HashMap<AggregateId, u64>>,
}

impl DocumentSummaryProjection {
    pub fn in_memory() -> Self {
        Self::new(
            Arc::new(InMemoryReadStore::new()),
            Arc::new(InMemoryReadStore::new()),
        )
    }
}

impl<I, V> DocumentSummaryProjection<I, V>
where
    I: ReadStore<InvoiceId, InvoiceSummary>,
    V: ReadStore<VoucherId, VoucherSummary>,
{
    pub fn new(invoices: I, vouchers: V) -> Self {
        Self {
            invoices,
            vouchers,
            line_owners: RwLock::new(HashMap::new()),
            cursors: RwLock::new(HashMap::new()),
        }
    }

    fn get_cursor(&self, aggregate_id: AggregateId) -> u64 {
        match self.cursors.read() {
            Ok(cursors) => *cursors.get(&aggregate_id).unwrap_or(&0),
            Err(_) => 0,
        }
    }

    fn update_cursor(&self, aggregate_id: AggregateId, sequence_number: u64) {
        if let Ok(mut cursors) = self.cursors.write() {
            cursors.insert(aggregate_id, sequence_number);
        }
    }

    fn set_owner(&self, line_id: LineId, owner: LineOwner) {
        if let Ok(mut owners) = self.line_owners.write() {
            owners.insert(line_id, owner);
        }
    }

    fn drop_owner(&self, line_id: LineId) {
        if let Ok(mut owners) = self.line_owners.write() {
            owners.remove(&line_id);
        }
    }

    fn drop_owners_of(&self, owner: LineOwner) {
        if let Ok(mut owners) = self.line_owners.write() {
            owners.retain(|_, o| *o != owner);
        }
    }

    pub fn invoice(&self, invoice_id: &InvoiceId) -> Option<InvoiceSummary> {
        self.invoices.get(invoice_id)
    }

    pub fn voucher(&self, voucher_id: &VoucherId) -> Option<VoucherSummary> {
        self.vouchers.get(voucher_id)
    }

    /// Invoices matching `filter`, ordered by issue date then invoice number.
    pub fn list_invoices(&self, filter: &InvoiceFilter, today: NaiveDate) -> Vec<InvoiceSummary> {
        let mut out: Vec<_> = self
            .invoices
            .list()
            .into_iter()
            .filter(|s| filter.matches(s, today))
            .collect();
        out.sort_by(|a, b| {
            (a.issue_date, a.invoice_no.as_str()).cmp(&(b.issue_date, b.invoice_no.as_str()))
        });
        out
    }

    /// Vouchers, optionally restricted to one status, ordered by voucher date.
    pub fn list_vouchers(&self, status: Option<VoucherStatus>) -> Vec<VoucherSummary> {
        let mut out: Vec<_> = self
            .vouchers
            .list()
            .into_iter()
            .filter(|s| status.is_none_or(|st| s.status == st))
            .collect();
        out.sort_by(|a, b| {
            (a.voucher_date, a.voucher_no.as_deref()).cmp(&(b.voucher_date, b.voucher_no.as_deref()))
        });
        out
    }

    pub fn line_owner(&self, line_id: LineId) -> Option<LineOwner> {
        self.line_owners.read().ok()?.get(&line_id).copied()
    }

    pub fn invoice_of_detail(&self, detail_id: LineId) -> Option<InvoiceId> {
        match self.line_owner(detail_id)? {
            LineOwner::Invoice(id) => Some(id),
            LineOwner::Voucher(_) => None,
        }
    }

    pub fn voucher_of_item(&self, item_id: LineId) -> Option<VoucherId> {
        match self.line_owner(item_id)? {
            LineOwner::Voucher(id) => Some(id),
            LineOwner::Invoice(_) => None,
        }
    }

    /// Apply one published envelope. Streams other than invoices and vouchers are ignored.
    pub fn apply_envelope(
        &self,
        envelope: &EventEnvelope<JsonValue>,
    ) -> Result<(), DocumentSummaryProjectionError> {
        let stream = envelope.aggregate_type();
        if stream != INVOICE_STREAM && stream != VOUCHER_STREAM {
            return Ok(());
        }

        let aggregate_id = envelope.aggregate_id();
        let seq = envelope.sequence_number();
        let last = self.get_cursor(aggregate_id);

        if seq == 0 {
            return Err(DocumentSummaryProjectionError::NonMonotonicSequence { last, found: seq });
        }

        if seq <= last {
            return Ok(());
        }

        if seq != last + 1 {
            return Err(DocumentSummaryProjectionError::NonMonotonicSequence { last, found: seq });
        }

        if stream == INVOICE_STREAM {
            let ev: InvoiceEvent = serde_json::from_value(envelope.payload().clone())
                .map_err(|e| DocumentSummaryProjectionError::Deserialize(e.to_string()))?;
            self.apply_invoice_event(aggregate_id, ev)?;
        } else {
            let ev: VoucherEvent = serde_json::from_value(envelope.payload().clone())
                .map_err(|e| DocumentSummaryProjectionError::Deserialize(e.to_string()))?;
            self.apply_voucher_event(aggregate_id, ev)?;
        }

        self.update_cursor(aggregate_id, seq);
        Ok(())
    }

    fn apply_invoice_event(
        &self,
        aggregate_id: AggregateId,
        ev: InvoiceEvent,
    ) -> Result<(), DocumentSummaryProjectionError> {
        let invoice_id = match &ev {
            InvoiceEvent::InvoiceCreated(e) => e.invoice_id,
            InvoiceEvent::InvoiceHeaderUpdated(e) => e.invoice_id,
            InvoiceEvent::DetailUpserted(e) => e.invoice_id,
            InvoiceEvent::DetailRemoved(e) => e.invoice_id,
            InvoiceEvent::InvoiceStatusChanged(e) => e.invoice_id,
            InvoiceEvent::InvoiceDeleted(e) => e.invoice_id,
        };
        if invoice_id.aggregate_id() != aggregate_id {
            return Err(DocumentSummaryProjectionError::StreamMismatch(
                "event invoice_id does not match envelope aggregate_id".to_string(),
            ));
        }

        if let InvoiceEvent::InvoiceCreated(e) = &ev {
            self.invoices.upsert(
                invoice_id,
                InvoiceSummary {
                    invoice_id,
                    invoice_no: e.invoice_no.clone(),
                    apartment_id: e.apartment_id,
                    issue_date: e.issue_date,
                    due_date: e.due_date,
                    status: InvoiceStatus::Draft,
                    subtotal: Money::ZERO,
                    tax: Money::ZERO,
                    total: Money::ZERO,
                    detail_count: 0,
                    receipt_id: None,
                    lines: vec![],
                },
            );
            return Ok(());
        }

        if let InvoiceEvent::InvoiceDeleted(_) = &ev {
            self.invoices.remove(&invoice_id);
            self.drop_owners_of(LineOwner::Invoice(invoice_id));
            return Ok(());
        }

        let mut summary = self
            .invoices
            .get(&invoice_id)
            .ok_or(DocumentSummaryProjectionError::UnknownDocument(aggregate_id))?;

        match ev {
            InvoiceEvent::InvoiceHeaderUpdated(e) => {
                summary.due_date = e.due_date;
            }
            InvoiceEvent::DetailUpserted(e) => {
                let amounts = e.detail.line_amounts();
                match summary.lines.iter().position(|(id, _)| *id == e.detail.id) {
                    Some(idx) => summary.lines[idx].1 = amounts,
                    None => summary.lines.push((e.detail.id, amounts)),
                }
                summary.recompute()?;
                self.set_owner(e.detail.id, LineOwner::Invoice(invoice_id));
            }
            InvoiceEvent::DetailRemoved(e) => {
                summary.lines.retain(|(id, _)| *id != e.detail_id);
                summary.recompute()?;
                self.drop_owner(e.detail_id);
            }
            InvoiceEvent::InvoiceStatusChanged(e) => {
                summary.status = e.to;
                if e.receipt_id.is_some() {
                    summary.receipt_id = e.receipt_id;
                }
            }
            InvoiceEvent::InvoiceCreated(_) | InvoiceEvent::InvoiceDeleted(_) => {}
        }

        self.invoices.upsert(invoice_id, summary);
        Ok(())
    }

    fn apply_voucher_event(
        &self,
        aggregate_id: AggregateId,
        ev: VoucherEvent,
    ) -> Result<(), DocumentSummaryProjectionError> {
        let voucher_id = match &ev {
            VoucherEvent::VoucherCreated(e) => e.voucher_id,
            VoucherEvent::ItemUpserted(e) => e.voucher_id,
            VoucherEvent::ItemRemoved(e) => e.voucher_id,
            VoucherEvent::VoucherSubmitted(e) => e.voucher_id,
            VoucherEvent::VoucherReturnedToDraft(e) => e.voucher_id,
            VoucherEvent::VoucherApproved(e) => e.voucher_id,
            VoucherEvent::VoucherCancelled(e) => e.voucher_id,
            VoucherEvent::VoucherDeleted(e) => e.voucher_id,
        };
        if voucher_id.aggregate_id() != aggregate_id {
            return Err(DocumentSummaryProjectionError::StreamMismatch(
                "event voucher_id does not match envelope aggregate_id".to_string(),
            ));
        }

        if let VoucherEvent::VoucherCreated(e) = &ev {
            self.vouchers.upsert(
                voucher_id,
                VoucherSummary {
                    voucher_id,
                    voucher_no: e.voucher_no.clone(),
                    voucher_date: e.voucher_date,
                    counterparty: e.counterparty.clone(),
                    status: VoucherStatus::Draft,
                    total: Money::ZERO,
                    item_count: 0,
                    journal_entry_id: None,
                    items: vec![],
                },
            );
            return Ok(());
        }

        if let VoucherEvent::VoucherDeleted(_) = &ev {
            self.vouchers.remove(&voucher_id);
            self.drop_owners_of(LineOwner::Voucher(voucher_id));
            return Ok(());
        }

        let mut summary = self
            .vouchers
            .get(&voucher_id)
            .ok_or(DocumentSummaryProjectionError::UnknownDocument(aggregate_id))?;

        match ev {
            VoucherEvent::ItemUpserted(e) => {
                match summary.items.iter().position(|(id, _)| *id == e.item.id) {
                    Some(idx) => summary.items[idx].1 = e.item.amount,
                    None => summary.items.push((e.item.id, e.item.amount)),
                }
                summary.recompute()?;
                self.set_owner(e.item.id, LineOwner::Voucher(voucher_id));
            }
            VoucherEvent::ItemRemoved(e) => {
                summary.items.retain(|(id, _)| *id != e.item_id);
                summary.recompute()?;
                self.drop_owner(e.item_id);
            }
            VoucherEvent::VoucherSubmitted(_) => summary.status = VoucherStatus::Pending,
            VoucherEvent::VoucherReturnedToDraft(_) => summary.status = VoucherStatus::Draft,
            VoucherEvent::VoucherApproved(e) => {
                summary.status = VoucherStatus::Approved;
                summary.journal_entry_id = Some(e.journal_entry_id);
            }
            VoucherEvent::VoucherCancelled(_) => summary.status = VoucherStatus::Cancelled,
            VoucherEvent::VoucherCreated(_) | VoucherEvent::VoucherDeleted(_) => {}
        }

        self.vouchers.upsert(voucher_id, summary);
        Ok(())
    }

    /// Rebuild the read model from scratch.
    pub fn rebuild_from_scratch(
        &self,
        envelopes: impl IntoIterator<Item = EventEnvelope<JsonValue>>,
    ) -> Result<(), DocumentSummaryProjectionError> {
        let mut envs: Vec<_> = envelopes.into_iter().collect();

        self.invoices.clear();
        self.vouchers.clear();
        if let Ok(mut owners) = self.line_owners.write() {
            owners.clear();
        }
        if let Ok(mut cursors) = self.cursors.write() {
            cursors.clear();
        }

        envs.sort_by_key(|e| (e.aggregate_id(), e.sequence_number()));

        for env in &envs {
            self.apply_envelope(env)?;
        }

        Ok(())
    }
}
