//! Document views.
//!
//! Each view is built by an explicit projection function from the rehydrated aggregate plus the
//! lookups it needs ("today" for the effective invoice status, the settled invoice for a
//! receipt). Views are plain serializable data.

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

use homeledger_core::{
    ActorId, AggregateRoot, ApartmentId, DomainError, DomainResult, InvoiceId, JournalEntryId,
    Money, PaymentMethodId, ReceiptId, TicketId, VoucherId,
};
use homeledger_invoicing::{Invoice, InvoiceDetail, InvoiceStatus, Receipt, StatusChange};
use homeledger_vouchers::{Voucher, VoucherItem, VoucherStatus};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InvoiceView {
    pub invoice_id: InvoiceId,
    pub invoice_no: String,
    pub apartment_id: ApartmentId,
    pub issue_date: NaiveDate,
    pub due_date: NaiveDate,
    /// Stored lifecycle status.
    pub status: InvoiceStatus,
    /// Status as of the read date (`OVERDUE` for an issued invoice past its due date).
    pub effective_status: InvoiceStatus,
    pub subtotal: Money,
    pub tax: Money,
    pub total: Money,
    pub note: Option<String>,
    pub ticket_id: Option<TicketId>,
    pub receipt_id: Option<ReceiptId>,
    pub details: Vec<InvoiceDetail>,
    pub status_history: Vec<StatusChange>,
    pub created_at: DateTime<Utc>,
    pub created_by: ActorId,
    pub updated_at: DateTime<Utc>,
    pub updated_by: ActorId,
    pub version: u64,
}

impl InvoiceView {
    pub fn project(invoice: &Invoice, today: NaiveDate) -> DomainResult<Self> {
        if !invoice.exists() || invoice.is_deleted() {
            return Err(DomainError::InvoiceNotFound);
        }

        Ok(Self {
            invoice_id: invoice.id_typed(),
            invoice_no: invoice.invoice_no().to_string(),
            apartment_id: required(invoice.apartment_id(), "apartment_id")?,
            issue_date: required(invoice.issue_date(), "issue_date")?,
            due_date: required(invoice.due_date(), "due_date")?,
            status: invoice.status(),
            effective_status: invoice.effective_status(today),
            subtotal: invoice.subtotal(),
            tax: invoice.tax(),
            total: invoice.total(),
            note: invoice.note().map(str::to_string),
            ticket_id: invoice.ticket_id(),
            receipt_id: invoice.receipt_id(),
            details: invoice.details().to_vec(),
            status_history: invoice.status_history().to_vec(),
            created_at: required(invoice.created_at(), "created_at")?,
            created_by: required(invoice.created_by().cloned(), "created_by")?,
            updated_at: required(invoice.updated_at(), "updated_at")?,
            updated_by: required(invoice.updated_by().cloned(), "updated_by")?,
            version: invoice.version(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VoucherView {
    pub voucher_id: VoucherId,
    pub voucher_no: Option<String>,
    pub voucher_date: NaiveDate,
    pub counterparty: Option<String>,
    pub description: Option<String>,
    pub status: VoucherStatus,
    pub items: Vec<VoucherItem>,
    pub total: Money,
    pub receipt_id: Option<ReceiptId>,
    pub ticket_id: Option<TicketId>,
    pub journal_entry_id: Option<JournalEntryId>,
    pub approved_by: Option<ActorId>,
    pub approved_at: Option<DateTime<Utc>>,
    pub cancellation_note: Option<String>,
    pub created_at: DateTime<Utc>,
    pub created_by: ActorId,
    pub updated_at: DateTime<Utc>,
    pub updated_by: ActorId,
    pub version: u64,
}

impl VoucherView {
    pub fn project(voucher: &Voucher) -> DomainResult<Self> {
        if !voucher.exists() || voucher.is_deleted() {
            return Err(DomainError::VoucherNotFound);
        }

        Ok(Self {
            voucher_id: voucher.id_typed(),
            voucher_no: voucher.voucher_no().map(str::to_string),
            voucher_date: required(voucher.voucher_date(), "voucher_date")?,
            counterparty: voucher.counterparty().map(str::to_string),
            description: voucher.description().map(str::to_string),
            status: voucher.status(),
            items: voucher.items().to_vec(),
            total: voucher.total(),
            receipt_id: voucher.receipt_id(),
            ticket_id: voucher.ticket_id(),
            journal_entry_id: voucher.journal_entry_id(),
            approved_by: voucher.approved_by().cloned(),
            approved_at: voucher.approved_at(),
            cancellation_note: voucher.cancellation_note().map(str::to_string),
            created_at: required(voucher.created_at(), "created_at")?,
            created_by: required(voucher.created_by().cloned(), "created_by")?,
            updated_at: required(voucher.updated_at(), "updated_at")?,
            updated_by: required(voucher.updated_by().cloned(), "updated_by")?,
            version: voucher.version(),
        })
    }
}

/// The invoice a receipt settles, as shown alongside the receipt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReceiptInvoiceRef {
    pub invoice_id: InvoiceId,
    pub invoice_no: String,
    pub apartment_id: ApartmentId,
    pub total: Money,
    pub effective_status: InvoiceStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReceiptView {
    pub receipt_id: ReceiptId,
    pub receipt_no: String,
    pub receipt_date: NaiveDate,
    pub amount: Money,
    pub payment_method_id: PaymentMethodId,
    pub note: Option<String>,
    pub voucher_id: Option<VoucherId>,
    pub invoice: ReceiptInvoiceRef,
    pub created_at: DateTime<Utc>,
    pub created_by: ActorId,
}

impl ReceiptView {
    /// `invoice` must be the invoice the receipt was recorded against.
    pub fn project(receipt: &Receipt, invoice: &Invoice, today: NaiveDate) -> DomainResult<Self> {
        if !receipt.exists() {
            return Err(DomainError::ReceiptNotFound);
        }
        if receipt.invoice_id() != Some(invoice.id_typed()) {
            return Err(DomainError::invariant(format!(
                "receipt {} does not belong to invoice {}",
                receipt.id_typed(),
                invoice.id_typed()
            )));
        }

        Ok(Self {
            receipt_id: receipt.id_typed(),
            receipt_no: receipt.receipt_no().to_string(),
            receipt_date: required(receipt.receipt_date(), "receipt_date")?,
            amount: receipt.amount(),
            payment_method_id: required(receipt.payment_method_id(), "payment_method_id")?,
            note: receipt.note().map(str::to_string),
            voucher_id: receipt.voucher_id(),
            invoice: ReceiptInvoiceRef {
                invoice_id: invoice.id_typed(),
                invoice_no: invoice.invoice_no().to_string(),
                apartment_id: required(invoice.apartment_id(), "apartment_id")?,
                total: invoice.total(),
                effective_status: invoice.effective_status(today),
            },
            created_at: required(receipt.created_at(), "created_at")?,
            created_by: required(receipt.created_by().cloned(), "created_by")?,
        })
    }
}

/// Fields set by the creation event; missing means the history is corrupt.
fn required<T>(value: Option<T>, field: &str) -> DomainResult<T> {
    value.ok_or_else(|| DomainError::invariant(format!("created document has no {field}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use homeledger_core::{Aggregate, LineId, ServiceTypeId};
    use homeledger_invoicing::{
        ChangeInvoiceStatus, CreateInvoice, InvoiceCommand, PriceSource, UpsertDetail,
    };
    use rust_decimal_macros::dec;

    fn at(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, day, 2, 0, 0).unwrap()
    }

    fn date(m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, m, d).unwrap()
    }

    fn run(invoice: &mut Invoice, cmd: InvoiceCommand) {
        for ev in invoice.handle(&cmd).unwrap() {
            invoice.apply(&ev);
        }
    }

    fn issued_invoice() -> Invoice {
        let id = InvoiceId::generate();
        let mut invoice = Invoice::empty(id);
        run(
            &mut invoice,
            InvoiceCommand::CreateInvoice(CreateInvoice {
                invoice_id: id,
                invoice_no: "INV-20250301-0001".to_string(),
                apartment_id: ApartmentId::new(),
                issue_date: date(3, 1),
                due_date: date(4, 10),
                note: None,
                ticket_id: None,
                actor: ActorId::new("manager-1"),
                occurred_at: at(1),
            }),
        );
        run(
            &mut invoice,
            InvoiceCommand::UpsertDetail(UpsertDetail {
                invoice_id: id,
                detail_id: LineId::new(),
                service_type_id: ServiceTypeId::new(),
                description: "Management fee".to_string(),
                quantity: dec!(2),
                unit_price: dec!(500000),
                vat_rate: dec!(10),
                price_source: PriceSource::CallerSupplied,
                actor: ActorId::new("manager-1"),
                occurred_at: at(1),
            }),
        );
        run(
            &mut invoice,
            InvoiceCommand::ChangeInvoiceStatus(ChangeInvoiceStatus {
                invoice_id: id,
                target: InvoiceStatus::Issued,
                note: Some("sent to resident".to_string()),
                receipt_id: None,
                actor: ActorId::new("manager-2"),
                occurred_at: at(2),
            }),
        );
        invoice
    }

    #[test]
    fn invoice_view_derives_overdue_from_the_read_date() {
        let invoice = issued_invoice();

        let before_due = InvoiceView::project(&invoice, date(4, 10)).unwrap();
        assert_eq!(before_due.effective_status, InvoiceStatus::Issued);

        let view = InvoiceView::project(&invoice, date(4, 11)).unwrap();
        assert_eq!(view.status, InvoiceStatus::Issued);
        assert_eq!(view.effective_status, InvoiceStatus::Overdue);
        assert_eq!(view.total, Money::new(1_100_000));
        assert_eq!(view.details.len(), 1);
        assert_eq!(view.status_history.len(), 1);
        assert_eq!(view.created_by, ActorId::new("manager-1"));
        assert_eq!(view.updated_by, ActorId::new("manager-2"));
        assert_eq!(view.version, 3);
    }

    #[test]
    fn invoice_view_serializes_status_vocabulary() {
        let view = InvoiceView::project(&issued_invoice(), date(5, 1)).unwrap();
        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["status"], "ISSUED");
        assert_eq!(json["effective_status"], "OVERDUE");
        assert_eq!(json["total"], 1_100_000);
    }

    #[test]
    fn missing_documents_are_not_found() {
        let invoice = Invoice::empty(InvoiceId::generate());
        assert_eq!(
            InvoiceView::project(&invoice, date(3, 1)).unwrap_err(),
            DomainError::InvoiceNotFound
        );

        let voucher = Voucher::empty(VoucherId::generate());
        assert_eq!(
            VoucherView::project(&voucher).unwrap_err(),
            DomainError::VoucherNotFound
        );

        let receipt = Receipt::empty(ReceiptId::generate());
        assert_eq!(
            ReceiptView::project(&receipt, &issued_invoice(), date(3, 1)).unwrap_err(),
            DomainError::ReceiptNotFound
        );
    }
}
