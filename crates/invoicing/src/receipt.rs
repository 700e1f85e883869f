use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use homeledger_core::{
    ActorId, Aggregate, AggregateId, AggregateRoot, DomainError, DomainResult, InvoiceId, Money,
    PaymentMethodId, ReceiptId, VoucherId,
};
use homeledger_events::{Command, Event};

use crate::invoice::{INVOICE_NO_MAX_LEN, INVOICE_NO_MIN_LEN, NOTE_MAX_LEN};

/// Receipt numbers embed the invoice number plus a date suffix.
pub const RECEIPT_NO_MAX_LEN: usize = INVOICE_NO_MAX_LEN + 16;

/// `REC-{invoice_no}-{yyyy/MM/dd}`.
pub fn default_receipt_no(invoice_no: &str, receipt_date: NaiveDate) -> String {
    format!("REC-{}-{}", invoice_no, receipt_date.format("%Y/%m/%d"))
}

/// Aggregate root: a receipt of payment against one invoice.
///
/// A receipt is written once. Its pairing with the invoice's transition to PAID is decided and
/// committed by the receipt processor in the infra crate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Receipt {
    id: ReceiptId,
    receipt_no: String,
    invoice_id: Option<InvoiceId>,
    payment_method_id: Option<PaymentMethodId>,
    amount: Money,
    receipt_date: Option<NaiveDate>,
    note: Option<String>,
    voucher_id: Option<VoucherId>,
    created_at: Option<DateTime<Utc>>,
    created_by: Option<ActorId>,
    version: u64,
    created: bool,
}

impl Receipt {
    pub fn empty(id: ReceiptId) -> Self {
        Self {
            id,
            receipt_no: String::new(),
            invoice_id: None,
            payment_method_id: None,
            amount: Money::ZERO,
            receipt_date: None,
            note: None,
            voucher_id: None,
            created_at: None,
            created_by: None,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> ReceiptId {
        self.id
    }

    pub fn exists(&self) -> bool {
        self.created
    }

    pub fn receipt_no(&self) -> &str {
        &self.receipt_no
    }

    pub fn invoice_id(&self) -> Option<InvoiceId> {
        self.invoice_id
    }

    pub fn payment_method_id(&self) -> Option<PaymentMethodId> {
        self.payment_method_id
    }

    pub fn amount(&self) -> Money {
        self.amount
    }

    pub fn receipt_date(&self) -> Option<NaiveDate> {
        self.receipt_date
    }

    pub fn note(&self) -> Option<&str> {
        self.note.as_deref()
    }

    pub fn voucher_id(&self) -> Option<VoucherId> {
        self.voucher_id
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    pub fn created_by(&self) -> Option<&ActorId> {
        self.created_by.as_ref()
    }
}

impl AggregateRoot for Receipt {
    type Id = ReceiptId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: RecordReceipt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordReceipt {
    pub receipt_id: ReceiptId,
    pub receipt_no: String,
    pub invoice_id: InvoiceId,
    pub payment_method_id: PaymentMethodId,
    pub amount: Money,
    pub receipt_date: NaiveDate,
    pub note: Option<String>,
    /// Reconciliation voucher created alongside the receipt, if any.
    pub voucher_id: Option<VoucherId>,
    pub actor: ActorId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReceiptCommand {
    RecordReceipt(RecordReceipt),
}

impl Command for ReceiptCommand {
    fn target_aggregate_id(&self) -> AggregateId {
        match self {
            ReceiptCommand::RecordReceipt(c) => c.receipt_id.aggregate_id(),
        }
    }
}

/// Event: ReceiptRecorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptRecorded {
    pub receipt_id: ReceiptId,
    pub receipt_no: String,
    pub invoice_id: InvoiceId,
    pub payment_method_id: PaymentMethodId,
    pub amount: Money,
    pub receipt_date: NaiveDate,
    pub note: Option<String>,
    pub voucher_id: Option<VoucherId>,
    pub actor: ActorId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReceiptEvent {
    ReceiptRecorded(ReceiptRecorded),
}

impl Event for ReceiptEvent {
    fn event_type(&self) -> &'static str {
        match self {
            ReceiptEvent::ReceiptRecorded(_) => "invoicing.receipt.recorded",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            ReceiptEvent::ReceiptRecorded(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Receipt {
    type Command = ReceiptCommand;
    type Event = ReceiptEvent;
    type Error = DomainError;

    const AGGREGATE_TYPE: &'static str = "invoicing.receipt";

    fn apply(&mut self, event: &Self::Event) {
        match event {
            ReceiptEvent::ReceiptRecorded(e) => {
                self.id = e.receipt_id;
                self.receipt_no = e.receipt_no.clone();
                self.invoice_id = Some(e.invoice_id);
                self.payment_method_id = Some(e.payment_method_id);
                self.amount = e.amount;
                self.receipt_date = Some(e.receipt_date);
                self.note = e.note.clone();
                self.voucher_id = e.voucher_id;
                self.created_at = Some(e.occurred_at);
                self.created_by = Some(e.actor.clone());
                self.created = true;
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            ReceiptCommand::RecordReceipt(cmd) => self.handle_record(cmd),
        }
    }
}

impl Receipt {
    fn handle_record(&self, cmd: &RecordReceipt) -> DomainResult<Vec<ReceiptEvent>> {
        if self.created {
            return Err(DomainError::AlreadyExists(format!(
                "receipt {}",
                cmd.receipt_id
            )));
        }
        if self.id != cmd.receipt_id {
            return Err(DomainError::invariant("receipt_id mismatch"));
        }

        let receipt_no = cmd.receipt_no.trim().to_string();
        let len = receipt_no.chars().count();
        if !(INVOICE_NO_MIN_LEN..=RECEIPT_NO_MAX_LEN).contains(&len) {
            return Err(DomainError::validation(
                "receipt_no",
                format!("must be between {INVOICE_NO_MIN_LEN} and {RECEIPT_NO_MAX_LEN} characters"),
            ));
        }
        if !cmd.amount.is_positive() {
            return Err(DomainError::validation(
                "amount",
                "receipt amount must be greater than zero",
            ));
        }
        let note = cmd
            .note
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(str::to_string);
        if note.as_ref().is_some_and(|n| n.chars().count() > NOTE_MAX_LEN) {
            return Err(DomainError::validation(
                "note",
                format!("must be at most {NOTE_MAX_LEN} characters"),
            ));
        }

        Ok(vec![ReceiptEvent::ReceiptRecorded(ReceiptRecorded {
            receipt_id: cmd.receipt_id,
            receipt_no,
            invoice_id: cmd.invoice_id,
            payment_method_id: cmd.payment_method_id,
            amount: cmd.amount,
            receipt_date: cmd.receipt_date,
            note,
            voucher_id: cmd.voucher_id,
            actor: cmd.actor.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn test_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 15, 3, 30, 0).unwrap()
    }

    fn record(receipt_id: ReceiptId, amount: i64) -> ReceiptCommand {
        let receipt_date = NaiveDate::from_ymd_opt(2025, 3, 15).unwrap();
        ReceiptCommand::RecordReceipt(RecordReceipt {
            receipt_id,
            receipt_no: default_receipt_no("INV-20250301-0001", receipt_date),
            invoice_id: InvoiceId::generate(),
            payment_method_id: PaymentMethodId::new(),
            amount: Money::new(amount),
            receipt_date,
            note: Some("  cash at front desk ".to_string()),
            voucher_id: None,
            actor: ActorId::new("cashier-2"),
            occurred_at: test_time(),
        })
    }

    #[test]
    fn default_number_embeds_invoice_and_date() {
        let date = NaiveDate::from_ymd_opt(2025, 3, 5).unwrap();
        assert_eq!(
            default_receipt_no("INV-20250301-0001", date),
            "REC-INV-20250301-0001-2025/03/05"
        );
    }

    #[test]
    fn record_receipt_emits_recorded_event() {
        let id = ReceiptId::generate();
        let mut receipt = Receipt::empty(id);
        let events = receipt.handle(&record(id, 1_100_000)).unwrap();
        assert_eq!(events.len(), 1);
        receipt.apply(&events[0]);

        assert!(receipt.exists());
        assert_eq!(receipt.amount(), Money::new(1_100_000));
        assert_eq!(receipt.receipt_no(), "REC-INV-20250301-0001-2025/03/15");
        assert_eq!(receipt.note(), Some("cash at front desk"));
        assert_eq!(receipt.version(), 1);
    }

    #[test]
    fn receipts_are_written_once() {
        let id = ReceiptId::generate();
        let mut receipt = Receipt::empty(id);
        let events = receipt.handle(&record(id, 10)).unwrap();
        receipt.apply(&events[0]);

        let err = receipt.handle(&record(id, 10)).unwrap_err();
        assert!(matches!(err, DomainError::AlreadyExists(_)));
    }

    #[test]
    fn amount_must_be_positive() {
        let id = ReceiptId::generate();
        let err = Receipt::empty(id).handle(&record(id, 0)).unwrap_err();
        assert_eq!(err.field(), Some("amount"));
    }
}
