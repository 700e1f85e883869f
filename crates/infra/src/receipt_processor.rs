//! Receipt processing.
//!
//! Recording a receipt touches up to three streams: the new receipt, the settled invoice (which
//! moves to PAID) and, on request, a DRAFT reconciliation voucher. All decisions are made first
//! against loaded state; the events are then committed with one multi-stream append: receipt,
//! then voucher, then invoice. On a store that cannot commit the batch atomically, an invoice
//! that reads PAID therefore always has its receipt and voucher stored.

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde_json::Value as JsonValue;
use tracing::{error, info, warn};

use homeledger_core::{
    ActorId, DomainError, InvoiceId, LineId, Money, PaymentMethodId, ReceiptId, VoucherId,
};
use homeledger_events::{EventBus, EventEnvelope};
use homeledger_invoicing::{
    ChangeInvoiceStatus, Invoice, InvoiceCommand, InvoiceStatus, Receipt, ReceiptCommand,
    RecordReceipt, default_receipt_no,
};
use homeledger_vouchers::{CreateVoucher, Voucher, VoucherCommand, VoucherItemSpec};

use crate::command_dispatcher::{CommandDispatcher, DispatchError};
use crate::error::FinanceError;
use crate::event_store::{EventStore, EventStoreError};
use crate::numbering::{DocumentKind, DocumentNumberRegistry, Reservation};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordReceiptRequest {
    pub invoice_id: InvoiceId,
    pub payment_method_id: PaymentMethodId,
    /// Collected amount; must equal the invoice total.
    pub amount: Money,
    pub note: Option<String>,
    /// Defaults to `REC-{invoice_no}-{yyyy/MM/dd}`.
    pub receipt_no: Option<String>,
    /// Defaults to today's business date.
    pub receipt_date: Option<NaiveDate>,
    /// Also create a DRAFT voucher for the collected amount, linked to the receipt.
    pub create_reconciliation_voucher: bool,
    pub actor: ActorId,
}

/// State of every document written by a successful receipt.
#[derive(Debug, Clone)]
pub struct RecordedReceipt {
    pub receipt: Receipt,
    pub invoice: Invoice,
    pub voucher: Option<Voucher>,
}

pub struct ReceiptProcessor<'a, S, B> {
    dispatcher: &'a CommandDispatcher<S, B>,
    numbers: &'a DocumentNumberRegistry,
    auto_number_vouchers: bool,
}

impl<'a, S, B> ReceiptProcessor<'a, S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    pub fn new(
        dispatcher: &'a CommandDispatcher<S, B>,
        numbers: &'a DocumentNumberRegistry,
        auto_number_vouchers: bool,
    ) -> Self {
        Self {
            dispatcher,
            numbers,
            auto_number_vouchers,
        }
    }

    /// Record a receipt against an issued (or overdue) invoice and mark the invoice PAID.
    ///
    /// `now` is the instant stamped on every event; `today` is the business date used for the
    /// default receipt date.
    pub fn record_receipt(
        &self,
        request: RecordReceiptRequest,
        now: DateTime<Utc>,
        today: NaiveDate,
    ) -> Result<RecordedReceipt, FinanceError> {
        let invoice_id = request.invoice_id;
        let invoice: Invoice = self
            .dispatcher
            .load(invoice_id.aggregate_id(), |id| Invoice::empty(InvoiceId::new(id)))?;
        if !invoice.exists() || invoice.is_deleted() {
            return Err(DomainError::InvoiceNotFound.into());
        }
        if let Err(e) = invoice.ensure_payable(request.amount) {
            warn!(
                invoice_id = %invoice_id,
                status = %invoice.effective_status(today),
                error = %e,
                "receipt rejected"
            );
            return Err(e.into());
        }

        let receipt_date = request.receipt_date.unwrap_or(today);
        let receipt_no = match request.receipt_no.as_deref().map(str::trim) {
            Some(no) if !no.is_empty() => no.to_string(),
            _ => default_receipt_no(invoice.invoice_no(), receipt_date),
        };
        let receipt_reservation = self.numbers.reserve(DocumentKind::Receipt, &receipt_no)?;

        let receipt_id = ReceiptId::generate();
        let voucher_id = request
            .create_reconciliation_voucher
            .then(VoucherId::generate);

        let receipt = self.dispatcher.prepare(
            &Receipt::empty(receipt_id),
            &ReceiptCommand::RecordReceipt(RecordReceipt {
                receipt_id,
                receipt_no: receipt_no.clone(),
                invoice_id,
                payment_method_id: request.payment_method_id,
                amount: request.amount,
                receipt_date,
                note: request.note.clone(),
                voucher_id,
                actor: request.actor.clone(),
                occurred_at: now,
            }),
        )?;

        let paid = self.dispatcher.prepare(
            &invoice,
            &InvoiceCommand::ChangeInvoiceStatus(ChangeInvoiceStatus {
                invoice_id,
                target: InvoiceStatus::Paid,
                note: Some(format!("Paid by receipt {receipt_no}")),
                receipt_id: Some(receipt_id),
                actor: request.actor.clone(),
                occurred_at: now,
            }),
        )?;

        let mut voucher_reservation = None;
        let voucher = match voucher_id {
            Some(voucher_id) => {
                let voucher_no = if self.auto_number_vouchers {
                    let no = self.numbers.next_voucher_no(receipt_date.year())?;
                    voucher_reservation = Some(self.numbers.reserve(DocumentKind::Voucher, &no)?);
                    Some(no)
                } else {
                    None
                };
                let cmd = VoucherCommand::CreateVoucher(CreateVoucher {
                    voucher_id,
                    voucher_no,
                    voucher_date: receipt_date,
                    counterparty: None,
                    description: Some(format!("Reconciliation of receipt {receipt_no}")),
                    items: vec![VoucherItemSpec {
                        item_id: LineId::new(),
                        description: format!(
                            "Receipt {receipt_no} for invoice {}",
                            invoice.invoice_no()
                        ),
                        quantity: Decimal::ONE,
                        unit_price: Decimal::from(request.amount.units()),
                        service_type_id: None,
                        apartment_id: invoice.apartment_id(),
                    }],
                    submit: false,
                    ticket_id: invoice.ticket_id(),
                    receipt_id: Some(receipt_id),
                    actor: request.actor.clone(),
                    occurred_at: now,
                });
                Some(self.dispatcher.prepare(&Voucher::empty(voucher_id), &cmd)?)
            }
            None => None,
        };

        let mut batch = vec![receipt.stream_append()];
        if let Some(v) = &voucher {
            batch.push(v.stream_append());
        }
        batch.push(paid.stream_append());

        match self.dispatcher.commit_atomic(batch) {
            Ok(_) => {}
            Err(DispatchError::Store(EventStoreError::PartialCommit {
                committed,
                failed,
                reason,
                ..
            })) if committed.contains(&receipt_id.aggregate_id()) => {
                receipt_reservation.confirm();
                if let Some(v) = voucher_reservation {
                    if voucher_id.is_some_and(|id| committed.contains(&id.aggregate_id())) {
                        v.confirm();
                    }
                }
                if committed.contains(&invoice_id.aggregate_id()) {
                    // Only reachable on a store that writes streams out of batch order.
                    error!(
                        receipt_id = %receipt_id,
                        invoice_id = %invoice_id,
                        failed_stream = %failed,
                        reason = %reason,
                        "invoice paid without its reconciliation voucher"
                    );
                    return Err(FinanceError::ReconciliationVoucherMissing {
                        receipt_id,
                        voucher_id: voucher_id.unwrap_or_else(|| VoucherId::new(failed)),
                        reason,
                    });
                }
                error!(
                    receipt_id = %receipt_id,
                    invoice_id = %invoice_id,
                    failed_stream = %failed,
                    reason = %reason,
                    "receipt committed without its invoice status change; manual reconciliation required"
                );
                return Err(FinanceError::ReceiptReconciliation {
                    receipt_id,
                    invoice_id,
                    reason,
                });
            }
            Err(DispatchError::Publish(reason)) => {
                // Persisted; only the notification failed.
                confirm(receipt_reservation, voucher_reservation);
                return Err(FinanceError::Storage(format!(
                    "receipt {receipt_id} committed but not published: {reason}"
                )));
            }
            Err(e) => {
                warn!(
                    receipt_no = %receipt_no,
                    invoice_id = %invoice_id,
                    error = %e,
                    "receipt not committed"
                );
                return Err(e.into());
            }
        }

        confirm(receipt_reservation, voucher_reservation);
        info!(
            receipt_id = %receipt_id,
            receipt_no = %receipt_no,
            invoice_id = %invoice_id,
            amount = request.amount.units(),
            voucher_id = ?voucher_id,
            "receipt recorded, invoice paid"
        );

        Ok(RecordedReceipt {
            receipt: receipt.aggregate,
            invoice: paid.aggregate,
            voucher: voucher.map(|v| v.aggregate),
        })
    }
}

fn confirm(receipt: Reservation<'_>, voucher: Option<Reservation<'_>>) {
    receipt.confirm();
    if let Some(v) = voucher {
        v.confirm();
    }
}
