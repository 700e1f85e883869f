//! `FinancialDocumentService`: composition root for the document use cases.
//!
//! Every mutation goes through the [`CommandDispatcher`]: load the document's stream, let the
//! aggregate decide, append with an exact expected version, publish. Lookups the aggregates must
//! not do themselves (current service prices, generated numbers, the business date) are resolved
//! here and carried in the commands.
//!
//! On construction the service replays the whole store into its number registry and summaries
//! projection, so several instances over one store share document numbers and line ids.

use std::sync::{Arc, Mutex};

use chrono::{Datelike, FixedOffset, NaiveDate};
use rust_decimal::Decimal;
use serde_json::Value as JsonValue;
use tracing::{debug, info, warn};

use homeledger_core::{
    ActorId, AggregateId, ApartmentId, DomainError, InvoiceId, JournalEntryId, LineId, ReceiptId,
    ServiceTypeId, TicketId, VoucherId,
};
use homeledger_events::{EventBus, EventEnvelope, Subscription};
use homeledger_invoicing::{
    ChangeInvoiceStatus, CreateInvoice, DeleteInvoice, Invoice, InvoiceCommand, InvoiceDetail,
    InvoiceStatus, PriceSource, Receipt, RemoveDetail, UpdateInvoiceHeader, UpsertDetail,
    normalize_invoice_no,
};
use homeledger_pricing::{ServicePriceResolver, ServicePriceSource};
use homeledger_vouchers::{
    ApproveVoucher, CancelVoucher, CreateVoucher, DeleteVoucher, RemoveItem, ReturnToDraft,
    SubmitVoucher, UpsertItem, Voucher, VoucherCommand, VoucherItem, VoucherItemSpec,
    VoucherStatus, normalize_voucher_no,
};

use crate::clock::{Clock, business_date};
use crate::command_dispatcher::{CommandDispatcher, DispatchError};
use crate::config::FinanceConfig;
use crate::error::FinanceError;
use crate::event_store::EventStore;
use crate::numbering::{DocumentKind, DocumentNumberRegistry, Reservation};
use crate::projections::{
    DocumentSummaryProjection, InvoiceFilter, InvoiceSummary, LineOwner, VoucherSummary,
};
use crate::read_model::{InvoiceView, ReceiptView, VoucherView};
use crate::receipt_processor::{ReceiptProcessor, RecordReceiptRequest};

/// Input for a new invoice draft.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewInvoiceDraft {
    pub apartment_id: ApartmentId,
    /// Generated as `INV-{yyyyMMdd}-{seq}` from the issue date when omitted.
    pub invoice_no: Option<String>,
    pub issue_date: NaiveDate,
    pub due_date: NaiveDate,
    pub note: Option<String>,
    pub ticket_id: Option<TicketId>,
    pub actor: ActorId,
}

/// Input for adding or replacing an invoice detail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvoiceDetailInput {
    /// Replaces the detail with this id when set; a new id is generated otherwise.
    pub detail_id: Option<LineId>,
    pub service_type_id: ServiceTypeId,
    pub description: String,
    pub quantity: Decimal,
    /// Ignored when the service type has a fixed price today.
    pub unit_price: Option<Decimal>,
    /// Configured default when omitted.
    pub vat_rate: Option<Decimal>,
}

/// A service billed on every monthly invoice of an apartment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecurringCharge {
    pub service_type_id: ServiceTypeId,
    pub description: String,
    /// Area for area-based fees, vehicle count for parking, 1 otherwise.
    pub quantity: Decimal,
}

/// Input for a new voucher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewVoucher {
    /// Generated as `PC-{year}-{seq}` when omitted and auto numbering is enabled.
    pub voucher_no: Option<String>,
    /// Today's business date when omitted.
    pub voucher_date: Option<NaiveDate>,
    pub counterparty: Option<String>,
    pub description: Option<String>,
    pub items: Vec<VoucherItemInput>,
    pub actor: ActorId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoucherItemInput {
    pub item_id: Option<LineId>,
    pub description: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub service_type_id: Option<ServiceTypeId>,
    pub apartment_id: Option<ApartmentId>,
}

impl VoucherItemInput {
    fn into_spec(self) -> VoucherItemSpec {
        VoucherItemSpec {
            item_id: self.item_id.unwrap_or_default(),
            description: self.description,
            quantity: self.quantity,
            unit_price: self.unit_price,
            service_type_id: self.service_type_id,
            apartment_id: self.apartment_id,
        }
    }
}

fn invoice_stream(id: AggregateId) -> Invoice {
    Invoice::empty(InvoiceId::new(id))
}

fn voucher_stream(id: AggregateId) -> Voucher {
    Voucher::empty(VoucherId::new(id))
}

fn receipt_stream(id: AggregateId) -> Receipt {
    Receipt::empty(ReceiptId::new(id))
}

/// Log a failed command and convert it for the caller.
fn rejected(operation: &'static str, document: AggregateId, err: DispatchError) -> FinanceError {
    if err.is_concurrency_conflict() {
        warn!(operation, document = %document, error = %err, "concurrent modification");
    } else {
        warn!(operation, document = %document, error = %err, "command rejected");
    }
    err.into()
}

/// Keep a number once its document's events are persisted, release it otherwise.
fn settle<T>(
    reservation: Option<Reservation<'_>>,
    result: Result<T, DispatchError>,
) -> Result<T, DispatchError> {
    if let Some(reservation) = reservation {
        if matches!(result, Ok(_) | Err(DispatchError::Publish(_))) {
            reservation.confirm();
        }
    }
    result
}

pub struct FinancialDocumentService<S, B> {
    dispatcher: CommandDispatcher<S, B>,
    prices: ServicePriceResolver<Arc<dyn ServicePriceSource>>,
    numbers: DocumentNumberRegistry,
    clock: Arc<dyn Clock>,
    config: FinanceConfig,
    offset: FixedOffset,
    summaries: DocumentSummaryProjection,
    feed: Mutex<Subscription<EventEnvelope<JsonValue>>>,
}

impl<S, B> FinancialDocumentService<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    pub fn new(
        store: S,
        bus: B,
        prices: Arc<dyn ServicePriceSource>,
        clock: Arc<dyn Clock>,
        config: FinanceConfig,
    ) -> Result<Self, FinanceError> {
        config.validate()?;
        let offset = config.business_offset()?;
        // Subscribe before replaying so nothing committed in between is missed.
        let feed = bus.subscribe();

        let service = Self {
            dispatcher: CommandDispatcher::new(store, bus),
            prices: ServicePriceResolver::new(prices),
            numbers: DocumentNumberRegistry::new(),
            clock,
            config,
            offset,
            summaries: DocumentSummaryProjection::in_memory(),
            feed: Mutex::new(feed),
        };
        service.replay_store()?;
        Ok(service)
    }

    /// Seed the number registry and the summaries from everything already stored.
    fn replay_store(&self) -> Result<(), FinanceError> {
        let history = self
            .dispatcher
            .store()
            .load_all()
            .map_err(DispatchError::from)?;
        let envelopes: Vec<_> = history.iter().map(|e| e.to_envelope()).collect();

        for envelope in &envelopes {
            self.numbers.observe(envelope);
        }
        let count = envelopes.len();
        self.summaries
            .rebuild_from_scratch(envelopes)
            .map_err(|e| FinanceError::Storage(format!("summary rebuild failed: {e}")))?;

        debug!(events = count, "document state replayed from store");
        Ok(())
    }

    pub fn config(&self) -> &FinanceConfig {
        &self.config
    }

    pub fn dispatcher(&self) -> &CommandDispatcher<S, B> {
        &self.dispatcher
    }

    /// Business date of the current instant.
    pub fn today(&self) -> NaiveDate {
        business_date(self.clock.now(), self.offset)
    }

    /// Apply everything published since the last call to the summaries projection and the
    /// number registry.
    fn refresh_summaries(&self) {
        let Ok(feed) = self.feed.lock() else {
            warn!("summary feed lock poisoned; summaries not refreshed");
            return;
        };
        for envelope in feed.drain() {
            self.numbers.observe(&envelope);
            if let Err(e) = self.summaries.apply_envelope(&envelope) {
                warn!(
                    aggregate_id = %envelope.aggregate_id(),
                    sequence_number = envelope.sequence_number(),
                    error = %e,
                    "document summary projection skipped an event"
                );
            }
        }
    }

    fn load_invoice(&self, invoice_id: InvoiceId) -> Result<Invoice, FinanceError> {
        let invoice = self
            .dispatcher
            .load(invoice_id.aggregate_id(), invoice_stream)?;
        if !invoice.exists() || invoice.is_deleted() {
            return Err(DomainError::InvoiceNotFound.into());
        }
        Ok(invoice)
    }

    fn load_voucher(&self, voucher_id: VoucherId) -> Result<Voucher, FinanceError> {
        let voucher = self
            .dispatcher
            .load(voucher_id.aggregate_id(), voucher_stream)?;
        if !voucher.exists() || voucher.is_deleted() {
            return Err(DomainError::VoucherNotFound.into());
        }
        Ok(voucher)
    }

    fn invoice_view(&self, invoice: &Invoice) -> Result<InvoiceView, FinanceError> {
        Ok(InvoiceView::project(invoice, self.today())?)
    }

    /// Line ids are unique across all invoices and vouchers.
    fn ensure_line_free(&self, line_id: LineId, owner: LineOwner) -> Result<(), FinanceError> {
        match self.summaries.line_owner(line_id) {
            Some(current) if current != owner => {
                warn!(
                    line_id = %line_id,
                    owner = ?current,
                    "line id already used by another document"
                );
                Err(DomainError::validation(
                    "line_id",
                    format!("line {line_id} belongs to another document"),
                )
                .into())
            }
            _ => Ok(()),
        }
    }

    // ---------------------------------------------------------------------
    // Invoices
    // ---------------------------------------------------------------------

    pub fn create_invoice_draft(&self, draft: NewInvoiceDraft) -> Result<InvoiceView, FinanceError> {
        self.refresh_summaries();
        let invoice_no = match draft.invoice_no.as_deref() {
            Some(no) => normalize_invoice_no(no)?,
            None => self.numbers.next_invoice_no(draft.issue_date)?,
        };
        let reservation = self.numbers.reserve(DocumentKind::Invoice, &invoice_no)?;

        let invoice_id = InvoiceId::generate();
        let cmd = InvoiceCommand::CreateInvoice(CreateInvoice {
            invoice_id,
            invoice_no: invoice_no.clone(),
            apartment_id: draft.apartment_id,
            issue_date: draft.issue_date,
            due_date: draft.due_date,
            note: draft.note,
            ticket_id: draft.ticket_id,
            actor: draft.actor,
            occurred_at: self.clock.now(),
        });

        let out = settle(Some(reservation), self.dispatcher.dispatch(cmd, invoice_stream))
            .map_err(|e| rejected("create_invoice_draft", invoice_id.aggregate_id(), e))?;

        info!(invoice_id = %invoice_id, invoice_no = %invoice_no, "invoice draft created");
        self.invoice_view(&out.aggregate)
    }

    /// Draft the monthly invoice of an apartment, dated by the billing schedule.
    ///
    /// Each recurring charge becomes a detail priced at the service's fixed price on the issue
    /// date; charges without a price on that date are skipped. Rejected when the apartment
    /// already has an invoice issued in that month, or when no charge could be priced.
    pub fn create_monthly_draft(
        &self,
        apartment_id: ApartmentId,
        year: i32,
        month: u32,
        charges: &[RecurringCharge],
        actor: ActorId,
    ) -> Result<InvoiceView, FinanceError> {
        let (issue_date, due_date) = self.config.billing.dates_for(year, month)?;

        // Held for the whole run so concurrent runs for the same month cannot both pass the
        // duplicate check.
        let _run = self.numbers.reserve(
            DocumentKind::MonthlyBilling,
            &format!("{apartment_id}/{year:04}-{month:02}"),
        )?;

        self.refresh_summaries();
        let filter = InvoiceFilter {
            apartment_id: Some(apartment_id),
            ..InvoiceFilter::default()
        };
        let billed = self
            .summaries
            .list_invoices(&filter, self.today())
            .into_iter()
            .find(|s| s.issue_date.year() == year && s.issue_date.month() == month);
        if let Some(existing) = billed {
            warn!(
                apartment_id = %apartment_id,
                invoice_no = %existing.invoice_no,
                "monthly invoice already exists"
            );
            return Err(DomainError::AlreadyExists(format!(
                "apartment {apartment_id} already has invoice {} for {year:04}-{month:02}",
                existing.invoice_no
            ))
            .into());
        }

        let invoice_no = self.numbers.next_invoice_no(issue_date)?;
        let reservation = self.numbers.reserve(DocumentKind::Invoice, &invoice_no)?;
        let invoice_id = InvoiceId::generate();
        let now = self.clock.now();

        let mut commands = vec![InvoiceCommand::CreateInvoice(CreateInvoice {
            invoice_id,
            invoice_no: invoice_no.clone(),
            apartment_id,
            issue_date,
            due_date,
            note: None,
            ticket_id: None,
            actor: actor.clone(),
            occurred_at: now,
        })];
        for charge in charges {
            let Some(unit_price) = self
                .prices
                .resolve_current_price(charge.service_type_id, issue_date)
            else {
                debug!(
                    apartment_id = %apartment_id,
                    service_type_id = %charge.service_type_id,
                    issue_date = %issue_date,
                    "recurring charge has no price; skipped"
                );
                continue;
            };
            commands.push(InvoiceCommand::UpsertDetail(UpsertDetail {
                invoice_id,
                detail_id: LineId::new(),
                service_type_id: charge.service_type_id,
                description: charge.description.clone(),
                quantity: charge.quantity,
                unit_price,
                vat_rate: self.config.default_vat_rate,
                price_source: PriceSource::ServicePrice,
                actor: actor.clone(),
                occurred_at: now,
            }));
        }
        if commands.len() == 1 {
            return Err(DomainError::validation(
                "charges",
                format!("no recurring charge has a price on {issue_date}"),
            )
            .into());
        }

        let prepared = self
            .dispatcher
            .prepare_all(&invoice_stream(invoice_id.aggregate_id()), &commands)
            .map_err(|e| rejected("create_monthly_draft", invoice_id.aggregate_id(), e))?;
        let out = settle(Some(reservation), self.dispatcher.commit(prepared))
            .map_err(|e| rejected("create_monthly_draft", invoice_id.aggregate_id(), e))?;

        info!(
            invoice_id = %invoice_id,
            invoice_no = %invoice_no,
            apartment_id = %apartment_id,
            details = out.aggregate.details().len(),
            total = out.aggregate.total().units(),
            "monthly invoice draft created"
        );
        self.invoice_view(&out.aggregate)
    }

    pub fn update_invoice_header(
        &self,
        invoice_id: InvoiceId,
        due_date: Option<NaiveDate>,
        note: Option<String>,
        actor: ActorId,
    ) -> Result<InvoiceView, FinanceError> {
        let cmd = InvoiceCommand::UpdateInvoiceHeader(UpdateInvoiceHeader {
            invoice_id,
            due_date,
            note,
            actor,
            occurred_at: self.clock.now(),
        });
        let out = self
            .dispatcher
            .dispatch(cmd, invoice_stream)
            .map_err(|e| rejected("update_invoice_header", invoice_id.aggregate_id(), e))?;

        info!(invoice_id = %invoice_id, "invoice header updated");
        self.invoice_view(&out.aggregate)
    }

    /// Add a detail, or replace the detail with the same id.
    ///
    /// The unit price is the service type's fixed price as of today's business date when one
    /// exists; otherwise the caller's price is used and must be greater than zero. The detail id
    /// must not belong to another invoice or voucher.
    pub fn upsert_invoice_detail(
        &self,
        invoice_id: InvoiceId,
        input: InvoiceDetailInput,
        actor: ActorId,
    ) -> Result<InvoiceDetail, FinanceError> {
        self.load_invoice(invoice_id)?;
        let detail_id = input.detail_id.unwrap_or_default();
        self.refresh_summaries();
        self.ensure_line_free(detail_id, LineOwner::Invoice(invoice_id))?;

        let as_of = self.today();

        let (unit_price, price_source) =
            match self.prices.resolve_current_price(input.service_type_id, as_of) {
                Some(fixed) => {
                    if let Some(given) = input.unit_price.filter(|p| *p != fixed) {
                        debug!(
                            invoice_id = %invoice_id,
                            service_type_id = %input.service_type_id,
                            given = %given,
                            fixed = %fixed,
                            "caller price replaced by the fixed service price"
                        );
                    }
                    (fixed, PriceSource::ServicePrice)
                }
                None => match input.unit_price {
                    Some(price) => (price, PriceSource::CallerSupplied),
                    None => {
                        return Err(DomainError::InvalidPrice(format!(
                            "service type {} has no fixed price on {as_of}; a unit price is required",
                            input.service_type_id
                        ))
                        .into());
                    }
                },
            };

        let cmd = InvoiceCommand::UpsertDetail(UpsertDetail {
            invoice_id,
            detail_id,
            service_type_id: input.service_type_id,
            description: input.description,
            quantity: input.quantity,
            unit_price,
            vat_rate: input.vat_rate.unwrap_or(self.config.default_vat_rate),
            price_source,
            actor,
            occurred_at: self.clock.now(),
        });

        let out = self
            .dispatcher
            .dispatch_with_retries(cmd, self.config.concurrency_retries, invoice_stream)
            .map_err(|e| rejected("upsert_invoice_detail", invoice_id.aggregate_id(), e))?;

        let detail = out
            .aggregate
            .detail(detail_id)
            .cloned()
            .ok_or_else(|| DomainError::invariant("saved detail missing from invoice"))?;

        info!(
            invoice_id = %invoice_id,
            detail_id = %detail_id,
            amount = detail.amount.units(),
            invoice_total = out.aggregate.total().units(),
            "invoice detail saved"
        );
        Ok(detail)
    }

    /// Remove a detail, addressed by its id alone.
    pub fn delete_invoice_detail(
        &self,
        detail_id: LineId,
        actor: ActorId,
    ) -> Result<InvoiceView, FinanceError> {
        self.refresh_summaries();
        let invoice_id = self
            .summaries
            .invoice_of_detail(detail_id)
            .ok_or(DomainError::DetailNotFound)?;

        let cmd = InvoiceCommand::RemoveDetail(RemoveDetail {
            invoice_id,
            detail_id,
            actor,
            occurred_at: self.clock.now(),
        });
        let out = self
            .dispatcher
            .dispatch_with_retries(cmd, self.config.concurrency_retries, invoice_stream)
            .map_err(|e| rejected("delete_invoice_detail", invoice_id.aggregate_id(), e))?;

        info!(
            invoice_id = %invoice_id,
            detail_id = %detail_id,
            invoice_total = out.aggregate.total().units(),
            "invoice detail removed"
        );
        self.invoice_view(&out.aggregate)
    }

    pub fn change_invoice_status(
        &self,
        invoice_id: InvoiceId,
        target: InvoiceStatus,
        note: Option<String>,
        actor: ActorId,
    ) -> Result<InvoiceView, FinanceError> {
        let cmd = InvoiceCommand::ChangeInvoiceStatus(ChangeInvoiceStatus {
            invoice_id,
            target,
            note,
            receipt_id: None,
            actor,
            occurred_at: self.clock.now(),
        });
        let out = self
            .dispatcher
            .dispatch(cmd, invoice_stream)
            .map_err(|e| rejected("change_invoice_status", invoice_id.aggregate_id(), e))?;

        info!(invoice_id = %invoice_id, status = %target, "invoice status changed");
        self.invoice_view(&out.aggregate)
    }

    /// Delete a draft invoice and free its number.
    pub fn delete_invoice(&self, invoice_id: InvoiceId, actor: ActorId) -> Result<(), FinanceError> {
        let cmd = InvoiceCommand::DeleteInvoice(DeleteInvoice {
            invoice_id,
            actor,
            occurred_at: self.clock.now(),
        });
        let out = self
            .dispatcher
            .dispatch(cmd, invoice_stream)
            .map_err(|e| rejected("delete_invoice", invoice_id.aggregate_id(), e))?;

        self.numbers
            .release(DocumentKind::Invoice, out.aggregate.invoice_no());
        info!(invoice_id = %invoice_id, invoice_no = %out.aggregate.invoice_no(), "invoice deleted");
        Ok(())
    }

    pub fn get_invoice(&self, invoice_id: InvoiceId) -> Result<InvoiceView, FinanceError> {
        let invoice = self.load_invoice(invoice_id)?;
        self.invoice_view(&invoice)
    }

    pub fn list_invoices(&self, filter: &InvoiceFilter) -> Vec<InvoiceSummary> {
        self.refresh_summaries();
        self.summaries.list_invoices(filter, self.today())
    }

    // ---------------------------------------------------------------------
    // Vouchers
    // ---------------------------------------------------------------------

    fn create_voucher(
        &self,
        voucher: NewVoucher,
        ticket_id: Option<TicketId>,
        submit: bool,
    ) -> Result<VoucherView, FinanceError> {
        self.refresh_summaries();
        let voucher_id = VoucherId::generate();
        let items: Vec<VoucherItemSpec> = voucher
            .items
            .into_iter()
            .map(VoucherItemInput::into_spec)
            .collect();
        for item in &items {
            self.ensure_line_free(item.item_id, LineOwner::Voucher(voucher_id))?;
        }

        let voucher_date = voucher.voucher_date.unwrap_or_else(|| self.today());
        let voucher_no = match voucher.voucher_no.as_deref() {
            Some(no) => Some(normalize_voucher_no(no)?),
            None if self.config.auto_number_vouchers => {
                Some(self.numbers.next_voucher_no(voucher_date.year())?)
            }
            None => None,
        };
        let reservation = match &voucher_no {
            Some(no) => Some(self.numbers.reserve(DocumentKind::Voucher, no)?),
            None => None,
        };

        let cmd = VoucherCommand::CreateVoucher(CreateVoucher {
            voucher_id,
            voucher_no: voucher_no.clone(),
            voucher_date,
            counterparty: voucher.counterparty,
            description: voucher.description,
            items,
            submit,
            ticket_id,
            receipt_id: None,
            actor: voucher.actor,
            occurred_at: self.clock.now(),
        });

        let out = settle(reservation, self.dispatcher.dispatch(cmd, voucher_stream))
            .map_err(|e| rejected("create_voucher", voucher_id.aggregate_id(), e))?;

        info!(
            voucher_id = %voucher_id,
            voucher_no = ?voucher_no,
            status = %out.aggregate.status(),
            total = out.aggregate.total().units(),
            "voucher created"
        );
        Ok(VoucherView::project(&out.aggregate)?)
    }

    pub fn create_voucher_draft(&self, voucher: NewVoucher) -> Result<VoucherView, FinanceError> {
        self.create_voucher(voucher, None, false)
    }

    /// Create a voucher on behalf of a ticket workflow; it starts PENDING.
    pub fn create_voucher_from_workflow(
        &self,
        ticket_id: TicketId,
        voucher: NewVoucher,
    ) -> Result<VoucherView, FinanceError> {
        self.create_voucher(voucher, Some(ticket_id), true)
    }

    pub fn upsert_voucher_item(
        &self,
        voucher_id: VoucherId,
        input: VoucherItemInput,
        actor: ActorId,
    ) -> Result<VoucherItem, FinanceError> {
        let item = input.into_spec();
        let item_id = item.item_id;
        self.refresh_summaries();
        self.ensure_line_free(item_id, LineOwner::Voucher(voucher_id))?;

        let cmd = VoucherCommand::UpsertItem(UpsertItem {
            voucher_id,
            item,
            actor,
            occurred_at: self.clock.now(),
        });
        let out = self
            .dispatcher
            .dispatch_with_retries(cmd, self.config.concurrency_retries, voucher_stream)
            .map_err(|e| rejected("upsert_voucher_item", voucher_id.aggregate_id(), e))?;

        let saved = out
            .aggregate
            .item(item_id)
            .cloned()
            .ok_or_else(|| DomainError::invariant("saved item missing from voucher"))?;

        info!(
            voucher_id = %voucher_id,
            item_id = %item_id,
            amount = saved.amount.units(),
            voucher_total = out.aggregate.total().units(),
            "voucher item saved"
        );
        Ok(saved)
    }

    /// Remove an item, addressed by its id alone.
    pub fn delete_voucher_item(
        &self,
        item_id: LineId,
        actor: ActorId,
    ) -> Result<VoucherView, FinanceError> {
        self.refresh_summaries();
        let voucher_id = self
            .summaries
            .voucher_of_item(item_id)
            .ok_or(DomainError::ItemNotFound)?;

        let cmd = VoucherCommand::RemoveItem(RemoveItem {
            voucher_id,
            item_id,
            actor,
            occurred_at: self.clock.now(),
        });
        let out = self
            .dispatcher
            .dispatch_with_retries(cmd, self.config.concurrency_retries, voucher_stream)
            .map_err(|e| rejected("delete_voucher_item", voucher_id.aggregate_id(), e))?;

        info!(voucher_id = %voucher_id, item_id = %item_id, "voucher item removed");
        Ok(VoucherView::project(&out.aggregate)?)
    }

    fn change_voucher(
        &self,
        operation: &'static str,
        voucher_id: VoucherId,
        cmd: VoucherCommand,
    ) -> Result<VoucherView, FinanceError> {
        let out = self
            .dispatcher
            .dispatch(cmd, voucher_stream)
            .map_err(|e| rejected(operation, voucher_id.aggregate_id(), e))?;

        info!(
            operation,
            voucher_id = %voucher_id,
            status = %out.aggregate.status(),
            "voucher status changed"
        );
        Ok(VoucherView::project(&out.aggregate)?)
    }

    pub fn submit_voucher(
        &self,
        voucher_id: VoucherId,
        actor: ActorId,
    ) -> Result<VoucherView, FinanceError> {
        let cmd = VoucherCommand::SubmitVoucher(SubmitVoucher {
            voucher_id,
            actor,
            occurred_at: self.clock.now(),
        });
        self.change_voucher("submit_voucher", voucher_id, cmd)
    }

    pub fn return_voucher_to_draft(
        &self,
        voucher_id: VoucherId,
        note: Option<String>,
        actor: ActorId,
    ) -> Result<VoucherView, FinanceError> {
        let cmd = VoucherCommand::ReturnToDraft(ReturnToDraft {
            voucher_id,
            note,
            actor,
            occurred_at: self.clock.now(),
        });
        self.change_voucher("return_voucher_to_draft", voucher_id, cmd)
    }

    /// Approve a pending voucher and attach a new journal-entry reference.
    pub fn approve_voucher(
        &self,
        voucher_id: VoucherId,
        approver: ActorId,
    ) -> Result<VoucherView, FinanceError> {
        let cmd = VoucherCommand::ApproveVoucher(ApproveVoucher {
            voucher_id,
            journal_entry_id: JournalEntryId::new(),
            actor: approver,
            occurred_at: self.clock.now(),
        });
        self.change_voucher("approve_voucher", voucher_id, cmd)
    }

    pub fn cancel_voucher(
        &self,
        voucher_id: VoucherId,
        note: Option<String>,
        actor: ActorId,
    ) -> Result<VoucherView, FinanceError> {
        let cmd = VoucherCommand::CancelVoucher(CancelVoucher {
            voucher_id,
            note,
            actor,
            occurred_at: self.clock.now(),
        });
        self.change_voucher("cancel_voucher", voucher_id, cmd)
    }

    /// Delete a draft voucher and free its number.
    pub fn delete_voucher(&self, voucher_id: VoucherId, actor: ActorId) -> Result<(), FinanceError> {
        let cmd = VoucherCommand::DeleteVoucher(DeleteVoucher {
            voucher_id,
            actor,
            occurred_at: self.clock.now(),
        });
        let out = self
            .dispatcher
            .dispatch(cmd, voucher_stream)
            .map_err(|e| rejected("delete_voucher", voucher_id.aggregate_id(), e))?;

        if let Some(no) = out.aggregate.voucher_no() {
            self.numbers.release(DocumentKind::Voucher, no);
        }
        info!(voucher_id = %voucher_id, "voucher deleted");
        Ok(())
    }

    pub fn get_voucher(&self, voucher_id: VoucherId) -> Result<VoucherView, FinanceError> {
        let voucher = self.load_voucher(voucher_id)?;
        Ok(VoucherView::project(&voucher)?)
    }

    pub fn list_vouchers(&self, status: Option<VoucherStatus>) -> Vec<VoucherSummary> {
        self.refresh_summaries();
        self.summaries.list_vouchers(status)
    }

    // ---------------------------------------------------------------------
    // Receipts
    // ---------------------------------------------------------------------

    /// Record a receipt against an issued (or overdue) invoice; the invoice becomes PAID.
    pub fn record_receipt(&self, request: RecordReceiptRequest) -> Result<ReceiptView, FinanceError> {
        self.refresh_summaries();
        let today = self.today();
        let recorded = ReceiptProcessor::new(
            &self.dispatcher,
            &self.numbers,
            self.config.auto_number_vouchers,
        )
        .record_receipt(request, self.clock.now(), today)?;

        Ok(ReceiptView::project(
            &recorded.receipt,
            &recorded.invoice,
            today,
        )?)
    }

    pub fn get_receipt(&self, receipt_id: ReceiptId) -> Result<ReceiptView, FinanceError> {
        let receipt = self
            .dispatcher
            .load(receipt_id.aggregate_id(), receipt_stream)?;
        let invoice_id = match receipt.invoice_id() {
            Some(id) if receipt.exists() => id,
            _ => return Err(DomainError::ReceiptNotFound.into()),
        };
        let invoice = self
            .dispatcher
            .load(invoice_id.aggregate_id(), invoice_stream)?;

        Ok(ReceiptView::project(&receipt, &invoice, self.today())?)
    }
}
