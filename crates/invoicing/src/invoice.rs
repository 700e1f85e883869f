use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use homeledger_core::{
    ActorId, Aggregate, AggregateId, AggregateRoot, ApartmentId, DomainError, DomainResult, Entity,
    InvoiceId, LineId, Money, ReceiptId, ServiceTypeId, TicketId, entity::position_of,
};
use homeledger_events::{Command, Event};
use homeledger_pricing::{DocumentTotals, LineAmounts, calculate_line};

pub const INVOICE_NO_MIN_LEN: usize = 3;
pub const INVOICE_NO_MAX_LEN: usize = 64;
pub const NOTE_MAX_LEN: usize = 1000;
pub const DESCRIPTION_MAX_LEN: usize = 500;

/// Invoice status lifecycle.
///
/// `Overdue` is never stored: it is derived at read time from an `Issued` invoice whose due date
/// has passed (see [`Invoice::effective_status`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InvoiceStatus {
    Draft,
    Issued,
    Overdue,
    Paid,
    Cancelled,
}

impl InvoiceStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            InvoiceStatus::Draft => "DRAFT",
            InvoiceStatus::Issued => "ISSUED",
            InvoiceStatus::Overdue => "OVERDUE",
            InvoiceStatus::Paid => "PAID",
            InvoiceStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, InvoiceStatus::Paid | InvoiceStatus::Cancelled)
    }

    /// Transition table. `Overdue` behaves like `Issued` as a source and is never a target.
    pub fn can_transition_to(self, target: InvoiceStatus) -> bool {
        use InvoiceStatus::*;
        matches!(
            (self, target),
            (Draft, Issued)
                | (Draft, Cancelled)
                | (Issued | Overdue, Paid)
                | (Issued | Overdue, Cancelled)
        )
    }
}

impl core::fmt::Display for InvoiceStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a detail's unit price came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriceSource {
    /// Forced to the service type's effective price.
    ServicePrice,
    /// The service type has no fixed price; the caller supplied one.
    CallerSupplied,
}

/// Invoice line. Amounts are derived from quantity, unit price and VAT rate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceDetail {
    pub id: LineId,
    pub service_type_id: ServiceTypeId,
    pub description: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub vat_rate: Decimal,
    pub amount: Money,
    pub vat_amount: Money,
    pub price_source: PriceSource,
}

impl InvoiceDetail {
    pub fn line_amounts(&self) -> LineAmounts {
        LineAmounts {
            amount: self.amount,
            vat_amount: self.vat_amount,
        }
    }
}

impl Entity for InvoiceDetail {
    type Id = LineId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

/// One entry of the status audit trail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusChange {
    pub from: InvoiceStatus,
    pub to: InvoiceStatus,
    pub note: Option<String>,
    pub changed_by: ActorId,
    pub changed_at: DateTime<Utc>,
}

/// Aggregate root: Invoice with its details.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invoice {
    id: InvoiceId,
    invoice_no: String,
    apartment_id: Option<ApartmentId>,
    issue_date: Option<NaiveDate>,
    due_date: Option<NaiveDate>,
    status: InvoiceStatus,
    details: Vec<InvoiceDetail>,
    totals: DocumentTotals,
    note: Option<String>,
    ticket_id: Option<TicketId>,
    receipt_id: Option<ReceiptId>,
    status_history: Vec<StatusChange>,
    created_at: Option<DateTime<Utc>>,
    created_by: Option<ActorId>,
    updated_at: Option<DateTime<Utc>>,
    updated_by: Option<ActorId>,
    version: u64,
    created: bool,
    deleted: bool,
}

impl Invoice {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: InvoiceId) -> Self {
        Self {
            id,
            invoice_no: String::new(),
            apartment_id: None,
            issue_date: None,
            due_date: None,
            status: InvoiceStatus::Draft,
            details: Vec::new(),
            totals: DocumentTotals::ZERO,
            note: None,
            ticket_id: None,
            receipt_id: None,
            status_history: Vec::new(),
            created_at: None,
            created_by: None,
            updated_at: None,
            updated_by: None,
            version: 0,
            created: false,
            deleted: false,
        }
    }

    pub fn id_typed(&self) -> InvoiceId {
        self.id
    }

    /// Created and not deleted.
    pub fn exists(&self) -> bool {
        self.created && !self.deleted
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted
    }

    pub fn invoice_no(&self) -> &str {
        &self.invoice_no
    }

    pub fn apartment_id(&self) -> Option<ApartmentId> {
        self.apartment_id
    }

    pub fn issue_date(&self) -> Option<NaiveDate> {
        self.issue_date
    }

    pub fn due_date(&self) -> Option<NaiveDate> {
        self.due_date
    }

    /// Stored status (never `Overdue`).
    pub fn status(&self) -> InvoiceStatus {
        self.status
    }

    /// Status as seen on `today`: an issued invoice past its due date reads as `Overdue`.
    pub fn effective_status(&self, today: NaiveDate) -> InvoiceStatus {
        match (self.status, self.due_date) {
            (InvoiceStatus::Issued, Some(due)) if due < today => InvoiceStatus::Overdue,
            (status, _) => status,
        }
    }

    pub fn details(&self) -> &[InvoiceDetail] {
        &self.details
    }

    pub fn detail(&self, id: LineId) -> Option<&InvoiceDetail> {
        self.details.iter().find(|d| d.id == id)
    }

    pub fn totals(&self) -> DocumentTotals {
        self.totals
    }

    pub fn subtotal(&self) -> Money {
        self.totals.subtotal
    }

    pub fn tax(&self) -> Money {
        self.totals.tax
    }

    pub fn total(&self) -> Money {
        self.totals.total
    }

    pub fn note(&self) -> Option<&str> {
        self.note.as_deref()
    }

    pub fn ticket_id(&self) -> Option<TicketId> {
        self.ticket_id
    }

    pub fn receipt_id(&self) -> Option<ReceiptId> {
        self.receipt_id
    }

    pub fn status_history(&self) -> &[StatusChange] {
        &self.status_history
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    pub fn created_by(&self) -> Option<&ActorId> {
        self.created_by.as_ref()
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }

    pub fn updated_by(&self) -> Option<&ActorId> {
        self.updated_by.as_ref()
    }

    /// Details may only change while the invoice is a draft.
    pub fn is_editable(&self) -> bool {
        self.status == InvoiceStatus::Draft
    }

    /// Check that a receipt of `amount` can settle this invoice.
    ///
    /// The invoice must be awaiting payment (issued or overdue), not already linked to a
    /// receipt, and `amount` must equal the invoice total.
    pub fn ensure_payable(&self, amount: Money) -> DomainResult<()> {
        self.ensure_exists()?;
        if self.status != InvoiceStatus::Issued || self.receipt_id.is_some() {
            return Err(DomainError::transition(
                self.status,
                InvoiceStatus::Paid,
                "only issued or overdue invoices can be paid by a receipt",
            ));
        }
        if !amount.is_positive() {
            return Err(DomainError::validation(
                "amount",
                "receipt amount must be greater than zero",
            ));
        }
        if amount != self.totals.total {
            return Err(DomainError::validation(
                "amount",
                format!(
                    "receipt amount {amount} must equal the invoice total {}",
                    self.totals.total
                ),
            ));
        }
        Ok(())
    }
}

impl AggregateRoot for Invoice {
    type Id = InvoiceId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: CreateInvoice (starts a DRAFT with zero amounts).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateInvoice {
    pub invoice_id: InvoiceId,
    pub invoice_no: String,
    pub apartment_id: ApartmentId,
    pub issue_date: NaiveDate,
    pub due_date: NaiveDate,
    pub note: Option<String>,
    pub ticket_id: Option<TicketId>,
    pub actor: ActorId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: UpdateInvoiceHeader. `None` leaves a field unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateInvoiceHeader {
    pub invoice_id: InvoiceId,
    pub due_date: Option<NaiveDate>,
    pub note: Option<String>,
    pub actor: ActorId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: UpsertDetail (add, or replace by `detail_id`).
///
/// The unit price is resolved before the command is built; `price_source` records whether it
/// is the service type's fixed price or a caller-supplied one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpsertDetail {
    pub invoice_id: InvoiceId,
    pub detail_id: LineId,
    pub service_type_id: ServiceTypeId,
    pub description: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub vat_rate: Decimal,
    pub price_source: PriceSource,
    pub actor: ActorId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RemoveDetail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveDetail {
    pub invoice_id: InvoiceId,
    pub detail_id: LineId,
    pub actor: ActorId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ChangeInvoiceStatus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeInvoiceStatus {
    pub invoice_id: InvoiceId,
    pub target: InvoiceStatus,
    pub note: Option<String>,
    /// Set when the change to PAID is driven by a receipt.
    pub receipt_id: Option<ReceiptId>,
    pub actor: ActorId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: DeleteInvoice (drafts only).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteInvoice {
    pub invoice_id: InvoiceId,
    pub actor: ActorId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvoiceCommand {
    CreateInvoice(CreateInvoice),
    UpdateInvoiceHeader(UpdateInvoiceHeader),
    UpsertDetail(UpsertDetail),
    RemoveDetail(RemoveDetail),
    ChangeInvoiceStatus(ChangeInvoiceStatus),
    DeleteInvoice(DeleteInvoice),
}

impl InvoiceCommand {
    pub fn invoice_id(&self) -> InvoiceId {
        match self {
            InvoiceCommand::CreateInvoice(c) => c.invoice_id,
            InvoiceCommand::UpdateInvoiceHeader(c) => c.invoice_id,
            InvoiceCommand::UpsertDetail(c) => c.invoice_id,
            InvoiceCommand::RemoveDetail(c) => c.invoice_id,
            InvoiceCommand::ChangeInvoiceStatus(c) => c.invoice_id,
            InvoiceCommand::DeleteInvoice(c) => c.invoice_id,
        }
    }
}

impl Command for InvoiceCommand {
    fn target_aggregate_id(&self) -> AggregateId {
        self.invoice_id().aggregate_id()
    }
}

/// Event: InvoiceCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceCreated {
    pub invoice_id: InvoiceId,
    pub invoice_no: String,
    pub apartment_id: ApartmentId,
    pub issue_date: NaiveDate,
    pub due_date: NaiveDate,
    pub note: Option<String>,
    pub ticket_id: Option<TicketId>,
    pub actor: ActorId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: InvoiceHeaderUpdated (carries the resulting header values).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceHeaderUpdated {
    pub invoice_id: InvoiceId,
    pub due_date: NaiveDate,
    pub note: Option<String>,
    pub actor: ActorId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: DetailUpserted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetailUpserted {
    pub invoice_id: InvoiceId,
    pub detail: InvoiceDetail,
    pub actor: ActorId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: DetailRemoved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetailRemoved {
    pub invoice_id: InvoiceId,
    pub detail_id: LineId,
    pub actor: ActorId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: InvoiceStatusChanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceStatusChanged {
    pub invoice_id: InvoiceId,
    pub from: InvoiceStatus,
    pub to: InvoiceStatus,
    pub note: Option<String>,
    pub receipt_id: Option<ReceiptId>,
    pub actor: ActorId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: InvoiceDeleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceDeleted {
    pub invoice_id: InvoiceId,
    pub invoice_no: String,
    pub actor: ActorId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvoiceEvent {
    InvoiceCreated(InvoiceCreated),
    InvoiceHeaderUpdated(InvoiceHeaderUpdated),
    DetailUpserted(DetailUpserted),
    DetailRemoved(DetailRemoved),
    InvoiceStatusChanged(InvoiceStatusChanged),
    InvoiceDeleted(InvoiceDeleted),
}

impl Event for InvoiceEvent {
    fn event_type(&self) -> &'static str {
        match self {
            InvoiceEvent::InvoiceCreated(_) => "invoicing.invoice.created",
            InvoiceEvent::InvoiceHeaderUpdated(_) => "invoicing.invoice.header_updated",
            InvoiceEvent::DetailUpserted(_) => "invoicing.invoice.detail_upserted",
            InvoiceEvent::DetailRemoved(_) => "invoicing.invoice.detail_removed",
            InvoiceEvent::InvoiceStatusChanged(_) => "invoicing.invoice.status_changed",
            InvoiceEvent::InvoiceDeleted(_) => "invoicing.invoice.deleted",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            InvoiceEvent::InvoiceCreated(e) => e.occurred_at,
            InvoiceEvent::InvoiceHeaderUpdated(e) => e.occurred_at,
            InvoiceEvent::DetailUpserted(e) => e.occurred_at,
            InvoiceEvent::DetailRemoved(e) => e.occurred_at,
            InvoiceEvent::InvoiceStatusChanged(e) => e.occurred_at,
            InvoiceEvent::InvoiceDeleted(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Invoice {
    type Command = InvoiceCommand;
    type Event = InvoiceEvent;
    type Error = DomainError;

    const AGGREGATE_TYPE: &'static str = "invoicing.invoice";

    fn apply(&mut self, event: &Self::Event) {
        match event {
            InvoiceEvent::InvoiceCreated(e) => {
                self.id = e.invoice_id;
                self.invoice_no = e.invoice_no.clone();
                self.apartment_id = Some(e.apartment_id);
                self.issue_date = Some(e.issue_date);
                self.due_date = Some(e.due_date);
                self.note = e.note.clone();
                self.ticket_id = e.ticket_id;
                self.status = InvoiceStatus::Draft;
                self.details.clear();
                self.created_at = Some(e.occurred_at);
                self.created_by = Some(e.actor.clone());
                self.created = true;
            }
            InvoiceEvent::InvoiceHeaderUpdated(e) => {
                self.due_date = Some(e.due_date);
                self.note = e.note.clone();
            }
            InvoiceEvent::DetailUpserted(e) => match position_of(&self.details, &e.detail.id) {
                Some(idx) => self.details[idx] = e.detail.clone(),
                None => self.details.push(e.detail.clone()),
            },
            InvoiceEvent::DetailRemoved(e) => {
                self.details.retain(|d| d.id != e.detail_id);
            }
            InvoiceEvent::InvoiceStatusChanged(e) => {
                self.status = e.to;
                if e.receipt_id.is_some() {
                    self.receipt_id = e.receipt_id;
                }
                self.status_history.push(StatusChange {
                    from: e.from,
                    to: e.to,
                    note: e.note.clone(),
                    changed_by: e.actor.clone(),
                    changed_at: e.occurred_at,
                });
            }
            InvoiceEvent::InvoiceDeleted(_) => {
                self.deleted = true;
            }
        }

        let (actor, at) = match event {
            InvoiceEvent::InvoiceCreated(e) => (&e.actor, e.occurred_at),
            InvoiceEvent::InvoiceHeaderUpdated(e) => (&e.actor, e.occurred_at),
            InvoiceEvent::DetailUpserted(e) => (&e.actor, e.occurred_at),
            InvoiceEvent::DetailRemoved(e) => (&e.actor, e.occurred_at),
            InvoiceEvent::InvoiceStatusChanged(e) => (&e.actor, e.occurred_at),
            InvoiceEvent::InvoiceDeleted(e) => (&e.actor, e.occurred_at),
        };
        self.updated_by = Some(actor.clone());
        self.updated_at = Some(at);

        // Totals are never carried by events. Overflow is rejected in `handle`.
        if let Ok(totals) = DocumentTotals::from_lines(self.details.iter().map(|d| d.line_amounts())) {
            self.totals = totals;
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            InvoiceCommand::CreateInvoice(cmd) => self.handle_create(cmd),
            InvoiceCommand::UpdateInvoiceHeader(cmd) => self.handle_update_header(cmd),
            InvoiceCommand::UpsertDetail(cmd) => self.handle_upsert_detail(cmd),
            InvoiceCommand::RemoveDetail(cmd) => self.handle_remove_detail(cmd),
            InvoiceCommand::ChangeInvoiceStatus(cmd) => self.handle_change_status(cmd),
            InvoiceCommand::DeleteInvoice(cmd) => self.handle_delete(cmd),
        }
    }
}

fn validate_note(note: Option<&str>) -> DomainResult<()> {
    match note {
        Some(n) if n.chars().count() > NOTE_MAX_LEN => Err(DomainError::validation(
            "note",
            format!("must be at most {NOTE_MAX_LEN} characters"),
        )),
        _ => Ok(()),
    }
}

fn normalize_note(note: &Option<String>) -> Option<String> {
    note.as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .map(str::to_string)
}

/// Trimmed invoice number, checked for length.
pub fn normalize_invoice_no(raw: &str) -> DomainResult<String> {
    let trimmed = raw.trim();
    let len = trimmed.chars().count();
    if !(INVOICE_NO_MIN_LEN..=INVOICE_NO_MAX_LEN).contains(&len) {
        return Err(DomainError::validation(
            "invoice_no",
            format!("must be between {INVOICE_NO_MIN_LEN} and {INVOICE_NO_MAX_LEN} characters"),
        ));
    }
    Ok(trimmed.to_string())
}

impl Invoice {
    fn ensure_exists(&self) -> DomainResult<()> {
        if !self.exists() {
            return Err(DomainError::InvoiceNotFound);
        }
        Ok(())
    }

    fn ensure_invoice_id(&self, invoice_id: InvoiceId) -> DomainResult<()> {
        if self.id != invoice_id {
            return Err(DomainError::invariant("invoice_id mismatch"));
        }
        Ok(())
    }

    fn ensure_editable(&self) -> DomainResult<()> {
        if !self.is_editable() {
            return Err(DomainError::InvoiceNotEditable {
                status: self.status.to_string(),
            });
        }
        Ok(())
    }

    fn handle_create(&self, cmd: &CreateInvoice) -> DomainResult<Vec<InvoiceEvent>> {
        if self.created {
            return Err(DomainError::AlreadyExists(format!(
                "invoice {}",
                cmd.invoice_id
            )));
        }
        self.ensure_invoice_id(cmd.invoice_id)?;

        let invoice_no = normalize_invoice_no(&cmd.invoice_no)?;
        if cmd.due_date < cmd.issue_date {
            return Err(DomainError::validation(
                "due_date",
                "must not be earlier than the issue date",
            ));
        }
        let note = normalize_note(&cmd.note);
        validate_note(note.as_deref())?;

        Ok(vec![InvoiceEvent::InvoiceCreated(InvoiceCreated {
            invoice_id: cmd.invoice_id,
            invoice_no,
            apartment_id: cmd.apartment_id,
            issue_date: cmd.issue_date,
            due_date: cmd.due_date,
            note,
            ticket_id: cmd.ticket_id,
            actor: cmd.actor.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_update_header(&self, cmd: &UpdateInvoiceHeader) -> DomainResult<Vec<InvoiceEvent>> {
        self.ensure_exists()?;
        self.ensure_invoice_id(cmd.invoice_id)?;

        if self.status.is_terminal() {
            return Err(DomainError::InvoiceNotEditable {
                status: self.status.to_string(),
            });
        }
        if cmd.due_date.is_none() && cmd.note.is_none() {
            return Err(DomainError::validation("header", "nothing to update"));
        }

        let due_date = match (cmd.due_date, self.due_date) {
            (Some(d), _) | (None, Some(d)) => d,
            (None, None) => return Err(DomainError::invariant("invoice has no due date")),
        };
        if let Some(issue) = self.issue_date {
            if due_date < issue {
                return Err(DomainError::validation(
                    "due_date",
                    "must not be earlier than the issue date",
                ));
            }
        }
        let note = match &cmd.note {
            Some(_) => normalize_note(&cmd.note),
            None => self.note.clone(),
        };
        validate_note(note.as_deref())?;

        Ok(vec![InvoiceEvent::InvoiceHeaderUpdated(InvoiceHeaderUpdated {
            invoice_id: cmd.invoice_id,
            due_date,
            note,
            actor: cmd.actor.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_upsert_detail(&self, cmd: &UpsertDetail) -> DomainResult<Vec<InvoiceEvent>> {
        self.ensure_exists()?;
        self.ensure_invoice_id(cmd.invoice_id)?;
        self.ensure_editable()?;

        let description = cmd.description.trim().to_string();
        if description.chars().count() > DESCRIPTION_MAX_LEN {
            return Err(DomainError::validation(
                "description",
                format!("must be at most {DESCRIPTION_MAX_LEN} characters"),
            ));
        }
        if cmd.price_source == PriceSource::CallerSupplied && cmd.unit_price <= Decimal::ZERO {
            return Err(DomainError::InvalidPrice(
                "a unit price greater than zero is required when the service type has no fixed price"
                    .to_string(),
            ));
        }

        let amounts = calculate_line(cmd.quantity, cmd.unit_price, cmd.vat_rate)?;
        let detail = InvoiceDetail {
            id: cmd.detail_id,
            service_type_id: cmd.service_type_id,
            description,
            quantity: cmd.quantity,
            unit_price: cmd.unit_price,
            vat_rate: cmd.vat_rate,
            amount: amounts.amount,
            vat_amount: amounts.vat_amount,
            price_source: cmd.price_source,
        };

        // Reject before emitting if the new totals would not fit.
        DocumentTotals::from_lines(
            self.details
                .iter()
                .filter(|d| d.id != detail.id)
                .map(|d| d.line_amounts())
                .chain(core::iter::once(amounts)),
        )?;

        Ok(vec![InvoiceEvent::DetailUpserted(DetailUpserted {
            invoice_id: cmd.invoice_id,
            detail,
            actor: cmd.actor.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_remove_detail(&self, cmd: &RemoveDetail) -> DomainResult<Vec<InvoiceEvent>> {
        self.ensure_exists()?;
        self.ensure_invoice_id(cmd.invoice_id)?;
        self.ensure_editable()?;

        if self.detail(cmd.detail_id).is_none() {
            return Err(DomainError::DetailNotFound);
        }

        Ok(vec![InvoiceEvent::DetailRemoved(DetailRemoved {
            invoice_id: cmd.invoice_id,
            detail_id: cmd.detail_id,
            actor: cmd.actor.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_change_status(&self, cmd: &ChangeInvoiceStatus) -> DomainResult<Vec<InvoiceEvent>> {
        self.ensure_exists()?;
        self.ensure_invoice_id(cmd.invoice_id)?;

        let from = self.status;
        let to = cmd.target;
        if to == InvoiceStatus::Overdue {
            return Err(DomainError::transition(
                from,
                to,
                "overdue is derived from the due date and cannot be set",
            ));
        }
        if from == to {
            return Err(DomainError::transition(from, to, "invoice is already in this status"));
        }
        if !from.can_transition_to(to) {
            let reason = if from.is_terminal() {
                "invoice is in a terminal status"
            } else {
                "transition not allowed"
            };
            return Err(DomainError::transition(from, to, reason));
        }
        if to == InvoiceStatus::Issued {
            if self.details.is_empty() {
                return Err(DomainError::transition(
                    from,
                    to,
                    "invoice has no details",
                ));
            }
            if !self.totals.total.is_positive() {
                return Err(DomainError::transition(
                    from,
                    to,
                    "invoice total must be greater than zero",
                ));
            }
        }
        if cmd.receipt_id.is_some() && to != InvoiceStatus::Paid {
            return Err(DomainError::validation(
                "receipt_id",
                "a receipt can only accompany a change to PAID",
            ));
        }

        let note = normalize_note(&cmd.note);
        validate_note(note.as_deref())?;

        Ok(vec![InvoiceEvent::InvoiceStatusChanged(InvoiceStatusChanged {
            invoice_id: cmd.invoice_id,
            from,
            to,
            note,
            receipt_id: cmd.receipt_id,
            actor: cmd.actor.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_delete(&self, cmd: &DeleteInvoice) -> DomainResult<Vec<InvoiceEvent>> {
        self.ensure_exists()?;
        self.ensure_invoice_id(cmd.invoice_id)?;
        self.ensure_editable()?;

        Ok(vec![InvoiceEvent::InvoiceDeleted(InvoiceDeleted {
            invoice_id: cmd.invoice_id,
            invoice_no: self.invoice_no.clone(),
            actor: cmd.actor.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }
}
