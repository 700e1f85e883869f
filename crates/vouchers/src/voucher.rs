use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use homeledger_core::{
    ActorId, Aggregate, AggregateId, AggregateRoot, ApartmentId, DomainError, DomainResult, Entity,
    JournalEntryId, LineId, Money, ReceiptId, ServiceTypeId, TicketId, VoucherId,
    entity::position_of,
};
use homeledger_events::{Command, Event};
use homeledger_pricing::calculate_line;

pub const VOUCHER_NO_MIN_LEN: usize = 3;
pub const VOUCHER_NO_MAX_LEN: usize = 64;
pub const COUNTERPARTY_MAX_LEN: usize = 255;
pub const TEXT_MAX_LEN: usize = 1000;

/// Voucher status lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VoucherStatus {
    Draft,
    Pending,
    Approved,
    Cancelled,
}

impl VoucherStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            VoucherStatus::Draft => "DRAFT",
            VoucherStatus::Pending => "PENDING",
            VoucherStatus::Approved => "APPROVED",
            VoucherStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, VoucherStatus::Approved | VoucherStatus::Cancelled)
    }

    pub fn can_transition_to(self, target: VoucherStatus) -> bool {
        use VoucherStatus::*;
        matches!(
            (self, target),
            (Draft, Pending)
                | (Pending, Draft)
                | (Pending, Approved)
                | (Draft | Pending, Cancelled)
        )
    }
}

impl core::fmt::Display for VoucherStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Voucher line. VAT does not apply to disbursements.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoucherItem {
    pub id: LineId,
    pub description: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub amount: Money,
    pub service_type_id: Option<ServiceTypeId>,
    pub apartment_id: Option<ApartmentId>,
}

impl Entity for VoucherItem {
    type Id = LineId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

/// Caller input for one item; the amount is derived.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoucherItemSpec {
    pub item_id: LineId,
    pub description: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub service_type_id: Option<ServiceTypeId>,
    pub apartment_id: Option<ApartmentId>,
}

impl VoucherItemSpec {
    fn to_item(&self) -> DomainResult<VoucherItem> {
        let description = self.description.trim().to_string();
        if description.chars().count() > TEXT_MAX_LEN {
            return Err(DomainError::validation(
                "description",
                format!("must be at most {TEXT_MAX_LEN} characters"),
            ));
        }
        let amounts = calculate_line(self.quantity, self.unit_price, Decimal::ZERO)?;
        Ok(VoucherItem {
            id: self.item_id,
            description,
            quantity: self.quantity,
            unit_price: self.unit_price,
            amount: amounts.amount,
            service_type_id: self.service_type_id,
            apartment_id: self.apartment_id,
        })
    }
}

/// Aggregate root: Voucher with its items.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Voucher {
    id: VoucherId,
    voucher_no: Option<String>,
    voucher_date: Option<NaiveDate>,
    counterparty: Option<String>,
    description: Option<String>,
    status: VoucherStatus,
    items: Vec<VoucherItem>,
    total: Money,
    receipt_id: Option<ReceiptId>,
    ticket_id: Option<TicketId>,
    journal_entry_id: Option<JournalEntryId>,
    approved_by: Option<ActorId>,
    approved_at: Option<DateTime<Utc>>,
    cancellation_note: Option<String>,
    created_at: Option<DateTime<Utc>>,
    created_by: Option<ActorId>,
    updated_at: Option<DateTime<Utc>>,
    updated_by: Option<ActorId>,
    version: u64,
    created: bool,
    deleted: bool,
}

impl Voucher {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: VoucherId) -> Self {
        Self {
            id,
            voucher_no: None,
            voucher_date: None,
            counterparty: None,
            description: None,
            status: VoucherStatus::Draft,
            items: Vec::new(),
            total: Money::ZERO,
            receipt_id: None,
            ticket_id: None,
            journal_entry_id: None,
            approved_by: None,
            approved_at: None,
            cancellation_note: None,
            created_at: None,
            created_by: None,
            updated_at: None,
            updated_by: None,
            version: 0,
            created: false,
            deleted: false,
        }
    }

    pub fn id_typed(&self) -> VoucherId {
        self.id
    }

    pub fn exists(&self) -> bool {
        self.created && !self.deleted
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted
    }

    pub fn voucher_no(&self) -> Option<&str> {
        self.voucher_no.as_deref()
    }

    pub fn voucher_date(&self) -> Option<NaiveDate> {
        self.voucher_date
    }

    pub fn counterparty(&self) -> Option<&str> {
        self.counterparty.as_deref()
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn status(&self) -> VoucherStatus {
        self.status
    }

    pub fn items(&self) -> &[VoucherItem] {
        &self.items
    }

    pub fn item(&self, id: LineId) -> Option<&VoucherItem> {
        self.items.iter().find(|i| i.id == id)
    }

    pub fn total(&self) -> Money {
        self.total
    }

    pub fn receipt_id(&self) -> Option<ReceiptId> {
        self.receipt_id
    }

    pub fn ticket_id(&self) -> Option<TicketId> {
        self.ticket_id
    }

    pub fn journal_entry_id(&self) -> Option<JournalEntryId> {
        self.journal_entry_id
    }

    pub fn approved_by(&self) -> Option<&ActorId> {
        self.approved_by.as_ref()
    }

    pub fn approved_at(&self) -> Option<DateTime<Utc>> {
        self.approved_at
    }

    pub fn cancellation_note(&self) -> Option<&str> {
        self.cancellation_note.as_deref()
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

    pub fn is_editable(&self) -> bool {
        self.status == VoucherStatus::Draft
    }
}

impl AggregateRoot for Voucher {
    type Id = VoucherId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: CreateVoucher.
///
/// Items are optional. With `submit` set, the voucher is created and submitted in one step
/// (workflow-originated vouchers start PENDING).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateVoucher {
    pub voucher_id: VoucherId,
    pub voucher_no: Option<String>,
    pub voucher_date: NaiveDate,
    pub counterparty: Option<String>,
    pub description: Option<String>,
    pub items: Vec<VoucherItemSpec>,
    pub submit: bool,
    pub ticket_id: Option<TicketId>,
    pub receipt_id: Option<ReceiptId>,
    pub actor: ActorId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: UpsertItem (add, or replace by item id).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpsertItem {
    pub voucher_id: VoucherId,
    pub item: VoucherItemSpec,
    pub actor: ActorId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RemoveItem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveItem {
    pub voucher_id: VoucherId,
    pub item_id: LineId,
    pub actor: ActorId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: SubmitVoucher (DRAFT → PENDING).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitVoucher {
    pub voucher_id: VoucherId,
    pub actor: ActorId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ReturnToDraft (PENDING → DRAFT).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnToDraft {
    pub voucher_id: VoucherId,
    pub note: Option<String>,
    pub actor: ActorId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ApproveVoucher (PENDING → APPROVED).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApproveVoucher {
    pub voucher_id: VoucherId,
    pub journal_entry_id: JournalEntryId,
    pub actor: ActorId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: CancelVoucher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelVoucher {
    pub voucher_id: VoucherId,
    pub note: Option<String>,
    pub actor: ActorId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: DeleteVoucher (drafts only).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteVoucher {
    pub voucher_id: VoucherId,
    pub actor: ActorId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum VoucherCommand {
    CreateVoucher(CreateVoucher),
    UpsertItem(UpsertItem),
    RemoveItem(RemoveItem),
    SubmitVoucher(SubmitVoucher),
    ReturnToDraft(ReturnToDraft),
    ApproveVoucher(ApproveVoucher),
    CancelVoucher(CancelVoucher),
    DeleteVoucher(DeleteVoucher),
}

impl VoucherCommand {
    pub fn voucher_id(&self) -> VoucherId {
        match self {
            VoucherCommand::CreateVoucher(c) => c.voucher_id,
            VoucherCommand::UpsertItem(c) => c.voucher_id,
            VoucherCommand::RemoveItem(c) => c.voucher_id,
            VoucherCommand::SubmitVoucher(c) => c.voucher_id,
            VoucherCommand::ReturnToDraft(c) => c.voucher_id,
            VoucherCommand::ApproveVoucher(c) => c.voucher_id,
            VoucherCommand::CancelVoucher(c) => c.voucher_id,
            VoucherCommand::DeleteVoucher(c) => c.voucher_id,
        }
    }
}

impl Command for VoucherCommand {
    fn target_aggregate_id(&self) -> AggregateId {
        self.voucher_id().aggregate_id()
    }
}

/// Event: VoucherCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoucherCreated {
    pub voucher_id: VoucherId,
    pub voucher_no: Option<String>,
    pub voucher_date: NaiveDate,
    pub counterparty: Option<String>,
    pub description: Option<String>,
    pub ticket_id: Option<TicketId>,
    pub receipt_id: Option<ReceiptId>,
    pub actor: ActorId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ItemUpserted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemUpserted {
    pub voucher_id: VoucherId,
    pub item: VoucherItem,
    pub actor: ActorId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ItemRemoved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemRemoved {
    pub voucher_id: VoucherId,
    pub item_id: LineId,
    pub actor: ActorId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: VoucherSubmitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoucherSubmitted {
    pub voucher_id: VoucherId,
    pub actor: ActorId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: VoucherReturnedToDraft.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoucherReturnedToDraft {
    pub voucher_id: VoucherId,
    pub note: Option<String>,
    pub actor: ActorId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: VoucherApproved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoucherApproved {
    pub voucher_id: VoucherId,
    pub journal_entry_id: JournalEntryId,
    pub actor: ActorId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: VoucherCancelled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoucherCancelled {
    pub voucher_id: VoucherId,
    pub from: VoucherStatus,
    pub note: Option<String>,
    pub actor: ActorId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: VoucherDeleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoucherDeleted {
    pub voucher_id: VoucherId,
    pub voucher_no: Option<String>,
    pub actor: ActorId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum VoucherEvent {
    VoucherCreated(VoucherCreated),
    ItemUpserted(ItemUpserted),
    ItemRemoved(ItemRemoved),
    VoucherSubmitted(VoucherSubmitted),
    VoucherReturnedToDraft(VoucherReturnedToDraft),
    VoucherApproved(VoucherApproved),
    VoucherCancelled(VoucherCancelled),
    VoucherDeleted(VoucherDeleted),
}

impl VoucherEvent {
    fn actor_and_time(&self) -> (&ActorId, DateTime<Utc>) {
        match self {
            VoucherEvent::VoucherCreated(e) => (&e.actor, e.occurred_at),
            VoucherEvent::ItemUpserted(e) => (&e.actor, e.occurred_at),
            VoucherEvent::ItemRemoved(e) => (&e.actor, e.occurred_at),
            VoucherEvent::VoucherSubmitted(e) => (&e.actor, e.occurred_at),
            VoucherEvent::VoucherReturnedToDraft(e) => (&e.actor, e.occurred_at),
            VoucherEvent::VoucherApproved(e) => (&e.actor, e.occurred_at),
            VoucherEvent::VoucherCancelled(e) => (&e.actor, e.occurred_at),
            VoucherEvent::VoucherDeleted(e) => (&e.actor, e.occurred_at),
        }
    }
}

impl Event for VoucherEvent {
    fn event_type(&self) -> &'static str {
        match self {
            VoucherEvent::VoucherCreated(_) => "vouchers.voucher.created",
            VoucherEvent::ItemUpserted(_) => "vouchers.voucher.item_upserted",
            VoucherEvent::ItemRemoved(_) => "vouchers.voucher.item_removed",
            VoucherEvent::VoucherSubmitted(_) => "vouchers.voucher.submitted",
            VoucherEvent::VoucherReturnedToDraft(_) => "vouchers.voucher.returned_to_draft",
            VoucherEvent::VoucherApproved(_) => "vouchers.voucher.approved",
            VoucherEvent::VoucherCancelled(_) => "vouchers.voucher.cancelled",
            VoucherEvent::VoucherDeleted(_) => "vouchers.voucher.deleted",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        self.actor_and_time().1
    }
}

impl Aggregate for Voucher {
    type Command = VoucherCommand;
    type Event = VoucherEvent;
    type Error = DomainError;

    const AGGREGATE_TYPE: &'static str = "vouchers.voucher";

    fn apply(&mut self, event: &Self::Event) {
        match event {
            VoucherEvent::VoucherCreated(e) => {
                self.id = e.voucher_id;
                self.voucher_no = e.voucher_no.clone();
                self.voucher_date = Some(e.voucher_date);
                self.counterparty = e.counterparty.clone();
                self.description = e.description.clone();
                self.ticket_id = e.ticket_id;
                self.receipt_id = e.receipt_id;
                self.status = VoucherStatus::Draft;
                self.created_at = Some(e.occurred_at);
                self.created_by = Some(e.actor.clone());
                self.created = true;
            }
            VoucherEvent::ItemUpserted(e) => match position_of(&self.items, &e.item.id) {
                Some(idx) => self.items[idx] = e.item.clone(),
                None => self.items.push(e.item.clone()),
            },
            VoucherEvent::ItemRemoved(e) => {
                self.items.retain(|i| i.id != e.item_id);
            }
            VoucherEvent::VoucherSubmitted(_) => {
                self.status = VoucherStatus::Pending;
            }
            VoucherEvent::VoucherReturnedToDraft(_) => {
                self.status = VoucherStatus::Draft;
            }
            VoucherEvent::VoucherApproved(e) => {
                self.status = VoucherStatus::Approved;
                self.journal_entry_id = Some(e.journal_entry_id);
                self.approved_by = Some(e.actor.clone());
                self.approved_at = Some(e.occurred_at);
            }
            VoucherEvent::VoucherCancelled(e) => {
                self.status = VoucherStatus::Cancelled;
                self.cancellation_note = e.note.clone();
            }
            VoucherEvent::VoucherDeleted(_) => {
                self.deleted = true;
            }
        }

        let (actor, at) = event.actor_and_time();
        self.updated_by = Some(actor.clone());
        self.updated_at = Some(at);

        // Overflow is rejected in `handle`.
        if let Ok(total) = Money::try_sum(self.items.iter().map(|i| i.amount)) {
            self.total = total;
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            VoucherCommand::CreateVoucher(cmd) => self.handle_create(cmd),
            VoucherCommand::UpsertItem(cmd) => self.handle_upsert_item(cmd),
            VoucherCommand::RemoveItem(cmd) => self.handle_remove_item(cmd),
            VoucherCommand::SubmitVoucher(cmd) => self.handle_submit(cmd),
            VoucherCommand::ReturnToDraft(cmd) => self.handle_return_to_draft(cmd),
            VoucherCommand::ApproveVoucher(cmd) => self.handle_approve(cmd),
            VoucherCommand::CancelVoucher(cmd) => self.handle_cancel(cmd),
            VoucherCommand::DeleteVoucher(cmd) => self.handle_delete(cmd),
        }
    }
}

/// Trimmed voucher number, checked for length.
pub fn normalize_voucher_no(raw: &str) -> DomainResult<String> {
    let trimmed = raw.trim();
    let len = trimmed.chars().count();
    if !(VOUCHER_NO_MIN_LEN..=VOUCHER_NO_MAX_LEN).contains(&len) {
        return Err(DomainError::validation(
            "voucher_no",
            format!("must be between {VOUCHER_NO_MIN_LEN} and {VOUCHER_NO_MAX_LEN} characters"),
        ));
    }
    Ok(trimmed.to_string())
}

fn optional_text(
    field: &'static str,
    value: &Option<String>,
    max: usize,
) -> DomainResult<Option<String>> {
    let value = value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string);
    if value.as_ref().is_some_and(|v| v.chars().count() > max) {
        return Err(DomainError::validation(
            field,
            format!("must be at most {max} characters"),
        ));
    }
    Ok(value)
}

/// Submission requires at least one item and a positive total.
fn ensure_submittable(items: &[VoucherItem]) -> DomainResult<()> {
    if items.is_empty() {
        return Err(DomainError::transition(
            VoucherStatus::Draft,
            VoucherStatus::Pending,
            "voucher has no items",
        ));
    }
    let total = Money::try_sum(items.iter().map(|i| i.amount))?;
    if !total.is_positive() {
        return Err(DomainError::transition(
            VoucherStatus::Draft,
            VoucherStatus::Pending,
            "voucher total must be greater than zero",
        ));
    }
    Ok(())
}

impl Voucher {
    fn ensure_exists(&self) -> DomainResult<()> {
        if !self.exists() {
            return Err(DomainError::VoucherNotFound);
        }
        Ok(())
    }

    fn ensure_voucher_id(&self, voucher_id: VoucherId) -> DomainResult<()> {
        if self.id != voucher_id {
            return Err(DomainError::invariant("voucher_id mismatch"));
        }
        Ok(())
    }

    fn ensure_editable(&self) -> DomainResult<()> {
        if !self.is_editable() {
            return Err(DomainError::VoucherNotEditable {
                status: self.status.to_string(),
            });
        }
        Ok(())
    }

    fn handle_create(&self, cmd: &CreateVoucher) -> DomainResult<Vec<VoucherEvent>> {
        if self.created {
            return Err(DomainError::AlreadyExists(format!(
                "voucher {}",
                cmd.voucher_id
            )));
        }
        self.ensure_voucher_id(cmd.voucher_id)?;

        let voucher_no = cmd
            .voucher_no
            .as_deref()
            .map(normalize_voucher_no)
            .transpose()?;
        let counterparty = optional_text("counterparty", &cmd.counterparty, COUNTERPARTY_MAX_LEN)?;
        let description = optional_text("description", &cmd.description, TEXT_MAX_LEN)?;

        let mut items: Vec<VoucherItem> = Vec::with_capacity(cmd.items.len());
        for spec in &cmd.items {
            if items.iter().any(|i| i.id == spec.item_id) {
                return Err(DomainError::validation(
                    "items",
                    format!("item {} appears more than once", spec.item_id),
                ));
            }
            items.push(spec.to_item()?);
        }
        Money::try_sum(items.iter().map(|i| i.amount))?;
        if cmd.submit {
            ensure_submittable(&items)?;
        }

        let mut events = Vec::with_capacity(items.len() + 2);
        events.push(VoucherEvent::VoucherCreated(VoucherCreated {
            voucher_id: cmd.voucher_id,
            voucher_no,
            voucher_date: cmd.voucher_date,
            counterparty,
            description,
            ticket_id: cmd.ticket_id,
            receipt_id: cmd.receipt_id,
            actor: cmd.actor.clone(),
            occurred_at: cmd.occurred_at,
        }));
        events.extend(items.into_iter().map(|item| {
            VoucherEvent::ItemUpserted(ItemUpserted {
                voucher_id: cmd.voucher_id,
                item,
                actor: cmd.actor.clone(),
                occurred_at: cmd.occurred_at,
            })
        }));
        if cmd.submit {
            events.push(VoucherEvent::VoucherSubmitted(VoucherSubmitted {
                voucher_id: cmd.voucher_id,
                actor: cmd.actor.clone(),
                occurred_at: cmd.occurred_at,
            }));
        }
        Ok(events)
    }

    fn handle_upsert_item(&self, cmd: &UpsertItem) -> DomainResult<Vec<VoucherEvent>> {
        self.ensure_exists()?;
        self.ensure_voucher_id(cmd.voucher_id)?;
        self.ensure_editable()?;

        let item = cmd.item.to_item()?;
        Money::try_sum(
            self.items
                .iter()
                .filter(|i| i.id != item.id)
                .map(|i| i.amount)
                .chain(core::iter::once(item.amount)),
        )?;

        Ok(vec![VoucherEvent::ItemUpserted(ItemUpserted {
            voucher_id: cmd.voucher_id,
            item,
            actor: cmd.actor.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_remove_item(&self, cmd: &RemoveItem) -> DomainResult<Vec<VoucherEvent>> {
        self.ensure_exists()?;
        self.ensure_voucher_id(cmd.voucher_id)?;
        self.ensure_editable()?;

        if self.item(cmd.item_id).is_none() {
            return Err(DomainError::ItemNotFound);
        }

        Ok(vec![VoucherEvent::ItemRemoved(ItemRemoved {
            voucher_id: cmd.voucher_id,
            item_id: cmd.item_id,
            actor: cmd.actor.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_submit(&self, cmd: &SubmitVoucher) -> DomainResult<Vec<VoucherEvent>> {
        self.ensure_exists()?;
        self.ensure_voucher_id(cmd.voucher_id)?;
        self.ensure_editable()?;
        ensure_submittable(&self.items)?;

        Ok(vec![VoucherEvent::VoucherSubmitted(VoucherSubmitted {
            voucher_id: cmd.voucher_id,
            actor: cmd.actor.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_return_to_draft(&self, cmd: &ReturnToDraft) -> DomainResult<Vec<VoucherEvent>> {
        self.ensure_exists()?;
        self.ensure_voucher_id(cmd.voucher_id)?;
        self.ensure_transition(VoucherStatus::Draft)?;

        Ok(vec![VoucherEvent::VoucherReturnedToDraft(
            VoucherReturnedToDraft {
                voucher_id: cmd.voucher_id,
                note: optional_text("note", &cmd.note, TEXT_MAX_LEN)?,
                actor: cmd.actor.clone(),
                occurred_at: cmd.occurred_at,
            },
        )])
    }

    fn handle_approve(&self, cmd: &ApproveVoucher) -> DomainResult<Vec<VoucherEvent>> {
        self.ensure_exists()?;
        self.ensure_voucher_id(cmd.voucher_id)?;
        self.ensure_transition(VoucherStatus::Approved)?;

        Ok(vec![VoucherEvent::VoucherApproved(VoucherApproved {
            voucher_id: cmd.voucher_id,
            journal_entry_id: cmd.journal_entry_id,
            actor: cmd.actor.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_cancel(&self, cmd: &CancelVoucher) -> DomainResult<Vec<VoucherEvent>> {
        self.ensure_exists()?;
        self.ensure_voucher_id(cmd.voucher_id)?;
        self.ensure_transition(VoucherStatus::Cancelled)?;

        Ok(vec![VoucherEvent::VoucherCancelled(VoucherCancelled {
            voucher_id: cmd.voucher_id,
            from: self.status,
            note: optional_text("note", &cmd.note, TEXT_MAX_LEN)?,
            actor: cmd.actor.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_delete(&self, cmd: &DeleteVoucher) -> DomainResult<Vec<VoucherEvent>> {
        self.ensure_exists()?;
        self.ensure_voucher_id(cmd.voucher_id)?;
        self.ensure_editable()?;

        Ok(vec![VoucherEvent::VoucherDeleted(VoucherDeleted {
            voucher_id: cmd.voucher_id,
            voucher_no: self.voucher_no.clone(),
            actor: cmd.actor.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn ensure_transition(&self, target: VoucherStatus) -> DomainResult<()> {
        if self.status.can_transition_to(target) {
            return Ok(());
        }
        let reason = if self.status.is_terminal() {
            "voucher is in a terminal status"
        } else {
            "transition not allowed"
        };
        Err(DomainError::transition(self.status, target, reason))
    }
}
