//! Integration tests for the full document pipeline.
//!
//! Tests: FinancialDocumentService → Dispatcher → EventStore → EventBus → Projection → Views
//!
//! Verifies:
//! - Document totals are always derived from their lines
//! - Status machines and edit locks reject changes without writing anything
//! - Receipts settle invoices in one unit, and a broken pairing surfaces as a reconciliation error
//! - Services over a shared store agree on document numbers and line ids

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    use chrono::{DateTime, NaiveDate, TimeZone, Utc};
    use proptest::prelude::*;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use serde_json::Value as JsonValue;

    use homeledger_core::{
        ActorId, AggregateId, ApartmentId, DomainError, ErrorKind, ExpectedVersion, InvoiceId,
        LineId, Money, PaymentMethodId, ReceiptId, ServiceTypeId, TicketId, VoucherId,
    };
    use homeledger_events::{EventEnvelope, InMemoryEventBus};
    use homeledger_invoicing::{
        ChangeInvoiceStatus, Invoice, InvoiceCommand, InvoiceStatus, PriceSource, Receipt,
        ReceiptCommand, RecordReceipt,
    };
    use homeledger_pricing::{PriceStatus, ServicePrice, ServicePriceId};
    use homeledger_vouchers::VoucherStatus;

    use crate::clock::FixedClock;
    use crate::config::FinanceConfig;
    use crate::error::FinanceError;
    use crate::event_store::{
        EventStore, EventStoreError, InMemoryEventStore, StoredEvent, StreamAppend,
        UncommittedEvent,
    };
    use crate::price_catalog::InMemoryServicePriceCatalog;
    use crate::projections::InvoiceFilter;
    use crate::read_model::InvoiceView;
    use crate::receipt_processor::RecordReceiptRequest;
    use crate::service::{
        FinancialDocumentService, InvoiceDetailInput, NewInvoiceDraft, NewVoucher,
        RecurringCharge, VoucherItemInput,
    };

    type Bus = Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>;

    struct Harness<S> {
        service: FinancialDocumentService<Arc<S>, Bus>,
        store: Arc<S>,
        clock: Arc<FixedClock>,
        catalog: Arc<InMemoryServicePriceCatalog>,
    }

    /// 10:00 in UTC+7.
    fn business_morning(month: u32, day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, month, day, 3, 0, 0).unwrap()
    }

    fn date(month: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, month, day).unwrap()
    }

    fn manager() -> ActorId {
        ActorId::new("building-manager")
    }

    fn harness_with<S: EventStore + 'static>(store: S) -> Harness<S> {
        homeledger_observability::init_for_tests();

        let store = Arc::new(store);
        let bus: Bus = Arc::new(InMemoryEventBus::new());
        let clock = Arc::new(FixedClock::new(business_morning(3, 1)));
        let catalog = Arc::new(InMemoryServicePriceCatalog::new());
        let service = FinancialDocumentService::new(
            store.clone(),
            bus,
            catalog.clone(),
            clock.clone(),
            FinanceConfig::default(),
        )
        .unwrap();

        Harness {
            service,
            store,
            clock,
            catalog,
        }
    }

    fn harness() -> Harness<InMemoryEventStore> {
        harness_with(InMemoryEventStore::new())
    }

    /// Another service over the same store, with its own bus.
    fn second_service<S: EventStore + 'static>(
        h: &Harness<S>,
    ) -> FinancialDocumentService<Arc<S>, Bus> {
        FinancialDocumentService::new(
            h.store.clone(),
            Arc::new(InMemoryEventBus::new()),
            h.catalog.clone(),
            h.clock.clone(),
            FinanceConfig::default(),
        )
        .unwrap()
    }

    fn approved_price(
        service_type_id: ServiceTypeId,
        unit_price: Decimal,
        effective: NaiveDate,
    ) -> ServicePrice {
        ServicePrice {
            id: ServicePriceId::new(),
            service_type_id,
            unit_price,
            effective_date: effective,
            end_date: None,
            status: PriceStatus::Approved,
            created_at: business_morning(1, 1),
        }
    }

    fn draft<S: EventStore>(h: &Harness<S>) -> InvoiceView {
        h.service
            .create_invoice_draft(NewInvoiceDraft {
                apartment_id: ApartmentId::new(),
                invoice_no: None,
                issue_date: date(3, 1),
                due_date: date(4, 10),
                note: None,
                ticket_id: None,
                actor: manager(),
            })
            .unwrap()
    }

    fn caller_priced(quantity: Decimal, unit_price: Decimal, vat_rate: Decimal) -> InvoiceDetailInput {
        InvoiceDetailInput {
            detail_id: None,
            service_type_id: ServiceTypeId::new(),
            description: "Management fee".to_string(),
            quantity,
            unit_price: Some(unit_price),
            vat_rate: Some(vat_rate),
        }
    }

    /// DRAFT invoice with one detail of 2 × 500,000 at 10% VAT, issued.
    fn issued_invoice<S: EventStore>(h: &Harness<S>) -> InvoiceId {
        let invoice = draft(h);
        h.service
            .upsert_invoice_detail(
                invoice.invoice_id,
                caller_priced(dec!(2), dec!(500000), dec!(10)),
                manager(),
            )
            .unwrap();
        h.service
            .change_invoice_status(invoice.invoice_id, InvoiceStatus::Issued, None, manager())
            .unwrap();
        invoice.invoice_id
    }

    fn receipt_for(invoice_id: InvoiceId, amount: i64) -> RecordReceiptRequest {
        RecordReceiptRequest {
            invoice_id,
            payment_method_id: PaymentMethodId::new(),
            amount: Money::new(amount),
            note: None,
            receipt_no: None,
            receipt_date: None,
            create_reconciliation_voucher: false,
            actor: ActorId::new("cashier"),
        }
    }

    fn domain(err: FinanceError) -> DomainError {
        match err {
            FinanceError::Domain(e) => e,
            other => panic!("Expected a domain error, got {other:?}"),
        }
    }

    #[test]
    fn invoice_totals_are_derived_from_details() {
        let h = harness();
        let invoice = draft(&h);
        assert_eq!(invoice.status, InvoiceStatus::Draft);
        assert_eq!(invoice.total, Money::ZERO);
        assert_eq!(invoice.invoice_no, "INV-20250301-0001");

        let detail = h
            .service
            .upsert_invoice_detail(
                invoice.invoice_id,
                caller_priced(dec!(2), dec!(500000), dec!(10)),
                manager(),
            )
            .unwrap();
        assert_eq!(detail.amount, Money::new(1_000_000));
        assert_eq!(detail.vat_amount, Money::new(100_000));

        let view = h.service.get_invoice(invoice.invoice_id).unwrap();
        assert_eq!(view.subtotal, Money::new(1_000_000));
        assert_eq!(view.tax, Money::new(100_000));
        assert_eq!(view.total, Money::new(1_100_000));

        let listed = h.service.list_invoices(&InvoiceFilter::default());
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].total, Money::new(1_100_000));
    }

    #[test]
    fn fixed_service_price_replaces_the_caller_price() {
        let h = harness();
        let water = ServiceTypeId::new();
        h.catalog.insert(ServicePrice {
            id: ServicePriceId::new(),
            service_type_id: water,
            unit_price: dec!(12000),
            effective_date: date(1, 1),
            end_date: None,
            status: PriceStatus::Approved,
            created_at: business_morning(1, 1),
        });
        let invoice = draft(&h);

        let detail = h
            .service
            .upsert_invoice_detail(
                invoice.invoice_id,
                InvoiceDetailInput {
                    detail_id: None,
                    service_type_id: water,
                    description: "Water (m3)".to_string(),
                    quantity: dec!(10),
                    unit_price: Some(dec!(99)),
                    vat_rate: None,
                },
                manager(),
            )
            .unwrap();

        assert_eq!(detail.unit_price, dec!(12000));
        assert_eq!(detail.price_source, PriceSource::ServicePrice);
        assert_eq!(detail.vat_rate, Decimal::ZERO);
        assert_eq!(detail.amount, Money::new(120_000));
    }

    #[test]
    fn detail_price_is_resolved_as_of_today_not_the_issue_date() {
        let h = harness();
        let water = ServiceTypeId::new();
        h.catalog.insert(approved_price(water, dec!(12000), date(3, 1)));
        let invoice = h
            .service
            .create_invoice_draft(NewInvoiceDraft {
                apartment_id: ApartmentId::new(),
                invoice_no: None,
                issue_date: date(2, 20),
                due_date: date(3, 31),
                note: None,
                ticket_id: None,
                actor: manager(),
            })
            .unwrap();

        let detail = h
            .service
            .upsert_invoice_detail(
                invoice.invoice_id,
                InvoiceDetailInput {
                    detail_id: None,
                    service_type_id: water,
                    description: "Water (m3)".to_string(),
                    quantity: dec!(2),
                    unit_price: Some(dec!(99)),
                    vat_rate: None,
                },
                manager(),
            )
            .unwrap();

        assert_eq!(detail.unit_price, dec!(12000));
        assert_eq!(detail.price_source, PriceSource::ServicePrice);
    }

    #[test]
    fn unpriced_service_requires_a_caller_price() {
        let h = harness();
        let invoice = draft(&h);

        let mut input = caller_priced(dec!(1), dec!(1), dec!(0));
        input.unit_price = None;
        let err = domain(
            h.service
                .upsert_invoice_detail(invoice.invoice_id, input, manager())
                .unwrap_err(),
        );
        assert!(matches!(err, DomainError::InvalidPrice(_)));

        let err = domain(
            h.service
                .upsert_invoice_detail(
                    invoice.invoice_id,
                    caller_priced(dec!(1), dec!(0), dec!(0)),
                    manager(),
                )
                .unwrap_err(),
        );
        assert!(matches!(err, DomainError::InvalidPrice(_)));
    }

    #[test]
    fn details_can_be_removed_by_id_alone() {
        let h = harness();
        let invoice = draft(&h);
        let keep = h
            .service
            .upsert_invoice_detail(
                invoice.invoice_id,
                caller_priced(dec!(1), dec!(300000), dec!(0)),
                manager(),
            )
            .unwrap();
        let remove = h
            .service
            .upsert_invoice_detail(
                invoice.invoice_id,
                caller_priced(dec!(3), dec!(50000), dec!(10)),
                manager(),
            )
            .unwrap();

        let view = h.service.delete_invoice_detail(remove.id, manager()).unwrap();
        assert_eq!(view.details.len(), 1);
        assert_eq!(view.details[0].id, keep.id);
        assert_eq!(view.total, Money::new(300_000));

        let err = domain(
            h.service
                .delete_invoice_detail(remove.id, manager())
                .unwrap_err(),
        );
        assert_eq!(err, DomainError::DetailNotFound);
    }

    #[test]
    fn line_ids_belong_to_one_document() {
        let h = harness();
        let first = draft(&h);
        let second = draft(&h);
        let shared = LineId::new();
        let mut input = caller_priced(dec!(1), dec!(100000), dec!(0));
        input.detail_id = Some(shared);

        h.service
            .upsert_invoice_detail(first.invoice_id, input.clone(), manager())
            .unwrap();
        let err = domain(
            h.service
                .upsert_invoice_detail(second.invoice_id, input.clone(), manager())
                .unwrap_err(),
        );
        assert!(matches!(err, DomainError::Validation { field: "line_id", .. }));
        assert!(h.service.get_invoice(second.invoice_id).unwrap().details.is_empty());

        // Replacing the detail on its own invoice is still allowed.
        input.quantity = dec!(3);
        let replaced = h
            .service
            .upsert_invoice_detail(first.invoice_id, input, manager())
            .unwrap();
        assert_eq!(replaced.amount, Money::new(300_000));

        let item = VoucherItemInput {
            item_id: Some(shared),
            description: "Labour".to_string(),
            quantity: dec!(1),
            unit_price: dec!(50000),
            service_type_id: None,
            apartment_id: None,
        };
        let err = domain(
            h.service
                .create_voucher_draft(NewVoucher {
                    voucher_no: None,
                    voucher_date: None,
                    counterparty: None,
                    description: None,
                    items: vec![item.clone()],
                    actor: manager(),
                })
                .unwrap_err(),
        );
        assert!(matches!(err, DomainError::Validation { field: "line_id", .. }));
        assert!(h.service.list_vouchers(None).is_empty());

        let voucher = h
            .service
            .create_voucher_draft(NewVoucher {
                voucher_no: None,
                voucher_date: None,
                counterparty: None,
                description: None,
                items: vec![],
                actor: manager(),
            })
            .unwrap();
        let err = domain(
            h.service
                .upsert_voucher_item(voucher.voucher_id, item, manager())
                .unwrap_err(),
        );
        assert!(matches!(err, DomainError::Validation { field: "line_id", .. }));

        let view = h.service.delete_invoice_detail(shared, manager()).unwrap();
        assert_eq!(view.invoice_id, first.invoice_id);
        assert!(view.details.is_empty());
    }

    #[test]
    fn issued_invoice_rejects_detail_changes_without_writing() {
        let h = harness();
        let invoice_id = issued_invoice(&h);
        let before = h.service.get_invoice(invoice_id).unwrap();

        let err = domain(
            h.service
                .upsert_invoice_detail(
                    invoice_id,
                    caller_priced(dec!(1), dec!(1000), dec!(0)),
                    manager(),
                )
                .unwrap_err(),
        );
        assert!(matches!(err, DomainError::InvoiceNotEditable { .. }));

        let err = domain(
            h.service
                .delete_invoice_detail(before.details[0].id, manager())
                .unwrap_err(),
        );
        assert!(matches!(err, DomainError::InvoiceNotEditable { .. }));

        assert_eq!(h.service.get_invoice(invoice_id).unwrap(), before);
    }

    #[test]
    fn empty_draft_cannot_be_issued() {
        let h = harness();
        let invoice = draft(&h);

        let err = domain(
            h.service
                .change_invoice_status(invoice.invoice_id, InvoiceStatus::Issued, None, manager())
                .unwrap_err(),
        );
        assert!(matches!(err, DomainError::InvalidStatusTransition { .. }));

        let view = h
            .service
            .change_invoice_status(
                invoice.invoice_id,
                InvoiceStatus::Cancelled,
                Some("created by mistake".to_string()),
                manager(),
            )
            .unwrap();
        assert_eq!(view.status, InvoiceStatus::Cancelled);
        assert_eq!(
            view.status_history[0].note.as_deref(),
            Some("created by mistake")
        );
    }

    #[test]
    fn receipt_pays_the_invoice_once() {
        let h = harness();
        let invoice_id = issued_invoice(&h);

        let receipt = h
            .service
            .record_receipt(receipt_for(invoice_id, 1_100_000))
            .unwrap();
        assert_eq!(receipt.amount, Money::new(1_100_000));
        assert_eq!(receipt.invoice.effective_status, InvoiceStatus::Paid);
        assert_eq!(receipt.receipt_no, "REC-INV-20250301-0001-2025/03/01");

        let invoice = h.service.get_invoice(invoice_id).unwrap();
        assert_eq!(invoice.status, InvoiceStatus::Paid);
        assert_eq!(invoice.receipt_id, Some(receipt.receipt_id));
        assert_eq!(
            invoice.status_history.last().and_then(|c| c.note.as_deref()),
            Some("Paid by receipt REC-INV-20250301-0001-2025/03/01")
        );
        assert_eq!(h.service.get_receipt(receipt.receipt_id).unwrap(), receipt);

        let err = h
            .service
            .record_receipt(receipt_for(invoice_id, 1_100_000))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::State);
    }

    #[test]
    fn receipts_need_an_issued_invoice_and_the_exact_total() {
        let h = harness();
        let invoice = draft(&h);
        let err = domain(
            h.service
                .record_receipt(receipt_for(invoice.invoice_id, 1_000))
                .unwrap_err(),
        );
        assert!(matches!(err, DomainError::InvalidStatusTransition { .. }));

        let invoice_id = issued_invoice(&h);
        let err = domain(
            h.service
                .record_receipt(receipt_for(invoice_id, 1_000_000))
                .unwrap_err(),
        );
        assert!(matches!(err, DomainError::Validation { field: "amount", .. }));

        let err = domain(
            h.service
                .record_receipt(receipt_for(InvoiceId::generate(), 1_000))
                .unwrap_err(),
        );
        assert_eq!(err, DomainError::InvoiceNotFound);

        // Nothing was paid along the way.
        let view = h.service.get_invoice(invoice_id).unwrap();
        assert_eq!(view.status, InvoiceStatus::Issued);
        assert_eq!(view.receipt_id, None);
    }

    #[test]
    fn receipt_can_create_a_reconciliation_voucher() {
        let h = harness();
        let invoice_id = issued_invoice(&h);

        let mut request = receipt_for(invoice_id, 1_100_000);
        request.create_reconciliation_voucher = true;
        let receipt = h.service.record_receipt(request).unwrap();

        let voucher_id = receipt.voucher_id.unwrap();
        let voucher = h.service.get_voucher(voucher_id).unwrap();
        assert_eq!(voucher.status, VoucherStatus::Draft);
        assert_eq!(voucher.total, Money::new(1_100_000));
        assert_eq!(voucher.receipt_id, Some(receipt.receipt_id));
        assert_eq!(voucher.voucher_no.as_deref(), Some("PC-2025-001"));
    }

    #[test]
    fn voucher_lifecycle_ends_immutable_after_approval() {
        let h = harness();
        let voucher = h
            .service
            .create_voucher_draft(NewVoucher {
                voucher_no: None,
                voucher_date: None,
                counterparty: Some("Plumbing Co.".to_string()),
                description: Some("Pipe repair, block B".to_string()),
                items: vec![VoucherItemInput {
                    item_id: None,
                    description: "Labour".to_string(),
                    quantity: dec!(1),
                    unit_price: dec!(250000),
                    service_type_id: None,
                    apartment_id: None,
                }],
                actor: manager(),
            })
            .unwrap();
        assert_eq!(voucher.total, Money::new(250_000));
        assert_eq!(voucher.voucher_date, date(3, 1));
        let item_id = voucher.items[0].id;

        let pending = h
            .service
            .submit_voucher(voucher.voucher_id, manager())
            .unwrap();
        assert_eq!(pending.status, VoucherStatus::Pending);

        let approved = h
            .service
            .approve_voucher(voucher.voucher_id, ActorId::new("chief-accountant"))
            .unwrap();
        assert_eq!(approved.status, VoucherStatus::Approved);
        assert!(approved.journal_entry_id.is_some());
        assert_eq!(approved.approved_by, Some(ActorId::new("chief-accountant")));

        let err = domain(
            h.service
                .delete_voucher_item(item_id, manager())
                .unwrap_err(),
        );
        assert!(matches!(err, DomainError::VoucherNotEditable { .. }));

        let err = domain(
            h.service
                .cancel_voucher(voucher.voucher_id, None, manager())
                .unwrap_err(),
        );
        assert!(matches!(err, DomainError::InvalidStatusTransition { .. }));

        let listed = h.service.list_vouchers(Some(VoucherStatus::Approved));
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].journal_entry_id, approved.journal_entry_id);
    }

    #[test]
    fn workflow_voucher_starts_pending() {
        let h = harness();
        let ticket = TicketId::new();
        let voucher = h
            .service
            .create_voucher_from_workflow(
                ticket,
                NewVoucher {
                    voucher_no: Some("PC-TICKET-77".to_string()),
                    voucher_date: Some(date(3, 2)),
                    counterparty: None,
                    description: None,
                    items: vec![VoucherItemInput {
                        item_id: None,
                        description: "Replacement lock".to_string(),
                        quantity: dec!(2),
                        unit_price: dec!(180000),
                        service_type_id: None,
                        apartment_id: Some(ApartmentId::new()),
                    }],
                    actor: ActorId::system(),
                },
            )
            .unwrap();

        assert_eq!(voucher.status, VoucherStatus::Pending);
        assert_eq!(voucher.ticket_id, Some(ticket));
        assert_eq!(voucher.total, Money::new(360_000));

        let draft = h
            .service
            .return_voucher_to_draft(voucher.voucher_id, Some("split the items".into()), manager())
            .unwrap();
        assert_eq!(draft.status, VoucherStatus::Draft);
        h.service.delete_voucher(voucher.voucher_id, manager()).unwrap();
        assert_eq!(
            domain(h.service.get_voucher(voucher.voucher_id).unwrap_err()),
            DomainError::VoucherNotFound
        );
    }

    #[test]
    fn past_due_invoice_reads_overdue_and_can_still_be_paid() {
        let h = harness();
        let invoice_id = issued_invoice(&h);

        h.clock.set(business_morning(4, 11));
        let view = h.service.get_invoice(invoice_id).unwrap();
        assert_eq!(view.status, InvoiceStatus::Issued);
        assert_eq!(view.effective_status, InvoiceStatus::Overdue);

        let overdue = h.service.list_invoices(&InvoiceFilter {
            status: Some(InvoiceStatus::Overdue),
            ..InvoiceFilter::default()
        });
        assert_eq!(overdue.len(), 1);

        let err = domain(
            h.service
                .change_invoice_status(invoice_id, InvoiceStatus::Overdue, None, manager())
                .unwrap_err(),
        );
        assert!(matches!(err, DomainError::InvalidStatusTransition { .. }));

        let receipt = h
            .service
            .record_receipt(receipt_for(invoice_id, 1_100_000))
            .unwrap();
        assert_eq!(receipt.receipt_date, date(4, 11));
        assert_eq!(receipt.invoice.effective_status, InvoiceStatus::Paid);
    }

    #[test]
    fn invoice_numbers_are_unique_until_the_draft_is_deleted() {
        let h = harness();
        let new_draft = |no: &str| NewInvoiceDraft {
            apartment_id: ApartmentId::new(),
            invoice_no: Some(no.to_string()),
            issue_date: date(3, 1),
            due_date: date(3, 31),
            note: None,
            ticket_id: None,
            actor: manager(),
        };

        let first = h.service.create_invoice_draft(new_draft("A-101/03")).unwrap();
        let err = domain(
            h.service
                .create_invoice_draft(new_draft("  A-101/03 "))
                .unwrap_err(),
        );
        assert_eq!(err, DomainError::DuplicateInvoiceNumber("A-101/03".to_string()));

        h.service.delete_invoice(first.invoice_id, manager()).unwrap();
        assert!(h.service.create_invoice_draft(new_draft("A-101/03")).is_ok());
    }

    #[test]
    fn rejected_create_does_not_burn_the_number() {
        let h = harness();
        let mut bad = NewInvoiceDraft {
            apartment_id: ApartmentId::new(),
            invoice_no: Some("B-202".to_string()),
            issue_date: date(3, 10),
            due_date: date(3, 1),
            note: None,
            ticket_id: None,
            actor: manager(),
        };
        let err = domain(h.service.create_invoice_draft(bad.clone()).unwrap_err());
        assert!(matches!(err, DomainError::Validation { field: "due_date", .. }));

        bad.due_date = date(4, 10);
        assert!(h.service.create_invoice_draft(bad).is_ok());
    }

    fn recurring(
        service_type_id: ServiceTypeId,
        description: &str,
        quantity: Decimal,
    ) -> RecurringCharge {
        RecurringCharge {
            service_type_id,
            description: description.to_string(),
            quantity,
        }
    }

    #[test]
    fn monthly_draft_uses_the_billing_schedule() {
        let h = harness();
        let management = ServiceTypeId::new();
        let parking = ServiceTypeId::new();
        h.catalog.insert(approved_price(management, dec!(12000), date(1, 1)));
        // Priced only from March on, so not billed in February.
        h.catalog.insert(approved_price(parking, dec!(150000), date(3, 1)));

        let view = h
            .service
            .create_monthly_draft(
                ApartmentId::new(),
                2025,
                2,
                &[
                    recurring(management, "Management fee (m2)", dec!(68.5)),
                    recurring(parking, "Parking (vehicles)", dec!(2)),
                ],
                ActorId::system(),
            )
            .unwrap();
        assert_eq!(view.issue_date, date(2, 1));
        assert_eq!(view.due_date, date(3, 13));
        assert_eq!(view.invoice_no, "INV-20250201-0001");
        assert_eq!(view.status, InvoiceStatus::Draft);
        assert_eq!(view.details.len(), 1);
        assert_eq!(view.details[0].unit_price, dec!(12000));
        assert_eq!(view.details[0].price_source, PriceSource::ServicePrice);
        assert_eq!(view.total, Money::new(822_000));

        let stored = h.store.load_stream(view.invoice_id.aggregate_id()).unwrap();
        assert_eq!(stored.len(), 2);
    }

    #[test]
    fn apartment_is_billed_once_per_month() {
        let h = harness();
        let apartment = ApartmentId::new();
        let management = ServiceTypeId::new();
        h.catalog.insert(approved_price(management, dec!(12000), date(1, 1)));
        let charges = [recurring(management, "Management fee (m2)", dec!(50))];

        h.service
            .create_monthly_draft(apartment, 2025, 2, &charges, ActorId::system())
            .unwrap();
        let err = domain(
            h.service
                .create_monthly_draft(apartment, 2025, 2, &charges, ActorId::system())
                .unwrap_err(),
        );
        assert!(matches!(err, DomainError::AlreadyExists(_)));

        // A hand-made invoice in the month counts as billed too.
        let other = ApartmentId::new();
        h.service
            .create_invoice_draft(NewInvoiceDraft {
                apartment_id: other,
                invoice_no: None,
                issue_date: date(3, 1),
                due_date: date(3, 31),
                note: None,
                ticket_id: None,
                actor: manager(),
            })
            .unwrap();
        let err = domain(
            h.service
                .create_monthly_draft(other, 2025, 3, &charges, ActorId::system())
                .unwrap_err(),
        );
        assert!(matches!(err, DomainError::AlreadyExists(_)));

        assert!(h
            .service
            .create_monthly_draft(apartment, 2025, 3, &charges, ActorId::system())
            .is_ok());
        let listed = h.service.list_invoices(&InvoiceFilter {
            apartment_id: Some(apartment),
            ..InvoiceFilter::default()
        });
        assert_eq!(listed.len(), 2);
    }

    #[test]
    fn monthly_draft_needs_a_priced_charge() {
        let h = harness();
        let unpriced = ServiceTypeId::new();

        let err = domain(
            h.service
                .create_monthly_draft(
                    ApartmentId::new(),
                    2025,
                    2,
                    &[recurring(unpriced, "Cleaning", dec!(1))],
                    ActorId::system(),
                )
                .unwrap_err(),
        );
        assert!(matches!(err, DomainError::Validation { field: "charges", .. }));
        assert!(h.service.list_invoices(&InvoiceFilter::default()).is_empty());
    }

    #[test]
    fn services_over_one_store_share_numbers_and_lines() {
        let h = harness();
        let first = draft(&h);
        let detail = h
            .service
            .upsert_invoice_detail(
                first.invoice_id,
                caller_priced(dec!(1), dec!(200000), dec!(0)),
                manager(),
            )
            .unwrap();

        let other = second_service(&h);
        let err = domain(
            other
                .create_invoice_draft(NewInvoiceDraft {
                    apartment_id: ApartmentId::new(),
                    invoice_no: Some(first.invoice_no.clone()),
                    issue_date: date(3, 1),
                    due_date: date(4, 10),
                    note: None,
                    ticket_id: None,
                    actor: manager(),
                })
                .unwrap_err(),
        );
        assert_eq!(err, DomainError::DuplicateInvoiceNumber(first.invoice_no.clone()));

        let next = other
            .create_invoice_draft(NewInvoiceDraft {
                apartment_id: ApartmentId::new(),
                invoice_no: None,
                issue_date: date(3, 1),
                due_date: date(4, 10),
                note: None,
                ticket_id: None,
                actor: manager(),
            })
            .unwrap();
        assert_eq!(next.invoice_no, "INV-20250301-0002");
        assert_eq!(other.list_invoices(&InvoiceFilter::default()).len(), 2);

        let view = other.delete_invoice_detail(detail.id, manager()).unwrap();
        assert_eq!(view.invoice_id, first.invoice_id);
        assert!(view.details.is_empty());
    }

    /// Event store that can refuse invoice or voucher appends, and cannot append atomically.
    struct FlakyStore {
        inner: InMemoryEventStore,
        refuse_invoices: AtomicBool,
        refuse_vouchers: AtomicBool,
    }

    impl FlakyStore {
        fn new() -> Self {
            Self {
                inner: InMemoryEventStore::new(),
                refuse_invoices: AtomicBool::new(false),
                refuse_vouchers: AtomicBool::new(false),
            }
        }

        fn refuses(&self, events: &[UncommittedEvent]) -> bool {
            match events.first().map(|e| e.aggregate_type.as_str()) {
                Some("invoicing.invoice") => self.refuse_invoices.load(Ordering::SeqCst),
                Some("vouchers.voucher") => self.refuse_vouchers.load(Ordering::SeqCst),
                _ => false,
            }
        }
    }

    impl EventStore for FlakyStore {
        fn append(
            &self,
            events: Vec<UncommittedEvent>,
            expected_version: ExpectedVersion,
        ) -> Result<Vec<StoredEvent>, EventStoreError> {
            if self.refuses(&events) {
                return Err(EventStoreError::Unavailable("partition offline".to_string()));
            }
            self.inner.append(events, expected_version)
        }

        fn load_stream(
            &self,
            aggregate_id: AggregateId,
        ) -> Result<Vec<StoredEvent>, EventStoreError> {
            self.inner.load_stream(aggregate_id)
        }

        fn load_all(&self) -> Result<Vec<StoredEvent>, EventStoreError> {
            self.inner.load_all()
        }
    }

    #[test]
    fn receipt_without_invoice_update_requires_reconciliation() {
        let h = harness_with(FlakyStore::new());
        let invoice_id = issued_invoice(&h);
        h.store.refuse_invoices.store(true, Ordering::SeqCst);

        let err = h
            .service
            .record_receipt(receipt_for(invoice_id, 1_100_000))
            .unwrap_err();
        assert!(!err.is_retryable());
        assert_eq!(err.kind(), ErrorKind::Consistency);
        let receipt_id = match err {
            FinanceError::ReceiptReconciliation {
                receipt_id,
                invoice_id: failed,
                ..
            } if failed == invoice_id => receipt_id,
            other => panic!("Expected ReceiptReconciliation, got {other:?}"),
        };

        // The receipt exists, the invoice was not touched.
        assert_eq!(h.store.load_stream(receipt_id.aggregate_id()).unwrap().len(), 1);
        h.store.refuse_invoices.store(false, Ordering::SeqCst);
        let invoice = h.service.get_invoice(invoice_id).unwrap();
        assert_eq!(invoice.status, InvoiceStatus::Issued);
        assert_eq!(invoice.receipt_id, None);
    }

    #[test]
    fn failed_voucher_leaves_the_invoice_unpaid() {
        let h = harness_with(FlakyStore::new());
        let invoice_id = issued_invoice(&h);
        h.store.refuse_vouchers.store(true, Ordering::SeqCst);

        let mut request = receipt_for(invoice_id, 1_100_000);
        request.create_reconciliation_voucher = true;
        let err = h.service.record_receipt(request).unwrap_err();
        assert!(matches!(err, FinanceError::ReceiptReconciliation { .. }));

        assert_eq!(
            h.service.get_invoice(invoice_id).unwrap().status,
            InvoiceStatus::Issued
        );
        let listed = h.service.list_invoices(&InvoiceFilter::default());
        assert_eq!(listed[0].status, InvoiceStatus::Issued);
        assert_eq!(listed[0].receipt_id, None);
        assert!(h.service.list_vouchers(None).is_empty());
    }

    #[test]
    fn partially_committed_receipt_documents_reach_the_summaries() {
        let h = harness_with(FlakyStore::new());
        let invoice_id = issued_invoice(&h);
        h.store.refuse_invoices.store(true, Ordering::SeqCst);

        let mut request = receipt_for(invoice_id, 1_100_000);
        request.create_reconciliation_voucher = true;
        let err = h.service.record_receipt(request).unwrap_err();
        assert!(matches!(err, FinanceError::ReceiptReconciliation { .. }));

        let vouchers = h.service.list_vouchers(None);
        assert_eq!(vouchers.len(), 1);
        assert_eq!(vouchers[0].total, Money::new(1_100_000));
        assert_eq!(vouchers[0].voucher_no.as_deref(), Some("PC-2025-001"));
        assert!(h.service.get_voucher(vouchers[0].voucher_id).is_ok());
    }

    /// Writes atomic batches stream by stream with voucher streams last, and refuses vouchers.
    struct VouchersLastStore {
        inner: InMemoryEventStore,
    }

    impl EventStore for VouchersLastStore {
        fn append(
            &self,
            events: Vec<UncommittedEvent>,
            expected_version: ExpectedVersion,
        ) -> Result<Vec<StoredEvent>, EventStoreError> {
            if events.iter().any(|e| e.aggregate_type == "vouchers.voucher") {
                return Err(EventStoreError::Unavailable("voucher partition offline".to_string()));
            }
            self.inner.append(events, expected_version)
        }

        fn load_stream(
            &self,
            aggregate_id: AggregateId,
        ) -> Result<Vec<StoredEvent>, EventStoreError> {
            self.inner.load_stream(aggregate_id)
        }

        fn load_all(&self) -> Result<Vec<StoredEvent>, EventStoreError> {
            self.inner.load_all()
        }

        fn append_atomic(
            &self,
            mut batch: Vec<StreamAppend>,
        ) -> Result<Vec<StoredEvent>, EventStoreError> {
            batch.sort_by_key(|a| a.events.iter().any(|e| e.aggregate_type == "vouchers.voucher"));
            let mut committed = Vec::new();
            let mut events = Vec::new();
            for append in batch {
                let aggregate_id = append.aggregate_id;
                match self.append(append.events, append.expected_version) {
                    Ok(stored) => {
                        committed.push(aggregate_id);
                        events.extend(stored);
                    }
                    Err(e) => {
                        return Err(EventStoreError::PartialCommit {
                            committed,
                            failed: aggregate_id,
                            reason: e.to_string(),
                            events,
                        });
                    }
                }
            }
            Ok(events)
        }
    }

    #[test]
    fn paid_invoice_without_its_voucher_is_reported() {
        let h = harness_with(VouchersLastStore {
            inner: InMemoryEventStore::new(),
        });
        let invoice_id = issued_invoice(&h);

        let mut request = receipt_for(invoice_id, 1_100_000);
        request.create_reconciliation_voucher = true;
        let err = h.service.record_receipt(request).unwrap_err();
        assert!(!err.is_retryable());
        assert_eq!(err.kind(), ErrorKind::Consistency);
        let (receipt_id, voucher_id): (ReceiptId, VoucherId) = match err {
            FinanceError::ReconciliationVoucherMissing {
                receipt_id,
                voucher_id,
                ..
            } => (receipt_id, voucher_id),
            other => panic!("Expected ReconciliationVoucherMissing, got {other:?}"),
        };

        let invoice = h.service.get_invoice(invoice_id).unwrap();
        assert_eq!(invoice.status, InvoiceStatus::Paid);
        assert_eq!(invoice.receipt_id, Some(receipt_id));
        let listed = h.service.list_invoices(&InvoiceFilter::default());
        assert_eq!(listed[0].status, InvoiceStatus::Paid);
        assert!(h.service.get_receipt(receipt_id).is_ok());
        assert_eq!(
            domain(h.service.get_voucher(voucher_id).unwrap_err()),
            DomainError::VoucherNotFound
        );
    }

    #[test]
    fn atomic_store_writes_neither_stream_when_the_invoice_is_stale() {
        let h = harness();
        let invoice_id = issued_invoice(&h);
        let dispatcher = h.service.dispatcher();
        let now = business_morning(3, 1);

        let invoice: Invoice = dispatcher
            .load(invoice_id.aggregate_id(), |id| Invoice::empty(InvoiceId::new(id)))
            .unwrap();
        let receipt_id = ReceiptId::generate();
        let receipt = dispatcher
            .prepare(
                &Receipt::empty(receipt_id),
                &ReceiptCommand::RecordReceipt(RecordReceipt {
                    receipt_id,
                    receipt_no: "REC-MANUAL-1".to_string(),
                    invoice_id,
                    payment_method_id: PaymentMethodId::new(),
                    amount: Money::new(1_100_000),
                    receipt_date: date(3, 1),
                    note: None,
                    voucher_id: None,
                    actor: manager(),
                    occurred_at: now,
                }),
            )
            .unwrap();
        let paid = dispatcher
            .prepare(
                &invoice,
                &InvoiceCommand::ChangeInvoiceStatus(ChangeInvoiceStatus {
                    invoice_id,
                    target: InvoiceStatus::Paid,
                    note: None,
                    receipt_id: Some(receipt_id),
                    actor: manager(),
                    occurred_at: now,
                }),
            )
            .unwrap();

        // Cancelled by someone else between the decision and the commit.
        h.service
            .change_invoice_status(invoice_id, InvoiceStatus::Cancelled, None, manager())
            .unwrap();

        let err = dispatcher
            .commit_atomic(vec![receipt.stream_append(), paid.stream_append()])
            .unwrap_err();
        assert!(err.is_concurrency_conflict());
        assert!(h.store.load_stream(receipt_id.aggregate_id()).unwrap().is_empty());
        assert_eq!(
            h.service.get_invoice(invoice_id).unwrap().status,
            InvoiceStatus::Cancelled
        );
    }

    #[derive(Debug, Clone)]
    enum DetailOp {
        Upsert { slot: usize, quantity: u32, unit_price: u32, vat: u32 },
        Remove { slot: usize },
    }

    fn detail_op() -> impl Strategy<Value = DetailOp> {
        prop_oneof![
            3 => (0usize..4, 1u32..50, 0u32..2_000_000, 0u32..=10).prop_map(
                |(slot, quantity, unit_price, vat)| DetailOp::Upsert {
                    slot,
                    quantity,
                    unit_price,
                    vat
                }
            ),
            1 => (0usize..4).prop_map(|slot| DetailOp::Remove { slot }),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig { cases: 32, .. ProptestConfig::default() })]

        #[test]
        fn views_and_summaries_agree_with_detail_sums(ops in prop::collection::vec(detail_op(), 1..12)) {
            let h = harness();
            let invoice = draft(&h);
            let slots: Vec<LineId> = (0..4).map(|_| LineId::new()).collect();
            let service_type = ServiceTypeId::new();

            for op in ops {
                match op {
                    DetailOp::Upsert { slot, quantity, unit_price, vat } => {
                        let result = h.service.upsert_invoice_detail(
                            invoice.invoice_id,
                            InvoiceDetailInput {
                                detail_id: Some(slots[slot]),
                                service_type_id: service_type,
                                description: format!("slot {slot}"),
                                quantity: Decimal::from(quantity),
                                unit_price: Some(Decimal::from(unit_price)),
                                vat_rate: Some(Decimal::from(vat)),
                            },
                            manager(),
                        );
                        if unit_price == 0 {
                            prop_assert!(result.is_err());
                        } else {
                            prop_assert!(result.is_ok());
                        }
                    }
                    DetailOp::Remove { slot } => {
                        let _ = h.service.delete_invoice_detail(slots[slot], manager());
                    }
                }

                let view = h.service.get_invoice(invoice.invoice_id).unwrap();
                let subtotal: i64 = view.details.iter().map(|d| d.amount.units()).sum();
                let tax: i64 = view.details.iter().map(|d| d.vat_amount.units()).sum();
                prop_assert_eq!(view.subtotal.units(), subtotal);
                prop_assert_eq!(view.tax.units(), tax);
                prop_assert_eq!(view.total.units(), subtotal + tax);

                let summary = h
                    .service
                    .list_invoices(&InvoiceFilter::default())
                    .into_iter()
                    .find(|s| s.invoice_id == invoice.invoice_id)
                    .unwrap();
                prop_assert_eq!(summary.total, view.total);
                prop_assert_eq!(summary.detail_count, view.details.len());
            }
        }
    }
}
