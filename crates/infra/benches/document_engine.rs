use std::sync::Arc;

use chrono::{NaiveDate, TimeZone, Utc};
use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::Value as JsonValue;

use homeledger_core::{ActorId, ApartmentId, InvoiceId, LineId, ServiceTypeId};
use homeledger_events::{EventEnvelope, InMemoryEventBus};
use homeledger_infra::event_store::{EventStore, InMemoryEventStore};
use homeledger_infra::projections::DocumentSummaryProjection;
use homeledger_infra::{
    FinanceConfig, FinancialDocumentService, FixedClock, InMemoryServicePriceCatalog,
    InvoiceDetailInput, NewInvoiceDraft,
};
use homeledger_pricing::calculate_line;

type Bus = Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>;
type Service = FinancialDocumentService<Arc<InMemoryEventStore>, Bus>;

fn setup() -> (Service, Arc<InMemoryEventStore>) {
    let store = Arc::new(InMemoryEventStore::new());
    let service = FinancialDocumentService::new(
        store.clone(),
        Arc::new(InMemoryEventBus::new()),
        Arc::new(InMemoryServicePriceCatalog::new()),
        Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2025, 3, 1, 3, 0, 0).unwrap(),
        )),
        FinanceConfig::default(),
    )
    .unwrap();
    (service, store)
}

fn new_draft(service: &Service) -> InvoiceId {
    service
        .create_invoice_draft(NewInvoiceDraft {
            apartment_id: ApartmentId::new(),
            invoice_no: None,
            issue_date: NaiveDate::from_ymd_opt(2025, 3, 1).unwrap(),
            due_date: NaiveDate::from_ymd_opt(2025, 4, 10).unwrap(),
            note: None,
            ticket_id: None,
            actor: ActorId::system(),
        })
        .unwrap()
        .invoice_id
}

fn detail(detail_id: Option<LineId>, quantity: Decimal) -> InvoiceDetailInput {
    InvoiceDetailInput {
        detail_id,
        service_type_id: ServiceTypeId::new(),
        description: "Electricity (kWh)".to_string(),
        quantity,
        unit_price: Some(dec!(3500)),
        vat_rate: Some(dec!(8)),
    }
}

fn bench_line_calculation(c: &mut Criterion) {
    let mut group = c.benchmark_group("line_calculation");

    group.bench_function("whole_units", |b| {
        b.iter(|| calculate_line(black_box(dec!(2)), black_box(dec!(500000)), black_box(dec!(10))))
    });
    group.bench_function("fractional_half_up", |b| {
        b.iter(|| {
            calculate_line(
                black_box(dec!(123.457)),
                black_box(dec!(3512.5)),
                black_box(dec!(8)),
            )
        })
    });

    group.finish();
}

fn bench_detail_upsert_latency(c: &mut Criterion) {
    let mut group = c.benchmark_group("detail_upsert_latency");

    for history in [1usize, 50, 500] {
        group.bench_with_input(BenchmarkId::from_parameter(history), &history, |b, &history| {
            let (service, _) = setup();
            let invoice_id = new_draft(&service);
            let slot = LineId::new();
            for i in 0..history {
                service
                    .upsert_invoice_detail(
                        invoice_id,
                        detail(Some(slot), Decimal::from(i + 1)),
                        ActorId::system(),
                    )
                    .unwrap();
            }

            b.iter(|| {
                service
                    .upsert_invoice_detail(
                        black_box(invoice_id),
                        detail(Some(slot), dec!(42)),
                        ActorId::system(),
                    )
                    .unwrap()
            })
        });
    }

    group.finish();
}

fn bench_summary_rebuild(c: &mut Criterion) {
    let mut group = c.benchmark_group("summary_rebuild");

    for invoices in [10usize, 100, 1000] {
        let (service, store) = setup();
        let mut envelopes = Vec::new();
        for _ in 0..invoices {
            let invoice_id = new_draft(&service);
            for q in 1..=3 {
                service
                    .upsert_invoice_detail(invoice_id, detail(None, Decimal::from(q)), ActorId::system())
                    .unwrap();
            }
            envelopes.extend(
                store
                    .load_stream(invoice_id.aggregate_id())
                    .unwrap()
                    .iter()
                    .map(|e| e.to_envelope()),
            );
        }

        group.throughput(Throughput::Elements(envelopes.len() as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(invoices),
            &envelopes,
            |b, envelopes| {
                b.iter(|| {
                    let projection = DocumentSummaryProjection::in_memory();
                    projection.rebuild_from_scratch(envelopes.clone()).unwrap();
                    projection
                })
            },
        );
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_line_calculation,
    bench_detail_upsert_latency,
    bench_summary_rebuild
);
criterion_main!(benches);
