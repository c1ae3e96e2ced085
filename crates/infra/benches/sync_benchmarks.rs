use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

use std::collections::BTreeMap;
use std::sync::Arc;

use revsync_core::AggregateId;
use revsync_infra::{Backfill, InMemoryRevenueRepository, RevenueSynchronizer, SyncConfig};
use revsync_invoicing::{InvoiceChange, InvoiceId, InvoiceSnapshot, InvoiceStatus};
use revsync_revenue::{PeriodKey, classify};

fn snapshot(amount: i64, status: InvoiceStatus, date: &str) -> InvoiceSnapshot {
    InvoiceSnapshot::new(InvoiceId::new(AggregateId::new()), amount, status, date)
}

/// Pure classification cost, no storage involved.
fn bench_classify(c: &mut Criterion) {
    let mut group = c.benchmark_group("classify");

    let prev = snapshot(100, InvoiceStatus::Pending, "2024-03-10");
    let mut paid = prev.clone();
    paid.status = InvoiceStatus::Paid;
    let mut moved = prev.clone();
    moved.date = "2024-04-02T09:30:00+02:00".to_string();

    group.bench_function("bucket_move", |b| {
        b.iter(|| black_box(classify(Some(black_box(&prev)), Some(black_box(&paid))).unwrap()));
    });

    group.bench_function("period_move_rfc3339", |b| {
        b.iter(|| black_box(classify(Some(black_box(&prev)), Some(black_box(&moved))).unwrap()));
    });

    group.finish();
}

fn bench_process_invoice_change(c: &mut Criterion) {
    let mut group = c.benchmark_group("process_invoice_change");
    group.sample_size(1000);

    group.bench_function("create_into_existing_period", |b| {
        let sync = RevenueSynchronizer::new(Arc::new(InMemoryRevenueRepository::new()), SyncConfig::default());

        b.iter(|| {
            let change = InvoiceChange::created(snapshot(black_box(25), InvoiceStatus::Paid, "2024-03-10"));
            black_box(sync.process_invoice_change(&change).unwrap());
        });
    });

    group.bench_function("duplicate_revision_skip", |b| {
        let sync = RevenueSynchronizer::new(Arc::new(InMemoryRevenueRepository::new()), SyncConfig::default());
        let change = InvoiceChange::created(snapshot(25, InvoiceStatus::Paid, "2024-03-10")).with_revision(1);
        sync.process_invoice_change(&change).unwrap();

        b.iter(|| black_box(sync.process_invoice_change(black_box(&change)).unwrap()));
    });

    group.finish();
}

fn bench_rebuild(c: &mut Criterion) {
    let mut group = c.benchmark_group("backfill_rebuild");
    let from = PeriodKey::parse_month("2024-01").unwrap();
    let to = PeriodKey::parse_month("2024-12").unwrap();

    for invoices in [100usize, 1_000, 10_000].iter() {
        group.throughput(Throughput::Elements(*invoices as u64));
        group.bench_with_input(BenchmarkId::new("invoices", invoices), invoices, |b, &n| {
            let snapshots: Vec<InvoiceSnapshot> = (0..n)
                .map(|i| {
                    let status = if i % 3 == 0 {
                        InvoiceStatus::Pending
                    } else {
                        InvoiceStatus::Paid
                    };
                    snapshot(10 + i as i64, status, &format!("2024-{:02}-15", i % 12 + 1))
                })
                .collect();
            let backfill = Backfill::new(Arc::new(InMemoryRevenueRepository::new()));

            b.iter(|| black_box(backfill.rebuild(from, to, &snapshots, &BTreeMap::new()).unwrap()));
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_classify,
    bench_process_invoice_change,
    bench_rebuild
);
criterion_main!(benches);
