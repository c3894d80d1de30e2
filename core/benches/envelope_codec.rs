//! Envelope codec benchmarks
//!
//! Measures the two decode stages separately so a regression in the typed
//! payload stage is not hidden by the outer JSON parse.
//!
//! Run with: `cargo bench -p eda-core`

#![allow(missing_docs)]
#![allow(clippy::expect_used)]

use criterion::{Criterion, Throughput, black_box, criterion_group, criterion_main};
use eda_core::envelope::EventEnvelope;
use eda_core::environment::SystemClock;
use eda_core::event::{DomainEvent, OrderCreated, OrderLine};

fn order_with_lines(lines: usize) -> DomainEvent {
    let items = (0..lines)
        .map(|i| OrderLine::new(format!("product-{i}"), 1).with_unit_price_cents(999))
        .collect();
    let mut order = OrderCreated::new("order-bench", items);
    order.customer_id = Some("customer-bench".to_string());
    DomainEvent::from(order)
}

fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("envelope_encode");
    for lines in [1_usize, 10, 100] {
        let event = order_with_lines(lines);
        group.throughput(Throughput::Elements(1));
        group.bench_function(format!("order_created_{lines}_lines"), |b| {
            b.iter(|| {
                let envelope =
                    EventEnvelope::from_event(black_box(&event), &SystemClock).expect("envelope");
                envelope.encode().expect("encode")
            });
        });
    }
    group.finish();
}

fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("envelope_decode");
    for lines in [1_usize, 10, 100] {
        let bytes = EventEnvelope::from_event(&order_with_lines(lines), &SystemClock)
            .expect("envelope")
            .encode()
            .expect("encode");
        group.throughput(Throughput::Bytes(bytes.len() as u64));

        group.bench_function(format!("outer_{lines}_lines"), |b| {
            b.iter(|| EventEnvelope::decode(black_box(&bytes)).expect("decode"));
        });
        group.bench_function(format!("typed_{lines}_lines"), |b| {
            b.iter(|| {
                EventEnvelope::decode(black_box(&bytes))
                    .expect("decode")
                    .decode_payload::<OrderCreated>()
                    .expect("payload")
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_encode, bench_decode);
criterion_main!(benches);
