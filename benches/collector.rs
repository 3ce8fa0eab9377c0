//! Benchmarks for latency sample recording

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use relay_hub::collector::LatencyCollector;
use relay_hub::core::TimeField;
use std::sync::Arc;
use std::time::Duration;

fn bench_add_sample(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let _guard = rt.enter();

    let collector = Arc::new(LatencyCollector::new());
    // Required set never completes, so the session stays open for the run
    collector.start_session(TimeField::required_names(), Duration::from_secs(3600));

    c.bench_function("collector_add_sample", |b| {
        b.iter(|| collector.add_sample(black_box("ESP32_TO_SERVER"), black_box(12)))
    });

    c.bench_function("collector_get_sample", |b| {
        b.iter(|| collector.get_sample(black_box("ESP32_TO_SERVER")))
    });
}

fn bench_idle_add(c: &mut Criterion) {
    let collector = LatencyCollector::new();

    c.bench_function("collector_add_without_session", |b| {
        b.iter(|| collector.add_sample(black_box("SERVER_TO_VIS"), black_box(3)))
    });
}

criterion_group!(benches, bench_add_sample, bench_idle_add);
criterion_main!(benches);
