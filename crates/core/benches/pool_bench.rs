//! Pool and formatter benchmarks
//!
//! Measures acquire/release cost against plain allocation, and rendering cost
//! of the two formatters.

use criterion::{Criterion, Throughput, black_box, criterion_group, criterion_main};
use relaylog_core::event::{Level, LogEvent};
use relaylog_core::format::{Formatter, JsonFormatter, TextFormatter};
use relaylog_core::pool::{BufferPool, EventPool};

fn sample_event() -> LogEvent {
    LogEvent::new(Level::Info, "GET /api/v1/users 200")
        .with_field("request_id", "550e8400-e29b-41d4-a716-446655440000")
        .with_field("duration_ms", 125)
        .with_field("status", 200)
}

fn bench_event_pool(c: &mut Criterion) {
    let pool = EventPool::new(1024).unwrap();
    let source = sample_event();

    let mut group = c.benchmark_group("event_pool");
    group.throughput(Throughput::Elements(1));

    group.bench_function("acquire_copy_release", |b| {
        b.iter(|| {
            let mut event = pool.acquire();
            event.copy_from(black_box(&source));
            pool.release(event);
        })
    });

    group.bench_function("clone_and_drop", |b| {
        b.iter(|| {
            let event = black_box(&source).clone();
            drop(black_box(event));
        })
    });

    group.finish();
}

fn bench_formatters(c: &mut Criterion) {
    let buffers = BufferPool::with_defaults();
    let event = sample_event();
    let text = TextFormatter::new();
    let json = JsonFormatter::new();

    let mut group = c.benchmark_group("format");
    group.throughput(Throughput::Elements(1));

    group.bench_function("text", |b| {
        b.iter(|| {
            let mut buf = buffers.acquire();
            text.format(black_box(&event), &mut buf).unwrap();
            buffers.release(buf);
        })
    });

    group.bench_function("json", |b| {
        b.iter(|| {
            let mut buf = buffers.acquire();
            json.format(black_box(&event), &mut buf).unwrap();
            buffers.release(buf);
        })
    });

    group.finish();
}

criterion_group!(benches, bench_event_pool, bench_formatters);
criterion_main!(benches);
