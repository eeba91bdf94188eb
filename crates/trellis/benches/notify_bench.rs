//! Benchmarks for the write → notify → re-evaluate hot path.
//!
//! Run with: cargo bench -p trellis --bench notify_bench

use criterion::{Criterion, criterion_group, criterion_main};
use std::hint::black_box;
use trellis::{Value, Watcher, observe};

// =============================================================================
// Notification fan-out
// =============================================================================

fn bench_notify_fanout(c: &mut Criterion) {
    let mut group = c.benchmark_group("notify/fanout");

    for watchers in [1usize, 8, 64] {
        let root = observe(Value::object([("slot", 0)])).unwrap();
        let handles: Vec<Watcher> = (0..watchers)
            .map(|_| Watcher::with_path(&root, "slot", |_, _| {}).unwrap())
            .collect();

        let mut counter = 0i64;
        group.bench_function(format!("watchers_{watchers}"), |b| {
            b.iter(|| {
                counter += 1;
                root.set("slot", black_box(counter));
            })
        });
        drop(handles);
    }

    group.finish();
}

// =============================================================================
// Identity short-circuit (write of an unchanged value)
// =============================================================================

fn bench_identical_write(c: &mut Criterion) {
    let root = observe(Value::object([("slot", 1)])).unwrap();
    let _watcher = Watcher::with_path(&root, "slot", |_, _| {}).unwrap();

    c.bench_function("notify/identical_write", |b| {
        b.iter(|| root.set("slot", black_box(1)))
    });
}

// =============================================================================
// Path resolution and dependency rebuild
// =============================================================================

fn bench_deep_path_evaluate(c: &mut Criterion) {
    let root = observe(Value::object([(
        "a",
        Value::object([("b", Value::object([("c", Value::object([("d", 1)]))]))]),
    )]))
    .unwrap();
    let watcher = Watcher::with_path(&root, "a.b.c.d", |_, _| {}).unwrap();

    c.bench_function("evaluate/depth_4", |b| b.iter(|| black_box(watcher.get())));
}

criterion_group!(
    benches,
    bench_notify_fanout,
    bench_identical_write,
    bench_deep_path_evaluate
);
criterion_main!(benches);
