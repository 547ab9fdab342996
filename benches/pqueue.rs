use std::hint::black_box;
use std::sync::Arc;
use std::time::Instant;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use nebcore::broker::events::NEBTYPE_LOG_DATA;
use nebcore::broker::{callback, CallbackStatus, CallbackType, EventBroker, EventMeta, ModuleId};
use nebcore::PriorityQueue;

fn priorities(n: usize) -> Vec<u64> {
    // Deterministic scatter so every run sees the same heap shape.
    (0..n as u64).map(|i| (i * 2_654_435_761) % 1_000_003).collect()
}

fn bench_insert_pop(c: &mut Criterion) {
    let mut group = c.benchmark_group("pqueue/insert_pop");
    for n in [128usize, 4_096, 65_536] {
        let input = priorities(n);
        group.throughput(Throughput::Elements(n as u64));
        group.bench_with_input(BenchmarkId::from_parameter(n), &input, |b, input| {
            b.iter(|| {
                let mut q = PriorityQueue::min_first(127).unwrap();
                for (i, &p) in input.iter().enumerate() {
                    q.insert(i, p).unwrap();
                }
                while let Some(v) = q.pop() {
                    black_box(v);
                }
            });
        });
    }
    group.finish();
}

fn bench_change_priority(c: &mut Criterion) {
    let mut group = c.benchmark_group("pqueue/change_priority");
    group.throughput(Throughput::Elements(1));

    group.bench_function("reschedule_4096", |b| {
        b.iter_custom(|iters| {
            let mut q = PriorityQueue::min_first(4_096).unwrap();
            let handles: Vec<_> = priorities(4_096)
                .into_iter()
                .enumerate()
                .map(|(i, p)| q.insert(i, p).unwrap())
                .collect();

            let start = Instant::now();
            for i in 0..iters {
                let idx = usize::try_from(i % 4_096).unwrap();
                q.change_priority(handles[idx], i * 31 % 1_000_003).unwrap();
            }
            start.elapsed()
        })
    });
    group.finish();
}

fn bench_dispatch(c: &mut Criterion) {
    let mut group = c.benchmark_group("broker/make_callbacks");
    group.throughput(Throughput::Elements(1));

    for k in [1usize, 8, 64] {
        let broker = Arc::new(EventBroker::default());
        let owner = ModuleId::new();
        for _ in 0..k {
            broker
                .register_callback(CallbackType::LogData, owner, 0, callback(|_, _| CallbackStatus::Continue))
                .unwrap();
        }
        group.bench_with_input(BenchmarkId::from_parameter(k), &broker, |b, broker| {
            b.iter(|| {
                let outcome = broker
                    .log_data(EventMeta::new(NEBTYPE_LOG_DATA), "bench", 1, chrono::Utc::now())
                    .unwrap();
                black_box(outcome);
            });
        });
    }
    group.finish();
}

criterion_group!(pqueue, bench_insert_pop, bench_change_priority, bench_dispatch);
criterion_main!(pqueue);
