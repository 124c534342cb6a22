//! # Correlation Registry Benchmarks
//!
//! | Path | Target |
//! |------|--------|
//! | register + resolve | < 2µs per request |
//! | expire sweep | linear in due entries |
//! | contended resolve | scales with threads (sharded table) |

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use swarm_correlation::{
    Continuation, CorrelationRegistry, InlineDispatcher, ManualClock, MatchId,
};

fn registry() -> (CorrelationRegistry<u64>, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new());
    let registry =
        CorrelationRegistry::new(Arc::new(InlineDispatcher::new())).with_clock(clock.clone());
    (registry, clock)
}

fn noop() -> Continuation<u64> {
    Continuation::new(|outcome| {
        black_box(outcome);
    })
}

fn bench_register_resolve(c: &mut Criterion) {
    let mut group = c.benchmark_group("registry-register-resolve");
    group.measurement_time(Duration::from_secs(5));

    let (registry, _clock) = registry();
    let ids: Vec<MatchId> = (0..10_000).map(|i| MatchId::new(format!("m{i}"))).collect();

    group.throughput(Throughput::Elements(1));
    group.bench_function("single", |b| {
        let mut i = 0usize;
        b.iter(|| {
            let id = &ids[i % ids.len()];
            i += 1;
            registry
                .register(id.clone(), noop(), Duration::from_secs(30))
                .ok();
            black_box(registry.resolve(id, 1));
        })
    });

    group.finish();
}

fn bench_expire(c: &mut Criterion) {
    let mut group = c.benchmark_group("registry-expire");

    for size in [1_000usize, 10_000, 100_000] {
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::new("expire_all_due", size), &size, |b, &size| {
            b.iter_batched(
                || {
                    let (registry, clock) = registry();
                    for i in 0..size {
                        registry
                            .register(MatchId::new(format!("e{i}")), noop(), Duration::from_millis(10))
                            .ok();
                    }
                    clock.advance(Duration::from_millis(10));
                    registry
                },
                |registry| black_box(registry.expire_due()),
                criterion::BatchSize::LargeInput,
            )
        });
    }

    group.finish();
}

fn bench_contended_resolve(c: &mut Criterion) {
    let mut group = c.benchmark_group("registry-contended");
    group.sample_size(20);

    const PER_THREAD: usize = 2_000;
    for threads in [1usize, 4, 8] {
        group.throughput(Throughput::Elements((threads * PER_THREAD) as u64));
        group.bench_with_input(BenchmarkId::new("threads", threads), &threads, |b, &threads| {
            b.iter_batched(
                || {
                    let (registry, _clock) = registry();
                    for i in 0..threads * PER_THREAD {
                        registry
                            .register(MatchId::new(format!("c{i}")), noop(), Duration::from_secs(30))
                            .ok();
                    }
                    registry
                },
                |registry| {
                    thread::scope(|scope| {
                        for t in 0..threads {
                            let registry = &registry;
                            scope.spawn(move || {
                                for i in t * PER_THREAD..(t + 1) * PER_THREAD {
                                    registry.resolve(&MatchId::new(format!("c{i}")), i as u64);
                                }
                            });
                        }
                    });
                },
                criterion::BatchSize::LargeInput,
            )
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_register_resolve,
    bench_expire,
    bench_contended_resolve
);
criterion_main!(benches);
