//! # Exactly-Once Under Contention
//!
//! N OS threads × M match ids. Workers race to register, resolve, expire and
//! cancel the same ids while the clock moves. Each accepted registration owns
//! a flag its continuation flips; a second flip is a double delivery.

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::sync::Barrier;
    use swarm_correlation::{
        CancelReason, Continuation, CorrelationError, CorrelationRegistry, InlineDispatcher,
        ManualClock, MatchId, TokioDispatcher,
    };

    const WORKERS: usize = 8;
    const IDS: usize = 64;
    const OPS_PER_WORKER: usize = 20_000;

    #[derive(Default)]
    struct Ledger {
        accepted: AtomicU64,
        delivered: AtomicU64,
        doubles: AtomicU64,
    }

    impl Ledger {
        fn continuation(self: &Arc<Self>) -> Continuation<u64> {
            let ledger = Arc::clone(self);
            let fired = AtomicBool::new(false);
            Continuation::new(move |_| {
                if fired.swap(true, Ordering::SeqCst) {
                    ledger.doubles.fetch_add(1, Ordering::SeqCst);
                }
                ledger.delivered.fetch_add(1, Ordering::SeqCst);
            })
        }
    }

    fn ids() -> Vec<MatchId> {
        (0..IDS).map(|i| MatchId::new(format!("m{i}"))).collect()
    }

    #[test]
    fn test_racing_workers_deliver_exactly_once() {
        let clock = Arc::new(ManualClock::new());
        let registry: CorrelationRegistry<u64> =
            CorrelationRegistry::new(Arc::new(InlineDispatcher::new())).with_clock(clock.clone());
        let ledger = Arc::new(Ledger::default());
        let ids = ids();

        thread::scope(|scope| {
            for worker in 0..WORKERS {
                let (registry, ledger, ids, clock) = (&registry, &ledger, &ids, &clock);
                scope.spawn(move || {
                    let mut rng = StdRng::seed_from_u64(worker as u64);
                    for op in 0..OPS_PER_WORKER {
                        let id = &ids[rng.gen_range(0..IDS)];
                        match rng.gen_range(0..10) {
                            0..=3 => {
                                let timeout = Duration::from_micros(rng.gen_range(1..500));
                                if registry
                                    .register(id.clone(), ledger.continuation(), timeout)
                                    .is_ok()
                                {
                                    ledger.accepted.fetch_add(1, Ordering::SeqCst);
                                }
                            }
                            4..=6 => {
                                registry.resolve(id, op as u64);
                            }
                            7 => {
                                registry.cancel(id, CancelReason::UserAborted);
                            }
                            8 => {
                                clock.advance(Duration::from_micros(50));
                            }
                            _ => {
                                registry.expire_due();
                            }
                        }
                    }
                });
            }
        });

        registry.cancel_all(CancelReason::RunStopped);

        let accepted = ledger.accepted.load(Ordering::SeqCst);
        assert!(accepted > 0);
        assert_eq!(ledger.doubles.load(Ordering::SeqCst), 0);
        assert_eq!(ledger.delivered.load(Ordering::SeqCst), accepted);

        let stats = registry.stats();
        assert_eq!(stats.registered, accepted);
        assert_eq!(stats.terminal(), accepted);
        assert_eq!(registry.pending_count(), 0);
    }

    #[test]
    fn test_resolvers_and_sweeper_race_on_due_entries() {
        // Every entry is due at once; half the threads resolve, half expire.
        let clock = Arc::new(ManualClock::new());
        let registry: CorrelationRegistry<u64> =
            CorrelationRegistry::new(Arc::new(InlineDispatcher::new())).with_clock(clock.clone());
        let ledger = Arc::new(Ledger::default());

        let ids: Vec<MatchId> = (0..10_000).map(|i| MatchId::new(format!("d{i}"))).collect();
        for id in &ids {
            registry
                .register(id.clone(), ledger.continuation(), Duration::from_millis(1))
                .unwrap();
        }
        clock.advance(Duration::from_millis(1));

        thread::scope(|scope| {
            for worker in 0..WORKERS {
                let (registry, ids) = (&registry, &ids);
                scope.spawn(move || {
                    if worker % 2 == 0 {
                        for id in ids {
                            registry.resolve(id, 0);
                        }
                    } else {
                        registry.expire_due();
                    }
                });
            }
        });

        assert_eq!(ledger.doubles.load(Ordering::SeqCst), 0);
        assert_eq!(ledger.delivered.load(Ordering::SeqCst), 10_000);
        // Every entry was past its deadline: all outcomes are timeouts.
        let stats = registry.stats();
        assert_eq!(stats.expired, 10_000);
        assert_eq!(stats.matched, 0);
    }

    #[test]
    fn test_registrations_racing_close_never_leak() {
        let clock = Arc::new(ManualClock::new());
        let registry: CorrelationRegistry<u64> =
            CorrelationRegistry::new(Arc::new(InlineDispatcher::new())).with_clock(clock.clone());
        let ledger = Arc::new(Ledger::default());
        let start = Barrier::new(WORKERS + 1);
        let refused = AtomicU64::new(0);

        thread::scope(|scope| {
            for worker in 0..WORKERS {
                let (registry, ledger, start, refused) = (&registry, &ledger, &start, &refused);
                scope.spawn(move || {
                    start.wait();
                    for i in 0.. {
                        let id = MatchId::new(format!("w{worker}-{i}"));
                        match registry.register(id, ledger.continuation(), Duration::from_secs(60))
                        {
                            Ok(_) => {
                                ledger.accepted.fetch_add(1, Ordering::SeqCst);
                            }
                            Err(CorrelationError::ShuttingDown) => {
                                refused.fetch_add(1, Ordering::SeqCst);
                                break;
                            }
                            Err(e) => panic!("unexpected registration error: {e}"),
                        }
                    }
                });
            }

            let (registry, start) = (&registry, &start);
            scope.spawn(move || {
                start.wait();
                thread::sleep(Duration::from_millis(20));
                registry.close(CancelReason::Shutdown);
            });
        });

        // Registrations that won the race were drained by the close itself
        let accepted = ledger.accepted.load(Ordering::SeqCst);
        assert!(accepted > 0);
        assert_eq!(refused.load(Ordering::SeqCst), WORKERS as u64);
        assert_eq!(ledger.doubles.load(Ordering::SeqCst), 0);
        assert_eq!(ledger.delivered.load(Ordering::SeqCst), accepted);
        assert_eq!(registry.pending_count(), 0);

        let stats = registry.stats();
        assert_eq!(stats.registered, accepted);
        assert_eq!(stats.cancelled, accepted);
        assert_eq!(registry.expire_due(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_tokio_dispatch_under_concurrent_resolution() {
        let registry: Arc<CorrelationRegistry<u64>> = Arc::new(CorrelationRegistry::new(
            Arc::new(TokioDispatcher::current().unwrap()),
        ));

        let mut waiters = Vec::with_capacity(IDS * 16);
        for i in 0..IDS * 16 {
            let (continuation, outcome) = Continuation::channel();
            registry
                .register(
                    MatchId::new(format!("t{i}")),
                    continuation,
                    Duration::from_secs(30),
                )
                .unwrap();
            waiters.push(outcome);
        }

        let mut resolvers = Vec::new();
        for _ in 0..WORKERS {
            let registry = Arc::clone(&registry);
            resolvers.push(tokio::spawn(async move {
                let mut matched = 0u64;
                for i in 0..IDS * 16 {
                    if registry
                        .resolve(&MatchId::new(format!("t{i}")), i as u64)
                        .is_matched()
                    {
                        matched += 1;
                    }
                }
                matched
            }));
        }

        let mut matched = 0;
        for resolver in resolvers {
            matched += resolver.await.unwrap();
        }
        assert_eq!(matched, (IDS * 16) as u64);

        for (i, waiter) in waiters.into_iter().enumerate() {
            let response = waiter.await.unwrap().into_result().unwrap();
            assert_eq!(response, i as u64);
        }
        assert_eq!(registry.stats().orphaned, (IDS * 16 * (WORKERS - 1)) as u64);
    }
}
