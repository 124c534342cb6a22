//! # Integration Test Flows
//!
//! Virtual users → engine → loopback broker → listeners → registry → users.
//!
//! ## Flows Tested
//!
//! 1. **Lossless**: every request matched, counters agree across layers
//! 2. **Slow replies**: replies later than the timeout become orphans
//! 3. **Lossy**: dropped requests time out, nothing leaks
//! 4. **Aborted user**: `cancel_owner` tears down one user's requests only

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use futures::StreamExt;
    use swarm_correlation::{
        channel, BroadcastObserver, CancelReason, Continuation, CorrelationConfig,
        CorrelationEngine, CorrelationEvent, MatchStrategy, MqMessage, ObserverChain, Outcome,
        SweepMode, SweeperConfig, VirtualUserId,
    };
    use swarm_sim::broker::{BrokerConfig, BrokerHandle, LoopbackBroker};
    use swarm_sim::scenario::{run_load, LoadPlan, REPLY_QUEUE, REQUEST_QUEUE};
    use swarm_telemetry::PrometheusObserver;

    // =============================================================================
    // TEST FIXTURES
    // =============================================================================

    struct Harness {
        engine: Arc<CorrelationEngine<MqMessage>>,
        broker: BrokerHandle,
        events: Arc<BroadcastObserver>,
    }

    fn harness(strategy: MatchStrategy, drop_rate: f64, max_delay: Duration) -> Harness {
        let (outbound, requests) = channel::<MqMessage>(1024);
        let (replies, inbound) = channel::<MqMessage>(1024);
        let broker = LoopbackBroker::new(BrokerConfig {
            drop_rate,
            max_delay,
            seed: Some(42),
            convention: strategy.reply_convention(),
        })
        .spawn(requests, replies);

        let events = Arc::new(BroadcastObserver::with_capacity(65_536));
        let observer = ObserverChain::new()
            .with(events.clone())
            .with(Arc::new(PrometheusObserver::new().unwrap()));

        let engine = Arc::new(
            CorrelationEngine::builder(Arc::new(outbound))
                .config(CorrelationConfig {
                    default_timeout: Duration::from_secs(5),
                    listener_count: 4,
                    match_strategy: strategy,
                    sweeper: SweeperConfig {
                        mode: SweepMode::Adaptive,
                        max_lateness: Duration::from_millis(10),
                        idle_interval: Duration::from_millis(200),
                    },
                })
                .observer(Arc::new(observer))
                .build()
                .unwrap(),
        );
        engine.spawn_listeners(Arc::new(inbound));

        Harness {
            engine,
            broker,
            events,
        }
    }

    // =============================================================================
    // INTEGRATION TESTS
    // =============================================================================

    #[tokio::test]
    async fn test_lossless_flow_all_strategies() {
        for strategy in [
            MatchStrategy::MessageId,
            MatchStrategy::CorrelationId,
            MatchStrategy::Property {
                name: "swarm_token".into(),
            },
        ] {
            let h = harness(strategy.clone(), 0.0, Duration::from_millis(2));
            let plan = LoadPlan {
                users: 10,
                requests_per_user: 20,
                timeout: None,
            };

            let tally = run_load(Arc::clone(&h.engine), &plan).await;
            assert_eq!(tally.matched, 200, "strategy {strategy:?}");

            let stats = h.engine.stats();
            assert_eq!(stats.registered, 200);
            assert_eq!(stats.matched, 200);
            assert_eq!(stats.orphaned, 0);
            assert_eq!(stats.outstanding(), 0);
            assert_eq!(h.broker.snapshot().received, 200);

            h.engine.shutdown().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_replies_become_orphans() {
        let h = harness(MatchStrategy::MessageId, 0.0, Duration::from_millis(50));
        let plan = LoadPlan {
            users: 5,
            requests_per_user: 10,
            timeout: Some(Duration::from_millis(20)),
        };

        let tally = run_load(Arc::clone(&h.engine), &plan).await;
        assert_eq!(tally.completed(), 50);
        assert!(tally.timeouts > 0, "some replies must miss a 20ms deadline");

        // Let every late reply reach a listener.
        tokio::time::sleep(Duration::from_millis(200)).await;

        let stats = h.engine.stats();
        assert_eq!(stats.matched, tally.matched);
        assert_eq!(stats.expired, tally.timeouts);
        assert_eq!(stats.orphaned, tally.timeouts);
        assert_eq!(h.engine.registry().pending_count(), 0);

        h.engine.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_lossy_flow_times_out_and_drains() {
        let h = harness(MatchStrategy::CorrelationId, 0.5, Duration::from_millis(5));
        let plan = LoadPlan {
            users: 4,
            requests_per_user: 25,
            timeout: Some(Duration::from_millis(100)),
        };

        let tally = run_load(Arc::clone(&h.engine), &plan).await;
        let broker = h.broker.snapshot();

        assert_eq!(tally.completed(), 100);
        assert_eq!(tally.timeouts, broker.dropped);
        assert_eq!(tally.matched, broker.replied);
        assert!(h.engine.stats().max_lateness_us <= 10_000);
        assert_eq!(h.engine.registry().pending_count(), 0);

        h.engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_cancel_owner_only_affects_that_user() {
        // Broker drops everything, so requests stay pending until cancelled.
        let h = harness(MatchStrategy::MessageId, 1.0, Duration::ZERO);
        let mut events = h.events.stream();

        let mut receivers = Vec::new();
        for user in [VirtualUserId(1), VirtualUserId(1), VirtualUserId(2)] {
            let (continuation, outcome) = Continuation::channel();
            h.engine
                .send(
                    MqMessage::new(REQUEST_QUEUE, "x").with_reply_to(REPLY_QUEUE),
                    continuation,
                    Some(Duration::from_secs(60)),
                    Some(user),
                )
                .await
                .unwrap();
            receivers.push((user, outcome));
        }

        let cancelled = h
            .engine
            .registry()
            .cancel_owner(VirtualUserId(1), CancelReason::UserAborted);
        assert_eq!(cancelled, 2);
        assert_eq!(h.engine.registry().pending_count(), 1);

        let (_, still_waiting) = receivers.pop().unwrap();
        for (user, outcome) in receivers {
            assert_eq!(user, VirtualUserId(1));
            assert!(matches!(
                outcome.await.unwrap(),
                Outcome::Cancelled {
                    reason: CancelReason::UserAborted,
                    ..
                }
            ));
        }

        assert_eq!(h.engine.shutdown().await, 1);
        assert!(matches!(
            still_waiting.await.unwrap(),
            Outcome::Cancelled {
                reason: CancelReason::Shutdown,
                ..
            }
        ));

        // Three registrations, three cancellations
        let mut registered = 0;
        let mut cancelled_events = 0;
        while registered + cancelled_events < 6 {
            match events.next().await {
                Some(Ok(CorrelationEvent::Registered { .. })) => registered += 1,
                Some(Ok(CorrelationEvent::Cancelled { .. })) => cancelled_events += 1,
                Some(_) => {}
                None => break,
            }
        }
        assert_eq!((registered, cancelled_events), (3, 3));
    }
}
