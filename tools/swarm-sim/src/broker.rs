//! Loopback broker standing in for the system under test.
//!
//! Consumes requests from the outbound queue and answers each on the reply
//! queue after a random delay, or drops it.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use swarm_correlation::{
    ChannelReceiver, ChannelSender, MessageReceiver, MessageSender, MqMessage, ReplyConvention,
};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, warn};

/// Broker behaviour
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Probability in `[0, 1]` that a request is never answered
    pub drop_rate: f64,
    /// Upper bound of the uniform reply delay
    pub max_delay: Duration,
    /// Fixed RNG seed for reproducible runs
    pub seed: Option<u64>,
    /// Which request header replies echo as their correlation id
    pub convention: ReplyConvention,
}

#[derive(Debug, Default)]
struct BrokerCounters {
    received: AtomicU64,
    replied: AtomicU64,
    dropped: AtomicU64,
}

impl BrokerCounters {
    fn snapshot(&self) -> BrokerSnapshot {
        BrokerSnapshot {
            received: self.received.load(Ordering::Relaxed),
            replied: self.replied.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time broker counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BrokerSnapshot {
    pub received: u64,
    pub replied: u64,
    pub dropped: u64,
}

pub struct LoopbackBroker {
    config: BrokerConfig,
    counters: Arc<BrokerCounters>,
}

impl LoopbackBroker {
    pub fn new(config: BrokerConfig) -> Self {
        Self {
            config,
            counters: Arc::new(BrokerCounters::default()),
        }
    }

    /// Serve until `requests` is closed.
    pub fn spawn(
        self,
        requests: ChannelReceiver<MqMessage>,
        replies: ChannelSender<MqMessage>,
    ) -> BrokerHandle {
        let counters = Arc::clone(&self.counters);
        let task = tokio::spawn(self.run(requests, replies));
        BrokerHandle { task, counters }
    }

    async fn run(self, requests: ChannelReceiver<MqMessage>, replies: ChannelSender<MqMessage>) {
        let mut rng = match self.config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let drop_rate = self.config.drop_rate.clamp(0.0, 1.0);
        let convention = self.config.convention;
        let max_delay_us = u64::try_from(self.config.max_delay.as_micros()).unwrap_or(u64::MAX);
        let mut in_flight = JoinSet::new();

        loop {
            let request = match requests.receive().await {
                Ok(Some(request)) => request,
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "Broker receive failed");
                    break;
                }
            };
            self.counters.received.fetch_add(1, Ordering::Relaxed);

            if rng.gen_bool(drop_rate) {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                debug!(message_id = ?request.message_id, "Dropping request");
                continue;
            }

            let delay = Duration::from_micros(rng.gen_range(0..=max_delay_us));
            let mut reply = request.reply(request.body.clone(), convention);
            reply.mark_read_only();

            let replies = replies.clone();
            let counters = Arc::clone(&self.counters);
            in_flight.spawn(async move {
                tokio::time::sleep(delay).await;
                if replies.send(reply).await.is_ok() {
                    counters.replied.fetch_add(1, Ordering::Relaxed);
                }
            });

            // Reap finished replies so the set stays small.
            while in_flight.try_join_next().is_some() {}
        }

        while in_flight.join_next().await.is_some() {}
    }
}

/// Handle to a running broker
pub struct BrokerHandle {
    task: JoinHandle<()>,
    counters: Arc<BrokerCounters>,
}

impl BrokerHandle {
    pub fn snapshot(&self) -> BrokerSnapshot {
        self.counters.snapshot()
    }

    pub fn abort(&self) {
        self.task.abort();
    }

    /// Wait for the broker to drain after its request queue closed.
    pub async fn join(self) -> BrokerSnapshot {
        let Self { task, counters } = self;
        let _ = task.await;
        counters.snapshot()
    }
}
