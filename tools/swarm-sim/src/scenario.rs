//! Virtual users driving the engine.
//!
//! Each user sends its requests one at a time and waits for the outcome of
//! each before sending the next, the way a closed-loop load test behaves.

use bytes::Bytes;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use swarm_correlation::{
    Continuation, CorrelationEngine, MqMessage, Outcome, OutcomeKind, VirtualUserId,
};
use tokio::task::JoinSet;
use tracing::{debug, warn};

pub const REQUEST_QUEUE: &str = "swarm.requests";
pub const REPLY_QUEUE: &str = "swarm.replies";

/// How much load to generate
#[derive(Debug, Clone)]
pub struct LoadPlan {
    pub users: usize,
    pub requests_per_user: usize,
    /// Per-request timeout; the engine default when `None`
    pub timeout: Option<Duration>,
}

/// Outcomes seen by virtual users
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UserTally {
    pub matched: u64,
    pub timeouts: u64,
    pub cancelled: u64,
    pub send_errors: u64,
    /// Sum of matched reply latencies in microseconds
    pub latency_us: u64,
}

impl UserTally {
    fn record(&mut self, outcome: &Outcome<MqMessage>) {
        match outcome.kind() {
            OutcomeKind::Matched => {
                self.matched += 1;
                self.latency_us += u64::try_from(outcome.elapsed().as_micros()).unwrap_or(u64::MAX);
            }
            OutcomeKind::Timeout => self.timeouts += 1,
            OutcomeKind::Cancelled => self.cancelled += 1,
        }
    }

    fn merge(&mut self, other: &Self) {
        self.matched += other.matched;
        self.timeouts += other.timeouts;
        self.cancelled += other.cancelled;
        self.send_errors += other.send_errors;
        self.latency_us += other.latency_us;
    }

    /// Outcomes delivered, excluding requests that were never sent.
    pub fn completed(&self) -> u64 {
        self.matched + self.timeouts + self.cancelled
    }

    pub fn avg_latency(&self) -> Duration {
        match self.latency_us.checked_div(self.matched) {
            Some(us) => Duration::from_micros(us),
            None => Duration::ZERO,
        }
    }
}

/// Run every virtual user to completion and total their outcomes.
pub async fn run_load(engine: Arc<CorrelationEngine<MqMessage>>, plan: &LoadPlan) -> UserTally {
    let mut users = JoinSet::new();
    for user in 0..plan.users {
        let engine = Arc::clone(&engine);
        let (requests, timeout) = (plan.requests_per_user, plan.timeout);
        users.spawn(run_user(engine, VirtualUserId(user as u64), requests, timeout));
    }

    let mut total = UserTally::default();
    while let Some(result) = users.join_next().await {
        match result {
            Ok(tally) => total.merge(&tally),
            Err(e) => warn!(error = %e, "Virtual user task failed"),
        }
    }
    total
}

async fn run_user(
    engine: Arc<CorrelationEngine<MqMessage>>,
    user: VirtualUserId,
    requests: usize,
    timeout: Option<Duration>,
) -> UserTally {
    let mut tally = UserTally::default();

    for seq in 0..requests {
        let message = MqMessage::new(REQUEST_QUEUE, Bytes::from(format!("{user}:{seq}")))
            .with_reply_to(REPLY_QUEUE);
        let (continuation, outcome) = Continuation::channel();

        if let Err(e) = engine.send(message, continuation, timeout, Some(user)).await {
            debug!(user = %user, error = %e, "Send failed");
            tally.send_errors += 1;
            continue;
        }

        match outcome.await {
            Ok(outcome) => tally.record(&outcome),
            // Continuation dropped with the engine
            Err(_) => tally.cancelled += 1,
        }
    }

    debug!(user = %user, matched = tally.matched, timeouts = tally.timeouts, "Virtual user done");
    tally
}
