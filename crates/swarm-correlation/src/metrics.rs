//! In-process counters for the correlation registry.
//!
//! Always on and lock-free. Exporters (Prometheus, reports) should hang off
//! [`CorrelationObserver`](crate::events::CorrelationObserver) instead of
//! polling these.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Registry counters.
#[derive(Debug, Default)]
pub struct RegistryStats {
    pub registered: AtomicU64,
    pub duplicates: AtomicU64,
    pub matched: AtomicU64,
    /// Resolve attempts that found nothing, including late and malformed replies
    pub orphaned: AtomicU64,
    /// Subset of `orphaned` whose match id could not be extracted
    pub malformed: AtomicU64,
    pub expired: AtomicU64,
    pub cancelled: AtomicU64,
    /// Cumulative register-to-match latency in microseconds
    pub match_latency_us: AtomicU64,
    /// Worst observed gap between a deadline and its timeout delivery
    pub max_lateness_us: AtomicU64,
}

impl RegistryStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_match(&self, elapsed: Duration) {
        self.matched.fetch_add(1, Ordering::Relaxed);
        self.match_latency_us
            .fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_expiry(&self, lateness: Duration) {
        self.expired.fetch_add(1, Ordering::Relaxed);
        self.max_lateness_us
            .fetch_max(lateness.as_micros() as u64, Ordering::Relaxed);
    }

    /// Get current counters
    pub fn snapshot(&self) -> StatsSnapshot {
        let matched = self.matched.load(Ordering::Relaxed);
        let latency = self.match_latency_us.load(Ordering::Relaxed);
        StatsSnapshot {
            registered: self.registered.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            matched,
            orphaned: self.orphaned.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
            expired: self.expired.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
            avg_match_latency_us: if matched > 0 { latency / matched } else { 0 },
            max_lateness_us: self.max_lateness_us.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub registered: u64,
    pub duplicates: u64,
    pub matched: u64,
    pub orphaned: u64,
    pub malformed: u64,
    pub expired: u64,
    pub cancelled: u64,
    pub avg_match_latency_us: u64,
    pub max_lateness_us: u64,
}

impl StatsSnapshot {
    /// Requests that reached a terminal outcome.
    pub fn terminal(&self) -> u64 {
        self.matched + self.expired + self.cancelled
    }

    /// Registered requests still waiting, derived from the counters.
    pub fn outstanding(&self) -> u64 {
        self.registered.saturating_sub(self.terminal())
    }
}
