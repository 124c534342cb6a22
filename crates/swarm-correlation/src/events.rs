//! # Correlation Events
//!
//! Every registry transition is reported to a [`CorrelationObserver`]. The
//! engine keeps no reporting state of its own beyond plain counters; reporting
//! pipelines subscribe here.

use std::time::Duration;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tracing::debug;

use crate::domain::{CancelReason, MatchId, VirtualUserId};

/// Default buffer of a [`BroadcastObserver`] before slow subscribers lag.
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// Why an inbound message or resolve attempt matched nothing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrphanReason {
    /// Never registered, or already resolved, expired or cancelled.
    Unknown,
    /// Arrived after the request's deadline.
    Late,
    /// The matcher could not extract a match id.
    Malformed(String),
}

impl OrphanReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Late => "late",
            Self::Malformed(_) => "malformed",
        }
    }
}

/// A registry transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CorrelationEvent {
    Registered {
        match_id: MatchId,
        owner: Option<VirtualUserId>,
        timeout: Duration,
    },
    DuplicateRejected {
        match_id: MatchId,
    },
    Matched {
        match_id: MatchId,
        elapsed: Duration,
    },
    Orphaned {
        match_id: Option<MatchId>,
        reason: OrphanReason,
    },
    Expired {
        match_id: MatchId,
        elapsed: Duration,
        /// How long after its deadline the timeout was delivered.
        lateness: Duration,
    },
    Cancelled {
        match_id: MatchId,
        reason: CancelReason,
        elapsed: Duration,
    },
}

impl CorrelationEvent {
    /// Stable label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Registered { .. } => "registered",
            Self::DuplicateRejected { .. } => "duplicate_rejected",
            Self::Matched { .. } => "matched",
            Self::Orphaned { .. } => "orphaned",
            Self::Expired { .. } => "expired",
            Self::Cancelled { .. } => "cancelled",
        }
    }
}

/// Receives registry transitions. Called inline; must not block.
pub trait CorrelationObserver: Send + Sync {
    fn on_event(&self, event: &CorrelationEvent);
}

/// Observer for when reporting is disabled.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpObserver;

impl CorrelationObserver for NoOpObserver {
    fn on_event(&self, _: &CorrelationEvent) {}
}

/// Fans events out to any number of async subscribers.
///
/// Uses `tokio::sync::broadcast`: a subscriber that falls more than
/// `capacity` events behind skips ahead and sees a lag error.
pub struct BroadcastObserver {
    sender: broadcast::Sender<CorrelationEvent>,
}

impl BroadcastObserver {
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_EVENT_CAPACITY)
    }

    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<CorrelationEvent> {
        self.sender.subscribe()
    }

    /// Subscription as a `Stream`.
    #[must_use]
    pub fn stream(&self) -> BroadcastStream<CorrelationEvent> {
        BroadcastStream::new(self.subscribe())
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for BroadcastObserver {
    fn default() -> Self {
        Self::new()
    }
}

impl CorrelationObserver for BroadcastObserver {
    fn on_event(&self, event: &CorrelationEvent) {
        if self.sender.send(event.clone()).is_err() {
            debug!(kind = event.kind(), "No event subscribers");
        }
    }
}

/// Forwards to several observers in order.
#[derive(Default)]
pub struct ObserverChain {
    observers: Vec<std::sync::Arc<dyn CorrelationObserver>>,
}

impl ObserverChain {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, observer: std::sync::Arc<dyn CorrelationObserver>) -> Self {
        self.observers.push(observer);
        self
    }
}

impl CorrelationObserver for ObserverChain {
    fn on_event(&self, event: &CorrelationEvent) {
        for observer in &self.observers {
            observer.on_event(event);
        }
    }
}
