//! Correlation Registry - the concurrent pending-request table.
//!
//! Maps match ids to suspended virtual users waiting for a reply.
//!
//! Flow:
//! 1. Sender prepares the outbound message and derives its `MatchId`
//! 2. Sender calls `register()` with a continuation and a timeout
//! 3. Sender hands the message to the transport
//! 4. A listener derives the `MatchId` of each inbound message and calls `resolve()`
//! 5. The sweeper calls `expire()` for requests nobody answered
//!
//! Every terminal transition is a single `DashMap::remove`/`remove_if` on the
//! entry's shard. Whichever of `resolve`, `expire` or `cancel` removes the entry
//! owns its continuation; every other caller finds the slot empty.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tracing::{debug, warn};

use crate::dispatcher::{Continuation, ContinuationDispatcher};
use crate::domain::{
    CancelReason, Clock, DeadlineEntry, DeadlineQueue, MatchId, Outcome, Registration,
    ResolutionResult, TokioClock, VirtualUserId,
};
use crate::error::{CorrelationError, CorrelationResult, MatcherError};
use crate::events::{CorrelationEvent, CorrelationObserver, NoOpObserver, OrphanReason};
use crate::metrics::{RegistryStats, StatsSnapshot};

/// Stale deadline entries tolerated per live entry before compaction.
const COMPACT_FACTOR: usize = 2;
const COMPACT_SLACK: usize = 1024;

/// A registered request waiting for its reply
struct PendingRequest<R> {
    continuation: Continuation<R>,
    registered_at: Instant,
    deadline: Instant,
    /// Distinguishes successive registrations of the same match id
    generation: u64,
    owner: Option<VirtualUserId>,
}

/// Concurrent pending-request table with a deadline index.
pub struct CorrelationRegistry<R> {
    pending: DashMap<MatchId, PendingRequest<R>>,
    /// Lock order: `deadlines` before any `pending` shard, never the reverse
    deadlines: Mutex<DeadlineQueue>,
    clock: Arc<dyn Clock>,
    dispatcher: Arc<dyn ContinuationDispatcher<R>>,
    observer: Arc<dyn CorrelationObserver>,
    stats: RegistryStats,
    next_generation: AtomicU64,
    /// Set once by `close`; read under the shard lock in `insert`
    closed: AtomicBool,
    /// Signalled when a registration becomes the earliest deadline
    wakeup: Notify,
}

impl<R: Send + 'static> CorrelationRegistry<R> {
    /// Registry on the tokio clock with no observer.
    pub fn new(dispatcher: Arc<dyn ContinuationDispatcher<R>>) -> Self {
        Self {
            pending: DashMap::new(),
            deadlines: Mutex::new(DeadlineQueue::new()),
            clock: Arc::new(TokioClock),
            dispatcher,
            observer: Arc::new(NoOpObserver),
            stats: RegistryStats::new(),
            next_generation: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            wakeup: Notify::new(),
        }
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn CorrelationObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Register a pending request expiring `timeout` from now.
    ///
    /// # Errors
    ///
    /// - `DuplicateCorrelation` if `match_id` is already pending. The existing
    ///   registration is untouched and `continuation` is dropped unresumed.
    /// - `InvalidTimeout` if the deadline overflows the clock.
    /// - `ShuttingDown` once [`close`](Self::close) has been called. The
    ///   continuation is dropped unresumed.
    pub fn register(
        &self,
        match_id: MatchId,
        continuation: Continuation<R>,
        timeout: Duration,
    ) -> CorrelationResult<Registration> {
        self.insert(match_id, continuation, timeout, None)
    }

    /// Register on behalf of a virtual user, so that [`cancel_owner`]
    /// can tear down its requests if its run is aborted.
    ///
    /// [`cancel_owner`]: Self::cancel_owner
    pub fn register_for(
        &self,
        owner: VirtualUserId,
        match_id: MatchId,
        continuation: Continuation<R>,
        timeout: Duration,
    ) -> CorrelationResult<Registration> {
        self.insert(match_id, continuation, timeout, Some(owner))
    }

    fn insert(
        &self,
        match_id: MatchId,
        continuation: Continuation<R>,
        timeout: Duration,
        owner: Option<VirtualUserId>,
    ) -> CorrelationResult<Registration> {
        let registered_at = self.clock.now();
        let deadline = registered_at
            .checked_add(timeout)
            .ok_or(CorrelationError::InvalidTimeout { timeout })?;
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);

        let rejection = match self.pending.entry(match_id.clone()) {
            Entry::Occupied(_) => Some(CorrelationError::DuplicateCorrelation {
                match_id: match_id.clone(),
            }),
            // Checked under the shard lock, so `close` either sees this entry
            // or this check sees `closed`.
            Entry::Vacant(_) if self.closed.load(Ordering::SeqCst) => {
                Some(CorrelationError::ShuttingDown)
            }
            Entry::Vacant(slot) => {
                slot.insert(PendingRequest {
                    continuation,
                    registered_at,
                    deadline,
                    generation,
                    owner,
                });
                None
            }
        };

        // Shard lock released; never held while taking the heap lock.
        if let Some(err) = rejection {
            if matches!(err, CorrelationError::DuplicateCorrelation { .. }) {
                self.stats.duplicates.fetch_add(1, Ordering::Relaxed);
                warn!(match_id = %match_id, "Rejected duplicate correlation");
                self.observer.on_event(&CorrelationEvent::DuplicateRejected {
                    match_id: match_id.clone(),
                });
            } else {
                debug!(match_id = %match_id, "Registry closed, registration refused");
            }
            return Err(err);
        }

        let earliest = self.deadlines.lock().push(DeadlineEntry {
            deadline,
            generation,
            match_id: match_id.clone(),
        });
        if earliest {
            self.wakeup.notify_one();
        }

        self.stats.registered.fetch_add(1, Ordering::Relaxed);
        debug!(
            match_id = %match_id,
            owner = ?owner,
            timeout_ms = timeout.as_millis(),
            "Registered pending request"
        );
        self.observer.on_event(&CorrelationEvent::Registered {
            match_id: match_id.clone(),
            owner,
            timeout,
        });

        Ok(Registration {
            match_id,
            registered_at,
            deadline,
        })
    }

    /// Hand a reply to the request waiting on `match_id`.
    ///
    /// Returns `Orphan` if nothing is pending under that id. A request found
    /// past its deadline (the sweeper has not reached it yet) is completed as
    /// a timeout, and the reply is reported as a late orphan.
    pub fn resolve(&self, match_id: &MatchId, response: R) -> ResolutionResult {
        let Some((match_id, pending)) = self.pending.remove(match_id) else {
            self.stats.orphaned.fetch_add(1, Ordering::Relaxed);
            debug!(match_id = %match_id, "Reply for unknown or completed request");
            self.observer.on_event(&CorrelationEvent::Orphaned {
                match_id: Some(match_id.clone()),
                reason: OrphanReason::Unknown,
            });
            return ResolutionResult::Orphan;
        };

        let now = self.clock.now();
        if pending.deadline <= now {
            self.stats.orphaned.fetch_add(1, Ordering::Relaxed);
            self.deliver_timeout(match_id.clone(), pending, now);
            self.observer.on_event(&CorrelationEvent::Orphaned {
                match_id: Some(match_id),
                reason: OrphanReason::Late,
            });
            return ResolutionResult::Orphan;
        }

        let elapsed = now.saturating_duration_since(pending.registered_at);
        self.stats.record_match(elapsed);
        debug!(
            match_id = %match_id,
            elapsed_ms = elapsed.as_millis(),
            "Matched pending request"
        );
        self.dispatcher
            .dispatch(pending.continuation, Outcome::Matched { response, elapsed });
        self.observer
            .on_event(&CorrelationEvent::Matched { match_id, elapsed });

        ResolutionResult::Matched
    }

    /// Time out every request whose deadline is at or before `now`.
    ///
    /// Returns the number of requests expired by this call.
    pub fn expire(&self, now: Instant) -> usize {
        let due = {
            let mut queue = self.deadlines.lock();
            let mut due = Vec::new();
            while let Some(entry) = queue.pop_due(now) {
                // Only the registration this entry was pushed for; a newer one
                // under the same id has its own entry.
                if let Some(removed) = self
                    .pending
                    .remove_if(&entry.match_id, |_, p| p.generation == entry.generation)
                {
                    due.push(removed);
                }
            }
            self.compact_locked(&mut queue);
            due
        };

        let expired = due.len();
        if expired > 0 {
            let delivered_at = self.clock.now();
            for (match_id, pending) in due {
                self.deliver_timeout(match_id, pending, delivered_at);
            }
        }
        expired
    }

    /// [`expire`](Self::expire) at the registry clock's current time.
    pub fn expire_due(&self) -> usize {
        self.expire(self.clock.now())
    }

    fn deliver_timeout(&self, match_id: MatchId, pending: PendingRequest<R>, now: Instant) {
        let elapsed = now.saturating_duration_since(pending.registered_at);
        let lateness = now.saturating_duration_since(pending.deadline);
        self.stats.record_expiry(lateness);
        debug!(
            match_id = %match_id,
            elapsed_ms = elapsed.as_millis(),
            lateness_us = lateness.as_micros(),
            "Pending request timed out"
        );
        self.dispatcher
            .dispatch(pending.continuation, Outcome::Timeout { elapsed });
        self.observer.on_event(&CorrelationEvent::Expired {
            match_id,
            elapsed,
            lateness,
        });
    }

    /// Cancel one pending request.
    ///
    /// Returns `false` if it had already reached a terminal outcome.
    pub fn cancel(&self, match_id: &MatchId, reason: CancelReason) -> bool {
        match self.pending.remove(match_id) {
            Some((match_id, pending)) => {
                self.deliver_cancel(match_id, pending, reason);
                true
            }
            None => false,
        }
    }

    /// Cancel every pending request registered by `owner`.
    pub fn cancel_owner(&self, owner: VirtualUserId, reason: CancelReason) -> usize {
        let keys: Vec<MatchId> = self
            .pending
            .iter()
            .filter(|entry| entry.owner == Some(owner))
            .map(|entry| entry.key().clone())
            .collect();

        let mut cancelled = 0;
        for key in keys {
            if let Some((match_id, pending)) =
                self.pending.remove_if(&key, |_, p| p.owner == Some(owner))
            {
                self.deliver_cancel(match_id, pending, reason.clone());
                cancelled += 1;
            }
        }

        if cancelled > 0 {
            debug!(owner = %owner, cancelled, reason = %reason, "Cancelled virtual user requests");
        }
        cancelled
    }

    /// Cancel everything still pending.
    pub fn cancel_all(&self, reason: CancelReason) -> usize {
        let keys: Vec<MatchId> = self.pending.iter().map(|entry| entry.key().clone()).collect();

        let mut cancelled = 0;
        for key in keys {
            if let Some((match_id, pending)) = self.pending.remove(&key) {
                self.deliver_cancel(match_id, pending, reason.clone());
                cancelled += 1;
            }
        }

        self.compact_locked(&mut self.deadlines.lock());
        if cancelled > 0 {
            debug!(cancelled, reason = %reason, "Cancelled all pending requests");
        }
        cancelled
    }

    /// Refuse all further registrations, then cancel everything still
    /// pending. Returns the number cancelled.
    ///
    /// A `register` racing with `close` either fails with `ShuttingDown` or
    /// lands in the table before the drain and is cancelled by it.
    pub fn close(&self, reason: CancelReason) -> usize {
        self.closed.store(true, Ordering::SeqCst);
        self.cancel_all(reason)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn deliver_cancel(&self, match_id: MatchId, pending: PendingRequest<R>, reason: CancelReason) {
        let elapsed = self
            .clock
            .now()
            .saturating_duration_since(pending.registered_at);
        self.stats.cancelled.fetch_add(1, Ordering::Relaxed);
        self.dispatcher.dispatch(
            pending.continuation,
            Outcome::Cancelled {
                reason: reason.clone(),
                elapsed,
            },
        );
        self.observer.on_event(&CorrelationEvent::Cancelled {
            match_id,
            reason,
            elapsed,
        });
    }

    /// Count an inbound message whose match id could not be extracted.
    pub fn record_malformed(&self, error: &MatcherError) {
        self.stats.orphaned.fetch_add(1, Ordering::Relaxed);
        self.stats.malformed.fetch_add(1, Ordering::Relaxed);
        warn!(error = %error, "Dropping uncorrelatable inbound message");
        self.observer.on_event(&CorrelationEvent::Orphaned {
            match_id: None,
            reason: OrphanReason::Malformed(error.to_string()),
        });
    }

    /// Drop deadline entries whose registration is gone, once they outnumber
    /// live entries by `COMPACT_FACTOR`.
    fn compact_locked(&self, queue: &mut DeadlineQueue) {
        if queue.len() <= COMPACT_FACTOR * self.pending.len() + COMPACT_SLACK {
            return;
        }
        let before = queue.len();
        queue.retain(|entry| {
            self.pending
                .get(&entry.match_id)
                .is_some_and(|p| p.generation == entry.generation)
        });
        debug!(
            before,
            after = queue.len(),
            "Compacted deadline index"
        );
    }
}

impl<R> CorrelationRegistry<R> {
    /// Earliest indexed deadline. May belong to an already-completed request.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.deadlines.lock().next_deadline()
    }

    /// Number of currently pending requests
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Check if a match id is pending
    pub fn is_pending(&self, match_id: &MatchId) -> bool {
        self.pending.contains_key(match_id)
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub(crate) fn wakeup(&self) -> &Notify {
        &self.wakeup
    }

    #[cfg(test)]
    pub(crate) fn deadline_index_len(&self) -> usize {
        self.deadlines.lock().len()
    }
}
