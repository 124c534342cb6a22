//! Deadline-ordered index over pending requests.
//!
//! The identifier-keyed table is authoritative. This queue only answers
//! "which registration expires next". Entries are never removed eagerly when a
//! request is resolved or cancelled: a popped entry whose `generation` no
//! longer matches the table is simply discarded, and [`DeadlineQueue::retain`]
//! compacts the heap when stale entries pile up.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::time::Instant;

use crate::domain::MatchId;

/// One registration's slot in the deadline queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadlineEntry {
    pub deadline: Instant,
    pub generation: u64,
    pub match_id: MatchId,
}

impl PartialOrd for DeadlineEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DeadlineEntry {
    // Reversed: BinaryHeap is a max-heap, we want the earliest deadline on top.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.generation.cmp(&self.generation))
    }
}

/// Min-heap of deadlines.
#[derive(Debug, Default)]
pub struct DeadlineQueue {
    heap: BinaryHeap<DeadlineEntry>,
}

impl DeadlineQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an entry. Returns `true` if it became the earliest deadline.
    pub fn push(&mut self, entry: DeadlineEntry) -> bool {
        let earliest = self
            .heap
            .peek()
            .map_or(true, |top| entry.deadline < top.deadline);
        self.heap.push(entry);
        earliest
    }

    /// Pop the earliest entry if it is due at `now`.
    pub fn pop_due(&mut self, now: Instant) -> Option<DeadlineEntry> {
        if self.heap.peek()?.deadline <= now {
            self.heap.pop()
        } else {
            None
        }
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.heap.peek().map(|e| e.deadline)
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Drop every entry for which `keep` returns false.
    pub fn retain<F>(&mut self, keep: F)
    where
        F: FnMut(&DeadlineEntry) -> bool,
    {
        self.heap.retain(keep);
    }

    pub fn clear(&mut self) {
        self.heap.clear();
    }
}
