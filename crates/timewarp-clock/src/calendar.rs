//! The event calendar: an ordered multiset of scheduled deliveries.
//!
//! Entries are keyed lexicographically by `(fire_at, seq)`, where `seq` is
//! a monotonically assigned tie-breaker, so two events scheduled for the
//! same instant fire in insertion order. Cancellation only marks the entry
//! dead; the heap pops dead entries lazily.

use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashMap};

use serde::Serialize;
use timewarp_types::{ActorId, Payload, Timestamp, TimerRef};

/// One pending delivery.
#[derive(Debug, Clone)]
pub(crate) struct ScheduledEvent {
    pub fire_at: Timestamp,
    pub seq: u64,
    pub target: ActorId,
    pub payload: Payload,
    pub timer: TimerRef,
}

impl PartialEq for ScheduledEvent {
    fn eq(&self, other: &Self) -> bool {
        (self.fire_at, self.seq) == (other.fire_at, other.seq)
    }
}

impl Eq for ScheduledEvent {}

impl PartialOrd for ScheduledEvent {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledEvent {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.fire_at, self.seq).cmp(&(other.fire_at, other.seq))
    }
}

/// Outcome of a cancellation attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CancelOutcome {
    /// The event was still pending; it will not be delivered.
    Cancelled { time_left: u64 },
    /// The timer has already fired or was already cancelled.
    AlreadyFired,
    /// The ref was never issued by this clock.
    Unknown,
}

/// Min-heap of scheduled events with lazy removal of cancelled entries.
#[derive(Debug, Default)]
pub(crate) struct Calendar {
    heap: BinaryHeap<Reverse<ScheduledEvent>>,
    /// Fire time per still-live timer ref; absence marks a dead heap entry.
    live: HashMap<TimerRef, Timestamp>,
    next_seq: u64,
    next_timer: u64,
}

impl Calendar {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule(&mut self, fire_at: Timestamp, target: ActorId, payload: Payload) -> TimerRef {
        let timer = TimerRef::new(self.next_timer);
        self.next_timer += 1;
        let seq = self.next_seq;
        self.next_seq += 1;

        self.live.insert(timer, fire_at);
        self.heap.push(Reverse(ScheduledEvent {
            fire_at,
            seq,
            target,
            payload,
            timer,
        }));
        timer
    }

    pub fn cancel(&mut self, timer: TimerRef, now: Timestamp) -> CancelOutcome {
        match self.live.remove(&timer) {
            Some(fire_at) => CancelOutcome::Cancelled {
                time_left: now.until(fire_at),
            },
            None if timer.as_u64() < self.next_timer => CancelOutcome::AlreadyFired,
            None => CancelOutcome::Unknown,
        }
    }

    /// Pops the earliest live event with `fire_at <= limit`, pruning dead
    /// entries along the way.
    pub fn pop_due(&mut self, limit: Timestamp) -> Option<ScheduledEvent> {
        loop {
            let head = self.heap.peek()?;
            if head.0.fire_at > limit && self.live.contains_key(&head.0.timer) {
                return None;
            }
            let Reverse(event) = self.heap.pop()?;
            if self.live.remove(&event.timer).is_some() {
                if event.fire_at > limit {
                    // Live but not yet due: put it back untouched.
                    self.live.insert(event.timer, event.fire_at);
                    self.heap.push(Reverse(event));
                    return None;
                }
                return Some(event);
            }
            // Dead entry, keep pruning.
        }
    }

    /// Fire time of the earliest live event, pruning dead heap heads.
    pub fn next_fire_at(&mut self) -> Option<Timestamp> {
        loop {
            let head = self.heap.peek()?;
            if self.live.contains_key(&head.0.timer) {
                return Some(head.0.fire_at);
            }
            self.heap.pop();
        }
    }

    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    pub fn live_count_until(&self, limit: Timestamp) -> usize {
        self.live.values().filter(|at| **at <= limit).count()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }
}

// ============================================================================
// Tests
// ============================================================================
