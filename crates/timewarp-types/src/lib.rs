//! # timewarp-types: Core types for Timewarp
//!
//! This crate contains the value types shared across the Timewarp workspace:
//! - Temporal types ([`Timestamp`], [`TimerRef`])
//! - Actor identity ([`ActorId`])
//! - Message values ([`Payload`], [`DeliveryKind`])
//! - Trace records ([`TraceEvent`])
//! - Per-actor accounting ([`ActorStats`], [`ActorStatus`])
//!
//! Everything here is a plain value: no channels, no threads, no clocks.
//! The runtime crates (`timewarp-clock`, `timewarp-sim`) build on these.

use std::{
    collections::VecDeque,
    fmt::{self, Display},
    ops::Add,
    sync::atomic::{AtomicU64, Ordering},
};

use bytes::Bytes;
use serde::{Deserialize, Serialize};

// ============================================================================
// Temporal types
// ============================================================================

/// A point in virtual time, in non-negative integer milliseconds.
///
/// Timestamps are monotone non-decreasing per clock: a clock's `now` only
/// ever moves forward.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct Timestamp(u64);

impl Timestamp {
    /// The zero timestamp, the origin of every fresh clock.
    pub const ZERO: Timestamp = Timestamp(0);

    pub fn new(millis: u64) -> Self {
        Self(millis)
    }

    pub fn as_millis(self) -> u64 {
        self.0
    }

    /// Adds a delay, or `None` on overflow past the representable range.
    pub fn checked_add(self, delay_ms: u64) -> Option<Self> {
        self.0.checked_add(delay_ms).map(Self)
    }

    pub fn saturating_add(self, delay_ms: u64) -> Self {
        Self(self.0.saturating_add(delay_ms))
    }

    /// Milliseconds from `self` until `later`, zero if `later` is earlier.
    pub fn until(self, later: Timestamp) -> u64 {
        later.0.saturating_sub(self.0)
    }
}

impl Add<u64> for Timestamp {
    type Output = Timestamp;

    fn add(self, delay_ms: u64) -> Timestamp {
        Timestamp(self.0.saturating_add(delay_ms))
    }
}

impl From<u64> for Timestamp {
    fn from(millis: u64) -> Self {
        Self(millis)
    }
}

impl From<Timestamp> for u64 {
    fn from(ts: Timestamp) -> u64 {
        ts.0
    }
}

impl Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

/// Opaque handle to a scheduled timer, unique per clock.
///
/// Used for cancellation. Cancelling a fired or unknown ref is a no-op
/// reported as such, never an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TimerRef(u64);

impl TimerRef {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl Display for TimerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "timer#{}", self.0)
    }
}

// ============================================================================
// Actor identity
// ============================================================================

static NEXT_ACTOR_ID: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for an actor or wrapped server.
///
/// Ids are cheap `Copy` values; the simulation owns the `name -> id` and
/// `id -> mailbox` maps, and scheduled events store only ids. This keeps
/// the clock free of ownership cycles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ActorId(u64);

impl ActorId {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Allocates a fresh process-wide unique id.
    pub fn next() -> Self {
        Self(NEXT_ACTOR_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "actor#{}", self.0)
    }
}

// ============================================================================
// Message values
// ============================================================================

/// A message value exchanged between actors.
///
/// The set is closed so traces serialize cleanly and match rules can test
/// structural equality. `Call` and `Cast` wrap an inner message to request
/// call/cast delivery semantics; everything else delivers as a plain send.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Payload {
    /// A named signal, e.g. `tick` or `ping`.
    Atom(String),
    Int(i64),
    Text(String),
    Bytes(Bytes),
    List(Vec<Payload>),
    /// Deliver the inner message with call semantics.
    Call(Box<Payload>),
    /// Deliver the inner message with cast semantics.
    Cast(Box<Payload>),
}

impl Payload {
    pub fn atom(name: impl Into<String>) -> Self {
        Payload::Atom(name.into())
    }

    pub fn text(value: impl Into<String>) -> Self {
        Payload::Text(value.into())
    }

    pub fn call(inner: Payload) -> Self {
        Payload::Call(Box::new(inner))
    }

    pub fn cast(inner: Payload) -> Self {
        Payload::Cast(Box::new(inner))
    }

    /// The delivery tagging this payload requests.
    pub fn delivery_kind(&self) -> DeliveryKind {
        match self {
            Payload::Call(_) => DeliveryKind::Call,
            Payload::Cast(_) => DeliveryKind::Cast,
            _ => DeliveryKind::Send,
        }
    }

    /// Strips a `Call`/`Cast` wrapper, yielding the message to deliver.
    pub fn into_inner(self) -> Payload {
        match self {
            Payload::Call(inner) | Payload::Cast(inner) => *inner,
            other => other,
        }
    }

    /// True when this payload is the given atom.
    pub fn is_atom(&self, name: &str) -> bool {
        matches!(self, Payload::Atom(a) if a == name)
    }
}

/// How a message was delivered, recorded in traces and envelopes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeliveryKind {
    Send,
    Call,
    Cast,
}

impl Display for DeliveryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeliveryKind::Send => write!(f, "send"),
            DeliveryKind::Call => write!(f, "call"),
            DeliveryKind::Cast => write!(f, "cast"),
        }
    }
}

// ============================================================================
// Trace records
// ============================================================================

/// One recorded message flow, ordered by `(timestamp, arrival)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceEvent {
    pub timestamp: Timestamp,
    pub from: String,
    pub to: String,
    pub payload: Payload,
    pub kind: DeliveryKind,
}

// ============================================================================
// Per-actor accounting
// ============================================================================

/// Capacity of the sent/received message rings kept per actor.
pub const STATS_RING_CAPACITY: usize = 64;

/// Lifecycle status of an actor, surfaced in stats.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActorStatus {
    Alive,
    Stopped,
    /// The actor's handler raised; only this actor terminated.
    Crashed(String),
}

/// Message counters and bounded recent-message rings for one actor.
///
/// Counts are monotone over a run. The rings keep the most recent
/// [`STATS_RING_CAPACITY`] messages in each direction, evicting from the
/// front, so stats stay bounded regardless of run length.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActorStats {
    pub sent_count: u64,
    pub received_count: u64,
    sent_messages: VecDeque<Payload>,
    received_messages: VecDeque<Payload>,
    pub status: ActorStatus,
}

impl ActorStats {
    pub fn new() -> Self {
        Self {
            sent_count: 0,
            received_count: 0,
            sent_messages: VecDeque::new(),
            received_messages: VecDeque::new(),
            status: ActorStatus::Alive,
        }
    }

    pub fn record_sent(&mut self, payload: &Payload) {
        self.sent_count += 1;
        push_bounded(&mut self.sent_messages, payload.clone());
    }

    pub fn record_received(&mut self, payload: &Payload) {
        self.received_count += 1;
        push_bounded(&mut self.received_messages, payload.clone());
    }

    /// Most recent sent messages, oldest first.
    pub fn sent_messages(&self) -> impl Iterator<Item = &Payload> {
        self.sent_messages.iter()
    }

    /// Most recent received messages, oldest first.
    pub fn received_messages(&self) -> impl Iterator<Item = &Payload> {
        self.received_messages.iter()
    }
}

impl Default for ActorStats {
    fn default() -> Self {
        Self::new()
    }
}

fn push_bounded(ring: &mut VecDeque<Payload>, payload: Payload) {
    ring.push_back(payload);
    if ring.len() > STATS_RING_CAPACITY {
        ring.pop_front();
    }
}

// ============================================================================
// Tests
// ============================================================================
