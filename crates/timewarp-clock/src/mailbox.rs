//! Actor mailboxes and the in-flight delivery gauge.
//!
//! A [`Mailbox`] is an ordered FIFO of [`Envelope`]s for one actor: any
//! number of writers, one reading loop. A mailbox wired to a clock's
//! [`DeliveryGauge`] participates in the quiescence barrier: every
//! enqueue increments the gauge, and the envelope carries an [`AckToken`]
//! that decrements it when dropped. A loop therefore acknowledges a
//! delivery by letting the token go out of scope *after* handling it.
//!
//! Senders hold only a weak reference to the queue: when the owning loop
//! drops its mailbox, the backlog (and every armed token in it) is freed
//! at once, however many sender clones are still around. A discarded
//! mailbox can therefore never wedge the barrier.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, PoisonError, Weak};
use std::time::{Duration, Instant};

use crossbeam_channel::Sender;
use timewarp_types::{ActorId, DeliveryKind, Payload};

// ============================================================================
// Delivery gauge
// ============================================================================

/// Counts deliveries that have been enqueued but not yet fully handled.
///
/// This is the quiescence barrier's bookkeeping: the clock refuses to fire
/// the next event until the gauge drains back to zero, so any rescheduling
/// induced by the previous event is durably in the calendar first.
#[derive(Debug, Clone, Default)]
pub struct DeliveryGauge {
    inner: Arc<GaugeInner>,
}

#[derive(Debug, Default)]
struct GaugeInner {
    in_flight: Mutex<u64>,
    drained: Condvar,
}

impl DeliveryGauge {
    pub fn new() -> Self {
        Self::default()
    }

    fn add(&self) {
        let mut count = lock(&self.inner.in_flight);
        *count += 1;
    }

    fn done(&self) {
        let mut count = lock(&self.inner.in_flight);
        debug_assert!(*count > 0, "gauge underflow");
        *count = count.saturating_sub(1);
        if *count == 0 {
            self.inner.drained.notify_all();
        }
    }

    pub fn is_idle(&self) -> bool {
        *lock(&self.inner.in_flight) == 0
    }

    /// Blocks until every enqueued delivery has been handled.
    pub fn wait_idle(&self) {
        let mut count = lock(&self.inner.in_flight);
        while *count > 0 {
            count = self
                .inner
                .drained
                .wait(count)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Acknowledgement travelling inside an envelope.
///
/// Armed against a gauge on delivery; releases it exactly once, on drop.
/// Handling loops keep the token alive until the message is fully handled
/// so the barrier covers induced work.
#[derive(Debug, Default)]
pub struct AckToken {
    gauge: Option<DeliveryGauge>,
}

impl AckToken {
    /// A token not wired to any gauge.
    pub fn idle() -> Self {
        Self::default()
    }

    fn arm(&mut self, gauge: DeliveryGauge) {
        debug_assert!(self.gauge.is_none(), "token armed twice");
        gauge.add();
        self.gauge = Some(gauge);
    }

    /// Explicit acknowledgement; equivalent to dropping the token.
    pub fn ack(self) {}
}

impl Drop for AckToken {
    fn drop(&mut self) {
        if let Some(gauge) = self.gauge.take() {
            gauge.done();
        }
    }
}

thread_local! {
    static IN_HAND: std::cell::RefCell<Option<AckToken>> =
        const { std::cell::RefCell::new(None) };
}

/// Parks the token of the delivery this thread is currently handling.
///
/// Handling loops park the token before running user code and release it
/// (acknowledging) once the callback returns. A blocking primitive that
/// suspends mid-callback (virtual `sleep`) releases the parked token
/// early, because a task blocked in a receive has, by definition,
/// finished inducing work from the current delivery.
pub fn hold_delivery(token: AckToken) {
    IN_HAND.with(|slot| {
        let previous = slot.borrow_mut().replace(token);
        drop(previous);
    });
}

/// Takes the parked token, if any. Dropping it acknowledges the delivery.
pub fn release_delivery() -> Option<AckToken> {
    IN_HAND.with(|slot| slot.borrow_mut().take())
}

// ============================================================================
// Envelope
// ============================================================================

/// One unit of mailbox traffic.
#[derive(Debug)]
pub enum Envelope {
    /// A delivered message. `reply` is present only for synchronous calls.
    Message {
        from: Option<ActorId>,
        payload: Payload,
        kind: DeliveryKind,
        reply: Option<Sender<Payload>>,
        token: AckToken,
    },
    /// Ask the owning loop to exit after the messages already queued.
    Shutdown { token: AckToken },
}

impl Envelope {
    /// Builds a plain message envelope, deriving the delivery kind from a
    /// `Call`/`Cast` wrapper and stripping it.
    pub fn from_payload(from: Option<ActorId>, payload: Payload) -> Self {
        let kind = payload.delivery_kind();
        Envelope::Message {
            from,
            payload: payload.into_inner(),
            kind,
            reply: None,
            token: AckToken::idle(),
        }
    }

    /// A synchronous call carrying a reply channel.
    pub fn call(payload: Payload, reply: Sender<Payload>) -> Self {
        Envelope::Message {
            from: None,
            payload,
            kind: DeliveryKind::Call,
            reply: Some(reply),
            token: AckToken::idle(),
        }
    }

    /// A fire-and-forget cast.
    pub fn cast(payload: Payload) -> Self {
        Envelope::Message {
            from: None,
            payload,
            kind: DeliveryKind::Cast,
            reply: None,
            token: AckToken::idle(),
        }
    }

    pub fn shutdown() -> Self {
        Envelope::Shutdown {
            token: AckToken::idle(),
        }
    }

    fn token_mut(&mut self) -> &mut AckToken {
        match self {
            Envelope::Message { token, .. } | Envelope::Shutdown { token } => token,
        }
    }
}

// ============================================================================
// Queue
// ============================================================================

#[derive(Debug, Default)]
struct Queue {
    items: Mutex<VecDeque<Envelope>>,
    available: Condvar,
}

impl Queue {
    fn push(&self, envelope: Envelope) {
        lock(&self.items).push_back(envelope);
        self.available.notify_one();
    }
}

// ============================================================================
// Mailbox
// ============================================================================

/// The receiving half of an actor's message queue.
pub struct Mailbox {
    id: ActorId,
    queue: Arc<Queue>,
    gauge: Option<DeliveryGauge>,
}

impl Mailbox {
    /// A bare mailbox that does not participate in any quiescence barrier.
    pub fn new(id: ActorId) -> Self {
        Self {
            id,
            queue: Arc::new(Queue::default()),
            gauge: None,
        }
    }

    /// A mailbox wired to a clock's delivery gauge.
    pub fn with_gauge(id: ActorId, gauge: DeliveryGauge) -> Self {
        Self {
            id,
            queue: Arc::new(Queue::default()),
            gauge: Some(gauge),
        }
    }

    pub fn id(&self) -> ActorId {
        self.id
    }

    pub fn sender(&self) -> MailboxSender {
        MailboxSender {
            id: self.id,
            queue: Arc::downgrade(&self.queue),
            gauge: self.gauge.clone(),
        }
    }

    /// Blocks until the next envelope arrives.
    pub fn recv(&self) -> Envelope {
        let mut items = lock(&self.queue.items);
        loop {
            if let Some(envelope) = items.pop_front() {
                return envelope;
            }
            items = self
                .queue
                .available
                .wait(items)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    pub fn try_recv(&self) -> Option<Envelope> {
        lock(&self.queue.items).pop_front()
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Option<Envelope> {
        let deadline = Instant::now() + timeout;
        let mut items = lock(&self.queue.items);
        loop {
            if let Some(envelope) = items.pop_front() {
                return Some(envelope);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return None;
            }
            let (guard, _) = self
                .queue
                .available
                .wait_timeout(items, remaining)
                .unwrap_or_else(PoisonError::into_inner);
            items = guard;
        }
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.queue.items).is_empty()
    }
}

impl std::fmt::Debug for Mailbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mailbox")
            .field("id", &self.id)
            .field("queued", &lock(&self.queue.items).len())
            .finish_non_exhaustive()
    }
}

/// A cloneable writing handle to a mailbox.
///
/// Holds the queue weakly: once the owning loop drops its [`Mailbox`],
/// delivery fails cleanly and any armed token is released by the dropped
/// envelope.
#[derive(Debug, Clone)]
pub struct MailboxSender {
    id: ActorId,
    queue: Weak<Queue>,
    gauge: Option<DeliveryGauge>,
}

impl MailboxSender {
    pub fn id(&self) -> ActorId {
        self.id
    }

    /// Enqueues an envelope, arming its ack token against the mailbox's
    /// gauge. Returns false when the receiving half is gone.
    pub fn deliver(&self, mut envelope: Envelope) -> bool {
        if let Some(gauge) = &self.gauge {
            envelope.token_mut().arm(gauge.clone());
        }
        match self.queue.upgrade() {
            Some(queue) => {
                queue.push(envelope);
                true
            }
            // Dropping the envelope here releases its token.
            None => false,
        }
    }

    /// Enqueues a plain message, tagging delivery from the payload wrapper.
    pub fn send_payload(&self, from: Option<ActorId>, payload: Payload) -> bool {
        self.deliver(Envelope::from_payload(from, payload))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mailbox_is_fifo() {
        let mailbox = Mailbox::new(ActorId::next());
        let sender = mailbox.sender();

        sender.send_payload(None, Payload::Int(1));
        sender.send_payload(None, Payload::Int(2));
        sender.send_payload(None, Payload::Int(3));

        for expected in 1..=3 {
            match mailbox.recv() {
                Envelope::Message { payload, .. } => assert_eq!(payload, Payload::Int(expected)),
                Envelope::Shutdown { .. } => panic!("unexpected shutdown"),
            }
        }
    }

    #[test]
    fn delivery_kind_derived_and_wrapper_stripped() {
        let mailbox = Mailbox::new(ActorId::next());
        mailbox
            .sender()
            .send_payload(None, Payload::call(Payload::atom("ping")));

        match mailbox.recv() {
            Envelope::Message { payload, kind, .. } => {
                assert_eq!(kind, DeliveryKind::Call);
                assert_eq!(payload, Payload::atom("ping"));
            }
            Envelope::Shutdown { .. } => panic!("unexpected shutdown"),
        }
    }

    #[test]
    fn recv_timeout_expires_when_idle() {
        let mailbox = Mailbox::new(ActorId::next());
        assert!(mailbox.recv_timeout(Duration::from_millis(20)).is_none());
    }

    #[test]
    fn gauge_tracks_envelope_lifetime() {
        let gauge = DeliveryGauge::new();
        let mailbox = Mailbox::with_gauge(ActorId::next(), gauge.clone());
        let sender = mailbox.sender();

        assert!(gauge.is_idle());
        sender.send_payload(None, Payload::atom("tick"));
        assert!(!gauge.is_idle());

        let envelope = mailbox.recv();
        assert!(!gauge.is_idle(), "held envelope keeps the barrier up");
        drop(envelope);
        assert!(gauge.is_idle());
    }

    #[test]
    fn gauge_wait_idle_unblocks_when_envelope_is_handled() {
        let gauge = DeliveryGauge::new();
        let mailbox = Mailbox::with_gauge(ActorId::next(), gauge.clone());
        mailbox.sender().send_payload(None, Payload::atom("tick"));

        let waiter_gauge = gauge.clone();
        let waiter = std::thread::spawn(move || waiter_gauge.wait_idle());

        let envelope = mailbox.recv();
        drop(envelope);
        waiter.join().expect("waiter thread");
        assert!(gauge.is_idle());
    }

    #[test]
    fn deliver_to_dropped_mailbox_fails_and_drains_gauge() {
        let gauge = DeliveryGauge::new();
        let sender = {
            let mailbox = Mailbox::with_gauge(ActorId::next(), gauge.clone());
            mailbox.sender()
        };

        assert!(!sender.send_payload(None, Payload::atom("tick")));
        assert!(gauge.is_idle());
    }

    #[test]
    fn unhandled_backlog_releases_the_gauge_on_mailbox_drop() {
        let gauge = DeliveryGauge::new();
        let mailbox = Mailbox::with_gauge(ActorId::next(), gauge.clone());
        let sender = mailbox.sender();

        for i in 0..4 {
            sender.send_payload(None, Payload::Int(i));
        }
        assert!(!gauge.is_idle());

        // The loop died without handling its backlog; the sender clone is
        // still alive but the barrier must not stay wedged.
        drop(mailbox);
        assert!(gauge.is_idle());
    }
}
