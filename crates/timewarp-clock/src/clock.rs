//! The virtual clock: total control over logical time.
//!
//! A [`VirtualClock`] owns an event calendar and the current virtual `now`.
//! Time moves only when a driver calls [`VirtualClock::advance`] (or
//! [`VirtualClock::advance_to_next`]); each due event is delivered to its
//! target's mailbox and the clock then blocks on the delivery gauge until
//! the event's causal consequences (further scheduling done by the handler
//! and any messages it fanned out) have been fully handled. That barrier
//! is what makes a periodic actor's reschedule visible in the calendar
//! before the next event fires.
//!
//! Exactly one thread should drive advancement; handlers running inside a
//! delivery must never call `advance` themselves (the barrier would wait on
//! its own caller).

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use timewarp_types::{ActorId, Payload, Timestamp, TimerRef};
use tracing::{trace, warn};

use crate::calendar::{Calendar, CancelOutcome};
use crate::error::ClockError;
use crate::mailbox::{DeliveryGauge, Envelope, MailboxSender};

struct ClockState {
    now: Timestamp,
    calendar: Calendar,
    targets: HashMap<ActorId, MailboxSender>,
}

/// A cheaply clonable handle to one virtual clock.
#[derive(Clone)]
pub struct VirtualClock {
    state: Arc<Mutex<ClockState>>,
    gauge: DeliveryGauge,
}

impl Default for VirtualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl VirtualClock {
    /// A fresh clock at time zero with an empty calendar.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(ClockState {
                now: Timestamp::ZERO,
                calendar: Calendar::new(),
                targets: HashMap::new(),
            })),
            gauge: DeliveryGauge::new(),
        }
    }

    /// Current virtual time.
    pub fn now(&self) -> Timestamp {
        self.lock().now
    }

    /// The delivery gauge mailboxes must wire into to participate in the
    /// quiescence barrier.
    pub fn gauge(&self) -> DeliveryGauge {
        self.gauge.clone()
    }

    /// Attaches a mailbox as the delivery target for `id`. Upserts.
    pub fn register(&self, id: ActorId, sender: MailboxSender) {
        self.lock().targets.insert(id, sender);
    }

    pub fn unregister(&self, id: ActorId) {
        self.lock().targets.remove(&id);
    }

    /// Inserts an event at `now + delay`. A zero delay schedules at the
    /// current instant and fires on the next advance.
    pub fn schedule_after(
        &self,
        target: ActorId,
        payload: Payload,
        delay_ms: u64,
    ) -> Result<TimerRef, ClockError> {
        let mut state = self.lock();
        let fire_at = state
            .now
            .checked_add(delay_ms)
            .ok_or(ClockError::InvalidDelay { delay_ms })?;
        let timer = state.calendar.schedule(fire_at, target, payload);
        trace!(%timer, %fire_at, %target, "scheduled");
        Ok(timer)
    }

    /// Marks the matching event cancelled in place. Idempotent; cancelling
    /// a fired or unknown ref reports so without error.
    pub fn cancel(&self, timer: TimerRef) -> CancelOutcome {
        let mut state = self.lock();
        let now = state.now;
        state.calendar.cancel(timer, now)
    }

    /// Moves `now` forward by `delta_ms`, delivering every pending event
    /// with `fire_at <= now + delta_ms` in `(fire_at, seq)` order. Returns
    /// only after the last delivered event's consequences have drained.
    pub fn advance(&self, delta_ms: u64) {
        let target = self.lock().now.saturating_add(delta_ms);
        self.deliver_until(target, true);
    }

    /// Advances to the earliest pending event and delivers everything due
    /// at that instant. Returns the delta advanced, or `None` when the
    /// calendar is empty.
    pub fn advance_to_next(&self) -> Option<u64> {
        let (from, to) = {
            let mut state = self.lock();
            let next = state.calendar.next_fire_at()?;
            (state.now, next)
        };
        self.deliver_until(to, true);
        Some(from.until(to))
    }

    /// Blocks until no event due at the current `now` remains undelivered
    /// and every in-flight delivery has been fully handled.
    pub fn wait_for_quiescence(&self) {
        let now = self.now();
        self.deliver_until(now, false);
    }

    /// Like [`VirtualClock::wait_for_quiescence`], but ignores events with
    /// `fire_at > limit`.
    pub fn wait_for_quiescence_until(&self, limit: Timestamp) {
        let frontier = limit.min(self.now());
        self.deliver_until(frontier, false);
    }

    /// Number of live (uncancelled, undelivered) calendar entries.
    pub fn scheduled_count(&self) -> usize {
        self.lock().calendar.live_count()
    }

    /// Live calendar entries with `fire_at <= limit`.
    pub fn scheduled_count_until(&self, limit: Timestamp) -> usize {
        self.lock().calendar.live_count_until(limit)
    }

    /// True when the calendar is empty and no delivery is in flight.
    pub fn is_quiescent(&self) -> bool {
        self.lock().calendar.is_empty() && self.gauge.is_idle()
    }

    /// Delivers all events due at or before `target`, one at a time, waiting
    /// out each event's cascade before popping the next. With `advance_now`
    /// the clock settles at `target` even when no event fires that late.
    fn deliver_until(&self, target: Timestamp, advance_now: bool) {
        loop {
            let due = {
                let mut state = self.lock();
                match state.calendar.pop_due(target) {
                    Some(event) => {
                        // Step `now` to the event so handlers scheduling
                        // relative to the current time land at
                        // `fire_at + delay`, not `target + delay`.
                        state.now = state.now.max(event.fire_at);
                        let sender = state.targets.get(&event.target).cloned();
                        Some((event, sender))
                    }
                    None => None,
                }
            };

            match due {
                Some((event, Some(sender))) => {
                    trace!(timer = %event.timer, fire_at = %event.fire_at, target = %event.target, "deliver");
                    if !sender.deliver(Envelope::from_payload(None, event.payload)) {
                        warn!(target = %event.target, "delivery target gone; event dropped");
                    }
                    self.gauge.wait_idle();
                }
                Some((event, None)) => {
                    warn!(target = %event.target, timer = %event.timer, "delivery to unknown target dropped");
                }
                None => {
                    // Let stragglers finish: a handler still running may
                    // schedule another due event.
                    self.gauge.wait_idle();
                    let mut state = self.lock();
                    if state.calendar.next_fire_at().is_none_or(|at| at > target) {
                        if advance_now {
                            state.now = state.now.max(target);
                        }
                        return;
                    }
                }
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, ClockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for VirtualClock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("VirtualClock")
            .field("now", &state.now)
            .field("scheduled", &state.calendar.live_count())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mailbox::Mailbox;
    use timewarp_types::DeliveryKind;

    fn registered_mailbox(clock: &VirtualClock) -> Mailbox {
        let mailbox = Mailbox::new(ActorId::next());
        clock.register(mailbox.id(), mailbox.sender());
        mailbox
    }

    fn drain_payloads(mailbox: &Mailbox) -> Vec<Payload> {
        let mut out = Vec::new();
        while let Some(Envelope::Message { payload, .. }) = mailbox.try_recv() {
            out.push(payload);
        }
        out
    }

    #[test]
    fn clock_starts_at_zero() {
        let clock = VirtualClock::new();
        assert_eq!(clock.now(), Timestamp::ZERO);
        assert_eq!(clock.scheduled_count(), 0);
        assert!(clock.is_quiescent());
    }

    #[test]
    fn advance_moves_now_and_delivers_due_events() {
        let clock = VirtualClock::new();
        let mailbox = registered_mailbox(&clock);

        clock
            .schedule_after(mailbox.id(), Payload::atom("tick"), 100)
            .unwrap();
        clock.advance(250);

        assert_eq!(clock.now(), Timestamp::new(250));
        assert_eq!(drain_payloads(&mailbox), vec![Payload::atom("tick")]);
    }

    #[test]
    fn advance_without_events_still_moves_now() {
        let clock = VirtualClock::new();
        clock.advance(500);
        assert_eq!(clock.now(), Timestamp::new(500));
    }

    #[test]
    fn events_deliver_in_fire_then_seq_order() {
        let clock = VirtualClock::new();
        let mailbox = registered_mailbox(&clock);

        clock.schedule_after(mailbox.id(), Payload::Int(2), 200).unwrap();
        clock.schedule_after(mailbox.id(), Payload::Int(1), 100).unwrap();
        // Same instant as the first: insertion order breaks the tie.
        clock.schedule_after(mailbox.id(), Payload::Int(3), 200).unwrap();

        clock.advance(300);
        assert_eq!(
            drain_payloads(&mailbox),
            vec![Payload::Int(1), Payload::Int(2), Payload::Int(3)]
        );
    }

    #[test]
    fn cancelled_timer_never_delivers() {
        // Timers at 100/200/300; cancel the middle one; advance to 350.
        let clock = VirtualClock::new();
        let mailbox = registered_mailbox(&clock);

        clock.schedule_after(mailbox.id(), Payload::Int(100), 100).unwrap();
        let middle = clock
            .schedule_after(mailbox.id(), Payload::Int(200), 200)
            .unwrap();
        clock.schedule_after(mailbox.id(), Payload::Int(300), 300).unwrap();

        assert_eq!(
            clock.cancel(middle),
            CancelOutcome::Cancelled { time_left: 200 }
        );
        clock.advance(350);

        assert_eq!(
            drain_payloads(&mailbox),
            vec![Payload::Int(100), Payload::Int(300)]
        );
    }

    #[test]
    fn cancel_after_fire_reports_already_fired() {
        let clock = VirtualClock::new();
        let mailbox = registered_mailbox(&clock);

        let timer = clock
            .schedule_after(mailbox.id(), Payload::atom("tick"), 50)
            .unwrap();
        clock.advance(100);

        assert_eq!(clock.cancel(timer), CancelOutcome::AlreadyFired);
        assert_eq!(clock.cancel(TimerRef::new(400)), CancelOutcome::Unknown);
    }

    #[test]
    fn zero_delay_fires_on_next_advance() {
        let clock = VirtualClock::new();
        let mailbox = registered_mailbox(&clock);

        clock.advance(10);
        clock
            .schedule_after(mailbox.id(), Payload::atom("now"), 0)
            .unwrap();
        assert!(drain_payloads(&mailbox).is_empty());

        clock.advance(0);
        assert_eq!(drain_payloads(&mailbox), vec![Payload::atom("now")]);
        assert_eq!(clock.now(), Timestamp::new(10));
    }

    #[test]
    fn advance_to_next_returns_delta() {
        let clock = VirtualClock::new();
        let mailbox = registered_mailbox(&clock);

        clock.schedule_after(mailbox.id(), Payload::Int(1), 70).unwrap();
        clock.schedule_after(mailbox.id(), Payload::Int(2), 400).unwrap();

        assert_eq!(clock.advance_to_next(), Some(70));
        assert_eq!(clock.now(), Timestamp::new(70));
        assert_eq!(drain_payloads(&mailbox), vec![Payload::Int(1)]);

        assert_eq!(clock.advance_to_next(), Some(330));
        assert_eq!(clock.advance_to_next(), None);
    }

    #[test]
    fn delivery_to_unknown_target_is_dropped() {
        let clock = VirtualClock::new();
        clock
            .schedule_after(ActorId::next(), Payload::atom("lost"), 10)
            .unwrap();
        // Must not panic or stall.
        clock.advance(50);
        assert_eq!(clock.scheduled_count(), 0);
    }

    #[test]
    fn overflowing_delay_is_rejected() {
        let clock = VirtualClock::new();
        clock.advance(10);
        let err = clock
            .schedule_after(ActorId::next(), Payload::atom("x"), u64::MAX)
            .unwrap_err();
        assert_eq!(err, ClockError::InvalidDelay { delay_ms: u64::MAX });
    }

    #[test]
    fn call_and_cast_wrappers_tag_envelopes() {
        let clock = VirtualClock::new();
        let mailbox = registered_mailbox(&clock);

        clock
            .schedule_after(mailbox.id(), Payload::call(Payload::atom("ping")), 10)
            .unwrap();
        clock.advance(10);

        match mailbox.try_recv() {
            Some(Envelope::Message { kind, payload, .. }) => {
                assert_eq!(kind, DeliveryKind::Call);
                assert_eq!(payload, Payload::atom("ping"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    /// A handler that reschedules during delivery must have its new event
    /// visible before the next advance pops anything later.
    #[test]
    fn reschedule_during_delivery_is_not_missed() {
        let clock = VirtualClock::new();
        let gauge = clock.gauge();
        let mailbox = Mailbox::with_gauge(ActorId::next(), gauge);
        clock.register(mailbox.id(), mailbox.sender());
        let id = mailbox.id();

        clock.schedule_after(id, Payload::atom("tick"), 100).unwrap();

        let loop_clock = clock.clone();
        let handler = std::thread::spawn(move || {
            let mut ticks = 0u32;
            loop {
                match mailbox.recv() {
                    Envelope::Message { payload, token, .. } if payload.is_atom("tick") => {
                        ticks += 1;
                        if ticks < 5 {
                            loop_clock
                                .schedule_after(id, Payload::atom("tick"), 100)
                                .unwrap();
                        }
                        // Reschedule is in the calendar; now acknowledge.
                        token.ack();
                    }
                    Envelope::Message { .. } => {}
                    Envelope::Shutdown { .. } => return ticks,
                }
            }
        });

        clock.advance(500);
        assert_eq!(clock.now(), Timestamp::new(500));

        // All five ticks happened within one advance thanks to the barrier.
        let sender = {
            let state = clock.lock();
            state.targets.get(&id).cloned().expect("registered")
        };
        sender.deliver(Envelope::shutdown());
        assert_eq!(handler.join().expect("handler thread"), 5);
    }

    #[test]
    fn wait_for_quiescence_until_ignores_later_events() {
        let clock = VirtualClock::new();
        let mailbox = registered_mailbox(&clock);

        clock.advance(100);
        clock.schedule_after(mailbox.id(), Payload::Int(1), 0).unwrap();
        clock.schedule_after(mailbox.id(), Payload::Int(2), 500).unwrap();

        // Only the already-due event is drained; the future one stays put
        // and `now` does not move.
        clock.wait_for_quiescence_until(Timestamp::new(100));
        assert_eq!(drain_payloads(&mailbox), vec![Payload::Int(1)]);
        assert_eq!(clock.now(), Timestamp::new(100));
        assert_eq!(clock.scheduled_count(), 1);
    }

    #[test]
    fn scheduled_count_until_honors_limit() {
        let clock = VirtualClock::new();
        let mailbox = registered_mailbox(&clock);

        clock.schedule_after(mailbox.id(), Payload::Int(1), 100).unwrap();
        clock.schedule_after(mailbox.id(), Payload::Int(2), 200).unwrap();
        clock.schedule_after(mailbox.id(), Payload::Int(3), 900).unwrap();

        assert_eq!(clock.scheduled_count(), 3);
        assert_eq!(clock.scheduled_count_until(Timestamp::new(250)), 2);
    }
}
