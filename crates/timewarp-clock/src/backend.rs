//! Per-task time backend selection.
//!
//! Every thread resolves its time primitives through a [`TimeBackend`]:
//! either `Real` (host timers and wall-clock sleeps) or `Virtual` (forward
//! to a bound [`VirtualClock`]). Resolution order is thread-local binding,
//! then the process-wide default, then `Real`. Local context always wins,
//! so tests that inject their own clock stay parallel-safe regardless of
//! any global default.

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::thread;
use std::time::{Duration, Instant};

use timewarp_types::{ActorId, Payload, Timestamp, TimerRef};
use tracing::warn;

use crate::calendar::CancelOutcome;
use crate::clock::VirtualClock;
use crate::error::ClockError;
use crate::mailbox::{Envelope, Mailbox, MailboxSender};

/// Which time source a task's primitives route through.
#[derive(Debug, Clone)]
pub enum TimeBackend {
    /// Host OS timers and wall-clock time.
    Real,
    /// All primitives forward to this virtual clock.
    Virtual(VirtualClock),
}

thread_local! {
    static BINDING: RefCell<Option<TimeBackend>> = const { RefCell::new(None) };
}

static DEFAULT_BACKEND: RwLock<Option<TimeBackend>> = RwLock::new(None);

// ============================================================================
// Context management
// ============================================================================

/// Binds the current thread to a virtual clock. Overrides any default.
pub fn bind_virtual(clock: VirtualClock) {
    BINDING.with(|b| *b.borrow_mut() = Some(TimeBackend::Virtual(clock)));
}

/// Binds the current thread to real time, regardless of any default.
pub fn bind_real() {
    BINDING.with(|b| *b.borrow_mut() = Some(TimeBackend::Real));
}

/// Removes the current thread's binding; resolution falls back to the
/// process default.
pub fn unbind() {
    BINDING.with(|b| *b.borrow_mut() = None);
}

/// Installs a process-wide default clock for threads with no local binding.
pub fn set_default_virtual(clock: VirtualClock) {
    *write_default() = Some(TimeBackend::Virtual(clock));
}

/// Resets the process-wide default to real time.
pub fn use_real_time() {
    *write_default() = Some(TimeBackend::Real);
}

/// Resolves the backend for the current thread.
pub fn current() -> TimeBackend {
    if let Some(local) = BINDING.with(|b| b.borrow().clone()) {
        return local;
    }
    DEFAULT_BACKEND
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .clone()
        .unwrap_or(TimeBackend::Real)
}

/// The ambient virtual clock, or `NoClockBound` when the current task
/// resolves to real time.
pub fn ambient_clock() -> Result<VirtualClock, ClockError> {
    match current() {
        TimeBackend::Virtual(clock) => Ok(clock),
        TimeBackend::Real => Err(ClockError::NoClockBound),
    }
}

/// Spawns a named thread that inherits the caller's resolved backend.
pub fn spawn_bound<F, T>(name: &str, f: F) -> std::io::Result<thread::JoinHandle<T>>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    let inherited = current();
    thread::Builder::new().name(name.to_string()).spawn(move || {
        BINDING.with(|b| *b.borrow_mut() = Some(inherited));
        f()
    })
}

fn write_default() -> std::sync::RwLockWriteGuard<'static, Option<TimeBackend>> {
    DEFAULT_BACKEND
        .write()
        .unwrap_or_else(PoisonError::into_inner)
}

// ============================================================================
// Time primitives
// ============================================================================

/// Current time under the ambient backend: virtual `now`, or milliseconds
/// of wall clock since the process first asked.
pub fn now() -> Timestamp {
    match current() {
        TimeBackend::Virtual(clock) => clock.now(),
        TimeBackend::Real => Timestamp::new(real::elapsed_ms()),
    }
}

/// Schedules `payload` for delivery to `target` after `delay_ms` under the
/// ambient backend.
pub fn schedule_after(
    target: &MailboxSender,
    payload: Payload,
    delay_ms: u64,
) -> Result<TimerRef, ClockError> {
    match current() {
        TimeBackend::Virtual(clock) => {
            // Upsert so self-scheduling works without explicit registration.
            clock.register(target.id(), target.clone());
            clock.schedule_after(target.id(), payload, delay_ms)
        }
        TimeBackend::Real => Ok(real::schedule(target.clone(), payload, delay_ms)),
    }
}

/// Cancels a timer issued by the ambient backend.
pub fn cancel(timer: TimerRef) -> CancelOutcome {
    match current() {
        TimeBackend::Virtual(clock) => clock.cancel(timer),
        TimeBackend::Real => real::cancel(timer),
    }
}

/// Suspends the calling task for `delay_ms`.
///
/// Under the virtual backend this schedules a wakeup and blocks on it, so
/// it only returns once a driver advances the clock past the deadline.
/// Never call it from the driving thread itself.
pub fn sleep(delay_ms: u64) -> Result<(), ClockError> {
    match current() {
        TimeBackend::Real => {
            thread::sleep(Duration::from_millis(delay_ms));
            Ok(())
        }
        TimeBackend::Virtual(clock) => {
            let mailbox = Mailbox::with_gauge(ActorId::next(), clock.gauge());
            clock.register(mailbox.id(), mailbox.sender());
            let scheduled = clock.schedule_after(mailbox.id(), Payload::atom("wakeup"), delay_ms);
            if let Err(err) = scheduled {
                clock.unregister(mailbox.id());
                return Err(err);
            }

            // Suspension point: the wakeup is durably scheduled, so if we
            // are inside a delivery, acknowledge it now. A task blocked in
            // a receive can induce nothing further from that delivery, and
            // holding the ack would deadlock the very advance that must
            // fire our wakeup.
            let outer = crate::mailbox::release_delivery();
            let was_handling = outer.is_some();
            drop(outer);

            let wakeup = mailbox.recv();
            clock.unregister(mailbox.id());

            // Work after the sleep is induced by the wakeup event; keep
            // its token in hand so the barrier covers the continuation.
            if was_handling && let Envelope::Message { token, .. } = wakeup {
                crate::mailbox::hold_delivery(token);
            }
            Ok(())
        }
    }
}

// ============================================================================
// Real backend
// ============================================================================

mod real {
    use super::{
        Arc, AtomicBool, AtomicU64, CancelOutcome, Duration, Envelope, HashMap, Instant,
        MailboxSender, Mutex, Ordering, Payload, PoisonError, TimerRef, thread, warn,
    };
    use std::sync::OnceLock;

    struct RealTimer {
        deadline: Instant,
        cancelled: Arc<AtomicBool>,
    }

    static NEXT_TIMER: AtomicU64 = AtomicU64::new(1);
    static TIMERS: OnceLock<Mutex<HashMap<u64, RealTimer>>> = OnceLock::new();
    static EPOCH: OnceLock<Instant> = OnceLock::new();

    fn timers() -> &'static Mutex<HashMap<u64, RealTimer>> {
        TIMERS.get_or_init(|| Mutex::new(HashMap::new()))
    }

    pub(super) fn elapsed_ms() -> u64 {
        EPOCH.get_or_init(Instant::now).elapsed().as_millis() as u64
    }

    pub(super) fn schedule(target: MailboxSender, payload: Payload, delay_ms: u64) -> TimerRef {
        let id = NEXT_TIMER.fetch_add(1, Ordering::Relaxed);
        let cancelled = Arc::new(AtomicBool::new(false));
        let delay = Duration::from_millis(delay_ms);

        timers()
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                id,
                RealTimer {
                    deadline: Instant::now() + delay,
                    cancelled: cancelled.clone(),
                },
            );

        let spawned = thread::Builder::new()
            .name(format!("timewarp-real-timer-{id}"))
            .spawn(move || {
                thread::sleep(delay);
                let fired = !cancelled.load(Ordering::SeqCst);
                timers()
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .remove(&id);
                if fired && !target.deliver(Envelope::from_payload(None, payload)) {
                    warn!(timer = id, "real timer target gone; message dropped");
                }
            });
        if spawned.is_err() {
            warn!(timer = id, "failed to spawn real timer thread");
        }

        TimerRef::new(id)
    }

    pub(super) fn cancel(timer: TimerRef) -> CancelOutcome {
        let map = timers().lock().unwrap_or_else(PoisonError::into_inner);
        match map.get(&timer.as_u64()) {
            Some(entry) => {
                if entry.cancelled.swap(true, Ordering::SeqCst) {
                    CancelOutcome::AlreadyFired
                } else {
                    let left = entry.deadline.saturating_duration_since(Instant::now());
                    CancelOutcome::Cancelled {
                        time_left: left.as_millis() as u64,
                    }
                }
            }
            None => CancelOutcome::AlreadyFired,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
