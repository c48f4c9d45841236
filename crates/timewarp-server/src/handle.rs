//! The server wrapper: spawning, the message loop, and the client surface.

use std::ops::ControlFlow;
use std::sync::{Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Sender, bounded};
use timewarp_clock::{
    Envelope, Mailbox, MailboxSender, TimeBackend, VirtualClock, backend,
};
use timewarp_types::{ActorId, DeliveryKind, Payload, TimerRef};
use tracing::{debug, warn};

use crate::error::{Result, ServerError};
use crate::server::{After, CallOutcome, Init, Next, Server};
use crate::timers;

// ============================================================================
// Options
// ============================================================================

/// Which time source the server loop binds before `init`.
#[derive(Debug, Clone, Default)]
pub enum TimeSelection {
    /// Inherit the caller's resolved backend (local binding, then the
    /// process default, then real time).
    #[default]
    Inherit,
    /// Bind this clock for the loop and everything it spawns.
    Virtual(VirtualClock),
    /// Bind real time regardless of any default.
    Real,
}

/// Start options for a wrapped server.
#[derive(Debug, Clone, Default)]
pub struct ServerOptions {
    name: Option<String>,
    time: TimeSelection,
}

impl ServerOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn virtual_clock(mut self, clock: VirtualClock) -> Self {
        self.time = TimeSelection::Virtual(clock);
        self
    }

    pub fn real_time(mut self) -> Self {
        self.time = TimeSelection::Real;
        self
    }
}

// ============================================================================
// Handle
// ============================================================================

/// Client handle to a running server loop.
pub struct ServerHandle {
    id: ActorId,
    name: String,
    sender: MailboxSender,
    join: Mutex<Option<JoinHandle<()>>>,
}

impl ServerHandle {
    /// Spawns `server` on its own loop thread and waits for `init` to
    /// complete. The loop binds its time backend before `init`, so timers
    /// scheduled during `init` already route correctly.
    pub fn start<S: Server>(
        server: S,
        init_arg: Payload,
        options: ServerOptions,
    ) -> Result<ServerHandle> {
        let id = ActorId::next();
        let chosen = match options.time {
            TimeSelection::Inherit => backend::current(),
            TimeSelection::Virtual(clock) => TimeBackend::Virtual(clock),
            TimeSelection::Real => TimeBackend::Real,
        };
        let clock = match &chosen {
            TimeBackend::Virtual(clock) => Some(clock.clone()),
            TimeBackend::Real => None,
        };

        let mailbox = match &clock {
            Some(clock) => Mailbox::with_gauge(id, clock.gauge()),
            None => Mailbox::new(id),
        };
        let sender = mailbox.sender();
        if let Some(clock) = &clock {
            clock.register(id, sender.clone());
        }

        let name = options.name.unwrap_or_else(|| format!("server-{id}"));
        let (ready_tx, ready_rx) = bounded::<std::result::Result<(), String>>(1);

        let loop_sender = sender.clone();
        let loop_clock = clock.clone();
        let loop_name = name.clone();
        let join = thread::Builder::new().name(name.clone()).spawn(move || {
            match &chosen {
                TimeBackend::Virtual(clock) => backend::bind_virtual(clock.clone()),
                TimeBackend::Real => backend::bind_real(),
            }
            timers::set_self_address(Some(loop_sender));
            run_loop(server, init_arg, &mailbox, &ready_tx, &loop_name);
            timers::set_self_address(None);
            if let Some(clock) = loop_clock {
                clock.unregister(id);
            }
        })?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(ServerHandle {
                id,
                name,
                sender,
                join: Mutex::new(Some(join)),
            }),
            Ok(Err(reason)) => {
                let _ = join.join();
                Err(ServerError::InitFailed(reason))
            }
            Err(_) => {
                let _ = join.join();
                Err(ServerError::InitFailed(
                    "server thread died during init".to_string(),
                ))
            }
        }
    }

    pub fn id(&self) -> ActorId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The mailbox address other components (and timers) deliver to.
    pub fn address(&self) -> MailboxSender {
        self.sender.clone()
    }

    /// Synchronous request/reply.
    ///
    /// The timeout runs on the real clock even under virtual time: the
    /// caller blocks outside the message loop and cannot take part in
    /// advancing the clock. Virtual-time-sensitive request/response should
    /// use `cast` plus a reply message instead.
    pub fn call(&self, request: Payload, timeout: Duration) -> Result<Payload> {
        let (reply_tx, reply_rx) = bounded(1);
        let delivered = self.sender.deliver(Envelope::call(request, reply_tx));
        if !delivered {
            return Err(ServerError::Stopped);
        }
        reply_rx.recv_timeout(timeout).map_err(|_| ServerError::CallTimeout)
    }

    /// Fire-and-forget request.
    pub fn cast(&self, request: Payload) -> Result<()> {
        let delivered = self.sender.deliver(Envelope::cast(request));
        if delivered { Ok(()) } else { Err(ServerError::Stopped) }
    }

    /// Asks the loop to exit after the messages already queued, then joins
    /// the loop thread. Idempotent.
    pub fn stop(&self) {
        let _ = self.sender.deliver(Envelope::shutdown());
        let handle = self
            .join
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }
}

impl std::fmt::Debug for ServerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerHandle")
            .field("id", &self.id)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Loop
// ============================================================================

fn run_loop<S: Server>(
    mut server: S,
    init_arg: Payload,
    mailbox: &Mailbox,
    ready_tx: &Sender<std::result::Result<(), String>>,
    name: &str,
) {
    let mut pending_timeout: Option<TimerRef> = None;

    let mut state = match server.init(init_arg) {
        Init::Ready(state) => {
            let _ = ready_tx.send(Ok(()));
            state
        }
        // Apply the after-action before reporting ready, so a timeout or
        // warmup scheduled from `init` is durably in place when `start`
        // returns.
        Init::ReadyWith(state, after) => {
            match apply_after(&mut server, state, after, &mut pending_timeout) {
                ControlFlow::Continue(state) => {
                    let _ = ready_tx.send(Ok(()));
                    state
                }
                ControlFlow::Break((reason, state)) => {
                    let _ = ready_tx.send(Ok(()));
                    finish(&mut server, &reason, &state, pending_timeout, name);
                    return;
                }
            }
        }
        Init::Stop(reason) => {
            let _ = ready_tx.send(Err(reason));
            return;
        }
    };
    debug!(server = name, "started");

    let (reason, final_state) = loop {
        let envelope = mailbox.recv();
        // Any arrival supersedes a pending idle timeout, including the
        // timeout message itself once it has fired.
        if let Some(timer) = pending_timeout.take() {
            let _ = backend::cancel(timer);
        }

        match envelope {
            Envelope::Shutdown { token } => {
                token.ack();
                break ("shutdown".to_string(), state);
            }
            Envelope::Message {
                payload,
                kind,
                reply,
                token,
                ..
            } => {
                // Park the token while user code runs; a virtual sleep in
                // a callback releases it early at its suspension point.
                timewarp_clock::hold_delivery(token);
                let step = dispatch(&mut server, payload, kind, reply, state, &mut pending_timeout);
                // Handling is complete, induced timers are scheduled: ack.
                if let Some(token) = timewarp_clock::release_delivery() {
                    token.ack();
                }
                match step {
                    ControlFlow::Continue(next) => state = next,
                    ControlFlow::Break(done) => break done,
                }
            }
        }
    };

    finish(&mut server, &reason, &final_state, pending_timeout, name);
}

fn finish<S: Server>(
    server: &mut S,
    reason: &str,
    state: &S::State,
    pending_timeout: Option<TimerRef>,
    name: &str,
) {
    if let Some(timer) = pending_timeout {
        let _ = backend::cancel(timer);
    }
    server.terminate(reason, state);
    debug!(server = name, reason, "stopped");
}

type Step<S> = ControlFlow<(String, S), S>;

fn dispatch<S: Server>(
    server: &mut S,
    payload: Payload,
    kind: DeliveryKind,
    reply: Option<Sender<Payload>>,
    state: S::State,
    pending_timeout: &mut Option<TimerRef>,
) -> Step<S::State> {
    match (kind, reply) {
        (DeliveryKind::Call, Some(reply_tx)) => {
            match server.handle_call(payload, state) {
                CallOutcome::Reply(value, state) => {
                    send_reply(&reply_tx, value);
                    ControlFlow::Continue(state)
                }
                CallOutcome::ReplyWith(value, state, after) => {
                    send_reply(&reply_tx, value);
                    apply_after(server, state, after, pending_timeout)
                }
                CallOutcome::NoReply(state) => ControlFlow::Continue(state),
                CallOutcome::NoReplyWith(state, after) => {
                    apply_after(server, state, after, pending_timeout)
                }
                CallOutcome::Stop {
                    reason,
                    reply,
                    state,
                } => {
                    if let Some(value) = reply {
                        send_reply(&reply_tx, value);
                    }
                    ControlFlow::Break((reason, state))
                }
            }
        }
        (DeliveryKind::Cast, _) => {
            let next = server.handle_cast(payload, state);
            step_next(server, next, pending_timeout)
        }
        // Timer fires and plain sends; also call-tagged payloads that
        // arrived without a reply channel (e.g. via the clock).
        _ => {
            let next = server.handle_info(payload, state);
            step_next(server, next, pending_timeout)
        }
    }
}

fn step_next<S: Server>(
    server: &mut S,
    next: Next<S::State>,
    pending_timeout: &mut Option<TimerRef>,
) -> Step<S::State> {
    match next {
        Next::Continue(state) => ControlFlow::Continue(state),
        Next::ContinueWith(state, after) => apply_after(server, state, after, pending_timeout),
        Next::Stop(reason, state) => ControlFlow::Break((reason, state)),
    }
}

/// Applies an [`After`], chaining `handle_continue` until it settles.
fn apply_after<S: Server>(
    server: &mut S,
    mut state: S::State,
    mut after: After,
    pending_timeout: &mut Option<TimerRef>,
) -> Step<S::State> {
    loop {
        match after {
            After::Timeout(delay_ms) => {
                match timers::schedule_self_after(Payload::atom("timeout"), delay_ms) {
                    Ok(timer) => *pending_timeout = Some(timer),
                    Err(err) => warn!(%err, "failed to schedule idle timeout"),
                }
                return ControlFlow::Continue(state);
            }
            After::Continue(arg) => match server.handle_continue(arg, state) {
                Next::Continue(next) => return ControlFlow::Continue(next),
                Next::ContinueWith(next, chained) => {
                    state = next;
                    after = chained;
                }
                Next::Stop(reason, next) => return ControlFlow::Break((reason, next)),
            },
        }
    }
}

fn send_reply(reply_tx: &Sender<Payload>, value: Payload) {
    if reply_tx.send(value).is_err() {
        // Caller gave up (timeout) before the reply was ready.
        debug!("reply dropped: caller no longer waiting");
    }
}
