//! The `Server` callback contract.
//!
//! A [`Server`] implementation supplies the behavior; the wrapper in
//! [`crate::handle`] supplies the loop. State is owned: every callback
//! takes the state by value and hands back the next state inside its
//! outcome, so the loop never observes a half-updated server.

use timewarp_types::Payload;

/// A follow-up action attached to a callback outcome.
#[derive(Debug, Clone, PartialEq)]
pub enum After {
    /// Deliver an `Atom("timeout")` info message after this many virtual
    /// (or real, depending on the backend) milliseconds, unless another
    /// message arrives first.
    Timeout(u64),
    /// Immediately run `handle_continue` with this argument before
    /// receiving the next message.
    Continue(Payload),
}

/// Outcome of `init`.
#[derive(Debug)]
pub enum Init<S> {
    Ready(S),
    ReadyWith(S, After),
    /// Abort the start; `ServerHandle::start` returns `InitFailed`.
    Stop(String),
}

/// Outcome of `handle_call`.
#[derive(Debug)]
pub enum CallOutcome<S> {
    Reply(Payload, S),
    ReplyWith(Payload, S, After),
    /// Reply later (or never); the caller keeps waiting until its timeout.
    NoReply(S),
    NoReplyWith(S, After),
    Stop {
        reason: String,
        reply: Option<Payload>,
        state: S,
    },
}

/// Outcome of `handle_cast`, `handle_info`, and `handle_continue`.
#[derive(Debug)]
pub enum Next<S> {
    Continue(S),
    ContinueWith(S, After),
    Stop(String, S),
}

/// User callback module run by the server wrapper.
///
/// Every timer primitive invoked from inside a callback (via
/// [`crate::schedule_self_after`], [`crate::schedule_after`],
/// [`crate::sleep`]) dispatches through the ambient time backend, so the
/// same module runs unchanged under real or virtual time.
pub trait Server: Send + 'static {
    type State: Send + 'static;

    fn init(&mut self, arg: Payload) -> Init<Self::State>;

    /// Synchronous request/reply. Defaults to an `ok` reply.
    fn handle_call(&mut self, request: Payload, state: Self::State) -> CallOutcome<Self::State> {
        let _ = request;
        CallOutcome::Reply(Payload::atom("ok"), state)
    }

    /// Fire-and-forget request. Defaults to a no-op.
    fn handle_cast(&mut self, request: Payload, state: Self::State) -> Next<Self::State> {
        let _ = request;
        Next::Continue(state)
    }

    /// Out-of-band messages: timer fires, plain sends. Defaults to a no-op.
    fn handle_info(&mut self, message: Payload, state: Self::State) -> Next<Self::State> {
        let _ = message;
        Next::Continue(state)
    }

    /// Deferred work requested via [`After::Continue`]. Defaults to a no-op.
    fn handle_continue(&mut self, arg: Payload, state: Self::State) -> Next<Self::State> {
        let _ = arg;
        Next::Continue(state)
    }

    /// Called once when the loop exits, with the final state.
    fn terminate(&mut self, reason: &str, state: &Self::State) {
        let _ = (reason, state);
    }
}
