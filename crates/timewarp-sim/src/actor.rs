//! The synthetic actor runtime.
//!
//! Each simulated actor runs a [`Definition`] on its own thread: ticks
//! arrive as internal marker events from the clock, everything else is
//! treated as a received message and runs through the match rules and the
//! receive callback. A handler panic terminates only that actor and is
//! surfaced in its stats as a crashed status.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::thread::JoinHandle;

use timewarp_clock::{Envelope, Mailbox, VirtualClock, backend};
use timewarp_types::{ActorId, ActorStatus, DeliveryKind, Payload};
use tracing::{debug, warn};

use crate::definition::{Definition, MatchAction, ReceiveOutcome};
use crate::error::Result;
use crate::pattern::SendPattern;
use crate::registry::Router;
use crate::stats::SharedStats;
use crate::trace::TraceLog;

/// Internal marker driving send-pattern ticks; never shown to user code.
pub(crate) const TICK_MARKER: &str = "timewarp.internal.tick";

/// Everything one actor loop needs, shared by value.
pub(crate) struct ActorContext {
    pub id: ActorId,
    pub name: String,
    pub definition: Arc<Definition>,
    pub clock: VirtualClock,
    pub router: Arc<Router>,
    pub stats: SharedStats,
    pub trace: TraceLog,
}

impl ActorContext {
    fn set_status(&self, status: ActorStatus) {
        let mut stats = self
            .stats
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        // A crash is final; shutdown must not mask it.
        if !matches!(stats.status, ActorStatus::Crashed(_)) {
            stats.status = status;
        }
    }
}

/// Puts the actor's first event into the calendar.
///
/// Runs on the driver thread before the actor thread spawns, so the first
/// tick is durably scheduled before anyone can advance the clock.
pub(crate) fn schedule_first_event(ctx: &ActorContext) -> Result<()> {
    let pattern = &ctx.definition.pattern;
    match pattern {
        SendPattern::None => {}
        SendPattern::SelfMessage { delay_ms, message } => {
            ctx.clock
                .schedule_after(ctx.id, message.clone(), *delay_ms)?;
        }
        _ => {
            if let Some(interval) = pattern.interval_ms() {
                // First tick at t0 + interval, by convention.
                ctx.clock
                    .schedule_after(ctx.id, Payload::atom(TICK_MARKER), interval)?;
            }
        }
    }
    Ok(())
}

/// Spawns the actor's loop thread.
pub(crate) fn spawn(ctx: ActorContext, mailbox: Mailbox) -> std::io::Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name(format!("sim-actor-{}", ctx.name))
        .spawn(move || run(&ctx, &mailbox))
}

fn run(ctx: &ActorContext, mailbox: &Mailbox) {
    backend::bind_virtual(ctx.clock.clone());
    debug!(actor = %ctx.name, "actor started");

    let mut state = ctx.definition.initial_state.clone();
    loop {
        match mailbox.recv() {
            Envelope::Shutdown { token } => {
                ctx.set_status(ActorStatus::Stopped);
                token.ack();
                break;
            }
            Envelope::Message {
                from,
                payload,
                token,
                ..
            } => {
                // Park the token while the handler runs; a virtual sleep
                // inside the callback releases it at its suspension point.
                timewarp_clock::hold_delivery(token);
                let current = std::mem::replace(&mut state, Payload::atom("idle"));
                let handled =
                    catch_unwind(AssertUnwindSafe(|| handle(ctx, from, &payload, current)));
                if let Some(token) = timewarp_clock::release_delivery() {
                    token.ack();
                }
                match handled {
                    Ok(next) => state = next,
                    Err(panic) => {
                        let reason = panic_reason(panic.as_ref());
                        warn!(actor = %ctx.name, %reason, "actor crashed; terminating this actor only");
                        ctx.set_status(ActorStatus::Crashed(reason));
                        break;
                    }
                }
            }
        }
    }

    ctx.clock.unregister(ctx.id);
    debug!(actor = %ctx.name, "actor exited");
}

fn handle(ctx: &ActorContext, from: Option<ActorId>, payload: &Payload, state: Payload) -> Payload {
    if payload.is_atom(TICK_MARKER) {
        on_tick(ctx, state)
    } else {
        on_message(ctx, from, payload, state)
    }
}

/// One firing of the send pattern: fan out, then reschedule.
fn on_tick(ctx: &ActorContext, state: Payload) -> Payload {
    let definition = &ctx.definition;
    for message in definition.pattern.messages() {
        for target in &definition.targets {
            emit(ctx, target, message.clone());
        }
    }

    if definition.pattern.is_recurring()
        && let Some(interval) = definition.pattern.interval_ms()
        && let Err(err) = ctx
            .clock
            .schedule_after(ctx.id, Payload::atom(TICK_MARKER), interval)
    {
        warn!(actor = %ctx.name, %err, "failed to reschedule tick");
    }
    state
}

fn on_message(
    ctx: &ActorContext,
    from: Option<ActorId>,
    payload: &Payload,
    state: Payload,
) -> Payload {
    {
        let mut stats = ctx
            .stats
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        stats.record_received(payload);
    }

    // Match rules run first; the first hit consumes the message.
    if let Some(action) = ctx.definition.match_for(payload) {
        match action {
            MatchAction::Reply(value) => reply_to(ctx, from, value.clone()),
            MatchAction::Ignore => {}
        }
        return state;
    }

    let Some(on_receive) = &ctx.definition.on_receive else {
        return state;
    };
    match on_receive(payload, state) {
        ReceiveOutcome::Ok(next) => next,
        ReceiveOutcome::Send { messages, state } => {
            for (target, message) in messages {
                emit(ctx, &target, message);
            }
            state
        }
        ReceiveOutcome::SendAfter {
            delay_ms,
            messages,
            state,
        } => {
            for (target, message) in messages {
                emit_after(ctx, &target, message, delay_ms);
            }
            state
        }
        ReceiveOutcome::Reply { reply, state } => {
            reply_to(ctx, from, reply);
            state
        }
    }
}

/// Sends one message now: stats, trace, mailbox, in that order.
fn emit(ctx: &ActorContext, target: &str, payload: Payload) {
    let kind = payload.delivery_kind();
    let inner = payload.clone().into_inner();
    record_sent(ctx, &inner);

    match ctx.router.sender_for(target) {
        Some(sender) => {
            ctx.trace
                .record(ctx.clock.now(), &ctx.name, target, &inner, kind);
            if !sender.send_payload(Some(ctx.id), payload) {
                warn!(actor = %ctx.name, target, "target mailbox gone; message dropped");
            }
        }
        None => {
            warn!(actor = %ctx.name, target, "send to unknown actor dropped");
        }
    }
}

/// Schedules one message for later delivery via the clock.
fn emit_after(ctx: &ActorContext, target: &str, payload: Payload, delay_ms: u64) {
    let kind = payload.delivery_kind();
    let inner = payload.clone().into_inner();
    record_sent(ctx, &inner);

    match ctx.router.sender_for(target) {
        Some(sender) => {
            ctx.trace
                .record(ctx.clock.now(), &ctx.name, target, &inner, kind);
            if let Err(err) = ctx.clock.schedule_after(sender.id(), payload, delay_ms) {
                warn!(actor = %ctx.name, target, %err, "failed to schedule delayed send");
            }
        }
        None => {
            warn!(actor = %ctx.name, target, "delayed send to unknown actor dropped");
        }
    }
}

fn reply_to(ctx: &ActorContext, from: Option<ActorId>, value: Payload) {
    let Some(from) = from else {
        warn!(actor = %ctx.name, "reply requested but the message had no sender");
        return;
    };
    record_sent(ctx, &value);

    match ctx.router.sender_for_id(from) {
        Some(sender) => {
            let to = ctx.router.name_of(from).unwrap_or("unknown");
            ctx.trace
                .record(ctx.clock.now(), &ctx.name, to, &value, DeliveryKind::Send);
            sender.send_payload(Some(ctx.id), value);
        }
        None => {
            warn!(actor = %ctx.name, %from, "reply target not in simulation; dropped");
        }
    }
}

fn record_sent(ctx: &ActorContext, payload: &Payload) {
    let mut stats = ctx
        .stats
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner);
    stats.record_sent(payload);
}

fn panic_reason(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(text) = panic.downcast_ref::<&str>() {
        (*text).to_string()
    } else if let Some(text) = panic.downcast_ref::<String>() {
        text.clone()
    } else {
        "unknown panic".to_string()
    }
}
