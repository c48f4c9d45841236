//! # timewarp-clock: Deterministically advanceable virtual time
//!
//! This crate is the time-virtualization substrate of Timewarp:
//!
//! - [`VirtualClock`]: a discrete event calendar keyed by
//!   `(fire_at, seq)` with precise, total control over logical time:
//!   scheduling, cancellation, controlled advancement, and quiescence
//!   synchronization.
//! - [`backend`]: per-task selection between real OS time and a bound
//!   virtual clock, discovered via task-local context with an optional
//!   process-wide default.
//! - [`Mailbox`]/[`MailboxSender`]: FIFO actor mailboxes whose deliveries
//!   participate in the clock's quiescence barrier via a [`DeliveryGauge`].
//!
//! ## The quiescence barrier
//!
//! Delivering an event may cause its handler to schedule further events.
//! `advance` therefore fires one event at a time and waits for the
//! delivery gauge to drain before popping the next, so a periodic actor's
//! reschedule is always in the calendar before the following tick is
//! extracted. A multi-hour scenario advances in milliseconds while
//! preserving causal order.
//!
//! ## Quick start
//!
//! ```
//! use timewarp_clock::{Mailbox, VirtualClock};
//! use timewarp_types::{ActorId, Payload};
//!
//! let clock = VirtualClock::new();
//! let mailbox = Mailbox::new(ActorId::next());
//! clock.register(mailbox.id(), mailbox.sender());
//!
//! clock.schedule_after(mailbox.id(), Payload::atom("tick"), 100).unwrap();
//! clock.advance(100);
//! assert!(mailbox.try_recv().is_some());
//! ```

mod calendar;
mod clock;
mod error;
mod mailbox;

pub mod backend;

pub use calendar::CancelOutcome;
pub use clock::VirtualClock;
pub use error::ClockError;
pub use mailbox::{
    AckToken, DeliveryGauge, Envelope, Mailbox, MailboxSender, hold_delivery, release_delivery,
};

pub use backend::TimeBackend;
