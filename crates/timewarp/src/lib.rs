//! # Timewarp
//!
//! Virtual-time simulation testing for concurrent Rust.
//!
//! Components that schedule timers or periodic work normally force tests
//! to wait on the wall clock. Timewarp replaces those waits with a
//! deterministically advanceable virtual clock: schedule-after, sleep and
//! cancel route through a controllable event calendar, so a multi-hour
//! scenario executes in milliseconds while preserving the causal ordering
//! of every message.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                          Timewarp                            │
//! │  ┌────────────┐   ┌─────────────┐   ┌─────────────────────┐  │
//! │  │ VirtualClock│ → │ TimeBackend │ → │ ServerHandle loops  │  │
//! │  │ (calendar) │   │ (per task)  │   │ (call/cast/info)    │  │
//! │  └────────────┘   └─────────────┘   └─────────────────────┘  │
//! │                                                              │
//! │  ┌────────────────────────────────────────────────────────┐  │
//! │  │  Simulation: Definitions + send patterns + trace/stats │  │
//! │  └────────────────────────────────────────────────────────┘  │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Quick start
//!
//! ```
//! use timewarp::{Definition, Payload, RunOptions, SendPattern, SimConfig, Simulation};
//!
//! let mut sim = Simulation::new(SimConfig::new());
//! sim.add_actor(
//!     Definition::new("heartbeat")
//!         .with_pattern(SendPattern::Periodic {
//!             interval_ms: 1_000,
//!             message: Payload::atom("beat"),
//!         })
//!         .with_targets(["monitor"]),
//! )
//! .unwrap();
//! sim.add_actor(Definition::new("monitor")).unwrap();
//!
//! // One simulated hour, a few milliseconds of wall clock.
//! sim.run(RunOptions::new().duration(3_600_000)).unwrap();
//! assert_eq!(sim.get_stats().actor("heartbeat").unwrap().sent_count, 3_600);
//! sim.stop();
//! ```
//!
//! # Layers
//!
//! - **Clock**: [`VirtualClock`], [`CancelOutcome`], the [`backend`]
//!   module for per-task real/virtual selection.
//! - **Servers**: [`Server`], [`ServerHandle`], [`ServerOptions`], a
//!   message loop whose timer calls route through the ambient backend.
//! - **Simulation**: [`Simulation`], [`Definition`], [`SendPattern`],
//!   [`RunOptions`], the declarative harness over both.

pub use timewarp_clock::{
    AckToken, CancelOutcome, ClockError, DeliveryGauge, Envelope, Mailbox, MailboxSender,
    TimeBackend, VirtualClock, backend,
};
pub use timewarp_server::{
    After, CallOutcome, Init, Next, Server, ServerError, ServerHandle, ServerOptions,
    TimeSelection, cancel, schedule_after, schedule_self_after, self_address, sleep,
};
pub use timewarp_sim::{
    Definition, MatchAction, MatchPattern, MatchRule, ReceiveOutcome, RunOptions, RunSummary,
    SendPattern, SimConfig, SimError, SimSnapshot, SimStats, Simulation, TerminateWhen,
    TerminationReason, codegen,
};
pub use timewarp_types::{
    ActorId, ActorStats, ActorStatus, DeliveryKind, Payload, Timestamp, TimerRef, TraceEvent,
};
