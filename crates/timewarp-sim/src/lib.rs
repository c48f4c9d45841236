//! # timewarp-sim: Declarative actor simulation over virtual time
//!
//! A harness for exercising time-dependent actor topologies without
//! waiting on the wall clock: declare actors with send patterns
//! (periodic, rate, burst, one-shot), connect them by name, run hours of
//! virtual time in milliseconds, then inspect per-actor stats and the
//! causal message trace.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                         Simulation                            │
//! │  ┌────────────┐  ┌────────────┐  ┌──────────┐  ┌───────────┐  │
//! │  │ VirtualClock│  │   Router   │  │ TraceLog │  │ SimStats  │  │
//! │  │ (calendar) │  │ (name→box) │  │ (causal) │  │ (per actor)│ │
//! │  └────────────┘  └────────────┘  └──────────┘  └───────────┘  │
//! │                                                               │
//! │  sim actors (Definition + thread)   wrapped servers (Server)  │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! The driver advances the clock in `check_interval` steps, waiting for
//! quiescence after each advance, until the duration is consumed, the
//! calendar drains, or a termination predicate holds.
//!
//! ## Quick start
//!
//! ```
//! use timewarp_sim::{Definition, RunOptions, SendPattern, SimConfig, Simulation};
//! use timewarp_types::Payload;
//!
//! let mut sim = Simulation::new(SimConfig::new());
//! sim.add_actor(
//!     Definition::new("producer")
//!         .with_pattern(SendPattern::Periodic {
//!             interval_ms: 100,
//!             message: Payload::atom("tick"),
//!         })
//!         .with_targets(["consumer"]),
//! )
//! .unwrap();
//! sim.add_actor(Definition::new("consumer")).unwrap();
//!
//! let summary = sim.run(RunOptions::new().duration(1000)).unwrap();
//! let stats = sim.get_stats();
//! assert_eq!(stats.actor("producer").unwrap().sent_count, 10);
//! assert_eq!(stats.actor("consumer").unwrap().received_count, 10);
//! assert_eq!(summary.actual_duration.as_millis(), 1000);
//! sim.stop();
//! ```

mod actor;
mod definition;
mod error;
mod pattern;
mod registry;
mod simulation;
mod stats;
mod trace;

pub mod codegen;

pub use definition::{
    Definition, MatchAction, MatchPattern, MatchPredicate, MatchRule, ReceiveFn, ReceiveOutcome,
};
pub use error::SimError;
pub use pattern::SendPattern;
pub use simulation::{
    DEFAULT_CHECK_INTERVAL_MS, DEFAULT_MAX_DURATION_MS, RunOptions, RunSummary, SimConfig,
    SimSnapshot, Simulation, TerminateWhen, TerminationReason,
};
pub use stats::SimStats;
pub use trace::TraceLog;
