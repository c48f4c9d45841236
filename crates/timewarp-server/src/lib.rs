//! # timewarp-server: Virtualized message-loop servers
//!
//! Wraps a user callback module (`init`, `handle_call`, `handle_cast`,
//! `handle_info`, `handle_continue`, `terminate`) in a single-threaded
//! message loop whose timer primitives dispatch through the ambient
//! [`timewarp_clock::backend`]. The same module runs unchanged under real
//! time or under a test-controlled [`timewarp_clock::VirtualClock`].
//!
//! ## Quick start
//!
//! ```
//! use std::time::Duration;
//! use timewarp_clock::VirtualClock;
//! use timewarp_server::{
//!     CallOutcome, Init, Next, Server, ServerHandle, ServerOptions, schedule_self_after,
//! };
//! use timewarp_types::Payload;
//!
//! struct Ticker;
//!
//! impl Server for Ticker {
//!     type State = i64;
//!
//!     fn init(&mut self, _arg: Payload) -> Init<i64> {
//!         schedule_self_after(Payload::atom("tick"), 100).expect("schedule");
//!         Init::Ready(0)
//!     }
//!
//!     fn handle_info(&mut self, message: Payload, ticks: i64) -> Next<i64> {
//!         if message.is_atom("tick") {
//!             schedule_self_after(Payload::atom("tick"), 100).expect("schedule");
//!             Next::Continue(ticks + 1)
//!         } else {
//!             Next::Continue(ticks)
//!         }
//!     }
//!
//!     fn handle_call(&mut self, _request: Payload, ticks: i64) -> CallOutcome<i64> {
//!         CallOutcome::Reply(Payload::Int(ticks), ticks)
//!     }
//! }
//!
//! let clock = VirtualClock::new();
//! let ticker = ServerHandle::start(
//!     Ticker,
//!     Payload::atom("start"),
//!     ServerOptions::new().virtual_clock(clock.clone()),
//! )
//! .expect("start");
//!
//! clock.advance(1000);
//! clock.wait_for_quiescence();
//!
//! let ticks = ticker.call(Payload::atom("get"), Duration::from_secs(1)).expect("call");
//! assert_eq!(ticks, Payload::Int(10));
//! ticker.stop();
//! ```

mod error;
mod handle;
mod server;
mod timers;

pub use error::ServerError;
pub use handle::{ServerHandle, ServerOptions, TimeSelection};
pub use server::{After, CallOutcome, Init, Next, Server};
pub use timers::{cancel, schedule_after, schedule_self_after, self_address, sleep};
