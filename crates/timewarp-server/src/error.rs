//! Server error types.

use thiserror::Error;
use timewarp_clock::ClockError;

#[derive(Debug, Error)]
pub enum ServerError {
    /// `init` returned a stop, so the server never started.
    #[error("server init failed: {0}")]
    InitFailed(String),

    /// A synchronous call did not receive a reply within its real-time
    /// timeout.
    #[error("synchronous call timed out")]
    CallTimeout,

    /// The server's loop has exited; no further requests are accepted.
    #[error("server is stopped")]
    Stopped,

    /// A self-targeting timer primitive was used outside a server loop.
    #[error("not running inside a server loop")]
    OutsideServer,

    #[error("failed to spawn server thread: {0}")]
    Spawn(#[from] std::io::Error),

    #[error(transparent)]
    Clock(#[from] ClockError),
}

pub type Result<T> = std::result::Result<T, ServerError>;
