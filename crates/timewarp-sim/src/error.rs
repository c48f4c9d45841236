//! Simulation error types.

use thiserror::Error;
use timewarp_clock::ClockError;
use timewarp_server::ServerError;

#[derive(Debug, Error)]
pub enum SimError {
    /// A send pattern that cannot run: zero interval, zero rate, an empty
    /// burst. Rejected at `add_actor`, before anything is spawned.
    #[error("invalid send pattern: {0}")]
    InvalidPattern(String),

    /// Actor names must be unique across synthetic actors and processes.
    #[error("duplicate actor name: {0}")]
    DuplicateActor(String),

    /// The user's termination predicate panicked; the run was torn down.
    #[error("termination predicate failed: {0}")]
    TerminationCondition(String),

    /// The simulation was used out of order (e.g. `add_actor` after `run`).
    #[error("simulation lifecycle: {0}")]
    Lifecycle(String),

    #[error("failed to spawn actor thread: {0}")]
    Spawn(#[from] std::io::Error),

    #[error(transparent)]
    Server(#[from] ServerError),

    #[error(transparent)]
    Clock(#[from] ClockError),
}

pub type Result<T> = std::result::Result<T, SimError>;
