//! Clock error types.

use thiserror::Error;

/// Errors raised at the clock and backend boundary.
///
/// The clock rejects invalid inputs at the call site and never raises out
/// of `advance`; delivery problems degrade to warnings.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClockError {
    /// The requested delay pushes the fire time past the representable
    /// virtual time range.
    #[error("invalid delay: {delay_ms}ms overflows the virtual time range")]
    InvalidDelay { delay_ms: u64 },

    /// A virtual-backend operation ran with no clock bound in the current
    /// task context and no process-wide default installed.
    #[error("no virtual clock bound in the current task context")]
    NoClockBound,
}

pub type Result<T> = std::result::Result<T, ClockError>;
