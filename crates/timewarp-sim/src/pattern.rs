//! Declarative send patterns: how a synthetic actor emits over time.

use serde::Serialize;
use timewarp_types::Payload;

use crate::error::SimError;

/// How an actor emits messages over time.
#[derive(Debug, Clone, PartialEq, Serialize, Default)]
pub enum SendPattern {
    /// Emit `message` every `interval_ms`, first tick at `t0 + interval_ms`.
    Periodic { interval_ms: u64, message: Payload },
    /// Emit `message` `per_second` times per second; shorthand for
    /// `Periodic` with `interval_ms = 1000 / per_second`.
    Rate { per_second: u64, message: Payload },
    /// Every `period_ms`, emit `count` copies at the same instant.
    Burst {
        count: u32,
        period_ms: u64,
        message: Payload,
    },
    /// One shot: deliver `message` to the actor itself after `delay_ms`.
    SelfMessage { delay_ms: u64, message: Payload },
    /// Purely reactive actor.
    #[default]
    None,
}

impl SendPattern {
    /// Milliseconds between firings (or until the one shot). `None` for a
    /// reactive actor or a rate too high to express in whole milliseconds.
    pub fn interval_ms(&self) -> Option<u64> {
        match self {
            SendPattern::Periodic { interval_ms, .. } => Some(*interval_ms),
            SendPattern::Rate { per_second, .. } => {
                if *per_second == 0 {
                    None
                } else {
                    Some(1000 / per_second)
                }
            }
            SendPattern::Burst { period_ms, .. } => Some(*period_ms),
            SendPattern::SelfMessage { delay_ms, .. } => Some(*delay_ms),
            SendPattern::None => None,
        }
    }

    /// The messages one tick fans out to each target.
    pub fn messages(&self) -> Vec<Payload> {
        match self {
            SendPattern::Periodic { message, .. }
            | SendPattern::Rate { message, .. }
            | SendPattern::SelfMessage { message, .. } => vec![message.clone()],
            SendPattern::Burst { count, message, .. } => {
                std::iter::repeat_n(message.clone(), *count as usize).collect()
            }
            SendPattern::None => Vec::new(),
        }
    }

    /// True for patterns that reschedule after every tick.
    pub fn is_recurring(&self) -> bool {
        matches!(
            self,
            SendPattern::Periodic { .. } | SendPattern::Rate { .. } | SendPattern::Burst { .. }
        )
    }

    /// Rejects patterns that would tick forever at a single instant or
    /// never emit anything.
    pub fn validate(&self) -> Result<(), SimError> {
        match self {
            SendPattern::Periodic { interval_ms: 0, .. } => Err(SimError::InvalidPattern(
                "periodic interval must be positive".to_string(),
            )),
            SendPattern::Rate { per_second: 0, .. } => Err(SimError::InvalidPattern(
                "rate must be positive".to_string(),
            )),
            SendPattern::Rate { per_second, .. } if 1000 / per_second == 0 => {
                Err(SimError::InvalidPattern(format!(
                    "rate of {per_second}/s is below one millisecond per message"
                )))
            }
            SendPattern::Burst { count: 0, .. } => Err(SimError::InvalidPattern(
                "burst count must be positive".to_string(),
            )),
            SendPattern::Burst { period_ms: 0, .. } => Err(SimError::InvalidPattern(
                "burst period must be positive".to_string(),
            )),
            _ => Ok(()),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
