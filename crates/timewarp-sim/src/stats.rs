//! Whole-simulation statistics aggregation.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;
use timewarp_types::ActorStats;

/// Stats handle shared between an actor's loop and the simulation.
pub(crate) type SharedStats = Arc<Mutex<ActorStats>>;

pub(crate) fn shared_stats() -> SharedStats {
    Arc::new(Mutex::new(ActorStats::new()))
}

pub(crate) fn snapshot(stats: &SharedStats) -> ActorStats {
    stats.lock().unwrap_or_else(PoisonError::into_inner).clone()
}

/// Per-actor stats keyed by name, plus whole-run totals.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SimStats {
    pub actors: BTreeMap<String, ActorStats>,
}

impl SimStats {
    pub fn actor(&self, name: &str) -> Option<&ActorStats> {
        self.actors.get(name)
    }

    pub fn total_sent(&self) -> u64 {
        self.actors.values().map(|s| s.sent_count).sum()
    }

    pub fn total_received(&self) -> u64 {
        self.actors.values().map(|s| s.received_count).sum()
    }
}

// ============================================================================
// Tests
// ============================================================================
