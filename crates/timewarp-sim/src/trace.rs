//! The causal message trace.
//!
//! Append-only, ordered by insertion, which under the quiescence barrier
//! is `(virtual now, arrival order)`. Actors append through a serialized
//! writer; the log stays bounded only by the run itself.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use timewarp_types::{DeliveryKind, Payload, Timestamp, TraceEvent};

/// Shared, serialized trace writer.
#[derive(Debug, Clone, Default)]
pub struct TraceLog {
    events: Arc<Mutex<Vec<TraceEvent>>>,
    enabled: Arc<AtomicBool>,
}

impl TraceLog {
    pub fn new(enabled: bool) -> Self {
        Self {
            events: Arc::new(Mutex::new(Vec::new())),
            enabled: Arc::new(AtomicBool::new(enabled)),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    /// Appends one message flow. A no-op while disabled.
    pub fn record(
        &self,
        timestamp: Timestamp,
        from: &str,
        to: &str,
        payload: &Payload,
        kind: DeliveryKind,
    ) {
        if !self.is_enabled() {
            return;
        }
        let event = TraceEvent {
            timestamp,
            from: from.to_string(),
            to: to.to_string(),
            payload: payload.clone(),
            kind,
        };
        self.lock().push(event);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// A copy of the recorded events, in insertion order.
    pub fn snapshot(&self) -> Vec<TraceEvent> {
        self.lock().clone()
    }

    /// The trace as a JSON array, for external renderers.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&*self.lock())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<TraceEvent>> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_log_records_nothing() {
        let log = TraceLog::new(false);
        log.record(
            Timestamp::new(10),
            "a",
            "b",
            &Payload::atom("tick"),
            DeliveryKind::Send,
        );
        assert!(log.is_empty());
    }

    #[test]
    fn events_keep_insertion_order() {
        let log = TraceLog::new(true);
        for i in 0..5 {
            log.record(
                Timestamp::new(100),
                "producer",
                "consumer",
                &Payload::Int(i),
                DeliveryKind::Send,
            );
        }

        let events = log.snapshot();
        assert_eq!(events.len(), 5);
        let order: Vec<_> = events.iter().map(|e| e.payload.clone()).collect();
        assert_eq!(
            order,
            (0..5).map(Payload::Int).collect::<Vec<_>>()
        );
    }

    #[test]
    fn json_export_round_trips() {
        let log = TraceLog::new(true);
        log.record(
            Timestamp::new(42),
            "a",
            "b",
            &Payload::atom("tick"),
            DeliveryKind::Cast,
        );

        let json = log.to_json().expect("serialize");
        let parsed: Vec<TraceEvent> = serde_json::from_str(&json).expect("parse");
        assert_eq!(parsed, log.snapshot());
    }
}
