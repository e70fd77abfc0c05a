//! Lock-free metrics collection and periodic reporting
//!
//! Uses atomics for hot-path operations to avoid mutex contention.
//!
//! NOTE: All atomics use Relaxed ordering intentionally—these are statistical
//! counters only. Do NOT use these atomics for coordination or logic decisions.

use std::sync::atomic::{AtomicU64, Ordering};
use tracing::info;

/// Lock-free metrics collector
///
/// All counters are monotonic; `summary()` loads a point-in-time snapshot.
pub struct Metrics {
    /// Sensor messages parsed and forwarded to the pipeline
    messages_received: AtomicU64,
    /// Messages dropped because the pipeline channel was full
    messages_dropped: AtomicU64,
    /// Malformed payloads rejected at the transport boundary
    messages_malformed: AtomicU64,
    /// Event messages run through the rule registry
    events_processed: AtomicU64,
    /// State messages ingested by the counter
    states_processed: AtomicU64,
    /// Official count changes
    count_changes: AtomicU64,
    /// Actions drained and executed successfully
    actions_completed: AtomicU64,
    /// Actions that failed during execution
    actions_failed: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            messages_received: AtomicU64::new(0),
            messages_dropped: AtomicU64::new(0),
            messages_malformed: AtomicU64::new(0),
            events_processed: AtomicU64::new(0),
            states_processed: AtomicU64::new(0),
            count_changes: AtomicU64::new(0),
            actions_completed: AtomicU64::new(0),
            actions_failed: AtomicU64::new(0),
        }
    }

    pub fn record_message_received(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_message_dropped(&self) {
        self.messages_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_message_malformed(&self) {
        self.messages_malformed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_event_processed(&self) {
        self.events_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_state_processed(&self) {
        self.states_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_count_change(&self) {
        self.count_changes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_action_completed(&self) {
        self.actions_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_action_failed(&self) {
        self.actions_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Snapshot all counters
    pub fn summary(&self) -> MetricsSummary {
        MetricsSummary {
            messages_received: self.messages_received.load(Ordering::Relaxed),
            messages_dropped: self.messages_dropped.load(Ordering::Relaxed),
            messages_malformed: self.messages_malformed.load(Ordering::Relaxed),
            events_processed: self.events_processed.load(Ordering::Relaxed),
            states_processed: self.states_processed.load(Ordering::Relaxed),
            count_changes: self.count_changes.load(Ordering::Relaxed),
            actions_completed: self.actions_completed.load(Ordering::Relaxed),
            actions_failed: self.actions_failed.load(Ordering::Relaxed),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time snapshot of all counters
#[derive(Debug, Clone, Copy)]
pub struct MetricsSummary {
    pub messages_received: u64,
    pub messages_dropped: u64,
    pub messages_malformed: u64,
    pub events_processed: u64,
    pub states_processed: u64,
    pub count_changes: u64,
    pub actions_completed: u64,
    pub actions_failed: u64,
}

impl MetricsSummary {
    /// Log the snapshot as a single structured line
    pub fn log(&self) {
        info!(
            messages_received = %self.messages_received,
            messages_dropped = %self.messages_dropped,
            messages_malformed = %self.messages_malformed,
            events_processed = %self.events_processed,
            states_processed = %self.states_processed,
            count_changes = %self.count_changes,
            actions_completed = %self.actions_completed,
            actions_failed = %self.actions_failed,
            "metrics_summary"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let m = Metrics::new();
        m.record_message_received();
        m.record_message_received();
        m.record_action_failed();

        let s = m.summary();
        assert_eq!(s.messages_received, 2);
        assert_eq!(s.actions_failed, 1);
        assert_eq!(s.actions_completed, 0);
    }
}
