//! Occupancy fusion across camera sensors
//!
//! Each camera reports its own person count; counts disagree and cameras go
//! quiet. The counter keeps the last reading per sensor, drops stale ones on
//! every recomputation, and fuses the rest into one official count:
//! - below quorum: trust the most alert sensor (max)
//! - at quorum: majority vote, ties to the larger value
//! - no repeats at all: median (lower-middle on even-sized sets)
//!
//! A change record is produced only when the fused value actually moves.

use crate::domain::action::epoch_ms;
use crate::domain::message::StateMessage;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde::Serialize;
use std::collections::VecDeque;
use tracing::{debug, info, warn};

/// Bounded transition log size
const MAX_COUNT_HISTORY: usize = 1000;

/// Window for the rolling statistics (5 minutes)
const STATS_WINDOW_MS: u64 = 5 * 60 * 1000;

/// Last known reading from one sensor
#[derive(Debug, Clone, Serialize)]
pub struct SensorCount {
    pub sensor_id: String,
    pub count: i64,
    /// Epoch ms of the reading (sensor clock)
    pub timestamp: u64,
}

/// One entry in the official-count transition log
#[derive(Debug, Clone, Copy, Serialize)]
pub struct CountSample {
    pub timestamp: u64,
    pub count: i64,
}

/// Emitted when the official count changes
#[derive(Debug, Clone, Serialize)]
pub struct CountChange {
    pub previous: i64,
    pub current: i64,
    pub timestamp: u64,
    /// Per-sensor snapshot at the moment of the change
    pub sensors: Vec<SensorCount>,
}

/// Rolling statistics for the management surface
#[derive(Debug, Clone, Serialize)]
pub struct CounterStatistics {
    pub official_count: i64,
    pub active_sensors: usize,
    pub avg_count_last_5min: f64,
    pub max_count_last_5min: i64,
}

struct CounterInner {
    sensors: FxHashMap<String, SensorCount>,
    official: i64,
    history: VecDeque<CountSample>,
}

/// Fuses per-sensor occupancy readings into one official count
pub struct OccupancyCounter {
    quorum: usize,
    stale_after_ms: u64,
    inner: Mutex<CounterInner>,
}

impl OccupancyCounter {
    pub fn new(quorum: usize, stale_after_ms: u64) -> Self {
        Self {
            quorum,
            stale_after_ms,
            inner: Mutex::new(CounterInner {
                sensors: FxHashMap::default(),
                official: 0,
                history: VecDeque::new(),
            }),
        }
    }

    /// Ingest one state reading. Returns a change record when the fused
    /// official count moved, `None` otherwise. Never fails.
    pub fn ingest(&self, state: &StateMessage) -> Option<CountChange> {
        let now = epoch_ms();
        let mut inner = self.inner.lock();

        inner.sensors.insert(
            state.camera_id.clone(),
            SensorCount {
                sensor_id: state.camera_id.clone(),
                count: state.data.person_count,
                timestamp: state.timestamp,
            },
        );
        debug!(sensor_id = %state.camera_id, count = %state.data.person_count, "sensor_count_updated");

        Self::prune_stale(&mut inner, now, self.stale_after_ms);

        let active: Vec<i64> = inner.sensors.values().map(|s| s.count).collect();
        let fused = fuse_counts(&active, self.quorum);

        if fused == inner.official {
            return None;
        }

        let previous = inner.official;
        inner.official = fused;
        inner.history.push_back(CountSample { timestamp: state.timestamp, count: fused });
        if inner.history.len() > MAX_COUNT_HISTORY {
            inner.history.pop_front();
        }

        info!(previous = %previous, current = %fused, "official_count_changed");

        Some(CountChange {
            previous,
            current: fused,
            timestamp: state.timestamp,
            sensors: inner.sensors.values().cloned().collect(),
        })
    }

    fn prune_stale(inner: &mut CounterInner, now: u64, stale_after_ms: u64) {
        let threshold = now.saturating_sub(stale_after_ms);
        inner.sensors.retain(|sensor_id, s| {
            let keep = s.timestamp >= threshold;
            if !keep {
                warn!(sensor_id = %sensor_id, age_ms = %(now - s.timestamp), "stale_sensor_evicted");
            }
            keep
        });
    }

    /// Current official count
    pub fn current_count(&self) -> i64 {
        self.inner.lock().official
    }

    /// Per-sensor counts after staleness pruning
    pub fn sensor_counts(&self) -> Vec<SensorCount> {
        let now = epoch_ms();
        let mut inner = self.inner.lock();
        Self::prune_stale(&mut inner, now, self.stale_after_ms);
        inner.sensors.values().cloned().collect()
    }

    /// Most recent transitions, newest last. `limit` trims to the tail.
    pub fn history(&self, limit: Option<usize>) -> Vec<CountSample> {
        let inner = self.inner.lock();
        let samples: Vec<CountSample> = inner.history.iter().copied().collect();
        match limit {
            Some(n) if n < samples.len() => samples[samples.len() - n..].to_vec(),
            _ => samples,
        }
    }

    /// Drop all sensor entries, history, and the official count
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.sensors.clear();
        inner.official = 0;
        inner.history.clear();
        info!("occupancy_counter_reset");
    }

    /// Rolling statistics over the last five minutes of transitions
    pub fn statistics(&self) -> CounterStatistics {
        let now = epoch_ms();
        let mut inner = self.inner.lock();
        Self::prune_stale(&mut inner, now, self.stale_after_ms);

        let window_start = now.saturating_sub(STATS_WINDOW_MS);
        let recent: Vec<&CountSample> =
            inner.history.iter().filter(|s| s.timestamp > window_start).collect();

        let (avg, max) = if recent.is_empty() {
            (0.0, 0)
        } else {
            let sum: i64 = recent.iter().map(|s| s.count).sum();
            let avg = sum as f64 / recent.len() as f64;
            let max = recent.iter().map(|s| s.count).max().unwrap_or(0);
            ((avg * 10.0).round() / 10.0, max)
        };

        CounterStatistics {
            official_count: inner.official,
            active_sensors: inner.sensors.len(),
            avg_count_last_5min: avg,
            max_count_last_5min: max,
        }
    }
}

/// Fuse active sensor counts into one value.
///
/// Below quorum the max wins (optimistic). At quorum, majority vote with
/// ties resolved toward the larger count; when every value occurs exactly
/// once, the median of the sorted counts (lower-middle on even sets).
fn fuse_counts(active: &[i64], quorum: usize) -> i64 {
    if active.is_empty() {
        return 0;
    }
    if active.len() < quorum {
        return active.iter().copied().max().unwrap_or(0);
    }

    let mut occurrences: FxHashMap<i64, usize> = FxHashMap::default();
    for &count in active {
        *occurrences.entry(count).or_insert(0) += 1;
    }

    let (winner, max_occurrences) = occurrences
        .iter()
        .map(|(&count, &occ)| (count, occ))
        .max_by_key(|&(count, occ)| (occ, count))
        .unwrap_or((0, 0));

    if max_occurrences > 1 {
        return winner;
    }

    // No value repeats: fall back to the median
    let mut sorted = active.to_vec();
    sorted.sort_unstable();
    sorted[(sorted.len() - 1) / 2]
}
