use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::RwLock;
use tracing::debug;

/// Well-known operation names. The orchestration core emits one sample per
/// tool invocation and one per completed session; collaborators may record
/// additional operations under their own names.
pub const OP_TOOL_INVOKE: &str = "tool_invoke";
pub const OP_SESSION: &str = "session";

/// Samples kept per operation; older samples roll off.
const MAX_SAMPLES: usize = 100;

/// Records operation durations and serves aggregate views. Interior-mutable
/// so a single recorder can be shared behind an `Arc` by the catalog and any
/// number of concurrent sessions.
pub struct TimingRecorder {
    samples: RwLock<HashMap<String, VecDeque<f64>>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationStats {
    pub avg: f64,
    pub min: f64,
    pub max: f64,
    pub count: usize,
}

/// Point-in-time view over every recorded operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub timestamp: DateTime<Utc>,
    pub operations: BTreeMap<String, OperationStats>,
}

impl TimingRecorder {
    pub fn new() -> Self {
        Self {
            samples: RwLock::new(HashMap::new()),
        }
    }

    pub fn record(&self, operation: &str, duration_ms: f64) {
        let mut samples = self.samples.write().unwrap();
        let window = samples.entry(operation.to_string()).or_default();

        window.push_back(duration_ms);
        if window.len() > MAX_SAMPLES {
            window.pop_front();
        }

        debug!("Recorded timing sample: {} = {:.1}ms", operation, duration_ms);
    }

    pub fn stats(&self, operation: &str) -> Option<OperationStats> {
        let samples = self.samples.read().unwrap();
        let window = samples.get(operation)?;
        if window.is_empty() {
            return None;
        }

        let sum: f64 = window.iter().sum();
        let min = window.iter().cloned().fold(f64::INFINITY, f64::min);
        let max = window.iter().cloned().fold(f64::NEG_INFINITY, f64::max);

        Some(OperationStats {
            avg: sum / window.len() as f64,
            min,
            max,
            count: window.len(),
        })
    }

    pub fn all_stats(&self) -> BTreeMap<String, OperationStats> {
        let operations: Vec<String> = {
            let samples = self.samples.read().unwrap();
            samples.keys().cloned().collect()
        };

        operations
            .into_iter()
            .filter_map(|op| self.stats(&op).map(|stats| (op, stats)))
            .collect()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            timestamp: Utc::now(),
            operations: self.all_stats(),
        }
    }

    pub fn reset(&self) {
        self.samples.write().unwrap().clear();
    }
}

impl Default for TimingRecorder {
    fn default() -> Self {
        Self::new()
    }
}

/// Convenience guard: records the elapsed time for `operation` when dropped,
/// so every exit path of a block emits exactly one sample.
pub struct TimerGuard<'a> {
    recorder: &'a TimingRecorder,
    operation: &'a str,
    started: std::time::Instant,
}

impl<'a> TimerGuard<'a> {
    pub fn start(recorder: &'a TimingRecorder, operation: &'a str) -> Self {
        Self {
            recorder,
            operation,
            started: std::time::Instant::now(),
        }
    }

    pub fn elapsed_ms(&self) -> f64 {
        self.started.elapsed().as_secs_f64() * 1000.0
    }
}

impl Drop for TimerGuard<'_> {
    fn drop(&mut self) {
        self.recorder.record(self.operation, self.elapsed_ms());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_and_aggregates() {
        let recorder = TimingRecorder::new();

        recorder.record(OP_TOOL_INVOKE, 10.0);
        recorder.record(OP_TOOL_INVOKE, 20.0);
        recorder.record(OP_TOOL_INVOKE, 30.0);

        let stats = recorder.stats(OP_TOOL_INVOKE).unwrap();
        assert_eq!(stats.count, 3);
        assert_eq!(stats.min, 10.0);
        assert_eq!(stats.max, 30.0);
        assert!((stats.avg - 20.0).abs() < f64::EPSILON);
    }

    #[test]
    fn unknown_operation_has_no_stats() {
        let recorder = TimingRecorder::new();
        assert!(recorder.stats("nothing_recorded").is_none());
    }

    #[test]
    fn window_drops_oldest_samples() {
        let recorder = TimingRecorder::new();
        for i in 0..(MAX_SAMPLES + 10) {
            recorder.record(OP_SESSION, i as f64);
        }

        let stats = recorder.stats(OP_SESSION).unwrap();
        assert_eq!(stats.count, MAX_SAMPLES);
        // The first ten samples rolled off.
        assert_eq!(stats.min, 10.0);
    }

    #[test]
    fn timer_guard_records_on_drop() {
        let recorder = TimingRecorder::new();
        {
            let _guard = TimerGuard::start(&recorder, OP_SESSION);
        }
        assert_eq!(recorder.stats(OP_SESSION).unwrap().count, 1);
    }

    #[test]
    fn snapshot_lists_all_operations() {
        let recorder = TimingRecorder::new();
        recorder.record(OP_SESSION, 5.0);
        recorder.record(OP_TOOL_INVOKE, 7.0);

        let snapshot = recorder.snapshot();
        assert_eq!(snapshot.operations.len(), 2);
        assert!(snapshot.operations.contains_key(OP_SESSION));
        assert!(snapshot.operations.contains_key(OP_TOOL_INVOKE));
    }
}
