use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::Instant;

/// Bounded window for the long-run latency average.
pub const LATENCY_WINDOW: usize = 100;

/// Aggregate health metrics, re-emitted on every recorded event.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricsSnapshot {
    /// Unweighted mean of the current window, rounded to whole milliseconds.
    pub avg_latency_ms: u32,
    /// Errors per interaction, in percent, rounded to one decimal.
    pub error_rate: f64,
    pub uptime_seconds: u64,
    pub fallback_active: bool,
}

struct Inner {
    samples: VecDeque<u32>,
    interactions: u64,
    errors: u64,
    last_error: Option<String>,
    fallback_active: bool,
    fallback_reason: Option<String>,
    latest: MetricsSnapshot,
}

/// Rolling round-trip statistics for UI display and buffer-size tuning.
pub struct LatencyTracker {
    inner: Mutex<Inner>,
    started: Instant,
    snapshot_tx: Sender<MetricsSnapshot>,
    snapshot_rx: Receiver<MetricsSnapshot>,
}

impl Default for LatencyTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl LatencyTracker {
    pub fn new() -> Self {
        let (snapshot_tx, snapshot_rx) = crossbeam_channel::unbounded();
        Self {
            inner: Mutex::new(Inner {
                samples: VecDeque::with_capacity(LATENCY_WINDOW),
                interactions: 0,
                errors: 0,
                last_error: None,
                fallback_active: false,
                fallback_reason: None,
                latest: MetricsSnapshot {
                    avg_latency_ms: 0,
                    error_rate: 0.0,
                    uptime_seconds: 0,
                    fallback_active: false,
                },
            }),
            started: Instant::now(),
            snapshot_tx,
            snapshot_rx,
        }
    }

    pub fn record_latency(&self, ms: u32) {
        let mut inner = self.inner.lock();
        if inner.samples.len() == LATENCY_WINDOW {
            inner.samples.pop_front();
        }
        inner.samples.push_back(ms);
        inner.interactions += 1;
        self.emit(&mut inner);
    }

    pub fn record_error(&self, message: impl Into<String>) {
        let mut inner = self.inner.lock();
        inner.errors += 1;
        inner.last_error = Some(message.into());
        self.emit(&mut inner);
    }

    pub fn set_fallback(&self, active: bool, reason: Option<&str>) {
        let mut inner = self.inner.lock();
        inner.fallback_active = active;
        inner.fallback_reason = if active { reason.map(String::from) } else { None };
        self.emit(&mut inner);
    }

    pub fn latest(&self) -> MetricsSnapshot {
        self.inner.lock().latest.clone()
    }

    pub fn last_error(&self) -> Option<String> {
        self.inner.lock().last_error.clone()
    }

    pub fn fallback_reason(&self) -> Option<String> {
        self.inner.lock().fallback_reason.clone()
    }

    pub fn subscribe(&self) -> Receiver<MetricsSnapshot> {
        self.snapshot_rx.clone()
    }

    fn emit(&self, inner: &mut Inner) {
        let avg_latency_ms = if inner.samples.is_empty() {
            0
        } else {
            let sum: u64 = inner.samples.iter().map(|&s| s as u64).sum();
            (sum as f64 / inner.samples.len() as f64).round() as u32
        };
        let error_rate = if inner.interactions == 0 {
            0.0
        } else {
            ((inner.errors as f64 / inner.interactions as f64) * 1000.0).round() / 10.0
        };
        let snapshot = MetricsSnapshot {
            avg_latency_ms,
            error_rate,
            uptime_seconds: self.started.elapsed().as_secs(),
            fallback_active: inner.fallback_active,
        };
        inner.latest = snapshot.clone();
        let _ = self.snapshot_tx.send(snapshot);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn average_is_rounded_mean_of_window() {
        let tracker = LatencyTracker::new();
        tracker.record_latency(100);
        tracker.record_latency(101);
        // (100 + 101) / 2 = 100.5 rounds up
        assert_eq!(tracker.latest().avg_latency_ms, 101);
    }

    #[test]
    fn window_evicts_oldest_first() {
        let tracker = LatencyTracker::new();
        for _ in 0..LATENCY_WINDOW {
            tracker.record_latency(1000);
        }
        // Push the window full of small samples; the big ones must age out.
        for _ in 0..LATENCY_WINDOW {
            tracker.record_latency(10);
        }
        assert_eq!(tracker.latest().avg_latency_ms, 10);
    }

    #[test]
    fn error_rate_is_percent_with_one_decimal() {
        let tracker = LatencyTracker::new();
        assert_eq!(tracker.latest().error_rate, 0.0);
        for _ in 0..3 {
            tracker.record_latency(50);
        }
        tracker.record_error("remote hiccup");
        // 1 error / 3 interactions = 33.333..% -> 33.3
        assert_eq!(tracker.latest().error_rate, 33.3);
        assert_eq!(tracker.last_error().as_deref(), Some("remote hiccup"));
    }

    #[test]
    fn errors_without_interactions_report_zero_rate() {
        let tracker = LatencyTracker::new();
        tracker.record_error("boom");
        assert_eq!(tracker.latest().error_rate, 0.0);
    }

    #[test]
    fn fallback_flag_round_trips_through_snapshot() {
        let tracker = LatencyTracker::new();
        let rx = tracker.subscribe();
        tracker.set_fallback(true, Some("degraded transport"));
        assert!(tracker.latest().fallback_active);
        assert_eq!(
            tracker.fallback_reason().as_deref(),
            Some("degraded transport")
        );
        assert!(rx.try_recv().unwrap().fallback_active);
        tracker.set_fallback(false, None);
        assert!(!tracker.latest().fallback_active);
        assert!(tracker.fallback_reason().is_none());
    }
}
