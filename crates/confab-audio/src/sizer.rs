use std::collections::VecDeque;
use std::time::{Duration, Instant};

use confab_foundation::{real_clock, SharedClock};

use crate::constants::{MAX_FRAME_SIZE, MIN_FRAME_SIZE};

/// Samples kept for one tuning evaluation.
pub const TUNING_WINDOW: usize = 20;
/// Minimum samples before an evaluation is meaningful.
const EVAL_MIN_SAMPLES: usize = 10;
/// Minimum spacing between adjustments.
const ADJUST_COOLDOWN: Duration = Duration::from_millis(5000);

/// Picks an audio frame size balancing latency against underrun risk.
///
/// The three-branch heuristic avoids thrashing: shrinking on
/// every latency dip would oscillate under noisy measurements, so the
/// "fast" branches are gated on the window's standard deviation. The size
/// is always a power of two within [`MIN_FRAME_SIZE`, `MAX_FRAME_SIZE`].
pub struct AdaptiveBufferSizer {
    size: usize,
    target_latency_ms: f64,
    samples: VecDeque<f64>,
    last_evaluation: Option<Instant>,
    clock: SharedClock,
}

impl AdaptiveBufferSizer {
    pub fn new(initial_size: usize, target_latency_ms: f64) -> Self {
        Self::with_clock(initial_size, target_latency_ms, real_clock())
    }

    pub fn with_clock(initial_size: usize, target_latency_ms: f64, clock: SharedClock) -> Self {
        Self {
            size: snap_to_power_of_two(initial_size),
            target_latency_ms,
            samples: VecDeque::with_capacity(TUNING_WINDOW),
            last_evaluation: None,
            clock,
        }
    }

    pub fn current_size(&self) -> usize {
        self.size
    }

    /// Feed one round-trip measurement. Returns the new size when the
    /// heuristic decided to change it.
    pub fn record_latency(&mut self, ms: f64) -> Option<usize> {
        if self.samples.len() == TUNING_WINDOW {
            self.samples.pop_front();
        }
        self.samples.push_back(ms);

        if self.samples.len() < EVAL_MIN_SAMPLES || !self.cooldown_elapsed() {
            return None;
        }

        let mean = self.samples.iter().sum::<f64>() / self.samples.len() as f64;
        let variance = self
            .samples
            .iter()
            .map(|s| (s - mean).powi(2))
            .sum::<f64>()
            / self.samples.len() as f64;
        let stddev = variance.sqrt();
        let target = self.target_latency_ms;

        let previous = self.size;
        if mean > 1.5 * target {
            // Latency too high: shrink the buffer.
            self.shrink();
        } else if mean < 0.7 * target && stddev < 0.2 * target {
            // Stable and fast: opportunistically reduce latency further.
            self.shrink();
        } else if mean < 0.5 * target && stddev > 0.3 * target {
            // Very fast but jittery: trade latency for stability.
            self.grow();
        }

        // Every evaluation, even a no-op, consumes the window and restarts
        // the cooldown.
        self.samples.clear();
        self.last_evaluation = Some(self.clock.now());

        (self.size != previous).then_some(self.size)
    }

    /// Reinitialize for a fresh recording run.
    pub fn reset(&mut self, initial_size: usize) {
        self.size = snap_to_power_of_two(initial_size);
        self.samples.clear();
        self.last_evaluation = None;
    }

    fn cooldown_elapsed(&self) -> bool {
        match self.last_evaluation {
            None => true,
            Some(at) => self.clock.now().duration_since(at) >= ADJUST_COOLDOWN,
        }
    }

    fn shrink(&mut self) {
        if self.size > MIN_FRAME_SIZE {
            self.size = snap_to_power_of_two(self.size / 2);
        }
    }

    fn grow(&mut self) {
        if self.size < MAX_FRAME_SIZE {
            self.size = snap_to_power_of_two(self.size * 2);
        }
    }
}

/// Clamp to range, then pick whichever neighboring power of two is
/// numerically closer; equal distance favors the smaller buffer (less
/// latency).
pub fn snap_to_power_of_two(value: usize) -> usize {
    let v = value.clamp(MIN_FRAME_SIZE, MAX_FRAME_SIZE);
    if v.is_power_of_two() {
        return v;
    }
    let ceil = v.next_power_of_two();
    let floor = ceil >> 1;
    if v - floor <= ceil - v {
        floor
    } else {
        ceil
    }
}
