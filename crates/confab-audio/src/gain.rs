use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use crate::constants::{GAIN_MAX, GAIN_MIN, GAIN_TARGET_PEAK};

/// Persistent input gain stage, applied sample-by-sample in the capture
/// callback. The multiplier is stored as f32 bits so the hot path never
/// takes a lock.
#[derive(Clone)]
pub struct GainControl {
    multiplier: Arc<AtomicU32>,
}

impl Default for GainControl {
    fn default() -> Self {
        Self::new()
    }
}

impl GainControl {
    pub fn new() -> Self {
        Self {
            multiplier: Arc::new(AtomicU32::new(1.0f32.to_bits())),
        }
    }

    pub fn get(&self) -> f32 {
        f32::from_bits(self.multiplier.load(Ordering::Relaxed))
    }

    /// Set the multiplier, clamped to the calibration bounds.
    pub fn set(&self, value: f32) -> f32 {
        let clamped = value.clamp(GAIN_MIN, GAIN_MAX);
        self.multiplier.store(clamped.to_bits(), Ordering::Relaxed);
        clamped
    }

    pub fn apply(&self, samples: &mut [f32]) {
        let gain = self.get();
        if gain == 1.0 {
            return;
        }
        for s in samples.iter_mut() {
            *s = (*s * gain).clamp(-1.0, 1.0);
        }
    }
}

/// Multiplier bringing a measured peak to the calibration target, clamped.
/// A zero peak yields the maximum clamp rather than dividing by zero.
pub fn calibration_gain(peak: f32) -> f32 {
    if peak > 0.0 {
        (GAIN_TARGET_PEAK / peak).clamp(GAIN_MIN, GAIN_MAX)
    } else {
        GAIN_MAX
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn calibration_gain_is_always_within_clamp_bounds() {
        assert_eq!(calibration_gain(0.8), 1.0);
        // Quiet input wants x8 but clamps at the ceiling.
        assert_eq!(calibration_gain(0.1), GAIN_MAX);
        // Hot input clamps at the floor.
        assert_eq!(calibration_gain(1.6), 0.5);
        assert_eq!(calibration_gain(10.0), GAIN_MIN);
        // Dead silence measures peak zero; max clamp, no division.
        assert_eq!(calibration_gain(0.0), GAIN_MAX);
        for peak in [0.0f32, 0.001, 0.25, 0.5, 0.79, 0.81, 2.0, 100.0] {
            let g = calibration_gain(peak);
            assert!((GAIN_MIN..=GAIN_MAX).contains(&g));
        }
    }

    #[test]
    fn set_clamps_to_bounds() {
        let gain = GainControl::new();
        assert_eq!(gain.set(10.0), GAIN_MAX);
        assert_eq!(gain.set(0.01), GAIN_MIN);
        assert_eq!(gain.set(1.5), 1.5);
        assert_eq!(gain.get(), 1.5);
    }

    #[test]
    fn apply_scales_and_saturates() {
        let gain = GainControl::new();
        gain.set(2.0);
        let mut samples = [0.25f32, -0.25, 0.9];
        gain.apply(&mut samples);
        assert_eq!(samples[0], 0.5);
        assert_eq!(samples[1], -0.5);
        // 0.9 * 2.0 saturates at full scale instead of wrapping.
        assert_eq!(samples[2], 1.0);
    }

    #[test]
    fn unity_gain_is_a_no_op() {
        let gain = GainControl::new();
        let mut samples = [0.123f32, -0.456];
        gain.apply(&mut samples);
        assert_eq!(samples, [0.123, -0.456]);
    }
}
