use std::sync::atomic::{AtomicBool, AtomicI16, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Shared counters for cross-thread pipeline monitoring.
///
/// Everything here is written from hot paths (audio callbacks, splitter
/// loop), so the representation is atomics only.
#[derive(Clone)]
pub struct PipelineMetrics {
    /// Peak |sample| in the current window, stored as f32 bits.
    pub current_peak: Arc<AtomicU32>,
    /// RMS level * 10_000 of the last frame.
    pub current_rms: Arc<AtomicU64>,
    /// Current level in dBFS * 10.
    pub audio_level_db: Arc<AtomicI16>,

    pub stage_capture: Arc<AtomicBool>,
    pub stage_splitter: Arc<AtomicBool>,
    pub stage_playback: Arc<AtomicBool>,

    pub capture_frames: Arc<AtomicU64>,
    pub splitter_frames: Arc<AtomicU64>,
    pub playback_chunks: Arc<AtomicU64>,
    pub playback_underruns: Arc<AtomicU64>,

    /// Frames per second * 10.
    pub capture_fps: Arc<AtomicU64>,
    pub splitter_fps: Arc<AtomicU64>,
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self {
            current_peak: Arc::new(AtomicU32::new(0f32.to_bits())),
            current_rms: Arc::new(AtomicU64::new(0)),
            audio_level_db: Arc::new(AtomicI16::new(-900)),

            stage_capture: Arc::new(AtomicBool::new(false)),
            stage_splitter: Arc::new(AtomicBool::new(false)),
            stage_playback: Arc::new(AtomicBool::new(false)),

            capture_frames: Arc::new(AtomicU64::new(0)),
            splitter_frames: Arc::new(AtomicU64::new(0)),
            playback_chunks: Arc::new(AtomicU64::new(0)),
            playback_underruns: Arc::new(AtomicU64::new(0)),

            capture_fps: Arc::new(AtomicU64::new(0)),
            splitter_fps: Arc::new(AtomicU64::new(0)),
        }
    }
}

impl PipelineMetrics {
    pub fn update_audio_level(&self, samples: &[f32]) {
        if samples.is_empty() {
            return;
        }

        let peak = samples.iter().fold(0.0f32, |acc, &s| acc.max(s.abs()));
        self.current_peak.store(peak.to_bits(), Ordering::Relaxed);

        let sum: f64 = samples.iter().map(|&s| s as f64 * s as f64).sum();
        let rms = (sum / samples.len() as f64).sqrt();
        self.current_rms
            .store((rms * 10_000.0) as u64, Ordering::Relaxed);

        let db = if peak > 0.0 {
            (20.0 * (peak as f64).log10() * 10.0) as i16
        } else {
            -900
        };
        self.audio_level_db.store(db, Ordering::Relaxed);
    }

    pub fn peak(&self) -> f32 {
        f32::from_bits(self.current_peak.load(Ordering::Relaxed))
    }

    pub fn reset_peak(&self) {
        self.current_peak.store(0f32.to_bits(), Ordering::Relaxed);
    }

    pub fn mark_stage_active(&self, stage: PipelineStage) {
        match stage {
            PipelineStage::Capture => self.stage_capture.store(true, Ordering::Relaxed),
            PipelineStage::Splitter => self.stage_splitter.store(true, Ordering::Relaxed),
            PipelineStage::Playback => self.stage_playback.store(true, Ordering::Relaxed),
        }
    }

    pub fn increment_capture_frames(&self) {
        self.capture_frames.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_splitter_frames(&self) {
        self.splitter_frames.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_playback_chunks(&self) {
        self.playback_chunks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_playback_underruns(&self) {
        self.playback_underruns.fetch_add(1, Ordering::Relaxed);
    }

    pub fn update_capture_fps(&self, fps: f64) {
        self.capture_fps.store((fps * 10.0) as u64, Ordering::Relaxed);
    }

    pub fn update_splitter_fps(&self, fps: f64) {
        self.splitter_fps.store((fps * 10.0) as u64, Ordering::Relaxed);
    }
}

#[derive(Debug, Clone, Copy)]
pub enum PipelineStage {
    Capture,
    Splitter,
    Playback,
}

#[derive(Debug)]
pub struct FpsTracker {
    last_update: Instant,
    frame_count: u64,
}

impl Default for FpsTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl FpsTracker {
    pub fn new() -> Self {
        Self {
            last_update: Instant::now(),
            frame_count: 0,
        }
    }

    pub fn tick(&mut self) -> Option<f64> {
        self.frame_count += 1;
        let elapsed = self.last_update.elapsed();

        if elapsed >= Duration::from_secs(1) {
            let fps = self.frame_count as f64 / elapsed.as_secs_f64();
            self.last_update = Instant::now();
            self.frame_count = 0;
            Some(fps)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audio_level_tracks_peak_and_rms() {
        let metrics = PipelineMetrics::default();
        metrics.update_audio_level(&[0.0, 0.5, -0.25]);
        assert_eq!(metrics.peak(), 0.5);
        assert!(metrics.current_rms.load(Ordering::Relaxed) > 0);
        metrics.reset_peak();
        assert_eq!(metrics.peak(), 0.0);
    }

    #[test]
    fn silent_input_floors_the_db_meter() {
        let metrics = PipelineMetrics::default();
        metrics.update_audio_level(&[0.0; 64]);
        assert_eq!(metrics.audio_level_db.load(Ordering::Relaxed), -900);
    }
}
