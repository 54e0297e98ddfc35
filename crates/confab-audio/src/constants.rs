//! Fixed parameters of the streaming core.

/// Microphone capture rate expected by the remote session (mono).
pub const CAPTURE_SAMPLE_RATE_HZ: u32 = 16_000;

/// Rate of synthesized audio coming back from the remote session (mono).
pub const PLAYBACK_SAMPLE_RATE_HZ: u32 = 24_000;

/// Bounds for the adaptively tuned emit frame size, in samples.
pub const MIN_FRAME_SIZE: usize = 256;
pub const MAX_FRAME_SIZE: usize = 16_384;

/// Default emit frame size before any profiling or tuning input.
pub const DEFAULT_FRAME_SIZE: usize = 256;

/// Fixed block size for the splitter's internal ring-buffer reads. This is
/// independent of the tuned emit size above; the two knobs are never
/// unified.
pub const INTERNAL_READ_SAMPLES: usize = 4096;

/// RMS level below which input counts as quiet.
pub const SILENCE_RMS_THRESHOLD: f32 = 0.01;

/// Consecutive quiet samples required before entering the silence state.
pub const SILENCE_ENTRY_SAMPLES: u64 = 5_000;

/// Lead applied when the playback cursor has fallen behind the output clock.
pub const RESYNC_LEAD_SECS: f64 = 0.050;

/// Gain calibration: target peak and clamp bounds for the multiplier.
pub const GAIN_TARGET_PEAK: f32 = 0.8;
pub const GAIN_MIN: f32 = 0.5;
pub const GAIN_MAX: f32 = 3.0;
