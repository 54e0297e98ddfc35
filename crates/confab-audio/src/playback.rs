use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{SampleRate, Stream, StreamConfig};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::constants::{PLAYBACK_SAMPLE_RATE_HZ, RESYNC_LEAD_SECS};
use confab_foundation::AudioError;
use confab_telemetry::{PipelineMetrics, PipelineStage};

/// A decoded buffer of synthesized speech awaiting scheduling.
#[derive(Debug, Clone)]
pub struct PlaybackChunk {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

/// Position source for the scheduler, abstracted so cursor arithmetic can be
/// tested without an audio device.
pub trait PlaybackClock: Send + Sync {
    /// Seconds of audio actually rendered since the stream started.
    fn now_secs(&self) -> f64;
}

/// Real output clock: frames rendered by the device callback.
pub struct StreamClock {
    frames_rendered: Arc<AtomicU64>,
    sample_rate: u32,
}

impl PlaybackClock for StreamClock {
    fn now_secs(&self) -> f64 {
        self.frames_rendered.load(Ordering::Relaxed) as f64 / self.sample_rate as f64
    }
}

pub struct ScheduledChunk {
    start_frame: u64,
    samples: Vec<f32>,
}

pub type ChunkQueue = Arc<Mutex<VecDeque<ScheduledChunk>>>;

/// Gapless back-to-back scheduler with an explicit "next start time" cursor.
///
/// Chunks are placed contiguously: each start time equals the previous start
/// plus its duration. When the cursor has fallen behind the output clock
/// (idle gap, interruption), it resynchronizes to `now + 50 ms` before
/// scheduling; starts never land in the past and the queue never grows
/// unboundedly.
pub struct PlaybackScheduler {
    cursor_secs: f64,
    clock: Arc<dyn PlaybackClock>,
    queue: ChunkQueue,
    stream_rate: u32,
    metrics: Option<Arc<PipelineMetrics>>,
}

impl PlaybackScheduler {
    pub fn new(clock: Arc<dyn PlaybackClock>, queue: ChunkQueue, stream_rate: u32) -> Self {
        Self {
            cursor_secs: 0.0,
            clock,
            queue,
            stream_rate,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<PipelineMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Enqueue a chunk; returns its assigned start time in seconds on the
    /// output clock. `playback_rate` and `detune_cents` shift pitch/tempo by
    /// resampling at enqueue time.
    pub fn schedule(
        &mut self,
        chunk: PlaybackChunk,
        playback_rate: f64,
        detune_cents: f64,
    ) -> f64 {
        let effective_rate = if playback_rate > 0.0 {
            playback_rate * (detune_cents / 1200.0).exp2()
        } else {
            1.0
        };
        let ratio = self.stream_rate as f64 / (chunk.sample_rate as f64 * effective_rate);
        let samples = resample_linear(&chunk.samples, ratio);
        let duration = samples.len() as f64 / self.stream_rate as f64;

        let now = self.clock.now_secs();
        if self.cursor_secs < now {
            self.cursor_secs = now + RESYNC_LEAD_SECS;
        }
        let start = self.cursor_secs;
        self.cursor_secs += duration;

        self.queue.lock().push_back(ScheduledChunk {
            start_frame: (start * self.stream_rate as f64).round() as u64,
            samples,
        });

        if let Some(m) = &self.metrics {
            m.increment_playback_chunks();
            m.mark_stage_active(PipelineStage::Playback);
        }

        start
    }

    /// Drop everything queued and zero the cursor so the next schedule
    /// resynchronizes; stale audio is superseded rather than played late.
    pub fn reset(&mut self) {
        self.cursor_secs = 0.0;
        self.queue.lock().clear();
    }

    pub fn cursor_secs(&self) -> f64 {
        self.cursor_secs
    }
}

/// Nearest-sample linear interpolation; fine for small rate offsets.
fn resample_linear(samples: &[f32], ratio: f64) -> Vec<f32> {
    if (ratio - 1.0).abs() < 1e-9 || samples.is_empty() {
        return samples.to_vec();
    }
    let out_len = ((samples.len() as f64) * ratio).round().max(1.0) as usize;
    let mut out = Vec::with_capacity(out_len);
    for i in 0..out_len {
        let pos = i as f64 / ratio;
        let idx = pos.floor() as usize;
        let frac = (pos - idx as f64) as f32;
        let a = samples[idx.min(samples.len() - 1)];
        let b = samples[(idx + 1).min(samples.len() - 1)];
        out.push(a + (b - a) * frac);
    }
    out
}

/// Owns the cpal output stream and the render-side state.
///
/// The default sink is the cheap path; a named device is opened only when
/// the user asks for one, and dropping back to `None` reverts to default.
pub struct PlaybackSink {
    _stream: Stream,
    queue: ChunkQueue,
    frames_rendered: Arc<AtomicU64>,
    stream_rate: u32,
}

impl PlaybackSink {
    pub fn open(
        device: &cpal::Device,
        metrics: Option<Arc<PipelineMetrics>>,
    ) -> Result<Self, AudioError> {
        let (config, channels) = negotiate_output_config(device)?;
        let queue: ChunkQueue = Arc::new(Mutex::new(VecDeque::new()));
        let frames_rendered = Arc::new(AtomicU64::new(0));
        let stream_rate = config.sample_rate.0;

        let cb_queue = Arc::clone(&queue);
        let cb_frames = Arc::clone(&frames_rendered);

        let stream = device.build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                let mut pos = cb_frames.load(Ordering::Relaxed);
                let mut q = cb_queue.lock();
                for frame in data.chunks_mut(channels) {
                    let mut sample = 0.0f32;
                    while let Some(front) = q.front() {
                        let end = front.start_frame + front.samples.len() as u64;
                        if end <= pos {
                            // Entirely in the past: arrived too late to play.
                            q.pop_front();
                            if let Some(m) = &metrics {
                                m.increment_playback_underruns();
                            }
                            continue;
                        }
                        if front.start_frame <= pos {
                            sample = front.samples[(pos - front.start_frame) as usize];
                        }
                        break;
                    }
                    for out in frame.iter_mut() {
                        *out = sample;
                    }
                    pos += 1;
                }
                drop(q);
                cb_frames.store(pos, Ordering::Relaxed);
            },
            |err| {
                tracing::error!("Audio playback error: {}", err);
            },
            None,
        )?;
        stream.play()?;

        Ok(Self {
            _stream: stream,
            queue,
            frames_rendered,
            stream_rate,
        })
    }

    pub fn clock(&self) -> Arc<StreamClock> {
        Arc::new(StreamClock {
            frames_rendered: Arc::clone(&self.frames_rendered),
            sample_rate: self.stream_rate,
        })
    }

    pub fn queue(&self) -> ChunkQueue {
        Arc::clone(&self.queue)
    }

    pub fn stream_rate(&self) -> u32 {
        self.stream_rate
    }
}

/// Mono at the playback rate when available, stereo as fallback; the render
/// callback duplicates the mono signal across channels.
fn negotiate_output_config(device: &cpal::Device) -> Result<(StreamConfig, usize), AudioError> {
    let target = SampleRate(PLAYBACK_SAMPLE_RATE_HZ);
    for wanted_channels in [1u16, 2] {
        if let Ok(configs) = device.supported_output_configs() {
            if let Some(config) = configs.into_iter().find(|c| {
                c.channels() == wanted_channels
                    && c.min_sample_rate() <= target
                    && c.max_sample_rate() >= target
                    && c.sample_format() == cpal::SampleFormat::F32
            }) {
                let config = config.with_sample_rate(target).config();
                return Ok((config, wanted_channels as usize));
            }
        }
    }

    // Last resort: the device default; chunks are rate-converted at
    // schedule time to match. The render callback writes f32, so anything
    // else is unsupported.
    let default_config = device
        .default_output_config()
        .map_err(|e| AudioError::FormatNotSupported {
            format: format!("no usable output config: {e}"),
        })?;
    if default_config.sample_format() != cpal::SampleFormat::F32 {
        return Err(AudioError::FormatNotSupported {
            format: format!("{:?}", default_config.sample_format()),
        });
    }
    let channels = default_config.channels() as usize;
    Ok((
        StreamConfig {
            channels: default_config.channels(),
            sample_rate: default_config.sample_rate(),
            buffer_size: cpal::BufferSize::Default,
        },
        channels,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeClock {
        now: Mutex<f64>,
    }

    impl FakeClock {
        fn new(now: f64) -> Arc<Self> {
            Arc::new(Self {
                now: Mutex::new(now),
            })
        }

        fn set(&self, value: f64) {
            *self.now.lock() = value;
        }
    }

    impl PlaybackClock for FakeClock {
        fn now_secs(&self) -> f64 {
            *self.now.lock()
        }
    }

    fn chunk(samples: usize) -> PlaybackChunk {
        PlaybackChunk {
            samples: vec![0.1; samples],
            sample_rate: PLAYBACK_SAMPLE_RATE_HZ,
        }
    }

    fn scheduler(clock: Arc<FakeClock>) -> PlaybackScheduler {
        let queue: ChunkQueue = Arc::new(Mutex::new(VecDeque::new()));
        PlaybackScheduler::new(clock, queue, PLAYBACK_SAMPLE_RATE_HZ)
    }

    #[test]
    fn cold_cursor_resyncs_then_stays_contiguous() {
        let clock = FakeClock::new(1.0);
        let mut sched = scheduler(clock.clone());

        // 12000 samples at 24 kHz = 0.5 s.
        let t1 = sched.schedule(chunk(12_000), 1.0, 0.0);
        let t2 = sched.schedule(chunk(6_000), 1.0, 0.0);

        assert!((t1 - 1.05).abs() < 1e-9, "t1={t1}");
        assert!((t2 - 1.55).abs() < 1e-9, "t2={t2}");
        assert!((sched.cursor_secs() - 1.8).abs() < 1e-9);
    }

    #[test]
    fn cursor_ahead_of_clock_does_not_resync() {
        let clock = FakeClock::new(0.0);
        let mut sched = scheduler(clock.clone());
        let t1 = sched.schedule(chunk(2_400), 1.0, 0.0); // 0.1 s
        clock.set(0.01); // still behind the cursor
        let t2 = sched.schedule(chunk(2_400), 1.0, 0.0);
        assert!((t2 - (t1 + 0.1)).abs() < 1e-9);
    }

    #[test]
    fn reset_zeroes_cursor_and_drops_queue() {
        let clock = FakeClock::new(5.0);
        let queue: ChunkQueue = Arc::new(Mutex::new(VecDeque::new()));
        let mut sched =
            PlaybackScheduler::new(clock.clone(), Arc::clone(&queue), PLAYBACK_SAMPLE_RATE_HZ);

        sched.schedule(chunk(2_400), 1.0, 0.0);
        assert_eq!(queue.lock().len(), 1);

        sched.reset();
        assert_eq!(sched.cursor_secs(), 0.0);
        assert!(queue.lock().is_empty());

        // Next schedule resynchronizes off the live clock again.
        let t = sched.schedule(chunk(2_400), 1.0, 0.0);
        assert!((t - 5.05).abs() < 1e-9);
    }

    #[test]
    fn playback_rate_shortens_duration() {
        let clock = FakeClock::new(0.0);
        let mut sched = scheduler(clock);
        // 0.1 s of audio at 2x should occupy ~0.05 s of timeline.
        let t1 = sched.schedule(chunk(2_400), 2.0, 0.0);
        let t2 = sched.schedule(chunk(2_400), 2.0, 0.0);
        assert!(((t2 - t1) - 0.05).abs() < 1e-3, "spacing {}", t2 - t1);
    }

    #[test]
    fn detune_cents_adjust_effective_rate() {
        let clock = FakeClock::new(0.0);
        let mut sched = scheduler(clock);
        // +1200 cents = one octave up = half duration.
        let t1 = sched.schedule(chunk(2_400), 1.0, 1200.0);
        let t2 = sched.schedule(chunk(2_400), 1.0, 1200.0);
        assert!(((t2 - t1) - 0.05).abs() < 1e-3);
    }

    #[test]
    fn linear_resample_preserves_constant_signals() {
        let out = resample_linear(&[0.5; 100], 2.0);
        assert_eq!(out.len(), 200);
        assert!(out.iter().all(|&s| (s - 0.5).abs() < 1e-6));

        let out = resample_linear(&[0.5; 100], 0.5);
        assert_eq!(out.len(), 50);
    }

    #[test]
    fn unity_ratio_is_a_copy() {
        let input = vec![0.1, 0.2, 0.3];
        assert_eq!(resample_linear(&input, 1.0), input);
    }
}
