use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::capture::{CaptureEvent, CaptureThread, DeviceConfig};
use crate::constants::{CAPTURE_SAMPLE_RATE_HZ, DEFAULT_FRAME_SIZE};
use crate::device::DeviceManager;
use crate::frame_reader::FrameReader;
use crate::gain::GainControl;
use crate::playback::{PlaybackChunk, PlaybackScheduler, PlaybackSink};
use crate::resampler::ResamplerQuality;
use crate::ring_buffer::{AudioProducer, AudioRingBuffer};
use crate::sizer::snap_to_power_of_two;
use crate::splitter::{AudioFrame, FrameSplitter, SplitterConfig};
use confab_foundation::AudioError;
use confab_telemetry::PipelineMetrics;

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Initial emit frame size; typically the device profiler's hint.
    pub frame_size: usize,
    pub resampler_quality: ResamplerQuality,
    pub input_device: Option<String>,
    pub output_device: Option<String>,
    /// Capture ring capacity in samples.
    pub ring_capacity: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            frame_size: DEFAULT_FRAME_SIZE,
            resampler_quality: ResamplerQuality::Balanced,
            input_device: None,
            output_device: None,
            ring_capacity: 65_536,
        }
    }
}

impl std::fmt::Debug for AudioPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioPipeline")
            .field("initialized", &self.initialized)
            .field("capturing", &self.capture.is_some())
            .field("playback_open", &self.sink.is_some())
            .finish()
    }
}

/// Owner of every live audio resource: the capture thread, the splitter
/// task, the playback sink, and the gain stage. The orchestrator holds
/// exactly one of these; there is no global audio engine.
pub struct AudioPipeline {
    cfg: PipelineConfig,
    metrics: Arc<PipelineMetrics>,
    gain: GainControl,

    frames_tx: broadcast::Sender<AudioFrame>,
    events_tx: broadcast::Sender<CaptureEvent>,
    device_config_tx: broadcast::Sender<DeviceConfig>,
    frame_size_tx: broadcast::Sender<usize>,

    initialized: bool,
    producer: Option<Arc<Mutex<AudioProducer>>>,
    splitter: Option<(JoinHandle<()>, Arc<AtomicBool>)>,
    capture: Option<CaptureThread>,

    device_manager: DeviceManager,
    sink: Option<PlaybackSink>,
    scheduler: Option<PlaybackScheduler>,
}

impl AudioPipeline {
    pub fn new(cfg: PipelineConfig) -> Result<Self, AudioError> {
        let (frames_tx, _) = broadcast::channel(64);
        let (events_tx, _) = broadcast::channel(16);
        let (device_config_tx, _) = broadcast::channel(16);
        let (frame_size_tx, _) = broadcast::channel(8);

        Ok(Self {
            cfg,
            metrics: Arc::new(PipelineMetrics::default()),
            gain: GainControl::new(),
            frames_tx,
            events_tx,
            device_config_tx,
            frame_size_tx,
            initialized: false,
            producer: None,
            splitter: None,
            capture: None,
            device_manager: DeviceManager::new()
                .map_err(|e| AudioError::Init(format!("audio host unavailable: {e}")))?,
            sink: None,
            scheduler: None,
        })
    }

    /// Prepare the frame-splitting stage and the capture ring. Capture and
    /// playback must not be attempted after a failed init until retried.
    pub fn initialize(&mut self) -> Result<(), AudioError> {
        if self.initialized {
            return Ok(());
        }

        let frame_size = snap_to_power_of_two(self.cfg.frame_size);
        let (producer, consumer) = AudioRingBuffer::new(self.cfg.ring_capacity).split();
        let reader = FrameReader::new(consumer, CAPTURE_SAMPLE_RATE_HZ, 1);

        let splitter = FrameSplitter::new(
            reader,
            self.frames_tx.clone(),
            SplitterConfig {
                frame_size_samples: frame_size,
                sample_rate_hz: CAPTURE_SAMPLE_RATE_HZ,
                resampler_quality: self.cfg.resampler_quality,
            },
        )
        .with_metrics(Arc::clone(&self.metrics))
        .with_device_config(self.device_config_tx.subscribe())
        .with_frame_size_updates(self.frame_size_tx.subscribe());

        self.splitter = Some(splitter.spawn());
        self.producer = Some(Arc::new(Mutex::new(producer)));
        self.initialized = true;
        tracing::info!("Audio pipeline initialized (frame size {})", frame_size);
        Ok(())
    }

    /// Open the named (or configured, or default) input device and start
    /// emitting frames. Permission/device failures are returned once and
    /// never retried here.
    pub fn start_capture(&mut self, device: Option<String>) -> Result<DeviceConfig, AudioError> {
        if !self.initialized {
            return Err(AudioError::NotInitialized);
        }
        if device.is_some() {
            self.cfg.input_device = device;
        }
        if self.capture.is_some() {
            self.stop_capture();
        }

        let producer = self
            .producer
            .as_ref()
            .ok_or(AudioError::NotInitialized)?
            .clone();

        let (capture, device_config) = CaptureThread::spawn(
            self.cfg.input_device.clone(),
            producer,
            self.gain.clone(),
            Arc::clone(&self.metrics),
            self.events_tx.clone(),
            self.device_config_tx.clone(),
        )?;
        self.capture = Some(capture);
        Ok(device_config)
    }

    /// Idempotent: safe to call when not capturing, and while a capture
    /// start is still pending (the late success checks intent).
    pub fn stop_capture(&mut self) {
        if let Some(capture) = self.capture.take() {
            capture.stop();
            tracing::info!("Capture stopped");
        }
    }

    pub fn is_capturing(&self) -> bool {
        self.capture.is_some()
    }

    /// Hot-swap the input without touching the splitter or the ring.
    pub fn set_input_device(&mut self, device: Option<String>) -> Result<(), AudioError> {
        self.cfg.input_device = device;
        if self.capture.is_some() {
            self.stop_capture();
            self.start_capture(None)?;
        }
        Ok(())
    }

    /// Swap the output sink; `None` reverts to the default-device path.
    /// Queued audio does not survive the swap.
    pub fn set_output_device(&mut self, device: Option<String>) -> Result<(), AudioError> {
        self.cfg.output_device = device;
        if self.sink.is_some() {
            self.sink = None;
            self.scheduler = None;
            self.ensure_playback()?;
        }
        Ok(())
    }

    /// Enqueue a decoded chunk for gapless playback; returns the assigned
    /// start time on the output clock.
    pub fn schedule_frame(
        &mut self,
        chunk: PlaybackChunk,
        playback_rate: f64,
        detune_cents: f64,
    ) -> Result<f64, AudioError> {
        if !self.initialized {
            return Err(AudioError::NotInitialized);
        }
        self.ensure_playback()?;
        let scheduler = self
            .scheduler
            .as_mut()
            .ok_or_else(|| AudioError::Fatal("playback scheduler missing".to_string()))?;
        Ok(scheduler.schedule(chunk, playback_rate, detune_cents))
    }

    /// Zero the cursor and drop queued chunks so the next schedule
    /// resynchronizes; used on server-signaled interruption.
    pub fn reset_playback(&mut self) {
        if let Some(scheduler) = self.scheduler.as_mut() {
            scheduler.reset();
        }
    }

    /// Measure input peak over the window and apply `target / peak` to the
    /// persistent gain stage, clamped to [0.5, 3.0]. A zero peak yields the
    /// maximum clamp. Opens a temporary capture stream when not capturing,
    /// fully released afterwards.
    pub async fn calibrate_gain(&mut self, duration: Duration) -> Result<f32, AudioError> {
        let temporary = self.capture.is_none();
        if temporary {
            self.start_capture(None)?;
        }

        self.metrics.reset_peak();
        tokio::time::sleep(duration).await;
        let peak = self.metrics.peak();

        let applied = self.gain.set(crate::gain::calibration_gain(peak));
        tracing::info!("Gain calibrated: peak={:.3} -> x{:.2}", peak, applied);

        if temporary {
            self.stop_capture();
        }
        Ok(applied)
    }

    /// Retune the splitter's emit size (snapped to a valid power of two).
    pub fn set_frame_size(&self, size: usize) {
        let _ = self.frame_size_tx.send(snap_to_power_of_two(size));
    }

    pub fn subscribe_frames(&self) -> broadcast::Receiver<AudioFrame> {
        self.frames_tx.subscribe()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<CaptureEvent> {
        self.events_tx.subscribe()
    }

    pub fn metrics(&self) -> Arc<PipelineMetrics> {
        Arc::clone(&self.metrics)
    }

    pub fn gain(&self) -> f32 {
        self.gain.get()
    }

    pub fn device_manager(&self) -> &DeviceManager {
        &self.device_manager
    }

    pub async fn shutdown(mut self) {
        self.stop_capture();
        self.sink = None;
        self.scheduler = None;
        if let Some((handle, running)) = self.splitter.take() {
            running.store(false, Ordering::SeqCst);
            let _ = handle.await;
        }
        tracing::info!("Audio pipeline shut down");
    }

    fn ensure_playback(&mut self) -> Result<(), AudioError> {
        if self.sink.is_some() {
            return Ok(());
        }
        let device = self
            .device_manager
            .open_output(self.cfg.output_device.as_deref())?;
        let sink = PlaybackSink::open(&device, Some(Arc::clone(&self.metrics)))?;
        let scheduler = PlaybackScheduler::new(sink.clock(), sink.queue(), sink.stream_rate())
            .with_metrics(Arc::clone(&self.metrics));
        self.sink = Some(sink);
        self.scheduler = Some(scheduler);
        Ok(())
    }
}
