use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{self, Duration};

use crate::capture::DeviceConfig;
use crate::constants::{CAPTURE_SAMPLE_RATE_HZ, DEFAULT_FRAME_SIZE, INTERNAL_READ_SAMPLES};
use crate::frame_reader::{FrameReader, RawBlock};
use crate::resampler::{ResamplerQuality, StreamResampler};
use crate::sizer::snap_to_power_of_two;
use confab_telemetry::{FpsTracker, PipelineMetrics, PipelineStage};

/// One fixed-length block of mono capture audio at the transport rate.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub timestamp: std::time::Instant,
}

pub struct SplitterConfig {
    /// Emit size; retuned at runtime by the adaptive sizer.
    pub frame_size_samples: usize,
    pub sample_rate_hz: u32,
    pub resampler_quality: ResamplerQuality,
}

impl Default for SplitterConfig {
    fn default() -> Self {
        Self {
            frame_size_samples: DEFAULT_FRAME_SIZE,
            sample_rate_hz: CAPTURE_SAMPLE_RATE_HZ,
            resampler_quality: ResamplerQuality::Balanced,
        }
    }
}

/// Splits the raw capture stream into fixed-size frames for the encoder.
///
/// Internal ring reads happen in fixed 4096-sample blocks regardless of the
/// configured emit size; the two sizes are independent knobs.
pub struct FrameSplitter {
    frame_reader: FrameReader,
    output_tx: broadcast::Sender<AudioFrame>,
    cfg: SplitterConfig,
    running: Arc<AtomicBool>,
    metrics: Option<Arc<PipelineMetrics>>,
    device_cfg_rx: Option<broadcast::Receiver<DeviceConfig>>,
    frame_size_rx: Option<broadcast::Receiver<usize>>,
}

impl FrameSplitter {
    pub fn new(
        frame_reader: FrameReader,
        output_tx: broadcast::Sender<AudioFrame>,
        cfg: SplitterConfig,
    ) -> Self {
        Self {
            frame_reader,
            output_tx,
            cfg,
            running: Arc::new(AtomicBool::new(false)),
            metrics: None,
            device_cfg_rx: None,
            frame_size_rx: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<PipelineMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn with_device_config(mut self, rx: broadcast::Receiver<DeviceConfig>) -> Self {
        self.device_cfg_rx = Some(rx);
        self
    }

    /// Receiver for live frame-size retuning from the adaptive sizer.
    pub fn with_frame_size_updates(mut self, rx: broadcast::Receiver<usize>) -> Self {
        self.frame_size_rx = Some(rx);
        self
    }

    pub fn spawn(self) -> (JoinHandle<()>, Arc<AtomicBool>) {
        let mut worker = SplitterWorker::new(
            self.frame_reader,
            self.output_tx,
            self.cfg,
            self.metrics,
            self.device_cfg_rx,
            self.frame_size_rx,
        );
        self.running.store(true, Ordering::SeqCst);
        let running = self.running.clone();
        let running_for_task = self.running.clone();

        let handle = tokio::spawn(async move {
            worker.run(running_for_task).await;
        });
        (handle, running)
    }
}

struct SplitterWorker {
    frame_reader: FrameReader,
    output_tx: broadcast::Sender<AudioFrame>,
    cfg: SplitterConfig,
    buffer: VecDeque<f32>,
    samples_emitted: u64,
    metrics: Option<Arc<PipelineMetrics>>,
    splitter_fps: FpsTracker,
    resampler: Option<StreamResampler>,
    current_input_rate: Option<u32>,
    current_input_channels: Option<u16>,
    device_cfg_rx: Option<broadcast::Receiver<DeviceConfig>>,
    frame_size_rx: Option<broadcast::Receiver<usize>>,
    start_time: std::time::Instant,
}

impl SplitterWorker {
    fn new(
        frame_reader: FrameReader,
        output_tx: broadcast::Sender<AudioFrame>,
        cfg: SplitterConfig,
        metrics: Option<Arc<PipelineMetrics>>,
        device_cfg_rx: Option<broadcast::Receiver<DeviceConfig>>,
        frame_size_rx: Option<broadcast::Receiver<usize>>,
    ) -> Self {
        let cap = cfg.frame_size_samples * 4;
        Self {
            frame_reader,
            output_tx,
            cfg,
            buffer: VecDeque::with_capacity(cap),
            samples_emitted: 0,
            metrics,
            splitter_fps: FpsTracker::new(),
            resampler: None,
            current_input_rate: None,
            current_input_channels: None,
            device_cfg_rx,
            frame_size_rx,
            start_time: std::time::Instant::now(),
        }
    }

    async fn run(&mut self, running: Arc<AtomicBool>) {
        tracing::info!(
            "Frame splitter started (emit size {} samples)",
            self.cfg.frame_size_samples
        );

        while running.load(Ordering::SeqCst) {
            self.apply_pending_updates();

            if let Some(block) = self.frame_reader.read_block(INTERNAL_READ_SAMPLES) {
                if block.sample_rate != self.current_input_rate.unwrap_or(0)
                    || Some(block.channels) != self.current_input_channels
                {
                    self.reconfigure_for_device(&block);
                }

                let processed = self.process_block(&block);
                self.buffer.extend(processed);
                self.flush_ready_frames();
            } else {
                // Poll a little faster than the shortest frame period so a
                // ready frame never waits a full cycle.
                time::sleep(Duration::from_millis(10)).await;
            }
        }

        tracing::info!("Frame splitter stopped");
    }

    fn apply_pending_updates(&mut self) {
        if let Some(rx) = &mut self.device_cfg_rx {
            while let Ok(cfg) = rx.try_recv() {
                self.frame_reader
                    .update_device_config(cfg.sample_rate, cfg.channels);
            }
        }
        if let Some(rx) = &mut self.frame_size_rx {
            while let Ok(size) = rx.try_recv() {
                let snapped = snap_to_power_of_two(size);
                if snapped != self.cfg.frame_size_samples {
                    tracing::info!(
                        "Frame size retuned: {} -> {}",
                        self.cfg.frame_size_samples,
                        snapped
                    );
                    self.cfg.frame_size_samples = snapped;
                }
            }
        }
    }

    fn flush_ready_frames(&mut self) {
        let fs = self.cfg.frame_size_samples;
        while self.buffer.len() >= fs {
            let samples: Vec<f32> = self.buffer.drain(..fs).collect();

            let timestamp_ms =
                (self.samples_emitted as u128 * 1000 / self.cfg.sample_rate_hz as u128) as u64;
            let timestamp = self.start_time + std::time::Duration::from_millis(timestamp_ms);

            let frame = AudioFrame {
                samples,
                sample_rate: self.cfg.sample_rate_hz,
                timestamp,
            };

            // A broadcast send only fails when nobody is subscribed, which
            // is not an error for us.
            if self.output_tx.send(frame).is_err() {
                tracing::trace!("No active listeners for audio frames");
            }

            self.samples_emitted += fs as u64;

            if let Some(m) = &self.metrics {
                m.increment_splitter_frames();
                if let Some(fps) = self.splitter_fps.tick() {
                    m.update_splitter_fps(fps);
                }
                m.mark_stage_active(PipelineStage::Splitter);
            }
        }
    }

    fn reconfigure_for_device(&mut self, block: &RawBlock) {
        if block.sample_rate != self.cfg.sample_rate_hz {
            tracing::info!(
                "Configuring resampler: {}Hz {}ch -> {}Hz mono",
                block.sample_rate,
                block.channels,
                self.cfg.sample_rate_hz
            );
            self.resampler = Some(StreamResampler::new_with_quality(
                block.sample_rate,
                self.cfg.sample_rate_hz,
                self.cfg.resampler_quality,
            ));
        } else {
            self.resampler = None;
        }

        self.current_input_rate = Some(block.sample_rate);
        self.current_input_channels = Some(block.channels);
    }

    fn process_block(&mut self, block: &RawBlock) -> Vec<f32> {
        let mono: Vec<f32> = if block.channels == 1 {
            block.samples.clone()
        } else {
            let channels = block.channels as usize;
            block
                .samples
                .chunks_exact(channels)
                .map(|chunk| chunk.iter().sum::<f32>() / channels as f32)
                .collect()
        };

        match &mut self.resampler {
            Some(resampler) => resampler.process(&mono),
            None => mono,
        }
    }
}
