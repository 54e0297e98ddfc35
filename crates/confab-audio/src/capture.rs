use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{SampleFormat, SampleRate, Stream, StreamConfig};

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::constants::CAPTURE_SAMPLE_RATE_HZ;
use crate::detector::SilenceDetector;
use crate::device::DeviceManager;
use crate::gain::GainControl;
use crate::ring_buffer::AudioProducer;
use crate::watchdog::WatchdogTimer;
use confab_foundation::AudioError;
use confab_telemetry::PipelineMetrics;

/// Negotiated input stream layout, broadcast to the splitter so it can
/// reconfigure resampling on device swaps.
#[derive(Debug, Clone)]
pub struct DeviceConfig {
    pub sample_rate: u32,
    pub channels: u16,
}

/// Out-of-band capture notifications for downstream voice-activity logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureEvent {
    SilenceChanged(bool),
}

#[derive(Debug, Default)]
pub struct CaptureStats {
    pub frames_captured: AtomicU64,
    pub frames_dropped: AtomicU64,
    pub disconnections: AtomicU64,
    pub silent_frames: AtomicU64,
    pub active_frames: AtomicU64,
}

/// Handle to the dedicated capture thread.
pub struct CaptureThread {
    handle: JoinHandle<()>,
    shutdown: Arc<AtomicBool>,
    pub stats: Arc<CaptureStats>,
}

impl CaptureThread {
    /// Open the named (or default) input device and start pumping f32
    /// samples into the ring. Device/permission failures are returned to the
    /// caller and never retried here; retry is a user action.
    #[allow(clippy::too_many_arguments)]
    pub fn spawn(
        device_name: Option<String>,
        producer: Arc<Mutex<AudioProducer>>,
        gain: GainControl,
        metrics: Arc<PipelineMetrics>,
        event_tx: tokio::sync::broadcast::Sender<CaptureEvent>,
        config_tx: tokio::sync::broadcast::Sender<DeviceConfig>,
    ) -> Result<(Self, DeviceConfig), AudioError> {
        let running = Arc::new(AtomicBool::new(true));
        let shutdown = running.clone();
        let stats = Arc::new(CaptureStats::default());
        let stats_out = stats.clone();

        let (result_tx, result_rx) = std::sync::mpsc::channel::<Result<DeviceConfig, AudioError>>();

        let handle = thread::Builder::new()
            .name("audio-capture".to_string())
            .spawn(move || {
                let mut capture = match AudioCapture::new(
                    producer,
                    gain,
                    metrics,
                    event_tx,
                    config_tx,
                    stats,
                    running.clone(),
                ) {
                    Ok(c) => c,
                    Err(e) => {
                        let _ = result_tx.send(Err(e));
                        return;
                    }
                };

                let first = capture.start(device_name.as_deref());
                let ok = first.is_ok();
                let _ = result_tx.send(first);
                if !ok {
                    return;
                }

                // The caller may have stopped us while the device was still
                // opening; a late success must not leave a live stream.
                if !running.load(Ordering::SeqCst) {
                    capture.stop();
                    return;
                }

                // Monitor for watchdog stalls or stream errors. A restart
                // re-opens the same device once per trigger; if that fails
                // the thread winds down to a safe stopped state and the
                // stall is left for the user to act on.
                while running.load(Ordering::SeqCst) {
                    if capture.watchdog.is_triggered()
                        || capture.restart_needed.load(Ordering::SeqCst)
                    {
                        tracing::warn!("Capture restart triggered (watchdog or stream error)");
                        capture.stats.disconnections.fetch_add(1, Ordering::Relaxed);
                        capture.stop_stream();
                        capture.restart_needed.store(false, Ordering::SeqCst);

                        match capture.start(device_name.as_deref()) {
                            Ok(_) => tracing::info!("Capture restarted"),
                            Err(e) => {
                                tracing::error!("Failed to restart capture: {}", e);
                                break;
                            }
                        }
                    }
                    thread::sleep(Duration::from_millis(100));
                }

                capture.stop();
                tracing::info!("Audio capture thread shutting down");
            })
            .map_err(|e| AudioError::Fatal(format!("Failed to spawn capture thread: {}", e)))?;

        let device_config = match result_rx.recv_timeout(Duration::from_secs(5)) {
            Ok(Ok(cfg)) => cfg,
            Ok(Err(e)) => {
                let _ = handle.join();
                return Err(e);
            }
            Err(_) => {
                shutdown.store(false, Ordering::SeqCst);
                return Err(AudioError::Fatal(
                    "Timed out waiting for capture to start".to_string(),
                ));
            }
        };

        Ok((
            Self {
                handle,
                shutdown,
                stats: stats_out,
            },
            device_config,
        ))
    }

    pub fn stop(self) {
        self.shutdown.store(false, Ordering::SeqCst);
        let _ = self.handle.join();
    }
}

struct AudioCapture {
    device_manager: DeviceManager,
    stream: Option<Stream>,
    producer: Arc<Mutex<AudioProducer>>,
    gain: GainControl,
    metrics: Arc<PipelineMetrics>,
    event_tx: tokio::sync::broadcast::Sender<CaptureEvent>,
    config_tx: tokio::sync::broadcast::Sender<DeviceConfig>,
    detector: Arc<Mutex<SilenceDetector>>,
    watchdog: WatchdogTimer,
    stats: Arc<CaptureStats>,
    running: Arc<AtomicBool>,
    restart_needed: Arc<AtomicBool>,
}

impl AudioCapture {
    fn new(
        producer: Arc<Mutex<AudioProducer>>,
        gain: GainControl,
        metrics: Arc<PipelineMetrics>,
        event_tx: tokio::sync::broadcast::Sender<CaptureEvent>,
        config_tx: tokio::sync::broadcast::Sender<DeviceConfig>,
        stats: Arc<CaptureStats>,
        running: Arc<AtomicBool>,
    ) -> Result<Self, AudioError> {
        Ok(Self {
            device_manager: DeviceManager::new()?,
            stream: None,
            producer,
            gain,
            metrics,
            event_tx,
            config_tx,
            detector: Arc::new(Mutex::new(SilenceDetector::default())),
            watchdog: WatchdogTimer::new(Duration::from_secs(5)),
            stats,
            running,
            restart_needed: Arc::new(AtomicBool::new(false)),
        })
    }

    fn start(&mut self, device_name: Option<&str>) -> Result<DeviceConfig, AudioError> {
        let device = self.device_manager.open_input(device_name)?;
        if let Ok(name) = device.name() {
            tracing::info!(
                "Selected input device: {} (host: {:?})",
                name,
                self.device_manager.host_id()
            );
        }

        let (config, sample_format) = negotiate_input_config(&device)?;
        let device_config = DeviceConfig {
            sample_rate: config.sample_rate.0,
            channels: config.channels,
        };
        let _ = self.config_tx.send(device_config.clone());

        let stream = self.build_stream(device, config, sample_format)?;
        stream.play()?;

        self.stream = Some(stream);
        self.watchdog.start(Arc::clone(&self.running));
        Ok(device_config)
    }

    fn build_stream(
        &mut self,
        device: cpal::Device,
        config: StreamConfig,
        sample_format: SampleFormat,
    ) -> Result<Stream, AudioError> {
        let producer = Arc::clone(&self.producer);
        let gain = self.gain.clone();
        let metrics = Arc::clone(&self.metrics);
        let event_tx = self.event_tx.clone();
        let detector = Arc::clone(&self.detector);
        let watchdog = self.watchdog.clone();
        let stats = Arc::clone(&self.stats);
        let running = Arc::clone(&self.running);
        let restart_needed = Arc::clone(&self.restart_needed);

        let err_fn = move |err: cpal::StreamError| {
            tracing::error!("Audio stream error: {}", err);
            restart_needed.store(true, Ordering::SeqCst);
        };

        // Shared tail after format conversion.
        let handle_f32 = move |samples: &mut [f32]| {
            if !running.load(Ordering::SeqCst) {
                return;
            }
            watchdog.feed();
            gain.apply(samples);
            metrics.update_audio_level(samples);

            {
                let mut det = detector.lock();
                let was_silent = det.is_silent();
                if let Some(flag) = det.process(samples) {
                    let _ = event_tx.send(CaptureEvent::SilenceChanged(flag));
                }
                if was_silent {
                    stats.silent_frames.fetch_add(1, Ordering::Relaxed);
                } else {
                    stats.active_frames.fetch_add(1, Ordering::Relaxed);
                }
            }

            if producer.lock().write(samples).is_ok() {
                stats.frames_captured.fetch_add(1, Ordering::Relaxed);
            } else {
                stats.frames_dropped.fetch_add(1, Ordering::Relaxed);
            }
            metrics.increment_capture_frames();
        };

        // Thread-local scratch keeps the callback allocation-free.
        thread_local! {
            static CONVERT_BUFFER: std::cell::RefCell<Vec<f32>> =
                const { std::cell::RefCell::new(Vec::new()) };
        }

        let stream = match sample_format {
            SampleFormat::F32 => device.build_input_stream(
                &config,
                move |data: &[f32], _: &_| {
                    CONVERT_BUFFER.with(|buf| {
                        let mut converted = buf.borrow_mut();
                        converted.clear();
                        converted.extend_from_slice(data);
                        handle_f32(&mut converted);
                    });
                },
                err_fn,
                None,
            )?,
            SampleFormat::I16 => device.build_input_stream(
                &config,
                move |data: &[i16], _: &_| {
                    CONVERT_BUFFER.with(|buf| {
                        let mut converted = buf.borrow_mut();
                        converted.clear();
                        converted.reserve(data.len());
                        for &s in data {
                            converted.push(s as f32 / 32768.0);
                        }
                        handle_f32(&mut converted);
                    });
                },
                err_fn,
                None,
            )?,
            SampleFormat::U16 => device.build_input_stream(
                &config,
                move |data: &[u16], _: &_| {
                    CONVERT_BUFFER.with(|buf| {
                        let mut converted = buf.borrow_mut();
                        converted.clear();
                        converted.reserve(data.len());
                        // Center unsigned [0, 65535] before normalizing.
                        for &s in data {
                            converted.push((s as i32 - 32768) as f32 / 32768.0);
                        }
                        handle_f32(&mut converted);
                    });
                },
                err_fn,
                None,
            )?,
            other => {
                return Err(AudioError::FormatNotSupported {
                    format: format!("{:?}", other),
                });
            }
        };

        Ok(stream)
    }

    fn stop_stream(&mut self) {
        if let Some(stream) = self.stream.take() {
            drop(stream);
        }
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        self.stop_stream();
        self.watchdog.stop();
    }
}

/// Prefer mono at the capture rate; otherwise accept the device default and
/// let the splitter resample/downmix.
fn negotiate_input_config(
    device: &cpal::Device,
) -> Result<(StreamConfig, SampleFormat), AudioError> {
    if let Ok(configs) = device.supported_input_configs() {
        for config in configs {
            if config.channels() == 1
                && config.min_sample_rate() <= SampleRate(CAPTURE_SAMPLE_RATE_HZ)
                && config.max_sample_rate() >= SampleRate(CAPTURE_SAMPLE_RATE_HZ)
            {
                let config = config.with_sample_rate(SampleRate(CAPTURE_SAMPLE_RATE_HZ));
                return Ok((config.config(), config.sample_format()));
            }
        }
    }

    if let Ok(default_config) = device.default_input_config() {
        return Ok((
            StreamConfig {
                channels: default_config.channels(),
                sample_rate: default_config.sample_rate(),
                buffer_size: cpal::BufferSize::Default,
            },
            default_config.sample_format(),
        ));
    }

    Err(AudioError::FormatNotSupported {
        format: "No supported input formats".to_string(),
    })
}
