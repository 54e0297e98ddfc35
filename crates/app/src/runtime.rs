use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use confab_audio::{
    codec, AdaptiveBufferSizer, AudioPipeline, CaptureEvent, DeviceProfile, PipelineConfig,
    PlaybackChunk,
};
use confab_foundation::{AppError, SessionState};
use confab_session::{
    connect_with_retry, RetryPolicy, RetryState, SessionClient, SessionEvent, WsConnector,
    AUDIO_OUTPUT_SAMPLE_RATE_HZ,
};
use confab_telemetry::LatencyTracker;

#[derive(Debug, Clone)]
pub struct RuntimeOptions {
    pub model: String,
    pub endpoint: String,
    pub input_device: Option<String>,
    pub output_device: Option<String>,
    pub target_latency_ms: f64,
    pub calibrate_on_start: bool,
}

enum Flow {
    Continue,
    Stop,
}

/// Composition point: glues pipeline frames into the session client, session
/// audio back into the playback scheduler, and applies the retry policy and
/// buffer-size tuning. Owns every component explicitly.
pub struct VoiceRuntime {
    opts: RuntimeOptions,
    pipeline: AudioPipeline,
    client: SessionClient,
    tracker: Arc<LatencyTracker>,
    sizer: AdaptiveBufferSizer,
    policy: RetryPolicy,
    retry: RetryState,
    /// Set on the first frame sent after the last turn ended; cleared by the
    /// first audio response. Send-to-first-audio is the round trip we tune on.
    turn_started: Option<Instant>,
}

impl VoiceRuntime {
    pub fn new(opts: RuntimeOptions) -> Result<Self, AppError> {
        let profile = DeviceProfile::detect();
        let frame_size = profile.recommended_buffer_size();

        let pipeline = AudioPipeline::new(PipelineConfig {
            frame_size,
            input_device: opts.input_device.clone(),
            output_device: opts.output_device.clone(),
            ..PipelineConfig::default()
        })?;

        let client = SessionClient::new(Arc::new(WsConnector), opts.endpoint.clone());
        let sizer = AdaptiveBufferSizer::new(frame_size, opts.target_latency_ms);

        Ok(Self {
            opts,
            pipeline,
            client,
            tracker: Arc::new(LatencyTracker::new()),
            sizer,
            policy: RetryPolicy::default(),
            retry: RetryState::new(),
            turn_started: None,
        })
    }

    pub fn tracker(&self) -> Arc<LatencyTracker> {
        Arc::clone(&self.tracker)
    }

    /// Run until ctrl-c, the retry budget is exhausted, or a fatal error.
    pub async fn run(mut self) -> Result<(), AppError> {
        self.pipeline.initialize()?;

        if self.opts.calibrate_on_start {
            let gain = self
                .pipeline
                .calibrate_gain(Duration::from_millis(1000))
                .await?;
            info!("Input gain calibrated to x{:.2}", gain);
        }

        let device_config = self.pipeline.start_capture(None)?;
        info!(
            "Capturing at {}Hz, {} channel(s)",
            device_config.sample_rate, device_config.channels
        );

        let mut frames = self.pipeline.subscribe_frames();
        let mut capture_events = self.pipeline.subscribe_events();
        let mut session_events = self.client.subscribe();

        let generation_config = serde_json::json!({ "responseModalities": ["AUDIO"] });
        connect_with_retry(
            &mut self.client,
            &self.opts.model,
            Some(generation_config.clone()),
            &self.policy,
            &mut self.retry,
        )
        .await?;

        let mut status_interval = tokio::time::interval(Duration::from_secs(5));
        status_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        let result = loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("Shutdown requested");
                    break Ok(());
                }
                frame = frames.recv() => match frame {
                    Ok(frame) => self.on_frame(&frame.samples),
                    Err(RecvError::Lagged(n)) => warn!("Dropped {} capture frames (slow consumer)", n),
                    Err(RecvError::Closed) => break Ok(()),
                },
                event = capture_events.recv() => {
                    if let Ok(CaptureEvent::SilenceChanged(silent)) = event {
                        debug!("Silence state: {}", silent);
                    }
                }
                event = session_events.recv() => match event {
                    Ok(event) => match self.on_session_event(event, &generation_config).await {
                        Ok(Flow::Continue) => {}
                        Ok(Flow::Stop) => break Ok(()),
                        Err(e) => break Err(e),
                    },
                    Err(RecvError::Lagged(n)) => warn!("Dropped {} session events", n),
                    Err(RecvError::Closed) => break Ok(()),
                },
                _ = status_interval.tick() => self.log_status(),
            }
        };

        self.client.disconnect().await;
        self.pipeline.shutdown().await;
        result
    }

    fn on_frame(&mut self, samples: &[f32]) {
        let pcm = codec::encode_frame(samples);
        let b64 = codec::encode_base64(&pcm);
        if self.turn_started.is_none() {
            self.turn_started = Some(Instant::now());
        }
        self.client.send_audio(&b64);
    }

    async fn on_session_event(
        &mut self,
        event: SessionEvent,
        generation_config: &serde_json::Value,
    ) -> Result<Flow, AppError> {
        match event {
            SessionEvent::AudioResponse { pcm } => {
                if let Some(t0) = self.turn_started.take() {
                    let ms = t0.elapsed().as_millis() as u32;
                    self.tracker.record_latency(ms);
                    if let Some(new_size) = self.sizer.record_latency(ms as f64) {
                        info!("Retuning frame size to {}", new_size);
                        self.pipeline.set_frame_size(new_size);
                    }
                }
                match codec::decode_pcm(&pcm, 1) {
                    Ok(mut channels) => {
                        let chunk = PlaybackChunk {
                            samples: channels.swap_remove(0),
                            sample_rate: AUDIO_OUTPUT_SAMPLE_RATE_HZ,
                        };
                        if let Err(e) = self.pipeline.schedule_frame(chunk, 1.0, 0.0) {
                            warn!("Failed to schedule playback chunk: {}", e);
                            self.tracker.record_error(e.to_string());
                        }
                    }
                    Err(e) => {
                        // One malformed chunk is dropped; the scheduler's
                        // cursor is untouched.
                        warn!("Dropping malformed audio chunk: {}", e);
                        self.tracker.record_error(e.to_string());
                    }
                }
            }
            SessionEvent::Interrupted => {
                info!("Server signaled interruption; flushing queued playback");
                self.pipeline.reset_playback();
            }
            SessionEvent::TurnComplete => {
                self.turn_started = None;
                debug!("Turn complete");
            }
            SessionEvent::Transcript { text, source } => {
                info!("{}: {}", source, text);
            }
            SessionEvent::Quota { total_tokens } => {
                debug!("Usage: {} tokens", total_tokens);
            }
            SessionEvent::Status { state, detail } => {
                info!("Session {:?}: {}", state, detail.unwrap_or_default());
                if state == SessionState::Failed {
                    return Ok(Flow::Stop);
                }
            }
            SessionEvent::Error { message } => {
                self.tracker.record_error(message);
            }
            SessionEvent::Disconnected => {
                warn!("Session dropped; applying reconnect policy");
                self.tracker.set_fallback(true, Some("reconnecting"));
                match connect_with_retry(
                    &mut self.client,
                    &self.opts.model,
                    Some(generation_config.clone()),
                    &self.policy,
                    &mut self.retry,
                )
                .await
                {
                    Ok(()) => {
                        self.tracker.set_fallback(false, None);
                        self.turn_started = None;
                    }
                    Err(e) => {
                        // Terminal until the user starts a new session.
                        self.tracker.record_error(e.to_string());
                        return Err(AppError::Session(e));
                    }
                }
            }
        }
        Ok(Flow::Continue)
    }

    fn log_status(&self) {
        let snapshot = self.tracker.latest();
        let metrics = self.pipeline.metrics();
        info!(
            "avg_latency={}ms error_rate={}% uptime={}s fallback={} frames={} chunks={}",
            snapshot.avg_latency_ms,
            snapshot.error_rate,
            snapshot.uptime_seconds,
            snapshot.fallback_active,
            metrics
                .splitter_frames
                .load(std::sync::atomic::Ordering::Relaxed),
            metrics
                .playback_chunks
                .load(std::sync::atomic::Ordering::Relaxed),
        );
    }
}
