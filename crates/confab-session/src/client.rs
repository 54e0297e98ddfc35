use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use confab_foundation::{SessionError, SessionState, SessionStateCell};

use crate::protocol::{self, InboundEvent};
use crate::transcript::{Speaker, TranscriptLog};
use crate::transport::{SessionConnector, SessionTransport};

/// Everything consumers (orchestrator, UI) learn from the session.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    Status {
        state: SessionState,
        detail: Option<String>,
    },
    Error {
        message: String,
    },
    /// The live session dropped; the orchestrator decides whether to retry.
    Disconnected,
    /// Decoded 16-bit PCM bytes of synthesized speech (24 kHz mono).
    AudioResponse {
        pcm: Vec<u8>,
    },
    Transcript {
        text: String,
        source: Speaker,
    },
    Interrupted,
    TurnComplete,
    Quota {
        total_tokens: u64,
    },
}

enum Command {
    Audio(String),
    Close,
}

/// Protocol state machine over one remote conversational session.
///
/// The client surfaces failures and disconnects as events but never retries
/// on its own; the retry policy lives with the caller so the state machine
/// stays timing-agnostic and testable.
pub struct SessionClient {
    connector: Arc<dyn SessionConnector>,
    endpoint: String,
    state: Arc<SessionStateCell>,
    events_tx: broadcast::Sender<SessionEvent>,
    transcript: Arc<Mutex<TranscriptLog>>,
    cmd_tx: Option<mpsc::Sender<Command>>,
    run_handle: Option<JoinHandle<()>>,
    /// Bumped by `disconnect` so a connect still in flight can detect that
    /// its result is no longer wanted.
    intent_epoch: Arc<AtomicU64>,
}

impl SessionClient {
    pub fn new(connector: Arc<dyn SessionConnector>, endpoint: impl Into<String>) -> Self {
        let (events_tx, _) = broadcast::channel(128);
        Self {
            connector,
            endpoint: endpoint.into(),
            state: Arc::new(SessionStateCell::new()),
            events_tx,
            transcript: Arc::new(Mutex::new(TranscriptLog::new())),
            cmd_tx: None,
            run_handle: None,
            intent_epoch: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state.current()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events_tx.subscribe()
    }

    pub fn transcript_lines(&self) -> Vec<String> {
        self.transcript.lock().rendered()
    }

    /// Emit a status event carrying the current state; used for UI strings
    /// like the countdown-to-retry indicator.
    pub fn notify_status(&self, detail: impl Into<String>) {
        let _ = self.events_tx.send(SessionEvent::Status {
            state: self.state.current(),
            detail: Some(detail.into()),
        });
    }

    /// Dial the endpoint, run the setup handshake, and start the session
    /// loop. One failed attempt is one `Err`; the caller owns retries.
    pub async fn connect(
        &mut self,
        model: &str,
        generation_config: Option<serde_json::Value>,
    ) -> Result<(), SessionError> {
        self.state.transition(SessionState::Connecting)?;
        let epoch = self.intent_epoch.load(Ordering::SeqCst);

        let mut transport = match self.connector.connect(&self.endpoint).await {
            Ok(t) => t,
            Err(e) => {
                return Err(self.fail_attempt(e));
            }
        };

        if let Err(e) = transport
            .send_text(protocol::setup_json(model, generation_config))
            .await
        {
            return Err(self.fail_attempt(e));
        }

        match transport.next_message().await {
            Some(Ok(raw)) => {
                let msg = match protocol::parse_server_message(&raw) {
                    Ok(msg) => msg,
                    Err(e) => return Err(self.fail_attempt(e)),
                };
                if protocol::classify(&msg) != Some(InboundEvent::SetupComplete) {
                    return Err(self.fail_attempt(SessionError::Handshake(
                        "expected setupComplete".to_string(),
                    )));
                }
            }
            Some(Err(e)) => return Err(self.fail_attempt(e)),
            None => {
                return Err(self.fail_attempt(SessionError::Handshake(
                    "remote closed during setup".to_string(),
                )))
            }
        }

        // The caller may have torn the client down while we were dialing; a
        // late success must not reopen a session nobody wants.
        if self.intent_epoch.load(Ordering::SeqCst) != epoch {
            tracing::debug!("Discarding connect that completed after disconnect");
            transport.close().await;
            return Ok(());
        }

        self.state.transition(SessionState::Open)?;
        let _ = self.events_tx.send(SessionEvent::Status {
            state: SessionState::Open,
            detail: Some("connected".to_string()),
        });

        let (cmd_tx, cmd_rx) = mpsc::channel(64);
        self.cmd_tx = Some(cmd_tx);
        self.run_handle = Some(tokio::spawn(run_session(
            transport,
            cmd_rx,
            Arc::clone(&self.state),
            self.events_tx.clone(),
            Arc::clone(&self.transcript),
        )));
        Ok(())
    }

    /// Send one base64-encoded PCM frame upstream. A frame offered while the
    /// session is not open is dropped, not queued: audio is latency-
    /// sensitive, and a transcript gap beats stale backlog replay.
    pub fn send_audio(&self, base64_pcm: &str) {
        if self.state.current() != SessionState::Open {
            tracing::debug!("Dropping audio frame: session not open");
            return;
        }
        if let Some(tx) = &self.cmd_tx {
            if tx
                .try_send(Command::Audio(protocol::realtime_audio_json(base64_pcm)))
                .is_err()
            {
                tracing::debug!("Dropping audio frame: session loop busy");
            }
        }
    }

    /// Tear the session down without triggering any reconnect. Safe to call
    /// repeatedly and while a connect is still pending.
    pub async fn disconnect(&mut self) {
        self.intent_epoch.fetch_add(1, Ordering::SeqCst);

        if let Some(tx) = self.cmd_tx.take() {
            let _ = tx.send(Command::Close).await;
        }
        if let Some(handle) = self.run_handle.take() {
            let _ = handle.await;
        }

        if self.state.current() != SessionState::Closed {
            if let Err(e) = self.state.transition(SessionState::Closed) {
                tracing::debug!("Ignoring close transition error: {}", e);
            }
            let _ = self.events_tx.send(SessionEvent::Status {
                state: SessionState::Closed,
                detail: Some("disconnected".to_string()),
            });
        }
    }

    /// Mark the retry budget as exhausted; only an explicit new `connect`
    /// leaves this state.
    pub fn mark_failed(&self) {
        if let Err(e) = self.state.transition(SessionState::Failed) {
            tracing::debug!("Ignoring failed-state transition error: {}", e);
        }
        let _ = self.events_tx.send(SessionEvent::Status {
            state: SessionState::Failed,
            detail: Some("retry budget exhausted".to_string()),
        });
    }

    fn fail_attempt(&self, error: SessionError) -> SessionError {
        let _ = self.events_tx.send(SessionEvent::Error {
            message: error.to_string(),
        });
        if let Err(e) = self.state.transition(SessionState::Reconnecting) {
            tracing::debug!("Ignoring transition error after failed attempt: {}", e);
        }
        error
    }
}

/// Owns the live transport: pumps outbound commands and classifies inbound
/// messages until close or failure.
async fn run_session(
    mut transport: Box<dyn SessionTransport>,
    mut cmd_rx: mpsc::Receiver<Command>,
    state: Arc<SessionStateCell>,
    events_tx: broadcast::Sender<SessionEvent>,
    transcript: Arc<Mutex<TranscriptLog>>,
) {
    let disconnected = loop {
        tokio::select! {
            cmd = cmd_rx.recv() => match cmd {
                Some(Command::Audio(payload)) => {
                    if let Err(e) = transport.send_text(payload).await {
                        let _ = events_tx.send(SessionEvent::Error {
                            message: e.to_string(),
                        });
                        break true;
                    }
                }
                Some(Command::Close) | None => {
                    transport.close().await;
                    break false;
                }
            },
            msg = transport.next_message() => match msg {
                Some(Ok(raw)) => {
                    handle_inbound(&raw, &events_tx, &transcript);
                }
                Some(Err(e)) => {
                    let _ = events_tx.send(SessionEvent::Error {
                        message: e.to_string(),
                    });
                    break true;
                }
                None => {
                    tracing::info!("Remote closed the session");
                    break true;
                }
            },
        }
    };

    if disconnected && state.current() == SessionState::Open {
        if let Err(e) = state.transition(SessionState::Reconnecting) {
            tracing::debug!("Ignoring transition error on disconnect: {}", e);
        }
        let _ = events_tx.send(SessionEvent::Disconnected);
    }
}

fn handle_inbound(
    raw: &str,
    events_tx: &broadcast::Sender<SessionEvent>,
    transcript: &Arc<Mutex<TranscriptLog>>,
) {
    let msg = match protocol::parse_server_message(raw) {
        Ok(msg) => msg,
        Err(e) => {
            tracing::warn!("Dropping malformed server message: {}", e);
            let _ = events_tx.send(SessionEvent::Error {
                message: e.to_string(),
            });
            return;
        }
    };

    let event = match protocol::classify(&msg) {
        Some(event) => event,
        None => return,
    };

    match event {
        InboundEvent::SetupComplete => {
            tracing::debug!("Ignoring duplicate setupComplete");
        }
        InboundEvent::Quota { total_tokens } => {
            let _ = events_tx.send(SessionEvent::Quota { total_tokens });
        }
        InboundEvent::Audio { data } => match BASE64.decode(&data) {
            Ok(pcm) => {
                let _ = events_tx.send(SessionEvent::AudioResponse { pcm });
            }
            Err(e) => {
                // One bad payload must not take the session down.
                tracing::warn!("Dropping undecodable audio payload: {}", e);
                let _ = events_tx.send(SessionEvent::Error {
                    message: format!("undecodable audio payload: {e}"),
                });
            }
        },
        InboundEvent::InputTranscript { text } => {
            transcript.lock().push_delta(Speaker::User, &text);
            let _ = events_tx.send(SessionEvent::Transcript {
                text,
                source: Speaker::User,
            });
        }
        InboundEvent::OutputTranscript { text } => {
            transcript.lock().push_delta(Speaker::Model, &text);
            let _ = events_tx.send(SessionEvent::Transcript {
                text,
                source: Speaker::Model,
            });
        }
        InboundEvent::Interrupted => {
            let _ = events_tx.send(SessionEvent::Interrupted);
        }
        InboundEvent::TurnComplete => {
            let _ = events_tx.send(SessionEvent::TurnComplete);
        }
    }
}
