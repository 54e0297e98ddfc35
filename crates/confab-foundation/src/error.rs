use thiserror::Error;

use crate::state::SessionState;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Audio subsystem error: {0}")]
    Audio(#[from] AudioError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Fatal error, cannot recover: {0}")]
    Fatal(String),
}

#[derive(Error, Debug)]
pub enum AudioError {
    #[error("Audio pipeline not initialized")]
    NotInitialized,

    #[error("Audio host initialization failed: {0}")]
    Init(String),

    #[error("Microphone permission denied: {0}")]
    PermissionDenied(String),

    #[error("Device unavailable: {name:?}")]
    DeviceUnavailable { name: Option<String> },

    #[error("Format not supported: {format}")]
    FormatNotSupported { format: String },

    #[error("Buffer overflow, dropped {count} samples")]
    BufferOverflow { count: usize },

    #[error("Malformed audio payload: {0}")]
    Codec(String),

    #[error("CPAL error: {0}")]
    Cpal(#[from] cpal::StreamError),

    #[error("Build stream error: {0}")]
    BuildStream(#[from] cpal::BuildStreamError),

    #[error("Play stream error: {0}")]
    PlayStream(#[from] cpal::PlayStreamError),

    #[error("Supported stream configs error: {0}")]
    SupportedStreamConfigs(#[from] cpal::SupportedStreamConfigsError),

    #[error("Fatal error, cannot recover: {0}")]
    Fatal(String),
}

impl AudioError {
    /// Whether the error is a user-actionable device problem that must not be
    /// retried automatically (retry is a user decision, not a pipeline one).
    pub fn is_user_actionable(&self) -> bool {
        matches!(
            self,
            AudioError::PermissionDenied(_) | AudioError::DeviceUnavailable { .. }
        )
    }
}

#[derive(Error, Debug, Clone)]
pub enum SessionError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Session handshake failed: {0}")]
    Handshake(String),

    #[error("Remote closed the session")]
    RemoteClosed,

    #[error("Invalid state transition: {from:?} -> {to:?}")]
    InvalidTransition { from: SessionState, to: SessionState },

    #[error("Retry budget exhausted after {attempts} attempts")]
    RetryExhausted { attempts: u32 },

    #[error("Malformed server message: {0}")]
    Protocol(String),
}
