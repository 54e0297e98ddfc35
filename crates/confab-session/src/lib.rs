pub mod client;
pub mod generate;
pub mod protocol;
pub mod reconnect;
pub mod transcript;
pub mod transport;

pub use client::{SessionClient, SessionEvent};
pub use generate::TextGenerator;
pub use protocol::{InboundEvent, AUDIO_INPUT_MIME, AUDIO_OUTPUT_SAMPLE_RATE_HZ};
pub use reconnect::{connect_with_retry, RetryDecision, RetryPolicy, RetryState};
pub use transcript::{Speaker, TranscriptEntry, TranscriptLog};
pub use transport::{SessionConnector, SessionTransport, WsConnector};
