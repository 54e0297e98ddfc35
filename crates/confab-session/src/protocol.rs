//! Wire protocol for the remote bidirectional session.
//!
//! Outbound: a `setup` message on open, then `realtimeInput` media chunks.
//! Inbound: `setupComplete`, `serverContent` (model audio, transcription
//! deltas, interruption/turn signals) and `usageMetadata`.

use serde::{Deserialize, Serialize};

use confab_foundation::SessionError;

/// Media type for microphone audio sent upstream.
pub const AUDIO_INPUT_MIME: &str = "audio/pcm;rate=16000";

/// Synthesized audio arrives at this rate, mono, 16-bit PCM, base64-encoded.
pub const AUDIO_OUTPUT_SAMPLE_RATE_HZ: u32 = 24_000;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SetupMessage {
    pub setup: Setup,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Setup {
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation_config: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInputMessage {
    pub realtime_input: RealtimeInput,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInput {
    pub media: MediaBlob,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaBlob {
    pub mime_type: String,
    pub data: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerMessage {
    pub setup_complete: Option<serde_json::Value>,
    pub server_content: Option<ServerContent>,
    pub usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerContent {
    pub model_turn: Option<ModelTurn>,
    pub input_transcription: Option<Transcription>,
    pub output_transcription: Option<Transcription>,
    pub interrupted: Option<bool>,
    pub turn_complete: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ModelTurn {
    pub parts: Vec<Part>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Part {
    pub inline_data: Option<MediaBlob>,
    pub text: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Transcription {
    pub text: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UsageMetadata {
    pub total_token_count: Option<u64>,
}

/// What a single inbound message means to the client. Each message is
/// classified as exactly one of these.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    SetupComplete,
    Quota { total_tokens: u64 },
    /// Base64 payload of synthesized audio.
    Audio { data: String },
    InputTranscript { text: String },
    OutputTranscript { text: String },
    Interrupted,
    TurnComplete,
}

pub fn setup_json(model: &str, generation_config: Option<serde_json::Value>) -> String {
    let msg = SetupMessage {
        setup: Setup {
            model: model.to_string(),
            generation_config,
        },
    };
    serde_json::to_string(&msg).unwrap_or_default()
}

pub fn realtime_audio_json(base64_pcm: &str) -> String {
    let msg = RealtimeInputMessage {
        realtime_input: RealtimeInput {
            media: MediaBlob {
                mime_type: AUDIO_INPUT_MIME.to_string(),
                data: base64_pcm.to_string(),
            },
        },
    };
    serde_json::to_string(&msg).unwrap_or_default()
}

pub fn parse_server_message(raw: &str) -> Result<ServerMessage, SessionError> {
    serde_json::from_str(raw).map_err(|e| SessionError::Protocol(e.to_string()))
}

/// Classify an inbound message. `None` means the message carried nothing
/// this client acts on (e.g. an empty keep-alive).
pub fn classify(msg: &ServerMessage) -> Option<InboundEvent> {
    if msg.setup_complete.is_some() {
        return Some(InboundEvent::SetupComplete);
    }
    if let Some(usage) = &msg.usage_metadata {
        return Some(InboundEvent::Quota {
            total_tokens: usage.total_token_count.unwrap_or(0),
        });
    }
    if let Some(content) = &msg.server_content {
        if content.interrupted == Some(true) {
            return Some(InboundEvent::Interrupted);
        }
        if content.turn_complete == Some(true) {
            return Some(InboundEvent::TurnComplete);
        }
        if let Some(turn) = &content.model_turn {
            if let Some(blob) = turn.parts.iter().find_map(|p| p.inline_data.as_ref()) {
                return Some(InboundEvent::Audio {
                    data: blob.data.clone(),
                });
            }
        }
        if let Some(t) = &content.input_transcription {
            return Some(InboundEvent::InputTranscript {
                text: t.text.clone(),
            });
        }
        if let Some(t) = &content.output_transcription {
            return Some(InboundEvent::OutputTranscript {
                text: t.text.clone(),
            });
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn setup_message_serializes_camel_case() {
        let json = setup_json("models/demo-live", None);
        assert_eq!(json, r#"{"setup":{"model":"models/demo-live"}}"#);

        let json = setup_json(
            "models/demo-live",
            Some(serde_json::json!({"responseModalities": ["AUDIO"]})),
        );
        assert!(json.contains(r#""generationConfig""#));
    }

    #[test]
    fn realtime_input_carries_the_pcm_mime() {
        let json = realtime_audio_json("AAAA");
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(
            value["realtimeInput"]["media"]["mimeType"],
            "audio/pcm;rate=16000"
        );
        assert_eq!(value["realtimeInput"]["media"]["data"], "AAAA");
    }

    #[test]
    fn classifies_inline_audio() {
        let msg = parse_server_message(
            r#"{"serverContent":{"modelTurn":{"parts":[{"inlineData":{"mimeType":"audio/pcm;rate=24000","data":"UEsD"}}]}}}"#,
        )
        .unwrap();
        assert_eq!(
            classify(&msg),
            Some(InboundEvent::Audio {
                data: "UEsD".into()
            })
        );
    }

    #[test]
    fn classifies_transcription_deltas_by_direction() {
        let msg = parse_server_message(
            r#"{"serverContent":{"inputTranscription":{"text":"hel"}}}"#,
        )
        .unwrap();
        assert_eq!(
            classify(&msg),
            Some(InboundEvent::InputTranscript { text: "hel".into() })
        );

        let msg = parse_server_message(
            r#"{"serverContent":{"outputTranscription":{"text":"hi"}}}"#,
        )
        .unwrap();
        assert_eq!(
            classify(&msg),
            Some(InboundEvent::OutputTranscript { text: "hi".into() })
        );
    }

    #[test]
    fn classifies_control_signals_and_quota() {
        let msg = parse_server_message(r#"{"serverContent":{"interrupted":true}}"#).unwrap();
        assert_eq!(classify(&msg), Some(InboundEvent::Interrupted));

        let msg = parse_server_message(r#"{"serverContent":{"turnComplete":true}}"#).unwrap();
        assert_eq!(classify(&msg), Some(InboundEvent::TurnComplete));

        let msg =
            parse_server_message(r#"{"usageMetadata":{"totalTokenCount":1234}}"#).unwrap();
        assert_eq!(
            classify(&msg),
            Some(InboundEvent::Quota { total_tokens: 1234 })
        );

        let msg = parse_server_message(r#"{"setupComplete":{}}"#).unwrap();
        assert_eq!(classify(&msg), Some(InboundEvent::SetupComplete));
    }

    #[test]
    fn empty_or_unknown_messages_classify_to_none() {
        let msg = parse_server_message(r#"{}"#).unwrap();
        assert_eq!(classify(&msg), None);

        let msg = parse_server_message(r#"{"somethingElse":{"x":1}}"#).unwrap();
        assert_eq!(classify(&msg), None);
    }

    #[test]
    fn malformed_json_is_a_protocol_error() {
        assert!(matches!(
            parse_server_message("{nope"),
            Err(SessionError::Protocol(_))
        ));
    }
}
