//! Realtime speech model wire protocol.
//!
//! Every frame is a JSON object tagged by `type`. Only the events the bridge
//! acts on are modelled; everything else deserializes to `ServerEvent::Unknown`.
//!
//! # Session flow
//!
//! 1. Connect to `{base_url}?model={model}` with bearer and beta headers
//! 2. Send `session.update` (voice, instructions, pcm16 both ways, server VAD)
//! 3. Send `response.create` so the model greets the caller first
//! 4. Stream caller audio via `input_audio_buffer.append`
//! 5. Receive synthesized audio via `response.audio.delta`

use crate::config::RealtimeConfig;
use serde::{Deserialize, Serialize};

/// Audio format used in both directions.
pub const PCM16_FORMAT: &str = "pcm16";

/// Session settings sent in `session.update`.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSettings {
    pub modalities: Vec<String>,
    pub instructions: String,
    pub voice: String,
    pub input_audio_format: String,
    pub output_audio_format: String,
    pub turn_detection: TurnDetection,
}

/// Server-side voice activity detection settings.
#[derive(Debug, Clone, Serialize)]
pub struct TurnDetection {
    #[serde(rename = "type")]
    pub detection_type: String,
    pub threshold: f32,
    pub prefix_padding_ms: u32,
    pub silence_duration_ms: u32,
}

/// Parameters of a `response.create`.
#[derive(Debug, Clone, Serialize)]
pub struct ResponseSettings {
    pub modalities: Vec<String>,
    pub instructions: String,
}

/// Messages sent to the model.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    #[serde(rename = "session.update")]
    SessionUpdate { session: SessionSettings },

    #[serde(rename = "response.create")]
    ResponseCreate { response: ResponseSettings },

    /// Base64 PCM16 caller audio at the upstream rate
    #[serde(rename = "input_audio_buffer.append")]
    InputAudioBufferAppend { audio: String },
}

impl ClientEvent {
    /// `session.update` built from configuration.
    pub fn session_update(config: &RealtimeConfig) -> Self {
        Self::SessionUpdate {
            session: SessionSettings {
                modalities: config.modalities.clone(),
                instructions: config.instructions.clone(),
                voice: config.voice.clone(),
                input_audio_format: PCM16_FORMAT.to_string(),
                output_audio_format: PCM16_FORMAT.to_string(),
                turn_detection: TurnDetection {
                    detection_type: "server_vad".to_string(),
                    threshold: config.vad_threshold,
                    prefix_padding_ms: config.vad_prefix_padding_ms,
                    silence_duration_ms: config.vad_silence_duration_ms,
                },
            },
        }
    }

    /// Initial `response.create` carrying the greeting instruction.
    pub fn greeting(config: &RealtimeConfig) -> Self {
        Self::ResponseCreate {
            response: ResponseSettings {
                modalities: config.modalities.clone(),
                instructions: config.greeting.clone(),
            },
        }
    }

    pub fn audio_append(audio: String) -> Self {
        Self::InputAudioBufferAppend { audio }
    }

    /// Event name, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            ClientEvent::SessionUpdate { .. } => "session.update",
            ClientEvent::ResponseCreate { .. } => "response.create",
            ClientEvent::InputAudioBufferAppend { .. } => "input_audio_buffer.append",
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SessionInfo {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub model: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ErrorInfo {
    #[serde(rename = "type", default)]
    pub error_type: String,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResponseInfo {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub status: String,
}

/// Messages received from the model.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    #[serde(rename = "session.created")]
    SessionCreated {
        #[serde(default)]
        session: SessionInfo,
    },

    #[serde(rename = "session.updated")]
    SessionUpdated {
        #[serde(default)]
        session: SessionInfo,
    },

    /// Chunk of synthesized speech, base64 PCM16 at the upstream rate
    #[serde(rename = "response.audio.delta", alias = "response.output_audio.delta")]
    AudioDelta {
        #[serde(alias = "audio")]
        delta: String,
    },

    /// Chunk of text or transcript
    #[serde(
        rename = "response.text.delta",
        alias = "response.audio_transcript.delta",
        alias = "response.output_text.delta",
        alias = "response.output_audio_transcript.delta"
    )]
    TextDelta {
        #[serde(default)]
        delta: String,
    },

    #[serde(rename = "response.done")]
    ResponseDone {
        #[serde(default)]
        response: ResponseInfo,
    },

    /// Server VAD heard the caller start speaking
    #[serde(rename = "input_audio_buffer.speech_started")]
    SpeechStarted,

    #[serde(rename = "error")]
    Error {
        #[serde(default)]
        error: ErrorInfo,
    },

    #[serde(other)]
    Unknown,
}

/// Parse one text frame. Malformed JSON yields `None`.
pub fn parse_server_event(text: &str) -> Option<ServerEvent> {
    match serde_json::from_str::<ServerEvent>(text) {
        Ok(event) => Some(event),
        Err(err) => {
            tracing::debug!(error = %err, "Ignoring malformed model frame");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;

    #[test]
    fn test_session_update_shape() {
        let config = AppConfig::default().realtime;
        let value = serde_json::to_value(ClientEvent::session_update(&config)).unwrap();

        assert_eq!(value["type"], "session.update");
        assert_eq!(value["session"]["modalities"], serde_json::json!(["audio"]));
        assert_eq!(value["session"]["voice"], "alloy");
        assert_eq!(value["session"]["input_audio_format"], "pcm16");
        assert_eq!(value["session"]["output_audio_format"], "pcm16");
        assert_eq!(value["session"]["turn_detection"]["type"], "server_vad");
        assert_eq!(value["session"]["turn_detection"]["threshold"], 0.5);
        assert_eq!(value["session"]["turn_detection"]["prefix_padding_ms"], 300);
        assert_eq!(value["session"]["turn_detection"]["silence_duration_ms"], 500);
    }

    #[test]
    fn test_greeting_and_append_shape() {
        let config = AppConfig::default().realtime;
        let value = serde_json::to_value(ClientEvent::greeting(&config)).unwrap();
        assert_eq!(value["type"], "response.create");
        assert_eq!(value["response"]["instructions"], config.greeting.as_str());

        let value = serde_json::to_value(ClientEvent::audio_append("AAA=".to_string())).unwrap();
        assert_eq!(value, serde_json::json!({"type": "input_audio_buffer.append", "audio": "AAA="}));
    }

    #[test]
    fn test_audio_delta_variants() {
        for json in [
            r#"{"type":"response.audio.delta","response_id":"r1","delta":"AAA="}"#,
            r#"{"type":"response.output_audio.delta","delta":"AAA="}"#,
            r#"{"type":"response.output_audio.delta","audio":"AAA="}"#,
        ] {
            match parse_server_event(json) {
                Some(ServerEvent::AudioDelta { delta }) => assert_eq!(delta, "AAA="),
                other => panic!("expected audio delta for {}, got {:?}", json, other),
            }
        }
    }

    #[test]
    fn test_text_delta_variants() {
        for kind in [
            "response.text.delta",
            "response.audio_transcript.delta",
            "response.output_text.delta",
            "response.output_audio_transcript.delta",
        ] {
            let json = format!(r#"{{"type":"{}","delta":"hi"}}"#, kind);
            assert!(
                matches!(parse_server_event(&json), Some(ServerEvent::TextDelta { ref delta }) if delta == "hi"),
                "{}",
                kind
            );
        }
    }

    #[test]
    fn test_control_events() {
        assert!(matches!(
            parse_server_event(r#"{"type":"response.done","response":{"id":"r1","status":"completed"}}"#),
            Some(ServerEvent::ResponseDone { .. })
        ));
        assert!(matches!(
            parse_server_event(r#"{"type":"input_audio_buffer.speech_started","audio_start_ms":10}"#),
            Some(ServerEvent::SpeechStarted)
        ));
        match parse_server_event(r#"{"type":"error","error":{"type":"invalid_request_error","message":"bad"}}"#) {
            Some(ServerEvent::Error { error }) => {
                assert_eq!(error.error_type, "invalid_request_error");
                assert_eq!(error.message, "bad");
            }
            other => panic!("expected error, got {:?}", other),
        }
        assert!(matches!(
            parse_server_event(r#"{"type":"session.created","session":{"id":"sess_1"}}"#),
            Some(ServerEvent::SessionCreated { .. })
        ));
    }

    #[test]
    fn test_unknown_and_malformed() {
        assert!(matches!(
            parse_server_event(r#"{"type":"rate_limits.updated","rate_limits":[]}"#),
            Some(ServerEvent::Unknown)
        ));
        assert!(parse_server_event("{not json").is_none());
        assert!(parse_server_event(r#"{"type":"response.audio.delta"}"#).is_none());
    }
}
