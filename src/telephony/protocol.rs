//! Telephony media-stream wire protocol.
//!
//! Every frame on the telephony socket is a JSON object tagged by `event`.
//!
//! # Inbound (provider → bridge)
//!
//! - `connected`: socket is up, no payload of interest
//! - `start`: carries `start.streamSid`, the identifier required on every outbound frame
//! - `media`: `media.payload` is base64 μ-law, 8kHz mono
//! - `mark`: echo of a mark we sent, once its audio finished playing
//! - `stop`: the call ended
//!
//! # Outbound (bridge → provider)
//!
//! - `media`: `{"event":"media","streamSid":"MZ..","media":{"payload":"..."}}`
//! - `mark`: `{"event":"mark","streamSid":"MZ..","mark":{"name":"..."}}`
//! - `clear`: `{"event":"clear","streamSid":"MZ.."}` drops queued playback

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Events received from the telephony provider.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum TelephonyEvent {
    Connected {
        #[serde(default)]
        protocol: Option<String>,
        #[serde(default)]
        version: Option<String>,
    },

    Start {
        #[serde(rename = "streamSid", default)]
        stream_sid: Option<String>,
        start: StartMetadata,
    },

    Media {
        media: MediaPayload,
    },

    Mark {
        #[serde(default)]
        mark: Option<MarkPayload>,
    },

    Stop {
        #[serde(rename = "streamSid", default)]
        stream_sid: Option<String>,
    },

    /// Any event name this bridge does not act on (`dtmf`, ...)
    #[serde(other)]
    Unknown,
}

/// Payload of the `start` event.
#[derive(Debug, Clone, Deserialize)]
pub struct StartMetadata {
    #[serde(rename = "streamSid")]
    pub stream_sid: String,

    #[serde(rename = "callSid", default)]
    pub call_sid: Option<String>,

    #[serde(rename = "mediaFormat", default)]
    pub media_format: Option<MediaFormat>,

    /// Provider-defined values, not always strings
    #[serde(rename = "customParameters", default)]
    pub custom_parameters: HashMap<String, serde_json::Value>,
}

/// Audio format announced in `start`.
#[derive(Debug, Clone, Deserialize)]
pub struct MediaFormat {
    #[serde(default)]
    pub encoding: Option<String>,

    #[serde(rename = "sampleRate", default)]
    pub sample_rate: Option<u32>,

    #[serde(default)]
    pub channels: Option<u8>,
}

/// Payload of an inbound `media` event.
#[derive(Debug, Clone, Deserialize)]
pub struct MediaPayload {
    /// Base64 μ-law audio
    pub payload: String,

    /// `inbound` (caller) or `outbound` (our own playback, when both tracks are streamed)
    #[serde(default)]
    pub track: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkPayload {
    pub name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct OutboundMedia {
    pub payload: String,
}

/// Events sent back to the telephony provider.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum OutboundEvent {
    Media {
        #[serde(rename = "streamSid")]
        stream_sid: String,
        media: OutboundMedia,
    },

    Mark {
        #[serde(rename = "streamSid")]
        stream_sid: String,
        mark: MarkPayload,
    },

    Clear {
        #[serde(rename = "streamSid")]
        stream_sid: String,
    },
}

impl OutboundEvent {
    /// Serialize for the socket. Serialization of these plain structs cannot fail
    /// in practice; a failure yields `None` and is logged by the caller.
    pub fn to_json(&self) -> Option<String> {
        serde_json::to_string(self).ok()
    }
}

/// Parse one text frame. Malformed JSON and unknown shapes yield `None`.
pub fn parse_event(text: &str) -> Option<TelephonyEvent> {
    match serde_json::from_str::<TelephonyEvent>(text) {
        Ok(event) => Some(event),
        Err(err) => {
            tracing::debug!(error = %err, "Ignoring malformed telephony frame");
            None
        }
    }
}
