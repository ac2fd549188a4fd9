//! # Telephony Link
//!
//! Protocol state for one telephony media-stream socket.
//!
//! ## State Machine:
//! ```text
//! AwaitingStart --start--> Active --stop--> Stopped
//!       \_____________________stop______________/
//! ```
//!
//! The stream identifier from the first `start` is kept for the life of the
//! call. A repeated `start` is ignored rather than overwriting it, because
//! frames already queued at the provider are addressed to the first stream.
//!
//! This type does no I/O: it turns inbound frames into `TelephonyInput`s and
//! builds outbound frames, and the socket owner decides what to do with them.

use crate::audio::codec;
use crate::telephony::protocol::{
    parse_event, MarkPayload, OutboundEvent, OutboundMedia, TelephonyEvent,
};
use tracing::{debug, info, trace, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    AwaitingStart,
    Active,
    Stopped,
}

impl LinkState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkState::AwaitingStart => "awaiting_start",
            LinkState::Active => "active",
            LinkState::Stopped => "stopped",
        }
    }
}

/// What an inbound frame means for the rest of the bridge.
#[derive(Debug, Clone, PartialEq)]
pub enum TelephonyInput {
    /// First `start`: the stream identifier is now known
    Started { stream_sid: String },

    /// Caller audio, already base64-decoded μ-law
    CallerAudio(Vec<u8>),

    /// Playback of a previously sent mark has finished
    MarkAcknowledged(String),

    /// The provider ended the stream
    Stopped,

    /// Nothing to do (malformed frame, duplicate start, unknown event, ...)
    Ignored,
}

#[derive(Debug)]
pub struct TelephonyLink {
    state: LinkState,
    stream_sid: Option<String>,
}

impl Default for TelephonyLink {
    fn default() -> Self {
        Self::new()
    }
}

impl TelephonyLink {
    pub fn new() -> Self {
        Self {
            state: LinkState::AwaitingStart,
            stream_sid: None,
        }
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn stream_sid(&self) -> Option<&str> {
        self.stream_sid.as_deref()
    }

    /// Parse and apply one inbound text frame.
    pub fn handle_text(&mut self, text: &str) -> TelephonyInput {
        match parse_event(text) {
            Some(event) => self.handle_event(event),
            None => TelephonyInput::Ignored,
        }
    }

    /// Apply one parsed inbound event.
    pub fn handle_event(&mut self, event: TelephonyEvent) -> TelephonyInput {
        match event {
            TelephonyEvent::Connected { protocol, version } => {
                debug!(?protocol, ?version, "Telephony stream connected");
                TelephonyInput::Ignored
            }
            TelephonyEvent::Start { stream_sid: envelope_sid, start } => {
                if let Some(existing) = &self.stream_sid {
                    warn!(
                        stream_sid = %existing,
                        ignored_stream_sid = %start.stream_sid,
                        "Duplicate start event ignored"
                    );
                    return TelephonyInput::Ignored;
                }
                if self.state == LinkState::Stopped {
                    warn!(stream_sid = %start.stream_sid, "Start after stop ignored");
                    return TelephonyInput::Ignored;
                }
                if let Some(envelope_sid) = envelope_sid.filter(|sid| *sid != start.stream_sid) {
                    warn!(
                        envelope_stream_sid = %envelope_sid,
                        stream_sid = %start.stream_sid,
                        "Start envelope and payload disagree on stream id; using payload"
                    );
                }

                let format = start.media_format.as_ref();
                info!(
                    stream_sid = %start.stream_sid,
                    provider_call_sid = ?start.call_sid,
                    encoding = ?format.and_then(|f| f.encoding.as_deref()),
                    sample_rate = ?format.and_then(|f| f.sample_rate),
                    channels = ?format.and_then(|f| f.channels),
                    custom_parameters = start.custom_parameters.len(),
                    "Telephony stream started"
                );

                self.state = LinkState::Active;
                self.stream_sid = Some(start.stream_sid.clone());
                TelephonyInput::Started { stream_sid: start.stream_sid }
            }
            TelephonyEvent::Media { media } => {
                if self.state == LinkState::Stopped {
                    return TelephonyInput::Ignored;
                }
                if media.track.as_deref() == Some("outbound") {
                    return TelephonyInput::Ignored;
                }
                match codec::decode_base64_mulaw(&media.payload) {
                    Ok(bytes) if bytes.is_empty() => TelephonyInput::Ignored,
                    Ok(bytes) => {
                        trace!(bytes = bytes.len(), "Caller audio received");
                        TelephonyInput::CallerAudio(bytes)
                    }
                    Err(err) => {
                        warn!(error = %err, "Dropping undecodable caller audio");
                        TelephonyInput::Ignored
                    }
                }
            }
            TelephonyEvent::Mark { mark } => match mark {
                Some(MarkPayload { name }) => {
                    debug!(mark = %name, "Playback mark acknowledged");
                    TelephonyInput::MarkAcknowledged(name)
                }
                None => TelephonyInput::Ignored,
            },
            TelephonyEvent::Stop { stream_sid } => {
                if self.state == LinkState::Stopped {
                    return TelephonyInput::Ignored;
                }
                info!(stream_sid = ?stream_sid, "Telephony stream stopped");
                self.state = LinkState::Stopped;
                TelephonyInput::Stopped
            }
            TelephonyEvent::Unknown => TelephonyInput::Ignored,
        }
    }

    /// Build an outbound `media` frame from one base64-encoded audio frame.
    ///
    /// Returns `None` (and logs) while the stream identifier is unknown or after stop.
    pub fn media_message(&self, payload: String) -> Option<String> {
        let stream_sid = self.outbound_stream_sid("media")?;
        OutboundEvent::Media {
            stream_sid,
            media: OutboundMedia { payload },
        }
        .to_json()
    }

    /// Build an outbound `mark` frame.
    pub fn mark_message(&self, name: &str) -> Option<String> {
        let stream_sid = self.outbound_stream_sid("mark")?;
        OutboundEvent::Mark {
            stream_sid,
            mark: MarkPayload { name: name.to_string() },
        }
        .to_json()
    }

    /// Build an outbound `clear` frame.
    pub fn clear_message(&self) -> Option<String> {
        let stream_sid = self.outbound_stream_sid("clear")?;
        OutboundEvent::Clear { stream_sid }.to_json()
    }

    fn outbound_stream_sid(&self, kind: &str) -> Option<String> {
        if self.state == LinkState::Stopped {
            trace!(kind, "Outbound frame after stop dropped");
            return None;
        }
        match &self.stream_sid {
            Some(sid) => Some(sid.clone()),
            None => {
                debug!(kind, "Outbound frame dropped: stream id not known yet");
                None
            }
        }
    }
}
