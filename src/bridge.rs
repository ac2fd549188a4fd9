//! # Call Bridge
//!
//! Per-call dispatcher between the telephony socket and the model link.
//!
//! The bridge performs no I/O. Each inbound event is turned into an ordered
//! list of `BridgeAction`s which the socket actor executes. This keeps every
//! routing rule (buffering before `start`, barge-in, teardown) testable
//! without sockets.
//!
//! ## Data Flow:
//! ```text
//! model audio delta -> decode PCM16 -> decimate -> μ-law -> 160-byte frames -> caller
//! caller media      -> μ-law decode -> upsample -> PCM16  -> input_audio_buffer.append
//! ```
//!
//! ## Teardown:
//! `teardown()` is the single exit path for both sides. The first call yields
//! `[CloseModel, CloseCaller]`; after that the bridge produces nothing at all.

use crate::audio::{self, framing, PendingAudio, MULAW_FRAME_BYTES};
use crate::config::AppConfig;
use crate::realtime::{ClientEvent, ServerEvent};
use crate::session::{CallSession, SessionStats};
use crate::telephony::{TelephonyInput, TelephonyLink};
use tracing::{debug, info, trace, warn};

/// Side effect requested by the bridge.
#[derive(Debug, Clone)]
pub enum BridgeAction {
    /// Text frame for the telephony socket
    SendToCaller(String),
    /// Event for the model link
    SendToModel(ClientEvent),
    CloseModel,
    CloseCaller,
}

/// The parts of `AppConfig` a bridge needs.
#[derive(Debug, Clone)]
pub struct BridgeSettings {
    pub upstream_sample_rate: u32,
    pub telephony_sample_rate: u32,
    pub pending_audio_bytes: usize,
    pub forward_caller_audio: bool,
    pub barge_in: bool,
}

impl From<&AppConfig> for BridgeSettings {
    fn from(config: &AppConfig) -> Self {
        Self {
            upstream_sample_rate: config.audio.upstream_sample_rate,
            telephony_sample_rate: config.audio.telephony_sample_rate,
            pending_audio_bytes: config.pending_audio_bytes(),
            forward_caller_audio: config.bridge.forward_caller_audio,
            barge_in: config.bridge.barge_in,
        }
    }
}

pub struct CallBridge {
    settings: BridgeSettings,
    session: CallSession,
    telephony: TelephonyLink,
    pending: PendingAudio,
    model_connected: bool,
}

impl CallBridge {
    pub fn new(call_sid: impl Into<String>, settings: BridgeSettings) -> Self {
        let pending = PendingAudio::new(settings.pending_audio_bytes, settings.telephony_sample_rate);
        Self {
            session: CallSession::new(call_sid),
            telephony: TelephonyLink::new(),
            pending,
            model_connected: false,
            settings,
        }
    }

    pub fn session(&self) -> &CallSession {
        &self.session
    }

    pub fn stats(&self) -> &SessionStats {
        &self.session.stats
    }

    pub fn telephony(&self) -> &TelephonyLink {
        &self.telephony
    }

    pub fn is_torn_down(&self) -> bool {
        self.session.is_ended()
    }

    /// The model link is up; caller audio may now be forwarded.
    pub fn on_model_connected(&mut self) {
        if self.session.is_ended() {
            return;
        }
        self.model_connected = true;
        self.session.mark_active();
        debug!(
            latency_ms = ?self.session.connect_latency_ms(),
            "Model link ready"
        );
    }

    /// Handle one text frame from the telephony socket.
    pub fn on_telephony_text(&mut self, text: &str) -> Vec<BridgeAction> {
        if self.session.is_ended() {
            return Vec::new();
        }

        match self.telephony.handle_text(text) {
            TelephonyInput::Started { stream_sid } => {
                if self.pending.is_empty() {
                    return Vec::new();
                }
                let queued = self.pending.drain();
                debug!(
                    stream_sid = %stream_sid,
                    bytes = queued.len(),
                    "Flushing audio buffered before start"
                );
                self.frames_to_caller(&queued)
            }
            TelephonyInput::CallerAudio(mulaw) => self.forward_caller_audio(&mulaw),
            TelephonyInput::MarkAcknowledged(_) | TelephonyInput::Ignored => Vec::new(),
            TelephonyInput::Stopped => self.teardown("telephony stream stopped"),
        }
    }

    /// Handle one event from the model link.
    pub fn on_model_event(&mut self, event: ServerEvent) -> Vec<BridgeAction> {
        if self.session.is_ended() {
            return Vec::new();
        }

        match event {
            ServerEvent::AudioDelta { delta } => self.relay_model_audio(&delta),
            ServerEvent::TextDelta { delta } => {
                debug!(text = %delta, "Model text delta");
                Vec::new()
            }
            ServerEvent::ResponseDone { response } => {
                self.session.stats.responses += 1;
                let name = format!("response-{}", self.session.stats.responses);
                debug!(response_id = %response.id, status = %response.status, mark = %name, "Model response done");
                self.telephony
                    .mark_message(&name)
                    .map(BridgeAction::SendToCaller)
                    .into_iter()
                    .collect()
            }
            ServerEvent::SpeechStarted => {
                if !self.settings.barge_in {
                    return Vec::new();
                }
                debug!(discarded_bytes = self.pending.len(), "Caller started speaking, clearing playback");
                self.pending.clear();
                self.telephony
                    .clear_message()
                    .map(BridgeAction::SendToCaller)
                    .into_iter()
                    .collect()
            }
            ServerEvent::Error { error } => {
                warn!(
                    error_type = %error.error_type,
                    code = ?error.code,
                    message = %error.message,
                    "Model reported an error"
                );
                Vec::new()
            }
            ServerEvent::SessionCreated { session } => {
                info!(session_id = %session.id, model = %session.model, "Model session created");
                Vec::new()
            }
            ServerEvent::SessionUpdated { session } => {
                debug!(session_id = %session.id, "Model session updated");
                Vec::new()
            }
            ServerEvent::Unknown => Vec::new(),
        }
    }

    /// Close both sides once. Later calls return no actions.
    pub fn teardown(&mut self, reason: &str) -> Vec<BridgeAction> {
        if !self.session.mark_ended() {
            return Vec::new();
        }

        let stats = &self.session.stats;
        info!(
            reason,
            duration_ms = self.session.duration_ms(),
            frames_sent = stats.frames_sent,
            audio_deltas = stats.audio_deltas,
            caller_chunks_forwarded = stats.caller_chunks_forwarded,
            dropped_chunks = stats.dropped_chunks,
            responses = stats.responses,
            pending_bytes_dropped = stats.pending_bytes_dropped,
            "Call torn down"
        );

        vec![BridgeAction::CloseModel, BridgeAction::CloseCaller]
    }

    fn relay_model_audio(&mut self, delta: &str) -> Vec<BridgeAction> {
        self.session.stats.audio_deltas += 1;

        let mulaw = match audio::model_delta_to_mulaw(
            delta,
            self.settings.upstream_sample_rate,
            self.settings.telephony_sample_rate,
        ) {
            Ok(mulaw) => mulaw,
            Err(err) => {
                self.session.stats.dropped_chunks += 1;
                warn!(error = %err, "Dropping undecodable model audio");
                return Vec::new();
            }
        };
        if mulaw.is_empty() {
            return Vec::new();
        }

        if self.telephony.stream_sid().is_none() {
            let dropped = self.pending.push(&mulaw);
            self.session.stats.pending_bytes_dropped += dropped as u64;
            trace!(
                buffered_ms = self.pending.duration_ms(),
                dropped_bytes = dropped,
                "Stream id unknown, buffering model audio"
            );
            return Vec::new();
        }

        self.frames_to_caller(&mulaw)
    }

    fn frames_to_caller(&mut self, mulaw: &[u8]) -> Vec<BridgeAction> {
        let actions: Vec<BridgeAction> = framing::encode_frames(mulaw, MULAW_FRAME_BYTES)
            .filter_map(|payload| self.telephony.media_message(payload))
            .map(BridgeAction::SendToCaller)
            .collect();
        self.session.stats.frames_sent += actions.len() as u64;
        actions
    }

    fn forward_caller_audio(&mut self, mulaw: &[u8]) -> Vec<BridgeAction> {
        if !self.settings.forward_caller_audio {
            return Vec::new();
        }
        if !self.model_connected {
            self.session.stats.dropped_chunks += 1;
            trace!(bytes = mulaw.len(), "Model not connected yet, dropping caller audio");
            return Vec::new();
        }

        match audio::caller_mulaw_to_model_payload(
            mulaw,
            self.settings.telephony_sample_rate,
            self.settings.upstream_sample_rate,
        ) {
            Ok(payload) => {
                self.session.stats.caller_chunks_forwarded += 1;
                vec![BridgeAction::SendToModel(ClientEvent::audio_append(payload))]
            }
            Err(err) => {
                self.session.stats.dropped_chunks += 1;
                warn!(error = %err, "Dropping caller audio");
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::codec;
    use base64::{engine::general_purpose::STANDARD, Engine};

    const START_MZ1: &str =
        r#"{"event":"start","streamSid":"MZ1","start":{"streamSid":"MZ1","callSid":"CA123"}}"#;

    fn bridge() -> CallBridge {
        CallBridge::new("CA123", BridgeSettings::from(&AppConfig::default()))
    }

    fn delta(samples: &[i16]) -> ServerEvent {
        ServerEvent::AudioDelta { delta: codec::encode_base64_pcm16(samples) }
    }

    fn caller_frames(actions: &[BridgeAction]) -> Vec<serde_json::Value> {
        actions
            .iter()
            .map(|action| match action {
                BridgeAction::SendToCaller(text) => serde_json::from_str(text).unwrap(),
                other => panic!("expected SendToCaller, got {:?}", other),
            })
            .collect()
    }

    fn is_close_pair(actions: &[BridgeAction]) -> bool {
        matches!(actions, [BridgeAction::CloseModel, BridgeAction::CloseCaller])
    }

    #[test]
    fn test_end_to_end_single_frame() {
        let mut bridge = bridge();
        bridge.on_model_connected();
        assert!(bridge.on_telephony_text(START_MZ1).is_empty());

        let actions = bridge.on_model_event(delta(&[1_000, -1_000, 500]));
        let frames = caller_frames(&actions);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0]["event"], "media");
        assert_eq!(frames[0]["streamSid"], "MZ1");

        let payload = STANDARD.decode(frames[0]["media"]["payload"].as_str().unwrap()).unwrap();
        assert_eq!(payload, vec![0xCE]);
        assert_eq!(payload, vec![codec::encode_mulaw(1_000)]);
        assert_eq!(bridge.stats().frames_sent, 1);
    }

    #[test]
    fn test_large_delta_is_framed() {
        let mut bridge = bridge();
        bridge.on_telephony_text(START_MZ1);

        // 1200 samples at 24kHz -> 400 μ-law bytes -> 160 + 160 + 80
        let actions = bridge.on_model_event(delta(&vec![0i16; 1_200]));
        let sizes: Vec<usize> = caller_frames(&actions)
            .iter()
            .map(|f| STANDARD.decode(f["media"]["payload"].as_str().unwrap()).unwrap().len())
            .collect();
        assert_eq!(sizes, vec![160, 160, 80]);
    }

    #[test]
    fn test_audio_before_start_is_flushed_in_order() {
        let mut bridge = bridge();
        assert!(bridge.on_model_event(delta(&[1_000, 0, 0])).is_empty());
        assert!(bridge.on_model_event(delta(&[-1_000, 0, 0])).is_empty());

        let frames = caller_frames(&bridge.on_telephony_text(START_MZ1));
        assert_eq!(frames.len(), 1);
        let payload = STANDARD.decode(frames[0]["media"]["payload"].as_str().unwrap()).unwrap();
        assert_eq!(payload, vec![codec::encode_mulaw(1_000), codec::encode_mulaw(-1_000)]);
    }

    #[test]
    fn test_duplicate_start_is_ignored() {
        let mut bridge = bridge();
        bridge.on_telephony_text(START_MZ1);
        let second = r#"{"event":"start","start":{"streamSid":"MZ2"}}"#;
        assert!(bridge.on_telephony_text(second).is_empty());
        assert_eq!(bridge.telephony().stream_sid(), Some("MZ1"));

        let frames = caller_frames(&bridge.on_model_event(delta(&[1_000, 0, 0])));
        assert_eq!(frames[0]["streamSid"], "MZ1");
    }

    #[test]
    fn test_malformed_input_produces_nothing() {
        let mut bridge = bridge();
        bridge.on_model_connected();
        bridge.on_telephony_text(START_MZ1);

        assert!(bridge.on_telephony_text("{not json").is_empty());
        assert!(bridge.on_telephony_text(r#"{"event":"media"}"#).is_empty());
        assert!(bridge.on_model_event(ServerEvent::Unknown).is_empty());
        assert!(bridge.on_model_event(ServerEvent::AudioDelta { delta: "%%%".to_string() }).is_empty());
        assert!(!bridge.is_torn_down());
    }

    #[test]
    fn test_odd_length_delta_is_dropped() {
        let mut bridge = bridge();
        bridge.on_telephony_text(START_MZ1);

        let odd = STANDARD.encode([0x01u8, 0x02, 0x03]);
        assert!(bridge.on_model_event(ServerEvent::AudioDelta { delta: odd }).is_empty());
        assert_eq!(bridge.stats().dropped_chunks, 1);
        assert!(!bridge.is_torn_down());
    }

    #[test]
    fn test_short_delta_yields_nothing() {
        let mut bridge = bridge();
        bridge.on_telephony_text(START_MZ1);
        assert!(bridge.on_model_event(delta(&[1_000, 2_000])).is_empty());
        assert_eq!(bridge.stats().frames_sent, 0);
    }

    #[test]
    fn test_stop_tears_down_once() {
        let mut bridge = bridge();
        bridge.on_telephony_text(START_MZ1);

        let actions = bridge.on_telephony_text(r#"{"event":"stop","streamSid":"MZ1"}"#);
        assert!(is_close_pair(&actions));
        assert!(bridge.is_torn_down());
        assert!(bridge.session().is_ended());

        assert!(bridge.teardown("socket closed").is_empty());
        assert!(bridge.on_model_event(delta(&[1_000, 0, 0])).is_empty());
        assert!(bridge.on_telephony_text(START_MZ1).is_empty());
    }

    #[test]
    fn test_teardown_is_idempotent() {
        let mut bridge = bridge();
        assert!(is_close_pair(&bridge.teardown("model stream ended")));
        assert!(bridge.teardown("model stream ended").is_empty());
        assert!(bridge.teardown("telephony closed").is_empty());
    }

    #[test]
    fn test_caller_audio_forwarded_after_model_connects() {
        let mut bridge = bridge();
        bridge.on_telephony_text(START_MZ1);

        let media = r#"{"event":"media","media":{"payload":"//9/"}}"#;
        assert!(bridge.on_telephony_text(media).is_empty());
        assert_eq!(bridge.stats().dropped_chunks, 1);

        bridge.on_model_connected();
        let actions = bridge.on_telephony_text(media);
        match actions.as_slice() {
            [BridgeAction::SendToModel(ClientEvent::InputAudioBufferAppend { audio })] => {
                let samples = codec::decode_base64_pcm16(audio).unwrap();
                let minus_one = codec::decode_mulaw(0x7F);
                assert_eq!(samples, vec![0, 0, 0, 0, 0, 0, minus_one, minus_one, minus_one]);
            }
            other => panic!("expected one append, got {:?}", other),
        }
        assert_eq!(bridge.stats().caller_chunks_forwarded, 1);
    }

    #[test]
    fn test_caller_audio_forwarding_disabled() {
        let mut config = AppConfig::default();
        config.bridge.forward_caller_audio = false;
        let mut bridge = CallBridge::new("CA123", BridgeSettings::from(&config));
        bridge.on_model_connected();
        bridge.on_telephony_text(START_MZ1);

        assert!(bridge.on_telephony_text(r#"{"event":"media","media":{"payload":"//8="}}"#).is_empty());
        assert_eq!(bridge.stats().caller_chunks_forwarded, 0);
    }

    #[test]
    fn test_response_done_sends_mark() {
        let mut bridge = bridge();
        bridge.on_telephony_text(START_MZ1);

        let done = crate::realtime::protocol::parse_server_event(r#"{"type":"response.done"}"#).unwrap();
        let frames = caller_frames(&bridge.on_model_event(done.clone()));
        assert_eq!(frames[0]["event"], "mark");
        assert_eq!(frames[0]["mark"]["name"], "response-1");

        let frames = caller_frames(&bridge.on_model_event(done));
        assert_eq!(frames[0]["mark"]["name"], "response-2");
    }

    #[test]
    fn test_barge_in_clears_playback() {
        let mut bridge = bridge();
        bridge.on_model_event(delta(&[1_000, 0, 0]));

        // Before start the pending buffer is discarded and nothing is sent.
        assert!(bridge.on_model_event(ServerEvent::SpeechStarted).is_empty());
        assert!(bridge.on_telephony_text(START_MZ1).is_empty());

        let frames = caller_frames(&bridge.on_model_event(ServerEvent::SpeechStarted));
        assert_eq!(frames[0], serde_json::json!({"event": "clear", "streamSid": "MZ1"}));
    }

    #[test]
    fn test_barge_in_disabled() {
        let mut config = AppConfig::default();
        config.bridge.barge_in = false;
        let mut bridge = CallBridge::new("CA123", BridgeSettings::from(&config));
        bridge.on_telephony_text(START_MZ1);
        assert!(bridge.on_model_event(ServerEvent::SpeechStarted).is_empty());
    }

    #[test]
    fn test_model_error_does_not_tear_down() {
        let mut bridge = bridge();
        let error = crate::realtime::protocol::parse_server_event(
            r#"{"type":"error","error":{"type":"server_error","message":"oops"}}"#,
        )
        .unwrap();
        assert!(bridge.on_model_event(error).is_empty());
        assert!(!bridge.is_torn_down());
    }
}
