//! # Frame Scheduler
//!
//! Splits transcoded μ-law audio into wire frames for the telephony socket.
//!
//! ## Frame size:
//! 160 bytes of 8kHz μ-law is exactly 20ms of audio. The telephony provider
//! plays media events back to back, so this size is part of the wire contract
//! rather than a tuning knob.

use base64::{engine::general_purpose::STANDARD, Engine};

/// Bytes per outbound media event (20ms of 8kHz μ-law).
pub const MULAW_FRAME_BYTES: usize = 160;

/// Split `bytes` into consecutive frames of at most `frame_size` bytes.
///
/// The last frame may be shorter; nothing is padded and nothing is carried
/// over between calls. A `frame_size` of 0 is treated as 1.
pub fn frame(bytes: &[u8], frame_size: usize) -> std::slice::Chunks<'_, u8> {
    debug_assert!(frame_size > 0, "frame size must be positive");
    bytes.chunks(frame_size.max(1))
}

/// Frame `bytes` and base64-encode every frame independently.
pub fn encode_frames(bytes: &[u8], frame_size: usize) -> impl Iterator<Item = String> + '_ {
    frame(bytes, frame_size).map(|chunk| STANDARD.encode(chunk))
}

/// Duration of `byte_count` bytes of μ-law at `sample_rate`, in milliseconds.
pub fn mulaw_duration_ms(byte_count: usize, sample_rate: u32) -> u64 {
    if sample_rate == 0 {
        return 0;
    }
    byte_count as u64 * 1000 / sample_rate as u64
}
