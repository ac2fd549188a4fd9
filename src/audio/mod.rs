//! # Audio Pipeline
//!
//! Everything that touches audio bytes between the two sockets.
//!
//! ## Key Components:
//! - **codec**: μ-law encode/decode and PCM16/base64 helpers
//! - **resample**: integer-ratio decimation and sample-and-hold upsampling
//! - **framing**: 20ms frame scheduler for the telephony wire format
//! - **buffer**: bounded queue for audio produced before the stream is known
//!
//! ## Audio Formats:
//! - **Model side**: PCM16 little-endian, mono, 24kHz, base64 in JSON
//! - **Telephony side**: G.711 μ-law, mono, 8kHz, base64 in JSON

pub mod buffer;
pub mod codec;
pub mod framing;
pub mod resample;

pub use buffer::PendingAudio;
pub use framing::MULAW_FRAME_BYTES;

use crate::error::AudioError;

/// Convert one model audio delta (base64 PCM16) into μ-law bytes at the telephony rate.
///
/// ## Steps:
/// 1. base64 decode and reinterpret as little-endian PCM16
/// 2. decimate from `upstream_rate` to `telephony_rate`
/// 3. μ-law encode each remaining sample
pub fn model_delta_to_mulaw(
    payload: &str,
    upstream_rate: u32,
    telephony_rate: u32,
) -> Result<Vec<u8>, AudioError> {
    let samples = codec::decode_base64_pcm16(payload)?;
    let decimated = resample::downsample(upstream_rate, telephony_rate, &samples)?;
    Ok(codec::encode_mulaw_buffer(&decimated))
}

/// Convert one telephony media payload (μ-law bytes) into base64 PCM16 at the upstream rate.
pub fn caller_mulaw_to_model_payload(
    mulaw: &[u8],
    telephony_rate: u32,
    upstream_rate: u32,
) -> Result<String, AudioError> {
    let samples = codec::decode_mulaw_buffer(mulaw);
    let upsampled = resample::upsample(telephony_rate, upstream_rate, &samples)?;
    Ok(codec::encode_base64_pcm16(&upsampled))
}
