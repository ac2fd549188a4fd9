//! # μ-law Codec and PCM16 Helpers
//!
//! Stateless conversions between linear PCM16 and G.711 μ-law, the 8-bit
//! companded encoding the telephony provider streams at 8kHz.
//!
//! ## Wire formats handled here:
//! - **PCM16**: little-endian signed 16-bit samples, base64 encoded by the model API
//! - **μ-law**: one byte per sample, base64 encoded by the telephony provider
//!
//! ## Encoding steps (G.711 μ-law):
//! 1. Split sign and magnitude
//! 2. Clip the magnitude to `MULAW_CLIP`, then add `MULAW_BIAS`
//! 3. The highest set bit (bit 14 down to bit 8) gives the 3-bit segment
//! 4. The 4 bits below that bit give the mantissa
//! 5. Pack `sign | segment | mantissa` and invert every bit

use crate::error::AudioError;
use base64::{engine::general_purpose::STANDARD, Engine};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::Cursor;

/// Bias added to the magnitude before segment lookup.
pub const MULAW_BIAS: i32 = 0x84;

/// Largest magnitude that survives encoding; everything above saturates.
pub const MULAW_CLIP: i32 = 32_635;

/// Encode one linear PCM16 sample as μ-law.
pub fn encode_mulaw(sample: i16) -> u8 {
    // Widen first so -32768 has a representable magnitude.
    let mut magnitude = sample as i32;
    let sign: u8 = if magnitude < 0 {
        magnitude = -magnitude;
        0x80
    } else {
        0x00
    };

    let biased = magnitude.min(MULAW_CLIP) + MULAW_BIAS;

    let mut exponent: u8 = 7;
    let mut mask: i32 = 0x4000;
    while exponent > 0 && biased & mask == 0 {
        exponent -= 1;
        mask >>= 1;
    }

    let mantissa = ((biased >> (exponent as i32 + 3)) & 0x0F) as u8;
    !(sign | (exponent << 4) | mantissa)
}

/// Decode one μ-law byte back to linear PCM16.
pub fn decode_mulaw(byte: u8) -> i16 {
    let inverted = !byte;
    let exponent = ((inverted >> 4) & 0x07) as i32;
    let mantissa = (inverted & 0x0F) as i32;

    let magnitude = (((mantissa << 3) + MULAW_BIAS) << exponent) - MULAW_BIAS;
    if inverted & 0x80 != 0 {
        -magnitude as i16
    } else {
        magnitude as i16
    }
}

/// Encode a block of PCM16 samples as μ-law bytes.
pub fn encode_mulaw_buffer(samples: &[i16]) -> Vec<u8> {
    samples.iter().map(|&sample| encode_mulaw(sample)).collect()
}

/// Decode a block of μ-law bytes to PCM16 samples.
pub fn decode_mulaw_buffer(bytes: &[u8]) -> Vec<i16> {
    bytes.iter().map(|&byte| decode_mulaw(byte)).collect()
}

/// Reinterpret little-endian bytes as PCM16 samples.
///
/// ## Odd lengths:
/// A trailing half sample means the chunk was cut or corrupted upstream, so the
/// whole chunk is rejected instead of silently truncated.
pub fn pcm16_from_le_bytes(bytes: &[u8]) -> Result<Vec<i16>, AudioError> {
    if bytes.len() % 2 != 0 {
        return Err(AudioError::OddByteLength(bytes.len()));
    }

    let mut cursor = Cursor::new(bytes);
    let mut samples = Vec::with_capacity(bytes.len() / 2);
    while let Ok(sample) = cursor.read_i16::<LittleEndian>() {
        samples.push(sample);
    }
    Ok(samples)
}

/// Serialize PCM16 samples as little-endian bytes.
pub fn pcm16_to_le_bytes(samples: &[i16]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        // Writing into a Vec cannot fail.
        let _ = bytes.write_i16::<LittleEndian>(sample);
    }
    bytes
}

/// Decode a base64 PCM16 payload (model audio delta) into samples.
pub fn decode_base64_pcm16(payload: &str) -> Result<Vec<i16>, AudioError> {
    let bytes = STANDARD.decode(payload)?;
    pcm16_from_le_bytes(&bytes)
}

/// Encode PCM16 samples as a base64 payload (caller audio sent upstream).
pub fn encode_base64_pcm16(samples: &[i16]) -> String {
    STANDARD.encode(pcm16_to_le_bytes(samples))
}

/// Decode a base64 μ-law payload (telephony media event) into raw bytes.
pub fn decode_base64_mulaw(payload: &str) -> Result<Vec<u8>, AudioError> {
    Ok(STANDARD.decode(payload)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Table-driven encoder in the style of the classic G.711 reference code,
    /// used as an independent oracle for the bit-scanning encoder above.
    fn reference_encode(sample: i16) -> u8 {
        let mut exp_lut = [0u8; 256];
        for (i, entry) in exp_lut.iter_mut().enumerate() {
            let bits = 8 - (i as u8).leading_zeros() as u8;
            *entry = bits.saturating_sub(1);
        }

        let mut value = sample as i32;
        let sign = if value < 0 { 0x80 } else { 0x00 };
        if value < 0 {
            value = -value;
        }
        if value > 32_635 {
            value = 32_635;
        }
        value += 0x84;

        let exponent = exp_lut[((value >> 7) & 0xFF) as usize];
        let mantissa = ((value >> (exponent as i32 + 3)) & 0x0F) as u8;
        !(sign | (exponent << 4) | mantissa)
    }

    #[test]
    fn test_encode_fixtures() {
        assert_eq!(encode_mulaw(0), 0xFF);
        assert_eq!(encode_mulaw(1), 0xFF);
        assert_eq!(encode_mulaw(-1), 0x7F);
        assert_eq!(encode_mulaw(32_767), 0x80);
        assert_eq!(encode_mulaw(32_635), 0x80);
        assert_eq!(encode_mulaw(-32_768), 0x00);
        assert_eq!(encode_mulaw(-32_635), 0x00);
        assert_eq!(encode_mulaw(1_000), 0xCE);
    }

    #[test]
    fn test_encode_matches_reference_for_every_sample() {
        for sample in i16::MIN..=i16::MAX {
            assert_eq!(
                encode_mulaw(sample),
                reference_encode(sample),
                "mismatch for sample {}",
                sample
            );
        }
    }

    #[test]
    fn test_segment_boundaries() {
        // 123 + 132 = 255 is the last value in segment 0, 124 + 132 = 256 starts segment 1
        assert_eq!(!encode_mulaw(123) & 0x70, 0x00);
        assert_eq!(!encode_mulaw(124) & 0x70, 0x10);
        // 16252 + 132 = 16384 is the first value in segment 7
        assert_eq!(!encode_mulaw(16_251) & 0x70, 0x60);
        assert_eq!(!encode_mulaw(16_252) & 0x70, 0x70);
    }

    #[test]
    fn test_decode_fixtures() {
        assert_eq!(decode_mulaw(0xFF), 0);
        assert_eq!(decode_mulaw(0x7F), 0);
        assert_eq!(decode_mulaw(0x80), 32_124);
        assert_eq!(decode_mulaw(0x00), -32_124);
    }

    #[test]
    fn test_decode_inverts_encode_within_quantization() {
        for sample in (i16::MIN..=i16::MAX).step_by(7) {
            let decoded = decode_mulaw(encode_mulaw(sample)) as i32;
            let original = (sample as i32).clamp(-MULAW_CLIP, MULAW_CLIP);
            let segment_step = 1 << (((!encode_mulaw(sample) >> 4) & 0x07) + 3);
            assert!(
                (decoded - original).abs() <= segment_step,
                "sample {} decoded to {}",
                sample,
                decoded
            );
        }
    }

    #[test]
    fn test_decode_base64_pcm16() {
        let samples = vec![1_000i16, -1_000, 500];
        let payload = encode_base64_pcm16(&samples);
        assert_eq!(decode_base64_pcm16(&payload).unwrap(), samples);
    }

    #[test]
    fn test_decode_base64_pcm16_rejects_odd_length() {
        let payload = STANDARD.encode([0x01u8, 0x02, 0x03]);
        match decode_base64_pcm16(&payload) {
            Err(AudioError::OddByteLength(3)) => {}
            other => panic!("expected odd length error, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_base64_rejects_garbage() {
        assert!(matches!(
            decode_base64_pcm16("not base64!!"),
            Err(AudioError::Base64(_))
        ));
        assert!(decode_base64_mulaw("%%%").is_err());
    }

    #[test]
    fn test_little_endian_layout() {
        assert_eq!(pcm16_to_le_bytes(&[0x0102, -2]), vec![0x02, 0x01, 0xFE, 0xFF]);
        assert!(pcm16_from_le_bytes(&[]).unwrap().is_empty());
    }
}
