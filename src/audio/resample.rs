//! # Integer-ratio Resampling
//!
//! The model speaks PCM16 at 24kHz while the phone network carries 8kHz.
//! Both directions use the simplest possible integer-ratio conversion.
//!
//! ## Known quality limitation:
//! `downsample` is plain decimation: it keeps every Nth sample without a
//! low-pass filter first, so content above 4kHz aliases into the telephone
//! band. `upsample` is sample-and-hold. Swapping either for a filtered
//! resampler changes what callers hear and must come with its own tests.

use crate::error::AudioError;

/// Integer ratio between the higher and the lower rate.
fn integer_ratio(high: u32, low: u32) -> Result<usize, AudioError> {
    if low == 0 || high < low || high % low != 0 {
        return Err(AudioError::UnsupportedRatio { rate_in: high, rate_out: low });
    }
    Ok((high / low) as usize)
}

/// Decimate `samples` from `rate_in` to `rate_out`.
///
/// Returns exactly `floor(len / ratio)` samples: `samples[0]`, `samples[ratio]`, ...
/// A trailing partial group is dropped. Each call is independent, so a delta
/// whose length is not a multiple of the ratio loses its tail.
pub fn downsample(rate_in: u32, rate_out: u32, samples: &[i16]) -> Result<Vec<i16>, AudioError> {
    let ratio = integer_ratio(rate_in, rate_out)?;
    Ok(samples.chunks_exact(ratio).map(|group| group[0]).collect())
}

/// Repeat each sample to go from `rate_in` up to `rate_out`.
pub fn upsample(rate_in: u32, rate_out: u32, samples: &[i16]) -> Result<Vec<i16>, AudioError> {
    let ratio = integer_ratio(rate_out, rate_in).map_err(|_| AudioError::UnsupportedRatio {
        rate_in,
        rate_out,
    })?;

    let mut output = Vec::with_capacity(samples.len() * ratio);
    for &sample in samples {
        output.extend(std::iter::repeat(sample).take(ratio));
    }
    Ok(output)
}
