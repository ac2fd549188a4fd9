//! # Pending Audio Buffer
//!
//! Holds synthesized μ-law audio that arrives before the telephony provider has
//! sent its `start` event. Without a stream identifier there is nowhere to send
//! it, but the model usually starts greeting the caller within the first few
//! hundred milliseconds, so dropping it would cut off the greeting.
//!
//! ## Key Features:
//! - **Bounded**: never grows past the configured duration
//! - **Drop oldest**: on overflow the oldest audio goes first, keeping playback contiguous
//! - **Single owner**: lives inside one call's bridge, so no locking is needed

use crate::audio::framing::mulaw_duration_ms;
use std::collections::VecDeque;

/// Bounded FIFO of μ-law bytes awaiting a stream identifier.
#[derive(Debug)]
pub struct PendingAudio {
    /// Queued μ-law bytes, oldest first
    buffer: VecDeque<u8>,

    /// Capacity in bytes (one byte per 8kHz sample)
    max_bytes: usize,

    /// Sample rate used to report durations
    sample_rate: u32,
}

impl PendingAudio {
    /// Create a buffer holding at most `max_bytes` bytes.
    pub fn new(max_bytes: usize, sample_rate: u32) -> Self {
        Self {
            buffer: VecDeque::with_capacity(max_bytes.min(64 * 1024)),
            max_bytes,
            sample_rate,
        }
    }

    /// Append μ-law bytes, discarding the oldest bytes on overflow.
    ///
    /// ## Returns:
    /// The number of bytes that had to be discarded.
    pub fn push(&mut self, data: &[u8]) -> usize {
        if self.max_bytes == 0 {
            return data.len();
        }

        self.buffer.extend(data.iter().copied());

        let overflow = self.buffer.len().saturating_sub(self.max_bytes);
        if overflow > 0 {
            self.buffer.drain(..overflow);
        }
        overflow
    }

    /// Take everything queued so far, leaving the buffer empty.
    pub fn drain(&mut self) -> Vec<u8> {
        self.buffer.drain(..).collect()
    }

    /// Discard everything queued (barge-in).
    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Duration of queued audio in milliseconds.
    pub fn duration_ms(&self) -> u64 {
        mulaw_duration_ms(self.buffer.len(), self.sample_rate)
    }
}
