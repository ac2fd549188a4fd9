//! # Call Session
//!
//! Identity and bookkeeping for one bridged call.
//!
//! ## Session Lifecycle:
//! 1. **Connecting**: Telephony socket accepted, upstream model not yet connected
//! 2. **Active**: Both links are up
//! 3. **Ended**: Torn down; nothing more is sent on either side
//!
//! A session is owned by exactly one `CallBridge` and never shared, so the
//! counters are plain integers.

use chrono::{DateTime, Utc};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallStatus {
    Connecting,
    Active,
    Ended,
}

impl CallStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallStatus::Connecting => "connecting",
            CallStatus::Active => "active",
            CallStatus::Ended => "ended",
        }
    }
}

/// Per-call counters, reported when the call ends.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct SessionStats {
    /// Outbound telephony `media` frames
    pub frames_sent: u64,
    /// Audio deltas received from the model
    pub audio_deltas: u64,
    /// Caller media chunks forwarded to the model
    pub caller_chunks_forwarded: u64,
    /// Audio chunks dropped (malformed, or arrived with nowhere to go)
    pub dropped_chunks: u64,
    /// Completed model responses
    pub responses: u64,
    /// Bytes evicted from the pending buffer on overflow
    pub pending_bytes_dropped: u64,
}

#[derive(Debug)]
pub struct CallSession {
    /// Call identifier from the upgrade request query string
    pub call_sid: String,

    /// Unique per socket, distinguishes reconnects of the same call
    pub connection_id: Uuid,

    pub created_at: DateTime<Utc>,

    status: CallStatus,

    /// When the model link came up
    connected_at: Option<DateTime<Utc>>,

    ended_at: Option<DateTime<Utc>>,

    pub stats: SessionStats,
}

impl CallSession {
    pub fn new(call_sid: impl Into<String>) -> Self {
        Self {
            call_sid: call_sid.into(),
            connection_id: Uuid::new_v4(),
            created_at: Utc::now(),
            status: CallStatus::Connecting,
            connected_at: None,
            ended_at: None,
            stats: SessionStats::default(),
        }
    }

    pub fn status(&self) -> CallStatus {
        self.status
    }

    pub fn mark_active(&mut self) {
        if self.status == CallStatus::Connecting {
            self.status = CallStatus::Active;
            self.connected_at = Some(Utc::now());
        }
    }

    /// Move to `Ended`. Returns `false` if the session had already ended.
    pub fn mark_ended(&mut self) -> bool {
        if self.status == CallStatus::Ended {
            return false;
        }
        self.status = CallStatus::Ended;
        self.ended_at = Some(Utc::now());
        true
    }

    pub fn is_ended(&self) -> bool {
        self.status == CallStatus::Ended
    }

    /// Wall-clock duration so far, or until the call ended.
    pub fn duration_ms(&self) -> i64 {
        let end = self.ended_at.unwrap_or_else(Utc::now);
        (end - self.created_at).num_milliseconds().max(0)
    }

    /// Time from socket accept to model link up.
    pub fn connect_latency_ms(&self) -> Option<i64> {
        self.connected_at
            .map(|at| (at - self.created_at).num_milliseconds().max(0))
    }
}
