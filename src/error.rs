//! # Error Handling
//!
//! Error types for the bridge, split by where the failure happens:
//!
//! - **AppError**: HTTP-facing errors, rendered as JSON responses by actix-web
//! - **AudioError**: transcoding failures on a single audio chunk
//! - **LinkError**: failures on the upstream realtime model socket
//!
//! ## Failure scope:
//! None of these ever escalate past one call. An `AudioError` drops a chunk,
//! a `LinkError` tears down the call that produced it, and an `AppError` only
//! rejects the HTTP request (for example a media-stream upgrade without a call id).

use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use std::fmt;

/// HTTP-facing errors.
///
/// ## Error Categories:
/// - **Internal**: Server-side problems (500 errors)
/// - **BadRequest**: Client sent invalid data (400 errors)
/// - **Unavailable**: The bridge is at its call limit (503 errors)
#[derive(Debug)]
pub enum AppError {
    /// Internal server errors
    Internal(String),

    /// Client sent invalid or malformed data
    BadRequest(String),

    /// Admission refused because the bridge is saturated
    Unavailable(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::Unavailable(msg) => write!(f, "Service unavailable: {}", msg),
        }
    }
}

impl std::error::Error for AppError {}

/// Converts errors into HTTP responses.
///
/// ## JSON Response Format:
/// ```json
/// {
///   "error": {
///     "type": "bad_request",
///     "message": "missing callSid query parameter",
///     "timestamp": "2025-01-01T12:00:00Z"
///   }
/// }
/// ```
impl ResponseError for AppError {
    fn status_code(&self) -> actix_web::http::StatusCode {
        use actix_web::http::StatusCode;
        match self {
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let (error_type, message) = match self {
            AppError::Internal(msg) => ("internal_error", msg),
            AppError::BadRequest(msg) => ("bad_request", msg),
            AppError::Unavailable(msg) => ("unavailable", msg),
        };

        HttpResponse::build(self.status_code()).json(json!({
            "error": {
                "type": error_type,
                "message": message,
                "timestamp": chrono::Utc::now().to_rfc3339()
            }
        }))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Internal(format!("JSON error: {}", err))
    }
}

/// Failures while transcoding one audio chunk.
///
/// The offending chunk is dropped and the call continues.
#[derive(Debug)]
pub enum AudioError {
    /// Payload was not valid base64
    Base64(base64::DecodeError),

    /// PCM16 payload had an odd number of bytes
    OddByteLength(usize),

    /// Resampling is only defined for integer ratios
    UnsupportedRatio { rate_in: u32, rate_out: u32 },
}

impl fmt::Display for AudioError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AudioError::Base64(err) => write!(f, "invalid base64 audio payload: {}", err),
            AudioError::OddByteLength(len) => {
                write!(f, "PCM16 payload has odd length {} bytes", len)
            }
            AudioError::UnsupportedRatio { rate_in, rate_out } => write!(
                f,
                "unsupported resampling ratio {} Hz -> {} Hz (must be an integer multiple)",
                rate_in, rate_out
            ),
        }
    }
}

impl std::error::Error for AudioError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AudioError::Base64(err) => Some(err),
            _ => None,
        }
    }
}

impl From<base64::DecodeError> for AudioError {
    fn from(err: base64::DecodeError) -> Self {
        AudioError::Base64(err)
    }
}

/// Failures on the upstream realtime model socket.
///
/// Every variant is fatal for the call that produced it and for no other call.
#[derive(Debug)]
pub enum LinkError {
    /// No API credential is configured
    MissingCredential,

    /// Building the upgrade request failed (bad URL or header value)
    InvalidRequest(String),

    /// TCP/TLS/WebSocket handshake failed
    ConnectionFailed(String),

    /// Handshake did not finish within the configured timeout
    Timeout(u64),

    /// The link was already closed when a message was queued
    Closed,
}

impl fmt::Display for LinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkError::MissingCredential => write!(f, "no realtime API credential configured"),
            LinkError::InvalidRequest(msg) => write!(f, "invalid upstream request: {}", msg),
            LinkError::ConnectionFailed(msg) => write!(f, "upstream connection failed: {}", msg),
            LinkError::Timeout(secs) => write!(f, "upstream connection timed out after {}s", secs),
            LinkError::Closed => write!(f, "upstream link is closed"),
        }
    }
}

impl std::error::Error for LinkError {}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::http::StatusCode;

    #[test]
    fn test_status_codes() {
        assert_eq!(AppError::BadRequest("x".into()).status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(
            AppError::Unavailable("x".into()).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            AppError::Internal("x".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_json_error_is_internal() {
        let err: AppError = serde_json::from_str::<serde_json::Value>("{").unwrap_err().into();
        assert!(matches!(err, AppError::Internal(_)));
        assert!(err.to_string().contains("JSON error"));
    }

    #[test]
    fn test_audio_error_display() {
        let err = AudioError::OddByteLength(7);
        assert!(err.to_string().contains("odd length 7"));

        let err = AudioError::UnsupportedRatio { rate_in: 22050, rate_out: 8000 };
        assert!(err.to_string().contains("22050"));
    }
}
