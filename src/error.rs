//! # Error Handling
//!
//! Error types for the media path and the HTTP surface.
//!
//! ## Error Classes:
//! - **SinkError**: a participant write failed. `Closed` is terminal (the bridge
//!   drops the participant), `Write` is transient (logged, participant kept)
//! - **BridgeError**: the bridge is not accepting chunks
//! - **BackendError**: anything the live speech backend did wrong, including a
//!   panic caught at the receive-loop boundary
//! - **SessionError**: session construction and startup failures
//! - **FrameError**: malformed RTP packets
//! - **ResampleError**: the resampler could not be built or run
//! - **AppError**: HTTP-facing errors, rendered as JSON
//!
//! Media-path errors never abort the bridge; they are local to one participant
//! or one session.

use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use std::fmt;
use thiserror::Error;

/// Failure writing audio into a participant's sink.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SinkError {
    /// The sink is permanently gone. The bridge removes the participant.
    #[error("sink closed")]
    Closed,

    /// The write failed but the sink may accept later writes.
    #[error("write failed: {0}")]
    Write(String),
}

impl SinkError {
    /// Whether this failure should drop the participant from the bridge.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SinkError::Closed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BridgeError {
    #[error("media bridge is closed")]
    Closed,

    #[error("media bridge is already running")]
    AlreadyRunning,
}

/// Failures reported by (or about) the live speech backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    #[error("failed to connect to live backend: {0}")]
    Connect(String),

    #[error("failed to send to live backend: {0}")]
    Send(String),

    #[error("failed to receive from live backend: {0}")]
    Receive(String),

    /// The backend reported an error message of its own.
    #[error("live backend error: {0}")]
    Server(String),

    /// A frame could not be understood.
    #[error("live backend protocol error: {0}")]
    Protocol(String),

    /// The backend client panicked while it was being polled.
    #[error("live backend client panicked: {0}")]
    Panicked(String),

    /// The operation was abandoned because the session is shutting down.
    #[error("live backend operation cancelled")]
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// A required credential is not configured.
    #[error("{0} is not set")]
    MissingCredential(&'static str),

    #[error("session already started")]
    AlreadyStarted,

    #[error("session is closed")]
    Closed,

    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// Malformed RTP packet.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("packet too short: {len} bytes, need at least {needed}")]
    TooShort { len: usize, needed: usize },

    #[error("unsupported RTP version {0}")]
    UnsupportedVersion(u8),

    #[error("invalid padding length {padding} for {available} payload bytes")]
    InvalidPadding { padding: usize, available: usize },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResampleError {
    #[error("unsupported sample rate conversion {from} Hz -> {to} Hz")]
    UnsupportedRate { from: u32, to: u32 },

    #[error("failed to build resampler: {0}")]
    Construction(String),

    #[error("resampling failed: {0}")]
    Process(String),
}

/// Errors returned by the HTTP handlers.
///
/// ## Error Categories:
/// - **Internal**: server-side problems (500)
/// - **BadRequest**: the request was malformed (400)
/// - **NotFound**: no such call (404)
/// - **ConfigError**: configuration problems (500)
#[derive(Debug)]
pub enum AppError {
    Internal(String),
    BadRequest(String),
    NotFound(String),
    ConfigError(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::NotFound(msg) => write!(f, "Not found: {}", msg),
            AppError::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
        }
    }
}

impl std::error::Error for AppError {}

/// Converts errors into JSON HTTP responses.
///
/// ## JSON Response Format:
/// ```json
/// {
///   "error": {
///     "type": "not_found",
///     "message": "Call 'abc' not found",
///     "timestamp": "2025-01-01T12:00:00Z"
///   }
/// }
/// ```
impl ResponseError for AppError {
    fn status_code(&self) -> actix_web::http::StatusCode {
        use actix_web::http::StatusCode;

        match self {
            AppError::Internal(_) | AppError::ConfigError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let (error_type, message) = match self {
            AppError::Internal(msg) => ("internal_error", msg),
            AppError::BadRequest(msg) => ("bad_request", msg),
            AppError::NotFound(msg) => ("not_found", msg),
            AppError::ConfigError(msg) => ("config_error", msg),
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

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::BadRequest(format!("JSON parsing error: {}", err))
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::ConfigError(err.to_string())
    }
}

impl From<SessionError> for AppError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::MissingCredential(_) => AppError::ConfigError(err.to_string()),
            other => AppError::Internal(other.to_string()),
        }
    }
}

/// Shorthand for handler results.
pub type AppResult<T> = Result<T, AppError>;
