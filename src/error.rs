//! Huginn error types

use std::time::Duration;

/// Huginn error types
#[derive(Debug, thiserror::Error)]
pub enum HuginnError {
    // Provider/network errors
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// Provider quota or rate limit hit for one model.
    ///
    /// The fallback chain moves on to the next candidate.
    #[error("quota exceeded for model '{model}'")]
    QuotaExceeded {
        model: String,
        retry_after: Option<Duration>,
    },

    #[error("authentication failed")]
    AuthenticationFailed,

    #[error("model not found: {0}")]
    ModelNotFound(String),

    #[error("backend call timed out after {0:?}")]
    Timeout(Duration),

    // Streaming errors
    #[error("stream error: {0}")]
    Stream(String),

    // Data errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The backend refused the request as malformed (`INVALID_ARGUMENT`).
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    // Configuration errors
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("no model candidates configured")]
    NoCandidates,

    #[error("operation not implemented: {0}")]
    NotImplemented(&'static str),

    // Soft errors
    #[error("empty response from model")]
    EmptyResponse,

    #[error("content blocked: {reason}")]
    ContentBlocked { reason: String },

    /// Every candidate in the fallback chain failed.
    #[error("all {attempted} model candidates exhausted, last error: {last}")]
    AllModelsExhausted {
        attempted: usize,
        last: Box<HuginnError>,
    },

    /// Client cooldown violated at the transport layer.
    #[error("rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },
}

/// How the fallback chain reacts to a failed candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Quota or rate limit: advance the sticky index and try the next candidate.
    Quota,
    /// Bad credential: stop, nothing else will work either.
    InvalidCredential,
    /// Safety block or malformed request: stop and tell the client.
    Rejected,
    /// Anything else: try the next candidate.
    Retryable,
}

impl HuginnError {
    /// Classify an error for fallback purposes.
    pub fn failure_class(&self) -> FailureClass {
        match self {
            HuginnError::QuotaExceeded { .. } => FailureClass::Quota,
            HuginnError::AuthenticationFailed | HuginnError::Configuration(_) => {
                FailureClass::InvalidCredential
            }
            HuginnError::ContentBlocked { .. }
            | HuginnError::InvalidRequest(_)
            | HuginnError::InvalidInput(_) => FailureClass::Rejected,
            _ => FailureClass::Retryable,
        }
    }

    /// Whether the error is likely to clear up on its own.
    pub fn is_transient(&self) -> bool {
        match self {
            HuginnError::QuotaExceeded { .. }
            | HuginnError::RateLimited { .. }
            | HuginnError::Http(_)
            | HuginnError::Stream(_)
            | HuginnError::Timeout(_)
            | HuginnError::EmptyResponse => true,
            HuginnError::Api { status, .. } => matches!(status, 500 | 502 | 503 | 504),
            _ => false,
        }
    }

    /// Server-suggested wait, when the error carries one.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            HuginnError::QuotaExceeded { retry_after, .. } => *retry_after,
            HuginnError::RateLimited { retry_after } => Some(*retry_after),
            _ => None,
        }
    }
}

/// Result type alias for Huginn operations
pub type Result<T> = std::result::Result<T, HuginnError>;
