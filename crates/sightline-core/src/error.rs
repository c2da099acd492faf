//! Error types for sightline.

use thiserror::Error;

/// Result type alias using sightline's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for sightline operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Transport-level failure (connect, reset, DNS)
    #[error("Network error: {0}")]
    Network(String),

    /// Request exceeded its timeout
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Non-success HTTP status after retries were exhausted
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    /// Missing or rejected credentials
    #[error("Unauthorized: {0}")]
    Auth(String),

    /// Entity or attachment absent on the backend
    #[error("Not found: {0}")]
    NotFound(String),

    /// A result arrived for a generation that is no longer current
    #[error("Stale result discarded: generation {generation} (current {current})")]
    StaleResultDiscarded { generation: u64, current: u64 },

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether the connection pool may retry the request that produced this error.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Network(_) | Error::Timeout(_) => true,
            Error::Http { status, .. } => crate::defaults::RETRY_STATUS_CODES.contains(status),
            _ => false,
        }
    }

    /// Whether this error should ever reach the user.
    ///
    /// Stale results are bookkeeping, not failures.
    pub fn is_user_visible(&self) -> bool {
        !matches!(self, Error::StaleResultDiscarded { .. })
    }

    /// Whether this error invalidates the whole session (credentials).
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Auth(_))
    }

    /// Map an HTTP status code to the matching error variant.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            401 | 403 => Error::Auth(message),
            404 => Error::NotFound(message),
            _ => Error::Http { status, message },
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Error::Timeout(e.to_string())
        } else if let Some(status) = e.status() {
            Error::from_status(status.as_u16(), e.to_string())
        } else if e.is_decode() {
            Error::Serialization(e.to_string())
        } else {
            Error::Network(e.to_string())
        }
    }
}
