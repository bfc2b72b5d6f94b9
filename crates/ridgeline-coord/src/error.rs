//! Error types for ridgeline-coord

use std::time::Duration;

use thiserror::Error;

/// Result type for ridgeline-coord operations
pub type Result<T> = std::result::Result<T, CoordError>;

/// Errors that can occur while talking to the coordination store
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CoordError {
    /// Network-level failure reaching the store
    #[error("coordination store transport error: {0}")]
    Transport(String),

    /// Non-success HTTP status other than 404
    #[error("coordination store returned {status}: {message}")]
    Status { status: u16, message: String },

    /// Key is absent; callers decide what absence means at each site
    #[error("key '{key}' not found")]
    KeyNotFound { key: String },

    /// Session TTL below the store minimum; rejected before any network call
    #[error("session ttl {ttl:?} is below the {min:?} minimum", min = crate::kv::MIN_SESSION_TTL)]
    SessionTtlTooShort { ttl: Duration },

    /// Lock delay must be positive when set
    #[error("session lock delay must be greater than zero")]
    InvalidLockDelay,

    /// Response body could not be understood
    #[error("unexpected coordination store response: {0}")]
    UnexpectedResponse(String),

    /// Acquisition polling exhausted its timeout
    #[error("timed out acquiring lock on key '{key}'")]
    LockAcquisition { key: String },

    /// The session expired while its critical section was still running; the
    /// work done under the lock is of unknown exclusivity
    #[error("session '{session}' holding key '{key}' expired during the critical section")]
    SessionExpired { key: String, session: String },

    /// Session destruction failed during lock cleanup
    #[error("failed to release lock ('{session}', '{key}')")]
    LockRelease { key: String, session: String },
}

impl From<reqwest::Error> for CoordError {
    fn from(e: reqwest::Error) -> Self {
        CoordError::Transport(e.to_string())
    }
}

impl From<serde_json::Error> for CoordError {
    fn from(e: serde_json::Error) -> Self {
        CoordError::UnexpectedResponse(e.to_string())
    }
}

impl CoordError {
    /// Whether retrying the same call may succeed (network failures, 5xx).
    pub fn is_transient(&self) -> bool {
        match self {
            CoordError::Transport(_) => true,
            CoordError::Status { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Check if this error means the requested key is absent.
    pub fn is_not_found(&self) -> bool {
        matches!(self, CoordError::KeyNotFound { .. })
    }
}
