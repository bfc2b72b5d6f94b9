//! Error types for ridgeline-operator
//!
//! The reconciler is the single place that classifies failures. Permanent
//! failures (retry budget exhausted, invalid specs) must not be retried by
//! the scheduler; everything else is worth another attempt.

use ridgeline_coord::CoordError;
use ridgeline_core::CoreError;
use ridgeline_kube::KubeError;
use thiserror::Error;

/// Result type for ridgeline-operator operations
pub type Result<T> = std::result::Result<T, OperatorError>;

/// Errors raised while reconciling a platform
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum OperatorError {
    /// Retry budget exhausted; permanent
    #[error("platform deployment has exceeded {retries} retries")]
    RetriesExceeded { retries: u32 },

    /// The spec will never become valid by retrying; permanent
    #[error(transparent)]
    InvalidSpec(#[from] CoreError),

    /// Coordination store or lock failure
    #[error(transparent)]
    Coord(#[from] CoordError),

    /// Kubernetes API failure
    #[error(transparent)]
    Kube(#[from] KubeError),

    /// Chart installer failure; an upgrade may succeed on retry
    #[error("helm command failed: {0}")]
    Helm(String),

    /// Config service failure
    #[error("config service error: {0}")]
    ConfigService(String),

    /// Certificate payload could not be decoded
    #[error("certificate payload invalid: {0}")]
    Certificate(String),

    /// The ingress is not externally reachable yet; retry once its
    /// endpoint has been published
    #[error("ingress service has no external endpoint yet")]
    IngressNotReady,
}

impl From<reqwest::Error> for OperatorError {
    fn from(e: reqwest::Error) -> Self {
        OperatorError::ConfigService(e.to_string())
    }
}

impl OperatorError {
    /// Permanent failures must not be retried by the invoking scheduler.
    pub fn is_permanent(&self) -> bool {
        matches!(self, OperatorError::RetriesExceeded { .. } | OperatorError::InvalidSpec(_))
    }
}
