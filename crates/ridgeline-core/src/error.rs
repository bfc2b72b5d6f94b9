//! Error types for ridgeline-core

use thiserror::Error;

/// Result type for ridgeline-core operations
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors produced while loading configuration or validating platform specs
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CoreError {
    /// Required environment variable is missing
    #[error("environment variable '{name}' is not set")]
    MissingEnv { name: String },

    /// Environment variable is present but cannot be parsed
    #[error("environment variable '{name}' is invalid: {message}")]
    InvalidEnv { name: String, message: String },

    /// Platform specification failed validation
    #[error("invalid platform specification: {0}")]
    InvalidSpec(String),
}

impl CoreError {
    pub(crate) fn invalid_spec(message: impl Into<String>) -> Self {
        CoreError::InvalidSpec(message.into())
    }
}
