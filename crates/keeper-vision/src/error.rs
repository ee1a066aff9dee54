//! Model adapter error types.

use thiserror::Error;

/// Result type for model calls.
pub type ModelResult<T> = Result<T, ModelError>;

/// Errors surfaced by the model adapter.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("Failed to configure model client: {0}")]
    ConfigError(String),

    #[error("Model request failed: {0}")]
    RequestFailed(String),

    #[error("Model returned status {status}: {body}")]
    BadStatus { status: u16, body: String },

    #[error("Model call timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Could not parse model response: {0}")]
    InvalidResponse(String),
}

impl ModelError {
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    pub fn request_failed(msg: impl Into<String>) -> Self {
        Self::RequestFailed(msg.into())
    }

    pub fn invalid_response(msg: impl Into<String>) -> Self {
        Self::InvalidResponse(msg.into())
    }

    /// Whether retrying the call can plausibly succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            ModelError::RequestFailed(_) | ModelError::Timeout(_) => true,
            ModelError::BadStatus { status, .. } => *status >= 500 || *status == 429,
            ModelError::ConfigError(_) | ModelError::InvalidResponse(_) => false,
        }
    }
}
