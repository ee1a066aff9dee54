//! Pipeline error types.

use thiserror::Error;

/// Result type for pipeline operations.
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Errors that can abort a stage.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Archive error: {0}")]
    Archive(String),

    #[error("{0}")]
    JobFailed(String),

    #[error("Job was cancelled")]
    Cancelled,

    #[error("Storage error: {0}")]
    Storage(#[from] keeper_storage::StorageError),

    #[error("Record store error: {0}")]
    Records(#[from] keeper_records::RecordsError),

    #[error("Model error: {0}")]
    Model(#[from] keeper_vision::ModelError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    pub fn archive(msg: impl Into<String>) -> Self {
        Self::Archive(msg.into())
    }

    pub fn job_failed(msg: impl Into<String>) -> Self {
        Self::JobFailed(msg.into())
    }

    /// Cancellation is not a failure; callers leave the job status alone.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, PipelineError::Cancelled)
    }
}
