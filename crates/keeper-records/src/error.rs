//! Record store error types.

use thiserror::Error;

/// Result type for record store operations.
pub type RecordsResult<T> = Result<T, RecordsError>;

/// Errors that can occur against the record store.
#[derive(Debug, Error)]
pub enum RecordsError {
    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Stored data is invalid: {0}")]
    InvalidData(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl RecordsError {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn invalid_data(msg: impl Into<String>) -> Self {
        Self::InvalidData(msg.into())
    }
}
