//! Store error types.

use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur while persisting records or snapshot files.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Duplicate record: {0}")]
    Duplicate(String),

    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    #[error("Invalid snapshot name: {0}")]
    InvalidName(String),

    #[error("Snapshot not found: {0}")]
    NotFound(String),

    #[error("Image encoding failed: {0}")]
    Image(#[from] image::ImageError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    pub fn duplicate(id: impl Into<String>) -> Self {
        Self::Duplicate(id.into())
    }

    pub fn invalid_record(msg: impl Into<String>) -> Self {
        Self::InvalidRecord(msg.into())
    }

    pub fn invalid_name(name: impl Into<String>) -> Self {
        Self::InvalidName(name.into())
    }

    pub fn not_found(name: impl Into<String>) -> Self {
        Self::NotFound(name.into())
    }
}
