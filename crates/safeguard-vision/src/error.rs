//! Error types for frame ingestion and detection.

use thiserror::Error;

/// Result type for vision operations.
pub type VisionResult<T> = Result<T, VisionError>;

/// Errors that can occur while reading frames or running detection.
#[derive(Debug, Error)]
pub enum VisionError {
    #[error("FFmpeg not found in PATH")]
    FfmpegNotFound,

    #[error("Source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("End of stream: {0}")]
    EndOfStream(String),

    #[error("Frame read failed: {0}")]
    ReadFailed(String),

    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    #[error("Detection failed: {0}")]
    DetectionFailed(String),

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Detection service error ({status}): {message}")]
    ServiceError { status: u16, message: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl VisionError {
    pub fn source_unavailable(message: impl Into<String>) -> Self {
        Self::SourceUnavailable(message.into())
    }

    pub fn end_of_stream(source: impl Into<String>) -> Self {
        Self::EndOfStream(source.into())
    }

    pub fn read_failed(message: impl Into<String>) -> Self {
        Self::ReadFailed(message.into())
    }

    pub fn detection_failed(message: impl Into<String>) -> Self {
        Self::DetectionFailed(message.into())
    }

    pub fn model_not_found(path: impl Into<String>) -> Self {
        Self::ModelNotFound(path.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Whether this error means the source can never be read.
    pub fn is_source_fatal(&self) -> bool {
        matches!(
            self,
            VisionError::SourceUnavailable(_) | VisionError::FfmpegNotFound
        )
    }

    /// Whether this error came from the detection capability.
    pub fn is_detection_error(&self) -> bool {
        matches!(
            self,
            VisionError::DetectionFailed(_)
                | VisionError::ModelNotFound(_)
                | VisionError::ServiceError { .. }
                | VisionError::Http(_)
        )
    }
}
