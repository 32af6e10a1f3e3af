//! Monitor error types.

use safeguard_models::CameraId;
use safeguard_store::StoreError;
use safeguard_vision::VisionError;
use thiserror::Error;

pub type MonitorResult<T> = Result<T, MonitorError>;

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("Detection capability busy")]
    DetectionBusy,

    #[error("Camera already running: {0}")]
    AlreadyRunning(CameraId),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Vision error: {0}")]
    Vision(#[from] VisionError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl MonitorError {
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Whether the error is the arbiter timing out.
    pub fn is_busy(&self) -> bool {
        matches!(self, MonitorError::DetectionBusy)
    }
}
