//! Structured camera lifecycle logging.

use safeguard_models::CameraId;
use tracing::{error, info, warn, Span};

/// Logger carrying a camera id and the operation being performed.
#[derive(Debug, Clone)]
pub struct CameraLogger {
    camera_id: String,
    operation: String,
}

impl CameraLogger {
    pub fn new(camera_id: &CameraId, operation: &str) -> Self {
        Self {
            camera_id: camera_id.to_string(),
            operation: operation.to_string(),
        }
    }

    pub fn log_start(&self, message: &str) {
        info!(
            camera_id = %self.camera_id,
            operation = %self.operation,
            "Camera started: {}", message
        );
    }

    pub fn log_progress(&self, message: &str) {
        info!(
            camera_id = %self.camera_id,
            operation = %self.operation,
            "Camera progress: {}", message
        );
    }

    pub fn log_warning(&self, message: &str) {
        warn!(
            camera_id = %self.camera_id,
            operation = %self.operation,
            "Camera warning: {}", message
        );
    }

    pub fn log_error(&self, message: &str) {
        error!(
            camera_id = %self.camera_id,
            operation = %self.operation,
            "Camera error: {}", message
        );
    }

    pub fn log_completion(&self, message: &str) {
        info!(
            camera_id = %self.camera_id,
            operation = %self.operation,
            "Camera stopped: {}", message
        );
    }

    /// Span wrapping the camera's frame loop.
    pub fn create_span(&self) -> Span {
        tracing::info_span!(
            "camera",
            camera_id = %self.camera_id,
            operation = %self.operation
        )
    }
}
