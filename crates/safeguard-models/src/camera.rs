//! Camera identity and live statistics.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier for a camera (e.g. `cam01`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct CameraId(pub String);

impl CameraId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CameraId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for CameraId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for CameraId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Lifecycle state of a camera worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum CameraStatus {
    /// Worker spawned, source not opened yet
    #[default]
    Starting,
    /// Frame loop is active
    Running,
    /// Loop exited after a stop request
    Stopped,
    /// Source could not be opened; the worker has exited
    Unavailable,
}

impl CameraStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CameraStatus::Starting => "starting",
            CameraStatus::Running => "running",
            CameraStatus::Stopped => "stopped",
            CameraStatus::Unavailable => "unavailable",
        }
    }

    /// Whether the worker loop is (or is about to be) live.
    pub fn is_active(&self) -> bool {
        matches!(self, CameraStatus::Starting | CameraStatus::Running)
    }
}

impl fmt::Display for CameraStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Read-only statistics view of one camera.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CameraStats {
    pub camera_id: CameraId,
    pub running: bool,
    pub status: CameraStatus,
    pub fps: f64,
    pub total_tracked: u32,
    pub active_violations: u32,
    /// Percentage of tracked people in compliance, 0-100
    pub compliance_rate: f64,
}

impl CameraStats {
    /// Statistics of a camera that has not processed anything yet.
    pub fn idle(camera_id: CameraId, status: CameraStatus) -> Self {
        Self {
            camera_id,
            running: status == CameraStatus::Running,
            status,
            fps: 0.0,
            total_tracked: 0,
            active_violations: 0,
            compliance_rate: 100.0,
        }
    }
}
