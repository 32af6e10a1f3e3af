//! Violation events and their review lifecycle.

use chrono::{DateTime, Local, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::{CameraId, Detection, GearCategory};

/// Kind of violation recorded for a person.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub enum ViolationType {
    #[serde(rename = "No Helmet")]
    NoHelmet,
    #[serde(rename = "No Vest")]
    NoVest,
    #[serde(rename = "PPE Violation")]
    PpeViolation,
}

impl ViolationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ViolationType::NoHelmet => "No Helmet",
            ViolationType::NoVest => "No Vest",
            ViolationType::PpeViolation => "PPE Violation",
        }
    }

    /// Label a violating detection.
    ///
    /// A missing helmet takes precedence over a missing vest; only categories
    /// that were actually checked count as missing.
    pub fn for_detection(detection: &Detection) -> Self {
        match detection.missing_gear().first() {
            Some(GearCategory::Helmet) => ViolationType::NoHelmet,
            Some(GearCategory::Vest) => ViolationType::NoVest,
            None => ViolationType::PpeViolation,
        }
    }
}

impl fmt::Display for ViolationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ViolationType {
    type Err = ParseViolationStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "No Helmet" => Ok(ViolationType::NoHelmet),
            "No Vest" => Ok(ViolationType::NoVest),
            "PPE Violation" => Ok(ViolationType::PpeViolation),
            other => Err(ParseViolationStatusError(other.to_string())),
        }
    }
}

/// Severity attached to a violation record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
pub enum Severity {
    Low,
    Medium,
    #[default]
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "Low",
            Severity::Medium => "Medium",
            Severity::High => "High",
            Severity::Critical => "Critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Severity {
    type Err = ParseViolationStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Low" => Ok(Severity::Low),
            "Medium" => Ok(Severity::Medium),
            "High" => Ok(Severity::High),
            "Critical" => Ok(Severity::Critical),
            other => Err(ParseViolationStatusError(other.to_string())),
        }
    }
}

/// Review state of a violation. New events start `Pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
pub enum ViolationStatus {
    #[default]
    Pending,
    Reviewed,
    Resolved,
}

impl ViolationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ViolationStatus::Pending => "Pending",
            ViolationStatus::Reviewed => "Reviewed",
            ViolationStatus::Resolved => "Resolved",
        }
    }
}

impl fmt::Display for ViolationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Unrecognized enum label read back from storage.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unknown value: {0}")]
pub struct ParseViolationStatusError(pub String);

impl FromStr for ViolationStatus {
    type Err = ParseViolationStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Pending" => Ok(ViolationStatus::Pending),
            "Reviewed" => Ok(ViolationStatus::Reviewed),
            "Resolved" => Ok(ViolationStatus::Resolved),
            other => Err(ParseViolationStatusError(other.to_string())),
        }
    }
}

/// A persisted safety-gear violation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ViolationEvent {
    pub id: String,
    pub camera_id: CameraId,
    /// Local date, e.g. `Mar 04, 2025`
    pub date: String,
    /// Local time, e.g. `14:03:59`
    pub time: String,
    pub worker_name: String,
    pub worker_id: String,
    pub violation_type: ViolationType,
    pub severity: Severity,
    pub zone: String,
    pub status: ViolationStatus,
    /// Snapshot URL or file name
    pub snapshot_ref: String,
    pub created_at: DateTime<Utc>,
}

impl ViolationEvent {
    pub const UNKNOWN_WORKER_NAME: &'static str = "Unknown Worker";
    pub const UNKNOWN_WORKER_ID: &'static str = "N/A";

    /// Create a new `Pending` event for an unidentified worker.
    pub fn pending(
        camera_id: &CameraId,
        violation_type: ViolationType,
        severity: Severity,
        snapshot_ref: impl Into<String>,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        let local = occurred_at.with_timezone(&Local);

        Self {
            id: Self::id_for(camera_id, occurred_at),
            camera_id: camera_id.clone(),
            date: local.format("%b %d, %Y").to_string(),
            time: local.format("%H:%M:%S").to_string(),
            worker_name: Self::UNKNOWN_WORKER_NAME.to_string(),
            worker_id: Self::UNKNOWN_WORKER_ID.to_string(),
            violation_type,
            severity,
            zone: format!("Zone {}", camera_id),
            status: ViolationStatus::Pending,
            snapshot_ref: snapshot_ref.into(),
            created_at: occurred_at,
        }
    }

    /// Record id, `VIO-{unix_seconds}-{camera}`.
    pub fn id_for(camera_id: &CameraId, occurred_at: DateTime<Utc>) -> String {
        format!("VIO-{}-{}", occurred_at.timestamp(), camera_id)
    }
}
