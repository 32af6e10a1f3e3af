//! Shared data models for the SafeGuard monitor.
//!
//! This crate provides Serde-serializable types for:
//! - Camera identity, status and live statistics
//! - Per-person detections and gear compliance
//! - Violation events and their review lifecycle
//! - Aggregated metric snapshots

pub mod camera;
pub mod detection;
pub mod geometry;
pub mod metrics;
pub mod violation;

// Re-export common types
pub use camera::{CameraId, CameraStats, CameraStatus};
pub use detection::{ComplianceStatus, Detection, GearCategory, GearChecks};
pub use geometry::BoundingBox;
pub use metrics::{round_one_decimal, ComplianceSummary, MetricSnapshot, GLOBAL_CAMERA_ID};
pub use violation::{
    ParseViolationStatusError, Severity, ViolationEvent, ViolationStatus, ViolationType,
};
