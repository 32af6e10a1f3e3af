//! Compliance summaries and stored metric snapshots.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::{CameraStats, Detection};

/// Camera id used for metric rows that aggregate every camera.
pub const GLOBAL_CAMERA_ID: &str = "global";

/// Round to one decimal place.
pub fn round_one_decimal(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// Tracked / violating counts and the derived compliance rate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ComplianceSummary {
    pub total_tracked: u32,
    pub active_violations: u32,
    pub compliance_rate: f64,
}

impl ComplianceSummary {
    /// Derive the summary from raw counts.
    ///
    /// The rate is 100 when nobody is tracked, otherwise
    /// `100 * (tracked - violations) / tracked` rounded to one decimal.
    pub fn from_counts(total_tracked: u32, active_violations: u32) -> Self {
        let active_violations = active_violations.min(total_tracked);
        let compliance_rate = if total_tracked == 0 {
            100.0
        } else {
            let compliant = (total_tracked - active_violations) as f64;
            round_one_decimal(100.0 * compliant / total_tracked as f64)
        };

        Self {
            total_tracked,
            active_violations,
            compliance_rate,
        }
    }

    pub fn from_detections(detections: &[Detection]) -> Self {
        let violations = detections.iter().filter(|d| d.is_violation()).count();
        Self::from_counts(detections.len() as u32, violations as u32)
    }
}

impl Default for ComplianceSummary {
    fn default() -> Self {
        Self::from_counts(0, 0)
    }
}

/// A row of the metrics history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct MetricSnapshot {
    pub camera_id: String,
    pub total_tracked: u32,
    pub active_violations: u32,
    pub compliance_rate: f64,
    pub fps: f64,
    pub created_at: DateTime<Utc>,
}

impl MetricSnapshot {
    /// Collapse per-camera stats into one global snapshot.
    ///
    /// Counts are summed, fps is averaged and the compliance rate is derived
    /// from the summed counts.
    pub fn collapse(stats: &[CameraStats], created_at: DateTime<Utc>) -> Self {
        let total_tracked: u32 = stats.iter().map(|s| s.total_tracked).sum();
        let active_violations: u32 = stats.iter().map(|s| s.active_violations).sum();
        let fps = if stats.is_empty() {
            0.0
        } else {
            stats.iter().map(|s| s.fps).sum::<f64>() / stats.len() as f64
        };
        let summary = ComplianceSummary::from_counts(total_tracked, active_violations);

        Self {
            camera_id: GLOBAL_CAMERA_ID.to_string(),
            total_tracked: summary.total_tracked,
            active_violations: summary.active_violations,
            compliance_rate: summary.compliance_rate,
            fps: round_one_decimal(fps),
            created_at,
        }
    }
}
