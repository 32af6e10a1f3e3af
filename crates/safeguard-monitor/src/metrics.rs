//! Prometheus metrics for the monitor.

use std::net::SocketAddr;

use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::error::{MonitorError, MonitorResult};

/// Install the Prometheus recorder and serve `/metrics` on `addr`.
pub fn init_metrics(addr: SocketAddr) -> MonitorResult<()> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| MonitorError::config_error(format!("Failed to install Prometheus exporter: {}", e)))
}

/// Metric names as constants for consistency.
pub mod names {
    // Frame loop
    pub const FRAMES_PROCESSED_TOTAL: &str = "safeguard_frames_processed_total";
    pub const FRAME_READ_ERRORS_TOTAL: &str = "safeguard_frame_read_errors_total";
    pub const CAMERA_FPS: &str = "safeguard_camera_fps";
    pub const CAMERAS_RUNNING: &str = "safeguard_cameras_running";

    // Detection
    pub const DETECTION_RUNS_TOTAL: &str = "safeguard_detection_runs_total";
    pub const DETECTION_FAILURES_TOTAL: &str = "safeguard_detection_failures_total";
    pub const ARBITER_BUSY_TOTAL: &str = "safeguard_arbiter_busy_total";

    // Violations
    pub const VIOLATIONS_LOGGED_TOTAL: &str = "safeguard_violations_logged_total";
    pub const VIOLATIONS_DROPPED_TOTAL: &str = "safeguard_violations_dropped_total";

    // Retention
    pub const SWEEP_ROWS_DELETED_TOTAL: &str = "safeguard_sweep_rows_deleted_total";
    pub const SWEEP_FAILURES_TOTAL: &str = "safeguard_sweep_failures_total";
}

pub fn record_frame(camera_id: &str) {
    counter!(names::FRAMES_PROCESSED_TOTAL, "camera" => camera_id.to_string()).increment(1);
}

pub fn record_frame_read_error(camera_id: &str) {
    counter!(names::FRAME_READ_ERRORS_TOTAL, "camera" => camera_id.to_string()).increment(1);
}

pub fn set_camera_fps(camera_id: &str, fps: f64) {
    gauge!(names::CAMERA_FPS, "camera" => camera_id.to_string()).set(fps);
}

pub fn set_cameras_running(count: usize) {
    gauge!(names::CAMERAS_RUNNING).set(count as f64);
}

pub fn record_detection_run(camera_id: &str) {
    counter!(names::DETECTION_RUNS_TOTAL, "camera" => camera_id.to_string()).increment(1);
}

pub fn record_detection_failure(camera_id: &str) {
    counter!(names::DETECTION_FAILURES_TOTAL, "camera" => camera_id.to_string()).increment(1);
}

pub fn record_arbiter_busy() {
    counter!(names::ARBITER_BUSY_TOTAL).increment(1);
}

pub fn record_violation_logged(camera_id: &str, violation_type: &str) {
    counter!(
        names::VIOLATIONS_LOGGED_TOTAL,
        "camera" => camera_id.to_string(),
        "type" => violation_type.to_string()
    )
    .increment(1);
}

/// `reason` is `overload` or `persistence`.
pub fn record_violation_dropped(camera_id: &str, reason: &'static str) {
    counter!(
        names::VIOLATIONS_DROPPED_TOTAL,
        "camera" => camera_id.to_string(),
        "reason" => reason
    )
    .increment(1);
}

/// `table` is `violations` or `metrics`.
pub fn record_sweep_deleted(table: &'static str, rows: u64) {
    if rows > 0 {
        counter!(names::SWEEP_ROWS_DELETED_TOTAL, "table" => table).increment(rows);
    }
}

pub fn record_sweep_failure() {
    counter!(names::SWEEP_FAILURES_TOTAL).increment(1);
}
