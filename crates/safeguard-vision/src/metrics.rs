//! Detection metrics.

use metrics::{counter, histogram};
use std::time::Duration;

/// Metric names as constants for consistency.
pub mod names {
    pub const DETECTOR_DURATION_SECONDS: &str = "safeguard_detector_duration_seconds";
    pub const PERSONS_CLASSIFIED_TOTAL: &str = "safeguard_persons_classified_total";
}

/// Record the latency of one detector call.
pub fn record_detector_latency(detector: &str, elapsed: Duration) {
    let labels = [("detector", detector.to_string())];
    histogram!(names::DETECTOR_DURATION_SECONDS, &labels).record(elapsed.as_secs_f64());
}

/// Record classified people by outcome.
pub fn record_persons_classified(compliant: usize, violating: usize) {
    if compliant > 0 {
        counter!(names::PERSONS_CLASSIFIED_TOTAL, "status" => "compliant").increment(compliant as u64);
    }
    if violating > 0 {
        counter!(names::PERSONS_CLASSIFIED_TOTAL, "status" => "violation").increment(violating as u64);
    }
}
