//! One-shot frame analysis: detect people, then classify their gear.

use std::sync::Arc;

use image::RgbImage;
use safeguard_models::{ComplianceStatus, Detection, GearChecks};
use serde::Serialize;
use tracing::debug;

use crate::classifier::PpeClassifier;
use crate::detection::{filter_persons, ObjectDetector, RawDetection};
use crate::error::VisionResult;
use crate::frame::Frame;
use crate::metrics;

/// Default minimum person confidence.
pub const DEFAULT_MIN_CONFIDENCE: f32 = 0.15;

/// Result of analyzing one frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisReport {
    pub compliance_status: ComplianceStatus,
    pub detections: Vec<Detection>,
    pub total_persons: usize,
}

impl AnalysisReport {
    pub fn from_detections(detections: Vec<Detection>) -> Self {
        Self {
            compliance_status: ComplianceStatus::of_all(&detections),
            total_persons: detections.len(),
            detections,
        }
    }
}

/// Runs a detector and the gear classifier over frames.
#[derive(Clone)]
pub struct PpeAnalyzer {
    detector: Arc<dyn ObjectDetector>,
    classifier: PpeClassifier,
    checks: GearChecks,
    min_confidence: f32,
}

impl PpeAnalyzer {
    pub fn new(detector: Arc<dyn ObjectDetector>, classifier: PpeClassifier) -> Self {
        Self {
            detector,
            classifier,
            checks: GearChecks::default(),
            min_confidence: DEFAULT_MIN_CONFIDENCE,
        }
    }

    pub fn with_checks(mut self, checks: GearChecks) -> Self {
        self.checks = checks;
        self
    }

    pub fn with_min_confidence(mut self, min_confidence: f32) -> Self {
        self.min_confidence = min_confidence;
        self
    }

    pub fn checks(&self) -> GearChecks {
        self.checks
    }

    pub fn detector_name(&self) -> &str {
        self.detector.name()
    }

    /// Detect and classify everyone in `frame`.
    pub async fn analyze(&self, frame: &Frame) -> VisionResult<AnalysisReport> {
        let raw = self.detector.detect(frame).await?;
        let detections = self.classify(&frame.image, raw);
        Ok(AnalysisReport::from_detections(detections))
    }

    /// Classify detector output. Non-person and low-confidence boxes are
    /// dropped, as are boxes entirely outside the frame.
    pub fn classify(&self, image: &RgbImage, raw: Vec<RawDetection>) -> Vec<Detection> {
        let persons = filter_persons(raw, self.min_confidence);
        let detections: Vec<Detection> = persons
            .into_iter()
            .filter_map(|p| self.classifier.classify(image, p.bbox, p.confidence, self.checks))
            .collect();

        let violating = detections.iter().filter(|d| d.is_violation()).count();
        metrics::record_persons_classified(detections.len() - violating, violating);
        debug!(
            persons = detections.len(),
            violations = violating,
            "Classified persons"
        );

        detections
    }
}
