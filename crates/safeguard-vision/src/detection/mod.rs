//! Person detection capability.
//!
//! The monitor consumes object detection through the [`ObjectDetector`]
//! trait. Two adapters exist:
//! - [`RemoteDetector`]: posts JPEG frames to a model service over HTTP
//! - `YoloDetector` (feature `onnx`): runs a YOLOv8 ONNX model in-process

mod remote;

#[cfg(feature = "onnx")]
mod onnx;

pub use remote::{RemoteDetector, RemoteDetectorConfig};

#[cfg(feature = "onnx")]
pub use onnx::{YoloDetector, YoloDetectorConfig};

use async_trait::async_trait;
use safeguard_models::BoundingBox;
use serde::{Deserialize, Serialize};

use crate::error::VisionResult;
use crate::frame::Frame;

/// COCO class id of "person".
pub const PERSON_CLASS_ID: u32 = 0;

/// One object reported by a detector, in canonical frame pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RawDetection {
    pub bbox: BoundingBox,
    pub confidence: f32,
    pub class_id: u32,
}

impl RawDetection {
    pub fn is_person(&self) -> bool {
        self.class_id == PERSON_CLASS_ID
    }
}

/// An object detection capability.
///
/// Implementations are not required to tolerate concurrent calls; the
/// monitor serializes access through its detection arbiter.
#[async_trait]
pub trait ObjectDetector: Send + Sync {
    /// Detect objects in one frame.
    async fn detect(&self, frame: &Frame) -> VisionResult<Vec<RawDetection>>;

    /// Short name for logs.
    fn name(&self) -> &str;
}

/// Keep people at or above `min_confidence`.
pub fn filter_persons(detections: Vec<RawDetection>, min_confidence: f32) -> Vec<RawDetection> {
    detections
        .into_iter()
        .filter(|d| d.is_person() && d.confidence >= min_confidence)
        .collect()
}
