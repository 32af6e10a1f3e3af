//! Frame ingestion, person detection and PPE classification.
//!
//! This crate provides:
//! - Canonical-resolution frame sources (ffmpeg-decoded files and streams,
//!   in-memory frames, looping wrapper)
//! - The object detection capability trait with remote and ONNX adapters
//! - The HSV color-region helmet/vest classifier
//! - One-shot frame analysis and overlay drawing

pub mod analyzer;
pub mod annotate;
pub mod classifier;
pub mod detection;
pub mod error;
pub mod frame;
pub mod metrics;
pub mod source;

pub use analyzer::{AnalysisReport, PpeAnalyzer, DEFAULT_MIN_CONFIDENCE};
pub use annotate::{annotate, COMPLIANT_COLOR, VIOLATION_COLOR};
pub use classifier::{ClassifierConfig, GearProfile, HsvRange, PpeClassifier, VerticalBand};
pub use detection::{ObjectDetector, RawDetection, RemoteDetector, RemoteDetectorConfig};
#[cfg(feature = "onnx")]
pub use detection::{YoloDetector, YoloDetectorConfig};
pub use error::{VisionError, VisionResult};
pub use frame::{Frame, FrameSize, CANONICAL_FRAME_SIZE};
pub use source::{FfmpegSource, FrameSource, LoopingSource, MemorySource, SourceLocation};
