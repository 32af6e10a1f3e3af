//! In-process YOLOv8 detection through ONNX Runtime.
//!
//! Execution provider selection:
//! - CUDA on Linux with the `cuda` feature
//! - CoreML on macOS
//! - CPU everywhere else

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use async_trait::async_trait;
use image::{imageops, RgbImage};
use ndarray::Array;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::{Tensor, Value};
use safeguard_models::BoundingBox;
use tracing::{debug, info};

use super::{ObjectDetector, RawDetection};
use crate::error::{VisionError, VisionResult};
use crate::frame::Frame;
use crate::metrics;

const NUM_CLASSES: usize = 80;
const NUM_CANDIDATES: usize = 8400;

/// YOLOv8 detector configuration.
#[derive(Debug, Clone)]
pub struct YoloDetectorConfig {
    pub model_path: String,
    /// Candidates below this score are discarded before NMS
    pub confidence_threshold: f32,
    /// IoU above which same-class boxes are suppressed
    pub nms_threshold: f32,
    /// Square model input size
    pub input_size: u32,
}

impl Default for YoloDetectorConfig {
    fn default() -> Self {
        Self {
            model_path: "models/yolov8n.onnx".to_string(),
            confidence_threshold: 0.15,
            nms_threshold: 0.45,
            input_size: 640,
        }
    }
}

struct Inner {
    session: Mutex<Session>,
    config: YoloDetectorConfig,
}

/// Local YOLOv8 detector. Inference runs on the blocking thread pool.
pub struct YoloDetector {
    inner: Arc<Inner>,
}

impl YoloDetector {
    pub fn new(config: YoloDetectorConfig) -> VisionResult<Self> {
        let model_path = Path::new(&config.model_path);
        if !model_path.exists() {
            return Err(VisionError::model_not_found(&config.model_path));
        }

        let session = Mutex::new(create_session(model_path)?);
        info!(
            model_path = %config.model_path,
            input_size = config.input_size,
            "YOLO detector initialized"
        );

        Ok(Self {
            inner: Arc::new(Inner { session, config }),
        })
    }

    pub fn config(&self) -> &YoloDetectorConfig {
        &self.inner.config
    }
}

#[async_trait]
impl ObjectDetector for YoloDetector {
    async fn detect(&self, frame: &Frame) -> VisionResult<Vec<RawDetection>> {
        let started = Instant::now();
        let inner = Arc::clone(&self.inner);
        let image = Arc::clone(&frame.image);

        let detections = tokio::task::spawn_blocking(move || inner.detect(&image))
            .await
            .map_err(|e| VisionError::detection_failed(format!("Inference task failed: {}", e)))??;

        metrics::record_detector_latency(self.name(), started.elapsed());
        debug!(count = detections.len(), "YOLO detection completed");
        Ok(detections)
    }

    fn name(&self) -> &str {
        "yolov8"
    }
}

impl Inner {
    fn detect(&self, image: &RgbImage) -> VisionResult<Vec<RawDetection>> {
        let input = self.preprocess(image)?;
        let outputs = self.run_inference(input)?;
        self.postprocess(&outputs, image.width(), image.height())
    }

    /// Resize to the square input, scale to [0, 1], lay out as NCHW.
    fn preprocess(&self, image: &RgbImage) -> VisionResult<Value> {
        let size = self.config.input_size;
        let resized = imageops::resize(image, size, size, imageops::FilterType::Triangle);
        let (w, h) = (size as usize, size as usize);

        let mut chw = Vec::with_capacity(3 * h * w);
        for c in 0..3 {
            for y in 0..h {
                for x in 0..w {
                    chw.push(resized.get_pixel(x as u32, y as u32)[c] as f32 / 255.0);
                }
            }
        }

        Tensor::from_array((vec![1usize, 3, h, w], chw.into_boxed_slice()))
            .map(Value::from)
            .map_err(|e| VisionError::detection_failed(format!("Failed to create tensor: {}", e)))
    }

    fn run_inference(&self, input: Value) -> VisionResult<Vec<f32>> {
        let mut session = self
            .session
            .lock()
            .map_err(|_| VisionError::internal("Session lock poisoned"))?;

        let outputs = session
            .run(ort::inputs![input])
            .map_err(|e| VisionError::detection_failed(format!("ONNX inference failed: {}", e)))?;

        let output = outputs
            .get("output0")
            .ok_or_else(|| VisionError::detection_failed("Missing output0 tensor"))?;

        let tensor = output
            .try_extract_tensor::<f32>()
            .map_err(|e| VisionError::detection_failed(format!("Failed to extract tensor: {}", e)))?;

        Ok(tensor.1.iter().copied().collect())
    }

    /// Decode the `[1, 84, 8400]` output into pixel boxes and apply NMS.
    fn postprocess(&self, outputs: &[f32], width: u32, height: u32) -> VisionResult<Vec<RawDetection>> {
        let features = 4 + NUM_CLASSES;
        if outputs.len() != features * NUM_CANDIDATES {
            return Err(VisionError::detection_failed(format!(
                "Unexpected output size: expected {}, got {}",
                features * NUM_CANDIDATES,
                outputs.len()
            )));
        }

        let output = Array::from_shape_vec((features, NUM_CANDIDATES), outputs.to_vec())
            .map_err(|e| VisionError::detection_failed(format!("Failed to reshape output: {}", e)))?;
        let rows = output.t();

        let input_size = self.config.input_size as f32;
        let scale_w = width as f32 / input_size;
        let scale_h = height as f32 / input_size;
        let mut candidates = Vec::new();

        for i in 0..NUM_CANDIDATES {
            let (class_id, score) = (0..NUM_CLASSES)
                .map(|c| (c, rows[[i, 4 + c]]))
                .fold((0, 0.0f32), |best, cur| if cur.1 > best.1 { cur } else { best });

            if score < self.config.confidence_threshold {
                continue;
            }

            let (cx, cy, w, h) = (rows[[i, 0]], rows[[i, 1]], rows[[i, 2]], rows[[i, 3]]);
            let x1 = ((cx - w / 2.0) * scale_w).max(0.0);
            let y1 = ((cy - h / 2.0) * scale_h).max(0.0);
            let x2 = ((cx + w / 2.0) * scale_w).min(width as f32);
            let y2 = ((cy + h / 2.0) * scale_h).min(height as f32);

            candidates.push(RawDetection {
                bbox: BoundingBox::from_corners(x1 as i32, y1 as i32, x2 as i32, y2 as i32),
                confidence: score,
                class_id: class_id as u32,
            });
        }

        Ok(non_maximum_suppression(candidates, self.config.nms_threshold))
    }
}

/// Greedy same-class NMS, highest confidence first.
fn non_maximum_suppression(mut detections: Vec<RawDetection>, threshold: f32) -> Vec<RawDetection> {
    detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut keep: Vec<RawDetection> = Vec::new();
    for candidate in detections {
        let suppressed = keep.iter().any(|k| {
            k.class_id == candidate.class_id && iou(&k.bbox, &candidate.bbox) > threshold
        });
        if !suppressed {
            keep.push(candidate);
        }
    }
    keep
}

fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let x1 = a.x.max(b.x);
    let y1 = a.y.max(b.y);
    let x2 = a.right().min(b.right());
    let y2 = a.bottom().min(b.bottom());

    let intersection = ((x2 - x1).max(0) as f32) * ((y2 - y1).max(0) as f32);
    let union = a.area() as f32 + b.area() as f32 - intersection;
    if union > 0.0 {
        intersection / union
    } else {
        0.0
    }
}

/// Create an ONNX Runtime session, preferring hardware acceleration.
fn create_session(model_path: &Path) -> VisionResult<Session> {
    let model_bytes = std::fs::read(model_path)?;

    let builder = Session::builder()
        .map_err(|e| VisionError::internal(format!("Failed to create session builder: {}", e)))?
        .with_optimization_level(GraphOptimizationLevel::Level3)
        .map_err(|e| VisionError::internal(format!("Failed to set optimization level: {}", e)))?;

    #[cfg(all(target_os = "linux", feature = "cuda"))]
    {
        use ort::execution_providers::CUDAExecutionProvider;
        if let Ok(cuda_builder) = builder
            .clone()
            .with_execution_providers([CUDAExecutionProvider::default().build()])
        {
            if let Ok(session) = cuda_builder.commit_from_memory(&model_bytes) {
                info!("Using CUDA execution provider for person detection");
                return Ok(session);
            }
        }
        debug!("CUDA execution provider not available, trying alternatives");
    }

    #[cfg(target_os = "macos")]
    {
        use ort::execution_providers::CoreMLExecutionProvider;
        if let Ok(coreml_builder) = builder
            .clone()
            .with_execution_providers([CoreMLExecutionProvider::default().build()])
        {
            if let Ok(session) = coreml_builder.commit_from_memory(&model_bytes) {
                info!("Using CoreML execution provider for person detection");
                return Ok(session);
            }
        }
        debug!("CoreML execution provider not available, using CPU");
    }

    info!("Using CPU execution provider for person detection");
    builder
        .commit_from_memory(&model_bytes)
        .map_err(|e| VisionError::internal(format!("Failed to load ONNX model: {}", e)))
}
