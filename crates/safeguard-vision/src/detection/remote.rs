//! HTTP model service adapter.

use std::io::Cursor;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use image::codecs::jpeg::JpegEncoder;
use reqwest::{header, Client};
use safeguard_models::BoundingBox;
use serde::Deserialize;
use tracing::debug;
use url::Url;

use super::{ObjectDetector, RawDetection};
use crate::error::{VisionError, VisionResult};
use crate::frame::Frame;
use crate::metrics;

/// Remote detector configuration.
#[derive(Debug, Clone)]
pub struct RemoteDetectorConfig {
    /// Service base URL, e.g. `http://localhost:8500`
    pub base_url: String,
    pub timeout: Duration,
    pub connect_timeout: Duration,
    /// JPEG quality of uploaded frames (1-100)
    pub jpeg_quality: u8,
}

impl Default for RemoteDetectorConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8500".to_string(),
            timeout: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(3),
            jpeg_quality: 85,
        }
    }
}

#[derive(Debug, Deserialize)]
struct DetectResponse {
    #[serde(default)]
    detections: Vec<WireDetection>,
}

#[derive(Debug, Deserialize)]
struct WireDetection {
    /// `[x1, y1, x2, y2]` in pixels of the posted image
    bbox: [f32; 4],
    confidence: f32,
    class_id: u32,
}

impl From<WireDetection> for RawDetection {
    fn from(wire: WireDetection) -> Self {
        let [x1, y1, x2, y2] = wire.bbox;
        RawDetection {
            bbox: BoundingBox::from_corners(x1 as i32, y1 as i32, x2 as i32, y2 as i32),
            confidence: wire.confidence,
            class_id: wire.class_id,
        }
    }
}

/// Detector backed by a model service.
///
/// Frames are posted as `image/jpeg` to `{base_url}/detect`; the service
/// answers `{"detections":[{"bbox":[x1,y1,x2,y2],"confidence":f,"class_id":n}]}`.
pub struct RemoteDetector {
    http: Client,
    endpoint: Url,
    config: RemoteDetectorConfig,
}

impl RemoteDetector {
    pub fn new(config: RemoteDetectorConfig) -> VisionResult<Self> {
        let url = format!("{}/detect", config.base_url.trim_end_matches('/'));
        let endpoint = Url::parse(&url).map_err(|e| {
            VisionError::internal(format!("Invalid detector URL {}: {}", config.base_url, e))
        })?;

        let http = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .pool_max_idle_per_host(4)
            .user_agent(concat!("safeguard-vision/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http,
            endpoint,
            config,
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    fn encode(&self, frame: &Frame) -> VisionResult<Vec<u8>> {
        let mut buffer = Cursor::new(Vec::new());
        let mut encoder = JpegEncoder::new_with_quality(&mut buffer, self.config.jpeg_quality);
        encoder.encode_image(frame.image.as_ref())?;
        Ok(buffer.into_inner())
    }
}

#[async_trait]
impl ObjectDetector for RemoteDetector {
    async fn detect(&self, frame: &Frame) -> VisionResult<Vec<RawDetection>> {
        let started = Instant::now();
        let body = self.encode(frame)?;

        let response = self
            .http
            .post(self.endpoint.clone())
            .header(header::CONTENT_TYPE, "image/jpeg")
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(VisionError::ServiceError {
                status: status.as_u16(),
                message,
            });
        }

        let parsed: DetectResponse = response
            .json()
            .await
            .map_err(|e| VisionError::detection_failed(format!("Malformed response: {}", e)))?;

        let detections: Vec<RawDetection> =
            parsed.detections.into_iter().map(RawDetection::from).collect();

        metrics::record_detector_latency(self.name(), started.elapsed());
        debug!(
            count = detections.len(),
            sequence = frame.sequence,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Remote detection completed"
        );

        Ok(detections)
    }

    fn name(&self) -> &str {
        "remote"
    }
}
