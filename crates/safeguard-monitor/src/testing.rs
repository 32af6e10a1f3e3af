//! Shared fixtures for unit tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use image::RgbImage;
use safeguard_models::BoundingBox;
use safeguard_store::{MemoryStore, SnapshotDir};
use safeguard_vision::{
    Frame, FrameSource, MemorySource, ObjectDetector, RawDetection, VisionError, VisionResult,
    CANONICAL_FRAME_SIZE,
};
use tempfile::TempDir;

use crate::clock::ManualClock;
use crate::sink::{SinkConfig, ViolationSink};

/// Reports one bare-headed, vest-less person on every call.
#[derive(Debug, Default)]
pub struct CountingDetector {
    calls: AtomicUsize,
    failing: AtomicBool,
}

impl CountingDetector {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl ObjectDetector for CountingDetector {
    async fn detect(&self, _frame: &Frame) -> VisionResult<Vec<RawDetection>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(VisionError::detection_failed("scripted failure"));
        }
        Ok(vec![RawDetection {
            bbox: BoundingBox::new(100, 50, 80, 200),
            confidence: 0.9,
            class_id: 0,
        }])
    }

    fn name(&self) -> &str {
        "counting"
    }
}

/// A looping source of `count` black canonical frames.
pub fn black_source(count: usize) -> Box<dyn FrameSource> {
    let images = (0..count).map(|_| RgbImage::new(640, 360)).collect();
    Box::new(MemorySource::new("black", images, CANONICAL_FRAME_SIZE))
}

/// Source that fails to open.
pub fn dead_source() -> Box<dyn FrameSource> {
    Box::new(MemorySource::new("dead", Vec::new(), CANONICAL_FRAME_SIZE))
}

pub fn manual_clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(Utc.timestamp_opt(1_741_089_600, 0).unwrap()))
}

pub struct SinkFixture {
    pub dir: TempDir,
    pub store: Arc<MemoryStore>,
    pub snapshots: SnapshotDir,
    pub sink: ViolationSink,
}

pub async fn sink_fixture(clock: Arc<ManualClock>) -> SinkFixture {
    let dir = TempDir::new().unwrap();
    let snapshots = SnapshotDir::open(dir.path().join("snapshots"), None)
        .await
        .unwrap();
    let store = Arc::new(MemoryStore::new());
    let sink = ViolationSink::new(store.clone(), snapshots.clone(), clock, SinkConfig::default());
    SinkFixture {
        dir,
        store,
        snapshots,
        sink,
    }
}

/// Wait for detached sink tasks to finish.
pub async fn drain(sink: &ViolationSink) {
    for _ in 0..200 {
        if sink.in_flight() == 0 {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }
    panic!("sink tasks did not finish");
}
