//! Violation persistence.
//!
//! Workers hand a violating frame to the sink, which writes the snapshot and
//! the violation record on a detached task. At most `max_in_flight` tasks run
//! at once; triggers arriving while the pool is full are dropped.

use std::cmp::Ordering;
use std::sync::Arc;

use safeguard_models::{CameraId, Detection, Severity, ViolationEvent, ViolationType};
use safeguard_store::{SafetyStore, SnapshotDir, StoreError};
use safeguard_vision::Frame;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::clock::Clock;
use crate::error::MonitorResult;
use crate::metrics;

/// Sink configuration.
#[derive(Debug, Clone)]
pub struct SinkConfig {
    pub severity: Severity,
    pub max_in_flight: usize,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            severity: Severity::High,
            max_in_flight: 4,
        }
    }
}

/// What happened to a trigger.
#[derive(Debug)]
pub enum Submission {
    /// Persistence task spawned; resolves to the stored event, if any
    Accepted(JoinHandle<Option<ViolationEvent>>),
    /// Pool full
    Dropped,
    /// No violating detection in the list
    NoViolation,
}

/// Pick the detection a violation record is about.
///
/// Leftmost box first, then topmost, then highest confidence.
pub fn select_violator(detections: &[Detection]) -> Option<&Detection> {
    detections
        .iter()
        .filter(|d| d.is_violation())
        .min_by(|a, b| {
            a.bbox
                .x
                .cmp(&b.bbox.x)
                .then(a.bbox.y.cmp(&b.bbox.y))
                .then(b.confidence.partial_cmp(&a.confidence).unwrap_or(Ordering::Equal))
        })
}

/// Writes violation snapshots and records.
#[derive(Clone)]
pub struct ViolationSink {
    store: Arc<dyn SafetyStore>,
    snapshots: SnapshotDir,
    clock: Arc<dyn Clock>,
    pool: Arc<Semaphore>,
    config: SinkConfig,
}

impl ViolationSink {
    pub fn new(
        store: Arc<dyn SafetyStore>,
        snapshots: SnapshotDir,
        clock: Arc<dyn Clock>,
        config: SinkConfig,
    ) -> Self {
        Self {
            store,
            snapshots,
            clock,
            pool: Arc::new(Semaphore::new(config.max_in_flight.max(1))),
            config,
        }
    }

    /// Tasks currently persisting.
    pub fn in_flight(&self) -> usize {
        self.config.max_in_flight.max(1) - self.pool.available_permits()
    }

    /// Hand a violating frame over for persistence without waiting for it.
    pub fn submit(&self, camera_id: &CameraId, frame: Frame, detections: &[Detection]) -> Submission {
        let Some(violator) = select_violator(detections) else {
            return Submission::NoViolation;
        };
        let violation_type = ViolationType::for_detection(violator);

        let permit = match Arc::clone(&self.pool).try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                warn!(camera_id = %camera_id, "Violation sink saturated, dropping trigger");
                metrics::record_violation_dropped(camera_id.as_str(), "overload");
                return Submission::Dropped;
            }
        };

        let sink = self.clone();
        let camera_id = camera_id.clone();
        Submission::Accepted(tokio::spawn(async move {
            let _permit = permit;
            match sink.record(&camera_id, &frame, violation_type).await {
                Ok(event) => Some(event),
                Err(e) => {
                    error!(camera_id = %camera_id, error = %e, "Failed to log violation");
                    metrics::record_violation_dropped(camera_id.as_str(), "persistence");
                    None
                }
            }
        }))
    }

    /// Write the snapshot and insert the record, in the caller's task.
    pub async fn record(
        &self,
        camera_id: &CameraId,
        frame: &Frame,
        violation_type: ViolationType,
    ) -> MonitorResult<ViolationEvent> {
        let at = self.clock.wall();
        let file_name = SnapshotDir::file_name_for(camera_id, at);
        // An existing file belongs to an earlier record with the same id.
        self.snapshots.write_jpeg(&file_name, &frame.image).await?;

        let event = ViolationEvent::pending(
            camera_id,
            violation_type,
            self.config.severity,
            self.snapshots.reference_for(&file_name),
            at,
        );

        if let Err(e) = self.store.insert_violation(&event).await {
            // A duplicate id means the file belongs to the existing record.
            if !matches!(e, StoreError::Duplicate(_)) {
                if let Err(cleanup) = self.snapshots.remove(&file_name).await {
                    debug!(file = %file_name, error = %cleanup, "Failed to remove orphaned snapshot");
                }
            }
            return Err(e.into());
        }

        metrics::record_violation_logged(camera_id.as_str(), violation_type.as_str());
        info!(
            camera_id = %camera_id,
            id = %event.id,
            violation_type = %violation_type,
            snapshot = %event.snapshot_ref,
            "Violation logged"
        );
        Ok(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::{TimeZone, Utc};
    use image::RgbImage;
    use safeguard_models::{BoundingBox, GearCategory, GearChecks, ViolationStatus};
    use safeguard_store::MemoryStore;
    use safeguard_vision::CANONICAL_FRAME_SIZE;
    use tempfile::TempDir;

    fn detection(x: i32, y: i32, confidence: f32, helmet: bool, vest: bool) -> Detection {
        Detection::new(
            BoundingBox::new(x, y, 50, 100),
            confidence,
            helmet,
            vest,
            GearChecks::default(),
        )
    }

    fn frame() -> Frame {
        Frame::canonical(1, RgbImage::new(640, 360), CANONICAL_FRAME_SIZE)
    }

    async fn sink(max_in_flight: usize) -> (TempDir, Arc<MemoryStore>, ViolationSink) {
        let tmp = TempDir::new().unwrap();
        let snapshots = SnapshotDir::open(
            tmp.path().join("snapshots"),
            Some("http://localhost:5000/snapshots".to_string()),
        )
        .await
        .unwrap();
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(Utc.timestamp_opt(1_741_089_600, 0).unwrap()));
        let sink = ViolationSink::new(
            store.clone(),
            snapshots,
            clock,
            SinkConfig {
                max_in_flight,
                ..Default::default()
            },
        );
        (tmp, store, sink)
    }

    #[test]
    fn test_select_violator_tie_break() {
        let detections = vec![
            detection(200, 10, 0.9, false, true),
            detection(50, 80, 0.4, true, false),
            detection(50, 20, 0.3, true, false),
            detection(50, 20, 0.8, false, false),
            detection(10, 10, 0.99, true, true),
        ];

        let chosen = select_violator(&detections).unwrap();
        assert_eq!(chosen.bbox.x, 50);
        assert_eq!(chosen.bbox.y, 20);
        assert_eq!(chosen.confidence, 0.8);
        assert_eq!(ViolationType::for_detection(chosen), ViolationType::NoHelmet);
    }

    #[test]
    fn test_select_violator_none_when_compliant() {
        assert!(select_violator(&[detection(0, 0, 0.9, true, true)]).is_none());
        assert!(select_violator(&[]).is_none());
    }

    #[tokio::test]
    async fn test_submit_persists_event_and_snapshot() {
        let (tmp, store, sink) = sink(4).await;
        let camera = CameraId::from("cam01");

        let submission = sink.submit(&camera, frame(), &[detection(10, 10, 0.7, true, false)]);
        let Submission::Accepted(handle) = submission else {
            panic!("submission was not accepted");
        };
        let event = handle.await.unwrap().unwrap();

        assert_eq!(event.id, "VIO-1741089600-cam01");
        assert_eq!(event.violation_type, ViolationType::NoVest);
        assert_eq!(event.severity, Severity::High);
        assert_eq!(event.status, ViolationStatus::Pending);
        assert_eq!(
            event.snapshot_ref,
            "http://localhost:5000/snapshots/vio_cam01_1741089600.jpg"
        );
        assert!(tmp.path().join("snapshots/vio_cam01_1741089600.jpg").exists());
        assert_eq!(store.violation_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_submit_drops_when_saturated() {
        let (_tmp, _store, sink) = sink(1).await;
        let camera = CameraId::from("cam01");
        let held = Arc::clone(&sink.pool).try_acquire_owned().unwrap();

        let submission = sink.submit(&camera, frame(), &[detection(0, 0, 0.5, false, false)]);
        assert!(matches!(submission, Submission::Dropped));
        drop(held);
        assert_eq!(sink.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_duplicate_record_keeps_existing_snapshot() {
        let (tmp, store, sink) = sink(4).await;
        let camera = CameraId::from("cam02");
        let path = tmp.path().join("snapshots/vio_cam02_1741089600.jpg");

        sink.record(&camera, &frame(), ViolationType::NoHelmet).await.unwrap();
        let original = std::fs::read(&path).unwrap();

        // Same clock second yields the same id and file name.
        let white = Frame::canonical(
            2,
            RgbImage::from_pixel(640, 360, image::Rgb([255, 255, 255])),
            CANONICAL_FRAME_SIZE,
        );
        let err = sink.record(&camera, &white, ViolationType::NoVest).await.unwrap_err();
        assert!(matches!(
            err,
            crate::error::MonitorError::Store(StoreError::Duplicate(_))
        ));

        assert_eq!(store.violation_count().await.unwrap(), 1);
        let stored = store.recent_violations(1).await.unwrap();
        assert_eq!(stored[0].violation_type, ViolationType::NoHelmet);
        assert_eq!(std::fs::read(&path).unwrap(), original);
    }

    #[tokio::test]
    async fn test_unchecked_category_is_not_reported() {
        let (_tmp, _store, sink) = sink(4).await;
        let d = Detection::new(
            BoundingBox::new(0, 0, 10, 10),
            0.9,
            false,
            false,
            GearChecks::only(&[GearCategory::Vest]),
        );
        let Submission::Accepted(handle) = sink.submit(&CameraId::from("cam03"), frame(), &[d]) else {
            panic!("submission was not accepted");
        };
        let event = handle.await.unwrap().unwrap();
        assert_eq!(event.violation_type, ViolationType::NoVest);
    }
}
