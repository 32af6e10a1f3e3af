//! Per-camera frame loop.
//!
//! Each iteration reads one frame, runs detection on every Kth frame (through
//! the shared arbiter), redraws the overlay from the held detections,
//! publishes the camera state and, when people are in violation and the
//! cooldown allows, hands the frame to the violation sink.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use safeguard_models::{CameraId, CameraStats, CameraStatus, ComplianceSummary, Detection};
use safeguard_vision::{annotate, Frame, FrameSize, FrameSource, LoopingSource, PpeAnalyzer, CANONICAL_FRAME_SIZE};
use tracing::{debug, Instrument};

use crate::arbiter::DetectionArbiter;
use crate::clock::Clock;
use crate::logging::CameraLogger;
use crate::metrics;
use crate::sink::{Submission, ViolationSink};
use crate::stats::{CameraState, FpsMeter, DEFAULT_FPS_WINDOW};

/// Frame-loop tuning.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Run detection on every Nth frame
    pub sampling_factor: u32,
    /// Drop held detections when a sampled frame finds the detector busy
    /// and this many frames have passed since the last successful detection
    /// (0 keeps them indefinitely)
    pub staleness_frames: u32,
    /// Minimum time between logged violations per camera
    pub cooldown: Duration,
    /// Delay between iterations
    pub loop_interval: Duration,
    /// Frames per frame-rate recomputation
    pub fps_window: u32,
    pub frame_size: FrameSize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            sampling_factor: 5,
            staleness_frames: 90,
            cooldown: Duration::from_secs(15),
            loop_interval: Duration::from_millis(60),
            fps_window: DEFAULT_FPS_WINDOW,
            frame_size: CANONICAL_FRAME_SIZE,
        }
    }
}

/// State shared between a worker and its readers.
#[derive(Debug)]
pub struct CameraShared {
    camera_id: CameraId,
    running: AtomicBool,
    state: Mutex<CameraState>,
}

impl CameraShared {
    pub fn new(camera_id: CameraId) -> Self {
        Self {
            state: Mutex::new(CameraState::new(camera_id.clone())),
            camera_id,
            running: AtomicBool::new(true),
        }
    }

    pub fn camera_id(&self) -> &CameraId {
        &self.camera_id
    }

    /// Ask the loop to exit at the top of its next iteration.
    pub fn request_stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn should_run(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn lock(&self) -> MutexGuard<'_, CameraState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn status(&self) -> CameraStatus {
        self.lock().status
    }

    pub fn stats(&self) -> CameraStats {
        self.lock().to_stats()
    }

    pub fn latest_frame(&self) -> Option<Frame> {
        self.lock().latest_annotated_frame.clone()
    }

    fn set_status(&self, status: CameraStatus) {
        self.lock().status = status;
    }
}

/// How the detection step of an iteration went.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectionOutcome {
    /// Not a sampled frame
    Skipped,
    /// New detection list
    Refreshed,
    /// Arbiter timed out; previous list kept
    Busy,
    /// Detector failed; list cleared
    Failed,
}

/// Result of one loop iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepOutcome {
    /// False when no frame could be read
    pub frame_read: bool,
    pub detection: DetectionOutcome,
    pub violation_triggered: bool,
}

impl StepOutcome {
    fn no_frame() -> Self {
        Self {
            frame_read: false,
            detection: DetectionOutcome::Skipped,
            violation_triggered: false,
        }
    }
}

/// Processes one camera.
pub struct CameraWorker {
    shared: Arc<CameraShared>,
    source: LoopingSource<Box<dyn FrameSource>>,
    analyzer: PpeAnalyzer,
    arbiter: DetectionArbiter,
    sink: ViolationSink,
    clock: Arc<dyn Clock>,
    config: WorkerConfig,
    logger: CameraLogger,
    held: Vec<Detection>,
    frames_since_detection: u64,
    frame_count: u64,
    fps: FpsMeter,
}

impl CameraWorker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        shared: Arc<CameraShared>,
        source: Box<dyn FrameSource>,
        analyzer: PpeAnalyzer,
        arbiter: DetectionArbiter,
        sink: ViolationSink,
        clock: Arc<dyn Clock>,
        config: WorkerConfig,
    ) -> Self {
        let logger = CameraLogger::new(shared.camera_id(), "frame_loop");
        let fps = FpsMeter::new(config.fps_window, clock.now());
        Self {
            source: LoopingSource::new(source, config.frame_size),
            shared,
            analyzer,
            arbiter,
            sink,
            clock,
            config,
            logger,
            held: Vec::new(),
            frames_since_detection: 0,
            frame_count: 0,
            fps,
        }
    }

    pub fn shared(&self) -> &Arc<CameraShared> {
        &self.shared
    }

    /// Detections currently used for overlays and counts.
    pub fn held_detections(&self) -> &[Detection] {
        &self.held
    }

    /// Open the source and loop until stopped.
    ///
    /// Returns the terminal status: `Unavailable` if the source could not be
    /// opened, otherwise `Stopped`.
    pub async fn run(mut self) -> CameraStatus {
        let span = self.logger.create_span();
        async move {
            if let Err(e) = self.source.open().await {
                self.logger
                    .log_error(&format!("source {} unavailable: {}", self.source.describe(), e));
                self.shared.request_stop();
                self.shared.set_status(CameraStatus::Unavailable);
                return CameraStatus::Unavailable;
            }

            self.fps = FpsMeter::new(self.config.fps_window, self.clock.now());
            self.shared.set_status(CameraStatus::Running);
            self.logger.log_start(&format!(
                "{} with detector {}",
                self.source.describe(),
                self.analyzer.detector_name()
            ));

            while self.shared.should_run() {
                self.step().await;
                self.clock.sleep(self.config.loop_interval).await;
            }

            self.shared.set_status(CameraStatus::Stopped);
            self.logger
                .log_completion(&format!("{} frames processed", self.frame_count));
            CameraStatus::Stopped
        }
        .instrument(span)
        .await
    }

    /// Open the source without entering the loop.
    pub async fn open(&mut self) -> safeguard_vision::VisionResult<()> {
        self.source.open().await?;
        self.shared.set_status(CameraStatus::Running);
        Ok(())
    }

    /// Run one iteration of the frame loop, without the trailing delay.
    pub async fn step(&mut self) -> StepOutcome {
        let camera_id = self.shared.camera_id().clone();

        let rewinds = self.source.rewinds();
        let frame = match self.source.next_frame().await {
            Ok(frame) => frame,
            Err(e) => {
                self.logger.log_warning(&format!("frame read failed: {}", e));
                metrics::record_frame_read_error(camera_id.as_str());
                return StepOutcome::no_frame();
            }
        };
        if self.source.rewinds() > rewinds {
            self.logger.log_progress(&format!(
                "source restarted after {} frames",
                self.frame_count
            ));
        }

        self.frame_count += 1;
        metrics::record_frame(camera_id.as_str());
        let fps = self.fps.on_frame(self.clock.now());
        if let Some(fps) = fps {
            metrics::set_camera_fps(camera_id.as_str(), fps);
        }

        let sampling = u64::from(self.config.sampling_factor.max(1));
        let detection = if self.frame_count % sampling == 0 {
            self.detect(&camera_id, &frame).await
        } else {
            DetectionOutcome::Skipped
        };

        match detection {
            DetectionOutcome::Refreshed | DetectionOutcome::Failed => self.frames_since_detection = 0,
            DetectionOutcome::Skipped => self.frames_since_detection += 1,
            DetectionOutcome::Busy => {
                self.frames_since_detection += 1;
                self.expire_stale(&camera_id);
            }
        }

        let annotated = Frame {
            sequence: frame.sequence,
            image: Arc::new(annotate(&frame.image, &self.held)),
        };
        let summary = ComplianceSummary::from_detections(&self.held);
        let now = self.clock.now();

        let trigger = {
            let mut state = self.shared.lock();
            state.latest_annotated_frame = Some(annotated.clone());
            state.summary = summary;
            state.frames_processed = self.frame_count;
            if let Some(fps) = fps {
                state.fps = fps;
            }
            if detection != DetectionOutcome::Skipped && detection != DetectionOutcome::Busy {
                state.detection_runs += 1;
            }

            let trigger = summary.active_violations > 0
                && state.cooldown_elapsed(now, self.config.cooldown);
            if trigger {
                state.last_violation_at = Some(now);
            }
            trigger
        };

        if trigger {
            match self.sink.submit(&camera_id, annotated, &self.held) {
                Submission::Accepted(_) => {
                    debug!(camera_id = %camera_id, violations = summary.active_violations, "Violation submitted");
                }
                Submission::Dropped | Submission::NoViolation => {}
            }
        }

        StepOutcome {
            frame_read: true,
            detection,
            violation_triggered: trigger,
        }
    }

    async fn detect(&mut self, camera_id: &CameraId, frame: &Frame) -> DetectionOutcome {
        let analyzer = &self.analyzer;
        match self.arbiter.run_exclusive(|| analyzer.analyze(frame)).await {
            Ok(Ok(report)) => {
                metrics::record_detection_run(camera_id.as_str());
                self.held = report.detections;
                DetectionOutcome::Refreshed
            }
            Ok(Err(e)) => {
                self.logger.log_warning(&format!("detection failed: {}", e));
                metrics::record_detection_failure(camera_id.as_str());
                self.held.clear();
                DetectionOutcome::Failed
            }
            Err(e) if e.is_busy() => {
                debug!(camera_id = %camera_id, "Detector busy, keeping previous detections");
                DetectionOutcome::Busy
            }
            Err(e) => {
                self.logger.log_warning(&format!("detection arbiter error: {}", e));
                DetectionOutcome::Busy
            }
        }
    }

    fn expire_stale(&mut self, camera_id: &CameraId) {
        let bound = u64::from(self.config.staleness_frames);
        if bound > 0 && self.frames_since_detection >= bound && !self.held.is_empty() {
            debug!(
                camera_id = %camera_id,
                frames = self.frames_since_detection,
                "Expiring stale detections"
            );
            self.held.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::testing::{black_source, dead_source, drain, manual_clock, sink_fixture, CountingDetector};
    use image::Rgb;
    use safeguard_store::SafetyStore;
    use safeguard_vision::{PpeClassifier, VIOLATION_COLOR};

    fn worker(
        detector: Arc<CountingDetector>,
        arbiter: DetectionArbiter,
        sink: ViolationSink,
        clock: Arc<ManualClock>,
        config: WorkerConfig,
        source: Box<dyn FrameSource>,
    ) -> CameraWorker {
        let analyzer = PpeAnalyzer::new(detector, PpeClassifier::default());
        CameraWorker::new(
            Arc::new(CameraShared::new(CameraId::from("cam01"))),
            source,
            analyzer,
            arbiter,
            sink,
            clock,
            config,
        )
    }

    #[tokio::test]
    async fn test_samples_every_fifth_frame() {
        let clock = manual_clock();
        let fixture = sink_fixture(clock.clone()).await;
        let detector = Arc::new(CountingDetector::default());
        let mut worker = worker(
            detector.clone(),
            DetectionArbiter::default(),
            fixture.sink.clone(),
            clock,
            WorkerConfig::default(),
            black_source(7),
        );
        worker.open().await.unwrap();

        for i in 1..=100u64 {
            let outcome = worker.step().await;
            assert!(outcome.frame_read);
            let expected = if i % 5 == 0 {
                DetectionOutcome::Refreshed
            } else {
                DetectionOutcome::Skipped
            };
            assert_eq!(outcome.detection, expected, "frame {}", i);

            let frame = worker.shared().latest_frame().unwrap();
            assert_eq!(frame.sequence, i);
            let edge = *frame.image.get_pixel(100, 50);
            if i < 5 {
                assert_eq!(edge, Rgb([0, 0, 0]), "frame {}", i);
            } else {
                assert_eq!(edge, VIOLATION_COLOR, "frame {}", i);
                assert_eq!(*frame.image.get_pixel(140, 150), Rgb([0, 0, 0]));
            }
        }

        assert_eq!(detector.calls(), 20);
        let state = worker.shared().lock().clone();
        assert_eq!(state.frames_processed, 100);
        assert_eq!(state.detection_runs, 20);
        assert_eq!(state.summary.total_tracked, 1);
        assert_eq!(state.summary.active_violations, 1);
        drain(&fixture.sink).await;
    }

    #[tokio::test]
    async fn test_sparse_sampling_keeps_detections_between_runs() {
        let clock = manual_clock();
        let fixture = sink_fixture(clock.clone()).await;
        let detector = Arc::new(CountingDetector::default());
        let mut worker = worker(
            detector.clone(),
            DetectionArbiter::default(),
            fixture.sink.clone(),
            clock,
            WorkerConfig {
                sampling_factor: 100,
                staleness_frames: 90,
                ..Default::default()
            },
            black_source(3),
        );
        worker.open().await.unwrap();

        for i in 1..=200u64 {
            worker.step().await;
            if i >= 100 {
                assert_eq!(worker.held_detections().len(), 1, "frame {}", i);
            }
        }
        assert_eq!(detector.calls(), 2);
        drain(&fixture.sink).await;
    }

    #[tokio::test]
    async fn test_busy_arbiter_keeps_previous_detections() {
        let clock = manual_clock();
        let fixture = sink_fixture(clock.clone()).await;
        let detector = Arc::new(CountingDetector::default());
        let arbiter = DetectionArbiter::new(Duration::from_millis(10));
        let mut worker = worker(
            detector.clone(),
            arbiter.clone(),
            fixture.sink.clone(),
            clock,
            WorkerConfig::default(),
            black_source(3),
        );
        worker.open().await.unwrap();

        for _ in 0..5 {
            worker.step().await;
        }
        assert_eq!(worker.held_detections().len(), 1);

        let lease = arbiter.acquire().await.unwrap();
        for _ in 0..4 {
            worker.step().await;
        }
        let outcome = worker.step().await;
        drop(lease);

        assert_eq!(outcome.detection, DetectionOutcome::Busy);
        assert_eq!(detector.calls(), 1);
        assert_eq!(worker.held_detections().len(), 1);
        assert_eq!(worker.shared().stats().active_violations, 1);
        drain(&fixture.sink).await;
    }

    #[tokio::test]
    async fn test_detector_failure_clears_detections() {
        let clock = manual_clock();
        let fixture = sink_fixture(clock.clone()).await;
        let detector = Arc::new(CountingDetector::default());
        let mut worker = worker(
            detector.clone(),
            DetectionArbiter::default(),
            fixture.sink.clone(),
            clock,
            WorkerConfig {
                sampling_factor: 1,
                ..Default::default()
            },
            black_source(2),
        );
        worker.open().await.unwrap();

        assert_eq!(worker.step().await.detection, DetectionOutcome::Refreshed);
        detector.set_failing(true);
        assert_eq!(worker.step().await.detection, DetectionOutcome::Failed);

        assert!(worker.held_detections().is_empty());
        assert_eq!(worker.shared().stats().total_tracked, 0);
        drain(&fixture.sink).await;
    }

    #[tokio::test]
    async fn test_cooldown_gates_violation_events() {
        let clock = manual_clock();
        let fixture = sink_fixture(clock.clone()).await;
        let mut worker = worker(
            Arc::new(CountingDetector::default()),
            DetectionArbiter::default(),
            fixture.sink.clone(),
            clock.clone(),
            WorkerConfig {
                sampling_factor: 1,
                cooldown: Duration::from_secs(15),
                ..Default::default()
            },
            black_source(1),
        );
        worker.open().await.unwrap();

        assert!(worker.step().await.violation_triggered);
        drain(&fixture.sink).await;

        clock.advance(Duration::from_secs(15));
        assert!(!worker.step().await.violation_triggered);

        clock.advance(Duration::from_millis(1000));
        assert!(worker.step().await.violation_triggered);
        drain(&fixture.sink).await;

        assert_eq!(fixture.store.violation_count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_stale_detections_expire_while_detector_busy() {
        let clock = manual_clock();
        let fixture = sink_fixture(clock.clone()).await;
        let detector = Arc::new(CountingDetector::default());
        let arbiter = DetectionArbiter::new(Duration::from_millis(10));
        let mut worker = worker(
            detector.clone(),
            arbiter.clone(),
            fixture.sink.clone(),
            clock,
            WorkerConfig {
                sampling_factor: 2,
                staleness_frames: 3,
                ..Default::default()
            },
            black_source(4),
        );
        worker.open().await.unwrap();

        worker.step().await;
        assert_eq!(worker.step().await.detection, DetectionOutcome::Refreshed);
        assert_eq!(worker.held_detections().len(), 1);

        let lease = arbiter.acquire().await.unwrap();
        worker.step().await;
        assert_eq!(worker.step().await.detection, DetectionOutcome::Busy);
        assert_eq!(worker.held_detections().len(), 1);

        assert_eq!(worker.step().await.detection, DetectionOutcome::Skipped);
        assert_eq!(worker.held_detections().len(), 1);

        assert_eq!(worker.step().await.detection, DetectionOutcome::Busy);
        drop(lease);
        assert!(worker.held_detections().is_empty());
        assert_eq!(worker.shared().stats().total_tracked, 0);
        assert_eq!(detector.calls(), 1);
        drain(&fixture.sink).await;
    }

    #[tokio::test]
    async fn test_unopenable_source_marks_unavailable() {
        let clock = manual_clock();
        let fixture = sink_fixture(clock.clone()).await;
        let worker = worker(
            Arc::new(CountingDetector::default()),
            DetectionArbiter::default(),
            fixture.sink.clone(),
            clock,
            WorkerConfig::default(),
            dead_source(),
        );
        let shared = Arc::clone(worker.shared());

        assert_eq!(worker.run().await, CameraStatus::Unavailable);
        assert!(!shared.should_run());
        assert!(!shared.stats().running);
        assert!(shared.latest_frame().is_none());
    }

    #[tokio::test]
    async fn test_run_stops_on_request() {
        let clock = manual_clock();
        let fixture = sink_fixture(clock.clone()).await;
        let worker = worker(
            Arc::new(CountingDetector::default()),
            DetectionArbiter::default(),
            fixture.sink.clone(),
            clock,
            WorkerConfig::default(),
            black_source(2),
        );
        let shared = Arc::clone(worker.shared());
        let task = tokio::spawn(worker.run());

        while shared.latest_frame().is_none() {
            tokio::task::yield_now().await;
        }
        shared.request_stop();

        assert_eq!(task.await.unwrap(), CameraStatus::Stopped);
        assert_eq!(shared.status(), CameraStatus::Stopped);
        drain(&fixture.sink).await;
    }
}
