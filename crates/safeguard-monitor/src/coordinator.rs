//! Registry of camera workers.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use safeguard_models::{CameraId, CameraStats, CameraStatus, GearChecks};
use safeguard_vision::{Frame, FrameSource, ObjectDetector, PpeAnalyzer, PpeClassifier, DEFAULT_MIN_CONFIDENCE};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::arbiter::DetectionArbiter;
use crate::clock::Clock;
use crate::error::{MonitorError, MonitorResult};
use crate::metrics;
use crate::sink::ViolationSink;
use crate::worker::{CameraShared, CameraWorker, WorkerConfig};

/// Source of live camera statistics for the retention sweeper.
pub trait StatsProvider: Send + Sync {
    /// Stats of cameras that are currently running.
    fn running_stats(&self) -> Vec<CameraStats>;
}

struct CameraHandle {
    shared: Arc<CameraShared>,
    task: JoinHandle<CameraStatus>,
}

impl CameraHandle {
    fn is_active(&self) -> bool {
        !self.task.is_finished()
    }
}

/// Owns the camera workers and answers frame and stats queries.
pub struct CameraCoordinator {
    cameras: RwLock<HashMap<CameraId, CameraHandle>>,
    sink: ViolationSink,
    clock: Arc<dyn Clock>,
    worker_config: WorkerConfig,
    classifier: PpeClassifier,
    checks: GearChecks,
    min_confidence: f32,
}

impl CameraCoordinator {
    pub fn new(sink: ViolationSink, clock: Arc<dyn Clock>, worker_config: WorkerConfig) -> Self {
        Self {
            cameras: RwLock::new(HashMap::new()),
            sink,
            clock,
            worker_config,
            classifier: PpeClassifier::default(),
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

    /// Launch a worker for `camera_id`.
    ///
    /// Fails with `AlreadyRunning` while a previous worker for the same id
    /// has not finished. Stopped and unavailable cameras can be restarted.
    pub fn start(
        &self,
        camera_id: CameraId,
        source: Box<dyn FrameSource>,
        detector: Arc<dyn ObjectDetector>,
        arbiter: DetectionArbiter,
    ) -> MonitorResult<()> {
        let mut cameras = self.cameras.write().unwrap_or_else(|e| e.into_inner());
        if cameras.get(&camera_id).is_some_and(CameraHandle::is_active) {
            return Err(MonitorError::AlreadyRunning(camera_id));
        }

        let analyzer = PpeAnalyzer::new(detector, self.classifier.clone())
            .with_checks(self.checks)
            .with_min_confidence(self.min_confidence);
        let shared = Arc::new(CameraShared::new(camera_id.clone()));
        let worker = CameraWorker::new(
            Arc::clone(&shared),
            source,
            analyzer,
            arbiter,
            self.sink.clone(),
            Arc::clone(&self.clock),
            self.worker_config.clone(),
        );

        info!(camera_id = %camera_id, "Starting camera worker");
        let task = tokio::spawn(worker.run());
        cameras.insert(camera_id, CameraHandle { shared, task });
        metrics::set_cameras_running(cameras.values().filter(|h| h.is_active()).count());
        Ok(())
    }

    /// Ask a camera's worker to stop. Returns false for unknown ids.
    pub fn stop(&self, camera_id: &CameraId) -> bool {
        let cameras = self.cameras.read().unwrap_or_else(|e| e.into_inner());
        match cameras.get(camera_id) {
            Some(handle) => {
                info!(camera_id = %camera_id, "Stopping camera worker");
                handle.shared.request_stop();
                true
            }
            None => false,
        }
    }

    pub fn stop_all(&self) {
        let cameras = self.cameras.read().unwrap_or_else(|e| e.into_inner());
        for handle in cameras.values() {
            handle.shared.request_stop();
        }
    }

    /// Latest annotated frame; `None` for unknown cameras or before the
    /// first frame.
    pub fn frame(&self, camera_id: &CameraId) -> Option<Frame> {
        self.with_shared(camera_id, |shared| shared.latest_frame())
            .flatten()
    }

    pub fn stats(&self, camera_id: &CameraId) -> Option<CameraStats> {
        self.with_shared(camera_id, |shared| shared.stats())
    }

    pub fn status(&self, camera_id: &CameraId) -> Option<CameraStatus> {
        self.with_shared(camera_id, |shared| shared.status())
    }

    /// Stats for every registered camera, ordered by id.
    pub fn all_stats(&self) -> Vec<CameraStats> {
        let cameras = self.cameras.read().unwrap_or_else(|e| e.into_inner());
        let mut stats: Vec<CameraStats> = cameras.values().map(|h| h.shared.stats()).collect();
        stats.sort_by(|a, b| a.camera_id.as_str().cmp(b.camera_id.as_str()));
        stats
    }

    pub fn camera_ids(&self) -> Vec<CameraId> {
        let cameras = self.cameras.read().unwrap_or_else(|e| e.into_inner());
        let mut ids: Vec<CameraId> = cameras.keys().cloned().collect();
        ids.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        ids
    }

    /// Stop every worker and wait up to `grace` for them to exit.
    ///
    /// Workers still running at the deadline are aborted.
    pub async fn shutdown(&self, grace: Duration) {
        self.stop_all();
        let handles: Vec<(CameraId, JoinHandle<CameraStatus>)> = {
            let mut cameras = self.cameras.write().unwrap_or_else(|e| e.into_inner());
            cameras
                .drain()
                .map(|(camera_id, handle)| (camera_id, handle.task))
                .collect()
        };

        let deadline = tokio::time::Instant::now() + grace;
        for (camera_id, mut task) in handles {
            match tokio::time::timeout_at(deadline, &mut task).await {
                Ok(Ok(status)) => info!(camera_id = %camera_id, status = %status, "Camera worker exited"),
                Ok(Err(e)) => warn!(camera_id = %camera_id, error = %e, "Camera worker panicked"),
                Err(_) => {
                    warn!(camera_id = %camera_id, "Camera worker did not stop in time, aborting");
                    task.abort();
                }
            }
        }
        metrics::set_cameras_running(0);
    }

    fn with_shared<T>(&self, camera_id: &CameraId, f: impl FnOnce(&CameraShared) -> T) -> Option<T> {
        let cameras = self.cameras.read().unwrap_or_else(|e| e.into_inner());
        cameras.get(camera_id).map(|handle| f(&handle.shared))
    }
}

impl StatsProvider for CameraCoordinator {
    fn running_stats(&self) -> Vec<CameraStats> {
        self.all_stats().into_iter().filter(|s| s.running).collect()
    }
}
