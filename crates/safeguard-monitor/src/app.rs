//! Wiring of store, detector, cameras and sweeper.

use std::sync::Arc;

use safeguard_store::{MemoryStore, SafetyStore, SnapshotDir, SqliteStore};
use safeguard_vision::{FfmpegSource, FrameSource, ObjectDetector, RemoteDetector, RemoteDetectorConfig};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::arbiter::DetectionArbiter;
use crate::clock::{Clock, SystemClock};
use crate::config::{CameraSpec, MonitorConfig};
use crate::coordinator::{CameraCoordinator, StatsProvider};
use crate::error::MonitorResult;
use crate::sink::ViolationSink;
use crate::sweeper::RetentionSweeper;

/// A running monitor.
pub struct MonitorApp {
    config: MonitorConfig,
    store: Arc<dyn SafetyStore>,
    snapshots: SnapshotDir,
    clock: Arc<dyn Clock>,
    coordinator: Arc<CameraCoordinator>,
    detector: Arc<dyn ObjectDetector>,
    arbiter: DetectionArbiter,
    shutdown_tx: watch::Sender<bool>,
    sweeper: Option<JoinHandle<()>>,
}

impl MonitorApp {
    /// Open the store and snapshot directory and create the detector.
    pub async fn build(config: MonitorConfig) -> MonitorResult<Self> {
        let store: Arc<dyn SafetyStore> = match &config.database_url {
            Some(url) => Arc::new(SqliteStore::connect(url).await?),
            None => {
                warn!("DATABASE_URL not set, violations are kept in memory only");
                Arc::new(MemoryStore::new())
            }
        };
        let snapshots =
            SnapshotDir::open(config.snapshot_dir.clone(), config.public_base_url.clone()).await?;
        let detector = build_detector(&config)?;

        Ok(Self::with_parts(config, store, snapshots, detector, Arc::new(SystemClock)))
    }

    pub fn with_parts(
        config: MonitorConfig,
        store: Arc<dyn SafetyStore>,
        snapshots: SnapshotDir,
        detector: Arc<dyn ObjectDetector>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let sink = ViolationSink::new(
            Arc::clone(&store),
            snapshots.clone(),
            Arc::clone(&clock),
            config.sink.clone(),
        );
        let coordinator = CameraCoordinator::new(sink, Arc::clone(&clock), config.worker.clone())
            .with_checks(config.checks)
            .with_min_confidence(config.min_confidence);
        let (shutdown_tx, _) = watch::channel(false);

        Self {
            arbiter: DetectionArbiter::new(config.arbiter_timeout),
            coordinator: Arc::new(coordinator),
            config,
            store,
            snapshots,
            clock,
            detector,
            shutdown_tx,
            sweeper: None,
        }
    }

    pub fn coordinator(&self) -> &Arc<CameraCoordinator> {
        &self.coordinator
    }

    pub fn store(&self) -> &Arc<dyn SafetyStore> {
        &self.store
    }

    pub fn snapshots(&self) -> &SnapshotDir {
        &self.snapshots
    }

    /// Start every configured camera with an ffmpeg source.
    ///
    /// Returns how many workers were launched.
    pub fn start_configured_cameras(&self) -> usize {
        let mut started = 0;
        for spec in &self.config.cameras {
            let source = FfmpegSource::new(&spec.uri, self.config.worker.frame_size);
            match self.start_camera(spec, Box::new(source)) {
                Ok(()) => started += 1,
                Err(e) => error!(camera_id = %spec.camera_id, error = %e, "Failed to start camera"),
            }
        }
        started
    }

    pub fn start_camera(&self, spec: &CameraSpec, source: Box<dyn FrameSource>) -> MonitorResult<()> {
        self.coordinator.start(
            spec.camera_id.clone(),
            source,
            Arc::clone(&self.detector),
            self.arbiter.clone(),
        )
    }

    /// Launch the retention sweeper. Calling it again has no effect.
    pub fn spawn_sweeper(&mut self) {
        if self.sweeper.is_some() {
            return;
        }
        let stats: Arc<dyn StatsProvider> = self.coordinator.clone();
        let sweeper = RetentionSweeper::new(
            Arc::clone(&self.store),
            self.snapshots.clone(),
            stats,
            Arc::clone(&self.clock),
            self.config.retention.clone(),
        );
        self.sweeper = Some(tokio::spawn(sweeper.run(self.shutdown_tx.subscribe())));
    }

    /// Stop the sweeper and all cameras, waiting up to the configured grace.
    pub async fn shutdown(mut self) {
        info!("Shutting down monitor");
        self.shutdown_tx.send_replace(true);
        self.coordinator.shutdown(self.config.shutdown_grace).await;
        if let Some(sweeper) = self.sweeper.take() {
            if let Err(e) = sweeper.await {
                warn!(error = %e, "Retention sweeper task failed");
            }
        }
    }
}

fn build_detector(config: &MonitorConfig) -> MonitorResult<Arc<dyn ObjectDetector>> {
    #[cfg(feature = "onnx")]
    if let Some(path) = &config.model_path {
        let detector = safeguard_vision::YoloDetector::new(safeguard_vision::YoloDetectorConfig {
            model_path: path.to_string_lossy().into_owned(),
            confidence_threshold: config.min_confidence,
            ..Default::default()
        })?;
        info!(model = %path.display(), "Using local ONNX detector");
        return Ok(Arc::new(detector));
    }

    #[cfg(not(feature = "onnx"))]
    if config.model_path.is_some() {
        warn!("SAFEGUARD_MODEL_PATH ignored, built without the onnx feature");
    }

    let detector = RemoteDetector::new(RemoteDetectorConfig {
        base_url: config.detector_url.clone(),
        ..Default::default()
    })?;
    info!(url = %config.detector_url, "Using remote detector");
    Ok(Arc::new(detector))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{black_source, manual_clock, sink_fixture, CountingDetector};
    use crate::sweeper::RetentionConfig;
    use safeguard_models::CameraId;
    use std::time::Duration;

    #[tokio::test]
    async fn test_start_and_shutdown() {
        let clock = manual_clock();
        let fixture = sink_fixture(clock.clone()).await;
        let config = MonitorConfig {
            retention: RetentionConfig {
                interval: Duration::from_millis(5),
                ..Default::default()
            },
            ..Default::default()
        };
        let mut app = MonitorApp::with_parts(
            config,
            fixture.store.clone(),
            fixture.snapshots.clone(),
            Arc::new(CountingDetector::default()),
            clock,
        );
        let spec = CameraSpec {
            camera_id: CameraId::from("cam01"),
            uri: "memory".to_string(),
        };

        app.start_camera(&spec, black_source(2)).unwrap();
        app.spawn_sweeper();
        while app.coordinator().frame(&spec.camera_id).is_none() {
            tokio::task::yield_now().await;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;

        let store = Arc::clone(app.store());
        app.shutdown().await;
        assert!(store.metric_count().await.unwrap() >= 1);
    }

    #[test]
    fn test_remote_detector_by_default() {
        let detector = build_detector(&MonitorConfig::default()).unwrap();
        assert_eq!(detector.name(), "remote");
    }
}
