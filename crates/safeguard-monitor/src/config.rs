//! Monitor configuration.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use safeguard_models::{CameraId, GearChecks};
use safeguard_vision::DEFAULT_MIN_CONFIDENCE;

use crate::arbiter::DEFAULT_ACQUIRE_TIMEOUT;
use crate::error::{MonitorError, MonitorResult};
use crate::sink::SinkConfig;
use crate::sweeper::RetentionConfig;
use crate::worker::WorkerConfig;

/// One configured camera.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CameraSpec {
    pub camera_id: CameraId,
    /// File path or stream URI
    pub uri: String,
}

/// Monitor configuration.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub cameras: Vec<CameraSpec>,
    /// Gear categories to check
    pub checks: GearChecks,
    /// sqlite URL; in-memory store when unset
    pub database_url: Option<String>,
    pub snapshot_dir: PathBuf,
    /// Prefix for `snapshot_ref` values, e.g. `http://host:5000/snapshots`
    pub public_base_url: Option<String>,
    /// Prometheus listener; metrics disabled when unset
    pub metrics_addr: Option<SocketAddr>,
    /// Remote detection service
    pub detector_url: String,
    /// Local ONNX model, used instead of the remote service when set
    pub model_path: Option<PathBuf>,
    pub min_confidence: f32,
    pub arbiter_timeout: Duration,
    pub worker: WorkerConfig,
    pub sink: SinkConfig,
    pub retention: RetentionConfig,
    /// Time given to workers to stop before they are aborted
    pub shutdown_grace: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            cameras: Vec::new(),
            checks: GearChecks::default(),
            database_url: None,
            snapshot_dir: PathBuf::from("snapshots"),
            public_base_url: None,
            metrics_addr: None,
            detector_url: "http://localhost:8500".to_string(),
            model_path: None,
            min_confidence: DEFAULT_MIN_CONFIDENCE,
            arbiter_timeout: DEFAULT_ACQUIRE_TIMEOUT,
            worker: WorkerConfig::default(),
            sink: SinkConfig::default(),
            retention: RetentionConfig::default(),
            shutdown_grace: Duration::from_secs(10),
        }
    }
}

impl MonitorConfig {
    /// Create config from environment variables.
    pub fn from_env() -> MonitorResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create config from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> MonitorResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let parsed = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let cameras = match parsed("SAFEGUARD_CAMERAS") {
            Some(value) => parse_cameras(&value)?,
            None => Vec::new(),
        };

        let checks = GearChecks {
            helmet: parse_or(&lookup, "SAFEGUARD_CHECK_HELMET", defaults.checks.helmet),
            vest: parse_or(&lookup, "SAFEGUARD_CHECK_VEST", defaults.checks.vest),
        };

        let metrics_addr = match parsed("SAFEGUARD_METRICS_ADDR") {
            Some(addr) => Some(addr.parse().map_err(|_| {
                MonitorError::config_error(format!("Invalid SAFEGUARD_METRICS_ADDR: {}", addr))
            })?),
            None => None,
        };

        let worker = WorkerConfig {
            sampling_factor: parse_or(&lookup, "SAFEGUARD_SAMPLING_FACTOR", defaults.worker.sampling_factor)
                .max(1),
            staleness_frames: parse_or(
                &lookup,
                "SAFEGUARD_STALENESS_FRAMES",
                defaults.worker.staleness_frames,
            ),
            cooldown: Duration::from_secs(parse_or(
                &lookup,
                "SAFEGUARD_COOLDOWN_SECS",
                defaults.worker.cooldown.as_secs(),
            )),
            loop_interval: Duration::from_millis(parse_or(
                &lookup,
                "SAFEGUARD_LOOP_INTERVAL_MS",
                defaults.worker.loop_interval.as_millis() as u64,
            )),
            ..defaults.worker.clone()
        };

        let sink = SinkConfig {
            max_in_flight: parse_or(&lookup, "SAFEGUARD_SINK_MAX_IN_FLIGHT", defaults.sink.max_in_flight)
                .max(1),
            ..defaults.sink.clone()
        };

        let retention = RetentionConfig {
            interval: Duration::from_secs(
                parse_or(
                    &lookup,
                    "SAFEGUARD_SWEEP_INTERVAL_SECS",
                    defaults.retention.interval.as_secs(),
                )
                .max(1),
            ),
            metrics_keep: parse_or(&lookup, "SAFEGUARD_METRICS_KEEP", defaults.retention.metrics_keep),
            violations_keep: parse_or(
                &lookup,
                "SAFEGUARD_VIOLATIONS_KEEP",
                defaults.retention.violations_keep,
            ),
        };

        Ok(Self {
            cameras,
            checks,
            database_url: parsed("DATABASE_URL"),
            snapshot_dir: parsed("SAFEGUARD_SNAPSHOT_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.snapshot_dir),
            public_base_url: parsed("SAFEGUARD_PUBLIC_BASE_URL"),
            metrics_addr,
            detector_url: parsed("SAFEGUARD_DETECTOR_URL").unwrap_or(defaults.detector_url),
            model_path: parsed("SAFEGUARD_MODEL_PATH").map(PathBuf::from),
            min_confidence: parse_or(&lookup, "SAFEGUARD_MIN_CONFIDENCE", defaults.min_confidence),
            arbiter_timeout: Duration::from_millis(parse_or(
                &lookup,
                "SAFEGUARD_ARBITER_TIMEOUT_MS",
                defaults.arbiter_timeout.as_millis() as u64,
            )),
            worker,
            sink,
            retention,
            shutdown_grace: Duration::from_secs(parse_or(
                &lookup,
                "SAFEGUARD_SHUTDOWN_GRACE_SECS",
                defaults.shutdown_grace.as_secs(),
            )),
        })
    }
}

fn parse_or<T, F>(lookup: &F, key: &str, default: T) -> T
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

/// Parse `id=uri` pairs separated by commas.
///
/// Ids end up in snapshot file names, so path separators are rejected.
pub fn parse_cameras(value: &str) -> MonitorResult<Vec<CameraSpec>> {
    let mut seen = HashSet::new();
    let mut cameras = Vec::new();

    for entry in value.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let (id, uri) = entry
            .split_once('=')
            .map(|(id, uri)| (id.trim(), uri.trim()))
            .filter(|(id, uri)| !id.is_empty() && !uri.is_empty())
            .ok_or_else(|| MonitorError::config_error(format!("Invalid camera entry: {}", entry)))?;

        if safeguard_store::validate_name(id).is_err() {
            return Err(MonitorError::config_error(format!(
                "Camera id must be usable in a file name: {}",
                id
            )));
        }
        if !seen.insert(id.to_string()) {
            return Err(MonitorError::config_error(format!("Duplicate camera id: {}", id)));
        }
        cameras.push(CameraSpec {
            camera_id: CameraId::from(id),
            uri: uri.to_string(),
        });
    }

    Ok(cameras)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> MonitorResult<MonitorConfig> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        MonitorConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config(&[]).unwrap();
        assert!(config.cameras.is_empty());
        assert!(config.checks.helmet && config.checks.vest);
        assert_eq!(config.worker.sampling_factor, 5);
        assert_eq!(config.worker.cooldown, Duration::from_secs(15));
        assert_eq!(config.worker.loop_interval, Duration::from_millis(60));
        assert_eq!(config.arbiter_timeout, Duration::from_secs(2));
        assert_eq!(config.retention.metrics_keep, 50);
        assert_eq!(config.retention.violations_keep, 10);
        assert_eq!(config.sink.max_in_flight, 4);
        assert!(config.database_url.is_none());
        assert!(config.metrics_addr.is_none());
    }

    #[test]
    fn test_overrides() {
        let config = config(&[
            ("SAFEGUARD_CAMERAS", "cam01=/videos/a.mp4, cam02=rtsp://10.0.0.5/stream"),
            ("SAFEGUARD_CHECK_VEST", "false"),
            ("SAFEGUARD_SAMPLING_FACTOR", "0"),
            ("SAFEGUARD_COOLDOWN_SECS", "30"),
            ("SAFEGUARD_METRICS_ADDR", "127.0.0.1:9100"),
            ("DATABASE_URL", "sqlite://safety.db"),
            ("SAFEGUARD_STALENESS_FRAMES", "not-a-number"),
        ])
        .unwrap();

        assert_eq!(config.cameras.len(), 2);
        assert_eq!(config.cameras[1].camera_id, CameraId::from("cam02"));
        assert_eq!(config.cameras[1].uri, "rtsp://10.0.0.5/stream");
        assert!(config.checks.helmet);
        assert!(!config.checks.vest);
        assert_eq!(config.worker.sampling_factor, 1);
        assert_eq!(config.worker.cooldown, Duration::from_secs(30));
        assert_eq!(config.worker.staleness_frames, 90);
        assert_eq!(config.metrics_addr, Some("127.0.0.1:9100".parse().unwrap()));
        assert_eq!(config.database_url.as_deref(), Some("sqlite://safety.db"));
    }

    #[test]
    fn test_invalid_cameras_rejected() {
        assert!(parse_cameras("cam01").is_err());
        assert!(parse_cameras("=/a.mp4").is_err());
        assert!(parse_cameras("cam01=/a.mp4,cam01=/b.mp4").is_err());
        assert!(parse_cameras("").unwrap().is_empty());
        assert!(config(&[("SAFEGUARD_METRICS_ADDR", "nowhere")]).is_err());
    }

    #[test]
    fn test_camera_ids_with_separators_rejected() {
        assert!(parse_cameras("gate/1=/a.mp4").is_err());
        assert!(parse_cameras("gate\\1=/a.mp4").is_err());
        assert!(parse_cameras("..=/a.mp4").is_err());
        assert!(config(&[("SAFEGUARD_CAMERAS", "cam01=/a.mp4,yard/2=rtsp://10.0.0.5/s")]).is_err());

        let cameras = parse_cameras("gate-1=rtsp://10.0.0.5/a/b").unwrap();
        assert_eq!(cameras[0].camera_id, CameraId::from("gate-1"));
        assert_eq!(cameras[0].uri, "rtsp://10.0.0.5/a/b");
    }

    #[test]
    fn test_zero_sweep_interval_is_clamped() {
        let config = config(&[("SAFEGUARD_SWEEP_INTERVAL_SECS", "0")]).unwrap();
        assert_eq!(config.retention.interval, Duration::from_secs(1));
    }
}
