//! Multi-camera PPE compliance monitor.
//!
//! This crate provides:
//! - Per-camera frame loops with sampled detection and cooldown-gated
//!   violation logging
//! - Exclusive, timeout-bounded access to the shared detector
//! - A camera registry answering frame and stats queries
//! - Bounded-pool violation persistence and periodic retention sweeps

pub mod app;
pub mod arbiter;
pub mod clock;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod sink;
pub mod stats;
pub mod sweeper;
pub mod worker;

#[cfg(test)]
pub(crate) mod testing;

pub use app::MonitorApp;
pub use arbiter::{DetectionArbiter, DetectionLease, DEFAULT_ACQUIRE_TIMEOUT};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{parse_cameras, CameraSpec, MonitorConfig};
pub use coordinator::{CameraCoordinator, StatsProvider};
pub use error::{MonitorError, MonitorResult};
pub use logging::CameraLogger;
pub use sink::{select_violator, SinkConfig, Submission, ViolationSink};
pub use stats::{CameraState, FpsMeter};
pub use sweeper::{RetentionConfig, RetentionSweeper, SweepReport};
pub use worker::{CameraShared, CameraWorker, DetectionOutcome, StepOutcome, WorkerConfig};
