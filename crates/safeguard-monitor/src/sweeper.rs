//! Periodic metric snapshots and bounded retention.

use std::sync::Arc;
use std::time::Duration;

use safeguard_models::MetricSnapshot;
use safeguard_store::{SafetyStore, SnapshotDir, StoreResult};
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::coordinator::StatsProvider;
use crate::metrics;

/// Shortest sweep period; `tokio::time::interval` rejects zero.
pub const MIN_SWEEP_INTERVAL: Duration = Duration::from_millis(1);

/// Retention settings.
#[derive(Debug, Clone)]
pub struct RetentionConfig {
    pub interval: Duration,
    /// Metric rows kept after each sweep
    pub metrics_keep: usize,
    /// Violation rows kept after each sweep
    pub violations_keep: usize,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            metrics_keep: 50,
            violations_keep: 10,
        }
    }
}

/// What one sweep did.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SweepReport {
    pub metric_recorded: bool,
    pub metrics_deleted: u64,
    pub violations_deleted: u64,
    pub snapshots_removed: u64,
    /// Failures, already logged; the sweep is retried next cycle
    pub errors: Vec<String>,
}

impl SweepReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

pub struct RetentionSweeper {
    store: Arc<dyn SafetyStore>,
    snapshots: SnapshotDir,
    stats: Arc<dyn StatsProvider>,
    clock: Arc<dyn Clock>,
    config: RetentionConfig,
}

impl RetentionSweeper {
    pub fn new(
        store: Arc<dyn SafetyStore>,
        snapshots: SnapshotDir,
        stats: Arc<dyn StatsProvider>,
        clock: Arc<dyn Clock>,
        config: RetentionConfig,
    ) -> Self {
        Self {
            store,
            snapshots,
            stats,
            clock,
            config,
        }
    }

    /// Run one cycle. The metric half and the violation half are attempted
    /// independently.
    pub async fn sweep_once(&self) -> SweepReport {
        let mut report = SweepReport::default();

        match self.snapshot_and_trim_metrics().await {
            Ok(deleted) => {
                report.metric_recorded = true;
                report.metrics_deleted = deleted;
            }
            Err(e) => {
                warn!(error = %e, "Metric snapshot failed");
                report.errors.push(format!("metrics: {}", e));
            }
        }

        match self.trim_violations().await {
            Ok((rows, files)) => {
                report.violations_deleted = rows;
                report.snapshots_removed = files;
            }
            Err(e) => {
                warn!(error = %e, "Violation retention failed");
                report.errors.push(format!("violations: {}", e));
            }
        }

        if !report.is_clean() {
            metrics::record_sweep_failure();
        }
        metrics::record_sweep_deleted("metrics", report.metrics_deleted);
        metrics::record_sweep_deleted("violations", report.violations_deleted);
        report
    }

    async fn snapshot_and_trim_metrics(&self) -> StoreResult<u64> {
        let running = self.stats.running_stats();
        let snapshot = MetricSnapshot::collapse(&running, self.clock.wall());
        self.store.insert_metric(&snapshot).await?;
        self.store.trim_metrics(self.config.metrics_keep).await
    }

    async fn trim_violations(&self) -> StoreResult<(u64, u64)> {
        let expired = self.store.violations_beyond(self.config.violations_keep).await?;
        if expired.is_empty() {
            return Ok((0, 0));
        }

        let mut files = 0;
        for event in &expired {
            if self.snapshots.remove_referenced(&event.snapshot_ref).await {
                files += 1;
            }
        }

        let ids: Vec<String> = expired.into_iter().map(|e| e.id).collect();
        let rows = self.store.delete_violations(&ids).await?;
        debug!(rows, files, "Expired violations removed");
        Ok((rows, files))
    }

    /// Sweep every interval until `shutdown` flips to true or its sender
    /// is dropped.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let period = self.config.interval.max(MIN_SWEEP_INTERVAL);
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(
            interval_ms = period.as_millis() as u64,
            metrics_keep = self.config.metrics_keep,
            violations_keep = self.config.violations_keep,
            "Retention sweeper started"
        );

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        info!("Shutdown channel closed, stopping retention sweeper");
                        break;
                    }
                    if *shutdown.borrow() {
                        info!("Shutdown signal received, stopping retention sweeper");
                        break;
                    }
                }
                _ = interval.tick() => {
                    self.sweep_once().await;
                }
            }
        }
    }
}
