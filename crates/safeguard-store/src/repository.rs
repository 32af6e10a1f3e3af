//! Persistence seam for violations and metric history.

use async_trait::async_trait;
use safeguard_models::{MetricSnapshot, ViolationEvent, ViolationStatus};

use crate::error::StoreResult;

/// Storage for violation events and metric snapshots.
///
/// "Most recent" ordering is by `created_at`, ties broken by insertion
/// order (later insert is more recent). Listing methods return newest first.
#[async_trait]
pub trait SafetyStore: Send + Sync {
    /// Insert a violation. Ids are unique.
    async fn insert_violation(&self, event: &ViolationEvent) -> StoreResult<()>;

    async fn insert_metric(&self, snapshot: &MetricSnapshot) -> StoreResult<()>;

    /// The `limit` most recent violations, newest first.
    async fn recent_violations(&self, limit: usize) -> StoreResult<Vec<ViolationEvent>>;

    /// The `limit` most recent metric rows, newest first.
    async fn recent_metrics(&self, limit: usize) -> StoreResult<Vec<MetricSnapshot>>;

    async fn latest_metric(&self) -> StoreResult<Option<MetricSnapshot>> {
        Ok(self.recent_metrics(1).await?.into_iter().next())
    }

    /// Violations older than the `keep` most recent ones, newest first.
    async fn violations_beyond(&self, keep: usize) -> StoreResult<Vec<ViolationEvent>>;

    /// Delete violations by id. Returns the number of rows removed.
    async fn delete_violations(&self, ids: &[String]) -> StoreResult<u64>;

    /// Keep only the `keep` most recent metric rows. Returns rows removed.
    async fn trim_metrics(&self, keep: usize) -> StoreResult<u64>;

    /// Change the review status of a violation. Returns false if no such id.
    async fn update_violation_status(&self, id: &str, status: ViolationStatus) -> StoreResult<bool>;

    async fn violation_count(&self) -> StoreResult<u64>;

    async fn metric_count(&self) -> StoreResult<u64>;
}
