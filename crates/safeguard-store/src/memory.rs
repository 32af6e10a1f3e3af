//! In-process store used when no database is configured, and in tests.

use async_trait::async_trait;
use safeguard_models::{MetricSnapshot, ViolationEvent, ViolationStatus};
use tokio::sync::RwLock;

use crate::error::{StoreError, StoreResult};
use crate::repository::SafetyStore;

#[derive(Default)]
struct Tables {
    /// `(insertion sequence, row)`
    violations: Vec<(u64, ViolationEvent)>,
    metrics: Vec<(u64, MetricSnapshot)>,
    next_seq: u64,
}

impl Tables {
    fn next_seq(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }

    /// Violations ordered newest first.
    fn violations_newest_first(&self) -> Vec<&(u64, ViolationEvent)> {
        let mut rows: Vec<_> = self.violations.iter().collect();
        rows.sort_by(|a, b| (b.1.created_at, b.0).cmp(&(a.1.created_at, a.0)));
        rows
    }

    fn metrics_newest_first(&self) -> Vec<&(u64, MetricSnapshot)> {
        let mut rows: Vec<_> = self.metrics.iter().collect();
        rows.sort_by(|a, b| (b.1.created_at, b.0).cmp(&(a.1.created_at, a.0)));
        rows
    }
}

/// Volatile [`SafetyStore`].
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SafetyStore for MemoryStore {
    async fn insert_violation(&self, event: &ViolationEvent) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        if tables.violations.iter().any(|(_, v)| v.id == event.id) {
            return Err(StoreError::duplicate(&event.id));
        }
        let seq = tables.next_seq();
        tables.violations.push((seq, event.clone()));
        Ok(())
    }

    async fn insert_metric(&self, snapshot: &MetricSnapshot) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        let seq = tables.next_seq();
        tables.metrics.push((seq, snapshot.clone()));
        Ok(())
    }

    async fn recent_violations(&self, limit: usize) -> StoreResult<Vec<ViolationEvent>> {
        let tables = self.tables.read().await;
        Ok(tables
            .violations_newest_first()
            .into_iter()
            .take(limit)
            .map(|(_, v)| v.clone())
            .collect())
    }

    async fn recent_metrics(&self, limit: usize) -> StoreResult<Vec<MetricSnapshot>> {
        let tables = self.tables.read().await;
        Ok(tables
            .metrics_newest_first()
            .into_iter()
            .take(limit)
            .map(|(_, m)| m.clone())
            .collect())
    }

    async fn violations_beyond(&self, keep: usize) -> StoreResult<Vec<ViolationEvent>> {
        let tables = self.tables.read().await;
        Ok(tables
            .violations_newest_first()
            .into_iter()
            .skip(keep)
            .map(|(_, v)| v.clone())
            .collect())
    }

    async fn delete_violations(&self, ids: &[String]) -> StoreResult<u64> {
        let mut tables = self.tables.write().await;
        let before = tables.violations.len();
        tables.violations.retain(|(_, v)| !ids.contains(&v.id));
        Ok((before - tables.violations.len()) as u64)
    }

    async fn trim_metrics(&self, keep: usize) -> StoreResult<u64> {
        let mut tables = self.tables.write().await;
        let kept: Vec<u64> = tables
            .metrics_newest_first()
            .into_iter()
            .take(keep)
            .map(|(seq, _)| *seq)
            .collect();
        let before = tables.metrics.len();
        tables.metrics.retain(|(seq, _)| kept.contains(seq));
        Ok((before - tables.metrics.len()) as u64)
    }

    async fn update_violation_status(&self, id: &str, status: ViolationStatus) -> StoreResult<bool> {
        let mut tables = self.tables.write().await;
        match tables.violations.iter_mut().find(|(_, v)| v.id == id) {
            Some((_, event)) => {
                event.status = status;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn violation_count(&self) -> StoreResult<u64> {
        Ok(self.tables.read().await.violations.len() as u64)
    }

    async fn metric_count(&self) -> StoreResult<u64> {
        Ok(self.tables.read().await.metrics.len() as u64)
    }
}
