//! SQLite-backed store.
//!
//! ## Tables
//! - `violations`: one row per [`ViolationEvent`]
//! - `metrics`: metric history rows
//!
//! Timestamps are stored as unix milliseconds in `created_at_ms`; `seq`
//! breaks ties between rows created in the same millisecond.

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use safeguard_models::{CameraId, MetricSnapshot, ViolationEvent, ViolationStatus};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use tracing::{debug, info};

use crate::error::{StoreError, StoreResult};
use crate::repository::SafetyStore;

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS violations (
        seq            INTEGER PRIMARY KEY AUTOINCREMENT,
        id             TEXT NOT NULL UNIQUE,
        camera_id      TEXT NOT NULL,
        date           TEXT NOT NULL,
        time           TEXT NOT NULL,
        worker_name    TEXT NOT NULL,
        worker_id      TEXT NOT NULL,
        violation_type TEXT NOT NULL,
        severity       TEXT NOT NULL,
        zone           TEXT NOT NULL,
        status         TEXT NOT NULL,
        snapshot_ref   TEXT NOT NULL,
        created_at_ms  INTEGER NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_violations_created ON violations (created_at_ms DESC, seq DESC)",
    r#"
    CREATE TABLE IF NOT EXISTS metrics (
        seq               INTEGER PRIMARY KEY AUTOINCREMENT,
        camera_id         TEXT NOT NULL,
        total_tracked     INTEGER NOT NULL,
        active_violations INTEGER NOT NULL,
        compliance_rate   REAL NOT NULL,
        fps               REAL NOT NULL,
        created_at_ms     INTEGER NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_metrics_created ON metrics (created_at_ms DESC, seq DESC)",
];

const VIOLATION_COLUMNS: &str = "id, camera_id, date, time, worker_name, worker_id, \
     violation_type, severity, zone, status, snapshot_ref, created_at_ms";

#[derive(sqlx::FromRow)]
struct ViolationRow {
    id: String,
    camera_id: String,
    date: String,
    time: String,
    worker_name: String,
    worker_id: String,
    violation_type: String,
    severity: String,
    zone: String,
    status: String,
    snapshot_ref: String,
    created_at_ms: i64,
}

impl TryFrom<ViolationRow> for ViolationEvent {
    type Error = StoreError;

    fn try_from(row: ViolationRow) -> Result<Self, Self::Error> {
        let invalid = |e: safeguard_models::ParseViolationStatusError| {
            StoreError::invalid_record(format!("violation {}: {}", row.id, e))
        };

        Ok(Self {
            violation_type: row.violation_type.parse().map_err(invalid)?,
            severity: row.severity.parse().map_err(invalid)?,
            status: row.status.parse().map_err(invalid)?,
            created_at: from_millis(row.created_at_ms)?,
            camera_id: CameraId::from(row.camera_id),
            date: row.date,
            time: row.time,
            worker_name: row.worker_name,
            worker_id: row.worker_id,
            zone: row.zone,
            snapshot_ref: row.snapshot_ref,
            id: row.id,
        })
    }
}

#[derive(sqlx::FromRow)]
struct MetricRow {
    camera_id: String,
    total_tracked: i64,
    active_violations: i64,
    compliance_rate: f64,
    fps: f64,
    created_at_ms: i64,
}

impl TryFrom<MetricRow> for MetricSnapshot {
    type Error = StoreError;

    fn try_from(row: MetricRow) -> Result<Self, Self::Error> {
        let count = |value: i64| {
            u32::try_from(value)
                .map_err(|_| StoreError::invalid_record(format!("metric count out of range: {}", value)))
        };

        Ok(Self {
            total_tracked: count(row.total_tracked)?,
            active_violations: count(row.active_violations)?,
            compliance_rate: row.compliance_rate,
            fps: row.fps,
            created_at: from_millis(row.created_at_ms)?,
            camera_id: row.camera_id,
        })
    }
}

fn from_millis(ms: i64) -> StoreResult<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| StoreError::invalid_record(format!("timestamp out of range: {}", ms)))
}

fn limit_param(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

/// [`SafetyStore`] on a SQLite database.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Connect to `url` (e.g. `sqlite://data/safeguard.db` or
    /// `sqlite::memory:`), creating the file and schema when missing.
    pub async fn connect(url: &str) -> StoreResult<Self> {
        let in_memory = url.contains(":memory:");
        let mut options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);

        // Every connection to an in-memory database sees its own database,
        // so memory stores use exactly one connection that never expires.
        let pool_options = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            options = options
                .journal_mode(SqliteJournalMode::Wal)
                .busy_timeout(Duration::from_secs(5));
            SqlitePoolOptions::new().max_connections(4)
        };

        let pool = pool_options.connect_with(options).await?;
        let store = Self { pool };
        store.migrate().await?;

        info!(url = %url, "SQLite store ready");
        Ok(store)
    }

    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Create tables and indexes if they do not exist.
    pub async fn migrate(&self) -> StoreResult<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

#[async_trait]
impl SafetyStore for SqliteStore {
    async fn insert_violation(&self, event: &ViolationEvent) -> StoreResult<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO violations
                (id, camera_id, date, time, worker_name, worker_id,
                 violation_type, severity, zone, status, snapshot_ref, created_at_ms)
            VALUES
                (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&event.id)
        .bind(event.camera_id.as_str())
        .bind(&event.date)
        .bind(&event.time)
        .bind(&event.worker_name)
        .bind(&event.worker_id)
        .bind(event.violation_type.as_str())
        .bind(event.severity.as_str())
        .bind(&event.zone)
        .bind(event.status.as_str())
        .bind(&event.snapshot_ref)
        .bind(event.created_at.timestamp_millis())
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => {
                debug!(id = %event.id, camera_id = %event.camera_id, "Violation saved");
                Ok(())
            }
            Err(e) if is_unique_violation(&e) => Err(StoreError::duplicate(&event.id)),
            Err(e) => Err(e.into()),
        }
    }

    async fn insert_metric(&self, snapshot: &MetricSnapshot) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO metrics
                (camera_id, total_tracked, active_violations, compliance_rate, fps, created_at_ms)
            VALUES
                (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&snapshot.camera_id)
        .bind(snapshot.total_tracked as i64)
        .bind(snapshot.active_violations as i64)
        .bind(snapshot.compliance_rate)
        .bind(snapshot.fps)
        .bind(snapshot.created_at.timestamp_millis())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn recent_violations(&self, limit: usize) -> StoreResult<Vec<ViolationEvent>> {
        let sql = format!(
            "SELECT {} FROM violations ORDER BY created_at_ms DESC, seq DESC LIMIT ?",
            VIOLATION_COLUMNS
        );
        let rows = sqlx::query_as::<_, ViolationRow>(&sql)
            .bind(limit_param(limit))
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(ViolationEvent::try_from).collect()
    }

    async fn recent_metrics(&self, limit: usize) -> StoreResult<Vec<MetricSnapshot>> {
        let rows = sqlx::query_as::<_, MetricRow>(
            r#"
            SELECT camera_id, total_tracked, active_violations, compliance_rate, fps, created_at_ms
            FROM metrics
            ORDER BY created_at_ms DESC, seq DESC
            LIMIT ?
            "#,
        )
        .bind(limit_param(limit))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(MetricSnapshot::try_from).collect()
    }

    async fn violations_beyond(&self, keep: usize) -> StoreResult<Vec<ViolationEvent>> {
        let sql = format!(
            "SELECT {} FROM violations ORDER BY created_at_ms DESC, seq DESC LIMIT -1 OFFSET ?",
            VIOLATION_COLUMNS
        );
        let rows = sqlx::query_as::<_, ViolationRow>(&sql)
            .bind(limit_param(keep))
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(ViolationEvent::try_from).collect()
    }

    async fn delete_violations(&self, ids: &[String]) -> StoreResult<u64> {
        if ids.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        let mut deleted = 0;
        for id in ids {
            deleted += sqlx::query("DELETE FROM violations WHERE id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await?
                .rows_affected();
        }
        tx.commit().await?;

        debug!(requested = ids.len(), deleted = deleted, "Violations deleted");
        Ok(deleted)
    }

    async fn trim_metrics(&self, keep: usize) -> StoreResult<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM metrics
            WHERE seq NOT IN (
                SELECT seq FROM metrics
                ORDER BY created_at_ms DESC, seq DESC
                LIMIT ?
            )
            "#,
        )
        .bind(limit_param(keep))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn update_violation_status(&self, id: &str, status: ViolationStatus) -> StoreResult<bool> {
        let result = sqlx::query("UPDATE violations SET status = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn violation_count(&self) -> StoreResult<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM violations")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }

    async fn metric_count(&self) -> StoreResult<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM metrics")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{metric_at, violation_at};
    use safeguard_models::{Severity, ViolationType};

    async fn store() -> SqliteStore {
        SqliteStore::connect("sqlite::memory:").await.unwrap()
    }

    #[tokio::test]
    async fn test_violation_round_trip() {
        let store = store().await;
        let event = violation_at("cam01", 1_700_000_000);
        store.insert_violation(&event).await.unwrap();

        let recent = store.recent_violations(10).await.unwrap();
        assert_eq!(recent, vec![event]);
        assert_eq!(recent[0].violation_type, ViolationType::NoHelmet);
        assert_eq!(recent[0].severity, Severity::High);
    }

    #[tokio::test]
    async fn test_duplicate_id_rejected() {
        let store = store().await;
        store.insert_violation(&violation_at("cam01", 5)).await.unwrap();
        let err = store.insert_violation(&violation_at("cam01", 5)).await.unwrap_err();
        assert!(matches!(err, StoreError::Duplicate(_)));
    }

    #[tokio::test]
    async fn test_violations_beyond_cap() {
        let store = store().await;
        for i in 0..13 {
            store.insert_violation(&violation_at("cam01", i)).await.unwrap();
        }

        let beyond = store.violations_beyond(10).await.unwrap();
        let ids: Vec<String> = beyond.iter().map(|v| v.id.clone()).collect();
        assert_eq!(ids, vec!["VIO-2-cam01", "VIO-1-cam01", "VIO-0-cam01"]);

        assert_eq!(store.delete_violations(&ids).await.unwrap(), 3);
        assert_eq!(store.violation_count().await.unwrap(), 10);
        assert_eq!(store.delete_violations(&[]).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_same_timestamp_ordered_by_insertion() {
        let store = store().await;
        store.insert_violation(&violation_at("cam01", 100)).await.unwrap();
        store.insert_violation(&violation_at("cam02", 100)).await.unwrap();

        let recent = store.recent_violations(1).await.unwrap();
        assert_eq!(recent[0].id, "VIO-100-cam02");
    }

    #[tokio::test]
    async fn test_trim_metrics() {
        let store = store().await;
        for i in 0..55 {
            store.insert_metric(&metric_at(i)).await.unwrap();
        }

        assert_eq!(store.trim_metrics(50).await.unwrap(), 5);
        assert_eq!(store.metric_count().await.unwrap(), 50);

        let oldest_kept = store.recent_metrics(50).await.unwrap().pop().unwrap();
        assert_eq!(oldest_kept.created_at.timestamp(), 5);
        let latest = store.latest_metric().await.unwrap().unwrap();
        assert_eq!(latest.created_at.timestamp(), 54);
    }

    #[tokio::test]
    async fn test_status_update() {
        let store = store().await;
        store.insert_violation(&violation_at("cam01", 9)).await.unwrap();

        assert!(store
            .update_violation_status("VIO-9-cam01", ViolationStatus::Resolved)
            .await
            .unwrap());
        assert!(!store
            .update_violation_status("missing", ViolationStatus::Resolved)
            .await
            .unwrap());
        assert_eq!(
            store.recent_violations(1).await.unwrap()[0].status,
            ViolationStatus::Resolved
        );
    }

    #[tokio::test]
    async fn test_file_database_persists() {
        let dir = tempfile::TempDir::new().unwrap();
        let url = format!("sqlite://{}", dir.path().join("safeguard.db").display());

        {
            let store = SqliteStore::connect(&url).await.unwrap();
            store.insert_metric(&metric_at(1)).await.unwrap();
            store.pool().close().await;
        }

        let reopened = SqliteStore::connect(&url).await.unwrap();
        assert_eq!(reopened.metric_count().await.unwrap(), 1);
    }
}
