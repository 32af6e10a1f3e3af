//! Persistence for the SafeGuard monitor.
//!
//! This crate provides:
//! - The [`SafetyStore`] trait over violations and metric history
//! - A SQLite implementation (sqlx) and an in-memory implementation
//! - The snapshot directory holding violation JPEGs

pub mod error;
pub mod memory;
pub mod repository;
pub mod snapshots;
pub mod sqlite;

pub use error::{StoreError, StoreResult};
pub use memory::MemoryStore;
pub use repository::SafetyStore;
pub use snapshots::{validate_name, SnapshotDir};
pub use sqlite::SqliteStore;
