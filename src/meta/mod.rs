//! Pipeline storage using SQLite
//!
//! This module owns every table the pipeline touches:
//! - Raw records (uploaded rows, only the `processed` flag changes)
//! - Canonical records (deduplicated rows plus their classification state)
//! - Enriched records (write-once copies of fully classified rows)
//! - Pipeline runs (per-stage history and counters)
//!
//! Each entity has its own `impl MetaDb` block in a sibling file. All values
//! are passed as bound parameters.

mod canonical;
mod enriched;
mod raw;
mod runs;
mod schema;

pub use canonical::*;
pub use enriched::*;
pub use raw::*;
pub use runs::*;
pub use schema::*;

use crate::config::Config;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use std::sync::{Arc, RwLock};
use tracing::{debug, info, warn};

/// Classification state shared by the primary and secondary status columns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl ProcessingStatus {
    pub const ALL: [ProcessingStatus; 4] = [
        ProcessingStatus::Pending,
        ProcessingStatus::Processing,
        ProcessingStatus::Completed,
        ProcessingStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingStatus::Pending => "pending",
            ProcessingStatus::Processing => "processing",
            ProcessingStatus::Completed => "completed",
            ProcessingStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for ProcessingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProcessingStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(ProcessingStatus::Pending),
            "processing" => Ok(ProcessingStatus::Processing),
            "completed" => Ok(ProcessingStatus::Completed),
            "failed" => Ok(ProcessingStatus::Failed),
            _ => Err(Error::InvalidRecord(format!(
                "Unknown processing status: {}",
                s
            ))),
        }
    }
}

/// Outcome of a stage invocation, stored in the run log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Completed,
    Partial,
    Failed,
    Unavailable,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Running => write!(f, "running"),
            RunStatus::Completed => write!(f, "completed"),
            RunStatus::Partial => write!(f, "partial"),
            RunStatus::Failed => write!(f, "failed"),
            RunStatus::Unavailable => write!(f, "unavailable"),
        }
    }
}

impl FromStr for RunStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "running" => Ok(RunStatus::Running),
            "completed" => Ok(RunStatus::Completed),
            "partial" => Ok(RunStatus::Partial),
            "failed" => Ok(RunStatus::Failed),
            "unavailable" => Ok(RunStatus::Unavailable),
            _ => Err(Error::InvalidRecord(format!("Unknown run status: {}", s))),
        }
    }
}

impl RunStatus {
    /// Completed when nothing failed, partial otherwise
    pub fn from_failures(failed: u64) -> Self {
        if failed == 0 {
            RunStatus::Completed
        } else {
            RunStatus::Partial
        }
    }
}

/// Count of rows sharing one value of a grouped column
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow, Serialize, Deserialize)]
pub struct ValueCount {
    pub value: Option<String>,
    pub count: i64,
}

/// Pipeline database handle
///
/// Cloning is cheap; clones share the pool. The pool can be rebuilt in place
/// by [`MetaDb::reconnect`] when a health check fails.
#[derive(Clone)]
pub struct MetaDb {
    inner: Arc<MetaDbInner>,
}

struct MetaDbInner {
    options: SqliteConnectOptions,
    pool: RwLock<SqlitePool>,
}

impl MetaDb {
    /// Connect to the pipeline database described by the config
    pub async fn connect(config: &Config) -> Result<Self> {
        Self::open(&config.paths.db_file).await
    }

    /// Connect and make sure the schema exists
    pub async fn new(db_path: &Path) -> Result<Self> {
        let db = Self::open(db_path).await?;

        if !db.is_initialized().await? {
            db.init_schema().await?;
        }

        Ok(db)
    }

    async fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal);

        debug!("Connecting to SQLite database at {:?}", db_path);

        let pool = Self::build_pool(options.clone()).await?;

        Ok(Self {
            inner: Arc::new(MetaDbInner {
                options,
                pool: RwLock::new(pool),
            }),
        })
    }

    async fn build_pool(options: SqliteConnectOptions) -> Result<SqlitePool> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;
        Ok(pool)
    }

    /// Current pool; the lock is released before any query runs
    pub(crate) fn pool(&self) -> SqlitePool {
        match self.inner.pool.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Initialize the database schema
    pub async fn init_schema(&self) -> Result<()> {
        info!("Initializing database schema");
        sqlx::query(SCHEMA_SQL).execute(&self.pool()).await?;
        Ok(())
    }

    /// Check if database is initialized
    pub async fn is_initialized(&self) -> Result<bool> {
        let result: Option<(i32,)> = sqlx::query_as(
            "SELECT 1 FROM sqlite_master WHERE type='table' AND name='canonical_records'",
        )
        .fetch_optional(&self.pool())
        .await?;
        Ok(result.is_some())
    }

    /// Round-trip a trivial query
    pub async fn health_check(&self) -> Result<()> {
        let _: i64 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool())
            .await?;
        Ok(())
    }

    /// Replace the pool with a fresh one built from the original options
    pub async fn reconnect(&self) -> Result<()> {
        let fresh = Self::build_pool(self.inner.options.clone()).await?;
        let stale = {
            let mut guard = match self.inner.pool.write() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            std::mem::replace(&mut *guard, fresh)
        };
        stale.close().await;
        info!("Reconnected to pipeline database");
        Ok(())
    }

    /// Health check, reconnecting once if it fails
    pub async fn ensure_healthy(&self) -> Result<()> {
        if let Err(e) = self.health_check().await {
            warn!("Database health check failed: {}; reconnecting", e);
            self.reconnect().await?;
            self.health_check().await?;
        }
        Ok(())
    }

    /// Close the pool
    pub async fn close(&self) {
        self.pool().close().await;
    }
}
