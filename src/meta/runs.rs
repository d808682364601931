//! Pipeline run log

use super::{MetaDb, RunStatus};
use crate::error::{Error, Result};
use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::str::FromStr;
use uuid::Uuid;

/// Pipeline stages that write to the run log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Transform,
    Enrich,
    Secondary,
    Promote,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stage::Transform => write!(f, "transform"),
            Stage::Enrich => write!(f, "enrich"),
            Stage::Secondary => write!(f, "secondary"),
            Stage::Promote => write!(f, "promote"),
        }
    }
}

impl FromStr for Stage {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "transform" => Ok(Stage::Transform),
            "enrich" => Ok(Stage::Enrich),
            "secondary" => Ok(Stage::Secondary),
            "promote" => Ok(Stage::Promote),
            _ => Err(Error::InvalidRecord(format!("Unknown stage: {}", s))),
        }
    }
}

/// Build a batch ID such as `enrich_20240501_101500_1a2b3c4d`
pub fn new_batch_id(stage: Stage) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!(
        "{}_{}_{}",
        stage,
        Local::now().format("%Y%m%d_%H%M%S"),
        &suffix[..8]
    )
}

/// One row of the run log
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct PipelineRun {
    pub batch_id: String,
    pub stage: String,
    pub started_at: String,
    pub ended_at: Option<String>,
    pub duration_ms: Option<i64>,
    pub status: String,
    pub source_records: i64,
    pub processed_records: i64,
    pub success_records: i64,
    pub failed_records: i64,
    pub duplicate_records: i64,
    pub skipped_records: i64,
    pub filtered_empty_text_records: i64,
    pub filtered_invalid_timestamp_records: i64,
    pub error_message: Option<String>,
}

impl PipelineRun {
    pub fn new(stage: Stage) -> Self {
        Self {
            batch_id: new_batch_id(stage),
            stage: stage.to_string(),
            started_at: Utc::now().to_rfc3339(),
            ended_at: None,
            duration_ms: None,
            status: RunStatus::Running.to_string(),
            source_records: 0,
            processed_records: 0,
            success_records: 0,
            failed_records: 0,
            duplicate_records: 0,
            skipped_records: 0,
            filtered_empty_text_records: 0,
            filtered_invalid_timestamp_records: 0,
            error_message: None,
        }
    }
}

/// Counters written when a run finishes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunCounts {
    pub source: u64,
    pub processed: u64,
    pub success: u64,
    pub failed: u64,
    pub duplicate: u64,
    pub skipped: u64,
    pub filtered_empty_text: u64,
    pub filtered_invalid_timestamp: u64,
}

impl MetaDb {
    /// Start a new run log row in `running` state
    pub async fn start_run(&self, stage: Stage) -> Result<PipelineRun> {
        let run = PipelineRun::new(stage);
        sqlx::query(
            r#"
            INSERT INTO pipeline_runs (batch_id, stage, started_at, status)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(&run.batch_id)
        .bind(&run.stage)
        .bind(&run.started_at)
        .bind(&run.status)
        .execute(&self.pool())
        .await?;
        Ok(run)
    }

    /// Finalize a run log row
    pub async fn complete_run(
        &self,
        run: &PipelineRun,
        status: RunStatus,
        counts: &RunCounts,
        error_message: Option<&str>,
    ) -> Result<()> {
        let ended = Utc::now();
        let duration_ms = DateTime::parse_from_rfc3339(&run.started_at)
            .map(|started| (ended - started.with_timezone(&Utc)).num_milliseconds())
            .unwrap_or(0);

        sqlx::query(
            r#"
            UPDATE pipeline_runs SET
                ended_at = ?,
                duration_ms = ?,
                status = ?,
                source_records = ?,
                processed_records = ?,
                success_records = ?,
                failed_records = ?,
                duplicate_records = ?,
                skipped_records = ?,
                filtered_empty_text_records = ?,
                filtered_invalid_timestamp_records = ?,
                error_message = ?
            WHERE batch_id = ?
            "#,
        )
        .bind(ended.to_rfc3339())
        .bind(duration_ms)
        .bind(status.to_string())
        .bind(counts.source as i64)
        .bind(counts.processed as i64)
        .bind(counts.success as i64)
        .bind(counts.failed as i64)
        .bind(counts.duplicate as i64)
        .bind(counts.skipped as i64)
        .bind(counts.filtered_empty_text as i64)
        .bind(counts.filtered_invalid_timestamp as i64)
        .bind(error_message)
        .bind(&run.batch_id)
        .execute(&self.pool())
        .await?;
        Ok(())
    }

    pub async fn get_run(&self, batch_id: &str) -> Result<Option<PipelineRun>> {
        let run = sqlx::query_as::<_, PipelineRun>("SELECT * FROM pipeline_runs WHERE batch_id = ?")
            .bind(batch_id)
            .fetch_optional(&self.pool())
            .await?;
        Ok(run)
    }

    /// Most recent runs first
    pub async fn recent_runs(&self, limit: usize) -> Result<Vec<PipelineRun>> {
        let runs = sqlx::query_as::<_, PipelineRun>(
            "SELECT * FROM pipeline_runs ORDER BY started_at DESC, rowid DESC LIMIT ?",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool())
        .await?;
        Ok(runs)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::setup_test_db;
    use super::*;

    #[test]
    fn test_batch_id_format() {
        let id = new_batch_id(Stage::Enrich);
        let parts: Vec<&str> = id.split('_').collect();
        assert_eq!(parts.len(), 4);
        assert_eq!(parts[0], "enrich");
        assert_eq!(parts[1].len(), 8);
        assert_eq!(parts[2].len(), 6);
        assert_eq!(parts[3].len(), 8);
        assert_ne!(new_batch_id(Stage::Enrich), id);
    }

    #[tokio::test]
    async fn test_run_lifecycle() {
        let (db, _tmp) = setup_test_db().await;

        let run = db.start_run(Stage::Transform).await.unwrap();
        let stored = db.get_run(&run.batch_id).await.unwrap().unwrap();
        assert_eq!(stored.status, "running");
        assert!(stored.ended_at.is_none());

        let counts = RunCounts {
            source: 6,
            processed: 3,
            success: 3,
            duplicate: 1,
            filtered_empty_text: 1,
            filtered_invalid_timestamp: 1,
            ..Default::default()
        };
        db.complete_run(&run, RunStatus::Completed, &counts, None)
            .await
            .unwrap();

        let stored = db.get_run(&run.batch_id).await.unwrap().unwrap();
        assert_eq!(stored.status, "completed");
        assert_eq!(stored.source_records, 6);
        assert_eq!(stored.duplicate_records, 1);
        assert_eq!(stored.filtered_invalid_timestamp_records, 1);
        assert!(stored.ended_at.is_some());
        assert!(stored.duration_ms.unwrap() >= 0);

        let recent = db.recent_runs(10).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].stage, "transform");
    }
}
