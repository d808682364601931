//! Reset and retry commands

use super::{cmd_enrich, cmd_secondary, EnrichmentReport, SecondaryReport};
use crate::classify::Classifier;
use crate::config::Config;
use crate::error::Result;
use crate::meta::{MetaDb, ResetCounts};
use crate::rate_limit::CallPacer;
use serde::{Deserialize, Serialize};
use tracing::info;

/// Stage whose failed records should be retried
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum RetryStage {
    /// Sentiment classification
    Primary,
    /// Extreme-negative scoring
    Secondary,
}

/// Outcome of a retry: how many records were requeued and the batch that followed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryReport {
    pub stage: RetryStage,
    pub requeued: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enrichment: Option<EnrichmentReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secondary: Option<SecondaryReport>,
}

/// Move every stuck or failed status back to pending
pub async fn cmd_reset(db: &MetaDb) -> Result<ResetCounts> {
    let counts = db.reset_stuck_and_failed().await?;
    info!(
        primary_stuck = counts.primary_stuck,
        primary_failed = counts.primary_failed,
        secondary_stuck = counts.secondary_stuck,
        secondary_failed = counts.secondary_failed,
        "Reset stuck and failed records"
    );
    Ok(counts)
}

/// Requeue up to `limit` failed records of one stage and run a batch of that stage
pub async fn cmd_retry(
    db: &MetaDb,
    classifier: &dyn Classifier,
    config: &Config,
    stage: RetryStage,
    limit: usize,
) -> Result<RetryReport> {
    let pacer = CallPacer::new(config.pipeline.call_interval());

    match stage {
        RetryStage::Primary => {
            let requeued = db.retry_failed_primary(limit).await?;
            info!(requeued, "Requeued failed sentiment classifications");
            let report = cmd_enrich(db, classifier, &pacer, config, limit).await?;
            Ok(RetryReport {
                stage,
                requeued,
                enrichment: Some(report),
                secondary: None,
            })
        }
        RetryStage::Secondary => {
            let requeued = db.retry_failed_secondary(limit).await?;
            info!(requeued, "Requeued failed extreme-negative scoring");
            let report = cmd_secondary(db, classifier, &pacer, config, limit).await?;
            Ok(RetryReport {
                stage,
                requeued,
                enrichment: None,
                secondary: Some(report),
            })
        }
    }
}

/// Re-open processed raw rows so the next transform reads them again
pub async fn cmd_reset_raw(db: &MetaDb, upload_batch_id: Option<&str>) -> Result<u64> {
    let reopened = db.reset_raw_processed(upload_batch_id).await?;
    info!(reopened, upload_batch_id = ?upload_batch_id, "Re-opened raw records");
    Ok(reopened)
}

/// Print reset counts to console
pub fn print_reset_counts(counts: &ResetCounts) {
    println!("\n✓ Reset complete");
    println!(
        "  Sentiment: {} stuck, {} failed",
        counts.primary_stuck, counts.primary_failed
    );
    println!(
        "  Extreme-negative: {} stuck, {} failed",
        counts.secondary_stuck, counts.secondary_failed
    );
}
