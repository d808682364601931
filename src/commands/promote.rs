//! Promote command implementation

use super::record_failed_run;
use crate::error::Result;
use crate::meta::{MetaDb, PipelineRun, RunCounts, RunStatus, Stage};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Summary of one promotion batch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromotionReport {
    pub batch_id: String,
    pub status: RunStatus,
    pub message: String,
    pub candidates: u64,
    pub promoted: u64,
    pub skipped: u64,
    pub failed: u64,
    pub duration_ms: u64,
}

impl PromotionReport {
    fn counts(&self) -> RunCounts {
        RunCounts {
            source: self.candidates,
            processed: self.promoted + self.skipped + self.failed,
            success: self.promoted,
            failed: self.failed,
            skipped: self.skipped,
            ..Default::default()
        }
    }
}

/// Copy up to `batch_size` fully classified records into the enriched table
pub async fn cmd_promote(db: &MetaDb, batch_size: usize) -> Result<PromotionReport> {
    let started = Instant::now();
    let run = db.start_run(Stage::Promote).await?;
    info!(batch_id = %run.batch_id, batch_size, "Starting promotion");

    let mut report = PromotionReport {
        batch_id: run.batch_id.clone(),
        status: RunStatus::Running,
        message: String::new(),
        candidates: 0,
        promoted: 0,
        skipped: 0,
        failed: 0,
        duration_ms: 0,
    };

    let outcome = promote_batch(db, &run, batch_size, &mut report).await;
    report.duration_ms = started.elapsed().as_millis() as u64;

    match outcome {
        Ok(()) => {
            report.status = RunStatus::from_failures(report.failed);
            report.message = if report.candidates == 0 {
                "No records awaiting promotion".to_string()
            } else {
                format!("Promoted {} of {} records", report.promoted, report.candidates)
            };
            db.complete_run(&run, report.status, &report.counts(), None)
                .await?;
            info!(
                batch_id = %report.batch_id,
                candidates = report.candidates,
                promoted = report.promoted,
                skipped = report.skipped,
                failed = report.failed,
                "Promotion finished"
            );
        }
        Err(e) => {
            record_failed_run(db, &run, &report.counts(), &e).await;
            report.status = RunStatus::Failed;
            report.message = e.to_string();
        }
    }

    Ok(report)
}

async fn promote_batch(
    db: &MetaDb,
    run: &PipelineRun,
    batch_size: usize,
    report: &mut PromotionReport,
) -> Result<()> {
    let candidates = db.fetch_promotion_candidates(batch_size).await?;
    report.candidates = candidates.len() as u64;

    for record in &candidates {
        match db.insert_enriched_if_absent(record, &run.batch_id).await {
            Ok(true) => {
                debug!(canonical_id = record.canonical_id, "Promoted");
                report.promoted += 1;
            }
            Ok(false) => {
                debug!(canonical_id = record.canonical_id, "Already promoted");
                report.skipped += 1;
            }
            Err(e) => {
                warn!(canonical_id = record.canonical_id, "Promotion failed: {}", e);
                report.failed += 1;
            }
        }
    }

    Ok(())
}

/// Print a promotion report to console
pub fn print_promotion_report(report: &PromotionReport) {
    println!("\nPromotion {} [{}]", report.batch_id, report.status);
    println!("  {}", report.message);
    println!("  Candidates: {}", report.candidates);
    println!("  Promoted: {}", report.promoted);
    println!("  Already present: {}", report.skipped);
    println!("  Failed: {}", report.failed);
    println!("  Duration: {} ms", report.duration_ms);
}
