//! Transform command implementation

use super::record_failed_run;
use crate::error::Result;
use crate::meta::{MetaDb, RunCounts, RunStatus, Stage};
use crate::transform::plan_transform;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Summary of one transform batch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransformReport {
    pub batch_id: String,
    pub status: RunStatus,
    pub message: String,
    pub read: u64,
    pub validated: u64,
    pub deduped: u64,
    pub inserted: u64,
    pub skipped_existing: u64,
    pub failed: u64,
    pub filtered_empty_text: u64,
    pub filtered_invalid_timestamp: u64,
    pub duration_ms: u64,
}

impl TransformReport {
    fn counts(&self) -> RunCounts {
        RunCounts {
            source: self.read,
            processed: self.validated,
            success: self.inserted,
            failed: self.failed,
            duplicate: self.deduped,
            skipped: self.skipped_existing,
            filtered_empty_text: self.filtered_empty_text,
            filtered_invalid_timestamp: self.filtered_invalid_timestamp,
        }
    }
}

/// Turn up to `batch_size` unprocessed raw rows into canonical records
pub async fn cmd_transform(db: &MetaDb, batch_size: usize) -> Result<TransformReport> {
    let started = Instant::now();
    let run = db.start_run(Stage::Transform).await?;
    info!(batch_id = %run.batch_id, batch_size, "Starting transform");

    let mut report = TransformReport {
        batch_id: run.batch_id.clone(),
        status: RunStatus::Running,
        message: String::new(),
        read: 0,
        validated: 0,
        deduped: 0,
        inserted: 0,
        skipped_existing: 0,
        failed: 0,
        filtered_empty_text: 0,
        filtered_invalid_timestamp: 0,
        duration_ms: 0,
    };

    let outcome = transform_batch(db, batch_size, &mut report).await;
    report.duration_ms = started.elapsed().as_millis() as u64;

    match outcome {
        Ok(()) => {
            report.status = RunStatus::from_failures(report.failed);
            report.message = if report.read == 0 {
                "No unprocessed raw records".to_string()
            } else {
                format!(
                    "Inserted {} canonical records from {} raw rows",
                    report.inserted, report.read
                )
            };
            db.complete_run(&run, report.status, &report.counts(), None)
                .await?;
            info!(
                batch_id = %report.batch_id,
                read = report.read,
                inserted = report.inserted,
                deduped = report.deduped,
                skipped_existing = report.skipped_existing,
                failed = report.failed,
                "Transform finished"
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

async fn transform_batch(db: &MetaDb, batch_size: usize, report: &mut TransformReport) -> Result<()> {
    let raws = db.fetch_unprocessed_raw(batch_size).await?;
    if raws.is_empty() {
        return Ok(());
    }

    let plan = plan_transform(&raws);
    report.read = plan.read as u64;
    report.validated = plan.validated as u64;
    report.deduped = plan.deduped as u64;
    report.filtered_empty_text = plan.filtered_empty_text as u64;
    report.filtered_invalid_timestamp = plan.filtered_invalid_timestamp as u64;

    for record in &plan.records {
        match db.canonical_exists(&record.dedupe_key).await {
            Ok(true) => {
                debug!(source_id = record.source_id, "Canonical record already exists");
                report.skipped_existing += 1;
                continue;
            }
            Ok(false) => {}
            Err(e) => {
                warn!(source_id = record.source_id, "Dedupe lookup failed: {}", e);
                report.failed += 1;
                continue;
            }
        }

        match db.insert_canonical(record).await {
            Ok(canonical_id) => {
                debug!(canonical_id, source_id = record.source_id, "Inserted canonical record");
                report.inserted += 1;
            }
            Err(e) => {
                warn!(source_id = record.source_id, "Failed to insert canonical record: {}", e);
                report.failed += 1;
            }
        }
    }

    let source_ids: Vec<i64> = raws.iter().map(|r| r.source_id).collect();
    db.mark_raw_processed(&source_ids).await?;
    Ok(())
}

/// Print a transform report to console
pub fn print_transform_report(report: &TransformReport) {
    println!("\nTransform {} [{}]", report.batch_id, report.status);
    println!("  {}", report.message);
    println!("  Read: {}", report.read);
    println!("  Validated: {}", report.validated);
    println!("  Duplicates collapsed: {}", report.deduped);
    println!("  Inserted: {}", report.inserted);
    println!("  Already present: {}", report.skipped_existing);
    println!("  Failed: {}", report.failed);
    println!(
        "  Dropped: {} empty text, {} invalid timestamp",
        report.filtered_empty_text, report.filtered_invalid_timestamp
    );
    println!("  Duration: {} ms", report.duration_ms);
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::meta::{MetaDb, NewRawRecord};

    pub fn new_raw(ts: &str, author: &str, text: &str) -> NewRawRecord {
        NewRawRecord {
            last_update: Some(ts.to_string()),
            brand_label: Some("acme".to_string()),
            author_name: Some(author.to_string()),
            channel: Some("weibo".to_string()),
            text: Some(text.to_string()),
            upload_batch_id: Some("upload-1".to_string()),
            ..Default::default()
        }
    }

    pub async fn load_rows(db: &MetaDb, rows: &[NewRawRecord]) {
        db.insert_raw_batch(rows).await.unwrap();
    }
}
