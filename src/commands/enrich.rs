//! Enrich command implementation

use super::record_failed_run;
use crate::classify::Classifier;
use crate::config::Config;
use crate::error::Result;
use crate::meta::{CanonicalRecord, MetaDb, RunCounts, RunStatus, Stage};
use crate::progress::{advance_progress, finish_progress, stage_progress};
use crate::rate_limit::CallPacer;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Summary of one primary classification batch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichmentReport {
    pub batch_id: String,
    pub status: RunStatus,
    pub message: String,
    pub available: bool,
    pub claimed: u64,
    pub success: u64,
    pub failed: u64,
    pub duration_ms: u64,
}

impl EnrichmentReport {
    fn counts(&self) -> RunCounts {
        RunCounts {
            source: self.claimed,
            processed: self.success + self.failed,
            success: self.success,
            failed: self.failed,
            ..Default::default()
        }
    }
}

/// Classify up to `batch_size` pending canonical records
pub async fn cmd_enrich(
    db: &MetaDb,
    classifier: &dyn Classifier,
    pacer: &CallPacer,
    config: &Config,
    batch_size: usize,
) -> Result<EnrichmentReport> {
    let started = Instant::now();
    let run = db.start_run(Stage::Enrich).await?;

    let mut report = EnrichmentReport {
        batch_id: run.batch_id.clone(),
        status: RunStatus::Running,
        message: String::new(),
        available: classifier.is_available(),
        claimed: 0,
        success: 0,
        failed: 0,
        duration_ms: 0,
    };

    if !report.available {
        warn!(batch_id = %run.batch_id, "Classifier unavailable; nothing claimed");
        report.status = RunStatus::Unavailable;
        report.message = "Classifier unavailable".to_string();
        db.complete_run(&run, report.status, &report.counts(), Some(&report.message))
            .await?;
        report.duration_ms = started.elapsed().as_millis() as u64;
        return Ok(report);
    }

    info!(
        batch_id = %run.batch_id,
        batch_size,
        model = classifier.model_name(),
        "Starting enrichment"
    );

    let outcome = enrich_batch(db, classifier, pacer, config, batch_size, &mut report).await;
    report.duration_ms = started.elapsed().as_millis() as u64;

    match outcome {
        Ok(()) => {
            report.status = RunStatus::from_failures(report.failed);
            report.message = if report.claimed == 0 {
                "No pending records".to_string()
            } else {
                format!(
                    "Classified {} of {} records",
                    report.success, report.claimed
                )
            };
            db.complete_run(&run, report.status, &report.counts(), None)
                .await?;
            info!(
                batch_id = %report.batch_id,
                claimed = report.claimed,
                success = report.success,
                failed = report.failed,
                "Enrichment finished"
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

async fn enrich_batch(
    db: &MetaDb,
    classifier: &dyn Classifier,
    pacer: &CallPacer,
    config: &Config,
    batch_size: usize,
    report: &mut EnrichmentReport,
) -> Result<()> {
    let claimed = db.claim_pending_primary(batch_size).await?;
    report.claimed = claimed.len() as u64;

    let outcome = classify_claimed(db, classifier, pacer, config, &claimed, report).await;

    // Nothing this batch claimed may stay in processing once it returns
    let ids: Vec<i64> = claimed.iter().map(|r| r.canonical_id).collect();
    match db.release_primary(&ids).await {
        Ok(0) => {}
        Ok(released) => warn!(released, "Released unsettled records back to pending"),
        Err(e) => warn!("Could not release claimed records: {}", e),
    }

    outcome
}

async fn classify_claimed(
    db: &MetaDb,
    classifier: &dyn Classifier,
    pacer: &CallPacer,
    config: &Config,
    claimed: &[CanonicalRecord],
    report: &mut EnrichmentReport,
) -> Result<()> {
    let progress = stage_progress(claimed.len(), "Classifying sentiment");
    let health_every = config.pipeline.health_check_every;

    for (index, record) in claimed.iter().enumerate() {
        if index > 0 && health_every > 0 && index % health_every == 0 {
            db.ensure_healthy().await?;
        }

        match classify_one(db, classifier, pacer, record).await {
            Ok(true) => report.success += 1,
            Ok(false) => report.failed += 1,
            Err(e) => {
                warn!(canonical_id = record.canonical_id, "Could not store result: {}", e);
                report.failed += 1;
            }
        }
        advance_progress(&progress);
    }

    finish_progress(progress, "Sentiment classified");
    Ok(())
}

/// Classify one claimed record; `Ok(false)` when the record was marked failed
async fn classify_one(
    db: &MetaDb,
    classifier: &dyn Classifier,
    pacer: &CallPacer,
    record: &CanonicalRecord,
) -> Result<bool> {
    if record.text.trim().is_empty() {
        warn!(canonical_id = record.canonical_id, "Empty text; marking failed");
        db.fail_primary(record.canonical_id).await?;
        return Ok(false);
    }

    pacer.wait().await;
    match classifier.classify(&record.text).await {
        Ok(classification) => {
            debug!(
                canonical_id = record.canonical_id,
                label = %classification.label,
                confidence = classification.confidence,
                reasoning = classification.reasoning.as_deref().unwrap_or(""),
                "Classified"
            );
            let stored = db
                .complete_primary(
                    record.canonical_id,
                    classification.label.as_str(),
                    classification.confidence,
                )
                .await;
            match stored {
                Ok(()) => Ok(true),
                Err(e) => {
                    warn!(canonical_id = record.canonical_id, "Could not store classification: {}", e);
                    db.fail_primary(record.canonical_id).await?;
                    Ok(false)
                }
            }
        }
        Err(e) => {
            warn!(canonical_id = record.canonical_id, "Classification failed: {}", e);
            db.fail_primary(record.canonical_id).await?;
            Ok(false)
        }
    }
}

/// Print an enrichment report to console
pub fn print_enrichment_report(report: &EnrichmentReport) {
    println!("\nEnrichment {} [{}]", report.batch_id, report.status);
    println!("  {}", report.message);
    if !report.available {
        println!("  ✗ Classifier unavailable, no records were touched");
        return;
    }
    println!("  Claimed: {}", report.claimed);
    println!("  Succeeded: {}", report.success);
    println!("  Failed: {}", report.failed);
    println!("  Duration: {} ms", report.duration_ms);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::test_support::ScriptedClassifier;
    use crate::classify::{Sentiment, UnavailableClassifier};
    use crate::meta::test_support::setup_test_db;
    use crate::meta::test_support::new_canonical;

    async fn seed(db: &MetaDb, texts: &[&str]) -> Vec<i64> {
        let mut ids = Vec::new();
        for (i, text) in texts.iter().enumerate() {
            let key = format!("key-{}", i);
            ids.push(db.insert_canonical(&new_canonical(&key, text)).await.unwrap());
        }
        ids
    }

    #[tokio::test]
    async fn test_batch_classifies_and_leaves_nothing_processing() {
        let (db, _tmp) = setup_test_db().await;
        let ids = seed(&db, &["great phone", "broken on arrival", "it is a phone"]).await;

        let classifier = ScriptedClassifier::new()
            .label("great phone", Sentiment::Positive, 0.9)
            .label("broken on arrival", Sentiment::Negative, 0.8)
            .label_error("it is a phone");

        let report = cmd_enrich(&db, &classifier, &CallPacer::unpaced(), &Config::default(), 50)
            .await
            .unwrap();

        assert!(report.available);
        assert_eq!(report.claimed, 3);
        assert_eq!(report.success, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(report.status, RunStatus::Partial);
        assert_eq!(classifier.classify_calls(), 3);

        let first = db.get_canonical(ids[0]).await.unwrap().unwrap();
        assert_eq!(first.ai_processing_status, "completed");
        assert_eq!(first.ai_sentiment.as_deref(), Some("positive"));
        assert_eq!(first.ai_confidence, Some(0.9));
        assert!(first.ai_processed_at.is_some());

        let third = db.get_canonical(ids[2]).await.unwrap().unwrap();
        assert_eq!(third.ai_processing_status, "failed");

        let counts = db.primary_status_counts().await.unwrap();
        assert!(counts
            .iter()
            .all(|c| c.value.as_deref() != Some("processing")));

        let run = db.get_run(&report.batch_id).await.unwrap().unwrap();
        assert_eq!(run.status, "partial");
        assert_eq!(run.success_records, 2);
        assert_eq!(run.failed_records, 1);
    }

    #[tokio::test]
    async fn test_failed_records_are_not_reclaimed() {
        let (db, _tmp) = setup_test_db().await;
        seed(&db, &["flaky"]).await;
        let classifier = ScriptedClassifier::new().label_error("flaky");
        let config = Config::default();

        let first = cmd_enrich(&db, &classifier, &CallPacer::unpaced(), &config, 50)
            .await
            .unwrap();
        assert_eq!(first.failed, 1);

        let second = cmd_enrich(&db, &classifier, &CallPacer::unpaced(), &config, 50)
            .await
            .unwrap();
        assert_eq!(second.claimed, 0);
        assert_eq!(second.message, "No pending records");
        assert_eq!(classifier.classify_calls(), 1);
    }

    #[tokio::test]
    async fn test_batch_size_and_order() {
        let (db, _tmp) = setup_test_db().await;
        let ids = seed(&db, &["a", "b", "c"]).await;
        let classifier = ScriptedClassifier::new();

        let report = cmd_enrich(&db, &classifier, &CallPacer::unpaced(), &Config::default(), 2)
            .await
            .unwrap();
        assert_eq!(report.claimed, 2);

        let last = db.get_canonical(ids[2]).await.unwrap().unwrap();
        assert_eq!(last.ai_processing_status, "pending");
        let first = db.get_canonical(ids[0]).await.unwrap().unwrap();
        assert_eq!(first.ai_processing_status, "completed");
        assert_eq!(first.ai_sentiment.as_deref(), Some("neutral"));
    }

    #[tokio::test]
    async fn test_health_checks_do_not_disturb_batch() {
        let (db, _tmp) = setup_test_db().await;
        seed(&db, &["a", "b", "c", "d", "e"]).await;
        let classifier = ScriptedClassifier::new();
        let mut config = Config::default();
        config.pipeline.health_check_every = 2;

        let report = cmd_enrich(&db, &classifier, &CallPacer::unpaced(), &config, 50)
            .await
            .unwrap();
        assert_eq!(report.success, 5);
        assert_eq!(report.status, RunStatus::Completed);
    }

    #[tokio::test]
    async fn test_unavailable_classifier_touches_nothing() {
        let (db, _tmp) = setup_test_db().await;
        let ids = seed(&db, &["some text"]).await;
        let classifier = UnavailableClassifier::new("no key");

        let report = cmd_enrich(&db, &classifier, &CallPacer::unpaced(), &Config::default(), 50)
            .await
            .unwrap();

        assert!(!report.available);
        assert_eq!(report.claimed, 0);
        assert_eq!(report.success, 0);
        assert_eq!(report.failed, 0);
        assert_eq!(report.status, RunStatus::Unavailable);

        let record = db.get_canonical(ids[0]).await.unwrap().unwrap();
        assert_eq!(record.ai_processing_status, "pending");

        let run = db.get_run(&report.batch_id).await.unwrap().unwrap();
        assert_eq!(run.status, "unavailable");
    }

    async fn reject_status_change(db: &MetaDb, text: &str, statuses: &str) {
        let sql = format!(
            "CREATE TRIGGER reject_{text} BEFORE UPDATE OF ai_processing_status ON canonical_records \
             WHEN NEW.text = '{text}' AND NEW.ai_processing_status IN ({statuses}) \
             BEGIN SELECT RAISE(ABORT, 'store rejected update'); END"
        );
        sqlx::query(&sql).execute(&db.pool()).await.unwrap();
    }

    #[tokio::test]
    async fn test_store_error_fails_one_record_and_batch_continues() {
        let (db, _tmp) = setup_test_db().await;
        let ids = seed(&db, &["first", "blocked", "last"]).await;
        reject_status_change(&db, "blocked", "'completed'").await;

        let classifier = ScriptedClassifier::new();
        let report = cmd_enrich(&db, &classifier, &CallPacer::unpaced(), &Config::default(), 50)
            .await
            .unwrap();

        assert_eq!(report.claimed, 3);
        assert_eq!(report.success, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(report.status, RunStatus::Partial);

        let statuses: Vec<String> = {
            let mut out = Vec::new();
            for id in &ids {
                out.push(db.get_canonical(*id).await.unwrap().unwrap().ai_processing_status);
            }
            out
        };
        assert_eq!(statuses, ["completed", "failed", "completed"]);
    }

    #[tokio::test]
    async fn test_unwritable_record_is_released_to_pending() {
        let (db, _tmp) = setup_test_db().await;
        let ids = seed(&db, &["first", "stuck", "last"]).await;
        reject_status_change(&db, "stuck", "'completed', 'failed'").await;

        let classifier = ScriptedClassifier::new();
        let report = cmd_enrich(&db, &classifier, &CallPacer::unpaced(), &Config::default(), 50)
            .await
            .unwrap();

        assert_eq!(report.success, 2);
        assert_eq!(report.failed, 1);

        let stuck = db.get_canonical(ids[1]).await.unwrap().unwrap();
        assert_eq!(stuck.ai_processing_status, "pending");
        let counts = db.primary_status_counts().await.unwrap();
        assert!(counts
            .iter()
            .all(|c| c.value.as_deref() != Some("processing")));
    }
}
