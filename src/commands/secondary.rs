//! Secondary (extreme negative) command implementation

use super::record_failed_run;
use crate::classify::rules::{needs_deep_check, rule_score, verdict, ExtremeVerdict};
use crate::classify::Classifier;
use crate::config::Config;
use crate::error::Result;
use crate::meta::{CanonicalRecord, MetaDb, RunCounts, RunStatus, Stage};
use crate::progress::{advance_progress, finish_progress, stage_progress};
use crate::rate_limit::CallPacer;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Summary of one secondary classification batch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecondaryReport {
    pub batch_id: String,
    pub status: RunStatus,
    pub message: String,
    pub available: bool,
    pub short_circuited: u64,
    pub claimed: u64,
    pub success: u64,
    pub failed: u64,
    pub extreme: u64,
    pub duration_ms: u64,
}

impl SecondaryReport {
    fn counts(&self) -> RunCounts {
        RunCounts {
            source: self.short_circuited + self.claimed,
            processed: self.success + self.failed,
            success: self.success,
            failed: self.failed,
            skipped: self.short_circuited,
            ..Default::default()
        }
    }

    /// Whether the batch moved any record to a final secondary state
    pub fn made_progress(&self) -> bool {
        self.short_circuited + self.success > 0
    }
}

/// Settle non-negative records and score up to `batch_size` negative ones
pub async fn cmd_secondary(
    db: &MetaDb,
    classifier: &dyn Classifier,
    pacer: &CallPacer,
    config: &Config,
    batch_size: usize,
) -> Result<SecondaryReport> {
    let started = Instant::now();
    let run = db.start_run(Stage::Secondary).await?;
    info!(
        batch_id = %run.batch_id,
        batch_size,
        classifier_available = classifier.is_available(),
        "Starting secondary classification"
    );

    let mut report = SecondaryReport {
        batch_id: run.batch_id.clone(),
        status: RunStatus::Running,
        message: String::new(),
        available: classifier.is_available(),
        short_circuited: 0,
        claimed: 0,
        success: 0,
        failed: 0,
        extreme: 0,
        duration_ms: 0,
    };

    let outcome = secondary_batch(db, classifier, pacer, config, batch_size, &mut report).await;
    report.duration_ms = started.elapsed().as_millis() as u64;

    match outcome {
        Ok(()) => {
            report.status = RunStatus::from_failures(report.failed);
            report.message = format!(
                "Settled {} non-negative records, scored {} of {} negative records ({} extreme)",
                report.short_circuited, report.success, report.claimed, report.extreme
            );
            db.complete_run(&run, report.status, &report.counts(), None)
                .await?;
            info!(
                batch_id = %report.batch_id,
                short_circuited = report.short_circuited,
                claimed = report.claimed,
                success = report.success,
                failed = report.failed,
                extreme = report.extreme,
                "Secondary classification finished"
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

async fn secondary_batch(
    db: &MetaDb,
    classifier: &dyn Classifier,
    pacer: &CallPacer,
    config: &Config,
    batch_size: usize,
    report: &mut SecondaryReport,
) -> Result<()> {
    report.short_circuited = db.short_circuit_secondary(batch_size).await?;

    let claimed = db.claim_negative_secondary(batch_size).await?;
    report.claimed = claimed.len() as u64;

    let outcome = score_claimed(db, classifier, pacer, config, &claimed, report).await;

    let ids: Vec<i64> = claimed.iter().map(|r| r.canonical_id).collect();
    match db.release_secondary(&ids).await {
        Ok(0) => {}
        Ok(released) => warn!(released, "Released unsettled records back to pending"),
        Err(e) => warn!("Could not release claimed records: {}", e),
    }

    outcome
}

async fn score_claimed(
    db: &MetaDb,
    classifier: &dyn Classifier,
    pacer: &CallPacer,
    config: &Config,
    claimed: &[CanonicalRecord],
    report: &mut SecondaryReport,
) -> Result<()> {
    let progress = stage_progress(claimed.len(), "Scoring negative records");
    let health_every = config.pipeline.health_check_every;

    for (index, record) in claimed.iter().enumerate() {
        if index > 0 && health_every > 0 && index % health_every == 0 {
            db.ensure_healthy().await?;
        }

        match score_one(classifier, pacer, config, record).await {
            Some(result) => match db.complete_secondary(record.canonical_id, result.extreme).await {
                Ok(()) => {
                    report.success += 1;
                    if result.extreme {
                        report.extreme += 1;
                    }
                }
                Err(e) => {
                    warn!(canonical_id = record.canonical_id, "Could not store verdict: {}", e);
                    mark_failed(db, record).await;
                    report.failed += 1;
                }
            },
            None => {
                mark_failed(db, record).await;
                report.failed += 1;
            }
        }
        advance_progress(&progress);
    }

    finish_progress(progress, "Negative records scored");
    Ok(())
}

/// A record that cannot even be marked failed is released with the rest of the batch
async fn mark_failed(db: &MetaDb, record: &CanonicalRecord) {
    if let Err(e) = db.fail_secondary(record.canonical_id).await {
        warn!(canonical_id = record.canonical_id, "Could not mark record failed: {}", e);
    }
}

/// Score one claimed record; `None` when it should be marked failed
async fn score_one(
    classifier: &dyn Classifier,
    pacer: &CallPacer,
    config: &Config,
    record: &CanonicalRecord,
) -> Option<ExtremeVerdict> {
    if record.text.trim().is_empty() {
        warn!(canonical_id = record.canonical_id, "Empty text; marking failed");
        return None;
    }

    let rule = rule_score(&record.text);
    let api = if needs_deep_check(rule, config.extreme.deep_check_threshold)
        && classifier.is_available()
    {
        pacer.wait().await;
        match classifier.extremeness_score(&record.text).await {
            Ok(score) => Some(score),
            Err(e) => {
                warn!(canonical_id = record.canonical_id, "Extremeness scoring failed: {}", e);
                return None;
            }
        }
    } else {
        None
    };

    let result = verdict(rule, api, config.extreme.cutoff);
    debug!(
        canonical_id = record.canonical_id,
        rule_score = result.rule_score,
        api_score = ?result.api_score,
        final_score = result.final_score,
        extreme = result.extreme,
        "Scored"
    );
    Some(result)
}

/// Print a secondary report to console
pub fn print_secondary_report(report: &SecondaryReport) {
    println!("\nSecondary {} [{}]", report.batch_id, report.status);
    println!("  {}", report.message);
    if !report.available {
        println!("  ⚠ Classifier unavailable, rule scores only");
    }
    println!("  Non-negative settled: {}", report.short_circuited);
    println!("  Negative claimed: {}", report.claimed);
    println!("  Succeeded: {}", report.success);
    println!("  Failed: {}", report.failed);
    println!("  Extreme: {}", report.extreme);
    println!("  Duration: {} ms", report.duration_ms);
}


#[cfg(test)]
mod tests {
    use super::test_support::seed_classified;
    use super::*;
    use crate::classify::test_support::ScriptedClassifier;
    use crate::classify::UnavailableClassifier;
    use crate::meta::test_support::setup_test_db;

    const HOSTILE: &str = "Garbage! I hate this, rude staff, calling my lawyer!";
    const MILD: &str = "so rude";
    const ANGRY_CN: &str = "垃圾产品，我要投诉";

    #[tokio::test]
    async fn test_non_negative_records_skip_the_classifier() {
        let (db, _tmp) = setup_test_db().await;
        let positive = seed_classified(&db, "k1", "lovely", "positive").await;
        let neutral = seed_classified(&db, "k2", "a phone", "neutral").await;
        let classifier = ScriptedClassifier::new().with_default_score(0.9);

        let report = cmd_secondary(&db, &classifier, &CallPacer::unpaced(), &Config::default(), 50)
            .await
            .unwrap();

        assert_eq!(report.short_circuited, 2);
        assert_eq!(report.claimed, 0);
        assert_eq!(classifier.score_calls(), 0);
        for id in [positive, neutral] {
            let record = db.get_canonical(id).await.unwrap().unwrap();
            assert_eq!(record.extreme_negative_processing_status, "completed");
            assert_eq!(record.extremely_negative, Some(false));
        }
    }

    #[tokio::test]
    async fn test_negative_records_are_scored() {
        let (db, _tmp) = setup_test_db().await;
        let hostile = seed_classified(&db, "k1", HOSTILE, "negative").await;
        let mild = seed_classified(&db, "k2", MILD, "negative").await;
        let angry = seed_classified(&db, "k3", ANGRY_CN, "negative").await;

        let classifier = ScriptedClassifier::new()
            .score(HOSTILE, 0.8)
            .score_error(ANGRY_CN);

        let report = cmd_secondary(&db, &classifier, &CallPacer::unpaced(), &Config::default(), 50)
            .await
            .unwrap();

        assert_eq!(report.claimed, 3);
        assert_eq!(report.success, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(report.extreme, 1);
        assert_eq!(report.status, RunStatus::Partial);
        // The mild record stays under the deep-check threshold
        assert_eq!(classifier.score_calls(), 2);

        let hostile = db.get_canonical(hostile).await.unwrap().unwrap();
        assert_eq!(hostile.extreme_negative_processing_status, "completed");
        assert_eq!(hostile.extremely_negative, Some(true));

        let mild = db.get_canonical(mild).await.unwrap().unwrap();
        assert_eq!(mild.extremely_negative, Some(false));

        let angry = db.get_canonical(angry).await.unwrap().unwrap();
        assert_eq!(angry.extreme_negative_processing_status, "failed");
    }

    #[tokio::test]
    async fn test_rule_only_when_classifier_unavailable() {
        let (db, _tmp) = setup_test_db().await;
        let hostile = seed_classified(&db, "k1", HOSTILE, "negative").await;
        let classifier = UnavailableClassifier::new("no key");

        let report = cmd_secondary(&db, &classifier, &CallPacer::unpaced(), &Config::default(), 50)
            .await
            .unwrap();

        assert!(!report.available);
        assert_eq!(report.success, 1);
        let record = db.get_canonical(hostile).await.unwrap().unwrap();
        assert_eq!(record.extremely_negative, Some(true));
    }

    #[tokio::test]
    async fn test_pending_primary_is_left_alone() {
        let (db, _tmp) = setup_test_db().await;
        let id = db
            .insert_canonical(&crate::meta::test_support::new_canonical("k1", "text"))
            .await
            .unwrap();
        let classifier = ScriptedClassifier::new();

        let report = cmd_secondary(&db, &classifier, &CallPacer::unpaced(), &Config::default(), 50)
            .await
            .unwrap();

        assert_eq!(report.short_circuited, 0);
        assert_eq!(report.claimed, 0);
        assert!(!report.made_progress());
        let record = db.get_canonical(id).await.unwrap().unwrap();
        assert_eq!(record.extreme_negative_processing_status, "pending");
    }

    async fn reject_status_change(db: &MetaDb, text: &str, statuses: &str) {
        let sql = format!(
            "CREATE TRIGGER reject_{text} BEFORE UPDATE OF extreme_negative_processing_status ON canonical_records \
             WHEN NEW.text = '{text}' AND NEW.extreme_negative_processing_status IN ({statuses}) \
             BEGIN SELECT RAISE(ABORT, 'store rejected update'); END"
        );
        sqlx::query(&sql).execute(&db.pool()).await.unwrap();
    }

    #[tokio::test]
    async fn test_store_errors_never_leave_records_processing() {
        let (db, _tmp) = setup_test_db().await;
        let first = seed_classified(&db, "k1", "awful", "negative").await;
        let failing = seed_classified(&db, "k2", "terrible", "negative").await;
        let stuck = seed_classified(&db, "k3", "dreadful", "negative").await;
        reject_status_change(&db, "terrible", "'completed'").await;
        reject_status_change(&db, "dreadful", "'completed', 'failed'").await;

        let classifier = ScriptedClassifier::new();
        let report = cmd_secondary(&db, &classifier, &CallPacer::unpaced(), &Config::default(), 50)
            .await
            .unwrap();

        assert_eq!(report.claimed, 3);
        assert_eq!(report.success, 1);
        assert_eq!(report.failed, 2);
        assert_eq!(report.status, RunStatus::Partial);

        let status_of = |id: i64| {
            let db = &db;
            async move {
                db.get_canonical(id)
                    .await
                    .unwrap()
                    .unwrap()
                    .extreme_negative_processing_status
            }
        };
        assert_eq!(status_of(first).await, "completed");
        assert_eq!(status_of(failing).await, "failed");
        assert_eq!(status_of(stuck).await, "pending");
    }
}
