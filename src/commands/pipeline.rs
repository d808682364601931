//! Full pipeline command implementation

use super::{
    cmd_enrich, cmd_promote, cmd_secondary, cmd_transform, EnrichmentReport, PromotionReport,
    SecondaryReport, TransformReport,
};
use crate::classify::Classifier;
use crate::config::Config;
use crate::error::Result;
use crate::meta::{MetaDb, RunStatus};
use crate::rate_limit::CallPacer;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{info, warn};

/// Totals across every batch of a pipeline run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineTotals {
    pub inserted: u64,
    pub classified: u64,
    pub classification_failed: u64,
    pub secondary_completed: u64,
    pub secondary_failed: u64,
    pub extreme: u64,
    pub promoted: u64,
}

/// Reports of every batch of a pipeline run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineReport {
    pub transform: TransformReport,
    pub reset_stuck: u64,
    pub enrichment: Vec<EnrichmentReport>,
    pub secondary: Vec<SecondaryReport>,
    pub promotion: Vec<PromotionReport>,
    pub classifier_available: bool,
    pub totals: PipelineTotals,
    pub duration_ms: u64,
}

/// Run every stage in order, looping each until it runs dry.
///
/// Each loop is capped at `pipeline.max_iterations` batches. Records left in
/// `processing` are only requeued when `reset_stuck` is set, since another
/// run may still hold them.
pub async fn cmd_pipeline(
    db: &MetaDb,
    classifier: &dyn Classifier,
    config: &Config,
    reset_stuck: bool,
) -> Result<PipelineReport> {
    let started = Instant::now();
    let pipeline = &config.pipeline;
    let pacer = CallPacer::new(pipeline.call_interval());
    let max_iterations = pipeline.max_iterations;

    info!(
        max_iterations,
        classifier_available = classifier.is_available(),
        "Starting pipeline"
    );

    let transform = cmd_transform(db, pipeline.transform_batch_size).await?;
    let reset_stuck = if reset_stuck {
        let requeued = db.reset_stuck_primary().await? + db.reset_stuck_secondary().await?;
        info!(requeued, "Requeued records left in processing");
        requeued
    } else {
        0
    };

    let mut enrichment = Vec::new();
    for iteration in 1..=max_iterations {
        let report = cmd_enrich(db, classifier, &pacer, config, pipeline.enrich_batch_size).await?;
        let done = !report.available || report.claimed == 0 || report.status == RunStatus::Failed;
        enrichment.push(report);
        if done {
            break;
        }
        if iteration == max_iterations {
            warn!(max_iterations, "Enrichment stopped at iteration cap");
        }
    }

    let mut secondary = Vec::new();
    for iteration in 1..=max_iterations {
        let report =
            cmd_secondary(db, classifier, &pacer, config, pipeline.secondary_batch_size).await?;
        let done = !report.made_progress() || report.status == RunStatus::Failed;
        secondary.push(report);
        if done {
            break;
        }
        if iteration == max_iterations {
            warn!(max_iterations, "Secondary classification stopped at iteration cap");
        }
    }

    let mut promotion = Vec::new();
    for iteration in 1..=max_iterations {
        let report = cmd_promote(db, pipeline.promote_batch_size).await?;
        let done = report.promoted == 0 || report.status == RunStatus::Failed;
        promotion.push(report);
        if done {
            break;
        }
        if iteration == max_iterations {
            warn!(max_iterations, "Promotion stopped at iteration cap");
        }
    }

    let totals = PipelineTotals {
        inserted: transform.inserted,
        classified: enrichment.iter().map(|r| r.success).sum(),
        classification_failed: enrichment.iter().map(|r| r.failed).sum(),
        secondary_completed: secondary
            .iter()
            .map(|r| r.short_circuited + r.success)
            .sum(),
        secondary_failed: secondary.iter().map(|r| r.failed).sum(),
        extreme: secondary.iter().map(|r| r.extreme).sum(),
        promoted: promotion.iter().map(|r| r.promoted).sum(),
    };

    info!(
        inserted = totals.inserted,
        classified = totals.classified,
        extreme = totals.extreme,
        promoted = totals.promoted,
        "Pipeline finished"
    );

    Ok(PipelineReport {
        transform,
        reset_stuck,
        enrichment,
        secondary,
        promotion,
        classifier_available: classifier.is_available(),
        totals,
        duration_ms: started.elapsed().as_millis() as u64,
    })
}

/// Print a pipeline report to console
pub fn print_pipeline_report(report: &PipelineReport) {
    println!("\n✓ Pipeline complete in {} ms\n", report.duration_ms);
    println!(
        "Transform: {} read, {} inserted, {} duplicates, {} dropped",
        report.transform.read,
        report.transform.inserted,
        report.transform.deduped,
        report.transform.filtered_empty_text + report.transform.filtered_invalid_timestamp
    );
    if report.reset_stuck > 0 {
        println!("Requeued stuck records: {}", report.reset_stuck);
    }
    if !report.classifier_available {
        println!("⚠ Classifier unavailable: sentiment classification skipped");
    }
    println!(
        "Enrichment: {} classified, {} failed in {} batches",
        report.totals.classified,
        report.totals.classification_failed,
        report.enrichment.len()
    );
    println!(
        "Secondary: {} completed ({} extreme), {} failed in {} batches",
        report.totals.secondary_completed,
        report.totals.extreme,
        report.totals.secondary_failed,
        report.secondary.len()
    );
    println!(
        "Promotion: {} promoted in {} batches",
        report.totals.promoted,
        report.promotion.len()
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::test_support::ScriptedClassifier;
    use crate::classify::{Sentiment, UnavailableClassifier};
    use crate::commands::transform::test_support::{load_rows, new_raw};
    use crate::meta::test_support::{new_canonical, setup_test_db};
    use std::time::Duration;

    fn fast_config() -> Config {
        let mut config = Config::default();
        config.pipeline.call_interval_ms = 0;
        config.pipeline.enrich_batch_size = 2;
        config.pipeline.secondary_batch_size = 2;
        config.pipeline.promote_batch_size = 2;
        config
    }

    #[tokio::test]
    async fn test_end_to_end() {
        let (db, _tmp) = setup_test_db().await;
        load_rows(
            &db,
            &[
                new_raw("2024-05-01 09:00:00", "alice", "Battery died after a week"),
                new_raw("2024-05-01 10:00:00", "bob", "Love the colour"),
                new_raw("2024-05-01 11:00:00", "carol", "Garbage! I hate this, rude staff, calling my lawyer!"),
                new_raw("bad time", "dave", "Shipping was quick"),
                new_raw("2024-05-01 12:00:00", "erin", "Arrived on Tuesday"),
            ],
        )
        .await;

        let classifier = ScriptedClassifier::new()
            .label("Battery died after a week", Sentiment::Negative, 0.8)
            .label("Love the colour", Sentiment::Positive, 0.95)
            .label(
                "Garbage! I hate this, rude staff, calling my lawyer!",
                Sentiment::Negative,
                0.99,
            )
            .with_default_score(0.9);

        let report = cmd_pipeline(&db, &classifier, &fast_config(), false).await.unwrap();

        assert_eq!(report.transform.inserted, 4);
        assert_eq!(report.transform.filtered_invalid_timestamp, 1);
        assert_eq!(report.totals.classified, 4);
        assert_eq!(report.totals.secondary_completed, 4);
        assert_eq!(report.totals.extreme, 1);
        assert_eq!(report.totals.promoted, 4);
        // Two batches of two, then an empty claim
        assert_eq!(report.enrichment.len(), 3);
        assert_eq!(classifier.score_calls(), 1);

        assert_eq!(db.count_enriched().await.unwrap(), 4);
        assert_eq!(db.count_pending_promotion().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_unavailable_classifier_stops_after_one_batch() {
        let (db, _tmp) = setup_test_db().await;
        load_rows(&db, &[new_raw("2024-05-01 09:00:00", "alice", "hello")]).await;

        let classifier = UnavailableClassifier::new("no key");
        let report = cmd_pipeline(&db, &classifier, &fast_config(), false).await.unwrap();

        assert!(!report.classifier_available);
        assert_eq!(report.transform.inserted, 1);
        assert_eq!(report.enrichment.len(), 1);
        assert!(!report.enrichment[0].available);
        assert_eq!(report.totals.promoted, 0);
        assert_eq!(db.count_enriched().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_loops_respect_iteration_cap() {
        let (db, _tmp) = setup_test_db().await;
        let rows: Vec<_> = (0..6)
            .map(|i| new_raw("2024-05-01 09:00:00", &format!("user{}", i), "ok"))
            .collect();
        load_rows(&db, &rows).await;

        let mut config = fast_config();
        config.pipeline.max_iterations = 1;
        let classifier = ScriptedClassifier::new();

        let report = cmd_pipeline(&db, &classifier, &config, false).await.unwrap();
        assert_eq!(report.enrichment.len(), 1);
        assert_eq!(report.totals.classified, 2);
        assert_eq!(report.totals.promoted, 2);
    }

    #[tokio::test]
    async fn test_concurrent_run_leaves_reserved_records_alone() {
        let (db, _tmp) = setup_test_db().await;
        for key in ["a", "b"] {
            db.insert_canonical(&new_canonical(key, key)).await.unwrap();
        }

        let slow = ScriptedClassifier::new().with_delay(Duration::from_millis(300));
        let other = ScriptedClassifier::new();
        let config = fast_config();
        let pacer = CallPacer::unpaced();

        let (enriched, pipeline) = tokio::join!(
            cmd_enrich(&db, &slow, &pacer, &config, 10),
            async {
                tokio::time::sleep(Duration::from_millis(50)).await;
                cmd_pipeline(&db, &other, &config, false).await
            }
        );

        assert_eq!(enriched.unwrap().success, 2);
        let pipeline = pipeline.unwrap();
        assert_eq!(pipeline.reset_stuck, 0);
        assert_eq!(other.classify_calls(), 0);
        assert_eq!(slow.classify_calls() + other.classify_calls(), 2);
    }

    #[tokio::test]
    async fn test_reset_stuck_requeues_on_request() {
        let (db, _tmp) = setup_test_db().await;
        let id = db.insert_canonical(&new_canonical("a", "left behind")).await.unwrap();
        db.claim_pending_primary(10).await.unwrap();

        let classifier = ScriptedClassifier::new();
        let report = cmd_pipeline(&db, &classifier, &fast_config(), false).await.unwrap();
        assert_eq!(report.totals.classified, 0);
        let record = db.get_canonical(id).await.unwrap().unwrap();
        assert_eq!(record.ai_processing_status, "processing");

        let report = cmd_pipeline(&db, &classifier, &fast_config(), true).await.unwrap();
        assert_eq!(report.reset_stuck, 1);
        assert_eq!(report.totals.classified, 1);
    }
}
