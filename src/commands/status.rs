//! Status command implementation

use crate::classify::Classifier;
use crate::config::Config;
use crate::error::Result;
use crate::meta::{MetaDb, PipelineRun, ValueCount};
use serde::{Deserialize, Serialize};
use tracing::info;

const RECENT_RUNS: usize = 10;

/// Snapshot of every stage's backlog and results
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineStatus {
    pub config_path: String,
    pub db_path: String,
    pub classifier_available: bool,
    pub classifier_model: String,
    pub raw_total: i64,
    pub raw_unprocessed: i64,
    pub canonical_total: i64,
    pub primary_status: Vec<ValueCount>,
    pub secondary_status: Vec<ValueCount>,
    pub enriched_total: i64,
    pub awaiting_promotion: i64,
    pub sentiment_distribution: Vec<ValueCount>,
    pub extreme_distribution: Vec<ValueCount>,
    pub recent_runs: Vec<PipelineRun>,
}

/// Get pipeline status
pub async fn cmd_status(
    config: &Config,
    db: &MetaDb,
    classifier: &dyn Classifier,
) -> Result<PipelineStatus> {
    info!("Getting status");

    Ok(PipelineStatus {
        config_path: config.paths.config_file.display().to_string(),
        db_path: config.paths.db_file.display().to_string(),
        classifier_available: classifier.is_available(),
        classifier_model: classifier.model_name().to_string(),
        raw_total: db.count_raw().await?,
        raw_unprocessed: db.count_unprocessed_raw().await?,
        canonical_total: db.count_canonical().await?,
        primary_status: db.primary_status_counts().await?,
        secondary_status: db.secondary_status_counts().await?,
        enriched_total: db.count_enriched().await?,
        awaiting_promotion: db.count_pending_promotion().await?,
        sentiment_distribution: db.sentiment_distribution().await?,
        extreme_distribution: db.extreme_distribution().await?,
        recent_runs: db.recent_runs(RECENT_RUNS).await?,
    })
}

fn print_counts(title: &str, counts: &[ValueCount]) {
    println!("\n{}:", title);
    if counts.is_empty() {
        println!("  (none)");
        return;
    }
    for entry in counts {
        println!(
            "  {}: {}",
            entry.value.as_deref().unwrap_or("(unset)"),
            entry.count
        );
    }
}

/// Print status to console
pub fn print_status(status: &PipelineStatus) {
    println!("\n📊 commentary Status\n");
    println!("Configuration: {}", status.config_path);
    println!("Database: {}", status.db_path);

    let classifier = if status.classifier_available {
        format!("✓ {}", status.classifier_model)
    } else {
        "✗ Unavailable (API key not set)".to_string()
    };
    println!("Classifier: {}", classifier);

    println!("\nRecords:");
    println!(
        "  Raw: {} ({} unprocessed)",
        status.raw_total, status.raw_unprocessed
    );
    println!("  Canonical: {}", status.canonical_total);
    println!(
        "  Enriched: {} ({} awaiting promotion)",
        status.enriched_total, status.awaiting_promotion
    );

    print_counts("Sentiment status", &status.primary_status);
    print_counts("Extreme-negative status", &status.secondary_status);
    print_counts("Sentiment distribution", &status.sentiment_distribution);
    print_counts("Negative records by extremeness", &status.extreme_distribution);

    println!("\nRecent runs:");
    if status.recent_runs.is_empty() {
        println!("  No runs yet. Use 'commentary run' to start the pipeline.");
        return;
    }
    for run in &status.recent_runs {
        println!(
            "  • {} {} [{}] {} ok / {} failed{}",
            run.started_at,
            run.stage,
            run.status,
            run.success_records,
            run.failed_records,
            run.error_message
                .as_deref()
                .map(|m| format!(" ({})", m))
                .unwrap_or_default()
        );
    }
}
