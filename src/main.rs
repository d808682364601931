//! commentary CLI entry point

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};
use commentary::{
    classify::create_classifier,
    commands::{
        cmd_enrich, cmd_init, cmd_load_raw, cmd_pipeline, cmd_promote, cmd_reset, cmd_reset_raw,
        cmd_retry, cmd_secondary, cmd_status, cmd_transform, print_enrichment_report, print_init,
        print_pipeline_report, print_promotion_report, print_reset_counts,
        print_secondary_report, print_status, print_transform_report, RetryStage,
    },
    config::Config,
    error::{Error, Result},
    meta::MetaDb,
    progress::LogWriterFactory,
    rate_limit::CallPacer,
};
use serde::Serialize;
use std::path::PathBuf;
use tracing::error;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "commentary")]
#[command(version, about = "Deduplicate social comments and enrich them with sentiment labels", long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, env = "COMMENTARY_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize commentary configuration and database
    Init {
        /// Force overwrite existing config
        #[arg(long)]
        force: bool,
    },

    /// Append raw rows from a JSON Lines file
    Load {
        /// Path to a .jsonl file, one raw row per line
        path: PathBuf,
    },

    /// Clean, validate and deduplicate unprocessed raw rows
    Transform {
        /// Maximum raw rows to read (defaults to config)
        #[arg(long)]
        batch_size: Option<usize>,
    },

    /// Classify pending canonical records
    Enrich {
        /// Maximum records to claim (defaults to config)
        #[arg(long)]
        batch_size: Option<usize>,
    },

    /// Score negative records for extremeness
    Secondary {
        /// Maximum records to claim (defaults to config)
        #[arg(long)]
        batch_size: Option<usize>,
    },

    /// Copy fully classified records into the enriched table
    Promote {
        /// Maximum records to promote (defaults to config)
        #[arg(long)]
        batch_size: Option<usize>,
    },

    /// Run every stage until each runs dry
    Run {
        /// Requeue records left in processing first (only when no other run is active)
        #[arg(long)]
        reset_stuck: bool,
    },

    /// Show backlog, distributions and recent runs
    Status,

    /// Move stuck (processing) and failed records back to pending
    Reset,

    /// Requeue failed records of one stage and process them again
    Retry {
        /// Stage to retry
        #[arg(value_enum)]
        stage: RetryStage,

        /// Maximum records to requeue
        #[arg(short, long, default_value = "50")]
        limit: usize,
    },

    /// Mark raw rows unprocessed so the next transform reads them again
    ResetRaw {
        /// Only re-open rows from this upload batch
        #[arg(long)]
        upload_batch: Option<String>,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("{}", e);
        std::process::exit(1);
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(LogWriterFactory::default()))
        .with(filter)
        .init();

    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(Config::default_config_path);

    match cli.command {
        Commands::Init { force } => {
            let config = cmd_init(&config_path, force).await?;
            if cli.json {
                print_json(&config)?;
            } else {
                print_init(&config);
            }
            return Ok(());
        }
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            generate(shell, &mut cmd, "commentary", &mut std::io::stdout());
            return Ok(());
        }
        _ => {}
    }

    if !config_path.exists() {
        return Err(Error::NotInitialized);
    }
    let config = Config::load(&config_path)?;

    let db = MetaDb::new(&config.paths.db_file).await?;
    let pipeline = &config.pipeline;

    match cli.command {
        Commands::Init { .. } | Commands::Completions { .. } => unreachable!(),

        Commands::Load { path } => {
            let report = cmd_load_raw(&db, &path).await?;
            if cli.json {
                print_json(&report)?;
            } else {
                println!("✓ Loaded {} raw rows from {}", report.loaded, report.path);
            }
        }

        Commands::Transform { batch_size } => {
            let batch_size = batch_size.unwrap_or(pipeline.transform_batch_size);
            let report = cmd_transform(&db, batch_size).await?;
            if cli.json {
                print_json(&report)?;
            } else {
                print_transform_report(&report);
            }
        }

        Commands::Enrich { batch_size } => {
            let classifier = create_classifier(&config.classifier)?;
            let pacer = CallPacer::new(pipeline.call_interval());
            let batch_size = batch_size.unwrap_or(pipeline.enrich_batch_size);
            let report =
                cmd_enrich(&db, classifier.as_ref(), &pacer, &config, batch_size).await?;
            if cli.json {
                print_json(&report)?;
            } else {
                print_enrichment_report(&report);
            }
        }

        Commands::Secondary { batch_size } => {
            let classifier = create_classifier(&config.classifier)?;
            let pacer = CallPacer::new(pipeline.call_interval());
            let batch_size = batch_size.unwrap_or(pipeline.secondary_batch_size);
            let report =
                cmd_secondary(&db, classifier.as_ref(), &pacer, &config, batch_size).await?;
            if cli.json {
                print_json(&report)?;
            } else {
                print_secondary_report(&report);
            }
        }

        Commands::Promote { batch_size } => {
            let batch_size = batch_size.unwrap_or(pipeline.promote_batch_size);
            let report = cmd_promote(&db, batch_size).await?;
            if cli.json {
                print_json(&report)?;
            } else {
                print_promotion_report(&report);
            }
        }

        Commands::Run { reset_stuck } => {
            let classifier = create_classifier(&config.classifier)?;
            let report = cmd_pipeline(&db, classifier.as_ref(), &config, reset_stuck).await?;
            if cli.json {
                print_json(&report)?;
            } else {
                print_pipeline_report(&report);
            }
        }

        Commands::Status => {
            let classifier = create_classifier(&config.classifier)?;
            let status = cmd_status(&config, &db, classifier.as_ref()).await?;
            if cli.json {
                print_json(&status)?;
            } else {
                print_status(&status);
            }
        }

        Commands::Reset => {
            let counts = cmd_reset(&db).await?;
            if cli.json {
                print_json(&counts)?;
            } else {
                print_reset_counts(&counts);
            }
        }

        Commands::Retry { stage, limit } => {
            let classifier = create_classifier(&config.classifier)?;
            let report = cmd_retry(&db, classifier.as_ref(), &config, stage, limit).await?;
            if cli.json {
                print_json(&report)?;
            } else {
                println!("✓ Requeued {} failed records", report.requeued);
                if let Some(enrichment) = &report.enrichment {
                    print_enrichment_report(enrichment);
                }
                if let Some(secondary) = &report.secondary {
                    print_secondary_report(secondary);
                }
            }
        }

        Commands::ResetRaw { upload_batch } => {
            let reopened = cmd_reset_raw(&db, upload_batch.as_deref()).await?;
            if cli.json {
                println!(r#"{{"reopened": {}}}"#, reopened);
            } else {
                println!("✓ Re-opened {} raw rows", reopened);
            }
        }
    }

    db.close().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_config_path_reads_environment() {
        let cmd = Cli::command();
        let config = cmd
            .get_arguments()
            .find(|arg| arg.get_id() == "config")
            .unwrap();
        assert_eq!(
            config.get_env(),
            Some(std::ffi::OsStr::new("COMMENTARY_CONFIG"))
        );
    }

    #[test]
    fn test_run_does_not_reset_stuck_by_default() {
        let cli = Cli::try_parse_from(["commentary", "run"]).unwrap();
        assert!(matches!(cli.command, Commands::Run { reset_stuck: false }));

        let cli = Cli::try_parse_from(["commentary", "run", "--reset-stuck"]).unwrap();
        assert!(matches!(cli.command, Commands::Run { reset_stuck: true }));
    }
}
