//! Init command implementation

use crate::config::Config;
use crate::error::{Error, Result};
use crate::meta::MetaDb;
use std::path::Path;
use tracing::info;

/// Write a default config next to a fresh pipeline database.
///
/// An existing config is only replaced with `force`; the database schema is
/// created idempotently either way.
pub async fn cmd_init(config_path: &Path, force: bool) -> Result<Config> {
    if config_path.exists() && !force {
        return Err(Error::AlreadyInitialized(config_path.display().to_string()));
    }

    let base_dir = config_path
        .parent()
        .unwrap_or(Path::new("."))
        .to_path_buf();

    let mut config = Config::default();
    config.init_paths(Some(base_dir));
    config.paths.config_file = config_path.to_path_buf();
    config.validate()?;
    config.save()?;

    let db = MetaDb::connect(&config).await?;
    db.init_schema().await?;
    db.close().await;
    info!("Created database at {:?}", config.paths.db_file);

    Ok(config)
}

/// Print the result of `init` to console
pub fn print_init(config: &Config) {
    println!("✓ Initialized commentary at {:?}", config.paths.base_dir);
    println!("\nConfiguration: {:?}", config.paths.config_file);
    println!("Database: {:?}", config.paths.db_file);
    println!(
        "Classifier key: ${} ({})",
        config.classifier.api_key_env,
        if config.classifier.api_key().is_some() {
            "set"
        } else {
            "not set, enrichment will be skipped"
        }
    );
    println!("\nNext steps:");
    println!("  commentary load ./rows.jsonl   # Append raw rows");
    println!("  commentary run                 # Transform, enrich and promote");
    println!("  commentary status              # Inspect backlog and results");
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_init_creates_config_and_database() {
        let tmp = TempDir::new().unwrap();
        let config_path = tmp.path().join("config.toml");

        let config = cmd_init(&config_path, false).await.unwrap();
        assert!(config.is_initialized());

        let loaded = Config::load(&config_path).unwrap();
        assert_eq!(loaded.paths.db_file, tmp.path().join("pipeline.db"));

        let db = MetaDb::new(&loaded.paths.db_file).await.unwrap();
        assert!(db.is_initialized().await.unwrap());
    }

    #[tokio::test]
    async fn test_init_refuses_to_overwrite_without_force() {
        let tmp = TempDir::new().unwrap();
        let config_path = tmp.path().join("config.toml");
        cmd_init(&config_path, false).await.unwrap();

        let err = cmd_init(&config_path, false).await.unwrap_err();
        assert!(matches!(err, Error::AlreadyInitialized(_)));

        assert!(cmd_init(&config_path, true).await.is_ok());
    }
}
