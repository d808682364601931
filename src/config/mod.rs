//! Configuration management for commentary
//!
//! Handles loading, saving, and validating configuration from TOML files.

mod defaults;

pub use defaults::*;

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// External classifier settings
    #[serde(default)]
    pub classifier: ClassifierConfig,

    /// Stage batch sizes and pacing
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Extreme-negative scoring thresholds
    #[serde(default)]
    pub extreme: ExtremeConfig,

    /// Paths configuration (internal, not user-editable)
    #[serde(skip)]
    pub paths: PathsConfig,
}

/// Classifier configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierConfig {
    /// Base URL of the OpenAI-compatible API
    #[serde(default = "default_classifier_base_url")]
    pub base_url: String,

    /// Environment variable name for the API key
    #[serde(default = "default_classifier_api_key_env")]
    pub api_key_env: String,

    /// Chat model name
    #[serde(default = "default_classifier_model")]
    pub model: String,

    /// Sampling temperature for sentiment requests
    #[serde(default = "default_classifier_temperature")]
    pub temperature: f32,

    /// Request timeout in seconds
    #[serde(default = "default_classifier_timeout")]
    pub timeout_secs: u64,

    /// Retries for transient failures (429, 5xx, timeouts)
    #[serde(default = "default_classifier_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,

    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,
}

/// Pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "default_transform_batch_size")]
    pub transform_batch_size: usize,

    #[serde(default = "default_enrich_batch_size")]
    pub enrich_batch_size: usize,

    #[serde(default = "default_secondary_batch_size")]
    pub secondary_batch_size: usize,

    #[serde(default = "default_promote_batch_size")]
    pub promote_batch_size: usize,

    /// Minimum spacing between classifier calls (0 disables pacing)
    #[serde(default = "default_call_interval_ms")]
    pub call_interval_ms: u64,

    /// Records between store health checks during a batch
    #[serde(default = "default_health_check_every")]
    pub health_check_every: usize,

    /// Maximum iterations per stage in `commentary run`
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
}

/// Extreme-negative scoring configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtremeConfig {
    /// Rule score above which the classifier is consulted
    #[serde(default = "default_deep_check_threshold")]
    pub deep_check_threshold: f64,

    /// Final score at or above which a record is extreme
    #[serde(default = "default_extreme_cutoff")]
    pub cutoff: f64,
}

/// Internal paths configuration
#[derive(Debug, Clone, Default)]
pub struct PathsConfig {
    /// Base directory for commentary data
    pub base_dir: PathBuf,

    /// Path to config file
    pub config_file: PathBuf,

    /// Path to SQLite database
    pub db_file: PathBuf,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            base_url: default_classifier_base_url(),
            api_key_env: default_classifier_api_key_env(),
            model: default_classifier_model(),
            temperature: default_classifier_temperature(),
            timeout_secs: default_classifier_timeout(),
            max_retries: default_classifier_max_retries(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            retry_max_delay_ms: default_retry_max_delay_ms(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            transform_batch_size: default_transform_batch_size(),
            enrich_batch_size: default_enrich_batch_size(),
            secondary_batch_size: default_secondary_batch_size(),
            promote_batch_size: default_promote_batch_size(),
            call_interval_ms: default_call_interval_ms(),
            health_check_every: default_health_check_every(),
            max_iterations: default_max_iterations(),
        }
    }
}

impl Default for ExtremeConfig {
    fn default() -> Self {
        Self {
            deep_check_threshold: default_deep_check_threshold(),
            cutoff: default_extreme_cutoff(),
        }
    }
}

impl ClassifierConfig {
    /// Read the API key from the configured environment variable
    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.api_key_env)
            .ok()
            .filter(|key| !key.trim().is_empty())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl PipelineConfig {
    pub fn call_interval(&self) -> Duration {
        Duration::from_millis(self.call_interval_ms)
    }
}

impl Config {
    /// Get the default base directory for commentary (~/.commentary)
    pub fn default_base_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".commentary")
    }

    /// Get the default config file path
    pub fn default_config_path() -> PathBuf {
        Self::default_base_dir().join("config.toml")
    }

    /// Initialize paths configuration
    pub fn init_paths(&mut self, base_dir: Option<PathBuf>) {
        let base = base_dir.unwrap_or_else(Self::default_base_dir);
        self.paths = PathsConfig {
            config_file: base.join("config.toml"),
            db_file: base.join("pipeline.db"),
            base_dir: base,
        };
    }

    /// Load configuration from a specific file path
    pub fn load(config_path: &Path) -> Result<Self> {
        debug!("Loading config from {:?}", config_path);

        if !config_path.exists() {
            return Err(Error::Config(format!(
                "Config file not found: {}",
                config_path.display()
            )));
        }

        let content = std::fs::read_to_string(config_path)?;
        let mut config: Config = toml::from_str(&content)?;

        let base = config_path.parent().unwrap_or(Path::new(".")).to_path_buf();
        config.paths = PathsConfig {
            config_file: config_path.to_path_buf(),
            db_file: base.join("pipeline.db"),
            base_dir: base,
        };

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific base directory, falling back to defaults
    pub fn load_from(base_dir: Option<PathBuf>) -> Result<Self> {
        let mut config = Config::default();
        config.init_paths(base_dir);

        if config.paths.config_file.exists() {
            debug!("Loading config from {:?}", config.paths.config_file);
            let content = std::fs::read_to_string(&config.paths.config_file)?;
            let mut loaded: Config = toml::from_str(&content)?;
            loaded.paths = config.paths;
            config = loaded;
        } else {
            debug!("No config file found, using defaults");
        }

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.paths.config_file.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(&self.paths.config_file, content)?;
        info!("Saved config to {:?}", self.paths.config_file);
        Ok(())
    }

    /// Check if commentary is initialized (config and DB exist)
    pub fn is_initialized(&self) -> bool {
        self.paths.config_file.exists() && self.paths.db_file.exists()
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        let pipeline = &self.pipeline;
        for (name, value) in [
            ("pipeline.transform_batch_size", pipeline.transform_batch_size),
            ("pipeline.enrich_batch_size", pipeline.enrich_batch_size),
            ("pipeline.secondary_batch_size", pipeline.secondary_batch_size),
            ("pipeline.promote_batch_size", pipeline.promote_batch_size),
            ("pipeline.health_check_every", pipeline.health_check_every),
            ("pipeline.max_iterations", pipeline.max_iterations),
        ] {
            if value == 0 {
                return Err(Error::Config(format!("{} must be positive", name)));
            }
        }

        if self.classifier.timeout_secs == 0 {
            return Err(Error::Config(
                "classifier.timeout_secs must be positive".to_string(),
            ));
        }

        if !(0.0..=2.0).contains(&self.classifier.temperature) {
            return Err(Error::Config(
                "classifier.temperature must be between 0.0 and 2.0".to_string(),
            ));
        }

        if self.classifier.retry_base_delay_ms > self.classifier.retry_max_delay_ms {
            return Err(Error::Config(
                "classifier.retry_base_delay_ms must be <= classifier.retry_max_delay_ms"
                    .to_string(),
            ));
        }

        url::Url::parse(&self.classifier.base_url).map_err(|e| {
            Error::Config(format!(
                "classifier.base_url '{}' is not a valid URL: {}",
                self.classifier.base_url, e
            ))
        })?;

        for (name, value) in [
            ("extreme.deep_check_threshold", self.extreme.deep_check_threshold),
            ("extreme.cutoff", self.extreme.cutoff),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(Error::Config(format!(
                    "{} must be between 0.0 and 1.0",
                    name
                )));
            }
        }

        Ok(())
    }
}
