//! Text classification
//!
//! This module provides an abstraction over the external classifier with:
//! - A trait for classifier backends
//! - An OpenAI-compatible HTTP backend
//! - A stand-in used when no credentials are configured
//! - Rule-based extremeness scoring

mod http_backend;
mod noop;
pub mod retry;
pub mod rules;

pub use http_backend::*;
pub use noop::*;

use crate::config::ClassifierConfig;
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Sentiment label produced by the primary classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sentiment {
    Positive,
    Negative,
    Neutral,
}

impl Sentiment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Sentiment::Positive => "positive",
            Sentiment::Negative => "negative",
            Sentiment::Neutral => "neutral",
        }
    }

    /// Parse a label from a classifier reply; anything unrecognized is neutral
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_lowercase().as_str() {
            "positive" => Sentiment::Positive,
            "negative" => Sentiment::Negative,
            _ => Sentiment::Neutral,
        }
    }
}

impl std::fmt::Display for Sentiment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Result of one primary classification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub label: Sentiment,
    /// Always within `[0, 1]`
    pub confidence: f64,
    #[serde(default)]
    pub reasoning: Option<String>,
}

impl Classification {
    pub fn new(label: Sentiment, confidence: f64) -> Self {
        Self {
            label,
            confidence: confidence.clamp(0.0, 1.0),
            reasoning: None,
        }
    }
}

/// Trait for classifier backends
#[async_trait]
pub trait Classifier: Send + Sync {
    /// Whether calls can be made at all (credentials present)
    fn is_available(&self) -> bool;

    /// Sentiment label and confidence for a text
    async fn classify(&self, text: &str) -> Result<Classification>;

    /// Extremeness score in `[0, 1]` for an already negative text
    async fn extremeness_score(&self, text: &str) -> Result<f64>;

    /// Model identifier, for logs and status
    fn model_name(&self) -> &str;
}

/// Create a classifier based on configuration.
///
/// Without an API key the pipeline still runs; the enrichment stages report
/// the classifier as unavailable instead of failing.
pub fn create_classifier(config: &ClassifierConfig) -> Result<Box<dyn Classifier>> {
    match config.api_key() {
        Some(api_key) => {
            let classifier = HttpClassifier::new(config, api_key)?;
            info!(model = %config.model, base_url = %config.base_url, "Classifier configured");
            Ok(Box::new(classifier))
        }
        None => {
            warn!(
                env = %config.api_key_env,
                "No classifier API key set; enrichment will be skipped"
            );
            Ok(Box::new(UnavailableClassifier::new(format!(
                "environment variable {} is not set",
                config.api_key_env
            ))))
        }
    }
}
