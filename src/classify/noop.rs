//! Classifier used when no credentials are configured

use super::{Classification, Classifier};
use crate::error::{Error, Result};
use async_trait::async_trait;

/// Stand-in classifier used when no credentials are configured
pub struct UnavailableClassifier {
    reason: String,
}

impl UnavailableClassifier {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }
}

#[async_trait]
impl Classifier for UnavailableClassifier {
    fn is_available(&self) -> bool {
        false
    }

    async fn classify(&self, _text: &str) -> Result<Classification> {
        Err(Error::ClassifierUnavailable(self.reason.clone()))
    }

    async fn extremeness_score(&self, _text: &str) -> Result<f64> {
        Err(Error::ClassifierUnavailable(self.reason.clone()))
    }

    fn model_name(&self) -> &str {
        "unavailable"
    }
}
