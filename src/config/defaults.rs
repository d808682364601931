//! Default values for configuration

/// Default classifier base URL (OpenAI-compatible API)
pub fn default_classifier_base_url() -> String {
    std::env::var("COMMENTARY_CLASSIFIER_URL")
        .unwrap_or_else(|_| "https://api.openai.com".to_string())
}

/// Default environment variable holding the classifier API key
pub fn default_classifier_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

/// Default chat model
pub fn default_classifier_model() -> String {
    "gpt-4".to_string()
}

/// Default sampling temperature for sentiment requests
pub fn default_classifier_temperature() -> f32 {
    0.3
}

/// Default request timeout in seconds
pub fn default_classifier_timeout() -> u64 {
    30
}

/// Default number of retries for transient classifier failures
pub fn default_classifier_max_retries() -> u32 {
    2
}

/// Default first backoff delay in milliseconds
pub fn default_retry_base_delay_ms() -> u64 {
    500
}

/// Default cap on the backoff delay in milliseconds
pub fn default_retry_max_delay_ms() -> u64 {
    8_000
}

/// Default raw rows examined per transform run
pub fn default_transform_batch_size() -> usize {
    1000
}

/// Default records claimed per enrichment run
pub fn default_enrich_batch_size() -> usize {
    50
}

/// Default records claimed per secondary run
pub fn default_secondary_batch_size() -> usize {
    50
}

/// Default records promoted per run
pub fn default_promote_batch_size() -> usize {
    500
}

/// Default minimum spacing between classifier calls
pub fn default_call_interval_ms() -> u64 {
    1000
}

/// Default number of records between store health checks
pub fn default_health_check_every() -> usize {
    10
}

/// Default cap on stage iterations in a full pipeline run
pub fn default_max_iterations() -> usize {
    20
}

/// Rule score above which the classifier is asked for an extremeness score
pub fn default_deep_check_threshold() -> f64 {
    0.3
}

/// Final score at or above which a record is flagged extreme
pub fn default_extreme_cutoff() -> f64 {
    0.6
}
