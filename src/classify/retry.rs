//! Bounded exponential backoff for classifier requests

use std::time::Duration;

/// Retry state for one logical request.
///
/// Each call to [`Backoff::next_delay`] consumes one retry and returns the
/// delay to sleep before it: `base * 2^n`, capped at `max_delay`. No jitter
/// is applied, so delays are exactly reproducible.
#[derive(Debug, Clone)]
pub struct Backoff {
    attempt: u32,
    max_retries: u32,
    base_delay: Duration,
    max_delay: Duration,
}

impl Backoff {
    pub fn new(max_retries: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            attempt: 0,
            max_retries,
            base_delay,
            max_delay,
        }
    }

    /// Retries consumed so far
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Delay before the next retry, or `None` once retries are exhausted
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempt >= self.max_retries {
            return None;
        }
        let factor = 2u32.saturating_pow(self.attempt);
        let delay = self.base_delay.saturating_mul(factor).min(self.max_delay);
        self.attempt += 1;
        Some(delay)
    }
}

/// Status codes worth retrying: rate limiting and server-side failures
pub fn is_transient_status(status: reqwest::StatusCode) -> bool {
    status == reqwest::StatusCode::TOO_MANY_REQUESTS
        || status == reqwest::StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
}

/// Transport failures worth retrying
pub fn is_transient_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}
