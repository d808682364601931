//! Pacing for classifier calls

use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use nonzero_ext::nonzero;
use std::time::Duration;
use tracing::trace;

/// Spaces classifier calls at least `interval` apart.
///
/// The first call goes through immediately. A zero interval disables pacing.
pub struct CallPacer {
    limiter: Option<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>,
    interval: Duration,
}

impl CallPacer {
    pub fn new(interval: Duration) -> Self {
        let limiter = Quota::with_period(interval)
            .map(|quota| RateLimiter::direct(quota.allow_burst(nonzero!(1u32))));
        Self { limiter, interval }
    }

    pub fn unpaced() -> Self {
        Self::new(Duration::ZERO)
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Wait until the next call is allowed
    pub async fn wait(&self) {
        if let Some(limiter) = &self.limiter {
            trace!(interval_ms = self.interval.as_millis() as u64, "Pacing classifier call");
            limiter.until_ready().await;
        }
    }
}
