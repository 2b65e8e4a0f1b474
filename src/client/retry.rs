//! Retry with exponential backoff and bounded jitter

use crate::error::ClientError;
use rand::Rng;
use std::time::Duration;

/// Jitter adds at most this fraction of the capped delay
pub const JITTER_FRACTION: f64 = 0.1;

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    pub base_delay: Duration,
    pub backoff_factor: f64,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(1_000),
            backoff_factor: 2.0,
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    pub fn no_retries() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// `base_delay * backoff_factor^attempt`, capped at `max_delay`
    pub fn base_backoff(&self, attempt: u32) -> Duration {
        let exp = self.backoff_factor.powi(attempt.min(i32::MAX as u32) as i32);
        let millis = self.base_delay.as_millis() as f64 * exp;
        let capped = millis.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped.max(0.0) as u64)
    }

    /// Backoff plus jitter drawn from `[0, JITTER_FRACTION * backoff]`
    pub fn delay_for(&self, attempt: u32, rng: &mut impl Rng) -> Duration {
        let base = self.base_backoff(attempt);
        let jitter_ceiling = base.as_millis() as f64 * JITTER_FRACTION;
        let jitter = if jitter_ceiling > 0.0 {
            rng.gen_range(0.0..=jitter_ceiling)
        } else {
            0.0
        };
        base + Duration::from_millis(jitter as u64)
    }

    /// Delay before the next attempt, or `None` when the error must surface now
    pub fn next_delay(&self, attempt: u32, error: &ClientError) -> Option<Duration> {
        if !error.is_retryable() || attempt >= self.max_retries {
            return None;
        }

        let delay = self.delay_for(attempt, &mut rand::thread_rng());
        match error {
            ClientError::RateLimited {
                retry_after: Some(hint),
            } => Some(delay.max((*hint).min(self.max_delay))),
            _ => Some(delay),
        }
    }
}
