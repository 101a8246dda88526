//! Bounded retry with exponential backoff, jitter and a per-attempt timeout.
//!
//! # Backoff Strategy
//!
//! The delay before retry `n` (1-based) is:
//! ```text
//! delay = min(base_delay * 2^(n-1), max_delay) + random_jitter(0..=jitter)
//! ```
//!
//! Every attempt is wrapped in `attempt_timeout`, so a hung navigation costs
//! at most `max_attempts * attempt_timeout` plus the backoff sleeps.

use crate::error::LoadError;
use rand::{Rng, rng};
use std::future::Future;
use std::time::{Duration, Instant};
use tokio::time::{sleep, timeout};
use tracing::{error, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter: Duration,
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(30),
            max_delay: Duration::from_secs(300),
            jitter: Duration::from_secs(30),
            attempt_timeout: Duration::from_secs(60),
        }
    }
}

/// Why [`RetryPolicy::run`] gave up.
#[derive(Debug)]
pub struct Exhausted {
    pub attempts: usize,
    pub last: LoadError,
}

impl RetryPolicy {
    /// Backoff before the retry that follows failed attempt `attempt` (1-based).
    pub fn delay_for(&self, attempt: usize) -> Duration {
        let shift = attempt.saturating_sub(1).min(16) as u32;
        let delay = self.base_delay.saturating_mul(1 << shift).min(self.max_delay);
        let jitter_ms = self.jitter.as_millis() as u64;
        if jitter_ms == 0 {
            return delay;
        }
        delay + Duration::from_millis(rng().random_range(0..=jitter_ms))
    }

    /// Run `op` until it succeeds, fails permanently, or the budget is spent.
    ///
    /// `op` receives the 1-based attempt number.
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T, Exhausted>
    where
        F: FnMut(usize) -> Fut,
        Fut: Future<Output = Result<T, LoadError>>,
    {
        let total_t0 = Instant::now();
        let mut attempt = 0usize;

        loop {
            attempt += 1;
            let attempt_t0 = Instant::now();
            let result = match timeout(self.attempt_timeout, op(attempt)).await {
                Ok(result) => result,
                Err(_) => Err(LoadError::Timeout(self.attempt_timeout)),
            };

            let e = match result {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };
            let attempt_dt = attempt_t0.elapsed();
            let total_dt = total_t0.elapsed();

            if attempt >= self.max_attempts || !e.is_transient() {
                error!(
                    label,
                    attempt,
                    max = self.max_attempts,
                    elapsed_ms_attempt = attempt_dt.as_millis() as u64,
                    elapsed_ms_total = total_dt.as_millis() as u64,
                    error = %e,
                    "Giving up"
                );
                return Err(Exhausted { attempts: attempt, last: e });
            }

            let delay = self.delay_for(attempt);
            warn!(
                label,
                attempt,
                max = self.max_attempts,
                elapsed_ms_attempt = attempt_dt.as_millis() as u64,
                ?delay,
                error = %e,
                "Attempt failed; backing off"
            );
            sleep(delay).await;
        }
    }
}

impl LoadError {
    /// Worth another attempt? Configuration mistakes are not.
    pub fn is_transient(&self) -> bool {
        !matches!(self, LoadError::InvalidSelector(_))
    }
}
