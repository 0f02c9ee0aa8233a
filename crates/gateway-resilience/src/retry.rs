//! Retry with exponential backoff.
//!
//! The delay before retry `n` (1-indexed) is `min(max_delay, base_delay * 2^n)`. With
//! jitter enabled the clamped delay is stretched by a random factor in `[1.0, 1.1)`, so
//! jitter only ever adds.

use crate::policy::{Attempt, AttemptResult};
use futures::FutureExt;
use gateway_config::ResiliencePolicyConfig;
use gateway_telemetry::MetricsSink;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Upper bound of the jitter factor added to a delay
const MAX_JITTER: f64 = 0.1;

/// Retry policy for one service
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
    use_jitter: bool,
    retryable_status_codes: Vec<u16>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&ResiliencePolicyConfig::default())
    }
}

impl RetryPolicy {
    /// Build from a resilience policy
    #[must_use]
    pub fn from_config(config: &ResiliencePolicyConfig) -> Self {
        Self {
            max_attempts: config.retry_count.max(1),
            base_delay: config.base_delay,
            max_delay: config.max_delay,
            use_jitter: config.use_jitter,
            retryable_status_codes: config.retryable_status_codes.clone(),
        }
    }

    /// Set the attempt budget (at least one)
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// Set base and maximum delay
    #[must_use]
    pub fn with_delays(mut self, base: Duration, max: Duration) -> Self {
        self.base_delay = base;
        self.max_delay = max;
        self
    }

    /// Enable or disable jitter
    #[must_use]
    pub fn with_jitter(mut self, enabled: bool) -> Self {
        self.use_jitter = enabled;
        self
    }

    /// Total attempts allowed
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Deterministic backoff before retry `retry` (1-indexed)
    #[must_use]
    pub fn backoff_delay(&self, retry: u32) -> Duration {
        2u32.checked_pow(retry)
            .and_then(|factor| self.base_delay.checked_mul(factor))
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }

    /// Backoff before retry `retry`, jittered when enabled
    #[must_use]
    pub fn delay_for(&self, retry: u32) -> Duration {
        let delay = self.backoff_delay(retry);
        if self.use_jitter {
            let factor = 1.0 + rand::thread_rng().gen_range(0.0..MAX_JITTER);
            delay.mul_f64(factor)
        } else {
            delay
        }
    }

    /// Whether the outcome warrants another attempt
    #[must_use]
    pub fn should_retry(&self, outcome: &AttemptResult) -> bool {
        match outcome {
            Ok(response) => self.retryable_status_codes.contains(&response.status),
            Err(err) => err.is_retryable(),
        }
    }
}

/// Re-run `inner` until it succeeds, fails terminally or the budget is spent.
/// The last outcome is returned as-is.
#[must_use]
pub fn with_retry(
    inner: Attempt,
    policy: Arc<RetryPolicy>,
    service: Arc<str>,
    metrics: Arc<dyn MetricsSink>,
) -> Attempt {
    Arc::new(move || {
        let inner = Arc::clone(&inner);
        let policy = Arc::clone(&policy);
        let service = Arc::clone(&service);
        let metrics = Arc::clone(&metrics);
        async move {
            let mut attempt = 1;
            loop {
                let outcome = inner().await;
                if attempt >= policy.max_attempts() || !policy.should_retry(&outcome) {
                    return outcome;
                }

                let delay = policy.delay_for(attempt);
                debug!(
                    service = %service,
                    attempt,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    status = outcome.as_ref().ok().map(|r| r.status),
                    "Retrying backend call"
                );
                metrics.record_retry(&service, attempt);
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
        .boxed()
    })
}
