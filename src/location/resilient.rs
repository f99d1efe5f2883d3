//! Timeout and retry wrapper for provider calls.
//!
//! Every attempt is bounded by the per-provider timeout. Transient failures
//! (timeout, rate limit, 5xx, network) are retried with exponential backoff;
//! anything else returns immediately.

use super::types::ProviderError;
use crate::config::ResilienceConfig;
use std::future::Future;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempt_timeout: Duration,
    /// Extra attempts after the first.
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&ResilienceConfig::default())
    }
}

impl From<&ResilienceConfig> for RetryPolicy {
    fn from(c: &ResilienceConfig) -> Self {
        Self {
            attempt_timeout: c.provider_timeout(),
            max_retries: c.max_retries,
            initial_backoff: Duration::from_millis(c.initial_backoff_ms),
            max_backoff: Duration::from_millis(c.max_backoff_ms),
        }
    }
}

/// Run `operation` under `policy`.
///
/// # Arguments
/// * `operation_name` - Used in log fields (e.g. "nominatim", "google")
/// * `policy` - Timeout and retry limits
/// * `operation` - Produces a fresh future per attempt
pub async fn call_resilient<F, Fut, T>(
    operation_name: &str,
    policy: &RetryPolicy,
    mut operation: F,
) -> Result<T, ProviderError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    let start = Instant::now();
    let mut backoff = policy.initial_backoff;
    let mut attempt: u32 = 0;

    loop {
        attempt += 1;
        let outcome = match tokio::time::timeout(policy.attempt_timeout, operation()).await {
            Ok(result) => result,
            Err(_) => Err(ProviderError::Timeout(policy.attempt_timeout)),
        };

        let err = match outcome {
            Ok(value) => {
                if attempt > 1 {
                    tracing::debug!(
                        operation = operation_name,
                        attempt,
                        elapsed_ms = start.elapsed().as_millis() as u64,
                        "provider call succeeded after retry"
                    );
                }
                return Ok(value);
            }
            Err(err) => err,
        };

        if !err.is_transient() || attempt > policy.max_retries {
            return Err(err);
        }

        let delay = backoff.min(policy.max_backoff);
        tracing::debug!(
            operation = operation_name,
            attempt,
            backoff_ms = delay.as_millis() as u64,
            error = %err,
            "transient provider failure, retrying"
        );
        tokio::time::sleep(delay).await;
        backoff = (backoff * 2).min(policy.max_backoff);
    }
}
