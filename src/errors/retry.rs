use std::future::Future;
use std::time::Duration;

use super::classification::ErrorClassification;
use super::types::FleetError;
use tracing::warn;

/// Retry configuration for caller-side I/O (worker polling, result posting).
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Add up to one `base_delay` of random jitter to every delay.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            jitter: true,
        }
    }
}

impl ErrorClassification {
    /// Calculate the retry delay for this error classification based on the
    /// current attempt number (0-indexed).
    ///
    /// - TimeoutError: flat `base_delay`, the next attempt carries its own timeout
    /// - Default: exponential backoff `base * 2^attempt` + jitter, capped at `max_delay`
    pub fn retry_delay(&self, attempt: u32, config: &RetryConfig) -> Duration {
        let jitter = if config.jitter {
            config.base_delay.mul_f64(rand::random::<f64>())
        } else {
            Duration::ZERO
        };
        match self.error_type {
            "TimeoutError" => (config.base_delay + jitter).min(config.max_delay),
            _ => {
                let factor = 1u32 << attempt.min(20);
                config
                    .base_delay
                    .saturating_mul(factor)
                    .saturating_add(jitter)
                    .min(config.max_delay)
            }
        }
    }
}

/// Execute an async operation with retry logic.
///
/// Retries only if the error is classified as retryable and we haven't
/// exceeded max_retries.
pub async fn with_retry<F, Fut, T>(
    operation_name: &str,
    config: &RetryConfig,
    mut factory: F,
) -> Result<T, FleetError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, FleetError>>,
{
    let max_attempts = config.max_retries + 1;
    let mut attempt = 0;

    loop {
        match factory().await {
            Ok(result) => return Ok(result),
            Err(e) => {
                let classification = e.classify();

                if !classification.retryable {
                    warn!(
                        operation = operation_name,
                        error_type = classification.error_type,
                        error = %e,
                        "Non-retryable error, failing immediately"
                    );
                    return Err(e);
                }
                if attempt + 1 >= max_attempts {
                    warn!(
                        operation = operation_name,
                        attempt = attempt + 1,
                        max = max_attempts,
                        error = %e,
                        "Max retries exhausted"
                    );
                    return Err(e);
                }

                let delay = classification.retry_delay(attempt, config);
                warn!(
                    operation = operation_name,
                    attempt = attempt + 1,
                    max = max_attempts,
                    error_type = classification.error_type,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Retrying after error"
                );

                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
