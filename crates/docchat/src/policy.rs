//! Timeout and retry policy for external calls.
//!
//! Providers make exactly one attempt per call and classify the outcome
//! as a [`ServiceError`]. [`CallPolicy::call`] wraps an attempt with a
//! per-attempt timeout and retries only [`ServiceError::Retryable`]
//! failures, sleeping `base * 2^(attempt - 1)` (capped at `max_delay`)
//! between attempts. When retries run out the last error is reported as
//! [`ServiceError::Terminal`].

use std::future::Future;
use std::time::Duration;

use docchat_core::error::ServiceError;

use crate::config::PolicyConfig;

#[derive(Debug, Clone)]
pub struct CallPolicy {
    timeout: Duration,
    max_retries: u32,
    base_delay: Duration,
    max_delay: Duration,
}

impl CallPolicy {
    pub fn new(timeout: Duration, max_retries: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            timeout,
            max_retries,
            base_delay,
            max_delay,
        }
    }

    pub fn from_config(config: &PolicyConfig) -> Self {
        Self::new(
            Duration::from_secs(config.timeout_secs),
            config.max_retries,
            Duration::from_millis(config.base_delay_ms),
            Duration::from_millis(config.max_delay_ms),
        )
    }

    /// Per-attempt timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Same timeout, single attempt.
    pub fn without_retries(&self) -> Self {
        Self {
            max_retries: 0,
            ..self.clone()
        }
    }

    /// Delay before retry number `retry` (1-based).
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 1u32 << retry.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Run `attempt` under the policy. `op` names the call in logs and errors.
    pub async fn call<T, F, Fut>(&self, op: &str, mut attempt: F) -> Result<T, ServiceError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ServiceError>>,
    {
        let attempts = self.max_retries + 1;
        let mut last_err = None;

        for n in 1..=attempts {
            if n > 1 {
                let delay = self.backoff(n - 1);
                tracing::warn!(op, attempt = n, delay_ms = delay.as_millis() as u64, "retrying");
                tokio::time::sleep(delay).await;
            }

            let outcome = match tokio::time::timeout(self.timeout, attempt()).await {
                Ok(result) => result,
                Err(_) => Err(ServiceError::Retryable(format!(
                    "{} timed out after {:?}",
                    op, self.timeout
                ))),
            };

            match outcome {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() => {
                    tracing::debug!(op, attempt = n, error = %err, "attempt failed");
                    last_err = Some(err);
                }
                Err(err) => return Err(err),
            }
        }

        let last = last_err.map(|e| e.to_string()).unwrap_or_default();
        Err(ServiceError::Terminal(format!(
            "{} gave up after {} attempts: {}",
            op, attempts, last
        )))
    }
}

impl Default for CallPolicy {
    fn default() -> Self {
        Self::from_config(&PolicyConfig::default())
    }
}
