//! Retry with exponential backoff for LLM calls
//!
//! Only transient failures (rate limits, 5xx, timeouts, network) are
//! retried; everything else returns immediately.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use super::LLMError;
use crate::config::LLMConfig;

/// Upper bound for a single backoff sleep
const MAX_DELAY: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total attempts including the first
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles after that
    pub base_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
        }
    }
}

impl RetryConfig {
    pub fn from_config(config: &LLMConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.retry_base_delay_ms),
        }
    }

    /// `base * 2^(attempt - 1)`, capped
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(MAX_DELAY)
    }
}

/// Runs `operation` until it succeeds, fails permanently, or runs out of attempts
pub async fn with_retry<T, F, Fut>(config: &RetryConfig, mut operation: F) -> Result<T, LLMError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, LLMError>>,
{
    let mut attempt = 1;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < config.max_attempts => {
                let delay = config.delay_for(attempt);
                warn!(
                    attempt,
                    max_attempts = config.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "LLM call failed, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
