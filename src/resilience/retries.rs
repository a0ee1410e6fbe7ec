//! Retry logic.
//!
//! # Responsibilities
//! - Determine if a failed exchange is retryable
//! - Execute retries with exponential backoff + jitter
//! - Cap attempts at `max_retries + 1`
//!
//! # Design Decisions
//! - Connect, write and transport failures and pool exhaustion are
//!   retryable; timeouts are terminal
//! - Zero or negative `max_retries` disables retries
//! - Retries reuse the instance and URL chosen for the first attempt
//! - Jittered backoff prevents thundering herd

use std::future::Future;

use crate::config::RetryConfig;
use crate::error::GatewayError;
use crate::resilience::backoff::calculate_backoff;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_retries: u32,
    base_delay_ms: u64,
    max_delay_ms: u64,
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries.max(0) as u32,
            base_delay_ms: config.base_delay_ms,
            max_delay_ms: config.max_delay_ms,
        }
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Run `op` until it succeeds, fails terminally, or retries run out.
    /// `op` receives the 1-based attempt number.
    pub async fn run<T, F, Fut>(&self, mut op: F) -> Result<T, GatewayError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, GatewayError>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt <= self.max_retries => {
                    let delay = calculate_backoff(attempt, self.base_delay_ms, self.max_delay_ms);
                    tracing::info!(attempt, delay = ?delay, error = %e, "Retrying backend call");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    if attempt > 1 {
                        tracing::warn!(attempts = attempt, error = %e, "Backend call failed after retries");
                    }
                    return Err(e);
                }
            }
        }
    }
}
