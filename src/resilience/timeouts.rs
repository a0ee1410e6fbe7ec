//! Timeout enforcement.
//!
//! # Responsibilities
//! - Hold the connect, write, response and idle timeouts of backend calls
//! - Wrap a suspension point with a deadline
//!
//! # Design Decisions
//! - Uses Tokio's timeout facilities; expiry drops the wrapped future
//! - Timeout errors are distinct from other errors
//! - Timed-out requests return 504 Gateway Timeout

use std::future::Future;
use std::time::Duration;

use crate::config::TimeoutConfig;
use crate::error::GatewayError;

#[derive(Debug, Clone, Copy)]
pub struct BackendTimeouts {
    pub connect: Duration,
    pub write: Duration,
    pub response: Duration,
    pub idle: Duration,
}

impl From<&TimeoutConfig> for BackendTimeouts {
    fn from(config: &TimeoutConfig) -> Self {
        Self {
            connect: Duration::from_millis(config.connect_ms),
            write: Duration::from_millis(config.write_ms),
            response: Duration::from_millis(config.response_ms),
            idle: Duration::from_secs(config.idle_secs),
        }
    }
}

impl Default for BackendTimeouts {
    fn default() -> Self {
        Self::from(&TimeoutConfig::default())
    }
}

/// Await `future`, or fail with `on_timeout` once `limit` elapses.
pub async fn with_deadline<T, F>(
    limit: Duration,
    future: F,
    on_timeout: impl FnOnce() -> GatewayError,
) -> Result<T, GatewayError>
where
    F: Future<Output = Result<T, GatewayError>>,
{
    match tokio::time::timeout(limit, future).await {
        Ok(result) => result,
        Err(_) => Err(on_timeout()),
    }
}
