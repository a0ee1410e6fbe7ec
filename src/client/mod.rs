//! Backend HTTP client.
//!
//! # Responsibilities
//! - Forward one prepared request to one instance over a pooled connection
//! - Enforce write, response and idle deadlines per attempt
//! - Retry retryable failures on the same instance
//!
//! # Data Flow
//! ```text
//! ForwardRequest + Instance
//!     → RetryPolicy::run
//!         → pool.rs acquire (connect timeout, pool bounds)
//!         → send request; body.rs signals end of write (write timeout)
//!         → response head (response deadline)
//!         → body frames (idle timeout between frames, response deadline)
//!     → UpstreamResponse, or a classified GatewayError
//! ```
//!
//! # Design Decisions
//! - The response deadline starts when the request is handed to the
//!   connection and covers the full body
//! - A send error before the body is written is a write failure; after,
//!   a transport failure
//! - Connections only go back to the pool after a clean exchange
//! - Response bodies are aggregated up to a byte limit; a larger body fails
//!   the exchange and closes the connection

pub mod body;
pub mod pool;
pub mod target;

use axum::http::header;
use http_body_util::BodyExt;
use std::sync::Arc;
use tokio::time::{sleep, sleep_until, Instant};

use crate::config::{ListenerConfig, PoolConfig, RetryConfig, TimeoutConfig};
use crate::error::GatewayError;
use crate::http::response::UpstreamResponse;
use crate::load_balancer::Instance;
use crate::observability::metrics;
use crate::resilience::{BackendTimeouts, RetryPolicy};

pub use pool::{ConnectionPool, PoolRegistry, PoolSettings, PooledConnection};
pub use target::ForwardRequest;

#[derive(Debug)]
pub struct BackendClient {
    pools: Arc<PoolRegistry>,
    timeouts: BackendTimeouts,
    retry: RetryPolicy,
    max_response_length: usize,
}

impl BackendClient {
    pub fn new(pools: Arc<PoolRegistry>, timeouts: BackendTimeouts, retry: RetryPolicy) -> Self {
        Self {
            pools,
            timeouts,
            retry,
            max_response_length: ListenerConfig::default().max_content_length,
        }
    }

    /// Cap on the aggregated backend response body.
    pub fn with_max_response_length(mut self, limit: usize) -> Self {
        self.max_response_length = limit;
        self
    }

    pub fn from_config(timeouts: &TimeoutConfig, pool: &PoolConfig, retries: &RetryConfig) -> Self {
        let timeouts = BackendTimeouts::from(timeouts);
        let pools = Arc::new(PoolRegistry::new(PoolSettings::new(pool, &timeouts)));
        Self::new(pools, timeouts, RetryPolicy::from_config(retries))
    }

    pub fn pools(&self) -> &Arc<PoolRegistry> {
        &self.pools
    }

    pub fn timeouts(&self) -> &BackendTimeouts {
        &self.timeouts
    }

    /// Forward `request` to `instance`, retrying retryable failures.
    pub async fn forward(
        &self,
        request: &ForwardRequest,
        instance: &Instance,
    ) -> Result<UpstreamResponse, GatewayError> {
        let pool = self.pools.get_or_create(&instance.host, instance.port);
        self.retry
            .run(|attempt| {
                let pool = pool.clone();
                async move {
                    tracing::debug!(attempt, target = %request.target_url(), "Forwarding to backend");
                    metrics::record_backend_attempt(pool.authority());
                    self.exchange(&pool, request).await
                }
            })
            .await
    }

    async fn exchange(
        &self,
        pool: &Arc<ConnectionPool>,
        request: &ForwardRequest,
    ) -> Result<UpstreamResponse, GatewayError> {
        let mut conn = pool.acquire().await?;
        let (outbound, mut written) = request.build()?;
        let addr = pool.authority().to_string();
        let response_deadline = Instant::now() + self.timeouts.response;

        let sender = conn
            .sender_mut()
            .ok_or_else(|| GatewayError::Unexpected("pooled connection without sender".to_string()))?;

        let response = {
            let send = sender.send_request(outbound);
            tokio::pin!(send);
            let write_timer = sleep(self.timeouts.write);
            tokio::pin!(write_timer);
            let mut write_done = false;
            // Cleared once the body reports back, written or dropped unsent.
            let mut watch_write = true;

            loop {
                tokio::select! {
                    result = &mut send => {
                        break result.map_err(|e| {
                            let reason = e.to_string();
                            if write_done {
                                GatewayError::TransportFailure { addr: addr.clone(), reason }
                            } else {
                                GatewayError::WriteFailure { addr: addr.clone(), reason }
                            }
                        })?;
                    }
                    signal = &mut written, if watch_write => {
                        watch_write = false;
                        write_done = signal.is_ok();
                    }
                    _ = &mut write_timer, if watch_write => {
                        return Err(GatewayError::WriteTimeout(self.timeouts.write));
                    }
                    _ = sleep_until(response_deadline) => {
                        return Err(GatewayError::ResponseTimeout(self.timeouts.response));
                    }
                }
            }
        };

        let (parts, mut incoming) = response.into_parts();
        let too_large = || GatewayError::UpstreamTooLarge {
            addr: addr.clone(),
            limit: self.max_response_length,
        };
        let declared = parts
            .headers
            .get(header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<usize>().ok());
        if declared.is_some_and(|len| len > self.max_response_length) {
            return Err(too_large());
        }

        let mut collected = Vec::with_capacity(declared.unwrap_or(0));
        loop {
            let frame = tokio::select! {
                frame = incoming.frame() => frame,
                _ = sleep(self.timeouts.idle) => {
                    return Err(GatewayError::IdleTimeout(self.timeouts.idle));
                }
                _ = sleep_until(response_deadline) => {
                    return Err(GatewayError::ResponseTimeout(self.timeouts.response));
                }
            };
            match frame {
                None => break,
                Some(Ok(frame)) => {
                    if let Ok(data) = frame.into_data() {
                        if collected.len() + data.len() > self.max_response_length {
                            return Err(too_large());
                        }
                        collected.extend_from_slice(&data);
                    }
                }
                Some(Err(e)) => {
                    return Err(GatewayError::TransportFailure {
                        addr: addr.clone(),
                        reason: e.to_string(),
                    })
                }
            }
        }

        let closing = parts
            .headers
            .get(header::CONNECTION)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.eq_ignore_ascii_case("close"));
        if !closing {
            conn.release();
        }

        Ok(UpstreamResponse {
            status: parts.status,
            headers: parts.headers,
            body: collected.into(),
        })
    }
}
