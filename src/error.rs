//! Gateway error taxonomy.
//!
//! Every failure a request can hit on its way through the pipeline is one
//! variant of [`GatewayError`]. The variant decides the HTTP status of the
//! direct response and whether the backend client may retry it.
//!
//! # Design Decisions
//! - Errors are values: filters, routing and the breaker return them instead
//!   of unwinding through the pipeline
//! - `BreakerOpen` never reaches the client directly; the gateway hands it to
//!   the fallback registry
//! - Timeouts are terminal and never retried

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use std::time::Duration;

use crate::http::response::text_response;

/// Errors produced while processing a single request.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("{message}")]
    FilterRejected { status: StatusCode, message: String },

    #[error("No route found")]
    RouteNotFound,

    #[error("No available instance")]
    NoInstanceAvailable,

    #[error("connect to {addr} failed: {reason}")]
    ConnectFailure { addr: String, reason: String },

    #[error("write to {addr} failed: {reason}")]
    WriteFailure { addr: String, reason: String },

    #[error("exchange with {addr} failed: {reason}")]
    TransportFailure { addr: String, reason: String },

    #[error("response from {addr} exceeds {limit} bytes")]
    UpstreamTooLarge { addr: String, limit: usize },

    #[error("connection pool for {addr} exhausted")]
    PoolExhausted { addr: String },

    #[error("Upstream response timeout")]
    ResponseTimeout(Duration),

    #[error("Upstream write timeout")]
    WriteTimeout(Duration),

    #[error("Upstream idle timeout")]
    IdleTimeout(Duration),

    #[error("Call not permitted by circuit breaker")]
    BreakerOpen { service_id: String },

    #[error("Payload too large")]
    PayloadTooLarge,

    #[error("Service busy")]
    Busy,

    #[error("{0}")]
    Unexpected(String),
}

impl GatewayError {
    /// Status used when the error is written directly to the client.
    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::FilterRejected { status, .. } => *status,
            GatewayError::RouteNotFound => StatusCode::NOT_FOUND,
            GatewayError::NoInstanceAvailable
            | GatewayError::PoolExhausted { .. }
            | GatewayError::BreakerOpen { .. }
            | GatewayError::Busy => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::ConnectFailure { .. }
            | GatewayError::WriteFailure { .. }
            | GatewayError::TransportFailure { .. }
            | GatewayError::UpstreamTooLarge { .. } => StatusCode::BAD_GATEWAY,
            GatewayError::ResponseTimeout(_)
            | GatewayError::WriteTimeout(_)
            | GatewayError::IdleTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            GatewayError::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            GatewayError::Unexpected(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether the backend client may attempt the exchange again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GatewayError::ConnectFailure { .. }
                | GatewayError::WriteFailure { .. }
                | GatewayError::TransportFailure { .. }
                | GatewayError::PoolExhausted { .. }
        )
    }

    /// Body text of the direct response.
    pub fn client_message(&self) -> String {
        match self {
            GatewayError::ConnectFailure { .. }
            | GatewayError::WriteFailure { .. }
            | GatewayError::TransportFailure { .. }
            | GatewayError::UpstreamTooLarge { .. } => "Bad gateway".to_string(),
            GatewayError::PoolExhausted { .. } => "Service busy".to_string(),
            GatewayError::Unexpected(reason) => format!("Gateway error: {}", reason),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        text_response(self.status(), self.client_message())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(GatewayError::RouteNotFound.status(), StatusCode::NOT_FOUND);
        assert_eq!(GatewayError::NoInstanceAvailable.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            GatewayError::ConnectFailure { addr: "h:1".into(), reason: "refused".into() }.status(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            GatewayError::ResponseTimeout(Duration::from_secs(1)).status(),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            GatewayError::Unexpected("boom".into()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        let rejected = GatewayError::FilterRejected {
            status: StatusCode::TOO_MANY_REQUESTS,
            message: "Too many requests".into(),
        };
        assert_eq!(rejected.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(rejected.client_message(), "Too many requests");
    }

    #[test]
    fn test_timeouts_are_not_retryable() {
        assert!(!GatewayError::ResponseTimeout(Duration::from_secs(1)).is_retryable());
        assert!(!GatewayError::WriteTimeout(Duration::from_secs(1)).is_retryable());
        assert!(GatewayError::WriteFailure { addr: "h:1".into(), reason: "reset".into() }.is_retryable());
        assert!(GatewayError::PoolExhausted { addr: "h:1".into() }.is_retryable());
    }

    #[test]
    fn test_oversized_upstream_response_is_terminal_502() {
        let err = GatewayError::UpstreamTooLarge { addr: "h:1".into(), limit: 16 };
        assert_eq!(err.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(err.client_message(), "Bad gateway");
        assert!(!err.is_retryable());
    }
}
