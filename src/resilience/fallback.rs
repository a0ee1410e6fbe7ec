//! Fallback responses for failed or rejected backend calls.
//!
//! # Responsibilities
//! - Map a service id to a degraded-response handler
//! - Provide the default "service unavailable" response
//! - Allow handlers to be registered and removed at runtime

use axum::body::Body;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::Response;
use dashmap::DashMap;
use std::sync::Arc;

use crate::config::FallbackConfig;
use crate::http::response::text_response;

/// Produces the degraded response for one service.
pub trait FallbackHandler: Send + Sync + std::fmt::Debug {
    fn handle(&self, service_id: &str, reason: &str) -> Response;
}

/// 503 with the failure reason.
#[derive(Debug, Default)]
pub struct DefaultFallback;

impl FallbackHandler for DefaultFallback {
    fn handle(&self, _service_id: &str, reason: &str) -> Response {
        text_response(
            StatusCode::SERVICE_UNAVAILABLE,
            format!("Service temporarily unavailable: {}", reason),
        )
    }
}

/// Fixed payload, e.g. an empty list or a cached document.
#[derive(Debug, Clone)]
pub struct StaticFallback {
    status: StatusCode,
    body: String,
    content_type: HeaderValue,
}

impl StaticFallback {
    pub fn new(status: StatusCode, body: impl Into<String>, content_type: &str) -> Self {
        Self {
            status,
            body: body.into(),
            content_type: HeaderValue::from_str(content_type)
                .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
        }
    }

    pub fn from_config(config: &FallbackConfig) -> Self {
        let status = StatusCode::from_u16(config.status).unwrap_or(StatusCode::OK);
        Self::new(status, config.body.clone(), &config.content_type)
    }
}

impl FallbackHandler for StaticFallback {
    fn handle(&self, _service_id: &str, _reason: &str) -> Response {
        let mut response = Response::new(Body::from(self.body.clone()));
        *response.status_mut() = self.status;
        response
            .headers_mut()
            .insert(header::CONTENT_TYPE, self.content_type.clone());
        response
    }
}

/// Service id → fallback handler.
#[derive(Debug)]
pub struct FallbackRegistry {
    handlers: DashMap<String, Arc<dyn FallbackHandler>>,
    default: Arc<dyn FallbackHandler>,
}

impl Default for FallbackRegistry {
    fn default() -> Self {
        Self::new(Arc::new(DefaultFallback))
    }
}

impl FallbackRegistry {
    pub fn new(default: Arc<dyn FallbackHandler>) -> Self {
        Self {
            handlers: DashMap::new(),
            default,
        }
    }

    pub fn from_config(configs: &[FallbackConfig]) -> Self {
        let registry = Self::default();
        for config in configs {
            registry.register(&config.service_id, Arc::new(StaticFallback::from_config(config)));
        }
        registry
    }

    pub fn register(&self, service_id: &str, handler: Arc<dyn FallbackHandler>) {
        tracing::info!(service = %service_id, "Fallback registered");
        self.handlers.insert(service_id.to_string(), handler);
    }

    pub fn remove(&self, service_id: &str) -> bool {
        self.handlers.remove(service_id).is_some()
    }

    /// Produce the fallback response for `service_id`.
    pub fn handle(&self, service_id: &str, reason: &str) -> Response {
        let handler = self
            .handlers
            .get(service_id)
            .map(|h| h.clone())
            .unwrap_or_else(|| self.default.clone());
        tracing::info!(service = %service_id, reason = %reason, "Serving fallback");
        handler.handle(service_id, reason)
    }
}
