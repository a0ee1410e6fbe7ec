//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the Axum router with the catch-all gateway handler
//! - Wire up middleware (request ID, tracing)
//! - Enforce the in-flight request budget and the body size limit
//! - Hand each request to the pipeline and await its single response
//! - Serve until the shutdown signal, then drain
//!
//! # Design Decisions
//! - The pipeline runs in its own task; a panic there surfaces as a
//!   closed response slot and becomes a 500
//! - The in-flight permit lives as long as the pipeline task

use axum::{
    body::{to_bytes, Body},
    extract::{ConnectInfo, DefaultBodyLimit, State},
    http::Request,
    response::{IntoResponse, Response},
    routing::any,
    Router,
};
use http_body_util::LengthLimitError;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, Semaphore};
use tower::ServiceBuilder;
use tower_http::{
    request_id::{PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};

use crate::config::ListenerConfig;
use crate::error::GatewayError;
use crate::gateway::Gateway;
use crate::http::context::{RequestContext, ResponseSlot};
use crate::http::request::{request_id, UuidRequestId};

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<Gateway>,
    pub in_flight: Arc<Semaphore>,
    pub max_content_length: usize,
}

/// HTTP server for the gateway.
pub struct HttpServer {
    router: Router,
}

impl HttpServer {
    pub fn new(gateway: Arc<Gateway>, config: &ListenerConfig) -> Self {
        let state = AppState {
            gateway,
            in_flight: Arc::new(Semaphore::new(config.max_in_flight)),
            max_content_length: config.max_content_length,
        };
        Self {
            router: build_router(state),
        }
    }

    /// Run the server, accepting connections until `shutdown` fires.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("HTTP server draining connections");
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

/// Build the Axum router with all middleware layers.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/{*path}", any(gateway_handler))
        .route("/", any(gateway_handler))
        .with_state(state)
        .layer(DefaultBodyLimit::disable())
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(UuidRequestId))
                .layer(TraceLayer::new_for_http())
                .layer(PropagateRequestIdLayer::x_request_id()),
        )
}

async fn gateway_handler(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    request: Request<Body>,
) -> Response {
    let Ok(permit) = state.in_flight.clone().try_acquire_owned() else {
        tracing::warn!(peer = %peer, "In-flight budget exhausted");
        return GatewayError::Busy.into_response();
    };

    let (parts, body) = request.into_parts();
    let body = match to_bytes(body, state.max_content_length).await {
        Ok(body) => body,
        Err(e) if exceeds_limit(&e) => {
            tracing::debug!(peer = %peer, limit = state.max_content_length, "Request body too large");
            return GatewayError::PayloadTooLarge.into_response();
        }
        Err(e) => {
            return GatewayError::Unexpected(format!("failed to read request body: {}", e)).into_response();
        }
    };

    let request_id = request_id(&parts.headers);
    let (slot, response) = ResponseSlot::new();
    let ctx = RequestContext::new(
        request_id.clone(),
        parts.method,
        parts.uri,
        parts.headers,
        body,
        peer,
        slot,
    );

    let gateway = state.gateway.clone();
    let task = tokio::spawn(async move {
        let _permit = permit;
        gateway.process(ctx).await;
    });

    match response.await {
        Ok(response) => response,
        Err(_) => {
            let reason = match task.await {
                Err(e) if e.is_panic() => "request pipeline panicked".to_string(),
                Err(e) => e.to_string(),
                Ok(()) => "no response produced".to_string(),
            };
            tracing::error!(request_id = %request_id, reason = %reason, "Request ended without a response");
            GatewayError::Unexpected(reason).into_response()
        }
    }
}

fn exceeds_limit(error: &axum::Error) -> bool {
    let mut current: Option<&(dyn std::error::Error + 'static)> = Some(error);
    while let Some(e) = current {
        if e.is::<LengthLimitError>() {
            return true;
        }
        current = e.source();
    }
    false
}
