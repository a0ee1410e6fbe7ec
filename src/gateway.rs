//! Request pipeline.
//!
//! # Data Flow
//! ```text
//! RequestContext
//!     → global filters
//!     → Router (no match → 404)
//!     → route filters
//!     → InstanceSelector (none → 503)
//!     → resilient route:  breaker permit → BackendClient → record outcome
//!                         (rejected or failed → fallback response)
//!       plain route:      BackendClient (failure → 502/503/504)
//!     → exactly one response through the context slot
//! ```
//!
//! # Design Decisions
//! - Every stage returns a value; the response is written in one place
//! - Retries run inside the breaker permit, so the breaker sees one
//!   outcome per request

use axum::response::{IntoResponse, Response};
use std::sync::Arc;
use std::time::Instant;

use crate::client::{BackendClient, ForwardRequest};
use crate::config::FilterDefinition;
use crate::error::GatewayError;
use crate::filter::{run_filters, FilterRegistry};
use crate::http::context::RequestContext;
use crate::load_balancer::gray::GrayInput;
use crate::load_balancer::{Instance, InstanceSelector};
use crate::observability::metrics;
use crate::resilience::{CircuitBreakerRegistry, FallbackRegistry};
use crate::routing::Router;

#[derive(Debug)]
pub struct Gateway {
    router: Arc<Router>,
    selector: InstanceSelector,
    filters: Arc<FilterRegistry>,
    /// Sorted by ascending order.
    global_filters: Vec<FilterDefinition>,
    breakers: Arc<CircuitBreakerRegistry>,
    fallbacks: Arc<FallbackRegistry>,
    client: BackendClient,
}

impl Gateway {
    pub fn new(
        router: Arc<Router>,
        filters: Arc<FilterRegistry>,
        mut global_filters: Vec<FilterDefinition>,
        breakers: Arc<CircuitBreakerRegistry>,
        fallbacks: Arc<FallbackRegistry>,
        client: BackendClient,
    ) -> Self {
        global_filters.sort_by_key(|f| f.order);
        Self {
            router,
            selector: InstanceSelector::new(),
            filters,
            global_filters,
            breakers,
            fallbacks,
            client,
        }
    }

    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }

    pub fn filters(&self) -> &Arc<FilterRegistry> {
        &self.filters
    }

    pub fn breakers(&self) -> &Arc<CircuitBreakerRegistry> {
        &self.breakers
    }

    pub fn fallbacks(&self) -> &Arc<FallbackRegistry> {
        &self.fallbacks
    }

    pub fn client(&self) -> &BackendClient {
        &self.client
    }

    /// Run the pipeline and write the single response for `ctx`.
    pub async fn process(&self, mut ctx: RequestContext) {
        let start = Instant::now();

        let response = match self.dispatch(&mut ctx).await {
            Ok(response) => response,
            Err(e) => {
                match e.status().as_u16() {
                    400..=499 => {
                        tracing::debug!(request_id = %ctx.request_id, path = %ctx.path(), error = %e, "Request rejected")
                    }
                    _ => {
                        tracing::warn!(request_id = %ctx.request_id, path = %ctx.path(), error = %e, "Request failed")
                    }
                }
                e.into_response()
            }
        };

        let status = response.status().as_u16();
        let route = ctx.route.as_ref().map(|r| r.id.clone()).unwrap_or_else(|| "none".to_string());
        if ctx.respond(response) {
            metrics::record_request(ctx.method.as_str(), status, &route, start);
            tracing::debug!(
                request_id = %ctx.request_id,
                route = %route,
                status,
                elapsed_ms = start.elapsed().as_millis() as u64,
                "Request completed"
            );
        }
    }

    async fn dispatch(&self, ctx: &mut RequestContext) -> Result<Response, GatewayError> {
        run_filters(&self.filters, &self.global_filters, ctx)?;

        let route = self
            .router
            .match_path(ctx.path())
            .ok_or(GatewayError::RouteNotFound)?;
        ctx.route = Some(route.clone());

        run_filters(&self.filters, &route.filters, ctx)?;

        let instance = self.selector.select(
            &route,
            &GrayInput {
                headers: &ctx.headers,
                client_ip: &ctx.client_ip,
            },
        )?;
        ctx.instance = Some(instance.clone());

        let forward = ForwardRequest::new(
            &ctx.method,
            &ctx.uri,
            &ctx.headers,
            ctx.body.clone(),
            route.mount_depth(),
            &instance,
            ctx.peer,
            &ctx.request_id,
            self.client.timeouts().response,
        )?;
        tracing::debug!(
            request_id = %ctx.request_id,
            route = %route.id,
            service = %instance.service_id,
            target = %forward.target_url(),
            "Routing request"
        );

        if route.resilient {
            Ok(self.forward_resilient(ctx, &forward, &instance).await)
        } else {
            ctx.forwarded = true;
            let upstream = self.client.forward(&forward, &instance).await?;
            Ok(upstream.into_client_response())
        }
    }

    async fn forward_resilient(
        &self,
        ctx: &mut RequestContext,
        forward: &ForwardRequest,
        instance: &Instance,
    ) -> Response {
        let service_id = instance.service_id.as_str();
        let breaker = self.breakers.get_or_create(service_id);
        let permit = match breaker.try_acquire() {
            Ok(permit) => permit,
            Err(rejection) => {
                tracing::warn!(
                    request_id = %ctx.request_id,
                    service = %service_id,
                    rejection = ?rejection,
                    "Circuit breaker rejected call"
                );
                let reason = GatewayError::BreakerOpen {
                    service_id: service_id.to_string(),
                };
                return self.fallbacks.handle(service_id, &reason.to_string());
            }
        };

        ctx.forwarded = true;
        let started = Instant::now();
        let result = self.client.forward(forward, instance).await;
        permit.record(result.is_ok(), started.elapsed());

        match result {
            Ok(upstream) => upstream.into_client_response(),
            Err(e) => {
                tracing::warn!(request_id = %ctx.request_id, service = %service_id, error = %e, "Backend call failed");
                self.fallbacks
                    .handle(service_id, &format!("Service call failed: {}", e))
            }
        }
    }
}
