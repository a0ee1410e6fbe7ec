//! Startup orchestration.
//!
//! # Responsibilities
//! - Validate configuration against the registered filters
//! - Build all components in dependency order and wire them together
//! - Start background tasks (health checks, pool sweeper, metrics)
//! - Bind the listener and begin accepting traffic
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Components are constructed explicitly; nothing is looked up at runtime
//! - Listener binds last (traffic only when ready)

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use crate::client::BackendClient;
use crate::config::validation::validate_config_with_filters;
use crate::config::{ConfigError, GatewayConfig};
use crate::filter::FilterRegistry;
use crate::gateway::Gateway;
use crate::health::HealthMonitor;
use crate::http::HttpServer;
use crate::lifecycle::Shutdown;
use crate::load_balancer::instance::InstanceError;
use crate::observability::metrics;
use crate::resilience::{BreakerSettings, CircuitBreakerRegistry, FallbackRegistry};
use crate::routing::Router;

#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Invalid route: {0}")]
    Route(#[from] InstanceError),

    #[error("Failed to bind {addr}: {source}")]
    Bind { addr: String, source: io::Error },

    #[error("Server error: {0}")]
    Server(#[source] io::Error),
}

/// Build the gateway with the built-in filters.
pub fn build_gateway(config: &GatewayConfig) -> Result<Arc<Gateway>, StartupError> {
    build_gateway_with_filters(config, FilterRegistry::with_builtins())
}

/// Build the gateway, resolving filter names against `filters`.
pub fn build_gateway_with_filters(
    config: &GatewayConfig,
    filters: FilterRegistry,
) -> Result<Arc<Gateway>, StartupError> {
    let names = filters.names();
    let known: Vec<&str> = names.iter().map(String::as_str).collect();
    validate_config_with_filters(config, &known).map_err(ConfigError::Validation)?;

    let router = Arc::new(Router::from_config(&config.routes, config.resilience.enabled)?);
    let breakers = Arc::new(CircuitBreakerRegistry::new(BreakerSettings::from(&config.resilience)));
    let fallbacks = Arc::new(FallbackRegistry::from_config(&config.fallbacks));
    let client = BackendClient::from_config(&config.timeouts, &config.pool, &config.retries)
        .with_max_response_length(config.listener.max_content_length);

    tracing::info!(
        routes = config.routes.len(),
        global_filters = config.filters.len(),
        fallbacks = config.fallbacks.len(),
        max_retries = config.retries.max_retries,
        "Gateway components built"
    );

    Ok(Arc::new(Gateway::new(
        router,
        Arc::new(filters),
        config.filters.clone(),
        breakers,
        fallbacks,
        client,
    )))
}

/// Spawn the health monitor and the idle pool sweeper.
pub fn spawn_background_tasks(
    gateway: &Gateway,
    config: &GatewayConfig,
    shutdown: &Shutdown,
) -> Vec<JoinHandle<()>> {
    let monitor = HealthMonitor::new(gateway.router().clone(), config.health_check.clone());
    let health = tokio::spawn(monitor.run(shutdown.subscribe()));

    let pools = gateway.client().pools().clone();
    let interval = Duration::from_secs(config.pool.sweep_interval_secs.max(1));
    let sweeper = tokio::spawn(pools.run_sweeper(interval, shutdown.subscribe()));

    vec![health, sweeper]
}

/// Start the metrics exporter when enabled.
pub fn init_metrics(config: &GatewayConfig) {
    if !config.observability.metrics_enabled {
        return;
    }
    match config.observability.metrics_address.parse::<SocketAddr>() {
        Ok(addr) => metrics::init_metrics(addr),
        Err(e) => tracing::error!(
            metrics_address = %config.observability.metrics_address,
            error = %e,
            "Failed to parse metrics address"
        ),
    }
}

/// Build everything, bind and serve until `shutdown` fires.
pub async fn run(config: GatewayConfig, shutdown: Arc<Shutdown>) -> Result<(), StartupError> {
    let gateway = build_gateway(&config)?;
    init_metrics(&config);
    let tasks = spawn_background_tasks(&gateway, &config, &shutdown);

    let addr = config.listener.bind_address.clone();
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|source| StartupError::Bind { addr: addr.clone(), source })?;
    tracing::info!(address = %addr, "Listening for connections");

    let server = HttpServer::new(gateway, &config.listener);
    let result = server.run(listener, shutdown.subscribe()).await;

    shutdown.trigger();
    for task in tasks {
        let _ = task.await;
    }
    result.map_err(StartupError::Server)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FilterDefinition, InstanceConfig, RouteConfig};

    fn route(url: &str) -> RouteConfig {
        RouteConfig {
            id: "orders".into(),
            path: "/orders".into(),
            load_balancer: Default::default(),
            gray_release: None,
            filters: vec![],
            resilient: None,
            instances: vec![InstanceConfig {
                service_id: "orders".into(),
                url: url.into(),
                weight: 1,
                healthy: true,
                gray: false,
            }],
        }
    }

    #[test]
    fn test_build_gateway_from_config() {
        let mut config = GatewayConfig::default();
        config.routes.push(route("http://127.0.0.1:9000"));
        let gateway = build_gateway(&config).unwrap();
        assert_eq!(gateway.router().routes().len(), 1);
        assert!(gateway.router().routes()[0].resilient);
    }

    #[test]
    fn test_unknown_filter_fails_startup() {
        let mut config = GatewayConfig::default();
        config.filters.push(FilterDefinition::new("TenantFilter", 0));
        let err = build_gateway(&config).unwrap_err();
        assert!(matches!(err, StartupError::Config(ConfigError::Validation(_))));
    }

    #[tokio::test]
    async fn test_background_tasks_stop_on_shutdown() {
        let config = GatewayConfig::default();
        let gateway = build_gateway(&config).unwrap();
        let shutdown = Shutdown::new();
        let tasks = spawn_background_tasks(&gateway, &config, &shutdown);

        // Let the sweeper subscribe and tick once.
        tokio::time::sleep(Duration::from_millis(20)).await;
        shutdown.trigger();
        for task in tasks {
            tokio::time::timeout(Duration::from_secs(1), task).await.unwrap().unwrap();
        }
    }
}
