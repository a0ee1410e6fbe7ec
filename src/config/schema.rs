//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from TOML files.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Root configuration for the gateway.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listener configuration (bind address, in-flight budget, body limit).
    pub listener: ListenerConfig,

    /// Backend timeouts.
    pub timeouts: TimeoutConfig,

    /// Per-host backend connection pool limits.
    pub pool: PoolConfig,

    /// Retry configuration.
    pub retries: RetryConfig,

    /// Circuit breaker defaults applied to every service.
    pub resilience: ResilienceConfig,

    /// Active health check settings.
    pub health_check: HealthCheckConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Global filters, run before routing.
    pub filters: Vec<FilterDefinition>,

    /// Route definitions, evaluated in order.
    pub routes: Vec<RouteConfig>,

    /// Static per-service fallback responses.
    pub fallbacks: Vec<FallbackConfig>,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:9999").
    pub bind_address: String,

    /// Maximum requests in flight before answering "Service busy".
    pub max_in_flight: usize,

    /// Maximum aggregated request body size in bytes.
    pub max_content_length: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:9999".to_string(),
            max_in_flight: 10_000,
            max_content_length: 1024 * 1024,
        }
    }
}

/// Timeout configuration for backend exchanges.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// TCP connect timeout in milliseconds.
    pub connect_ms: u64,

    /// Outbound request write timeout in milliseconds.
    pub write_ms: u64,

    /// Backend response timeout in milliseconds, from send until the body
    /// has been read.
    pub response_ms: u64,

    /// Idle timeout in seconds for body reads and pooled connections.
    pub idle_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_ms: 5000,
            write_ms: 5000,
            response_ms: 5000,
            idle_secs: 30,
        }
    }
}

/// What to do when a pool acquire waits longer than `acquire_timeout_ms`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AcquireTimeoutAction {
    /// Fail the acquire with `PoolExhausted`.
    #[default]
    Fail,
    /// Open a fresh connection beyond the pool bound.
    NewConnection,
}

/// Backend connection pool configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Maximum concurrent connections per backend host:port.
    pub max_connections_per_host: usize,

    /// Maximum acquires allowed to wait for a connection.
    pub max_pending_acquires: usize,

    /// How long an acquire may wait, in milliseconds.
    pub acquire_timeout_ms: u64,

    pub acquire_timeout_action: AcquireTimeoutAction,

    /// Interval between idle connection sweeps, in seconds.
    pub sweep_interval_secs: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections_per_host: 100,
            max_pending_acquires: 1000,
            acquire_timeout_ms: 5000,
            acquire_timeout_action: AcquireTimeoutAction::Fail,
            sweep_interval_secs: 10,
        }
    }
}

/// Retry configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the first attempt. Zero or negative disables retries.
    pub max_retries: i32,

    /// Base delay for exponential backoff in milliseconds.
    pub base_delay_ms: u64,

    /// Maximum delay for exponential backoff in milliseconds.
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: -1,
            base_delay_ms: 100,
            max_delay_ms: 2000,
        }
    }
}

/// Circuit breaker thresholds.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ResilienceConfig {
    /// Route backend calls through circuit breakers and fallbacks.
    pub enabled: bool,

    /// Failure rate (percent) at which the breaker opens.
    pub failure_rate_threshold: f32,

    /// Slow call rate (percent) at which the breaker opens.
    pub slow_call_rate_threshold: f32,

    /// Calls slower than this count as slow, in milliseconds.
    pub slow_call_duration_ms: u64,

    /// Time spent open before allowing trial calls, in milliseconds.
    pub wait_duration_in_open_state_ms: u64,

    /// Trial calls allowed while half-open.
    pub permitted_calls_in_half_open_state: u32,

    /// Calls required in the window before rates are evaluated.
    pub minimum_number_of_calls: u32,

    /// Sliding window length in seconds.
    pub sliding_window_secs: u64,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            failure_rate_threshold: 50.0,
            slow_call_rate_threshold: 50.0,
            slow_call_duration_ms: 10_000,
            wait_duration_in_open_state_ms: 60_000,
            permitted_calls_in_half_open_state: 5,
            minimum_number_of_calls: 10,
            sliding_window_secs: 5,
        }
    }
}

/// Health check configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HealthCheckConfig {
    /// Enable active health checks.
    pub enabled: bool,

    /// Health check interval in seconds.
    pub interval_secs: u64,

    /// Health check timeout in seconds.
    pub timeout_secs: u64,

    /// Path to probe for HTTP health checks.
    pub path: String,

    /// Number of consecutive failures before marking unhealthy.
    pub unhealthy_threshold: u32,

    /// Number of consecutive successes before marking healthy.
    pub healthy_threshold: u32,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_secs: 10,
            timeout_secs: 5,
            path: "/health".to_string(),
            unhealthy_threshold: 3,
            healthy_threshold: 2,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable the Prometheus metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// A named filter with arguments and an ordering key.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct FilterDefinition {
    pub name: String,

    #[serde(default)]
    pub args: BTreeMap<String, String>,

    /// Ascending execution order.
    #[serde(default)]
    pub order: i32,
}

impl FilterDefinition {
    pub fn new(name: impl Into<String>, order: i32) -> Self {
        Self {
            name: name.into(),
            args: BTreeMap::new(),
            order,
        }
    }

    pub fn with_arg(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.args.insert(key.into(), value.into());
        self
    }
}

/// Load balancing policy of a route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LoadBalancerKind {
    #[default]
    RoundRobin,
    WeightedRoundRobin,
}

/// Route configuration mapping a path prefix to backend instances.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RouteConfig {
    /// Unique route identifier.
    pub id: String,

    /// Path prefix to match.
    pub path: String,

    #[serde(default)]
    pub load_balancer: LoadBalancerKind,

    #[serde(default)]
    pub gray_release: Option<GrayReleaseConfig>,

    /// Filters run after this route matches.
    #[serde(default)]
    pub filters: Vec<FilterDefinition>,

    /// Call backends through the circuit breaker and fallback registry.
    /// `None` follows `resilience.enabled`.
    #[serde(default)]
    pub resilient: Option<bool>,

    #[serde(default)]
    pub instances: Vec<InstanceConfig>,
}

/// Backend instance configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct InstanceConfig {
    /// Service this instance belongs to; keys breakers and fallbacks.
    pub service_id: String,

    /// Base URL (e.g., "http://127.0.0.1:3000").
    pub url: String,

    /// Weight for weighted round robin (default: 1).
    #[serde(default = "default_weight")]
    pub weight: u32,

    /// Initial health state.
    #[serde(default = "default_true")]
    pub healthy: bool,

    /// Receives gray-release traffic.
    #[serde(default)]
    pub gray: bool,
}

fn default_weight() -> u32 {
    1
}

fn default_true() -> bool {
    true
}

/// Gray release policy. Strategies are evaluated header, user id, ip,
/// percentage; the first present and matching strategy wins.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GrayReleaseConfig {
    pub enabled: bool,
    pub header: Option<HeaderRule>,
    pub user_id: Option<PercentageRule>,
    pub ip: Option<IpRule>,
    pub percentage: Option<PercentageRule>,
}

/// Matches when the named header carries one of `values`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HeaderRule {
    pub name: String,
    pub values: Vec<String>,
}

/// Matches when `hash(key) % 100 < percentage`.
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
pub struct PercentageRule {
    pub percentage: u8,
}

/// Matches the client IP by prefix, `*` or equality.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IpRule {
    pub ranges: Vec<String>,
}

/// Static degraded response for one service.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FallbackConfig {
    pub service_id: String,

    #[serde(default = "default_fallback_status")]
    pub status: u16,

    pub body: String,

    #[serde(default = "default_fallback_content_type")]
    pub content_type: String,
}

fn default_fallback_status() -> u16 {
    200
}

fn default_fallback_content_type() -> String {
    "application/json".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = GatewayConfig::default();
        assert_eq!(config.listener.bind_address, "0.0.0.0:9999");
        assert_eq!(config.listener.max_content_length, 1024 * 1024);
        assert_eq!(config.timeouts.idle_secs, 30);
        assert_eq!(config.retries.max_retries, -1);
        assert_eq!(config.resilience.minimum_number_of_calls, 10);
        assert!(config.routes.is_empty());
    }

    #[test]
    fn test_parse_route_table() {
        let raw = r#"
            [retries]
            max_retries = 2

            [[filters]]
            name = "AuthFilter"
            order = 1

            [[routes]]
            id = "orders"
            path = "/orders"
            load_balancer = "weighted_round_robin"

            [routes.gray_release]
            enabled = true
            header = { name = "x-canary", values = ["true"] }

            [[routes.instances]]
            service_id = "order-service"
            url = "http://127.0.0.1:9001"
            weight = 5

            [[routes.instances]]
            service_id = "order-service"
            url = "http://127.0.0.1:9002"
            gray = true

            [[fallbacks]]
            service_id = "order-service"
            body = '{"orders":[]}'
        "#;

        let config: GatewayConfig = toml::from_str(raw).unwrap();
        assert_eq!(config.retries.max_retries, 2);
        assert_eq!(config.filters[0].name, "AuthFilter");

        let route = &config.routes[0];
        assert_eq!(route.load_balancer, LoadBalancerKind::WeightedRoundRobin);
        assert_eq!(route.instances[0].weight, 5);
        assert!(route.instances[0].healthy);
        assert!(route.instances[1].gray);
        assert_eq!(route.instances[1].weight, 1);

        let gray = route.gray_release.as_ref().unwrap();
        assert!(gray.enabled);
        assert_eq!(gray.header.as_ref().unwrap().values, vec!["true"]);

        assert_eq!(config.fallbacks[0].status, 200);
        assert_eq!(config.fallbacks[0].content_type, "application/json");
    }
}
