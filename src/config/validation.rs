//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check referential integrity (filters name registered implementations)
//! - Validate value ranges (timeouts > 0, weights ≥ 1, percentages ≤ 100)
//! - Detect duplicate route ids
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GatewayConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::fmt;
use std::net::SocketAddr;
use url::Url;

use crate::config::schema::{FilterDefinition, GatewayConfig, GrayReleaseConfig};
use crate::filter::BUILTIN_FILTERS;

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path of the offending field.
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Validate against the built-in filter names.
pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    validate_config_with_filters(config, BUILTIN_FILTERS)
}

/// Validate, accepting any filter name in `known_filters`.
pub fn validate_config_with_filters(
    config: &GatewayConfig,
    known_filters: &[&str],
) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "listener.bind_address",
            format!("'{}' is not a socket address", config.listener.bind_address),
        ));
    }
    if config.listener.max_in_flight == 0 {
        errors.push(ValidationError::new("listener.max_in_flight", "must be > 0"));
    }

    let timeouts = &config.timeouts;
    for (field, value) in [
        ("timeouts.connect_ms", timeouts.connect_ms),
        ("timeouts.write_ms", timeouts.write_ms),
        ("timeouts.response_ms", timeouts.response_ms),
        ("timeouts.idle_secs", timeouts.idle_secs),
        ("pool.acquire_timeout_ms", config.pool.acquire_timeout_ms),
        ("pool.sweep_interval_secs", config.pool.sweep_interval_secs),
    ] {
        if value == 0 {
            errors.push(ValidationError::new(field, "must be > 0"));
        }
    }
    if config.pool.max_connections_per_host == 0 {
        errors.push(ValidationError::new("pool.max_connections_per_host", "must be > 0"));
    }
    if config.retries.max_delay_ms < config.retries.base_delay_ms {
        errors.push(ValidationError::new(
            "retries.max_delay_ms",
            "must not be smaller than base_delay_ms",
        ));
    }

    let resilience = &config.resilience;
    for (field, value) in [
        ("resilience.failure_rate_threshold", resilience.failure_rate_threshold),
        ("resilience.slow_call_rate_threshold", resilience.slow_call_rate_threshold),
    ] {
        if !(value > 0.0 && value <= 100.0) {
            errors.push(ValidationError::new(field, "must be in (0, 100]"));
        }
    }
    if resilience.sliding_window_secs == 0 {
        errors.push(ValidationError::new("resilience.sliding_window_secs", "must be > 0"));
    }
    if resilience.permitted_calls_in_half_open_state == 0 {
        errors.push(ValidationError::new(
            "resilience.permitted_calls_in_half_open_state",
            "must be > 0",
        ));
    }

    validate_filters("filters", &config.filters, known_filters, &mut errors);

    let mut route_ids = HashSet::new();
    for (i, route) in config.routes.iter().enumerate() {
        let prefix = format!("routes[{}]", i);
        if route.id.is_empty() {
            errors.push(ValidationError::new(format!("{}.id", prefix), "must not be empty"));
        } else if !route_ids.insert(route.id.as_str()) {
            errors.push(ValidationError::new(
                format!("{}.id", prefix),
                format!("duplicate route id '{}'", route.id),
            ));
        }
        if !route.path.starts_with('/') {
            errors.push(ValidationError::new(format!("{}.path", prefix), "must start with '/'"));
        }
        if route.instances.is_empty() {
            errors.push(ValidationError::new(
                format!("{}.instances", prefix),
                "at least one instance is required",
            ));
        }

        for (j, instance) in route.instances.iter().enumerate() {
            let field = format!("{}.instances[{}]", prefix, j);
            if instance.service_id.is_empty() {
                errors.push(ValidationError::new(format!("{}.service_id", field), "must not be empty"));
            }
            if instance.weight == 0 {
                errors.push(ValidationError::new(format!("{}.weight", field), "must be >= 1"));
            }
            match Url::parse(&instance.url) {
                Ok(url) if url.scheme() != "http" => errors.push(ValidationError::new(
                    format!("{}.url", field),
                    format!("unsupported scheme '{}'", url.scheme()),
                )),
                Ok(url) if url.host_str().is_none() => {
                    errors.push(ValidationError::new(format!("{}.url", field), "missing host"))
                }
                Ok(_) => {}
                Err(e) => errors.push(ValidationError::new(format!("{}.url", field), e.to_string())),
            }
        }

        if let Some(gray) = &route.gray_release {
            validate_gray(&format!("{}.gray_release", prefix), gray, &mut errors);
        }
        validate_filters(&format!("{}.filters", prefix), &route.filters, known_filters, &mut errors);
    }

    for (i, fallback) in config.fallbacks.iter().enumerate() {
        if axum::http::StatusCode::from_u16(fallback.status).is_err() {
            errors.push(ValidationError::new(
                format!("fallbacks[{}].status", i),
                format!("{} is not a valid status code", fallback.status),
            ));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn validate_filters(
    field: &str,
    filters: &[FilterDefinition],
    known_filters: &[&str],
    errors: &mut Vec<ValidationError>,
) {
    for (i, filter) in filters.iter().enumerate() {
        if !known_filters.contains(&filter.name.as_str()) {
            errors.push(ValidationError::new(
                format!("{}[{}].name", field, i),
                format!("unknown filter '{}'", filter.name),
            ));
        }
    }
}

fn validate_gray(field: &str, gray: &GrayReleaseConfig, errors: &mut Vec<ValidationError>) {
    for (name, rule) in [("user_id", gray.user_id), ("percentage", gray.percentage)] {
        if let Some(rule) = rule {
            if rule.percentage > 100 {
                errors.push(ValidationError::new(
                    format!("{}.{}.percentage", field, name),
                    "must be <= 100",
                ));
            }
        }
    }
    if let Some(header) = &gray.header {
        if axum::http::HeaderName::from_bytes(header.name.as_bytes()).is_err() {
            errors.push(ValidationError::new(
                format!("{}.header.name", field),
                format!("'{}' is not a valid header name", header.name),
            ));
        }
    }
}
