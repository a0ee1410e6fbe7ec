//! Runtime route definition.

use std::sync::Arc;

use crate::config::{FilterDefinition, LoadBalancerKind, RouteConfig};
use crate::load_balancer::gray::GrayPolicy;
use crate::load_balancer::instance::{Instance, InstanceError};

/// A route compiled from configuration. Immutable once built and shared
/// read-only between requests.
#[derive(Debug)]
pub struct RouteDefinition {
    pub id: String,
    /// Path prefix.
    pub path: String,
    pub load_balancer: LoadBalancerKind,
    pub gray: Option<GrayPolicy>,
    /// Route-scoped filters, sorted by ascending order.
    pub filters: Vec<FilterDefinition>,
    /// Backend calls go through the circuit breaker and fallback registry.
    pub resilient: bool,
    pub instances: Vec<Arc<Instance>>,
}

impl RouteDefinition {
    /// Build from configuration; `resilient_default` applies when the route
    /// does not say.
    pub fn from_config(config: &RouteConfig, resilient_default: bool) -> Result<Self, InstanceError> {
        let instances = config
            .instances
            .iter()
            .map(|i| Instance::from_config(i).map(Arc::new))
            .collect::<Result<Vec<_>, _>>()?;

        let mut filters = config.filters.clone();
        filters.sort_by_key(|f| f.order);

        Ok(Self {
            id: config.id.clone(),
            path: config.path.clone(),
            load_balancer: config.load_balancer,
            gray: config.gray_release.as_ref().map(GrayPolicy::from_config),
            filters,
            resilient: config.resilient.unwrap_or(resilient_default),
            instances,
        })
    }

    /// Number of leading path segments this route is mounted under.
    pub fn mount_depth(&self) -> usize {
        self.path.split('/').filter(|s| !s.is_empty()).count()
    }
}
