//! Instance selection for a matched route.
//!
//! # Responsibilities
//! - Exclude unhealthy instances
//! - Narrow candidates to the gray or base partition when the route has an
//!   enabled gray policy
//! - Delegate the final pick to the route's balancing policy

use std::sync::Arc;

use crate::config::LoadBalancerKind;
use crate::error::GatewayError;
use crate::load_balancer::{
    gray::GrayInput, instance::Instance, round_robin::RoundRobin, weighted::WeightedRoundRobin,
    LoadBalancer,
};
use crate::routing::RouteDefinition;

/// Selects a backend instance for a route.
#[derive(Debug, Default)]
pub struct InstanceSelector {
    round_robin: RoundRobin,
    weighted: WeightedRoundRobin,
}

impl InstanceSelector {
    pub fn new() -> Self {
        Self::default()
    }

    fn balancer(&self, kind: LoadBalancerKind) -> &dyn LoadBalancer {
        match kind {
            LoadBalancerKind::RoundRobin => &self.round_robin,
            LoadBalancerKind::WeightedRoundRobin => &self.weighted,
        }
    }

    pub fn select(
        &self,
        route: &RouteDefinition,
        input: &GrayInput<'_>,
    ) -> Result<Arc<Instance>, GatewayError> {
        let healthy: Vec<Arc<Instance>> = route
            .instances
            .iter()
            .filter(|i| i.is_healthy())
            .cloned()
            .collect();
        if healthy.is_empty() {
            tracing::warn!(route = %route.id, "No healthy instance");
            return Err(GatewayError::NoInstanceAvailable);
        }

        let balancer = self.balancer(route.load_balancer);
        let policy = route.gray.as_ref().filter(|p| p.is_enabled());

        let chosen = match policy.map(|p| p.evaluate(input)) {
            None => balancer.choose(&route.id, &healthy),
            Some(Ok(is_gray)) => {
                let candidates: Vec<Arc<Instance>> = healthy
                    .iter()
                    .filter(|i| i.gray == is_gray)
                    .cloned()
                    .collect();
                if candidates.is_empty() {
                    tracing::debug!(
                        route = %route.id,
                        gray = is_gray,
                        "Gray partition empty, using all instances"
                    );
                    balancer.choose(&route.id, &healthy)
                } else {
                    let partition = if is_gray { "gray" } else { "base" };
                    let key = format!("{}:{}", route.id, partition);
                    balancer.choose(&key, &candidates)
                }
            }
            Some(Err(e)) => {
                tracing::warn!(route = %route.id, error = %e, "Gray evaluation failed, using all instances");
                balancer.choose(&route.id, &healthy)
            }
        };

        chosen.ok_or(GatewayError::NoInstanceAvailable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{GrayReleaseConfig, HeaderRule};
    use crate::load_balancer::gray::GrayPolicy;
    use axum::http::{HeaderMap, HeaderValue};

    fn instance(port: u16, gray: bool) -> Arc<Instance> {
        Arc::new(
            Instance::new("svc", &format!("http://127.0.0.1:{}", port), 1)
                .unwrap()
                .with_gray(gray),
        )
    }

    fn route(instances: Vec<Arc<Instance>>, gray: Option<GrayPolicy>) -> RouteDefinition {
        RouteDefinition {
            id: "r1".into(),
            path: "/svc".into(),
            load_balancer: LoadBalancerKind::RoundRobin,
            gray,
            filters: vec![],
            resilient: false,
            instances,
        }
    }

    fn canary_policy() -> GrayPolicy {
        GrayPolicy::from_config(&GrayReleaseConfig {
            enabled: true,
            header: Some(HeaderRule {
                name: "x-canary".into(),
                values: vec!["true".into()],
            }),
            ..Default::default()
        })
    }

    fn select_port(selector: &InstanceSelector, route: &RouteDefinition, headers: &HeaderMap) -> u16 {
        let input = GrayInput {
            headers,
            client_ip: "127.0.0.1",
        };
        selector.select(route, &input).unwrap().port
    }

    #[test]
    fn test_unhealthy_instances_excluded() {
        let selector = InstanceSelector::new();
        let down = instance(1, false);
        down.set_healthy(false);
        let route = route(vec![down, instance(2, false)], None);
        let headers = HeaderMap::new();
        for _ in 0..4 {
            assert_eq!(select_port(&selector, &route, &headers), 2);
        }
    }

    #[test]
    fn test_no_healthy_instance() {
        let selector = InstanceSelector::new();
        let down = instance(1, false);
        down.set_healthy(false);
        let route = route(vec![down], None);
        let headers = HeaderMap::new();
        let input = GrayInput {
            headers: &headers,
            client_ip: "127.0.0.1",
        };
        assert!(matches!(
            selector.select(&route, &input),
            Err(GatewayError::NoInstanceAvailable)
        ));
    }

    #[test]
    fn test_gray_partitions() {
        let selector = InstanceSelector::new();
        let route = route(
            vec![instance(1, false), instance(2, true), instance(3, false)],
            Some(canary_policy()),
        );

        let mut canary = HeaderMap::new();
        canary.insert("x-canary", HeaderValue::from_static("true"));
        for _ in 0..3 {
            assert_eq!(select_port(&selector, &route, &canary), 2);
        }

        let plain = HeaderMap::new();
        let ports: Vec<u16> = (0..4).map(|_| select_port(&selector, &route, &plain)).collect();
        assert_eq!(ports, vec![1, 3, 1, 3]);
    }

    #[test]
    fn test_empty_gray_partition_falls_back_to_all() {
        let selector = InstanceSelector::new();
        let route = route(vec![instance(1, false), instance(2, false)], Some(canary_policy()));
        let mut canary = HeaderMap::new();
        canary.insert("x-canary", HeaderValue::from_static("true"));

        let mut ports: Vec<u16> = (0..2).map(|_| select_port(&selector, &route, &canary)).collect();
        ports.sort();
        assert_eq!(ports, vec![1, 2]);
    }

    #[test]
    fn test_gray_error_falls_back_to_all() {
        let selector = InstanceSelector::new();
        let route = route(vec![instance(1, true), instance(2, false)], Some(canary_policy()));
        let mut broken = HeaderMap::new();
        broken.insert("x-canary", HeaderValue::from_bytes(&[0xff]).unwrap());

        let mut ports: Vec<u16> = (0..2).map(|_| select_port(&selector, &route, &broken)).collect();
        ports.sort();
        assert_eq!(ports, vec![1, 2]);
    }

    #[test]
    fn test_disabled_policy_ignored() {
        let selector = InstanceSelector::new();
        let mut config = GrayReleaseConfig {
            enabled: false,
            ..Default::default()
        };
        config.header = Some(HeaderRule {
            name: "x-canary".into(),
            values: vec!["true".into()],
        });
        let route = route(
            vec![instance(1, true), instance(2, false)],
            Some(GrayPolicy::from_config(&config)),
        );
        let mut canary = HeaderMap::new();
        canary.insert("x-canary", HeaderValue::from_static("true"));
        let ports: Vec<u16> = (0..2).map(|_| select_port(&selector, &route, &canary)).collect();
        assert_eq!(ports, vec![1, 2]);
    }
}
