//! Route lookup and dispatch.
//!
//! # Responsibilities
//! - Store compiled routes in configured order
//! - Look up the first matching route for a path
//! - Accept route table changes from an administrative caller
//!
//! # Design Decisions
//! - The table is an `ArcSwap` snapshot: a lookup loads one snapshot and
//!   never observes a half-applied change
//! - O(n) path prefix scan (acceptable for typical route counts)
//! - First match wins; no longest-prefix resolution
//! - Explicit NoMatch rather than silent default

use arc_swap::ArcSwap;
use std::sync::Arc;

use crate::config::RouteConfig;
use crate::load_balancer::instance::InstanceError;
use crate::routing::matcher::path_matches;
use crate::routing::route::RouteDefinition;

/// The gateway's route table.
#[derive(Debug)]
pub struct Router {
    routes: ArcSwap<Vec<Arc<RouteDefinition>>>,
}

impl Router {
    pub fn new(routes: Vec<RouteDefinition>) -> Self {
        Self {
            routes: ArcSwap::from_pointee(routes.into_iter().map(Arc::new).collect()),
        }
    }

    /// Compile routes from configuration.
    pub fn from_config(configs: &[RouteConfig], resilient_default: bool) -> Result<Self, InstanceError> {
        let routes = configs
            .iter()
            .map(|c| RouteDefinition::from_config(c, resilient_default))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(routes))
    }

    /// First route whose prefix matches `path`.
    pub fn match_path(&self, path: &str) -> Option<Arc<RouteDefinition>> {
        let snapshot = self.routes.load();
        snapshot
            .iter()
            .find(|route| path_matches(&route.path, path))
            .cloned()
    }

    /// Current snapshot of the table.
    pub fn routes(&self) -> Arc<Vec<Arc<RouteDefinition>>> {
        self.routes.load_full()
    }

    /// Append a route, or replace the route with the same id in place.
    pub fn add_route(&self, route: RouteDefinition) {
        let route = Arc::new(route);
        self.routes.rcu(|current| {
            let mut next: Vec<Arc<RouteDefinition>> = current.iter().cloned().collect();
            match next.iter().position(|r| r.id == route.id) {
                Some(index) => next[index] = route.clone(),
                None => next.push(route.clone()),
            }
            next
        });
        tracing::info!(route = %route.id, path = %route.path, "Route added");
    }

    /// Remove a route by id. Returns false if no such route existed.
    pub fn remove_route(&self, id: &str) -> bool {
        let previous = self.routes.rcu(|current| {
            current
                .iter()
                .filter(|r| r.id != id)
                .cloned()
                .collect::<Vec<_>>()
        });
        let removed = previous.iter().any(|r| r.id == id);
        if removed {
            tracing::info!(route = %id, "Route removed");
        }
        removed
    }

    /// Swap in a whole new table.
    pub fn replace_routes(&self, routes: Vec<RouteDefinition>) {
        let count = routes.len();
        self.routes
            .store(Arc::new(routes.into_iter().map(Arc::new).collect()));
        tracing::info!(routes = count, "Route table replaced");
    }
}
