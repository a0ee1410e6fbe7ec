//! Registry of circuit breakers keyed by service id.

use dashmap::DashMap;
use std::sync::Arc;

use crate::resilience::circuit_breaker::{BreakerMetrics, BreakerSettings, CircuitBreaker};

/// Lazily creates one breaker per service and keeps it for the process
/// lifetime. Creation goes through the map entry, so concurrent first
/// requests for a service share one breaker.
#[derive(Debug)]
pub struct CircuitBreakerRegistry {
    settings: BreakerSettings,
    breakers: DashMap<String, Arc<CircuitBreaker>>,
}

impl CircuitBreakerRegistry {
    pub fn new(settings: BreakerSettings) -> Self {
        Self {
            settings,
            breakers: DashMap::new(),
        }
    }

    pub fn get_or_create(&self, service_id: &str) -> Arc<CircuitBreaker> {
        if let Some(breaker) = self.breakers.get(service_id) {
            return breaker.clone();
        }
        self.breakers
            .entry(service_id.to_string())
            .or_insert_with(|| {
                tracing::debug!(service = %service_id, "Creating circuit breaker");
                Arc::new(CircuitBreaker::new(service_id, self.settings.clone()))
            })
            .clone()
    }

    pub fn get(&self, service_id: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(service_id).map(|b| b.clone())
    }

    /// Forget a breaker; the next call recreates it closed.
    pub fn remove(&self, service_id: &str) -> bool {
        self.breakers.remove(service_id).is_some()
    }

    pub fn reset(&self, service_id: &str) -> bool {
        self.apply(service_id, CircuitBreaker::reset)
    }

    pub fn disable(&self, service_id: &str) -> bool {
        self.apply(service_id, CircuitBreaker::disable)
    }

    pub fn force_open(&self, service_id: &str) -> bool {
        self.apply(service_id, CircuitBreaker::force_open)
    }

    fn apply(&self, service_id: &str, op: impl FnOnce(&CircuitBreaker)) -> bool {
        match self.get(service_id) {
            Some(breaker) => {
                op(breaker.as_ref());
                true
            }
            None => false,
        }
    }

    /// Metrics of every known breaker, sorted by service id.
    pub fn snapshot(&self) -> Vec<(String, BreakerMetrics)> {
        let mut all: Vec<(String, BreakerMetrics)> = self
            .breakers
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().metrics()))
            .collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        all
    }
}
