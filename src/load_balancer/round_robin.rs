//! Round-robin load balancing strategy.

use dashmap::DashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::load_balancer::{instance::Instance, LoadBalancer};

/// Round-robin selector.
/// Keeps one counter per selection key to rotate through instances.
#[derive(Debug, Default)]
pub struct RoundRobin {
    counters: DashMap<String, AtomicUsize>,
}

impl RoundRobin {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_position(&self, key: &str) -> usize {
        if let Some(counter) = self.counters.get(key) {
            return counter.fetch_add(1, Ordering::Relaxed);
        }
        self.counters
            .entry(key.to_string())
            .or_insert_with(|| AtomicUsize::new(0))
            .fetch_add(1, Ordering::Relaxed)
    }
}

impl LoadBalancer for RoundRobin {
    fn choose(&self, key: &str, instances: &[Arc<Instance>]) -> Option<Arc<Instance>> {
        match instances.len() {
            0 => None,
            1 => Some(instances[0].clone()),
            len => {
                // The counter wraps on overflow; the remainder stays in range.
                let index = self.next_position(key) % len;
                Some(instances[index].clone())
            }
        }
    }
}
