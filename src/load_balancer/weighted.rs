//! Weighted round-robin load balancing strategy.
//!
//! Interleaved weighted round robin: a rotating index and a current weight
//! that starts at the maximum weight and drops by the gcd of all weights each
//! time the index wraps. An instance is picked when its weight reaches the
//! current weight, so over one full cycle every instance is chosen exactly
//! `weight / gcd` times and heavy instances are spread across the cycle.

use dashmap::DashMap;
use std::sync::{Arc, Mutex};

use crate::load_balancer::{instance::Instance, LoadBalancer};

#[derive(Debug)]
struct WeightedState {
    /// Weights the state was computed for; a different list resets it.
    weights: Vec<u32>,
    max_weight: u32,
    gcd: u32,
    /// Index of the last selection (`None` before the first pick).
    index: Option<usize>,
    current_weight: u32,
}

impl WeightedState {
    fn new(weights: Vec<u32>) -> Self {
        let max_weight = weights.iter().copied().max().unwrap_or(1).max(1);
        let gcd = weights.iter().copied().fold(0, gcd).max(1);
        Self {
            weights,
            max_weight,
            gcd,
            index: None,
            current_weight: 0,
        }
    }

    fn next(&mut self) -> usize {
        let len = self.weights.len();
        loop {
            let index = match self.index {
                Some(i) => (i + 1) % len,
                None => 0,
            };
            self.index = Some(index);

            if index == 0 {
                self.current_weight = self.current_weight.saturating_sub(self.gcd);
                if self.current_weight == 0 {
                    self.current_weight = self.max_weight;
                }
            }

            if self.weights[index] >= self.current_weight {
                return index;
            }
        }
    }
}

fn gcd(a: u32, b: u32) -> u32 {
    if b == 0 {
        a
    } else {
        gcd(b, a % b)
    }
}

/// Weighted round-robin selector with one state per selection key.
#[derive(Debug, Default)]
pub struct WeightedRoundRobin {
    states: DashMap<String, Mutex<WeightedState>>,
}

impl WeightedRoundRobin {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LoadBalancer for WeightedRoundRobin {
    fn choose(&self, key: &str, instances: &[Arc<Instance>]) -> Option<Arc<Instance>> {
        match instances.len() {
            0 => return None,
            1 => return Some(instances[0].clone()),
            _ => {}
        }

        let weights: Vec<u32> = instances.iter().map(|i| i.weight.max(1)).collect();
        let entry = self
            .states
            .entry(key.to_string())
            .or_insert_with(|| Mutex::new(WeightedState::new(weights.clone())));

        let mut state = entry.lock().expect("weighted state mutex poisoned");
        if state.weights != weights {
            *state = WeightedState::new(weights);
        }
        let index = state.next();
        Some(instances[index].clone())
    }
}
