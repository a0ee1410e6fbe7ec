//! Load balancing subsystem.
//!
//! # Data Flow
//! ```text
//! Route matched → instance list
//!     → selector.rs (drop unhealthy, apply gray partition)
//!     → Apply load balancing algorithm:
//!         - round_robin.rs (rotate through instances)
//!         - weighted.rs (interleaved weighted rotation)
//!     → Return instance or NoInstanceAvailable
//! ```
//!
//! # Design Decisions
//! - Balancers keep per-key state (route id, plus gray partition suffix)
//! - Algorithm selection per route
//! - Unhealthy instances excluded before any policy runs
//! - Gray evaluation errors never fail a request

pub mod gray;
pub mod instance;
pub mod round_robin;
pub mod selector;
pub mod weighted;

use std::sync::Arc;

pub use instance::Instance;
pub use selector::InstanceSelector;

/// Trait for instance selection strategies.
pub trait LoadBalancer: Send + Sync + std::fmt::Debug {
    /// Pick one of `instances`. `key` scopes the rotation state.
    fn choose(&self, key: &str, instances: &[Arc<Instance>]) -> Option<Arc<Instance>>;
}
