//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming Request (path)
//!     → router.rs (load current snapshot, scan in order)
//!     → matcher.rs (segment-aware prefix check)
//!     → Return: matched RouteDefinition or NoMatch
//!
//! Route Compilation (at startup):
//!     RouteConfig[]
//!     → route.rs (build instances, gray policy, sorted filters)
//!     → Router snapshot
//! ```
//!
//! # Design Decisions
//! - Routes compiled at startup; the table can be swapped whole or per route
//! - No regex in hot path (prefix matching only)
//! - Deterministic: same input always matches same route
//! - First match wins (configured order)

pub mod matcher;
pub mod route;
pub mod router;

pub use route::RouteDefinition;
pub use router::Router;
