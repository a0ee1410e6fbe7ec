//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Request to backend:
//!     → registry.rs (breaker for the instance's service)
//!     → circuit_breaker.rs (permit, or reject → fallback.rs)
//!     → timeouts.rs (connect/write/response/idle deadlines)
//!     → On failure: retries.rs (retryable? back off per backoff.rs, retry)
//!     → Outcome recorded on the permit; terminal failure → fallback.rs
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every external call has a deadline
//! - Retries are exhausted before the breaker sees a failure
//! - Circuit breaker prevents cascading failures
//! - Fallback handlers produce exactly one degraded response

pub mod backoff;
pub mod circuit_breaker;
pub mod fallback;
pub mod registry;
pub mod retries;
pub mod timeouts;

pub use circuit_breaker::{BreakerRejection, BreakerSettings, CircuitBreaker, CircuitState};
pub use fallback::{FallbackHandler, FallbackRegistry};
pub use registry::CircuitBreakerRegistry;
pub use retries::RetryPolicy;
pub use timeouts::BackendTimeouts;
