//! Health checking subsystem.
//!
//! # Data Flow
//! ```text
//! Active health checks (active.rs):
//!     Periodic timer
//!     → Probe every instance of every route
//!     → Instance::mark_success / mark_failure
//!     → Selector skips unhealthy instances
//! ```
//!
//! # Design Decisions
//! - State transitions require consecutive successes/failures
//! - Health state lives on the instance as an atomic flag
//! - Disabled by default; instances then keep their configured state

pub mod active;

pub use active::HealthMonitor;
