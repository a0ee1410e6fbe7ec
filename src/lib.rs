//! HTTP API gateway library.
//!
//! Routes inbound requests by path prefix to backend instances, with
//! filters, load balancing, gray release, pooled backend connections,
//! retries, circuit breaking and fallbacks.

pub mod client;
pub mod config;
pub mod error;
pub mod filter;
pub mod gateway;
pub mod health;
pub mod http;
pub mod lifecycle;
pub mod load_balancer;
pub mod observability;
pub mod resilience;
pub mod routing;

pub use config::GatewayConfig;
pub use error::GatewayError;
pub use gateway::Gateway;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
