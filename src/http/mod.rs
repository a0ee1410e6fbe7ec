//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, in-flight budget, body aggregation)
//!     → request.rs (request ID, client IP, forwarding headers)
//!     → context.rs (per-request state, write-once response slot)
//!     → [gateway pipeline]
//!     → response.rs (backend response → client response)
//!     → Send to client
//! ```

pub mod context;
pub mod request;
pub mod response;
pub mod server;

pub use context::{RequestContext, ResponseSlot};
pub use request::X_REQUEST_ID;
pub use server::HttpServer;
