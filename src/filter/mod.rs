//! Request filters.
//!
//! # Data Flow
//! ```text
//! RequestContext
//!     → chain.rs (definitions in ascending order)
//!         → registry lookup by name (unknown → 500)
//!         → Filter::apply (Continue, or Reject → response, stop)
//! ```
//!
//! # Design Decisions
//! - Filters are registered by name at startup and shared by all routes
//! - Per-definition arguments are passed on every call so one filter
//!   instance serves every place it is configured
//! - Outcomes are values; a filter never writes the response itself

pub mod auth;
pub mod chain;
pub mod rate_limit;

use axum::http::StatusCode;
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::sync::Arc;

use crate::http::context::RequestContext;

pub use auth::AuthFilter;
pub use chain::run_filters;
pub use rate_limit::RateLimitFilter;

/// Names resolvable without custom registration.
pub const BUILTIN_FILTERS: &[&str] = &[AuthFilter::NAME, RateLimitFilter::NAME];

pub type FilterArgs = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterOutcome {
    Continue,
    Reject { status: StatusCode, message: String },
}

impl FilterOutcome {
    pub fn reject(status: StatusCode, message: impl Into<String>) -> Self {
        Self::Reject {
            status,
            message: message.into(),
        }
    }
}

pub trait Filter: Send + Sync + Debug {
    fn name(&self) -> &str;

    fn apply(&self, ctx: &mut RequestContext, args: &FilterArgs) -> FilterOutcome;
}

/// Name → filter implementation.
#[derive(Debug, Default)]
pub struct FilterRegistry {
    filters: DashMap<String, Arc<dyn Filter>>,
}

impl FilterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the built-in filters.
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        registry.register(Arc::new(AuthFilter::new()));
        registry.register(Arc::new(RateLimitFilter::new()));
        registry
    }

    /// Add or replace a filter under its own name.
    pub fn register(&self, filter: Arc<dyn Filter>) {
        self.filters.insert(filter.name().to_string(), filter);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Filter>> {
        self.filters.get(name).map(|f| f.clone())
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.filters.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }
}
