//! Per-client token bucket rate limiting.
//!
//! Args:
//! - `requests_per_second`: refill rate, 100 by default
//! - `burst`: bucket capacity, defaults to the refill rate
//!
//! Buckets are keyed by client IP and the configured limits, so the same
//! filter can be mounted with different limits on different routes.

use axum::http::StatusCode;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;

use crate::filter::{Filter, FilterArgs, FilterOutcome};
use crate::http::context::RequestContext;

const DEFAULT_RPS: f64 = 100.0;

/// A simple token bucket rate limiter.
#[derive(Debug)]
struct TokenBucket {
    tokens: f64,
    last_update: Instant,
}

impl TokenBucket {
    fn new(capacity: f64, now: Instant) -> Self {
        Self {
            tokens: capacity,
            last_update: now,
        }
    }

    fn try_acquire(&mut self, capacity: f64, refill_rate: f64, now: Instant) -> bool {
        let elapsed = now.saturating_duration_since(self.last_update).as_secs_f64();

        self.tokens = (self.tokens + elapsed * refill_rate).min(capacity);
        self.last_update = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

#[derive(Debug, Default)]
pub struct RateLimitFilter {
    buckets: Mutex<HashMap<String, TokenBucket>>,
}

impl RateLimitFilter {
    pub const NAME: &'static str = "RateLimitFilter";

    pub fn new() -> Self {
        Self::default()
    }

    fn limits(args: &FilterArgs) -> (f64, f64) {
        let parse = |key: &str| {
            args.get(key)
                .and_then(|v| v.trim().parse::<f64>().ok())
                .filter(|v| *v > 0.0)
        };
        let rps = parse("requests_per_second").unwrap_or(DEFAULT_RPS);
        let burst = parse("burst").unwrap_or(rps).max(1.0);
        (rps, burst)
    }

    fn check(&self, client: &str, args: &FilterArgs, now: Instant) -> bool {
        let (rps, burst) = Self::limits(args);
        let key = format!("{}|{}|{}", rps, burst, client);

        let mut buckets = self.buckets.lock().expect("rate limiter mutex poisoned");
        let bucket = buckets
            .entry(key)
            .or_insert_with(|| TokenBucket::new(burst, now));
        bucket.try_acquire(burst, rps, now)
    }
}

impl Filter for RateLimitFilter {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn apply(&self, ctx: &mut RequestContext, args: &FilterArgs) -> FilterOutcome {
        if self.check(&ctx.client_ip, args, Instant::now()) {
            FilterOutcome::Continue
        } else {
            tracing::warn!(client = %ctx.client_ip, request_id = %ctx.request_id, "Rate limit exceeded");
            FilterOutcome::reject(StatusCode::TOO_MANY_REQUESTS, "Too many requests")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::context::test_context;
    use std::time::Duration;

    fn args(rps: &str, burst: &str) -> FilterArgs {
        let mut args = FilterArgs::new();
        args.insert("requests_per_second".into(), rps.into());
        args.insert("burst".into(), burst.into());
        args
    }

    #[test]
    fn test_burst_then_refill() {
        let filter = RateLimitFilter::new();
        let limits = args("2", "3");
        let start = Instant::now();

        for _ in 0..3 {
            assert!(filter.check("10.0.0.1", &limits, start));
        }
        assert!(!filter.check("10.0.0.1", &limits, start));

        // Two tokens per second: one token after half a second.
        let later = start + Duration::from_millis(500);
        assert!(filter.check("10.0.0.1", &limits, later));
        assert!(!filter.check("10.0.0.1", &limits, later));
    }

    #[test]
    fn test_clients_have_separate_buckets() {
        let filter = RateLimitFilter::new();
        let limits = args("1", "1");
        let now = Instant::now();
        assert!(filter.check("10.0.0.1", &limits, now));
        assert!(!filter.check("10.0.0.1", &limits, now));
        assert!(filter.check("10.0.0.2", &limits, now));
    }

    #[test]
    fn test_rejects_with_429() {
        let filter = RateLimitFilter::new();
        let limits = args("1", "1");
        let (mut ctx, _rx) = test_context("/");
        assert_eq!(filter.apply(&mut ctx, &limits), FilterOutcome::Continue);
        assert_eq!(
            filter.apply(&mut ctx, &limits),
            FilterOutcome::reject(StatusCode::TOO_MANY_REQUESTS, "Too many requests")
        );
    }

    #[test]
    fn test_default_limits() {
        assert_eq!(RateLimitFilter::limits(&FilterArgs::new()), (100.0, 100.0));
        assert_eq!(RateLimitFilter::limits(&args("5", "0")), (5.0, 5.0));
    }
}
