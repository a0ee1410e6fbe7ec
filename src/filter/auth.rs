//! Bearer token check.
//!
//! Args:
//! - `tokens`: comma separated list of accepted tokens; any token is
//!   accepted when absent
//! - `status`: rejection status code, 401 by default

use axum::http::{header, StatusCode};

use crate::filter::{Filter, FilterArgs, FilterOutcome};
use crate::http::context::RequestContext;

const BEARER_PREFIX: &str = "Bearer ";

#[derive(Debug, Default)]
pub struct AuthFilter;

impl AuthFilter {
    pub const NAME: &'static str = "AuthFilter";

    pub fn new() -> Self {
        Self
    }

    fn rejection_status(args: &FilterArgs) -> StatusCode {
        args.get("status")
            .and_then(|s| s.trim().parse::<u16>().ok())
            .and_then(|code| StatusCode::from_u16(code).ok())
            .unwrap_or(StatusCode::UNAUTHORIZED)
    }
}

impl Filter for AuthFilter {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn apply(&self, ctx: &mut RequestContext, args: &FilterArgs) -> FilterOutcome {
        let token = ctx
            .header(header::AUTHORIZATION.as_str())
            .and_then(|v| v.strip_prefix(BEARER_PREFIX))
            .map(str::trim)
            .filter(|t| !t.is_empty());

        let Some(token) = token else {
            return FilterOutcome::reject(Self::rejection_status(args), "Unauthorized");
        };

        if let Some(allowed) = args.get("tokens") {
            if !allowed.split(',').map(str::trim).any(|t| t == token) {
                tracing::debug!(request_id = %ctx.request_id, "Bearer token not in allowed set");
                return FilterOutcome::reject(Self::rejection_status(args), "Unauthorized");
            }
        }

        let token = token.to_string();
        ctx.set_attribute("auth.token", token);
        FilterOutcome::Continue
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::context::test_context;
    use axum::http::HeaderValue;

    fn args(pairs: &[(&str, &str)]) -> FilterArgs {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_missing_or_malformed_header() {
        let filter = AuthFilter::new();
        let (mut ctx, _rx) = test_context("/");
        assert_eq!(
            filter.apply(&mut ctx, &FilterArgs::new()),
            FilterOutcome::reject(StatusCode::UNAUTHORIZED, "Unauthorized")
        );

        ctx.headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert!(matches!(filter.apply(&mut ctx, &FilterArgs::new()), FilterOutcome::Reject { .. }));
    }

    #[test]
    fn test_any_bearer_token_without_list() {
        let filter = AuthFilter::new();
        let (mut ctx, _rx) = test_context("/");
        ctx.headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer abc"));
        assert_eq!(filter.apply(&mut ctx, &FilterArgs::new()), FilterOutcome::Continue);
        assert_eq!(ctx.attribute::<String>("auth.token").map(String::as_str), Some("abc"));
    }

    #[test]
    fn test_token_list_and_custom_status() {
        let filter = AuthFilter::new();
        let (mut ctx, _rx) = test_context("/");
        ctx.headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer other"));

        let restricted = args(&[("tokens", "abc, def"), ("status", "403")]);
        assert_eq!(
            filter.apply(&mut ctx, &restricted),
            FilterOutcome::reject(StatusCode::FORBIDDEN, "Unauthorized")
        );

        ctx.headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer def"));
        assert_eq!(filter.apply(&mut ctx, &restricted), FilterOutcome::Continue);
    }
}
