//! Route matching logic.
//!
//! # Responsibilities
//! - Match request paths against a route's path prefix
//! - Respect segment boundaries so `/api` never matches `/apiv2`
//!
//! # Design Decisions
//! - Path matching is case-sensitive
//! - No regex to guarantee O(n) matching
//! - A prefix ending in `/` already carries its boundary

/// Exact match, or prefix match where the prefix ends with `/` or the next
/// path character is `/`.
pub fn path_matches(prefix: &str, path: &str) -> bool {
    if path == prefix {
        return true;
    }
    match path.strip_prefix(prefix) {
        Some(rest) => prefix.ends_with('/') || rest.starts_with('/'),
        None => false,
    }
}
