//! Gray release (canary) evaluation.
//!
//! # Responsibilities
//! - Decide whether a request belongs to the gray group of a route
//! - Evaluate strategies in fixed precedence: header, user id, client ip,
//!   request percentage
//!
//! # Design Decisions
//! - The first strategy that is configured *and* matches wins; a request no
//!   strategy matches is non-gray
//! - Hashing uses xxh3 so the same user or request id lands in the same
//!   partition across restarts and hosts
//! - IP ranges match by prefix, `*` or equality (no CIDR parsing)

use axum::http::{HeaderMap, HeaderName};
use xxhash_rust::xxh3::xxh3_64;

use crate::config::{GrayReleaseConfig, HeaderRule};
use crate::http::request::X_REQUEST_ID;

const USER_ID_HEADERS: [&str; 2] = ["user-id", "x-user-id"];
const REQUEST_ID_HEADER: &str = "request-id";

/// A strategy could not be evaluated for this request.
#[derive(Debug, thiserror::Error)]
pub enum GrayError {
    #[error("header '{0}' is not valid UTF-8")]
    InvalidHeader(String),
}

/// The request attributes gray strategies look at.
#[derive(Debug, Clone, Copy)]
pub struct GrayInput<'a> {
    pub headers: &'a HeaderMap,
    /// Originating client IP, already resolved from forwarding headers.
    pub client_ip: &'a str,
}

#[derive(Debug, Clone)]
struct HeaderStrategy {
    name: HeaderName,
    values: Vec<String>,
}

/// Compiled gray release policy of one route.
#[derive(Debug, Clone, Default)]
pub struct GrayPolicy {
    enabled: bool,
    header: Option<HeaderStrategy>,
    user_id_percentage: Option<u8>,
    ip_ranges: Option<Vec<String>>,
    request_percentage: Option<u8>,
}

impl GrayPolicy {
    /// Compile from configuration. A header rule with an invalid name is dropped.
    pub fn from_config(config: &GrayReleaseConfig) -> Self {
        let header = config.header.as_ref().and_then(|HeaderRule { name, values }| {
            match HeaderName::from_bytes(name.as_bytes()) {
                Ok(name) => Some(HeaderStrategy {
                    name,
                    values: values.clone(),
                }),
                Err(_) => {
                    tracing::warn!(header = %name, "Ignoring gray header rule with invalid name");
                    None
                }
            }
        });

        Self {
            enabled: config.enabled,
            header,
            user_id_percentage: config.user_id.map(|r| r.percentage),
            ip_ranges: config.ip.as_ref().map(|r| r.ranges.clone()),
            request_percentage: config.percentage.map(|r| r.percentage),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Whether the request belongs to the gray group.
    pub fn evaluate(&self, input: &GrayInput<'_>) -> Result<bool, GrayError> {
        if let Some(strategy) = &self.header {
            if let Some(value) = header_str(input.headers, strategy.name.as_str())? {
                if strategy.values.iter().any(|v| v == value) {
                    return Ok(true);
                }
            }
        }

        if let Some(percentage) = self.user_id_percentage {
            if let Some(user_id) = user_id(input.headers)? {
                if bucket(user_id) < percentage as u64 {
                    return Ok(true);
                }
            }
        }

        if let Some(ranges) = &self.ip_ranges {
            if ranges.iter().any(|range| ip_in_range(input.client_ip, range)) {
                return Ok(true);
            }
        }

        if let Some(percentage) = self.request_percentage {
            let request_id = match header_str(input.headers, REQUEST_ID_HEADER)? {
                Some(id) => Some(id),
                None => header_str(input.headers, X_REQUEST_ID)?,
            };
            if let Some(id) = request_id {
                return Ok(bucket(id) < percentage as u64);
            }
        }

        Ok(false)
    }
}

fn header_str<'h>(headers: &'h HeaderMap, name: &str) -> Result<Option<&'h str>, GrayError> {
    match headers.get(name) {
        Some(value) => value
            .to_str()
            .map(Some)
            .map_err(|_| GrayError::InvalidHeader(name.to_string())),
        None => Ok(None),
    }
}

fn user_id(headers: &HeaderMap) -> Result<Option<&str>, GrayError> {
    for name in USER_ID_HEADERS {
        if let Some(id) = header_str(headers, name)? {
            return Ok(Some(id));
        }
    }
    Ok(None)
}

/// Stable bucket in `0..100`.
pub fn bucket(key: &str) -> u64 {
    xxh3_64(key.as_bytes()) % 100
}

fn ip_in_range(ip: &str, range: &str) -> bool {
    let prefix = range.trim_end_matches('*');
    range == "*" || ip == range || (!prefix.is_empty() && ip.starts_with(prefix))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{IpRule, PercentageRule};
    use axum::http::HeaderValue;

    fn input<'a>(headers: &'a HeaderMap, ip: &'a str) -> GrayInput<'a> {
        GrayInput {
            headers,
            client_ip: ip,
        }
    }

    fn header_policy() -> GrayPolicy {
        GrayPolicy::from_config(&GrayReleaseConfig {
            enabled: true,
            header: Some(HeaderRule {
                name: "x-canary".into(),
                values: vec!["true".into(), "beta".into()],
            }),
            ..Default::default()
        })
    }

    #[test]
    fn test_header_strategy() {
        let policy = header_policy();
        let mut headers = HeaderMap::new();
        assert!(!policy.evaluate(&input(&headers, "1.1.1.1")).unwrap());

        headers.insert("x-canary", HeaderValue::from_static("beta"));
        assert!(policy.evaluate(&input(&headers, "1.1.1.1")).unwrap());

        headers.insert("x-canary", HeaderValue::from_static("no"));
        assert!(!policy.evaluate(&input(&headers, "1.1.1.1")).unwrap());
    }

    #[test]
    fn test_non_utf8_header_is_an_error() {
        let policy = header_policy();
        let mut headers = HeaderMap::new();
        headers.insert("x-canary", HeaderValue::from_bytes(&[0xff, 0xfe]).unwrap());
        assert!(policy.evaluate(&input(&headers, "1.1.1.1")).is_err());
    }

    #[test]
    fn test_user_id_hashing_is_idempotent() {
        let policy = GrayPolicy::from_config(&GrayReleaseConfig {
            enabled: true,
            user_id: Some(PercentageRule { percentage: 50 }),
            ..Default::default()
        });

        for i in 0..50 {
            let user = format!("user-{}", i);
            let mut headers = HeaderMap::new();
            headers.insert("user-id", HeaderValue::from_str(&user).unwrap());
            let first = policy.evaluate(&input(&headers, "1.1.1.1")).unwrap();
            for _ in 0..5 {
                assert_eq!(policy.evaluate(&input(&headers, "1.1.1.1")).unwrap(), first);
            }
            assert_eq!(first, bucket(&user) < 50);
        }
    }

    #[test]
    fn test_user_id_fallback_header() {
        let policy = GrayPolicy::from_config(&GrayReleaseConfig {
            enabled: true,
            user_id: Some(PercentageRule { percentage: 100 }),
            ..Default::default()
        });
        let mut headers = HeaderMap::new();
        assert!(!policy.evaluate(&input(&headers, "1.1.1.1")).unwrap());
        headers.insert("x-user-id", HeaderValue::from_static("42"));
        assert!(policy.evaluate(&input(&headers, "1.1.1.1")).unwrap());
    }

    #[test]
    fn test_ip_ranges() {
        let policy = GrayPolicy::from_config(&GrayReleaseConfig {
            enabled: true,
            ip: Some(IpRule {
                ranges: vec!["192.168.".into(), "10.0.0.7".into()],
            }),
            ..Default::default()
        });
        let headers = HeaderMap::new();
        assert!(policy.evaluate(&input(&headers, "192.168.3.4")).unwrap());
        assert!(policy.evaluate(&input(&headers, "10.0.0.7")).unwrap());
        assert!(!policy.evaluate(&input(&headers, "172.16.0.1")).unwrap());

        assert!(ip_in_range("8.8.8.8", "*"));
        assert!(ip_in_range("10.0.3.4", "10.0.*"));
        assert!(!ip_in_range("10.1.3.4", "10.0.*"));
    }

    #[test]
    fn test_request_percentage_bounds() {
        let mut headers = HeaderMap::new();
        headers.insert("request-id", HeaderValue::from_static("abc"));

        let none = GrayPolicy::from_config(&GrayReleaseConfig {
            enabled: true,
            percentage: Some(PercentageRule { percentage: 0 }),
            ..Default::default()
        });
        let all = GrayPolicy::from_config(&GrayReleaseConfig {
            enabled: true,
            percentage: Some(PercentageRule { percentage: 100 }),
            ..Default::default()
        });
        assert!(!none.evaluate(&input(&headers, "1.1.1.1")).unwrap());
        assert!(all.evaluate(&input(&headers, "1.1.1.1")).unwrap());
    }

    #[test]
    fn test_precedence_first_match_wins() {
        let policy = GrayPolicy::from_config(&GrayReleaseConfig {
            enabled: true,
            header: Some(HeaderRule {
                name: "x-canary".into(),
                values: vec!["true".into()],
            }),
            percentage: Some(PercentageRule { percentage: 0 }),
            ..Default::default()
        });
        let mut headers = HeaderMap::new();
        headers.insert("x-canary", HeaderValue::from_static("true"));
        headers.insert("request-id", HeaderValue::from_static("abc"));
        assert!(policy.evaluate(&input(&headers, "1.1.1.1")).unwrap());
    }
}
