//! Outbound request construction.
//!
//! # Responsibilities
//! - Rewrite the inbound path onto the instance base URL
//! - Prepare forwarded headers (hop-by-hop removal, Host, X-Forwarded-For,
//!   X-Request-ID, X-Request-Timeout)
//!
//! The route's mount segments are stripped: `/svc/a/path?x=1` under the
//! route `/svc/a` to `http://h:9000` becomes `http://h:9000/path?x=1` with
//! `Host: h:9000`.

use axum::body::Bytes;
use axum::http::{header, HeaderMap, HeaderValue, Method, Request, Uri, Version};
use std::net::SocketAddr;
use std::time::Duration;

use crate::client::body::TrackedBody;
use crate::error::GatewayError;
use crate::http::request::{append_forwarded_for, strip_hop_by_hop, X_REQUEST_ID, X_REQUEST_TIMEOUT};
use crate::load_balancer::Instance;

/// Everything needed to (re)build the outbound request on each attempt.
#[derive(Debug, Clone)]
pub struct ForwardRequest {
    pub method: Method,
    /// Origin-form target (`/path?query`).
    pub path_and_query: String,
    pub headers: HeaderMap,
    pub body: Bytes,
    /// Pool key of the instance.
    pub authority: String,
}

impl ForwardRequest {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        method: &Method,
        uri: &Uri,
        inbound_headers: &HeaderMap,
        body: Bytes,
        mount_depth: usize,
        instance: &Instance,
        peer: SocketAddr,
        request_id: &str,
        response_timeout: Duration,
    ) -> Result<Self, GatewayError> {
        let path_and_query = rewrite_path(
            uri.path(),
            uri.query(),
            mount_depth,
            instance.base_url.path(),
        );

        let mut headers = inbound_headers.clone();
        strip_hop_by_hop(&mut headers);
        headers.remove(header::HOST);
        headers.remove(header::CONTENT_LENGTH);

        let host = HeaderValue::from_str(&instance.host_header())
            .map_err(|e| GatewayError::Unexpected(format!("invalid host header: {}", e)))?;
        headers.insert(header::HOST, host);
        append_forwarded_for(&mut headers, peer);
        if let Ok(id) = HeaderValue::from_str(request_id) {
            headers.insert(X_REQUEST_ID, id);
        }
        headers.insert(
            X_REQUEST_TIMEOUT,
            HeaderValue::from(response_timeout.as_millis() as u64),
        );

        Ok(Self {
            method: method.clone(),
            path_and_query,
            headers,
            body,
            authority: instance.authority(),
        })
    }

    /// Absolute URL of the target, for logs.
    pub fn target_url(&self) -> String {
        format!("http://{}{}", self.authority, self.path_and_query)
    }

    /// Build one attempt's hyper request.
    pub fn build(&self) -> Result<(Request<TrackedBody>, tokio::sync::oneshot::Receiver<()>), GatewayError> {
        let (body, written) = TrackedBody::new(self.body.clone());
        let mut request = Request::builder()
            .method(self.method.clone())
            .uri(self.path_and_query.as_str())
            .version(Version::HTTP_11)
            .body(body)
            .map_err(|e| GatewayError::Unexpected(format!("invalid outbound request: {}", e)))?;
        *request.headers_mut() = self.headers.clone();
        Ok((request, written))
    }
}

/// Drop `mount_depth` leading segments of `path`, append the rest to
/// `base_path` and keep the query.
pub fn rewrite_path(path: &str, query: Option<&str>, mount_depth: usize, base_path: &str) -> String {
    let remainder: Vec<&str> = path
        .split('/')
        .filter(|s| !s.is_empty())
        .skip(mount_depth)
        .collect();

    let mut rewritten = base_path.trim_end_matches('/').to_string();
    rewritten.push('/');
    rewritten.push_str(&remainder.join("/"));
    if !remainder.is_empty() && path.ends_with('/') {
        rewritten.push('/');
    }

    if let Some(query) = query {
        rewritten.push('?');
        rewritten.push_str(query);
    }
    rewritten
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rewrite_strips_mount_segments() {
        assert_eq!(rewrite_path("/svc/a/path", Some("x=1"), 2, "/"), "/path?x=1");
        assert_eq!(rewrite_path("/orders/123", None, 1, ""), "/123");
        assert_eq!(rewrite_path("/orders", None, 1, "/"), "/");
        assert_eq!(rewrite_path("/orders/1/", None, 1, "/"), "/1/");
    }

    #[test]
    fn test_rewrite_appends_to_base_path() {
        assert_eq!(rewrite_path("/api/users", Some("a=b"), 1, "/v2/"), "/v2/users?a=b");
        assert_eq!(rewrite_path("/api", None, 1, "/v2"), "/v2/");
    }

    #[test]
    fn test_end_to_end_example() {
        let instance = Instance::new("svc", "http://h:9000", 1).unwrap();
        let uri: Uri = "/svc/a/path?x=1".parse().unwrap();
        let mut inbound = HeaderMap::new();
        inbound.insert(header::HOST, HeaderValue::from_static("gateway.local"));
        inbound.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
        inbound.insert("x-custom", HeaderValue::from_static("1"));

        let forward = ForwardRequest::new(
            &Method::GET,
            &uri,
            &inbound,
            Bytes::new(),
            2,
            &instance,
            "10.0.0.1:4000".parse().unwrap(),
            "req-1",
            Duration::from_millis(5000),
        )
        .unwrap();

        assert_eq!(forward.target_url(), "http://h:9000/path?x=1");
        assert_eq!(forward.headers.get(header::HOST).unwrap(), "h:9000");
        assert_eq!(forward.headers.get("x-forwarded-for").unwrap(), "10.0.0.1");
        assert_eq!(forward.headers.get(X_REQUEST_ID).unwrap(), "req-1");
        assert_eq!(forward.headers.get(X_REQUEST_TIMEOUT).unwrap(), "5000");
        assert_eq!(forward.headers.get("x-custom").unwrap(), "1");
        assert!(forward.headers.get(header::CONNECTION).is_none());

        let (request, _written) = forward.build().unwrap();
        assert_eq!(request.uri(), "/path?x=1");
        assert_eq!(request.method(), Method::GET);
    }
}
