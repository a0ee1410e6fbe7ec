//! Per-request state carrier.
//!
//! # Responsibilities
//! - Hold the aggregated inbound request for the whole pipeline
//! - Record the matched route and chosen instance
//! - Carry arbitrary attributes between filters
//! - Guard the single response of the request
//!
//! # Design Decisions
//! - Owned by one request task and passed down explicitly
//! - The response goes through a one-shot slot: the first write wins and
//!   marks the request terminated, later writes are dropped

use axum::body::Bytes;
use axum::http::{HeaderMap, Method, Uri};
use axum::response::Response;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;

use crate::http::request::client_ip;
use crate::load_balancer::Instance;
use crate::routing::RouteDefinition;

#[derive(Debug)]
struct SlotInner {
    terminated: AtomicBool,
    sender: Mutex<Option<oneshot::Sender<Response>>>,
}

/// Write-once handle to the client response.
#[derive(Debug, Clone)]
pub struct ResponseSlot {
    inner: Arc<SlotInner>,
}

impl ResponseSlot {
    /// A slot and the receiver the connection task awaits.
    pub fn new() -> (Self, oneshot::Receiver<Response>) {
        let (tx, rx) = oneshot::channel();
        let slot = Self {
            inner: Arc::new(SlotInner {
                terminated: AtomicBool::new(false),
                sender: Mutex::new(Some(tx)),
            }),
        };
        (slot, rx)
    }

    /// Send `response` unless one was already sent. Returns whether this
    /// call wrote it.
    pub fn respond(&self, response: Response) -> bool {
        if self.inner.terminated.swap(true, Ordering::AcqRel) {
            tracing::debug!(status = %response.status(), "Dropping second response for terminated request");
            return false;
        }
        let sender = self.inner.sender.lock().expect("response slot mutex poisoned").take();
        match sender {
            Some(tx) => tx.send(response).is_ok(),
            None => false,
        }
    }

    pub fn is_terminated(&self) -> bool {
        self.inner.terminated.load(Ordering::Acquire)
    }
}

pub struct RequestContext {
    pub request_id: String,
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub peer: SocketAddr,
    /// Originating client, resolved through forwarding headers.
    pub client_ip: String,
    pub route: Option<Arc<RouteDefinition>>,
    pub instance: Option<Arc<Instance>>,
    /// Set once the request has been handed to a backend.
    pub forwarded: bool,
    attributes: HashMap<String, Box<dyn Any + Send + Sync>>,
    slot: ResponseSlot,
}

impl RequestContext {
    pub fn new(
        request_id: String,
        method: Method,
        uri: Uri,
        headers: HeaderMap,
        body: Bytes,
        peer: SocketAddr,
        slot: ResponseSlot,
    ) -> Self {
        let client_ip = client_ip(&headers, peer);
        Self {
            request_id,
            method,
            uri,
            headers,
            body,
            peer,
            client_ip,
            route: None,
            instance: None,
            forwarded: false,
            attributes: HashMap::new(),
            slot,
        }
    }

    pub fn path(&self) -> &str {
        self.uri.path()
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn set_attribute<T: Any + Send + Sync>(&mut self, key: impl Into<String>, value: T) {
        self.attributes.insert(key.into(), Box::new(value));
    }

    pub fn attribute<T: Any + Send + Sync>(&self, key: &str) -> Option<&T> {
        self.attributes.get(key).and_then(|v| v.downcast_ref::<T>())
    }

    pub fn remove_attribute(&mut self, key: &str) -> bool {
        self.attributes.remove(key).is_some()
    }

    /// Write the response. A no-op once the request is terminated.
    pub fn respond(&self, response: Response) -> bool {
        self.slot.respond(response)
    }

    pub fn is_terminated(&self) -> bool {
        self.slot.is_terminated()
    }

    pub fn slot(&self) -> &ResponseSlot {
        &self.slot
    }
}

impl fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestContext")
            .field("request_id", &self.request_id)
            .field("method", &self.method)
            .field("uri", &self.uri)
            .field("client_ip", &self.client_ip)
            .field("route", &self.route.as_ref().map(|r| r.id.as_str()))
            .field("instance", &self.instance.as_ref().map(|i| i.authority()))
            .field("forwarded", &self.forwarded)
            .field("attributes", &self.attributes.keys().collect::<Vec<_>>())
            .field("terminated", &self.is_terminated())
            .finish()
    }
}

#[cfg(test)]
pub(crate) fn test_context(path: &str) -> (RequestContext, oneshot::Receiver<Response>) {
    let (slot, rx) = ResponseSlot::new();
    let ctx = RequestContext::new(
        "req-test".to_string(),
        Method::GET,
        path.parse().expect("valid test uri"),
        HeaderMap::new(),
        Bytes::new(),
        "127.0.0.1:40000".parse().expect("valid test addr"),
        slot,
    );
    (ctx, rx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::response::text_response;
    use axum::http::StatusCode;

    #[tokio::test]
    async fn test_second_write_is_dropped() {
        let (ctx, rx) = test_context("/a");
        assert!(!ctx.is_terminated());

        assert!(ctx.respond(text_response(StatusCode::OK, "first")));
        assert!(ctx.is_terminated());

        // A failure after the first write must not produce another response.
        let slot = ctx.slot().clone();
        let late = tokio::spawn(async move { slot.respond(text_response(StatusCode::INTERNAL_SERVER_ERROR, "late")) });
        assert!(!late.await.unwrap());

        let response = rx.await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[test]
    fn test_attributes() {
        let (mut ctx, _rx) = test_context("/a");
        ctx.set_attribute("user", "alice".to_string());
        ctx.set_attribute("tier", 2u8);

        assert_eq!(ctx.attribute::<String>("user").map(String::as_str), Some("alice"));
        assert_eq!(ctx.attribute::<u8>("tier"), Some(&2));
        assert!(ctx.attribute::<u32>("tier").is_none());
        assert!(ctx.remove_attribute("user"));
        assert!(ctx.attribute::<String>("user").is_none());
    }

    #[test]
    fn test_client_ip_resolved_from_headers() {
        let (slot, _rx) = ResponseSlot::new();
        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", "192.168.1.9".parse().unwrap());
        let ctx = RequestContext::new(
            "id".into(),
            Method::GET,
            "/".parse().unwrap(),
            headers,
            Bytes::new(),
            "10.0.0.1:1".parse().unwrap(),
            slot,
        );
        assert_eq!(ctx.client_ip, "192.168.1.9");
    }
}
