//! Response construction and backend response transformation.
//!
//! # Responsibilities
//! - Build the plain-text responses the gateway produces itself
//! - Turn a collected backend response into a client response
//! - Strip hop-by-hop headers from backend responses
//!
//! # Design Decisions
//! - Gateway-generated bodies are `text/plain; charset=UTF-8`
//! - Backend bodies are fully collected before the client sees them, so
//!   a body timeout can still turn into a 504

use axum::body::{Body, Bytes};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::Response;

use crate::http::request::strip_hop_by_hop;

pub const TEXT_PLAIN_UTF8: &str = "text/plain; charset=UTF-8";

/// Build a plain-text response with the given status.
pub fn text_response(status: StatusCode, message: impl Into<String>) -> Response {
    let message = message.into();
    let mut response = Response::new(Body::from(message));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static(TEXT_PLAIN_UTF8));
    response
}

/// Backend response after its body has been read in full.
#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl UpstreamResponse {
    /// Convert into the response written back to the client.
    pub fn into_client_response(self) -> Response {
        let mut headers = self.headers;
        strip_hop_by_hop(&mut headers);
        // Body is re-framed from the collected bytes.
        headers.remove(header::CONTENT_LENGTH);

        let mut response = Response::new(Body::from(self.body));
        *response.status_mut() = self.status;
        *response.headers_mut() = headers;
        response
    }
}
