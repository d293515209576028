//! Response handling and transformation.
//!
//! # Responsibilities
//! - Relay the backend response to the client without buffering
//! - Strip hop-by-hop headers from the relayed response
//!
//! Backend failures are mapped to status codes by `ProxyError`'s
//! `IntoResponse` impl.

use axum::body::Body;
use axum::http::Response;
use hyper::body::Incoming;

use crate::http::request::remove_hop_by_hop_headers;

/// Convert an upstream response into one the server can stream to the client.
pub fn relay_response(response: Response<Incoming>) -> Response<Body> {
    let (mut parts, body) = response.into_parts();
    remove_hop_by_hop_headers(&mut parts.headers);
    Response::from_parts(parts, Body::new(body))
}
