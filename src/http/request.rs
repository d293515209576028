//! Request handling and transformation.
//!
//! # Responsibilities
//! - Generate unique request IDs (UUID v4)
//! - Rewrite the inbound URI onto a backend's base URL
//! - Strip hop-by-hop headers and record the client in `X-Forwarded-For`
//!
//! # Design Decisions
//! - The inbound `Host` header is forwarded untouched
//! - Outbound requests are always HTTP/1.1; the upstream client speaks HTTP/1

use std::net::{IpAddr, SocketAddr};

use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::header::{self, HeaderMap, HeaderName, HeaderValue};
use axum::http::{Request, Uri, Version};
use tower_http::request_id::{MakeRequestId, RequestId};
use url::Url;
use uuid::Uuid;

/// Header carrying the per-request correlation ID.
pub const X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

/// Header listing the client and every proxy a request passed through.
pub const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");

/// Headers that describe a single connection and must not be relayed.
static HOP_BY_HOP: [HeaderName; 9] = [
    header::CONNECTION,
    HeaderName::from_static("keep-alive"),
    HeaderName::from_static("proxy-connection"),
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

/// Generates `x-request-id` values for requests that arrive without one.
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidRequestId;

impl MakeRequestId for UuidRequestId {
    fn make_request_id<B>(&mut self, _request: &Request<B>) -> Option<RequestId> {
        let id = Uuid::new_v4().to_string();
        HeaderValue::from_str(&id).ok().map(RequestId::new)
    }
}

/// Read the request ID assigned to a request, if any.
pub fn request_id<B>(request: &Request<B>) -> &str {
    request
        .headers()
        .get(X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown")
}

/// Peer address recorded by the listener.
pub fn client_addr<B>(request: &Request<B>) -> Option<SocketAddr> {
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr)
}

/// Join two URL paths with exactly one `/` between them.
fn join_paths(base: &str, path: &str) -> String {
    match (base.ends_with('/'), path.starts_with('/')) {
        (true, true) => format!("{}{}", base, &path[1..]),
        (false, false) => format!("{}/{}", base, path),
        _ => format!("{}{}", base, path),
    }
}

/// Map an inbound request URI onto a backend's base URL.
pub fn upstream_uri(base: &Url, uri: &Uri) -> Result<Uri, String> {
    let host = base.host_str().ok_or("backend URL has no host")?;
    let authority = match base.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    };

    let path = join_paths(base.path(), uri.path());
    let base_query = base.query().filter(|q| !q.is_empty());
    let query = match (base_query, uri.query().filter(|q| !q.is_empty())) {
        (Some(a), Some(b)) => format!("?{}&{}", a, b),
        (Some(q), None) | (None, Some(q)) => format!("?{}", q),
        (None, None) => String::new(),
    };

    format!("{}://{}{}{}", base.scheme(), authority, path, query)
        .parse::<Uri>()
        .map_err(|e| format!("invalid upstream URI: {}", e))
}

/// Remove connection-scoped headers, including any named by `Connection`.
pub fn remove_hop_by_hop_headers(headers: &mut HeaderMap) {
    let listed: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();

    for name in listed.iter().chain(HOP_BY_HOP.iter()) {
        headers.remove(name);
    }
}

/// Append the client IP to `X-Forwarded-For`.
fn append_forwarded_for(headers: &mut HeaderMap, ip: IpAddr) {
    let value = match headers.get(&X_FORWARDED_FOR).and_then(|v| v.to_str().ok()) {
        Some(prior) if !prior.is_empty() => format!("{}, {}", prior, ip),
        _ => ip.to_string(),
    };
    if let Ok(value) = HeaderValue::from_str(&value) {
        headers.insert(X_FORWARDED_FOR, value);
    }
}

/// Rewrite an inbound request so it can be sent to the backend at `base`.
pub fn prepare_upstream_request(
    mut request: Request<Body>,
    base: &Url,
) -> Result<Request<Body>, String> {
    let uri = upstream_uri(base, request.uri())?;
    let client = client_addr(&request);

    *request.uri_mut() = uri;
    *request.version_mut() = Version::HTTP_11;

    let headers = request.headers_mut();
    remove_hop_by_hop_headers(headers);
    if let Some(addr) = client {
        append_forwarded_for(headers, addr.ip());
    }

    Ok(request)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_upstream_uri_joins_paths() {
        let uri: Uri = "/users/7?x=1".parse().unwrap();

        let out = upstream_uri(&base("http://127.0.0.1:9001"), &uri).unwrap();
        assert_eq!(out.to_string(), "http://127.0.0.1:9001/users/7?x=1");

        let out = upstream_uri(&base("http://backend.local/api/"), &uri).unwrap();
        assert_eq!(out.to_string(), "http://backend.local/api/users/7?x=1");

        let out = upstream_uri(&base("http://backend.local/api"), &uri).unwrap();
        assert_eq!(out.to_string(), "http://backend.local/api/users/7?x=1");
    }

    #[test]
    fn test_upstream_uri_merges_queries() {
        let base = base("http://backend.local/?key=abc");

        let uri: Uri = "/search?q=rust".parse().unwrap();
        let out = upstream_uri(&base, &uri).unwrap();
        assert_eq!(out.to_string(), "http://backend.local/search?key=abc&q=rust");

        let uri: Uri = "/search".parse().unwrap();
        let out = upstream_uri(&base, &uri).unwrap();
        assert_eq!(out.to_string(), "http://backend.local/search?key=abc");
    }

    #[test]
    fn test_hop_by_hop_headers_removed() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive, x-session"));
        headers.insert("keep-alive", HeaderValue::from_static("timeout=5"));
        headers.insert("x-session", HeaderValue::from_static("abc"));
        headers.insert(header::TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
        headers.insert(header::ACCEPT, HeaderValue::from_static("*/*"));

        remove_hop_by_hop_headers(&mut headers);

        assert_eq!(headers.len(), 1);
        assert_eq!(headers[header::ACCEPT], "*/*");
    }

    #[test]
    fn test_prepare_upstream_request() {
        let mut request = Request::builder()
            .uri("/hello")
            .header(header::HOST, "proxy.local")
            .header(header::CONNECTION, "close")
            .header(X_FORWARDED_FOR, "10.0.0.1")
            .body(Body::empty())
            .unwrap();
        request
            .extensions_mut()
            .insert(ConnectInfo("192.168.1.5:40000".parse::<SocketAddr>().unwrap()));

        let out = prepare_upstream_request(request, &base("http://127.0.0.1:9001")).unwrap();

        assert_eq!(out.uri().to_string(), "http://127.0.0.1:9001/hello");
        assert_eq!(out.version(), Version::HTTP_11);
        assert_eq!(out.headers()[header::HOST], "proxy.local");
        assert!(out.headers().get(header::CONNECTION).is_none());
        assert_eq!(out.headers()[X_FORWARDED_FOR], "10.0.0.1, 192.168.1.5");
    }

    #[test]
    fn test_uuid_request_id() {
        let request = Request::builder().body(()).unwrap();
        let id = UuidRequestId.make_request_id(&request).unwrap();
        let value = id.header_value().to_str().unwrap();
        assert!(Uuid::parse_str(value).is_ok());
    }
}
