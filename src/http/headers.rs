//! Proxy header rewriting.
//!
//! # Responsibilities
//! - Strip hop-by-hop headers in both directions
//! - Point `Host` at the connect address
//! - Append `X-Forwarded-For` and `Via`
//! - Generate or propagate `x-request-id`
//!
//! # Design Decisions
//! - Request ID assigned at the first hop that lacks one (UUID v4)
//! - Connection management headers are re-derived per hop, never forwarded

use hyper::header::{HeaderMap, HeaderName, HeaderValue, CONNECTION, HOST, VIA};
use hyper::Version;
use uuid::Uuid;

use super::{HttpRequest, HttpResponse};
use crate::address::ResourceAddress;

/// Header carrying the correlation id across hops.
pub const X_REQUEST_ID: &str = "x-request-id";
pub const X_FORWARDED_FOR: &str = "x-forwarded-for";

/// Pseudonym placed in `Via`.
pub const VIA_PSEUDONYM: &str = "protocol-gateway";

const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-connection",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Remove hop-by-hop headers, including any named in `Connection`.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let listed: Vec<HeaderName> = headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|t| HeaderName::from_bytes(t.trim().as_bytes()).ok())
        .collect();
    for name in listed {
        headers.remove(name);
    }
    for name in HOP_BY_HOP {
        headers.remove(*name);
    }
}

/// Return the request id, generating one if the header is missing.
pub fn ensure_request_id(headers: &mut HeaderMap) -> String {
    if let Some(id) = headers.get(X_REQUEST_ID).and_then(|v| v.to_str().ok()) {
        return id.to_string();
    }
    let id = Uuid::new_v4().to_string();
    if let Ok(value) = HeaderValue::from_str(&id) {
        headers.insert(X_REQUEST_ID, value);
    }
    id
}

fn append(headers: &mut HeaderMap, name: HeaderName, addition: &str) {
    let combined = match headers.get(&name).and_then(|v| v.to_str().ok()) {
        Some(existing) => format!("{existing}, {addition}"),
        None => addition.to_string(),
    };
    if let Ok(value) = HeaderValue::from_str(&combined) {
        headers.insert(name, value);
    }
}

fn via_entry(version: Version) -> String {
    let proto = match version {
        Version::HTTP_10 => "1.0",
        _ => "1.1",
    };
    format!("{proto} {VIA_PSEUDONYM}")
}

/// Prepare a client request for the connect side.
///
/// Returns the request id so responses can carry it back.
pub fn rewrite_request(
    request: &mut HttpRequest,
    connect: &ResourceAddress,
    client_ip: Option<&str>,
    keep_alive: bool,
) -> String {
    let client_version = request.version;
    strip_hop_by_hop(&mut request.headers);

    let host = match connect.port() {
        Some(port) if port != 80 => format!("{}:{}", connect.host(), port),
        _ => connect.host().to_string(),
    };
    if let Ok(value) = HeaderValue::from_str(&host) {
        request.headers.insert(HOST, value);
    }
    if let Some(ip) = client_ip {
        append(&mut request.headers, HeaderName::from_static(X_FORWARDED_FOR), ip);
    }
    append(&mut request.headers, VIA, &via_entry(client_version));
    let id = ensure_request_id(&mut request.headers);

    request.version = Version::HTTP_11;
    if !keep_alive {
        request.headers.insert(CONNECTION, HeaderValue::from_static("close"));
    }
    id
}

/// Prepare a backend response for the accept side.
pub fn rewrite_response(response: &mut HttpResponse, client_version: Version, client_keep_alive: bool, request_id: &str) {
    let backend_version = response.version;
    strip_hop_by_hop(&mut response.headers);
    append(&mut response.headers, VIA, &via_entry(backend_version));
    if let Ok(value) = HeaderValue::from_str(request_id) {
        response.headers.insert(X_REQUEST_ID, value);
    }

    response.version = client_version;
    match (client_version, client_keep_alive) {
        (_, false) => {
            response.headers.insert(CONNECTION, HeaderValue::from_static("close"));
        }
        (Version::HTTP_10, true) => {
            response.headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyper::Method;

    #[test]
    fn hop_by_hop_and_connection_listed_headers_are_removed() {
        let mut headers = HeaderMap::new();
        headers.insert(CONNECTION, HeaderValue::from_static("keep-alive, x-secret"));
        headers.insert("x-secret", HeaderValue::from_static("1"));
        headers.insert("keep-alive", HeaderValue::from_static("timeout=5"));
        headers.insert("x-kept", HeaderValue::from_static("1"));
        strip_hop_by_hop(&mut headers);
        assert_eq!(headers.len(), 1);
        assert!(headers.contains_key("x-kept"));
    }

    #[test]
    fn request_rewrite_sets_host_via_and_forwarded_for() {
        let mut req = HttpRequest::new(Method::GET, "/a")
            .with_header(HOST, "gateway.example")
            .with_header(HeaderName::from_static(X_FORWARDED_FOR), "10.0.0.1");
        let connect = ResourceAddress::new("http", "backend", Some(8080), "/");
        let id = rewrite_request(&mut req, &connect, Some("192.168.1.5"), true);

        assert_eq!(req.header("host"), Some("backend:8080"));
        assert_eq!(req.header(X_FORWARDED_FOR), Some("10.0.0.1, 192.168.1.5"));
        assert_eq!(req.header("via"), Some("1.1 protocol-gateway"));
        assert_eq!(req.request_id(), Some(id.as_str()));
        assert!(req.header("connection").is_none());
    }

    #[test]
    fn existing_request_id_is_propagated() {
        let mut req = HttpRequest::new(Method::GET, "/").with_header(HeaderName::from_static(X_REQUEST_ID), "abc");
        let connect = ResourceAddress::new("http", "backend", Some(80), "/");
        assert_eq!(rewrite_request(&mut req, &connect, None, false), "abc");
        assert_eq!(req.header("host"), Some("backend"));
        assert_eq!(req.header("connection"), Some("close"));
    }

    #[test]
    fn response_rewrite_follows_client_version() {
        let mut resp = HttpResponse::new(hyper::StatusCode::OK).with_header(HeaderName::from_static("keep-alive"), "timeout=5");
        rewrite_response(&mut resp, Version::HTTP_10, true, "id-1");
        assert_eq!(resp.version, Version::HTTP_10);
        assert_eq!(resp.header("connection"), Some("keep-alive"));
        assert_eq!(resp.header(X_REQUEST_ID), Some("id-1"));
        assert!(resp.header("keep-alive").is_none());
    }
}
