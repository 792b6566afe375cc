//! HTTP/1.x protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! Socket bytes
//!     → codec.rs (HttpCodecFilter: bytes ⇄ HttpRequest / HttpResponse)
//!     → request.rs / response.rs (message types, persistence rules)
//!     → headers.rs (proxy rewriting: Host, Via, X-Forwarded-For, request id)
//!     → bridge (one exchange per request)
//! ```
//!
//! # Design Decisions
//! - Bodies are fully buffered; chunked bodies are de-chunked on decode
//!   and re-framed with Content-Length on encode
//! - Persistence follows HTTP/1.1 defaults: 1.1 keeps the connection unless
//!   `Connection: close`, 1.0 only with `Connection: keep-alive`

pub mod codec;
pub mod headers;
pub mod request;
pub mod response;

use hyper::header::{HeaderMap, CONNECTION};
use hyper::Version;

pub use codec::{CodecMode, HttpCodecFilter};
pub use headers::X_REQUEST_ID;
pub use request::HttpRequest;
pub use response::HttpResponse;

/// True if any comma-separated token of a header equals `token`.
pub(crate) fn has_token(headers: &HeaderMap, name: impl hyper::header::AsHeaderName, token: &str) -> bool {
    headers
        .get_all(name)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|t| t.trim().eq_ignore_ascii_case(token))
}

/// Whether a message with these headers leaves the connection open.
pub fn is_persistent(version: Version, headers: &HeaderMap) -> bool {
    if has_token(headers, CONNECTION, "close") {
        return false;
    }
    match version {
        Version::HTTP_11 => true,
        Version::HTTP_10 => has_token(headers, CONNECTION, "keep-alive"),
        _ => false,
    }
}
