//! HTTP response messages.
//!
//! # Responsibilities
//! - Hold a fully buffered response
//! - Read the backend's keep-alive intent (`Connection`, `Keep-Alive`)
//! - Build gateway-generated errors (502)
//! - Serialize to HTTP/1.1 wire bytes

use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};
use hyper::header::{
    HeaderMap, HeaderName, HeaderValue, CONNECTION, CONTENT_LENGTH, CONTENT_TYPE, TRANSFER_ENCODING,
};
use hyper::{StatusCode, Version};

use super::request::{put_header, version_str};

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: StatusCode,
    pub version: Version,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl HttpResponse {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            version: Version::HTTP_11,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    /// Gateway-generated 502; always closes the client connection.
    pub fn bad_gateway(reason: &str) -> Self {
        Self::new(StatusCode::BAD_GATEWAY)
            .with_header(CONTENT_TYPE, "text/plain; charset=utf-8")
            .with_header(CONNECTION, "close")
            .with_body(format!("Bad Gateway: {reason}\n"))
    }

    pub fn with_header(mut self, name: HeaderName, value: &str) -> Self {
        if let Ok(value) = HeaderValue::from_str(value) {
            self.headers.insert(name, value);
        }
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Whether the backend allows the connection to be reused.
    pub fn is_persistent(&self) -> bool {
        super::is_persistent(self.version, &self.headers)
    }

    /// `timeout=N` parameter of a `Keep-Alive` header.
    pub fn keep_alive_timeout(&self) -> Option<Duration> {
        self.header("keep-alive")?
            .split(',')
            .filter_map(|param| param.trim().split_once('='))
            .find(|(key, _)| key.trim().eq_ignore_ascii_case("timeout"))
            .and_then(|(_, value)| value.trim().parse::<u64>().ok())
            .map(Duration::from_secs)
    }

    /// Interim responses (1xx) precede the final one on the same exchange.
    pub fn is_informational(&self) -> bool {
        self.status.is_informational()
    }

    /// Serialize with a Content-Length body where the status allows one.
    pub fn encode(&self) -> Bytes {
        let mut out = BytesMut::with_capacity(256 + self.body.len());
        out.put_slice(version_str(self.version).as_bytes());
        out.put_u8(b' ');
        out.put_slice(self.status.as_str().as_bytes());
        out.put_u8(b' ');
        out.put_slice(self.status.canonical_reason().unwrap_or("").as_bytes());
        out.put_slice(b"\r\n");

        let bodiless = self.status.is_informational()
            || self.status == StatusCode::NO_CONTENT
            || self.status == StatusCode::NOT_MODIFIED;
        // An empty body with a declared length is a HEAD response; keep its length.
        let keep_declared = self.body.is_empty() && self.headers.contains_key(CONTENT_LENGTH);

        for (name, value) in &self.headers {
            if name == TRANSFER_ENCODING || (name == CONTENT_LENGTH && !keep_declared) {
                continue;
            }
            put_header(&mut out, name.as_str(), value.as_bytes());
        }
        if !bodiless && !keep_declared {
            put_header(&mut out, CONTENT_LENGTH.as_str(), self.body.len().to_string().as_bytes());
        }
        out.put_slice(b"\r\n");
        if !bodiless {
            out.put_slice(&self.body);
        }
        out.freeze()
    }
}
