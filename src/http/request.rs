//! HTTP request messages.
//!
//! # Responsibilities
//! - Hold a fully buffered request (head + body)
//! - Answer the questions the bridge asks: idempotent? persistent? id?
//! - Serialize to HTTP/1.1 wire bytes

use bytes::{BufMut, Bytes, BytesMut};
use hyper::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_LENGTH, TRANSFER_ENCODING};
use hyper::{Method, Version};

use super::headers::X_REQUEST_ID;

#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    /// Request target as sent on the request line (origin form).
    pub target: String,
    pub version: Version,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl HttpRequest {
    pub fn new(method: Method, target: impl Into<String>) -> Self {
        Self {
            method,
            target: target.into(),
            version: Version::HTTP_11,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    /// Builder-style header insert; invalid values are ignored.
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

    /// Safe to replay on a fresh connection.
    pub fn is_idempotent(&self) -> bool {
        self.method.is_idempotent()
    }

    /// Whether the client expects the connection to stay open.
    pub fn is_persistent(&self) -> bool {
        super::is_persistent(self.version, &self.headers)
    }

    pub fn request_id(&self) -> Option<&str> {
        self.header(X_REQUEST_ID)
    }

    /// Serialize with a Content-Length body.
    pub fn encode(&self) -> Bytes {
        let mut out = BytesMut::with_capacity(256 + self.body.len());
        out.put_slice(self.method.as_str().as_bytes());
        out.put_u8(b' ');
        out.put_slice(self.target.as_bytes());
        out.put_u8(b' ');
        out.put_slice(version_str(self.version).as_bytes());
        out.put_slice(b"\r\n");

        let framed = !self.body.is_empty() || self.headers.contains_key(CONTENT_LENGTH);
        for (name, value) in &self.headers {
            if name == TRANSFER_ENCODING || name == CONTENT_LENGTH {
                continue;
            }
            put_header(&mut out, name.as_str(), value.as_bytes());
        }
        if framed {
            put_header(&mut out, CONTENT_LENGTH.as_str(), self.body.len().to_string().as_bytes());
        }
        out.put_slice(b"\r\n");
        out.put_slice(&self.body);
        out.freeze()
    }
}

pub(crate) fn version_str(version: Version) -> &'static str {
    match version {
        Version::HTTP_10 => "HTTP/1.0",
        _ => "HTTP/1.1",
    }
}

pub(crate) fn put_header(out: &mut BytesMut, name: &str, value: &[u8]) {
    out.put_slice(name.as_bytes());
    out.put_slice(b": ");
    out.put_slice(value);
    out.put_slice(b"\r\n");
}
