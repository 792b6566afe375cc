//! HTTP/1.x codec filter.
//!
//! Sits at the head of an http session's chain. Inbound it turns bytes into
//! `Message::Request` (server mode) or `Message::Response` (client mode);
//! outbound it serializes those messages back into bytes.

use std::collections::VecDeque;
use std::sync::Mutex;

use bytes::{Buf, Bytes, BytesMut};
use hyper::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_LENGTH, TRANSFER_ENCODING};
use hyper::{Method, StatusCode, Version};

use super::{has_token, HttpRequest, HttpResponse};
use crate::error::{GatewayError, Result};
use crate::session::{Filter, Message, NextFilter, NextWrite, Session};

/// Chain name under which transports install the codec.
pub const FILTER_NAME: &str = "http#codec";

const MAX_HEADERS: usize = 100;

/// Which side of the exchange the session plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecMode {
    /// Accepted connection: decodes requests, encodes responses.
    Server,
    /// Connected to a backend: encodes requests, decodes responses.
    Client,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BodyKind {
    Length(usize),
    Chunked,
    UntilClose,
}

enum Head {
    Request {
        method: Method,
        target: String,
        version: Version,
        headers: HeaderMap,
    },
    Response {
        status: StatusCode,
        version: Version,
        headers: HeaderMap,
    },
}

struct DecodeState {
    buf: BytesMut,
    head: Option<(Head, BodyKind)>,
    /// Methods of requests written in client mode, awaiting responses.
    in_flight: VecDeque<Method>,
}

/// Per-session HTTP/1.x codec.
pub struct HttpCodecFilter {
    mode: CodecMode,
    max_header_bytes: usize,
    max_body_bytes: usize,
    state: Mutex<DecodeState>,
}

impl HttpCodecFilter {
    pub fn new(mode: CodecMode, max_header_bytes: usize, max_body_bytes: usize) -> Self {
        Self {
            mode,
            max_header_bytes,
            max_body_bytes,
            state: Mutex::new(DecodeState {
                buf: BytesMut::new(),
                head: None,
                in_flight: VecDeque::new(),
            }),
        }
    }

    pub fn mode(&self) -> CodecMode {
        self.mode
    }

    /// Decode every complete message now buffered.
    fn decode(&self, state: &mut DecodeState) -> Result<Vec<Message>> {
        let mut out = Vec::new();
        loop {
            if state.head.is_none() {
                match self.parse_head(state)? {
                    Some(head) => state.head = Some(head),
                    None => break,
                }
            }
            let kind = match &state.head {
                Some((_, kind)) => *kind,
                None => break,
            };
            let body = match kind {
                BodyKind::Length(n) => {
                    if state.buf.len() < n {
                        break;
                    }
                    state.buf.split_to(n).freeze()
                }
                BodyKind::Chunked => match decode_chunked(&state.buf, self.max_body_bytes)? {
                    Some((body, consumed)) => {
                        state.buf.advance(consumed);
                        body
                    }
                    None => break,
                },
                BodyKind::UntilClose => {
                    if state.buf.len() > self.max_body_bytes {
                        return Err(GatewayError::Codec("response body too large".into()));
                    }
                    break;
                }
            };
            if let Some((head, _)) = state.head.take() {
                if let Some(message) = assemble(head, body) {
                    out.push(message);
                }
            }
        }
        Ok(out)
    }

    fn parse_head(&self, state: &mut DecodeState) -> Result<Option<(Head, BodyKind)>> {
        if state.buf.is_empty() {
            return Ok(None);
        }
        let mut slots = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let parsed = match self.mode {
            CodecMode::Server => {
                let mut req = httparse::Request::new(&mut slots);
                match req.parse(&state.buf).map_err(codec_error)? {
                    httparse::Status::Partial => None,
                    httparse::Status::Complete(len) => {
                        let method = Method::from_bytes(req.method.unwrap_or("GET").as_bytes())
                            .map_err(|e| GatewayError::Codec(e.to_string()))?;
                        let headers = header_map(req.headers)?;
                        let kind = request_body_kind(&headers)?;
                        let head = Head::Request {
                            method,
                            target: req.path.unwrap_or("/").to_string(),
                            version: version(req.version),
                            headers,
                        };
                        Some((len, head, kind))
                    }
                }
            }
            CodecMode::Client => {
                let mut resp = httparse::Response::new(&mut slots);
                match resp.parse(&state.buf).map_err(codec_error)? {
                    httparse::Status::Partial => None,
                    httparse::Status::Complete(len) => {
                        let status = StatusCode::from_u16(resp.code.unwrap_or(502))
                            .map_err(|e| GatewayError::Codec(e.to_string()))?;
                        let headers = header_map(resp.headers)?;
                        let request_method = if status.is_informational() {
                            None
                        } else {
                            state.in_flight.pop_front()
                        };
                        let kind = response_body_kind(status, request_method.as_ref(), &headers)?;
                        let head = Head::Response {
                            status,
                            version: version(resp.version),
                            headers,
                        };
                        Some((len, head, kind))
                    }
                }
            }
        };

        match parsed {
            Some((len, head, kind)) => {
                if let BodyKind::Length(n) = kind {
                    if n > self.max_body_bytes {
                        return Err(GatewayError::Codec(format!("body of {n} bytes exceeds limit")));
                    }
                }
                state.buf.advance(len);
                Ok(Some((head, kind)))
            }
            None if state.buf.len() > self.max_header_bytes => {
                Err(GatewayError::Codec("header section too large".into()))
            }
            None => Ok(None),
        }
    }
}

impl Filter for HttpCodecFilter {
    fn message_received(&self, next: &mut NextFilter<'_>, session: &Session, message: Message) -> Result<()> {
        let bytes = match message {
            Message::Bytes(bytes) => bytes,
            other => return next.message_received(session, other),
        };
        let decoded = {
            let mut state = self.state.lock().expect("codec state poisoned");
            state.buf.extend_from_slice(&bytes);
            self.decode(&mut state)?
        };
        for message in decoded {
            next.message_received(session, message)?;
        }
        Ok(())
    }

    fn filter_write(&self, next: &mut NextWrite<'_>, session: &Session, message: Message) -> Result<()> {
        match message {
            Message::Request(request) => {
                if self.mode == CodecMode::Client {
                    self.state
                        .lock()
                        .expect("codec state poisoned")
                        .in_flight
                        .push_back(request.method.clone());
                }
                next.filter_write(session, Message::Bytes(request.encode()))
            }
            Message::Response(response) => next.filter_write(session, Message::Bytes(response.encode())),
            other => next.filter_write(session, other),
        }
    }

    fn session_closed(&self, next: &mut NextFilter<'_>, session: &Session) -> Result<()> {
        // A response delimited by connection close is complete now.
        let pending = {
            let mut state = self.state.lock().expect("codec state poisoned");
            match state.head.take() {
                Some((head, BodyKind::UntilClose)) => {
                    let body = state.buf.split().freeze();
                    assemble(head, body)
                }
                other => {
                    state.head = other;
                    None
                }
            }
        };
        if let Some(message) = pending {
            next.message_received(session, message)?;
        }
        next.session_closed(session)
    }
}

fn assemble(head: Head, body: Bytes) -> Option<Message> {
    match head {
        Head::Request {
            method,
            target,
            version,
            headers,
        } => Some(Message::Request(HttpRequest {
            method,
            target,
            version,
            headers,
            body,
        })),
        Head::Response {
            status,
            version,
            headers,
        } => {
            if status.is_informational() {
                tracing::trace!(status = %status, "Dropping interim response");
                return None;
            }
            Some(Message::Response(HttpResponse {
                status,
                version,
                headers,
                body,
            }))
        }
    }
}

fn codec_error(e: httparse::Error) -> GatewayError {
    GatewayError::Codec(e.to_string())
}

fn version(minor: Option<u8>) -> Version {
    match minor {
        Some(0) => Version::HTTP_10,
        _ => Version::HTTP_11,
    }
}

fn header_map(parsed: &[httparse::Header<'_>]) -> Result<HeaderMap> {
    let mut headers = HeaderMap::with_capacity(parsed.len());
    for header in parsed {
        let name = HeaderName::from_bytes(header.name.as_bytes()).map_err(|e| GatewayError::Codec(e.to_string()))?;
        let value = HeaderValue::from_bytes(header.value).map_err(|e| GatewayError::Codec(e.to_string()))?;
        headers.append(name, value);
    }
    Ok(headers)
}

fn content_length(headers: &HeaderMap) -> Result<Option<usize>> {
    match headers.get(CONTENT_LENGTH) {
        Some(value) => value
            .to_str()
            .ok()
            .and_then(|v| v.trim().parse::<usize>().ok())
            .map(Some)
            .ok_or_else(|| GatewayError::Codec("invalid content-length".into())),
        None => Ok(None),
    }
}

fn request_body_kind(headers: &HeaderMap) -> Result<BodyKind> {
    if has_token(headers, TRANSFER_ENCODING, "chunked") {
        return Ok(BodyKind::Chunked);
    }
    Ok(BodyKind::Length(content_length(headers)?.unwrap_or(0)))
}

fn response_body_kind(status: StatusCode, request_method: Option<&Method>, headers: &HeaderMap) -> Result<BodyKind> {
    if status.is_informational()
        || status == StatusCode::NO_CONTENT
        || status == StatusCode::NOT_MODIFIED
        || request_method == Some(&Method::HEAD)
    {
        return Ok(BodyKind::Length(0));
    }
    if has_token(headers, TRANSFER_ENCODING, "chunked") {
        return Ok(BodyKind::Chunked);
    }
    Ok(match content_length(headers)? {
        Some(n) => BodyKind::Length(n),
        None => BodyKind::UntilClose,
    })
}

/// Decode a complete chunked body from the front of `buf`.
///
/// Returns `None` until the terminating chunk and trailers are buffered.
fn decode_chunked(buf: &[u8], limit: usize) -> Result<Option<(Bytes, usize)>> {
    let mut body = BytesMut::new();
    let mut pos = 0;
    loop {
        let Some(line_end) = find_crlf(&buf[pos..]) else {
            return Ok(None);
        };
        let line = std::str::from_utf8(&buf[pos..pos + line_end])
            .map_err(|_| GatewayError::Codec("invalid chunk size line".into()))?;
        let size_str = line.split(';').next().unwrap_or("").trim();
        let size = usize::from_str_radix(size_str, 16)
            .map_err(|_| GatewayError::Codec(format!("invalid chunk size {size_str:?}")))?;
        pos += line_end + 2;

        if size == 0 {
            // Trailer section ends with an empty line.
            loop {
                let Some(end) = find_crlf(&buf[pos..]) else {
                    return Ok(None);
                };
                pos += end + 2;
                if end == 0 {
                    return Ok(Some((body.freeze(), pos)));
                }
            }
        }

        if body.len().checked_add(size).map_or(true, |total| total > limit) {
            return Err(GatewayError::Codec("chunked body exceeds limit".into()));
        }
        let data_end = pos
            .checked_add(size)
            .ok_or_else(|| GatewayError::Codec("chunk size overflows".into()))?;
        let chunk_end = data_end
            .checked_add(2)
            .ok_or_else(|| GatewayError::Codec("chunk size overflows".into()))?;
        if buf.len() < chunk_end {
            return Ok(None);
        }
        body.extend_from_slice(&buf[pos..data_end]);
        if &buf[data_end..chunk_end] != b"\r\n" {
            return Err(GatewayError::Codec("chunk missing terminator".into()));
        }
        pos = chunk_end;
    }
}

fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}
