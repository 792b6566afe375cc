//! Messages carried through a session's filter chain.

use bytes::Bytes;

use crate::http::{HttpRequest, HttpResponse};

/// WebSocket frame opcodes understood by the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    Text,
    Binary,
    Close,
    Ping,
    Pong,
}

impl Opcode {
    /// RFC 6455 opcode value.
    pub fn code(self) -> u8 {
        match self {
            Opcode::Text => 0x1,
            Opcode::Binary => 0x2,
            Opcode::Close => 0x8,
            Opcode::Ping => 0x9,
            Opcode::Pong => 0xA,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0x1 => Some(Opcode::Text),
            0x2 => Some(Opcode::Binary),
            0x8 => Some(Opcode::Close),
            0x9 => Some(Opcode::Ping),
            0xA => Some(Opcode::Pong),
            _ => None,
        }
    }

    pub fn is_control(self) -> bool {
        matches!(self, Opcode::Close | Opcode::Ping | Opcode::Pong)
    }
}

/// A single WebSocket (native or emulated) frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub opcode: Opcode,
    pub payload: Bytes,
}

impl Frame {
    pub fn new(opcode: Opcode, payload: impl Into<Bytes>) -> Self {
        Self {
            opcode,
            payload: payload.into(),
        }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self::new(Opcode::Text, Bytes::from(text.into()))
    }

    pub fn binary(payload: impl Into<Bytes>) -> Self {
        Self::new(Opcode::Binary, payload)
    }

    pub fn close() -> Self {
        Self::new(Opcode::Close, Bytes::new())
    }

    /// Return the same payload under a different opcode.
    pub fn retag(self, opcode: Opcode) -> Self {
        Self {
            opcode,
            payload: self.payload,
        }
    }

    /// Payload as UTF-8, if it is valid UTF-8.
    pub fn as_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.payload).ok()
    }
}

/// Everything that can travel through a filter chain.
///
/// Transports produce and consume the variant native to their wire
/// (`Bytes` for sockets, `Frame` for WebSocket-like transports); codec
/// filters translate between wire variants and the higher-level ones.
#[derive(Debug, Clone)]
pub enum Message {
    Bytes(Bytes),
    Frame(Frame),
    Request(HttpRequest),
    Response(HttpResponse),
}

impl Message {
    /// Short variant name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Bytes(_) => "bytes",
            Message::Frame(_) => "frame",
            Message::Request(_) => "request",
            Message::Response(_) => "response",
        }
    }
}

impl From<Frame> for Message {
    fn from(frame: Frame) -> Self {
        Message::Frame(frame)
    }
}

impl From<HttpRequest> for Message {
    fn from(request: HttpRequest) -> Self {
        Message::Request(request)
    }
}

impl From<HttpResponse> for Message {
    fn from(response: HttpResponse) -> Self {
        Message::Response(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opcode_codes_round_trip() {
        for op in [Opcode::Text, Opcode::Binary, Opcode::Close, Opcode::Ping, Opcode::Pong] {
            assert_eq!(Opcode::from_code(op.code()), Some(op));
        }
        assert_eq!(Opcode::from_code(0x3), None);
        assert!(Opcode::Ping.is_control());
        assert!(!Opcode::Text.is_control());
    }

    #[test]
    fn retag_keeps_payload() {
        let frame = Frame::text("héllo");
        let payload = frame.payload.clone();
        let binary = frame.retag(Opcode::Binary);
        assert_eq!(binary.opcode, Opcode::Binary);
        assert_eq!(binary.payload, payload);
        assert_eq!(binary.as_str(), Some("héllo"));
    }
}
