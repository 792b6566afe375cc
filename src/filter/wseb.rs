//! Opcode correction between native and emulated WebSocket legs.
//!
//! The emulated transport does not keep text and binary framing apart the
//! way native WebSocket does, so a bridge crossing that boundary re-tags
//! outbound frames on each leg. Payload bytes are never touched, and the
//! inbound path passes through unchanged.

use crate::error::Result;
use crate::session::{Filter, Message, NextWrite, Opcode, Session};

/// Chain name used when a bridge installs the codec.
pub const FILTER_NAME: &str = "wseb#encoding";

/// Which re-tagging an instance applies on write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodingMode {
    /// Emulated leg: text frames go out as binary.
    TextAsBinary,
    /// Native leg facing an emulated peer: binary frames carrying valid
    /// UTF-8 go out as text.
    BinaryAsText,
}

/// Stateless per-frame opcode rewriter.
#[derive(Debug, Clone, Copy)]
pub struct WsebEncodingCodec {
    mode: EncodingMode,
}

impl WsebEncodingCodec {
    pub fn new(mode: EncodingMode) -> Self {
        Self { mode }
    }

    pub fn mode(&self) -> EncodingMode {
        self.mode
    }

    /// Apply the re-tagging to a single message.
    pub fn encode(&self, message: Message) -> Message {
        let frame = match message {
            Message::Frame(frame) => frame,
            other => return other,
        };
        let frame = match (self.mode, frame.opcode) {
            (EncodingMode::TextAsBinary, Opcode::Text) => frame.retag(Opcode::Binary),
            (EncodingMode::BinaryAsText, Opcode::Binary) if frame.as_str().is_some() => frame.retag(Opcode::Text),
            _ => frame,
        };
        Message::Frame(frame)
    }
}

impl Filter for WsebEncodingCodec {
    fn filter_write(&self, next: &mut NextWrite<'_>, session: &Session, message: Message) -> Result<()> {
        next.filter_write(session, self.encode(message))
    }
}
