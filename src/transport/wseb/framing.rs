//! Emulated WebSocket frame format.
//!
//! ```text
//! +-----------------+---------------------+-----------------+
//! | 0x80 | opcode   | length (base-128)   | payload         |
//! +-----------------+---------------------+-----------------+
//! ```
//! Length is big-endian base-128: every byte but the last has its high bit set.

use std::io;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::session::{Frame, Opcode};

const TYPE_MARKER: u8 = 0x80;
const MAX_LENGTH_BYTES: usize = 10;

/// Append one encoded frame to `out`.
pub fn encode(frame: &Frame, out: &mut BytesMut) {
    out.reserve(1 + MAX_LENGTH_BYTES + frame.payload.len());
    out.put_u8(TYPE_MARKER | frame.opcode.code());
    put_length(out, frame.payload.len() as u64);
    out.put_slice(&frame.payload);
}

pub fn encode_to_bytes(frame: &Frame) -> Bytes {
    let mut out = BytesMut::new();
    encode(frame, &mut out);
    out.freeze()
}

fn put_length(out: &mut BytesMut, len: u64) {
    let mut groups = [0u8; MAX_LENGTH_BYTES];
    let mut n = 0;
    let mut rest = len;
    loop {
        groups[n] = (rest & 0x7f) as u8;
        n += 1;
        rest >>= 7;
        if rest == 0 {
            break;
        }
    }
    for i in (0..n).rev() {
        let continuation = if i > 0 { 0x80 } else { 0 };
        out.put_u8(groups[i] | continuation);
    }
}

/// Incremental decoder; partial frames stay buffered in the caller's buffer.
#[derive(Debug, Clone)]
pub struct FrameDecoder {
    max_frame_bytes: usize,
}

impl FrameDecoder {
    pub fn new(max_frame_bytes: usize) -> Self {
        Self { max_frame_bytes }
    }

    /// Take one complete frame off the front of `buf`, if buffered.
    pub fn decode(&self, buf: &mut BytesMut) -> io::Result<Option<Frame>> {
        let Some(&type_byte) = buf.first() else {
            return Ok(None);
        };
        if type_byte & TYPE_MARKER == 0 {
            return Err(invalid(format!("unexpected frame type 0x{type_byte:02x}")));
        }
        let opcode = Opcode::from_code(type_byte & 0x7f)
            .ok_or_else(|| invalid(format!("unknown opcode 0x{:02x}", type_byte & 0x7f)))?;

        let mut len: u64 = 0;
        let mut header = 1;
        loop {
            let Some(&byte) = buf.get(header) else {
                return Ok(None);
            };
            header += 1;
            len = (len << 7) | u64::from(byte & 0x7f);
            if byte & 0x80 == 0 {
                break;
            }
            if header > MAX_LENGTH_BYTES {
                return Err(invalid("frame length field too long".to_string()));
            }
        }

        if len > self.max_frame_bytes as u64 {
            return Err(invalid(format!("frame of {len} bytes exceeds limit")));
        }
        let len = len as usize;
        if buf.len() < header + len {
            return Ok(None);
        }
        buf.advance(header);
        let payload = buf.split_to(len).freeze();
        Ok(Some(Frame::new(opcode, payload)))
    }
}

fn invalid(reason: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, reason)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn length_prefix_is_base_128() {
        let frame = Frame::binary(vec![0u8; 300]);
        let wire = encode_to_bytes(&frame);
        // 300 = 0b10_0101100 → 0x82 0x2c
        assert_eq!(&wire[..3], &[0x82, 0x82, 0x2c]);
        assert_eq!(wire.len(), 3 + 300);
    }

    #[test]
    fn decodes_across_partial_reads() {
        let decoder = FrameDecoder::new(1 << 20);
        let wire = encode_to_bytes(&Frame::text("hello world"));
        let mut buf = BytesMut::new();
        for chunk in wire.chunks(3) {
            let before = decoder.decode(&mut buf).unwrap();
            assert!(before.is_none());
            buf.extend_from_slice(chunk);
        }
        let frame = decoder.decode(&mut buf).unwrap().unwrap();
        assert_eq!(frame.opcode, Opcode::Text);
        assert_eq!(frame.as_str(), Some("hello world"));
        assert!(buf.is_empty());
    }

    #[test]
    fn back_to_back_frames() {
        let decoder = FrameDecoder::new(1 << 20);
        let mut buf = BytesMut::new();
        encode(&Frame::binary(vec![1, 2, 3]), &mut buf);
        encode(&Frame::close(), &mut buf);
        assert_eq!(decoder.decode(&mut buf).unwrap().unwrap().payload.len(), 3);
        assert_eq!(decoder.decode(&mut buf).unwrap().unwrap().opcode, Opcode::Close);
        assert!(decoder.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn rejects_oversized_and_malformed() {
        let decoder = FrameDecoder::new(16);
        let mut buf = BytesMut::from(encode_to_bytes(&Frame::binary(vec![0u8; 17])).as_ref());
        assert!(decoder.decode(&mut buf).is_err());

        let mut buf = BytesMut::from(&[0x01u8, 0x00][..]);
        assert!(decoder.decode(&mut buf).is_err());
    }
}
