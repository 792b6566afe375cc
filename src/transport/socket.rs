//! Shared plumbing for the socket-based transports.

use std::io;
use std::net::SocketAddr;

use bytes::{Bytes, BytesMut};
use futures_util::{sink, stream};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

use crate::address::ResourceAddress;
use crate::error::{GatewayError, Result};
use crate::net::listener::ConnectionPermit;
use crate::session::{Message, Wire};

const READ_CHUNK: usize = 8 * 1024;

/// Open a TCP connection to the address's `host:port`.
pub(crate) async fn connect_tcp(address: &ResourceAddress) -> Result<TcpStream> {
    let authority = address.authority()?;
    let stream = TcpStream::connect(&authority)
        .await
        .map_err(|e| GatewayError::connect_failure(address, e))?;
    let _ = stream.set_nodelay(true);
    Ok(stream)
}

/// Address form of a socket, used for a session's local or remote address.
pub(crate) fn peer_address(scheme: &str, addr: SocketAddr) -> ResourceAddress {
    ResourceAddress::new(scheme, &addr.ip().to_string(), Some(addr.port()), "/")
}

/// Wrap a socket as a byte wire. `leftover` is delivered before any new read.
///
/// The permit, if any, is released once the inbound half is dropped.
pub(crate) fn byte_wire(stream: TcpStream, leftover: BytesMut, permit: Option<ConnectionPermit>) -> Wire {
    let (read, write) = stream.into_split();

    let inbound = stream::unfold((read, leftover, permit), |(mut read, mut buf, permit)| async move {
        if buf.is_empty() {
            buf.reserve(READ_CHUNK);
            match read.read_buf(&mut buf).await {
                Ok(0) => return None,
                Ok(_) => {}
                Err(e) => return Some((Err(e), (read, buf, permit))),
            }
        }
        let chunk = buf.split().freeze();
        Some((Ok(Message::Bytes(chunk)), (read, buf, permit)))
    });

    Wire::new(Box::pin(inbound), Box::pin(byte_sink(write)))
}

/// Sink that writes `Message::Bytes` verbatim and rejects anything else.
pub(crate) fn byte_sink(
    write: OwnedWriteHalf,
) -> impl futures_util::Sink<Message, Error = io::Error> + Send + 'static {
    sink::unfold(write, |mut write, message: Message| async move {
        match message {
            Message::Bytes(bytes) => {
                write.write_all(&bytes).await?;
                Ok(write)
            }
            other => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} message reached a byte wire", other.kind()),
            )),
        }
    })
}

/// Read from `read` until `complete` reports a full head, returning the
/// buffered bytes. Fails past `limit` bytes or on EOF.
pub(crate) async fn read_head<F>(read: &mut OwnedReadHalf, limit: usize, mut complete: F) -> io::Result<BytesMut>
where
    F: FnMut(&[u8]) -> bool,
{
    let mut buf = BytesMut::with_capacity(1024);
    loop {
        if complete(&buf) {
            return Ok(buf);
        }
        if buf.len() >= limit {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "handshake head too large"));
        }
        if read.read_buf(&mut buf).await? == 0 {
            return Err(io::Error::from(io::ErrorKind::UnexpectedEof));
        }
    }
}

/// True once `buf` holds a blank line terminating an HTTP head.
pub(crate) fn has_head_terminator(buf: &[u8]) -> bool {
    buf.windows(4).any(|w| w == b"\r\n\r\n")
}

/// Write raw bytes, used for handshake responses before the wire exists.
pub(crate) async fn write_raw(write: &mut OwnedWriteHalf, bytes: Bytes) -> io::Result<()> {
    write.write_all(&bytes).await
}
