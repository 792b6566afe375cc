//! Emulated WebSocket ("wseb") transport.
//!
//! For clients that cannot open a native WebSocket. The connection starts
//! as an HTTP/1.1 streaming exchange and then carries length-prefixed
//! frames (see [`framing`]) in both directions.
//!
//! # Handshake
//! ```text
//! client → POST /path HTTP/1.1
//!          X-WebSocket-Version: wseb-1.0
//! server ← HTTP/1.1 200 OK
//!          X-WebSocket-Version: wseb-1.0
//! then: frames ⇄ frames
//! ```

pub mod framing;

use std::io;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use futures_util::future::BoxFuture;
use futures_util::{sink, stream};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::watch;

use self::framing::FrameDecoder;
use super::socket::{connect_tcp, has_head_terminator, peer_address, read_head, write_raw};
use super::{Binding, Transport, TransportConfig, TransportContext, TransportFactory};
use crate::address::ResourceAddress;
use crate::error::{GatewayError, Result};
use crate::net::listener::{ConnectionPermit, Listener};
use crate::session::{IoHandler, Message, Session, SessionKind, Wire};

pub const NAME: &str = "wseb";

/// Protocol version header exchanged during the handshake.
pub const VERSION_HEADER: &str = "x-websocket-version";
pub const VERSION: &str = "wseb-1.0";

pub struct WsebTransport {
    ctx: TransportContext,
}

impl WsebTransport {
    pub fn new(ctx: &TransportContext) -> Self {
        Self { ctx: ctx.clone() }
    }
}

impl Transport for WsebTransport {
    fn name(&self) -> &str {
        NAME
    }

    fn scheme_names(&self) -> Vec<String> {
        vec![NAME.to_string()]
    }

    fn default_port(&self, _scheme: &str) -> Option<u16> {
        Some(80)
    }

    fn connect(&self, address: &ResourceAddress, handler: Arc<dyn IoHandler>) -> BoxFuture<'static, Result<Session>> {
        let address = address.clone();
        let ctx = self.ctx.clone();
        Box::pin(async move {
            let stream = connect_tcp(&address).await?;
            let (mut read, mut write) = stream.into_split();
            let leftover = client_handshake(&address, &mut read, &mut write, ctx.max_header_bytes)
                .await
                .map_err(|e| GatewayError::connect_failure(&address, e))?;

            Session::builder(SessionKind::Wseb, NAME, address)
                .handler(handler)
                .tracker(ctx.tracker.clone())
                .open(frame_wire(read, write, leftover, FrameDecoder::new(ctx.max_frame_bytes), None))
        })
    }

    fn bind(&self, address: &ResourceAddress, handler: Arc<dyn IoHandler>) -> BoxFuture<'static, Result<Binding>> {
        let address = address.clone();
        let ctx = self.ctx.clone();
        Box::pin(async move {
            let listener = Listener::bind(&address, ctx.max_connections).await?;
            let local_addr = listener.local_addr()?;
            let (unbind_tx, unbind_rx) = watch::channel(false);
            let bound = address.clone();

            let task = listener.serve(unbind_rx, move |stream, peer, permit| {
                let handler = Arc::clone(&handler);
                let ctx = ctx.clone();
                let bound = bound.clone();
                async move {
                    let (read, write, leftover) = match server_handshake(stream, ctx.max_header_bytes).await {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            tracing::debug!(peer = %peer, error = %e, "wseb handshake failed");
                            return;
                        }
                    };
                    let decoder = FrameDecoder::new(ctx.max_frame_bytes);
                    let opened = Session::builder(SessionKind::Wseb, NAME, peer_address(NAME, peer))
                        .local(bound)
                        .handler(handler)
                        .tracker(ctx.tracker.clone())
                        .open(frame_wire(read, write, leftover, decoder, Some(permit)));
                    if let Err(e) = opened {
                        tracing::debug!(peer = %peer, error = %e, "Accepted wseb session rejected");
                    }
                }
            });

            Ok(Binding::new(address, Some(local_addr), unbind_tx, Some(task)))
        })
    }
}

async fn client_handshake(
    address: &ResourceAddress,
    read: &mut OwnedReadHalf,
    write: &mut OwnedWriteHalf,
    max_header_bytes: usize,
) -> io::Result<BytesMut> {
    let request = format!(
        "POST {} HTTP/1.1\r\nHost: {}\r\nContent-Type: application/octet-stream\r\n{}: {}\r\n\r\n",
        address.path(),
        address.authority().map_err(io::Error::other)?,
        VERSION_HEADER,
        VERSION,
    );
    write.write_all(request.as_bytes()).await?;

    let mut buf = read_head(read, max_header_bytes, has_head_terminator).await?;
    let mut slots = [httparse::EMPTY_HEADER; 32];
    let mut response = httparse::Response::new(&mut slots);
    let len = match response.parse(&buf).map_err(protocol_error)? {
        httparse::Status::Complete(len) => len,
        httparse::Status::Partial => return Err(protocol_error("incomplete handshake response")),
    };
    if response.code != Some(200) {
        return Err(protocol_error(format!("handshake rejected with status {:?}", response.code)));
    }
    if !has_version(response.headers) {
        return Err(protocol_error("peer did not confirm wseb version"));
    }
    Ok(buf.split_off(len))
}

async fn server_handshake(
    stream: TcpStream,
    max_header_bytes: usize,
) -> io::Result<(OwnedReadHalf, OwnedWriteHalf, BytesMut)> {
    let (mut read, mut write) = stream.into_split();
    let mut buf = read_head(&mut read, max_header_bytes, has_head_terminator).await?;

    let mut slots = [httparse::EMPTY_HEADER; 64];
    let mut request = httparse::Request::new(&mut slots);
    let len = match request.parse(&buf).map_err(protocol_error)? {
        httparse::Status::Complete(len) => len,
        httparse::Status::Partial => return Err(protocol_error("incomplete handshake request")),
    };
    if request.method != Some("POST") || !has_version(request.headers) {
        write_raw(
            &mut write,
            Bytes::from_static(b"HTTP/1.1 400 Bad Request\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"),
        )
        .await?;
        return Err(protocol_error("not a wseb handshake"));
    }

    let response = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: application/octet-stream\r\nCache-Control: no-cache\r\n{}: {}\r\n\r\n",
        VERSION_HEADER, VERSION,
    );
    write_raw(&mut write, Bytes::from(response)).await?;
    let leftover = buf.split_off(len);
    Ok((read, write, leftover))
}

fn has_version(headers: &[httparse::Header<'_>]) -> bool {
    headers
        .iter()
        .any(|h| h.name.eq_ignore_ascii_case(VERSION_HEADER) && h.value == VERSION.as_bytes())
}

fn protocol_error(reason: impl ToString) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, reason.to_string())
}

/// Frame wire over the socket halves left after the handshake.
fn frame_wire(
    read: OwnedReadHalf,
    write: OwnedWriteHalf,
    leftover: BytesMut,
    decoder: FrameDecoder,
    permit: Option<ConnectionPermit>,
) -> Wire {
    let inbound = stream::unfold(
        (read, leftover, decoder, permit),
        |(mut read, mut buf, decoder, permit)| async move {
            loop {
                match decoder.decode(&mut buf) {
                    Ok(Some(frame)) => return Some((Ok(Message::Frame(frame)), (read, buf, decoder, permit))),
                    Ok(None) => {}
                    Err(e) => return Some((Err(e), (read, buf, decoder, permit))),
                }
                match read.read_buf(&mut buf).await {
                    Ok(0) if buf.is_empty() => return None,
                    Ok(0) => {
                        let err = io::Error::new(io::ErrorKind::UnexpectedEof, "connection closed mid-frame");
                        buf.clear();
                        return Some((Err(err), (read, buf, decoder, permit)));
                    }
                    Ok(_) => {}
                    Err(e) => return Some((Err(e), (read, buf, decoder, permit))),
                }
            }
        },
    );

    let outbound = sink::unfold(write, |mut write, message: Message| async move {
        match message {
            Message::Frame(frame) => {
                write.write_all(&framing::encode_to_bytes(&frame)).await?;
                Ok(write)
            }
            other => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} message reached a wseb wire", other.kind()),
            )),
        }
    });

    Wire::new(Box::pin(inbound), Box::pin(outbound))
}

pub struct WsebTransportFactory {
    ctx: TransportContext,
}

impl WsebTransportFactory {
    pub fn new(ctx: TransportContext) -> Self {
        Self { ctx }
    }
}

impl TransportFactory for WsebTransportFactory {
    fn transport_name(&self) -> &str {
        NAME
    }

    fn scheme_names(&self) -> Vec<String> {
        vec![NAME.to_string()]
    }

    fn new_transport(&self, config: &TransportConfig) -> Result<Arc<dyn Transport>> {
        Ok(Arc::new(WsebTransport::new(&self.ctx.with_overrides(config))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::testing::RecordingHandler;
    use crate::session::{Frame, Opcode};
    use std::time::Duration;

    #[tokio::test]
    async fn frames_cross_after_handshake() {
        let transport = WsebTransport::new(&TransportContext::default());
        let accept = RecordingHandler::new();
        let bind = ResourceAddress::new(NAME, "127.0.0.1", Some(0), "/echo");
        let binding = transport.bind(&bind, accept.clone()).await.unwrap();
        let port = binding.local_addr().unwrap().port();

        let target = ResourceAddress::new(NAME, "127.0.0.1", Some(port), "/echo");
        let session = transport.connect(&target, RecordingHandler::new()).await.unwrap();
        session.write(Frame::binary(&b"payload"[..])).unwrap();

        tokio::time::sleep(Duration::from_millis(150)).await;
        match accept.received().as_slice() {
            [Message::Frame(frame)] => {
                assert_eq!(frame.opcode, Opcode::Binary);
                assert_eq!(&frame.payload[..], b"payload");
            }
            other => panic!("unexpected {other:?}"),
        }
        binding.unbind().await;
    }

    #[tokio::test]
    async fn plain_http_is_refused() {
        let transport = WsebTransport::new(&TransportContext::default());
        let bind = ResourceAddress::new(NAME, "127.0.0.1", Some(0), "/");
        let binding = transport.bind(&bind, RecordingHandler::new()).await.unwrap();
        let port = binding.local_addr().unwrap().port();

        let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        stream.write_all(b"GET / HTTP/1.1\r\nHost: x\r\n\r\n").await.unwrap();
        let mut reply = String::new();
        stream.read_to_string(&mut reply).await.unwrap();
        assert!(reply.starts_with("HTTP/1.1 400"));
    }
}
