//! Native WebSocket transport over `tokio-tungstenite`.
//!
//! Sessions carry `Message::Frame`. Ping/pong is answered by the protocol
//! layer and never reaches the chain.

use std::io;
use std::sync::Arc;

use bytes::Bytes;
use futures_util::future::{self, BoxFuture};
use futures_util::{stream, SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::watch;
use tokio_tungstenite::tungstenite::{Error as WsError, Message as WsMessage};
use tokio_tungstenite::WebSocketStream;

use super::socket::{connect_tcp, peer_address};
use super::{Binding, Transport, TransportConfig, TransportContext, TransportFactory};
use crate::address::ResourceAddress;
use crate::error::{GatewayError, Result};
use crate::net::listener::{ConnectionPermit, Listener};
use crate::session::{Frame, IoHandler, Message, Opcode, Session, SessionKind, Wire};

pub const NAME: &str = "ws";

pub struct WsTransport {
    ctx: TransportContext,
}

impl WsTransport {
    pub fn new(ctx: &TransportContext) -> Self {
        Self { ctx: ctx.clone() }
    }
}

impl Transport for WsTransport {
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
        let tracker = self.ctx.tracker.clone();
        Box::pin(async move {
            let stream = connect_tcp(&address).await?;
            let url = format!("ws://{}{}", address.authority()?, address.path());
            let (ws, _response) = tokio_tungstenite::client_async(url.as_str(), stream)
                .await
                .map_err(|e| GatewayError::connect_failure(&address, e))?;
            Session::builder(SessionKind::WebSocket, NAME, address)
                .handler(handler)
                .tracker(tracker)
                .open(ws_wire(ws, None))
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
                let tracker = ctx.tracker.clone();
                let bound = bound.clone();
                async move {
                    let ws = match tokio_tungstenite::accept_async(stream).await {
                        Ok(ws) => ws,
                        Err(e) => {
                            tracing::debug!(peer = %peer, error = %e, "WebSocket handshake failed");
                            return;
                        }
                    };
                    let opened = Session::builder(SessionKind::WebSocket, NAME, peer_address(NAME, peer))
                        .local(bound)
                        .handler(handler)
                        .tracker(tracker)
                        .open(ws_wire(ws, Some(permit)));
                    if let Err(e) = opened {
                        tracing::debug!(peer = %peer, error = %e, "Accepted websocket session rejected");
                    }
                }
            });

            Ok(Binding::new(address, Some(local_addr), unbind_tx, Some(task)))
        })
    }
}

/// Adapt a WebSocket stream to a frame wire.
pub(crate) fn ws_wire<S>(ws: WebSocketStream<S>, permit: Option<ConnectionPermit>) -> Wire
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (sink, incoming) = ws.split();

    let inbound = stream::unfold((incoming, permit), |(mut incoming, permit)| async move {
        loop {
            match incoming.next().await? {
                Ok(message) => {
                    if let Some(frame) = from_ws(message) {
                        return Some((Ok(Message::Frame(frame)), (incoming, permit)));
                    }
                }
                Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => return None,
                Err(e) => return Some((Err(io::Error::other(e)), (incoming, permit))),
            }
        }
    });

    let outbound = sink
        .sink_map_err(io::Error::other)
        .with(|message: Message| future::ready(to_ws(message)));

    Wire::new(Box::pin(inbound), Box::pin(outbound))
}

fn from_ws(message: WsMessage) -> Option<Frame> {
    match message {
        WsMessage::Text(text) => Some(Frame::new(Opcode::Text, Bytes::copy_from_slice(text.as_bytes()))),
        WsMessage::Binary(payload) => Some(Frame::binary(payload)),
        WsMessage::Close(_) => Some(Frame::close()),
        WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Frame(_) => None,
    }
}

fn to_ws(message: Message) -> io::Result<WsMessage> {
    let frame = match message {
        Message::Frame(frame) => frame,
        other => {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} message reached a websocket wire", other.kind()),
            ))
        }
    };
    Ok(match frame.opcode {
        Opcode::Text => {
            let text = String::from_utf8(frame.payload.to_vec())
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
            WsMessage::text(text)
        }
        Opcode::Binary => WsMessage::binary(frame.payload),
        Opcode::Ping => WsMessage::Ping(frame.payload),
        Opcode::Pong => WsMessage::Pong(frame.payload),
        Opcode::Close => WsMessage::Close(None),
    })
}

pub struct WsTransportFactory {
    ctx: TransportContext,
}

impl WsTransportFactory {
    pub fn new(ctx: TransportContext) -> Self {
        Self { ctx }
    }
}

impl TransportFactory for WsTransportFactory {
    fn transport_name(&self) -> &str {
        NAME
    }

    fn scheme_names(&self) -> Vec<String> {
        vec![NAME.to_string()]
    }

    fn new_transport(&self, config: &TransportConfig) -> Result<Arc<dyn Transport>> {
        Ok(Arc::new(WsTransport::new(&self.ctx.with_overrides(config))))
    }
}
