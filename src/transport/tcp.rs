//! Raw TCP transport: sessions carry `Message::Bytes` chunks as read.

use std::sync::Arc;

use bytes::BytesMut;
use futures_util::future::BoxFuture;
use tokio::sync::watch;

use super::socket::{byte_wire, connect_tcp, peer_address};
use super::{Binding, Transport, TransportConfig, TransportContext, TransportFactory};
use crate::address::ResourceAddress;
use crate::error::Result;
use crate::net::listener::Listener;
use crate::session::{IoHandler, Session, SessionKind};

pub const NAME: &str = "tcp";

pub struct TcpTransport {
    ctx: TransportContext,
}

impl TcpTransport {
    pub fn new(ctx: &TransportContext) -> Self {
        Self { ctx: ctx.clone() }
    }
}

impl Transport for TcpTransport {
    fn name(&self) -> &str {
        NAME
    }

    fn scheme_names(&self) -> Vec<String> {
        vec![NAME.to_string()]
    }

    fn default_port(&self, _scheme: &str) -> Option<u16> {
        None
    }

    fn connect(&self, address: &ResourceAddress, handler: Arc<dyn IoHandler>) -> BoxFuture<'static, Result<Session>> {
        let address = address.clone();
        let tracker = self.ctx.tracker.clone();
        Box::pin(async move {
            let stream = connect_tcp(&address).await?;
            let local = stream.local_addr().ok();
            let mut builder = Session::builder(SessionKind::Tcp, NAME, address)
                .handler(handler)
                .tracker(tracker);
            if let Some(local) = local {
                builder = builder.local(peer_address(NAME, local));
            }
            builder.open(byte_wire(stream, BytesMut::new(), None))
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
                    let opened = Session::builder(SessionKind::Tcp, NAME, peer_address(NAME, peer))
                        .local(bound)
                        .handler(handler)
                        .tracker(tracker)
                        .open(byte_wire(stream, BytesMut::new(), Some(permit)));
                    if let Err(e) = opened {
                        tracing::debug!(peer = %peer, error = %e, "Accepted session rejected");
                    }
                }
            });

            Ok(Binding::new(address, Some(local_addr), unbind_tx, Some(task)))
        })
    }
}

pub struct TcpTransportFactory {
    ctx: TransportContext,
}

impl TcpTransportFactory {
    pub fn new(ctx: TransportContext) -> Self {
        Self { ctx }
    }
}

impl TransportFactory for TcpTransportFactory {
    fn transport_name(&self) -> &str {
        NAME
    }

    fn scheme_names(&self) -> Vec<String> {
        vec![NAME.to_string()]
    }

    fn new_transport(&self, config: &TransportConfig) -> Result<Arc<dyn Transport>> {
        Ok(Arc::new(TcpTransport::new(&self.ctx.with_overrides(config))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::testing::RecordingHandler;
    use crate::session::Message;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn accepted_bytes_reach_handler_and_writes_reach_peer() {
        let transport = TcpTransport::new(&TransportContext::default());
        let handler = RecordingHandler::new();
        let address = ResourceAddress::new("tcp", "127.0.0.1", Some(0), "/");
        let binding = transport.bind(&address, handler.clone()).await.unwrap();
        let local = binding.local_addr().unwrap();

        let target = ResourceAddress::new("tcp", "127.0.0.1", Some(local.port()), "/");
        let client = RecordingHandler::new();
        let session = transport.connect(&target, client.clone()).await.unwrap();
        session.write(Message::Bytes("hello".into())).unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        let received: Vec<u8> = handler
            .received()
            .iter()
            .flat_map(|m| match m {
                Message::Bytes(b) => b.to_vec(),
                _ => Vec::new(),
            })
            .collect();
        assert_eq!(received, b"hello");

        session.close();
        session.close_future().wait().await;
        binding.unbind().await;
    }

    #[tokio::test]
    async fn raw_socket_sees_written_bytes() {
        let transport = TcpTransport::new(&TransportContext::default());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let target = ResourceAddress::new("tcp", "127.0.0.1", Some(port), "/");
        let session = transport.connect(&target, RecordingHandler::new()).await.unwrap();
        let (mut peer, _) = listener.accept().await.unwrap();

        session.write(Message::Bytes("abc".into())).unwrap();
        let mut buf = [0u8; 3];
        peer.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"abc");

        peer.shutdown().await.unwrap();
        drop(peer);
        tokio::time::timeout(Duration::from_secs(1), session.close_future().wait())
            .await
            .unwrap();
    }
}
