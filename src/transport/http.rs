//! HTTP/1.x transport: TCP sessions with the HTTP codec at the head of the
//! chain. Accepted sessions decode requests; connected sessions decode
//! responses.

use std::sync::Arc;

use bytes::BytesMut;
use futures_util::future::BoxFuture;
use tokio::sync::watch;

use super::socket::{byte_wire, connect_tcp, peer_address};
use super::{with_initializer, Binding, Transport, TransportConfig, TransportContext, TransportFactory};
use crate::address::ResourceAddress;
use crate::error::Result;
use crate::http::codec::{CodecMode, HttpCodecFilter, FILTER_NAME};
use crate::net::listener::Listener;
use crate::session::{IoHandler, Session, SessionKind};

pub const NAME: &str = "http";

pub struct HttpTransport {
    ctx: TransportContext,
}

impl HttpTransport {
    pub fn new(ctx: &TransportContext) -> Self {
        Self { ctx: ctx.clone() }
    }
}

fn install_codec(ctx: &TransportContext, mode: CodecMode, handler: Arc<dyn IoHandler>) -> Arc<dyn IoHandler> {
    let (max_header, max_body) = (ctx.max_header_bytes, ctx.max_body_bytes);
    with_initializer(handler, move |session| {
        session
            .filter_chain()
            .add_first(FILTER_NAME, Arc::new(HttpCodecFilter::new(mode, max_header, max_body)))
    })
}

impl Transport for HttpTransport {
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
        let handler = install_codec(&self.ctx, CodecMode::Client, handler);
        let tracker = self.ctx.tracker.clone();
        Box::pin(async move {
            let stream = connect_tcp(&address).await?;
            Session::builder(SessionKind::Http, NAME, address)
                .handler(handler)
                .tracker(tracker)
                .open(byte_wire(stream, BytesMut::new(), None))
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
                let handler = install_codec(&ctx, CodecMode::Server, Arc::clone(&handler));
                let tracker = ctx.tracker.clone();
                let bound = bound.clone();
                async move {
                    let opened = Session::builder(SessionKind::Http, NAME, peer_address(NAME, peer))
                        .local(bound)
                        .handler(handler)
                        .tracker(tracker)
                        .open(byte_wire(stream, BytesMut::new(), Some(permit)));
                    if let Err(e) = opened {
                        tracing::debug!(peer = %peer, error = %e, "Accepted http session rejected");
                    }
                }
            });

            Ok(Binding::new(address, Some(local_addr), unbind_tx, Some(task)))
        })
    }
}

pub struct HttpTransportFactory {
    ctx: TransportContext,
}

impl HttpTransportFactory {
    pub fn new(ctx: TransportContext) -> Self {
        Self { ctx }
    }
}

impl TransportFactory for HttpTransportFactory {
    fn transport_name(&self) -> &str {
        NAME
    }

    fn scheme_names(&self) -> Vec<String> {
        vec![NAME.to_string()]
    }

    fn new_transport(&self, config: &TransportConfig) -> Result<Arc<dyn Transport>> {
        Ok(Arc::new(HttpTransport::new(&self.ctx.with_overrides(config))))
    }
}
