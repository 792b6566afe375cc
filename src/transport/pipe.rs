//! In-process message pipes.
//!
//! A pipe carries [`Message`] values unchanged between two sessions in the
//! same process. Endpoints are named by the address host: `pipe://name`.

use std::io;
use std::sync::Arc;

use dashmap::DashMap;
use futures_util::future::BoxFuture;
use futures_util::{sink, stream};
use tokio::sync::{mpsc, watch};

use super::{Binding, Transport, TransportConfig, TransportContext, TransportFactory};
use crate::address::ResourceAddress;
use crate::error::{GatewayError, Result};
use crate::net::connection::SessionTracker;
use crate::session::{IoHandler, Message, Session, SessionKind, Wire};

pub const NAME: &str = "pipe";

/// Two connected wires; whatever one sink accepts, the other stream yields.
pub fn pair() -> (Wire, Wire) {
    let (a_tx, a_rx) = mpsc::unbounded_channel();
    let (b_tx, b_rx) = mpsc::unbounded_channel();
    (wire(b_tx, a_rx), wire(a_tx, b_rx))
}

fn wire(tx: mpsc::UnboundedSender<Message>, rx: mpsc::UnboundedReceiver<Message>) -> Wire {
    let stream = stream::unfold(rx, |mut rx| async move {
        let message = rx.recv().await?;
        Some((Ok(message), rx))
    });
    let sink = sink::unfold(tx, |tx, message: Message| async move {
        tx.send(message)
            .map_err(|_| io::Error::from(io::ErrorKind::BrokenPipe))?;
        Ok::<_, io::Error>(tx)
    });
    Wire::new(Box::pin(stream), Box::pin(sink))
}

struct Endpoint {
    address: ResourceAddress,
    handler: Arc<dyn IoHandler>,
}

pub struct PipeTransport {
    endpoints: Arc<DashMap<String, Endpoint>>,
    tracker: SessionTracker,
}

impl PipeTransport {
    pub fn new(ctx: &TransportContext) -> Self {
        Self {
            endpoints: Arc::new(DashMap::new()),
            tracker: ctx.tracker.clone(),
        }
    }

    /// Names currently accepting connections.
    pub fn bound_names(&self) -> Vec<String> {
        self.endpoints.iter().map(|e| e.key().clone()).collect()
    }
}

impl Transport for PipeTransport {
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
        let endpoints = Arc::clone(&self.endpoints);
        let tracker = self.tracker.clone();
        Box::pin(async move {
            let (accept_handler, bound) = match endpoints.get(address.host()) {
                Some(endpoint) => (Arc::clone(&endpoint.handler), endpoint.address.clone()),
                None => return Err(GatewayError::connect_failure(&address, "no pipe bound under that name")),
            };

            let (connect_wire, accept_wire) = pair();
            Session::builder(SessionKind::Pipe, NAME, address.clone())
                .local(bound.clone())
                .handler(accept_handler)
                .tracker(tracker.clone())
                .open(accept_wire)?;

            Session::builder(SessionKind::Pipe, NAME, bound)
                .handler(handler)
                .tracker(tracker)
                .open(connect_wire)
        })
    }

    fn bind(&self, address: &ResourceAddress, handler: Arc<dyn IoHandler>) -> BoxFuture<'static, Result<Binding>> {
        let address = address.clone();
        let endpoints = Arc::clone(&self.endpoints);
        Box::pin(async move {
            let name = address.host().to_string();
            match endpoints.entry(name.clone()) {
                dashmap::Entry::Occupied(_) => {
                    return Err(GatewayError::Io(io::Error::new(
                        io::ErrorKind::AddrInUse,
                        format!("pipe {name} already bound"),
                    )));
                }
                dashmap::Entry::Vacant(slot) => {
                    slot.insert(Endpoint {
                        address: address.clone(),
                        handler,
                    });
                }
            }
            tracing::info!(address = %address, "Pipe bound");

            let (unbind_tx, mut unbind_rx) = watch::channel(false);
            let task = tokio::spawn(async move {
                let _ = unbind_rx.wait_for(|stop| *stop).await;
                endpoints.remove(&name);
                tracing::info!(pipe = %name, "Pipe unbound");
            });
            Ok(Binding::new(address, None, unbind_tx, Some(task)))
        })
    }
}

pub struct PipeTransportFactory {
    ctx: TransportContext,
}

impl PipeTransportFactory {
    pub fn new(ctx: TransportContext) -> Self {
        Self { ctx }
    }
}

impl TransportFactory for PipeTransportFactory {
    fn transport_name(&self) -> &str {
        NAME
    }

    fn scheme_names(&self) -> Vec<String> {
        vec![NAME.to_string()]
    }

    fn new_transport(&self, config: &TransportConfig) -> Result<Arc<dyn Transport>> {
        Ok(Arc::new(PipeTransport::new(&self.ctx.with_overrides(config))))
    }
}
