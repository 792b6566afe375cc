//! Transport subsystem.
//!
//! # Data Flow
//! ```text
//! Startup:
//!     TransportFactory (SPI) × config tables
//!     → registry.rs (scheme → transport, frozen after build)
//!
//! Runtime:
//!     ResourceAddress.scheme
//!     → registry.resolve()
//!     → Transport::connect() / Transport::bind()
//!     → Session (driver spawned, handler installed)
//! ```
//!
//! # Design Decisions
//! - Explicit registration at startup, no discovery by reflection
//! - Registry is immutable once built; lookups take no lock
//! - Transports install their framing filters before the driver starts

pub mod http;
pub mod pipe;
pub mod registry;
pub mod socket;
pub mod tcp;
pub mod ws;
pub mod wseb;

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::address::ResourceAddress;
use crate::error::Result;
use crate::net::connection::SessionTracker;
use crate::session::{IdleStatus, IoHandler, Message, Session};

pub use registry::{TransportRegistry, TransportRegistryBuilder};

/// Declarative per-transport configuration handed to factories.
pub type TransportConfig = serde_json::Map<String, serde_json::Value>;

/// A concrete wire protocol registered under one or more URI schemes.
pub trait Transport: Send + Sync {
    fn name(&self) -> &str;

    fn scheme_names(&self) -> Vec<String>;

    /// Port used when an address for `scheme` omits one.
    fn default_port(&self, scheme: &str) -> Option<u16>;

    /// Open a connect-side session toward `address`.
    fn connect(&self, address: &ResourceAddress, handler: Arc<dyn IoHandler>) -> BoxFuture<'static, Result<Session>>;

    /// Accept sessions on `address`, handing each to `handler`.
    fn bind(&self, address: &ResourceAddress, handler: Arc<dyn IoHandler>) -> BoxFuture<'static, Result<Binding>>;
}

/// Service-provider interface used to materialize transports from config.
pub trait TransportFactory: Send + Sync {
    fn transport_name(&self) -> &str;

    fn scheme_names(&self) -> Vec<String>;

    fn new_transport(&self, config: &TransportConfig) -> Result<Arc<dyn Transport>>;
}

/// Shared settings for the built-in transports.
#[derive(Debug, Clone)]
pub struct TransportContext {
    pub tracker: SessionTracker,
    pub max_connections: usize,
    pub max_header_bytes: usize,
    pub max_body_bytes: usize,
    pub max_frame_bytes: usize,
}

impl Default for TransportContext {
    fn default() -> Self {
        Self {
            tracker: SessionTracker::new(),
            max_connections: 10_000,
            max_header_bytes: 16 * 1024,
            max_body_bytes: 2 * 1024 * 1024,
            max_frame_bytes: 16 * 1024 * 1024,
        }
    }
}

impl TransportContext {
    /// Apply the overrides a `[transports.<name>]` table may carry.
    pub fn with_overrides(&self, config: &TransportConfig) -> Self {
        let mut ctx = self.clone();
        let get = |key: &str| config.get(key).and_then(|v| v.as_u64()).map(|v| v as usize);
        if let Some(v) = get("max_connections") {
            ctx.max_connections = v;
        }
        if let Some(v) = get("max_header_bytes") {
            ctx.max_header_bytes = v;
        }
        if let Some(v) = get("max_body_bytes") {
            ctx.max_body_bytes = v;
        }
        if let Some(v) = get("max_frame_bytes") {
            ctx.max_frame_bytes = v;
        }
        ctx
    }
}

/// An active accept registration. Dropping it also stops accepting.
#[derive(Debug)]
pub struct Binding {
    address: ResourceAddress,
    local_addr: Option<SocketAddr>,
    unbind_tx: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl Binding {
    pub(crate) fn new(
        address: ResourceAddress,
        local_addr: Option<SocketAddr>,
        unbind_tx: watch::Sender<bool>,
        task: Option<JoinHandle<()>>,
    ) -> Self {
        Self {
            address,
            local_addr,
            unbind_tx,
            task,
        }
    }

    pub fn address(&self) -> &ResourceAddress {
        &self.address
    }

    /// Socket address actually bound, for socket transports.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Stop accepting and wait for the accept task to finish.
    pub async fn unbind(mut self) {
        self.unbind_tx.send_replace(true);
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for Binding {
    fn drop(&mut self) {
        self.unbind_tx.send_replace(true);
    }
}

/// Wraps a handler so `init` runs in `session_created` before the
/// driver starts; the wrapped handler then becomes the session handler.
pub(crate) fn with_initializer<F>(handler: Arc<dyn IoHandler>, init: F) -> Arc<dyn IoHandler>
where
    F: Fn(&Session) -> Result<()> + Send + Sync + 'static,
{
    Arc::new(Initializer {
        init: Box::new(init),
        handler,
    })
}

struct Initializer {
    init: Box<dyn Fn(&Session) -> Result<()> + Send + Sync>,
    handler: Arc<dyn IoHandler>,
}

impl IoHandler for Initializer {
    fn session_created(&self, session: &Session) -> Result<()> {
        (self.init)(session)?;
        session.set_handler(Arc::clone(&self.handler));
        self.handler.session_created(session)
    }

    fn session_opened(&self, session: &Session) {
        self.handler.session_opened(session)
    }

    fn message_received(&self, session: &Session, message: Message) {
        self.handler.message_received(session, message)
    }

    fn session_idle(&self, session: &Session, status: IdleStatus) {
        self.handler.session_idle(session, status)
    }

    fn session_closed(&self, session: &Session) {
        self.handler.session_closed(session)
    }
}
