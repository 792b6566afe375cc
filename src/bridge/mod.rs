//! Session bridging.
//!
//! # Data Flow
//! ```text
//! accept-side session (bound transport)
//!     → proxy handler swaps in a per-session bridge (session_created)
//!     → Connector: pool.take() or registry transport connect
//!        (connect timeout + bounded retries)
//!     → connect-side session
//!
//! Stream policy: frames/bytes copied both ways, close coupled both ways
//! Http policy:   one request at a time, headers rewritten, connect side
//!                recycled into the pool when both ends allow keep-alive
//! ```
//!
//! # Design Decisions
//! - A bridge never shares a session with another bridge
//! - Messages that arrive while the connect side is opening are queued and
//!   flushed in arrival order
//! - Failure while opening reports to the accept side in its own protocol
//!   (HTTP 502, stream close)

pub mod http;
pub mod stream;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::address::ResourceAddress;
use crate::error::Result;
use crate::observability::metrics;
use crate::pool::PersistentConnectionPool;
use crate::resilience::timeouts::connect_within;
use crate::resilience::RetryPolicy;
use crate::session::{IoHandler, Session};
use crate::transport::TransportRegistry;

pub use http::{HttpBridgeSession, HttpProxy};
pub use stream::{BridgeSession, StreamProxy};

static BRIDGE_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Identifier used to correlate both legs of a bridge in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BridgeId(u64);

impl BridgeId {
    pub fn new() -> Self {
        Self(BRIDGE_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for BridgeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for BridgeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bridge-{}", self.0)
    }
}

/// Lifecycle of one bridge (or one HTTP exchange).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeState {
    Opening,
    Bridged,
    Closing,
    Closed,
}

impl BridgeState {
    pub fn as_str(self) -> &'static str {
        match self {
            BridgeState::Opening => "opening",
            BridgeState::Bridged => "bridged",
            BridgeState::Closing => "closing",
            BridgeState::Closed => "closed",
        }
    }
}

/// How traffic crosses a bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgePolicy {
    /// Copy messages both ways for the life of the stream.
    Stream,
    /// Forward request/response exchanges with proxy semantics.
    Http,
}

/// Per-service bridge settings.
#[derive(Debug, Clone)]
pub struct BridgeSettings {
    pub pool_enabled: bool,
    /// Upper bound on waiting for a backend response.
    pub request_timeout: Duration,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            pool_enabled: true,
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Opens connect-side sessions through the registry.
#[derive(Clone)]
pub struct Connector {
    registry: Arc<TransportRegistry>,
    pool: PersistentConnectionPool,
    connect_timeout: Duration,
    retry: RetryPolicy,
}

impl Connector {
    pub fn new(
        registry: Arc<TransportRegistry>,
        pool: PersistentConnectionPool,
        connect_timeout: Duration,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            registry,
            pool,
            connect_timeout,
            retry,
        }
    }

    pub fn pool(&self) -> &PersistentConnectionPool {
        &self.pool
    }

    pub fn registry(&self) -> &Arc<TransportRegistry> {
        &self.registry
    }

    /// Open a fresh session toward `address`, retrying connection failures.
    pub async fn open(&self, address: &ResourceAddress, handler: Arc<dyn IoHandler>) -> Result<Session> {
        let started = Instant::now();
        let transport = self.registry.resolve(address.scheme())?;
        let result = self
            .retry
            .run(address, |_| {
                let connecting = transport.connect(address, Arc::clone(&handler));
                connect_within(self.connect_timeout, address, connecting)
            })
            .await;

        match &result {
            Ok(session) => {
                metrics::record_bridge_open(address.scheme(), started);
                tracing::debug!(session_id = %session.id(), address = %address, "Connect side opened");
            }
            Err(e) => {
                metrics::record_connect_failure(address.scheme());
                tracing::warn!(address = %address, error = %e, "Connect side failed");
            }
        }
        result
    }
}

impl fmt::Debug for Connector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connector")
            .field("schemes", &self.registry.schemes())
            .field("connect_timeout", &self.connect_timeout)
            .field("retry", &self.retry)
            .finish()
    }
}

/// Accept-side handler that bridges every accepted session to `connect`.
pub fn proxy_handler(
    policy: BridgePolicy,
    connector: Connector,
    connect: ResourceAddress,
    settings: BridgeSettings,
) -> Arc<dyn IoHandler> {
    match policy {
        BridgePolicy::Stream => Arc::new(StreamProxy::new(connector, connect)),
        BridgePolicy::Http => Arc::new(HttpProxy::new(connector, connect, settings)),
    }
}
