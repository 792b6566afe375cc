//! TCP accept loop with backpressure.
//!
//! # Responsibilities
//! - Bind to a resource address
//! - Accept incoming TCP connections
//! - Enforce max_connections via semaphore
//! - Stop accepting when the binding is unbound

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{watch, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;

use crate::address::ResourceAddress;
use crate::error::{GatewayError, Result};

/// A TCP listener that limits concurrent connections.
pub struct Listener {
    inner: TcpListener,
    connection_limit: Arc<Semaphore>,
    max_connections: usize,
}

impl Listener {
    /// Bind to the address's `host:port`.
    pub async fn bind(address: &ResourceAddress, max_connections: usize) -> Result<Self> {
        let authority = address.authority()?;
        let listener = TcpListener::bind(&authority).await?;
        let local_addr = listener.local_addr()?;

        tracing::info!(
            address = %address,
            local_addr = %local_addr,
            max_connections,
            "Listener bound"
        );

        Ok(Self {
            inner: listener,
            connection_limit: Arc::new(Semaphore::new(max_connections)),
            max_connections,
        })
    }

    /// Accept a connection once a slot is free. The permit must live as long
    /// as the connection.
    pub async fn accept(&self) -> Result<(TcpStream, SocketAddr, ConnectionPermit)> {
        let permit = Arc::clone(&self.connection_limit)
            .acquire_owned()
            .await
            .map_err(|_| GatewayError::Io(std::io::Error::other("connection limit closed")))?;

        let (stream, addr) = self.inner.accept().await?;
        let _ = stream.set_nodelay(true);

        tracing::debug!(
            peer_addr = %addr,
            available_permits = self.connection_limit.available_permits(),
            "Connection accepted"
        );

        Ok((stream, addr, ConnectionPermit { _permit: permit }))
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.inner.local_addr()?)
    }

    pub fn available_permits(&self) -> usize {
        self.connection_limit.available_permits()
    }

    pub fn max_connections(&self) -> usize {
        self.max_connections
    }

    /// Run the accept loop on a background task until `unbind` is signalled.
    ///
    /// `on_accept` runs on its own task per connection so a slow handshake
    /// never stalls the loop.
    pub fn serve<F, Fut>(self, mut unbind: watch::Receiver<bool>, on_accept: F) -> JoinHandle<()>
    where
        F: Fn(TcpStream, SocketAddr, ConnectionPermit) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let on_accept = Arc::new(on_accept);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = unbind.wait_for(|stop| *stop) => {
                        tracing::info!(local_addr = ?self.local_addr().ok(), "Listener unbound");
                        break;
                    }
                    accepted = self.accept() => match accepted {
                        Ok((stream, addr, permit)) => {
                            let on_accept = Arc::clone(&on_accept);
                            tokio::spawn(async move { on_accept(stream, addr, permit).await });
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "Accept failed");
                        }
                    },
                }
            }
        })
    }
}

/// A connection slot; released back to the listener when dropped.
#[derive(Debug)]
pub struct ConnectionPermit {
    _permit: OwnedSemaphorePermit,
}
