//! Startup orchestration.
//!
//! # Responsibilities
//! - Initialize metrics before any session exists
//! - Build the gateway and start its services
//! - Start the admin API
//! - Wait for shutdown, then stop everything in order
//!
//! # Design Decisions
//! - Fail fast: a gateway that cannot start any service exits
//! - Accept addresses bind last (traffic only when ready)

use std::net::SocketAddr;

use super::signals::watch_signals;
use super::Shutdown;
use crate::admin::{self, AdminState};
use crate::config::GatewayConfig;
use crate::error::Result;
use crate::gateway::Gateway;
use crate::observability::metrics;

/// Run the gateway until `shutdown` triggers (or a signal arrives).
pub async fn run(config: GatewayConfig, shutdown: Shutdown) -> Result<()> {
    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse::<SocketAddr>() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(e) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                error = %e,
                "Failed to parse metrics address"
            ),
        }
    }

    let admin_config = config.admin.clone();
    tracing::info!(
        services = config.services.len(),
        max_connections = config.listener.max_connections,
        pool_enabled = config.pool.enabled,
        "Configuration loaded"
    );

    let mut gateway = Gateway::builder(config).build()?;
    gateway.start().await?;

    let admin_task = if admin_config.enabled {
        match admin_config.bind_address.parse::<SocketAddr>() {
            Ok(addr) => {
                let state = AdminState::new(&admin_config.api_key, gateway.context().clone(), gateway.directory());
                let shutdown = shutdown.clone();
                Some(tokio::spawn(async move {
                    if let Err(e) = admin::serve(addr, state, shutdown).await {
                        tracing::error!(error = %e, "Admin API failed");
                    }
                }))
            }
            Err(e) => {
                tracing::error!(bind_address = %admin_config.bind_address, error = %e, "Invalid admin address");
                None
            }
        }
    } else {
        None
    };

    let signals = watch_signals(shutdown.clone());
    tracing::info!("Gateway running");
    shutdown.wait().await;

    gateway.shutdown().await;
    if let Some(task) = admin_task {
        let _ = task.await;
    }
    signals.abort();
    Ok(())
}
