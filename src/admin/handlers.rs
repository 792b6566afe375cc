use axum::{extract::State, Json};
use serde::Serialize;

use super::AdminState;
use crate::gateway::ServiceSummary;
use crate::pool::PoolSnapshot;

#[derive(Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub uptime_secs: u64,
    pub active_sessions: u64,
    pub pooled_sessions: usize,
}

#[derive(Serialize)]
pub struct TransportStatus {
    pub name: String,
    pub schemes: Vec<String>,
    pub default_ports: Vec<Option<u16>>,
}

#[derive(Serialize)]
pub struct PoolStatus {
    pub idle: usize,
    pub addresses: Vec<PoolSnapshot>,
}

pub async fn get_status(State(state): State<AdminState>) -> Json<SystemStatus> {
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: "operational",
        uptime_secs: state.started.elapsed().as_secs(),
        active_sessions: state.gateway.tracker.active_count(),
        pooled_sessions: state.gateway.pool.len(),
    })
}

pub async fn get_services(State(state): State<AdminState>) -> Json<Vec<ServiceSummary>> {
    let services = state.services.read().map(|s| s.clone()).unwrap_or_default();
    Json(services)
}

pub async fn get_transports(State(state): State<AdminState>) -> Json<Vec<TransportStatus>> {
    let transports = state
        .gateway
        .registry
        .transports()
        .iter()
        .map(|t| {
            let schemes = t.scheme_names();
            let default_ports = schemes.iter().map(|s| t.default_port(s)).collect();
            TransportStatus {
                name: t.name().to_string(),
                schemes,
                default_ports,
            }
        })
        .collect();
    Json(transports)
}

pub async fn get_pool(State(state): State<AdminState>) -> Json<PoolStatus> {
    let addresses = state.gateway.pool.snapshot();
    Json(PoolStatus {
        idle: addresses.iter().map(|a| a.idle).sum(),
        addresses,
    })
}
