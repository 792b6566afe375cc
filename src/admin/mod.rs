//! Admin HTTP API.
//!
//! # Routes
//! - `GET /admin/status`: version, uptime, live sessions
//! - `GET /admin/services`: configured services and their state
//! - `GET /admin/transports`: registered transports and schemes
//! - `GET /admin/pool`: idle persistent connections per address
//!
//! Every route requires `Authorization: Bearer <api_key>`.

pub mod auth;
pub mod handlers;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{middleware, routing::get, Router};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use self::auth::admin_auth_middleware;
use self::handlers::{get_pool, get_services, get_status, get_transports};
use crate::gateway::ServiceDirectory;
use crate::lifecycle::Shutdown;
use crate::service::GatewayContext;

/// State shared by the admin handlers.
#[derive(Clone)]
pub struct AdminState {
    pub api_key: Arc<str>,
    pub gateway: GatewayContext,
    pub services: ServiceDirectory,
    pub started: Instant,
}

impl AdminState {
    pub fn new(api_key: &str, gateway: GatewayContext, services: ServiceDirectory) -> Self {
        Self {
            api_key: Arc::from(api_key),
            gateway,
            services,
            started: Instant::now(),
        }
    }
}

#[allow(deprecated)]
pub fn setup_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/services", get(get_services))
        .route("/admin/transports", get(get_transports))
        .route("/admin/pool", get(get_pool))
        .layer(middleware::from_fn_with_state(state.clone(), admin_auth_middleware))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(TimeoutLayer::new(Duration::from_secs(10))),
        )
}

/// Serve the admin API until `shutdown` triggers.
pub async fn serve(addr: SocketAddr, state: AdminState, shutdown: Shutdown) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(address = %listener.local_addr()?, "Admin API listening");
    axum::serve(listener, setup_admin_router(state))
        .with_graceful_shutdown(async move { shutdown.wait().await })
        .await?;
    tracing::info!("Admin API stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::testing::pipe_gateway;
    use axum::body::Body;
    use axum::http::{header::AUTHORIZATION, Request, StatusCode};
    use tower::ServiceExt;

    fn router() -> Router {
        let (gateway, _pipe) = pipe_gateway();
        setup_admin_router(AdminState::new("secret", gateway, ServiceDirectory::default()))
    }

    #[tokio::test]
    async fn missing_token_is_unauthorized() {
        let response = router()
            .oneshot(Request::get("/admin/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn pool_route_answers_with_token() {
        let request = Request::get("/admin/pool")
            .header(AUTHORIZATION, "Bearer secret")
            .body(Body::empty())
            .unwrap();
        let response = router().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
