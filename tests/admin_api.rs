//! Admin API over HTTP.

use std::time::Duration;

use protocol_gateway::admin::{self, AdminState};
use protocol_gateway::{Gateway, GatewayConfig, Shutdown};
use serde_json::Value;

mod common;

const KEY: &str = "test-admin-key";

#[tokio::test]
async fn admin_routes_require_the_bearer_token() {
    let config = GatewayConfig {
        services: vec![common::service("echo", "echo", "pipe://admin-echo/", None)],
        ..Default::default()
    };
    let mut gateway = Gateway::builder(config).build().unwrap();
    gateway.start().await.unwrap();

    let addr = common::unused_addr().await;
    let shutdown = Shutdown::new();
    let state = AdminState::new(KEY, gateway.context().clone(), gateway.directory());
    let server = tokio::spawn(admin::serve(addr, state, shutdown.clone()));
    tokio::time::sleep(Duration::from_millis(100)).await;

    let client = reqwest::Client::new();
    let base = format!("http://{addr}");

    let denied = client.get(format!("{base}/admin/status")).send().await.unwrap();
    assert_eq!(denied.status(), reqwest::StatusCode::UNAUTHORIZED);

    let wrong = client
        .get(format!("{base}/admin/status"))
        .bearer_auth("nope")
        .send()
        .await
        .unwrap();
    assert_eq!(wrong.status(), reqwest::StatusCode::UNAUTHORIZED);

    let status: Value = client
        .get(format!("{base}/admin/status"))
        .bearer_auth(KEY)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status["status"], "operational");
    assert_eq!(status["pooled_sessions"], 0);

    let services: Value = client
        .get(format!("{base}/admin/services"))
        .bearer_auth(KEY)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(services[0]["name"], "echo");
    assert_eq!(services[0]["type"], "echo");
    assert_eq!(services[0]["state"], "running");

    let transports: Value = client
        .get(format!("{base}/admin/transports"))
        .bearer_auth(KEY)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let names: Vec<&str> = transports
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|t| t["name"].as_str())
        .collect();
    for name in ["tcp", "http", "ws", "wseb", "pipe"] {
        assert!(names.contains(&name), "{name} listed");
    }

    let pool: Value = client
        .get(format!("{base}/admin/pool"))
        .bearer_auth(KEY)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(pool["idle"], 0);

    shutdown.trigger();
    server.await.unwrap().unwrap();
    gateway.shutdown().await;
}
