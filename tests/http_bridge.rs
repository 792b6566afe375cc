//! HTTP proxying through the gateway against real sockets.

use std::time::Duration;

mod common;

#[tokio::test]
async fn clean_exchange_recycles_backend_connection() {
    let (backend, stats) = common::start_keep_alive_backend().await;
    let (mut gateway, proxy) = common::start_http_proxy(backend, &[]).await;

    let first = common::send_raw(proxy, "GET", "/a", "").await;
    assert_eq!(first.status, 200);
    assert_eq!(first.body, "backend-1");
    assert_eq!(first.header("connection").as_deref(), Some("close"));
    assert!(first.header("x-request-id").is_some());

    assert_eq!(gateway.context().pool.len(), 1);
    assert_eq!(stats.connections(), 1);

    let head = &stats.requests()[0];
    assert!(head.to_ascii_lowercase().contains("x-forwarded-for: 127.0.0.1"));

    gateway.shutdown().await;
}

#[tokio::test]
async fn lost_pooled_connection_replays_idempotent_request() {
    let (backend, stats) = common::start_keep_alive_backend().await;
    let (mut gateway, proxy) = common::start_http_proxy(backend, &[]).await;

    let first = common::send_raw(proxy, "GET", "/", "").await;
    assert_eq!(first.status, 200);
    assert_eq!(stats.connections(), 1);

    // The backend hangs up on the second request over connection 1.
    let second = common::send_raw(proxy, "GET", "/", "").await;
    assert_eq!(second.status, 200);
    assert_eq!(second.body, "backend-2");
    assert_eq!(stats.connections(), 2);

    gateway.shutdown().await;
}

#[tokio::test]
async fn lost_pooled_connection_fails_non_idempotent_request() {
    let (backend, stats) = common::start_keep_alive_backend().await;
    let (mut gateway, proxy) = common::start_http_proxy(backend, &[]).await;

    let first = common::send_raw(proxy, "GET", "/", "").await;
    assert_eq!(first.status, 200);

    let post = common::send_raw(proxy, "POST", "/orders", "data").await;
    assert_eq!(post.status, 502);
    assert!(post.header("x-request-id").is_some());
    assert_eq!(stats.connections(), 1);
    assert!(gateway.context().pool.is_empty());

    gateway.shutdown().await;
}

#[tokio::test]
async fn keep_alive_disabled_opens_a_connection_per_request() {
    let (backend, stats) = common::start_keep_alive_backend().await;
    let (mut gateway, proxy) = common::start_http_proxy(backend, &[("http.keepalive", "disabled")]).await;

    for expected in 1..=3 {
        let response = common::send_raw(proxy, "GET", "/", "").await;
        assert_eq!(response.status, 200);
        assert_eq!(response.body, format!("backend-{expected}"));
    }
    assert_eq!(stats.connections(), 3);
    assert!(gateway.context().pool.is_empty());

    let head = stats.requests()[0].to_ascii_lowercase();
    assert!(head.contains("connection: close"));

    gateway.shutdown().await;
}

#[tokio::test]
async fn unreachable_backend_answers_bad_gateway() {
    let backend = common::unused_addr().await;
    let (mut gateway, proxy) = common::start_http_proxy(backend, &[]).await;

    let response = tokio::time::timeout(Duration::from_secs(10), common::send_raw(proxy, "GET", "/", ""))
        .await
        .unwrap();
    assert_eq!(response.status, 502);

    gateway.shutdown().await;
}
