//! Shared utilities for integration tests: mock backends and a gateway
//! harness.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use protocol_gateway::config::ServiceConfig;
use protocol_gateway::{Gateway, GatewayConfig};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;

/// What a keep-alive backend observed.
#[derive(Clone, Default)]
pub struct BackendStats {
    connections: Arc<AtomicU32>,
    requests: Arc<Mutex<Vec<String>>>,
}

impl BackendStats {
    pub fn connections(&self) -> u32 {
        self.connections.load(Ordering::SeqCst)
    }

    /// Raw request heads in arrival order.
    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

/// Start an HTTP backend that answers the first request on every
/// connection with `Keep-Alive: timeout=30`, then drops the connection
/// without answering the next one.
pub async fn start_keep_alive_backend() -> (SocketAddr, BackendStats) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let stats = BackendStats::default();
    let shared = stats.clone();

    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            let connection = shared.connections.fetch_add(1, Ordering::SeqCst) + 1;
            let requests = Arc::clone(&shared.requests);
            tokio::spawn(async move {
                let mut reader = BufReader::new(socket);
                let Some(head) = read_request(&mut reader).await else {
                    return;
                };
                requests.lock().unwrap().push(head);

                let body = format!("backend-{connection}");
                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: keep-alive\r\nKeep-Alive: timeout=30\r\n\r\n{}",
                    body.len(),
                    body
                );
                if reader.get_mut().write_all(response.as_bytes()).await.is_err() {
                    return;
                }

                // Second request on the same connection: hang up instead of answering.
                if let Some(head) = read_request(&mut reader).await {
                    requests.lock().unwrap().push(head);
                }
            });
        }
    });

    (addr, stats)
}

/// Read one request head plus its `Content-Length` body.
async fn read_request(reader: &mut BufReader<TcpStream>) -> Option<String> {
    let mut head = String::new();
    let mut content_length = 0usize;
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line).await.ok()? == 0 {
            return None;
        }
        if line == "\r\n" {
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            if name.eq_ignore_ascii_case("content-length") {
                content_length = value.trim().parse().unwrap_or(0);
            }
        }
        head.push_str(&line);
    }
    let mut body = vec![0u8; content_length];
    reader.read_exact(&mut body).await.ok()?;
    Some(head)
}

/// Start a native WebSocket backend that echoes every data frame and
/// reports what it received.
pub async fn start_native_ws_backend() -> (SocketAddr, mpsc::UnboundedReceiver<tungstenite::Message>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            let tx = tx.clone();
            tokio::spawn(async move {
                let Ok(mut ws) = tokio_tungstenite::accept_async(socket).await else {
                    return;
                };
                while let Some(Ok(message)) = ws.next().await {
                    if !(message.is_text() || message.is_binary()) {
                        continue;
                    }
                    let _ = tx.send(message.clone());
                    if ws.send(message).await.is_err() {
                        break;
                    }
                }
            });
        }
    });

    (addr, rx)
}

/// A port nothing is listening on.
pub async fn unused_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

pub fn service(name: &str, service_type: &str, accept: &str, connect: Option<String>) -> ServiceConfig {
    ServiceConfig {
        name: name.to_string(),
        service_type: service_type.to_string(),
        accept: vec![accept.to_string()],
        connect,
        accept_options: BTreeMap::new(),
        connect_options: BTreeMap::new(),
        properties: BTreeMap::new(),
    }
}

/// Build and start a gateway, returning the first socket address the named
/// service bound.
pub async fn start_gateway(mut config: GatewayConfig, service: &str) -> (Gateway, SocketAddr) {
    config.retries.base_delay_ms = 10;
    config.retries.max_delay_ms = 50;
    let mut gateway = Gateway::builder(config).build().unwrap();
    gateway.start().await.unwrap();
    let addr = gateway.bound_addresses(service)[0];
    (gateway, addr)
}

/// An `http.proxy` gateway in front of `backend`.
pub async fn start_http_proxy(backend: SocketAddr, connect_options: &[(&str, &str)]) -> (Gateway, SocketAddr) {
    let mut proxy = service(
        "web",
        "http.proxy",
        "http://127.0.0.1:0/",
        Some(format!("http://{backend}/")),
    );
    for (key, value) in connect_options {
        proxy.connect_options.insert(key.to_string(), value.to_string());
    }
    let config = GatewayConfig {
        services: vec![proxy],
        ..Default::default()
    };
    start_gateway(config, "web").await
}

/// Parsed response from [`send_raw`].
#[derive(Debug)]
pub struct RawResponse {
    pub status: u16,
    pub head: String,
    pub body: String,
}

impl RawResponse {
    pub fn header(&self, name: &str) -> Option<String> {
        self.head.lines().find_map(|line| {
            let (key, value) = line.split_once(':')?;
            key.eq_ignore_ascii_case(name).then(|| value.trim().to_string())
        })
    }
}

/// Send one request with `Connection: close` and read until EOF.
pub async fn send_raw(addr: SocketAddr, method: &str, path: &str, body: &str) -> RawResponse {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let request = format!(
        "{method} {path} HTTP/1.1\r\nHost: {addr}\r\nConnection: close\r\nContent-Length: {}\r\n\r\n{body}",
        body.len()
    );
    stream.write_all(request.as_bytes()).await.unwrap();

    let mut raw = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut raw))
        .await
        .expect("response within 5s")
        .unwrap();
    let raw = String::from_utf8_lossy(&raw).into_owned();
    let (head, body) = raw.split_once("\r\n\r\n").unwrap_or((raw.as_str(), ""));
    let status = head
        .split_whitespace()
        .nth(1)
        .and_then(|code| code.parse().ok())
        .unwrap_or(0);
    RawResponse {
        status,
        head: head.to_string(),
        body: body.to_string(),
    }
}
