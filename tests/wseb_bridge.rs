//! Bridging an emulated WebSocket client to a native WebSocket backend.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use protocol_gateway::session::{Frame, IoHandler, Message, Opcode, Session};
use protocol_gateway::transport::wseb::WsebTransport;
use protocol_gateway::transport::{Transport, TransportContext};
use protocol_gateway::{GatewayConfig, ResourceAddress};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;

mod common;

struct Forward(mpsc::UnboundedSender<Message>);

impl IoHandler for Forward {
    fn message_received(&self, _session: &Session, message: Message) {
        let _ = self.0.send(message);
    }
}

#[tokio::test]
async fn frames_cross_the_emulated_boundary_with_same_bytes() {
    let (backend, mut backend_rx) = common::start_native_ws_backend().await;
    let config = GatewayConfig {
        services: vec![common::service(
            "ws-bridge",
            "proxy",
            "wseb://127.0.0.1:0/",
            Some(format!("ws://{backend}/")),
        )],
        ..Default::default()
    };
    let (mut gateway, bound) = common::start_gateway(config, "ws-bridge").await;

    let (tx, mut client_rx) = mpsc::unbounded_channel();
    let client = WsebTransport::new(&TransportContext::default())
        .connect(
            &ResourceAddress::new("wseb", "127.0.0.1", Some(bound.port()), "/"),
            Arc::new(Forward(tx)),
        )
        .await
        .unwrap();

    let payload = "héllo gateway";
    client.write(Frame::binary(Bytes::from(payload))).unwrap();

    // Native side sees text with identical bytes.
    let received = tokio::time::timeout(Duration::from_secs(5), backend_rx.recv())
        .await
        .unwrap()
        .unwrap();
    match received {
        tungstenite::Message::Text(text) => assert_eq!(text.as_str(), payload),
        other => panic!("expected text frame, got {other:?}"),
    }

    // The echoed text comes back to the emulated client as binary.
    let echoed = tokio::time::timeout(Duration::from_secs(5), client_rx.recv())
        .await
        .unwrap()
        .unwrap();
    match echoed {
        Message::Frame(frame) => {
            assert_eq!(frame.opcode, Opcode::Binary);
            assert_eq!(&frame.payload[..], payload.as_bytes());
        }
        other => panic!("unexpected {}", other.kind()),
    }

    client.close();
    gateway.shutdown().await;
}

#[tokio::test]
async fn non_utf8_binary_stays_binary_on_the_native_leg() {
    let (backend, mut backend_rx) = common::start_native_ws_backend().await;
    let config = GatewayConfig {
        services: vec![common::service(
            "ws-bridge",
            "proxy",
            "wseb://127.0.0.1:0/",
            Some(format!("ws://{backend}/")),
        )],
        ..Default::default()
    };
    let (mut gateway, bound) = common::start_gateway(config, "ws-bridge").await;

    let (tx, _client_rx) = mpsc::unbounded_channel();
    let client = WsebTransport::new(&TransportContext::default())
        .connect(
            &ResourceAddress::new("wseb", "127.0.0.1", Some(bound.port()), "/"),
            Arc::new(Forward(tx)),
        )
        .await
        .unwrap();

    let payload: &'static [u8] = &[0xff, 0x00, 0xfe];
    client.write(Frame::binary(Bytes::from_static(payload))).unwrap();

    let received = tokio::time::timeout(Duration::from_secs(5), backend_rx.recv())
        .await
        .unwrap()
        .unwrap();
    match received {
        tungstenite::Message::Binary(bytes) => assert_eq!(&bytes[..], payload),
        other => panic!("expected binary frame, got {other:?}"),
    }

    client.close();
    gateway.shutdown().await;
}
