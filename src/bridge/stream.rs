//! Stream bridging: every message accepted on one leg is written to the
//! other for the life of the pair.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use super::{BridgeId, BridgeState, Connector};
use crate::address::ResourceAddress;
use crate::error::Result;
use crate::filter::wseb::{EncodingMode, WsebEncodingCodec, FILTER_NAME};
use crate::observability::metrics::{self, BridgeOutcome};
use crate::session::{IoHandler, Message, Session, SessionKind};
use crate::transport::{with_initializer, wseb};

/// Accept-side handler of a stream proxy service.
pub struct StreamProxy {
    connector: Connector,
    connect: ResourceAddress,
}

impl StreamProxy {
    pub fn new(connector: Connector, connect: ResourceAddress) -> Self {
        Self { connector, connect }
    }
}

impl IoHandler for StreamProxy {
    fn session_created(&self, accept: &Session) -> Result<()> {
        let (accept_mode, _) = encoding_modes(accept.kind(), self.connect.scheme());
        if let Some(mode) = accept_mode {
            accept
                .filter_chain()
                .add_last(FILTER_NAME, Arc::new(WsebEncodingCodec::new(mode)))?;
        }
        let bridge = BridgeSession::new(self.connector.clone(), self.connect.clone(), accept.clone());
        accept.set_handler(bridge);
        Ok(())
    }

    fn message_received(&self, session: &Session, message: Message) {
        tracing::debug!(session_id = %session.id(), kind = message.kind(), "Message before bridge attached");
    }
}

/// Which encoding codec each leg needs when a bridge crosses the emulated
/// WebSocket boundary: `(accept leg, connect leg)`.
pub fn encoding_modes(accept: SessionKind, connect_scheme: &str) -> (Option<EncodingMode>, Option<EncodingMode>) {
    let accept_emulated = accept == SessionKind::Wseb;
    let connect_emulated = connect_scheme.eq_ignore_ascii_case(wseb::NAME);
    let accept_native = accept == SessionKind::WebSocket;
    let connect_native = connect_scheme.eq_ignore_ascii_case(crate::transport::ws::NAME);

    match (accept_emulated, connect_emulated) {
        (true, false) if connect_native => (Some(EncodingMode::TextAsBinary), Some(EncodingMode::BinaryAsText)),
        (false, true) if accept_native => (Some(EncodingMode::BinaryAsText), Some(EncodingMode::TextAsBinary)),
        _ => (None, None),
    }
}

struct BridgeInner {
    state: BridgeState,
    connect: Option<Session>,
    pending: VecDeque<Message>,
}

/// One accept-side session paired with one connect-side session.
pub struct BridgeSession {
    id: BridgeId,
    me: Weak<BridgeSession>,
    connector: Connector,
    connect_address: ResourceAddress,
    accept: Session,
    inner: Mutex<BridgeInner>,
}

impl BridgeSession {
    fn new(connector: Connector, connect_address: ResourceAddress, accept: Session) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            id: BridgeId::new(),
            me: me.clone(),
            connector,
            connect_address,
            accept,
            inner: Mutex::new(BridgeInner {
                state: BridgeState::Opening,
                connect: None,
                pending: VecDeque::new(),
            }),
        })
    }

    pub fn id(&self) -> BridgeId {
        self.id
    }

    pub fn state(&self) -> BridgeState {
        self.lock().state
    }

    fn lock(&self) -> MutexGuard<'_, BridgeInner> {
        self.inner.lock().expect("bridge mutex poisoned")
    }

    async fn open_connect_side(self: Arc<Self>) {
        let (_, connect_mode) = encoding_modes(self.accept.kind(), self.connect_address.scheme());
        let side: Arc<dyn IoHandler> = Arc::new(ConnectSide {
            bridge: Arc::downgrade(&self),
        });
        let handler = match connect_mode {
            Some(mode) => with_initializer(side, move |session| {
                session
                    .filter_chain()
                    .add_last(FILTER_NAME, Arc::new(WsebEncodingCodec::new(mode)))
            }),
            None => side,
        };

        let scheme = self.connect_address.scheme().to_string();
        match self.connector.open(&self.connect_address, handler).await {
            Ok(connect) => {
                let mut inner = self.lock();
                if inner.state != BridgeState::Opening {
                    drop(inner);
                    tracing::debug!(bridge_id = %self.id, "Accept side left while opening");
                    connect.close();
                    return;
                }
                let flushed = inner.pending.len();
                for message in inner.pending.drain(..) {
                    if connect.write(message).is_err() {
                        break;
                    }
                }
                inner.connect = Some(connect.clone());
                inner.state = BridgeState::Bridged;
                drop(inner);

                metrics::record_bridge_outcome(BridgeOutcome::Bridged, &scheme);
                tracing::debug!(
                    bridge_id = %self.id,
                    accept = %self.accept.id(),
                    connect = %connect.id(),
                    flushed,
                    "Bridged"
                );
            }
            Err(e) => {
                {
                    let mut inner = self.lock();
                    inner.state = BridgeState::Closed;
                    inner.pending.clear();
                }
                metrics::record_bridge_outcome(BridgeOutcome::Failed, &scheme);
                tracing::warn!(bridge_id = %self.id, address = %self.connect_address, error = %e, "Bridge failed to open");
                self.accept.close();
            }
        }
    }

    /// Close both legs once. Later calls are no-ops.
    fn shut_down(&self, reason: &'static str) {
        let connect = {
            let mut inner = self.lock();
            if matches!(inner.state, BridgeState::Closing | BridgeState::Closed) {
                return;
            }
            inner.state = BridgeState::Closing;
            inner.pending.clear();
            inner.connect.take()
        };
        tracing::debug!(bridge_id = %self.id, reason, "Bridge closing");

        if let Some(connect) = connect {
            connect.close();
        }
        self.accept.close();
        self.lock().state = BridgeState::Closed;
    }
}

impl IoHandler for BridgeSession {
    fn session_opened(&self, _accept: &Session) {
        if let Some(bridge) = self.me.upgrade() {
            tokio::spawn(bridge.open_connect_side());
        }
    }

    fn message_received(&self, _accept: &Session, message: Message) {
        let mut inner = self.lock();
        match inner.state {
            BridgeState::Opening => inner.pending.push_back(message),
            BridgeState::Bridged => {
                let failed = inner.connect.as_ref().is_some_and(|c| c.write(message).is_err());
                drop(inner);
                if failed {
                    self.shut_down("connect side rejected write");
                }
            }
            BridgeState::Closing | BridgeState::Closed => {
                tracing::trace!(bridge_id = %self.id, "Dropping message on closing bridge");
            }
        }
    }

    fn session_closed(&self, _accept: &Session) {
        self.shut_down("accept side closed");
    }
}

/// Tail handler of the connect-side leg.
struct ConnectSide {
    bridge: Weak<BridgeSession>,
}

impl IoHandler for ConnectSide {
    fn message_received(&self, connect: &Session, message: Message) {
        let Some(bridge) = self.bridge.upgrade() else {
            connect.close();
            return;
        };
        if bridge.accept.write(message).is_err() {
            bridge.shut_down("accept side rejected write");
        }
    }

    fn session_closed(&self, _connect: &Session) {
        if let Some(bridge) = self.bridge.upgrade() {
            bridge.shut_down("connect side closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::PersistentConnectionPool;
    use crate::resilience::RetryPolicy;
    use crate::service::echo::EchoHandler;
    use crate::session::testing::pipe_session;
    use crate::session::Frame;
    use crate::transport::pipe::PipeTransport;
    use crate::transport::{Transport, TransportContext, TransportRegistry};
    use futures_util::StreamExt;
    use std::time::Duration;

    fn connector(pipe: Arc<PipeTransport>) -> Connector {
        let mut builder = TransportRegistry::builder();
        builder.register(pipe).unwrap();
        Connector::new(
            Arc::new(builder.build()),
            PersistentConnectionPool::new(Duration::from_secs(30)),
            Duration::from_secs(1),
            RetryPolicy::once(),
        )
    }

    fn text_of(message: Message) -> String {
        match message {
            Message::Frame(frame) => frame.as_str().unwrap_or_default().to_string(),
            other => panic!("unexpected {}", other.kind()),
        }
    }

    #[tokio::test]
    async fn messages_queued_while_opening_arrive_in_order() {
        let pipe = Arc::new(PipeTransport::new(&TransportContext::default()));
        let backend = ResourceAddress::new("pipe", "echo", None, "/");
        let _binding = pipe.bind(&backend, Arc::new(EchoHandler)).await.unwrap();

        let proxy = Arc::new(StreamProxy::new(connector(pipe), backend));
        let (accept, mut peer) = pipe_session(proxy);
        assert_eq!(accept.transport_name(), "pipe");
        for word in ["one", "two", "three"] {
            futures_util::SinkExt::send(&mut peer.sink, Frame::text(word).into()).await.unwrap();
        }

        let mut echoed = Vec::new();
        for _ in 0..3 {
            let message = tokio::time::timeout(Duration::from_secs(1), peer.stream.next())
                .await
                .unwrap()
                .unwrap()
                .unwrap();
            echoed.push(text_of(message));
        }
        assert_eq!(echoed, vec!["one", "two", "three"]);
    }

    #[tokio::test]
    async fn failed_open_closes_accept_side() {
        let pipe = Arc::new(PipeTransport::new(&TransportContext::default()));
        let missing = ResourceAddress::new("pipe", "nowhere", None, "/");
        let proxy = Arc::new(StreamProxy::new(connector(pipe), missing));
        let (accept, mut peer) = pipe_session(proxy);

        tokio::time::timeout(Duration::from_secs(1), accept.close_future().wait())
            .await
            .unwrap();
        assert!(peer.stream.next().await.is_none());
    }

    #[tokio::test]
    async fn accept_close_closes_connect_side() {
        let ctx = TransportContext::default();
        let pipe = Arc::new(PipeTransport::new(&ctx));
        let backend = ResourceAddress::new("pipe", "echo", None, "/");
        let _binding = pipe.bind(&backend, Arc::new(EchoHandler)).await.unwrap();

        let proxy = Arc::new(StreamProxy::new(connector(Arc::clone(&pipe)), backend));
        let (accept, mut peer) = pipe_session(proxy);
        futures_util::SinkExt::send(&mut peer.sink, Frame::text("hi").into()).await.unwrap();
        let _ = peer.stream.next().await;

        assert_eq!(ctx.tracker.active_count(), 2);

        accept.close();
        accept.close_future().wait().await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(ctx.tracker.active_count(), 0);
    }

    #[test]
    fn codecs_only_cross_the_emulated_boundary() {
        assert_eq!(
            encoding_modes(SessionKind::Wseb, "ws"),
            (Some(EncodingMode::TextAsBinary), Some(EncodingMode::BinaryAsText))
        );
        assert_eq!(
            encoding_modes(SessionKind::WebSocket, "wseb"),
            (Some(EncodingMode::BinaryAsText), Some(EncodingMode::TextAsBinary))
        );
        assert_eq!(encoding_modes(SessionKind::WebSocket, "ws"), (None, None));
        assert_eq!(encoding_modes(SessionKind::Wseb, "wseb"), (None, None));
        assert_eq!(encoding_modes(SessionKind::Tcp, "tcp"), (None, None));
    }
}
