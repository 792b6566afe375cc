//! HTTP bridging.
//!
//! # Responsibilities
//! - Forward requests from one accepted HTTP session, one at a time
//! - Rewrite proxy headers in both directions
//! - Reuse pooled backend connections and recycle them after clean exchanges
//! - Answer 502 when the backend cannot be reached
//!
//! # Design Decisions
//! - Requests queue on the accept side and are forwarded in arrival order
//! - A pooled connection lost before its response arrives is replayed once
//!   on a fresh connection for idempotent methods only
//! - The backend decides reuse (`Connection`, `Keep-Alive: timeout=N`);
//!   `http.keepalive = "disabled"` on the connect address opts out

use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use hyper::header::HeaderName;
use hyper::{Method, StatusCode};
use tokio::sync::{mpsc, oneshot};

use super::{BridgeId, BridgeSettings, BridgeState, Connector};
use crate::address::{options, ResourceAddress};
use crate::error::{GatewayError, Result};
use crate::http::headers::{rewrite_request, rewrite_response, X_REQUEST_ID};
use crate::http::{HttpRequest, HttpResponse};
use crate::observability::metrics::{self, BridgeOutcome};
use crate::resilience::is_replayable;
use crate::session::{DetachedHandler, IoHandler, Message, Session};

/// Accept-side handler of an HTTP proxy service.
pub struct HttpProxy {
    route: Arc<Route>,
}

struct Route {
    connector: Connector,
    connect: ResourceAddress,
    settings: BridgeSettings,
}

impl HttpProxy {
    pub fn new(connector: Connector, connect: ResourceAddress, settings: BridgeSettings) -> Self {
        Self {
            route: Arc::new(Route {
                connector,
                connect,
                settings,
            }),
        }
    }
}

impl IoHandler for HttpProxy {
    fn session_created(&self, accept: &Session) -> Result<()> {
        accept.set_handler(HttpBridgeSession::new(Arc::clone(&self.route), accept.clone()));
        Ok(())
    }

    fn message_received(&self, session: &Session, message: Message) {
        tracing::debug!(session_id = %session.id(), kind = message.kind(), "Message before bridge attached");
    }
}

/// Why a single round trip failed.
enum ExchangeError {
    /// The connection went away before a response arrived.
    Lost(String),
    Failed(GatewayError),
}

/// Bridge for one accepted HTTP session.
pub struct HttpBridgeSession {
    id: BridgeId,
    me: Weak<HttpBridgeSession>,
    route: Arc<Route>,
    accept: Session,
    state: Mutex<BridgeState>,
    queue: Mutex<Option<mpsc::UnboundedSender<HttpRequest>>>,
    requests: Mutex<Option<mpsc::UnboundedReceiver<HttpRequest>>>,
}

impl HttpBridgeSession {
    fn new(route: Arc<Route>, accept: Session) -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        Arc::new_cyclic(|me| Self {
            id: BridgeId::new(),
            me: me.clone(),
            route,
            accept,
            state: Mutex::new(BridgeState::Opening),
            queue: Mutex::new(Some(tx)),
            requests: Mutex::new(Some(rx)),
        })
    }

    pub fn id(&self) -> BridgeId {
        self.id
    }

    /// State of the exchange currently in flight.
    pub fn state(&self) -> BridgeState {
        *self.lock_state()
    }

    fn lock_state(&self) -> MutexGuard<'_, BridgeState> {
        self.state.lock().expect("bridge state mutex poisoned")
    }

    fn set_state(&self, state: BridgeState) {
        *self.lock_state() = state;
        tracing::trace!(bridge_id = %self.id, state = state.as_str(), "Bridge state");
    }

    async fn serve(self: Arc<Self>, mut requests: mpsc::UnboundedReceiver<HttpRequest>) {
        while let Some(request) = requests.recv().await {
            let response = self.exchange(request).await;
            let keep_open = response.is_persistent();
            if self.accept.write(response).is_err() {
                break;
            }
            if !keep_open {
                self.accept.close();
                break;
            }
        }
        self.set_state(BridgeState::Closed);
    }

    async fn exchange(&self, mut request: HttpRequest) -> HttpResponse {
        let client_version = request.version;
        let client_keep_alive = request.is_persistent();
        let method = request.method.clone();
        let connect = &self.route.connect;
        let keep_alive = self.route.settings.pool_enabled && connect.keep_alive_enabled();
        let client_ip = self.accept.remote_address().host().to_string();
        let request_id = rewrite_request(&mut request, connect, Some(&client_ip), keep_alive);

        self.set_state(BridgeState::Opening);
        match self.forward(&request, keep_alive).await {
            Ok(mut response) => {
                metrics::record_bridge_outcome(BridgeOutcome::Bridged, connect.scheme());
                tracing::debug!(
                    bridge_id = %self.id,
                    request_id = %request_id,
                    method = %method,
                    target = %request.target,
                    status = response.status.as_u16(),
                    "Exchange complete"
                );
                rewrite_response(&mut response, client_version, client_keep_alive, &request_id);
                response
            }
            Err(e) => {
                metrics::record_bridge_outcome(BridgeOutcome::Failed, connect.scheme());
                tracing::warn!(
                    bridge_id = %self.id,
                    request_id = %request_id,
                    method = %method,
                    error = %e,
                    "Exchange failed"
                );
                self.set_state(BridgeState::Closed);
                let mut response = HttpResponse::bad_gateway(&e.to_string())
                    .with_header(HeaderName::from_static(X_REQUEST_ID), &request_id);
                response.version = client_version;
                response
            }
        }
    }

    async fn forward(&self, request: &HttpRequest, keep_alive: bool) -> Result<HttpResponse> {
        let connect = &self.route.connect;
        let pool = self.route.connector.pool();

        if keep_alive {
            if let Some(session) = pool.take(connect) {
                let (pending, response_rx) = PendingResponse::new();
                session.set_handler(pending.handler());
                match self.round_trip(&session, &pending, response_rx, request, keep_alive).await {
                    Ok(response) => return Ok(response),
                    Err(ExchangeError::Failed(e)) => return Err(e),
                    Err(ExchangeError::Lost(reason)) if is_replayable(&request.method) => {
                        metrics::record_bridge_outcome(BridgeOutcome::Replayed, connect.scheme());
                        tracing::info!(
                            bridge_id = %self.id,
                            method = %request.method,
                            reason = %reason,
                            "Pooled connection lost, replaying on a fresh connection"
                        );
                    }
                    Err(ExchangeError::Lost(reason)) => {
                        return Err(GatewayError::connect_failure(
                            connect,
                            format!("pooled connection lost ({reason}); {} is not replayable", request.method),
                        ));
                    }
                }
            }
        }

        let (pending, response_rx) = PendingResponse::new();
        let session = self.route.connector.open(connect, pending.handler()).await?;
        match self.round_trip(&session, &pending, response_rx, request, keep_alive).await {
            Ok(response) => Ok(response),
            Err(ExchangeError::Failed(e)) => Err(e),
            Err(ExchangeError::Lost(reason)) => Err(GatewayError::connect_failure(connect, reason)),
        }
    }

    async fn round_trip(
        &self,
        session: &Session,
        pending: &Arc<PendingResponse>,
        response_rx: oneshot::Receiver<ResponseResult>,
        request: &HttpRequest,
        keep_alive: bool,
    ) -> std::result::Result<HttpResponse, ExchangeError> {
        let closed = Arc::clone(pending);
        let listener = session
            .close_future()
            .add_listener(move |_| closed.complete(Err("connection closed".to_string())));

        if let Err(e) = session.write(Message::Request(request.clone())) {
            session.close_future().remove_listener(listener);
            session.set_handler(Arc::new(DetachedHandler));
            return Err(ExchangeError::Lost(e.to_string()));
        }
        self.set_state(BridgeState::Bridged);

        let outcome = tokio::time::timeout(self.route.settings.request_timeout, response_rx).await;
        session.close_future().remove_listener(listener);
        session.set_handler(Arc::new(DetachedHandler));
        self.set_state(BridgeState::Closing);

        match outcome {
            Ok(Ok(Ok(response))) => {
                self.release(session, &request.method, &response, keep_alive);
                Ok(response)
            }
            Ok(Ok(Err(reason))) => {
                session.close_now();
                Err(ExchangeError::Lost(reason))
            }
            Ok(Err(_)) => {
                session.close_now();
                Err(ExchangeError::Lost("response channel dropped".to_string()))
            }
            Err(_) => {
                session.close_now();
                Err(ExchangeError::Failed(GatewayError::connect_failure(
                    &self.route.connect,
                    format!(
                        "no response within {}ms",
                        self.route.settings.request_timeout.as_millis()
                    ),
                )))
            }
        }
    }

    /// Recycle the connect side after a clean exchange, or close it.
    fn release(&self, session: &Session, method: &Method, response: &HttpResponse, keep_alive: bool) {
        let window = self.keep_alive_window(response);
        let reusable = keep_alive
            && response.is_persistent()
            && !session.is_closing()
            && *method != Method::CONNECT
            && response.status != StatusCode::SWITCHING_PROTOCOLS
            && !window.is_zero();

        if reusable {
            if let Err(e) = self.route.connector.pool().recycle(session, window) {
                tracing::error!(bridge_id = %self.id, session_id = %session.id(), error = %e, "Recycle failed");
                session.close_now();
            }
        } else {
            session.close();
        }
        self.set_state(BridgeState::Closed);
    }

    fn keep_alive_window(&self, response: &HttpResponse) -> Duration {
        response
            .keep_alive_timeout()
            .or_else(|| {
                self.route
                    .connect
                    .option(options::HTTP_KEEPALIVE_TIMEOUT)
                    .and_then(|secs| secs.parse::<u64>().ok())
                    .map(Duration::from_secs)
            })
            .unwrap_or_else(|| self.route.connector.pool().default_keep_alive())
    }
}

impl IoHandler for HttpBridgeSession {
    fn session_opened(&self, _accept: &Session) {
        let requests = self.requests.lock().expect("bridge queue mutex poisoned").take();
        if let (Some(bridge), Some(requests)) = (self.me.upgrade(), requests) {
            tokio::spawn(bridge.serve(requests));
        }
    }

    fn message_received(&self, accept: &Session, message: Message) {
        match message {
            Message::Request(request) => {
                let queue = self.queue.lock().expect("bridge queue mutex poisoned");
                if let Some(tx) = queue.as_ref() {
                    let _ = tx.send(request);
                }
            }
            other => {
                tracing::debug!(session_id = %accept.id(), kind = other.kind(), "Ignoring non-request message");
            }
        }
    }

    fn session_closed(&self, _accept: &Session) {
        self.queue.lock().expect("bridge queue mutex poisoned").take();
        tracing::debug!(bridge_id = %self.id, "Accept side closed");
    }
}

type ResponseResult = std::result::Result<HttpResponse, String>;

/// One-shot slot the connect side fills with the next response.
struct PendingResponse {
    tx: Mutex<Option<oneshot::Sender<ResponseResult>>>,
}

impl PendingResponse {
    fn new() -> (Arc<Self>, oneshot::Receiver<ResponseResult>) {
        let (tx, rx) = oneshot::channel();
        (Arc::new(Self { tx: Mutex::new(Some(tx)) }), rx)
    }

    fn handler(self: &Arc<Self>) -> Arc<dyn IoHandler> {
        Arc::new(ResponseHandler {
            pending: Arc::clone(self),
        })
    }

    fn complete(&self, result: ResponseResult) {
        if let Some(tx) = self.tx.lock().expect("pending response mutex poisoned").take() {
            let _ = tx.send(result);
        }
    }
}

/// Connect-side tail handler for the duration of one exchange.
struct ResponseHandler {
    pending: Arc<PendingResponse>,
}

impl IoHandler for ResponseHandler {
    fn message_received(&self, session: &Session, message: Message) {
        match message {
            Message::Response(response) => self.pending.complete(Ok(response)),
            other => {
                tracing::debug!(session_id = %session.id(), kind = other.kind(), "Unexpected message from backend");
            }
        }
    }

    fn exception_caught(&self, session: &Session, error: &GatewayError) {
        tracing::debug!(session_id = %session.id(), error = %error, "Backend connection error");
        self.pending.complete(Err(error.to_string()));
    }
}
