//! Session subsystem.
//!
//! # Data Flow
//! ```text
//! Transport (socket / websocket / emulated / pipe)
//!     → Wire (message stream + message sink)
//!     → driver.rs (one task per session, strict event order)
//!     → chain.rs (filters: head → tail inbound, tail → head outbound)
//!     → IoHandler (service or bridge logic)
//!
//! Writes from other tasks:
//!     session.write(msg) → mailbox → driver → filter_write chain → wire
//! ```
//!
//! # Design Decisions
//! - One driver task per session: events never overlap for a session
//! - Cross-session interaction only by posting onto the target mailbox
//! - Close is a single-assignment future with listeners, fired by the driver
//! - Idle deadlines reset on every read/write and on reconfiguration

pub mod chain;
pub mod close;
mod driver;
pub mod message;
#[cfg(test)]
pub(crate) mod testing;

use std::fmt;
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use futures_util::{Sink, Stream};
use tokio::sync::{mpsc, Notify};

use crate::address::ResourceAddress;
use crate::error::{GatewayError, Result};
use crate::net::connection::SessionTracker;

pub use chain::{Filter, FilterChain, NextFilter, NextWrite};
pub use close::{CloseFuture, CloseListener, ListenerKey};
pub use message::{Frame, Message, Opcode};

/// Global counter for session IDs; only uniqueness matters.
static SESSION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl SessionId {
    pub fn new() -> Self {
        Self(SESSION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// Closed set of session variants, one per transport kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionKind {
    Tcp,
    Http,
    WebSocket,
    Wseb,
    Pipe,
}

impl SessionKind {
    /// Whether the wire carries frames rather than raw bytes.
    pub fn is_framed(self) -> bool {
        matches!(self, SessionKind::WebSocket | SessionKind::Wseb | SessionKind::Pipe)
    }
}

/// Which direction of traffic went quiet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IdleStatus {
    ReaderIdle,
    WriterIdle,
    BothIdle,
}

/// Idle-timeout settings in milliseconds; 0 disables a timer.
#[derive(Debug, Default)]
pub struct SessionConfig {
    read_idle_ms: AtomicU64,
    write_idle_ms: AtomicU64,
    both_idle_ms: AtomicU64,
}

impl SessionConfig {
    pub fn idle_time(&self, status: IdleStatus) -> u64 {
        self.slot(status).load(Ordering::Acquire)
    }

    fn set(&self, status: IdleStatus, millis: u64) {
        self.slot(status).store(millis, Ordering::Release);
    }

    fn slot(&self, status: IdleStatus) -> &AtomicU64 {
        match status {
            IdleStatus::ReaderIdle => &self.read_idle_ms,
            IdleStatus::WriterIdle => &self.write_idle_ms,
            IdleStatus::BothIdle => &self.both_idle_ms,
        }
    }
}

/// Application-side endpoint of a session's filter chain.
pub trait IoHandler: Send + Sync {
    /// Runs before the driver starts; install filters here.
    fn session_created(&self, _session: &Session) -> Result<()> {
        Ok(())
    }

    fn session_opened(&self, _session: &Session) {}

    fn message_received(&self, session: &Session, message: Message);

    fn session_idle(&self, _session: &Session, _status: IdleStatus) {}

    fn session_closed(&self, _session: &Session) {}

    fn exception_caught(&self, session: &Session, error: &GatewayError) {
        tracing::warn!(session_id = %session.id(), error = %error, "Session error");
    }
}

/// Handler for sessions nobody currently owns. Drops inbound traffic.
#[derive(Debug, Default)]
pub struct DetachedHandler;

impl IoHandler for DetachedHandler {
    fn message_received(&self, session: &Session, message: Message) {
        tracing::debug!(
            session_id = %session.id(),
            kind = message.kind(),
            "Dropping message on detached session"
        );
    }
}

/// Inbound half of a transport connection.
pub type MessageStream = Pin<Box<dyn Stream<Item = io::Result<Message>> + Send>>;
/// Outbound half of a transport connection.
pub type MessageSink = Pin<Box<dyn Sink<Message, Error = io::Error> + Send>>;

/// The two halves a transport hands to a new session.
pub struct Wire {
    pub stream: MessageStream,
    pub sink: MessageSink,
}

impl Wire {
    pub fn new(stream: MessageStream, sink: MessageSink) -> Self {
        Self { stream, sink }
    }
}

pub(crate) enum Command {
    Write(Message),
    Close,
    Reconfigure,
}

pub(crate) struct SessionInner {
    id: SessionId,
    kind: SessionKind,
    transport: String,
    local: Option<ResourceAddress>,
    remote: ResourceAddress,
    config: SessionConfig,
    chain: FilterChain,
    handler: RwLock<Arc<dyn IoHandler>>,
    close_future: CloseFuture,
    mailbox: mpsc::UnboundedSender<Command>,
    abort: Notify,
    closing: AtomicBool,
    pooled: AtomicBool,
}

/// Handle to one live logical connection. Cloning shares the session.
#[derive(Clone)]
pub struct Session {
    pub(crate) inner: Arc<SessionInner>,
}

impl Session {
    /// Start building a session for a transport.
    pub fn builder(kind: SessionKind, transport: &str, remote: ResourceAddress) -> SessionBuilder {
        SessionBuilder {
            kind,
            transport: transport.to_string(),
            local: None,
            remote,
            handler: Arc::new(DetachedHandler),
            tracker: None,
        }
    }

    pub fn id(&self) -> SessionId {
        self.inner.id
    }

    pub fn kind(&self) -> SessionKind {
        self.inner.kind
    }

    pub fn transport_name(&self) -> &str {
        &self.inner.transport
    }

    pub fn local_address(&self) -> Option<&ResourceAddress> {
        self.inner.local.as_ref()
    }

    /// Address of the peer; the pooling key for connect-side sessions.
    pub fn remote_address(&self) -> &ResourceAddress {
        &self.inner.remote
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    pub fn filter_chain(&self) -> &FilterChain {
        &self.inner.chain
    }

    pub fn close_future(&self) -> &CloseFuture {
        &self.inner.close_future
    }

    pub fn handler(&self) -> Arc<dyn IoHandler> {
        Arc::clone(&self.inner.handler.read().expect("handler lock poisoned"))
    }

    /// Replace the tail handler; takes effect for the next event.
    pub fn set_handler(&self, handler: Arc<dyn IoHandler>) {
        *self.inner.handler.write().expect("handler lock poisoned") = handler;
    }

    /// Set one idle timer in milliseconds (0 disables it) and restart the window.
    pub fn set_idle_time(&self, status: IdleStatus, millis: u64) {
        self.inner.config.set(status, millis);
        let _ = self.inner.mailbox.send(Command::Reconfigure);
    }

    pub fn set_both_idle_time(&self, millis: u64) {
        self.set_idle_time(IdleStatus::BothIdle, millis);
    }

    /// Queue a message for the outbound chain.
    pub fn write(&self, message: impl Into<Message>) -> Result<()> {
        if self.is_closing() {
            return Err(GatewayError::SessionClosed(self.id()));
        }
        self.inner
            .mailbox
            .send(Command::Write(message.into()))
            .map_err(|_| GatewayError::SessionClosed(self.id()))
    }

    /// Close after every write queued so far has been flushed.
    pub fn close(&self) {
        if !self.inner.closing.swap(true, Ordering::AcqRel) {
            tracing::trace!(session_id = %self.id(), "Closing session");
        }
        let _ = self.inner.mailbox.send(Command::Close);
    }

    /// Close without flushing queued writes.
    pub fn close_now(&self) {
        self.inner.closing.store(true, Ordering::Release);
        self.inner.abort.notify_one();
    }

    /// True once a close has been requested or the peer went away.
    pub fn is_closing(&self) -> bool {
        self.inner.closing.load(Ordering::Acquire)
    }

    /// True once the close future has fired.
    pub fn is_closed(&self) -> bool {
        self.inner.close_future.is_done()
    }

    /// Whether the session currently sits in a connection pool.
    pub fn is_pooled(&self) -> bool {
        self.inner.pooled.load(Ordering::Acquire)
    }

    /// Flip the pooled flag; false if it already had that value.
    pub(crate) fn set_pooled(&self, pooled: bool) -> bool {
        self.inner
            .pooled
            .compare_exchange(!pooled, pooled, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

impl PartialEq for Session {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Session {}

impl std::hash::Hash for Session {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.inner.id.hash(state);
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.inner.id)
            .field("kind", &self.inner.kind)
            .field("remote", &self.inner.remote.to_string())
            .field("closing", &self.is_closing())
            .finish()
    }
}

impl fmt::Display for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.inner.id, self.inner.remote)
    }
}

/// Assembles a session and starts its driver.
pub struct SessionBuilder {
    kind: SessionKind,
    transport: String,
    local: Option<ResourceAddress>,
    remote: ResourceAddress,
    handler: Arc<dyn IoHandler>,
    tracker: Option<SessionTracker>,
}

impl SessionBuilder {
    pub fn local(mut self, local: ResourceAddress) -> Self {
        self.local = Some(local);
        self
    }

    pub fn handler(mut self, handler: Arc<dyn IoHandler>) -> Self {
        self.handler = handler;
        self
    }

    pub fn tracker(mut self, tracker: SessionTracker) -> Self {
        self.tracker = Some(tracker);
        self
    }

    /// Create the session, run `session_created`, then spawn the driver.
    ///
    /// Must be called from within a tokio runtime.
    pub fn open(self, wire: Wire) -> Result<Session> {
        let (mailbox, commands) = mpsc::unbounded_channel();
        let handler = Arc::clone(&self.handler);
        let inner = Arc::new_cyclic(|weak| SessionInner {
            id: SessionId::new(),
            kind: self.kind,
            transport: self.transport,
            local: self.local,
            remote: self.remote,
            config: SessionConfig::default(),
            chain: FilterChain::new(),
            handler: RwLock::new(self.handler),
            close_future: CloseFuture::new(weak.clone()),
            mailbox,
            abort: Notify::new(),
            closing: AtomicBool::new(false),
            pooled: AtomicBool::new(false),
        });
        let session = Session { inner };

        if let Err(e) = handler.session_created(&session) {
            tracing::warn!(session_id = %session.id(), error = %e, "Session initialization failed");
            session.inner.closing.store(true, Ordering::Release);
            session.inner.close_future.complete(&session);
            return Err(e);
        }

        let guard = self.tracker.map(|t| t.track(session.id()));
        tokio::spawn(driver::run(session.clone(), wire, commands, guard));
        Ok(session)
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{pipe_session, RecordingHandler};
    use super::*;
    use futures_util::{SinkExt, StreamExt};
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[tokio::test]
    async fn close_flushes_queued_writes_first() {
        let (session, mut peer) = pipe_session(RecordingHandler::new());
        session.write(Frame::text("a")).unwrap();
        session.write(Frame::text("b")).unwrap();
        session.close();

        let mut seen = Vec::new();
        while let Some(Ok(Message::Frame(frame))) = peer.stream.next().await {
            seen.push(frame.as_str().unwrap_or_default().to_string());
        }
        assert_eq!(seen, vec!["a", "b"]);
        assert!(session.is_closed());
    }

    #[tokio::test]
    async fn writes_after_close_are_rejected() {
        let (session, _peer) = pipe_session(RecordingHandler::new());
        session.close();
        let err = session.write(Frame::text("late")).unwrap_err();
        assert!(matches!(err, GatewayError::SessionClosed(id) if id == session.id()));
    }

    #[tokio::test]
    async fn close_listeners_fire_once_and_late_ones_immediately() {
        let (session, peer) = pipe_session(RecordingHandler::new());
        let fired = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&fired);
        session.close_future().add_listener(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let counter = Arc::clone(&fired);
        let removed = session.close_future().add_listener(move |_| {
            counter.fetch_add(100, Ordering::SeqCst);
        });
        assert!(session.close_future().remove_listener(removed));

        drop(peer);
        session.close_future().wait().await;
        session.close();
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        let counter = Arc::clone(&fired);
        session.close_future().add_listener(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(fired.load(Ordering::SeqCst), 2);
        assert_eq!(session.close_future().listener_count(), 0);
    }

    #[tokio::test]
    async fn peer_hangup_reaches_the_handler() {
        let handler = RecordingHandler::new();
        let (session, mut peer) = pipe_session(handler.clone());
        peer.sink.send(Frame::text("hi").into()).await.unwrap();
        drop(peer);

        session.close_future().wait().await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(handler.received().len(), 1);
        assert!(handler.was_closed());
        assert!(session.is_closing());
    }

    #[tokio::test]
    async fn both_idle_fires_when_quiet_and_can_be_disabled() {
        let handler = RecordingHandler::new();
        let (session, _peer) = pipe_session(handler.clone());

        session.set_both_idle_time(30);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(handler.idle_events().contains(&IdleStatus::BothIdle));

        session.set_both_idle_time(0);
        tokio::time::sleep(Duration::from_millis(20)).await;
        let settled = handler.idle_events().len();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(handler.idle_events().len(), settled);
    }

    #[tokio::test]
    async fn swapped_handler_receives_later_messages() {
        let first = RecordingHandler::new();
        let second = RecordingHandler::new();
        let (session, mut peer) = pipe_session(first.clone());

        peer.sink.send(Frame::text("one").into()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        session.set_handler(second.clone());
        peer.sink.send(Frame::text("two").into()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(first.received().len(), 1);
        assert_eq!(second.received().len(), 1);
    }

    #[test]
    fn only_framed_kinds_carry_frames() {
        assert!(SessionKind::WebSocket.is_framed());
        assert!(SessionKind::Wseb.is_framed());
        assert!(!SessionKind::Tcp.is_framed());
        assert!(!SessionKind::Http.is_framed());
    }
}
