//! Helpers for unit tests that need a live session.

use std::sync::{Arc, Mutex};

use super::{IdleStatus, IoHandler, Message, Session, SessionKind, Wire};
use crate::address::ResourceAddress;
use crate::transport::pipe;

/// Open a pipe session driven by `handler`; the returned wire is the peer end.
pub(crate) fn pipe_session(handler: Arc<dyn IoHandler>) -> (Session, Wire) {
    let (ours, theirs) = pipe::pair();
    let remote = ResourceAddress::new("pipe", "test", None, "/");
    let session = Session::builder(SessionKind::Pipe, "pipe", remote)
        .handler(handler)
        .open(ours)
        .expect("pipe session");
    (session, theirs)
}

/// Records everything delivered to the tail of the chain.
#[derive(Default)]
pub(crate) struct RecordingHandler {
    received: Mutex<Vec<Message>>,
    idle: Mutex<Vec<IdleStatus>>,
    closed: Mutex<bool>,
}

impl RecordingHandler {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn received(&self) -> Vec<Message> {
        self.received.lock().unwrap().clone()
    }

    pub(crate) fn idle_events(&self) -> Vec<IdleStatus> {
        self.idle.lock().unwrap().clone()
    }

    pub(crate) fn was_closed(&self) -> bool {
        *self.closed.lock().unwrap()
    }
}

impl IoHandler for RecordingHandler {
    fn message_received(&self, _session: &Session, message: Message) {
        self.received.lock().unwrap().push(message);
    }

    fn session_idle(&self, _session: &Session, status: IdleStatus) {
        self.idle.lock().unwrap().push(status);
    }

    fn session_closed(&self, _session: &Session) {
        *self.closed.lock().unwrap() = true;
    }
}
