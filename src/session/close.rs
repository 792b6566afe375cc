//! Single-assignment close notification.

use std::sync::{Mutex, Weak};

use tokio::sync::watch;

use super::{Session, SessionInner};

/// Callback invoked once when a session closes.
pub type CloseListener = Box<dyn FnOnce(&Session) + Send>;

/// Handle for removing a registered close listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerKey(u64);

struct CloseState {
    done: bool,
    next_key: u64,
    listeners: Vec<(ListenerKey, CloseListener)>,
}

/// Completion signal fired exactly once when its session closes.
///
/// Listeners registered after completion run immediately on the caller.
/// The future only holds a weak reference to its session, so listeners
/// never keep a closed session alive.
pub struct CloseFuture {
    session: Weak<SessionInner>,
    state: Mutex<CloseState>,
    done_tx: watch::Sender<bool>,
}

impl CloseFuture {
    pub(super) fn new(session: Weak<SessionInner>) -> Self {
        let (done_tx, _) = watch::channel(false);
        Self {
            session,
            state: Mutex::new(CloseState {
                done: false,
                next_key: 0,
                listeners: Vec::new(),
            }),
            done_tx,
        }
    }

    /// True once the session has closed.
    pub fn is_done(&self) -> bool {
        self.state.lock().expect("close future mutex poisoned").done
    }

    /// Register a listener. Runs it immediately if the session already closed.
    pub fn add_listener<F>(&self, listener: F) -> ListenerKey
    where
        F: FnOnce(&Session) + Send + 'static,
    {
        let mut state = self.state.lock().expect("close future mutex poisoned");
        let key = ListenerKey(state.next_key);
        state.next_key += 1;
        if !state.done {
            state.listeners.push((key, Box::new(listener)));
            return key;
        }
        drop(state);

        if let Some(inner) = self.session.upgrade() {
            listener(&Session { inner });
        }
        key
    }

    /// Remove a listener that has not fired yet. Returns false if absent.
    pub fn remove_listener(&self, key: ListenerKey) -> bool {
        let mut state = self.state.lock().expect("close future mutex poisoned");
        let before = state.listeners.len();
        state.listeners.retain(|(k, _)| *k != key);
        state.listeners.len() != before
    }

    /// Number of listeners waiting for the close.
    pub fn listener_count(&self) -> usize {
        self.state.lock().expect("close future mutex poisoned").listeners.len()
    }

    /// Wait until the session has closed.
    pub async fn wait(&self) {
        let mut rx = self.done_tx.subscribe();
        let _ = rx.wait_for(|done| *done).await;
    }

    /// Fire the future. Later calls are no-ops.
    pub(super) fn complete(&self, session: &Session) {
        let listeners = {
            let mut state = self.state.lock().expect("close future mutex poisoned");
            if state.done {
                return;
            }
            state.done = true;
            std::mem::take(&mut state.listeners)
        };
        self.done_tx.send_replace(true);

        for (_, listener) in listeners {
            listener(session);
        }
    }
}

impl std::fmt::Debug for CloseFuture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloseFuture")
            .field("done", &self.is_done())
            .field("listeners", &self.listener_count())
            .finish()
    }
}
