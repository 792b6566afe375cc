//! Ordered, named filter pipeline attached to every session.
//!
//! Inbound events (`message_received`, `session_idle`, `session_closed`)
//! run from the first filter to the last and end in the session's
//! [`IoHandler`]. Outbound writes (`filter_write`) run from the last filter
//! to the first and end on the wire. Framing filters therefore sit near the
//! head and higher-level codecs after them.

use std::sync::{Arc, Mutex};

use arc_swap::ArcSwap;

use super::{IdleStatus, IoHandler, Message, Session};
use crate::error::{GatewayError, Result};

/// A protocol-layer transform attached to a session.
///
/// Every hook forwards unchanged by default; implementations override the
/// events they care about and may transform, drop, or close instead.
pub trait Filter: Send + Sync {
    fn message_received(
        &self,
        next: &mut NextFilter<'_>,
        session: &Session,
        message: Message,
    ) -> Result<()> {
        next.message_received(session, message)
    }

    fn filter_write(&self, next: &mut NextWrite<'_>, session: &Session, message: Message) -> Result<()> {
        next.filter_write(session, message)
    }

    fn session_idle(&self, next: &mut NextFilter<'_>, session: &Session, status: IdleStatus) -> Result<()> {
        next.session_idle(session, status)
    }

    fn session_closed(&self, next: &mut NextFilter<'_>, session: &Session) -> Result<()> {
        next.session_closed(session)
    }
}

#[derive(Clone)]
struct Entry {
    name: String,
    filter: Arc<dyn Filter>,
}

/// Continuation for inbound events.
pub struct NextFilter<'a> {
    entries: &'a [Entry],
    index: usize,
    handler: &'a dyn IoHandler,
}

impl NextFilter<'_> {
    pub fn message_received(&mut self, session: &Session, message: Message) -> Result<()> {
        match self.entries.get(self.index) {
            Some(entry) => {
                let mut next = NextFilter {
                    entries: self.entries,
                    index: self.index + 1,
                    handler: self.handler,
                };
                entry.filter.message_received(&mut next, session, message)
            }
            None => {
                self.handler.message_received(session, message);
                Ok(())
            }
        }
    }

    pub fn session_idle(&mut self, session: &Session, status: IdleStatus) -> Result<()> {
        match self.entries.get(self.index) {
            Some(entry) => {
                let mut next = NextFilter {
                    entries: self.entries,
                    index: self.index + 1,
                    handler: self.handler,
                };
                entry.filter.session_idle(&mut next, session, status)
            }
            None => {
                self.handler.session_idle(session, status);
                Ok(())
            }
        }
    }

    pub fn session_closed(&mut self, session: &Session) -> Result<()> {
        match self.entries.get(self.index) {
            Some(entry) => {
                let mut next = NextFilter {
                    entries: self.entries,
                    index: self.index + 1,
                    handler: self.handler,
                };
                entry.filter.session_closed(&mut next, session)
            }
            None => {
                self.handler.session_closed(session);
                Ok(())
            }
        }
    }
}

/// Continuation for outbound writes.
pub struct NextWrite<'a> {
    entries: &'a [Entry],
    remaining: usize,
    out: &'a mut Vec<Message>,
}

impl NextWrite<'_> {
    pub fn filter_write(&mut self, session: &Session, message: Message) -> Result<()> {
        if self.remaining == 0 {
            self.out.push(message);
            return Ok(());
        }
        let entry = &self.entries[self.remaining - 1];
        let mut next = NextWrite {
            entries: self.entries,
            remaining: self.remaining - 1,
            out: &mut *self.out,
        };
        entry.filter.filter_write(&mut next, session, message)
    }
}

/// Named filter list with copy-on-write snapshots.
///
/// Dispatch reads a snapshot without locking; mutations are serialized by
/// a writer lock and published atomically.
pub struct FilterChain {
    entries: ArcSwap<Vec<Entry>>,
    writer: Mutex<()>,
}

impl FilterChain {
    pub fn new() -> Self {
        Self {
            entries: ArcSwap::from_pointee(Vec::new()),
            writer: Mutex::new(()),
        }
    }

    pub fn add_first(&self, name: &str, filter: Arc<dyn Filter>) -> Result<()> {
        self.mutate(|entries| {
            ensure_absent(entries, name)?;
            entries.insert(0, entry(name, filter));
            Ok(())
        })
    }

    pub fn add_last(&self, name: &str, filter: Arc<dyn Filter>) -> Result<()> {
        self.mutate(|entries| {
            ensure_absent(entries, name)?;
            entries.push(entry(name, filter));
            Ok(())
        })
    }

    pub fn add_before(&self, base: &str, name: &str, filter: Arc<dyn Filter>) -> Result<()> {
        self.mutate(|entries| {
            let at = position(entries, base)?;
            ensure_absent(entries, name)?;
            entries.insert(at, entry(name, filter));
            Ok(())
        })
    }

    pub fn add_after(&self, base: &str, name: &str, filter: Arc<dyn Filter>) -> Result<()> {
        self.mutate(|entries| {
            let at = position(entries, base)?;
            ensure_absent(entries, name)?;
            entries.insert(at + 1, entry(name, filter));
            Ok(())
        })
    }

    /// Detach a filter by name and return it.
    pub fn remove(&self, name: &str) -> Result<Arc<dyn Filter>> {
        let mut removed = None;
        self.mutate(|entries| {
            let at = position(entries, name)?;
            removed = Some(entries.remove(at).filter);
            Ok(())
        })?;
        removed.ok_or_else(|| GatewayError::FilterNotFound(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.load().iter().any(|e| e.name == name)
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Filter>> {
        self.entries
            .load()
            .iter()
            .find(|e| e.name == name)
            .map(|e| Arc::clone(&e.filter))
    }

    /// Filter names in registration order.
    pub fn names(&self) -> Vec<String> {
        self.entries.load().iter().map(|e| e.name.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn mutate<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&mut Vec<Entry>) -> Result<()>,
    {
        let _guard = self.writer.lock().expect("filter chain mutex poisoned");
        let mut entries = Vec::clone(&self.entries.load());
        f(&mut entries)?;
        self.entries.store(Arc::new(entries));
        Ok(())
    }

    pub(crate) fn fire_message_received(
        &self,
        session: &Session,
        handler: &dyn IoHandler,
        message: Message,
    ) -> Result<()> {
        let snapshot = self.entries.load_full();
        NextFilter {
            entries: &snapshot,
            index: 0,
            handler,
        }
        .message_received(session, message)
    }

    pub(crate) fn fire_session_idle(
        &self,
        session: &Session,
        handler: &dyn IoHandler,
        status: IdleStatus,
    ) -> Result<()> {
        let snapshot = self.entries.load_full();
        NextFilter {
            entries: &snapshot,
            index: 0,
            handler,
        }
        .session_idle(session, status)
    }

    pub(crate) fn fire_session_closed(&self, session: &Session, handler: &dyn IoHandler) -> Result<()> {
        let snapshot = self.entries.load_full();
        NextFilter {
            entries: &snapshot,
            index: 0,
            handler,
        }
        .session_closed(session)
    }

    /// Run a write through the chain, returning what reaches the wire.
    pub(crate) fn fire_filter_write(&self, session: &Session, message: Message) -> Result<Vec<Message>> {
        let snapshot = self.entries.load_full();
        let mut out = Vec::with_capacity(1);
        NextWrite {
            entries: &snapshot,
            remaining: snapshot.len(),
            out: &mut out,
        }
        .filter_write(session, message)?;
        Ok(out)
    }
}

impl Default for FilterChain {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for FilterChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

fn entry(name: &str, filter: Arc<dyn Filter>) -> Entry {
    Entry {
        name: name.to_string(),
        filter,
    }
}

fn position(entries: &[Entry], name: &str) -> Result<usize> {
    entries
        .iter()
        .position(|e| e.name == name)
        .ok_or_else(|| GatewayError::FilterNotFound(name.to_string()))
}

fn ensure_absent(entries: &[Entry], name: &str) -> Result<()> {
    if entries.iter().any(|e| e.name == name) {
        return Err(GatewayError::DuplicateFilter(name.to_string()));
    }
    Ok(())
}
