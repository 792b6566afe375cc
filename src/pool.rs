//! Persistent connection pool.
//!
//! # Responsibilities
//! - Park idle connect-side sessions under their remote address
//! - Hand a parked session to exactly one taker
//! - Evict sessions whose keep-alive window elapses or that close
//!
//! # Design Decisions
//! - Per-address locking via `DashMap` entries; no global lock
//! - The idle filter sits at the head of the chain so it sees idle events
//!   before any codec
//! - Eviction closes a session only if it removed it, so a stale idle event
//!   can never close a session that was already taken
//! - `take` pops the most recently parked session

use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;

use crate::address::ResourceAddress;
use crate::error::{GatewayError, Result};
use crate::observability::metrics::{self, PoolEvent};
use crate::session::{Filter, IdleStatus, ListenerKey, NextFilter, Session};

/// Chain name of the idle-eviction filter attached while pooled.
pub const IDLE_FILTER: &str = "pool#idle";

struct PooledEntry {
    session: Session,
    listener: ListenerKey,
}

struct PoolInner {
    entries: DashMap<ResourceAddress, Vec<PooledEntry>>,
    default_keep_alive: Duration,
}

/// Cheaply cloneable handle to a shared pool.
#[derive(Clone)]
pub struct PersistentConnectionPool {
    inner: Arc<PoolInner>,
}

/// Idle sessions parked for one address.
#[derive(Debug, Clone, Serialize)]
pub struct PoolSnapshot {
    pub address: String,
    pub idle: usize,
}

impl PersistentConnectionPool {
    pub fn new(default_keep_alive: Duration) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                entries: DashMap::new(),
                default_keep_alive,
            }),
        }
    }

    /// Keep-alive window used when the backend does not advertise one.
    pub fn default_keep_alive(&self) -> Duration {
        self.inner.default_keep_alive
    }

    /// Park an open, unpooled session for reuse for at most `keep_alive`.
    pub fn recycle(&self, session: &Session, keep_alive: Duration) -> Result<()> {
        if session.is_closing() {
            return Err(consistency(session, "cannot pool a closing session"));
        }
        if !session.set_pooled(true) {
            return Err(consistency(session, "session is already pooled"));
        }

        let filter = Arc::new(PoolIdleFilter {
            pool: Arc::downgrade(&self.inner),
        });
        if let Err(e) = session.filter_chain().add_first(IDLE_FILTER, filter) {
            session.set_pooled(false);
            return Err(consistency(session, &e.to_string()));
        }
        session.set_both_idle_time(u64::try_from(keep_alive.as_millis()).unwrap_or(u64::MAX).max(1));

        let weak = Arc::downgrade(&self.inner);
        let listener = session.close_future().add_listener(move |closed| {
            if let Some(inner) = weak.upgrade() {
                if remove_entry(&inner, closed) {
                    tracing::debug!(session_id = %closed.id(), "Pooled session closed by peer");
                }
            }
        });

        let address = session.remote_address().clone();
        self.inner.entries.entry(address.clone()).or_default().push(PooledEntry {
            session: session.clone(),
            listener,
        });

        // A close that raced the insert ran its listener before the entry existed.
        if session.is_closed() {
            remove_entry(&self.inner, session);
            return Ok(());
        }

        metrics::record_pool_event(PoolEvent::Recycled, address.scheme());
        metrics::record_pool_idle(self.len());
        tracing::debug!(
            session_id = %session.id(),
            address = %address,
            keep_alive_ms = u64::try_from(keep_alive.as_millis()).unwrap_or(u64::MAX),
            "Session recycled"
        );
        Ok(())
    }

    /// Take a parked session for `address`, skipping any found closed.
    pub fn take(&self, address: &ResourceAddress) -> Option<Session> {
        loop {
            let entry = {
                let mut slot = self.inner.entries.get_mut(address)?;
                let entry = slot.pop();
                let now_empty = slot.is_empty();
                drop(slot);
                if now_empty {
                    self.inner.entries.remove_if(address, |_, v| v.is_empty());
                }
                entry?
            };

            let session = entry.session;
            session.close_future().remove_listener(entry.listener);
            if !session.set_pooled(false) {
                tracing::error!(session_id = %session.id(), "Pooled session was not marked pooled");
                session.close_now();
                continue;
            }
            if session.is_closing() {
                metrics::record_pool_event(PoolEvent::Stale, address.scheme());
                continue;
            }

            detach(&session);

            metrics::record_pool_event(PoolEvent::Reused, address.scheme());
            metrics::record_pool_idle(self.len());
            tracing::debug!(session_id = %session.id(), address = %address, "Session reused");
            return Some(session);
        }
    }

    /// Remove a session without closing it. False if it was not pooled here.
    pub fn remove(&self, session: &Session) -> bool {
        let removed = remove_entry(&self.inner, session);
        if removed {
            detach(session);
            metrics::record_pool_idle(self.len());
        }
        removed
    }

    /// Number of sessions parked for `address`.
    pub fn idle_count(&self, address: &ResourceAddress) -> usize {
        self.inner.entries.get(address).map(|slot| slot.len()).unwrap_or(0)
    }

    /// Total number of parked sessions.
    pub fn len(&self) -> usize {
        self.inner.entries.iter().map(|slot| slot.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Per-address counts, sorted by address.
    pub fn snapshot(&self) -> Vec<PoolSnapshot> {
        let mut out: Vec<PoolSnapshot> = self
            .inner
            .entries
            .iter()
            .map(|slot| PoolSnapshot {
                address: slot.key().to_string(),
                idle: slot.len(),
            })
            .collect();
        out.sort_by(|a, b| a.address.cmp(&b.address));
        out
    }

    /// Close and forget every parked session.
    pub fn clear(&self) {
        let addresses: Vec<ResourceAddress> = self.inner.entries.iter().map(|slot| slot.key().clone()).collect();
        let mut closed = 0;
        for address in addresses {
            while let Some(session) = self.take(&address) {
                session.close();
                closed += 1;
            }
        }
        metrics::record_pool_idle(0);
        tracing::info!(closed, "Connection pool cleared");
    }
}

impl std::fmt::Debug for PersistentConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistentConnectionPool")
            .field("idle", &self.len())
            .field("default_keep_alive", &self.inner.default_keep_alive)
            .finish()
    }
}

fn consistency(session: &Session, detail: &str) -> GatewayError {
    GatewayError::PoolConsistency {
        session: session.id(),
        detail: detail.to_string(),
    }
}

/// Hand a session back to its owner: no idle filter, no keep-alive timer.
fn detach(session: &Session) {
    session.set_both_idle_time(0);
    let _ = session.filter_chain().remove(IDLE_FILTER);
}

fn remove_entry(inner: &PoolInner, session: &Session) -> bool {
    let address = session.remote_address();
    let removed = {
        let Some(mut slot) = inner.entries.get_mut(address) else {
            return false;
        };
        let removed = slot
            .iter()
            .position(|entry| entry.session == *session)
            .map(|at| slot.remove(at));
        let now_empty = slot.is_empty();
        drop(slot);
        if now_empty {
            inner.entries.remove_if(address, |_, v| v.is_empty());
        }
        removed
    };

    match removed {
        Some(entry) => {
            entry.session.close_future().remove_listener(entry.listener);
            entry.session.set_pooled(false);
            true
        }
        None => false,
    }
}

/// Evicts a pooled session when its keep-alive window passes.
struct PoolIdleFilter {
    pool: Weak<PoolInner>,
}

impl Filter for PoolIdleFilter {
    fn session_idle(&self, next: &mut NextFilter<'_>, session: &Session, status: IdleStatus) -> crate::error::Result<()> {
        if status != IdleStatus::BothIdle {
            return next.session_idle(session, status);
        }
        let Some(inner) = self.pool.upgrade() else {
            return next.session_idle(session, status);
        };
        if remove_entry(&inner, session) {
            metrics::record_pool_event(PoolEvent::Evicted, session.remote_address().scheme());
            tracing::debug!(session_id = %session.id(), "Idle pooled session evicted");
            session.close();
            return Ok(());
        }
        next.session_idle(session, status)
    }
}
