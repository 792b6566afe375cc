//! Per-session event loop.
//!
//! Owns the wire halves and the command mailbox. Every event for the
//! session (inbound message, queued write, idle deadline, close) is handled
//! here one at a time, which gives in-order, non-overlapping delivery.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};

use super::{Command, DetachedHandler, IdleStatus, Message, Session, Wire};
use crate::error::{GatewayError, Result};
use crate::net::connection::SessionGuard;

/// Last activity (or last idle notification) per idle status.
struct IdleMarks {
    read: Instant,
    write: Instant,
    both: Instant,
}

impl IdleMarks {
    fn new() -> Self {
        let now = Instant::now();
        Self {
            read: now,
            write: now,
            both: now,
        }
    }

    fn on_read(&mut self) {
        let now = Instant::now();
        self.read = now;
        self.both = now;
    }

    fn on_write(&mut self) {
        let now = Instant::now();
        self.write = now;
        self.both = now;
    }

    fn reset(&mut self, status: IdleStatus) {
        let now = Instant::now();
        match status {
            IdleStatus::ReaderIdle => self.read = now,
            IdleStatus::WriterIdle => self.write = now,
            IdleStatus::BothIdle => self.both = now,
        }
    }

    /// Earliest enabled idle deadline.
    fn next_deadline(&self, session: &Session) -> Option<(Instant, IdleStatus)> {
        let config = session.config();
        [
            (IdleStatus::BothIdle, self.both),
            (IdleStatus::ReaderIdle, self.read),
            (IdleStatus::WriterIdle, self.write),
        ]
        .into_iter()
        .filter_map(|(status, mark)| match config.idle_time(status) {
            0 => None,
            // Windows past the clock's range never elapse.
            ms => mark.checked_add(Duration::from_millis(ms)).map(|at| (at, status)),
        })
        .min_by_key(|(deadline, _)| *deadline)
    }
}

pub(super) async fn run(
    session: Session,
    mut wire: Wire,
    mut commands: mpsc::UnboundedReceiver<Command>,
    _guard: Option<SessionGuard>,
) {
    tracing::debug!(
        session_id = %session.id(),
        transport = session.transport_name(),
        remote = %session.remote_address(),
        "Session opened"
    );
    session.handler().session_opened(&session);

    let mut marks = IdleMarks::new();

    loop {
        let deadline = marks.next_deadline(&session);
        let idle = async {
            match deadline {
                Some((at, _)) => sleep_until(at).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;

            _ = session.inner.abort.notified() => {
                tracing::trace!(session_id = %session.id(), "Session aborted");
                break;
            }

            command = commands.recv() => match command {
                Some(Command::Write(message)) => {
                    marks.on_write();
                    if let Err(e) = write_through_chain(&session, &mut wire, message).await {
                        session.handler().exception_caught(&session, &e);
                        break;
                    }
                }
                Some(Command::Close) | None => break,
                Some(Command::Reconfigure) => {
                    marks = IdleMarks::new();
                }
            },

            item = wire.stream.next() => match item {
                Some(Ok(message)) => {
                    marks.on_read();
                    let handler = session.handler();
                    if let Err(e) = session
                        .filter_chain()
                        .fire_message_received(&session, &*handler, message)
                    {
                        handler.exception_caught(&session, &e);
                        break;
                    }
                }
                Some(Err(e)) => {
                    tracing::debug!(session_id = %session.id(), error = %e, "Read failed");
                    session.handler().exception_caught(&session, &GatewayError::Io(e));
                    break;
                }
                None => {
                    tracing::debug!(session_id = %session.id(), "Peer closed");
                    break;
                }
            },

            _ = idle => {
                if let Some((_, status)) = deadline {
                    marks.reset(status);
                    let handler = session.handler();
                    if let Err(e) = session
                        .filter_chain()
                        .fire_session_idle(&session, &*handler, status)
                    {
                        handler.exception_caught(&session, &e);
                        break;
                    }
                }
            }
        }
    }

    session.inner.closing.store(true, std::sync::atomic::Ordering::Release);
    commands.close();
    if let Err(e) = wire.sink.close().await {
        tracing::trace!(session_id = %session.id(), error = %e, "Error while closing wire");
    }

    let handler = session.handler();
    if let Err(e) = session.filter_chain().fire_session_closed(&session, &*handler) {
        tracing::warn!(session_id = %session.id(), error = %e, "Filter failed during close");
    }
    session.set_handler(std::sync::Arc::new(DetachedHandler));
    session.close_future().complete(&session);

    tracing::debug!(session_id = %session.id(), "Session closed");
}

async fn write_through_chain(session: &Session, wire: &mut Wire, message: Message) -> Result<()> {
    let encoded = session.filter_chain().fire_filter_write(session, message)?;
    for message in encoded {
        wire.sink.send(message).await?;
    }
    Ok(())
}
