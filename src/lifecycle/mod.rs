//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Load config → Init logging/metrics → Build gateway → Start services
//!     → Admin API
//!
//! Shutdown (shutdown.rs):
//!     Signal received → Unbind (quiesce) → Stop services → Drain sessions
//!     → Destroy services → Clear pool
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//!
//! Listeners (listener.rs):
//!     Every phase fanned out to every GatewayListener
//! ```
//!
//! # Design Decisions
//! - Ordered startup: config first, then core, then accept addresses
//! - Ordered shutdown: stop accepting, drain, close
//! - Drain has a deadline; remaining sessions are abandoned

pub mod listener;
pub mod shutdown;
pub mod signals;
pub mod startup;

pub use listener::{GatewayListener, GatewayListeners, ServicePhase};
pub use shutdown::Shutdown;
