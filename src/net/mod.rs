//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (accept loop, connection limits)
//!     → transport handshake (http / ws / wseb)
//!     → session driver (tracked by connection.rs)
//! ```
//!
//! # Design Decisions
//! - Bounded accept prevents resource exhaustion
//! - Each session tracked for graceful shutdown drain
//! - The connection permit travels with the session's wire and is
//!   released when the socket halves are dropped

pub mod connection;
pub mod listener;
