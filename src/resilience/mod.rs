//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Opening a connect side:
//!     → timeouts.rs (every attempt has a deadline)
//!     → On failure: retries.rs (retry with backoff.rs delays)
//!
//! Replaying an HTTP request after a pooled connection died:
//!     → retries.rs (idempotent methods only)
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every connect has a deadline
//! - Replays only for idempotent requests (GET, HEAD, PUT, DELETE, ...)
//! - Jittered backoff prevents thundering herd on a restarting backend

pub mod backoff;
pub mod retries;
pub mod timeouts;

pub use backoff::Backoff;
pub use retries::{is_replayable, RetryPolicy};
