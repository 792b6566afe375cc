//! Protocol gateway.
//!
//! Accepts sessions over one wire protocol (HTTP, WebSocket, emulated
//! WebSocket, raw TCP, in-process pipes) and bridges them to a backend over
//! another, with persistent-connection pooling for HTTP backends.
//!
//! # Architecture Overview
//!
//! ```text
//!     accept side                                          connect side
//!   ┌────────────┐   ┌──────────────┐   ┌────────────┐   ┌────────────┐
//!   │ transport  │──▶│   session    │──▶│   bridge   │──▶│  session   │──▶ backend
//!   │  (bind)    │   │ filter chain │   │ stream/http│   │ (connect / │
//!   └────────────┘   └──────────────┘   └─────┬──────┘   │  pool.take)│
//!                                             │          └─────┬──────┘
//!                                             ▼                │ recycle
//!                                     ┌──────────────┐         │
//!                                     │     pool     │◀────────┘
//!                                     │ idle eviction│
//!                                     └──────────────┘
//!
//!   Cross-cutting: config · observability · resilience · lifecycle · admin
//! ```

// Core
pub mod address;
pub mod bridge;
pub mod error;
pub mod filter;
pub mod http;
pub mod pool;
pub mod session;
pub mod transport;

// Orchestration
pub mod gateway;
pub mod lifecycle;
pub mod service;

// Infrastructure
pub mod admin;
pub mod config;
pub mod net;
pub mod observability;
pub mod resilience;

pub use address::ResourceAddress;
pub use config::schema::GatewayConfig;
pub use error::{GatewayError, Result};
pub use gateway::Gateway;
pub use lifecycle::Shutdown;
pub use pool::PersistentConnectionPool;
pub use session::Session;
