//! Reusable filters installed by bridges and the pool.
//!
//! Transport framing filters live with their transports (`http::codec`);
//! this module holds the ones that are attached per bridge leg.

pub mod wseb;

pub use wseb::{EncodingMode, WsebEncodingCodec};
