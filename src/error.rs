//! Gateway error definitions.
//!
//! Idle-timeout closes and peer-initiated closes are lifecycle events, not
//! errors, and never surface through this type.

use thiserror::Error;

use crate::session::SessionId;

/// Errors raised by the transport, session, pool and bridge layers.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// No transport claims the requested scheme.
    #[error("Unknown scheme: {0}")]
    UnknownScheme(String),

    /// A scheme is already claimed by a different transport instance.
    #[error("Scheme {scheme} already registered by transport {existing}")]
    DuplicateScheme { scheme: String, existing: String },

    /// The connect side of a bridge could not be established or was lost
    /// before the exchange could be completed.
    #[error("Connect to {address} failed: {reason}")]
    ConnectFailure { address: String, reason: String },

    /// A filter chain operation referenced a filter name that is absent.
    #[error("Filter not found: {0}")]
    FilterNotFound(String),

    /// A filter with this name is already attached to the chain.
    #[error("Filter already present: {0}")]
    DuplicateFilter(String),

    /// A session was observed pooled and in use at the same time.
    #[error("Pool consistency violated for session {session}: {detail}")]
    PoolConsistency { session: SessionId, detail: String },

    /// The session is closing or closed and rejects further writes.
    #[error("Session {0} is closed")]
    SessionClosed(SessionId),

    /// A URI could not be turned into a resource address.
    #[error("Invalid address {uri}: {reason}")]
    InvalidAddress { uri: String, reason: String },

    /// Framing or protocol decoding failed.
    #[error("Codec error: {0}")]
    Codec(String),

    /// Service lookup or service lifecycle failure.
    #[error("Service error: {0}")]
    Service(String),

    /// Transport configuration rejected by a factory.
    #[error("Transport configuration error: {0}")]
    Config(String),

    /// Underlying socket error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl GatewayError {
    /// Build a connect failure for the given address.
    pub fn connect_failure(address: impl ToString, reason: impl ToString) -> Self {
        GatewayError::ConnectFailure {
            address: address.to_string(),
            reason: reason.to_string(),
        }
    }

    /// True for errors that indicate a locking or ownership bug.
    pub fn is_consistency_violation(&self) -> bool {
        matches!(self, GatewayError::PoolConsistency { .. })
    }
}

/// Result type for gateway operations.
pub type Result<T> = std::result::Result<T, GatewayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_failure_formats_address() {
        let err = GatewayError::connect_failure("tcp://backend:9000", "refused");
        assert_eq!(err.to_string(), "Connect to tcp://backend:9000 failed: refused");
        assert!(!err.is_consistency_violation());
    }

    #[test]
    fn io_errors_convert() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "gone");
        let err: GatewayError = io.into();
        assert!(matches!(err, GatewayError::Io(_)));
    }
}
