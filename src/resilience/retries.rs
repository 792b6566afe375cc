//! Retry logic.
//!
//! # Responsibilities
//! - Retry connect-side establishment with exponential backoff + jitter
//! - Decide whether a request may be replayed on a fresh connection
//!
//! # Design Decisions
//! - Never replay POST/PATCH (non-idempotent)
//! - Only connection-level failures are retried; protocol errors are not

use std::future::Future;
use std::time::Duration;

use hyper::Method;

use super::backoff::Backoff;
use crate::address::ResourceAddress;
use crate::config::RetryConfig;
use crate::error::{GatewayError, Result};

/// Bounded establishment retries.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    attempts: u32,
    backoff: Backoff,
}

impl RetryPolicy {
    pub fn new(attempts: u32, backoff: Backoff) -> Self {
        Self {
            attempts: attempts.max(1),
            backoff,
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(
            config.connect_attempts,
            Backoff::new(
                Duration::from_millis(config.base_delay_ms),
                Duration::from_millis(config.max_delay_ms),
            ),
        )
    }

    /// A policy that makes exactly one attempt.
    pub fn once() -> Self {
        Self::new(1, Backoff::none())
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Run `attempt` until it succeeds, fails with a non-retryable error, or
    /// the attempts run out. `attempt` receives the 1-based attempt number.
    pub async fn run<T, F, Fut>(&self, address: &ResourceAddress, mut attempt: F) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut n = 1;
        loop {
            match attempt(n).await {
                Ok(value) => return Ok(value),
                Err(e) if n < self.attempts && is_retryable(&e) => {
                    let delay = self.backoff.delay(n);
                    tracing::info!(
                        address = %address,
                        attempt = n,
                        delay = ?delay,
                        error = %e,
                        "Retrying connect"
                    );
                    tokio::time::sleep(delay).await;
                    n += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

/// Connection-level failures are worth another attempt.
pub fn is_retryable(error: &GatewayError) -> bool {
    matches!(error, GatewayError::ConnectFailure { .. } | GatewayError::Io(_))
}

/// Whether a request may be sent again after its connection died before
/// any response arrived.
pub fn is_replayable(method: &Method) -> bool {
    method.is_idempotent()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn quick() -> Backoff {
        Backoff::new(Duration::from_millis(1), Duration::from_millis(5))
    }

    fn address() -> ResourceAddress {
        ResourceAddress::new("tcp", "backend", Some(9000), "/")
    }

    #[tokio::test]
    async fn retries_connect_failures_until_success() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(3, quick());
        let value = policy
            .run(&address(), |n| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 3 {
                        Err(GatewayError::connect_failure("tcp://backend:9000", "refused"))
                    } else {
                        Ok(n)
                    }
                }
            })
            .await
            .unwrap();
        assert_eq!(value, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_last_attempt() {
        let policy = RetryPolicy::new(2, quick());
        let result: Result<()> = policy
            .run(&address(), |_| async { Err(GatewayError::connect_failure("x", "refused")) })
            .await;
        assert!(matches!(result, Err(GatewayError::ConnectFailure { .. })));
    }

    #[tokio::test]
    async fn protocol_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = RetryPolicy::new(5, quick())
            .run(&address(), |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(GatewayError::Codec("bad handshake".into())) }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn only_idempotent_methods_replay() {
        assert!(is_replayable(&Method::GET));
        assert!(is_replayable(&Method::DELETE));
        assert!(!is_replayable(&Method::POST));
        assert!(!is_replayable(&Method::PATCH));
    }
}
