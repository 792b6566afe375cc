//! Timeout enforcement.
//!
//! # Responsibilities
//! - Wrap connect-side establishment with a deadline
//! - Report an elapsed deadline as a connect failure for that address

use std::future::Future;
use std::time::Duration;

use crate::address::ResourceAddress;
use crate::error::{GatewayError, Result};

/// Run `fut`, failing with `ConnectFailure` if it outlives `limit`.
pub async fn connect_within<T, F>(limit: Duration, address: &ResourceAddress, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(GatewayError::connect_failure(
            address,
            format!("timed out after {}ms", limit.as_millis()),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn elapsed_deadline_is_connect_failure() {
        let address = ResourceAddress::new("tcp", "10.255.255.1", Some(9), "/");
        let result: Result<()> = connect_within(Duration::from_millis(20), &address, std::future::pending()).await;
        assert!(matches!(result, Err(GatewayError::ConnectFailure { .. })));
    }

    #[tokio::test]
    async fn inner_result_passes_through() {
        let address = ResourceAddress::new("tcp", "localhost", Some(9), "/");
        let value = connect_within(Duration::from_secs(1), &address, async { Ok(7) }).await.unwrap();
        assert_eq!(value, 7);
    }
}
