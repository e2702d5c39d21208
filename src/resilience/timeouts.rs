//! Timeout enforcement.
//!
//! Every network attempt runs under a client-side deadline; an elapsed
//! deadline becomes `TransportError::Timeout`, which normalizes to a
//! retryable `Timeout` error.

use std::future::Future;
use std::time::Duration;

use crate::error::TransportError;

/// Run `fut` under `duration`.
pub async fn with_timeout<T, F>(duration: Duration, fut: F) -> Result<T, TransportError>
where
    F: Future<Output = Result<T, TransportError>>,
{
    match tokio::time::timeout(duration, fut).await {
        Ok(result) => result,
        Err(_) => Err(TransportError::Timeout),
    }
}
