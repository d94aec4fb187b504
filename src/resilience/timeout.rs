use crate::{Error, Result};
use std::future::Future;
use std::time::Duration;
use tokio::time::timeout;
use tracing::warn;

/// Run `future` with a deadline, mapping expiry to [`Error::Timeout`].
///
/// The future is dropped on expiry, so anything it was guarding (a breaker
/// dispatch, an in-flight request) sees a cancellation.
pub async fn with_timeout<F>(future: F, duration: Duration) -> Result<F::Output>
where
    F: Future,
{
    timeout(duration, future).await.map_err(|_| {
        warn!("Operation timed out after {:?}", duration);
        Error::Timeout { timeout: duration }
    })
}
