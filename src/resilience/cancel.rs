//! Cancellable waits.
//!
//! Every blocking point in the resilience layer (dedup wait, semaphore
//! acquire, backoff sleep) races its future against a `CancellationToken`.

use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// The caller's cancellation token fired before the wait completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("operation cancelled")]
pub struct Cancelled;

/// Await `fut` unless `cancel` fires first.
pub async fn or_cancel<F: Future>(cancel: &CancellationToken, fut: F) -> Result<F::Output, Cancelled> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Cancelled),
        out = fut => Ok(out),
    }
}

/// Sleep for `delay` unless `cancel` fires first.
pub async fn sleep(cancel: &CancellationToken, delay: Duration) -> Result<(), Cancelled> {
    or_cancel(cancel, tokio::time::sleep(delay)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[tokio::test]
    async fn test_sleep_completes() {
        let token = CancellationToken::new();
        assert_eq!(sleep(&token, Duration::from_millis(5)).await, Ok(()));
    }

    #[tokio::test]
    async fn test_sleep_cancelled_early() {
        let token = CancellationToken::new();
        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.cancel();
        });

        let start = Instant::now();
        assert_eq!(sleep(&token, Duration::from_secs(5)).await, Err(Cancelled));
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_already_cancelled_wins() {
        let token = CancellationToken::new();
        token.cancel();
        let out = or_cancel(&token, async { 42 }).await;
        assert_eq!(out, Err(Cancelled));
    }
}
