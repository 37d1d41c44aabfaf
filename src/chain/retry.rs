//! Bounded wait for results a chain has not indexed yet
//!
//! Used wherever inclusion is not synchronously observable (a receipt right
//! after broadcast, a Cosmos tx before the indexer caught up). Exhausting the
//! attempts is not an error: the probe resolves to `None` and callers treat
//! that as still pending.

use crate::config::TrackerConfig;
use crate::error::TrackerResult;

use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Attempts and spacing of a bounded wait
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(attempts: u32, delay: Duration) -> Self {
        Self { attempts, delay }
    }

    /// A single probe with no waiting
    pub fn once() -> Self {
        Self::new(1, Duration::ZERO)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(10, Duration::from_secs(1))
    }
}

impl From<&TrackerConfig> for RetryPolicy {
    fn from(config: &TrackerConfig) -> Self {
        Self::new(config.max_retries.max(1), config.retry_delay())
    }
}

/// Run `probe` until it yields `Some`, the attempts run out, or `cancel` fires.
///
/// Errors from the probe count as a failed attempt and are logged at debug.
pub async fn wait_for<T, F, Fut>(
    operation: &str,
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    mut probe: F,
) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = TrackerResult<Option<T>>>,
{
    for attempt in 1..=policy.attempts.max(1) {
        if cancel.is_cancelled() {
            return None;
        }

        match probe().await {
            Ok(Some(value)) => return Some(value),
            Ok(None) => debug!("{}: not found (attempt {}/{})", operation, attempt, policy.attempts),
            Err(e) => debug!("{}: {} (attempt {}/{})", operation, e, attempt, policy.attempts),
        }

        if attempt < policy.attempts {
            tokio::select! {
                _ = cancel.cancelled() => return None,
                _ = tokio::time::sleep(policy.delay) => {}
            }
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::ChainId;
    use crate::error::TrackerError;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_resolves_once_found() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(5, Duration::from_millis(1));

        let found = wait_for("receipt", &policy, &CancellationToken::new(), || {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            async move { Ok(if n == 3 { Some(n) } else { None }) }
        })
        .await;

        assert_eq!(found, Some(3));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhaustion_is_not_found() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(4, Duration::from_millis(1));

        let found: Option<u32> = wait_for("receipt", &policy, &CancellationToken::new(), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(TrackerError::connection(&ChainId::from("0x1.icon"), "refused")) }
        })
        .await;

        assert!(found.is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_cancellation_stops_waiting() {
        let cancel = CancellationToken::new();
        let policy = RetryPolicy::new(100, Duration::from_secs(60));
        let calls = AtomicU32::new(0);

        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });

        let found: Option<u32> = tokio::time::timeout(
            Duration::from_secs(5),
            wait_for("receipt", &policy, &cancel, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(None) }
            }),
        )
        .await
        .unwrap();

        assert!(found.is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
