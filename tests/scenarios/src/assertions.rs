//! Assertion helpers for scenarios.
//!
//! Everything across the process boundary is asynchronous, so assertions
//! about remote effects poll until they hold or a deadline passes.

use crate::harness::HarnessError;
use std::time::Duration;

/// How long [`eventually`] waits by default.
pub const DEFAULT_WITHIN: Duration = Duration::from_secs(2);

const POLL_INTERVAL: Duration = Duration::from_millis(2);

/// Poll `condition` until it holds, failing after `within`.
pub async fn eventually_within<F>(what: &str, within: Duration, mut condition: F) -> Result<(), HarnessError>
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + within;
    loop {
        if condition() {
            return Ok(());
        }
        if tokio::time::Instant::now() >= deadline {
            return Err(HarnessError::Timeout {
                what: what.to_string(),
                after: within,
            });
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

/// Poll `condition` until it holds, failing after [`DEFAULT_WITHIN`].
pub async fn eventually<F>(what: &str, condition: F) -> Result<(), HarnessError>
where
    F: FnMut() -> bool,
{
    eventually_within(what, DEFAULT_WITHIN, condition).await
}

/// Let spawned tasks and in-flight frames run for a moment.
///
/// Used before asserting that something did NOT happen.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(20)).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn eventually_returns_once_condition_holds() {
        let calls = AtomicUsize::new(0);
        eventually("third poll", || calls.fetch_add(1, Ordering::SeqCst) >= 2)
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn eventually_times_out() {
        let err = eventually_within("never", Duration::from_millis(10), || false)
            .await
            .unwrap_err();
        assert!(matches!(err, HarnessError::Timeout { ref what, .. } if what == "never"));
    }
}
