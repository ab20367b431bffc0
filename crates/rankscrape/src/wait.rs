//! Bounded waits: poll a condition until it holds or a ceiling passes.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;

/// How a bounded wait ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Satisfied,
    TimedOut,
}

impl WaitOutcome {
    pub fn is_satisfied(self) -> bool {
        self == WaitOutcome::Satisfied
    }
}

/// Poll `predicate` every `interval` until it returns true or `ceiling`
/// elapses. The predicate is always evaluated at least once.
pub async fn wait_until<F, Fut>(ceiling: Duration, interval: Duration, mut predicate: F) -> WaitOutcome
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = Instant::now() + ceiling;
    loop {
        if predicate().await {
            return WaitOutcome::Satisfied;
        }
        let now = Instant::now();
        if now >= deadline {
            return WaitOutcome::TimedOut;
        }
        tokio::time::sleep(interval.min(deadline - now)).await;
    }
}

/// Sleep for `duration`. Zero is a no-op.
pub async fn pause(duration: Duration) {
    if !duration.is_zero() {
        tokio::time::sleep(duration).await;
    }
}
