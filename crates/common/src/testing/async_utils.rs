//! Async polling helpers
//!
//! Scheduler tests observe background tasks through their side effects, so
//! they wait for a condition instead of sleeping for a fixed time.

use std::future::Future;
use std::time::Duration;

/// Poll `condition` every `interval` until it returns true or `timeout`
/// elapses; returns whether it became true
///
/// Both the deadline and the sleeps use tokio's clock, so under
/// `#[tokio::test(start_paused = true)]` waiting costs no real time and
/// advances timers in the code under test.
///
/// # Examples
///
/// ```no_run
/// use std::sync::atomic::{AtomicBool, Ordering};
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// use cadence_common::testing::poll_until;
///
/// # async fn example() {
/// let done = Arc::new(AtomicBool::new(false));
/// let flag = Arc::clone(&done);
/// tokio::spawn(async move {
///     tokio::time::sleep(Duration::from_millis(50)).await;
///     flag.store(true, Ordering::SeqCst);
/// });
///
/// assert!(
///     poll_until(Duration::from_secs(1), Duration::from_millis(10), || async {
///         done.load(Ordering::SeqCst)
///     })
///     .await
/// );
/// # }
/// ```
pub async fn poll_until<F, Fut>(timeout: Duration, interval: Duration, mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;

    loop {
        if condition().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(interval).await;
    }
}
