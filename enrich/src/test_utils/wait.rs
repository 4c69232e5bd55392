use std::time::{Duration, Instant};

use tokio::time::sleep;

/// Default timeout for condition waits.
///
/// Chosen empirically: the conditions tests wait for should be reached within
/// a few hundred milliseconds.
pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(10);

/// Interval between condition polls.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Polls `condition` until it holds.
///
/// # Panics
///
/// Panics when the timeout elapses before the condition holds. This is
/// intentional: tests fail fast with a clear message instead of hanging
/// forever on a state that is never reached.
pub async fn wait_until<F>(description: &str, mut condition: F)
where
    F: FnMut() -> bool,
{
    let deadline = Instant::now() + DEFAULT_WAIT_TIMEOUT;

    loop {
        if condition() {
            return;
        }

        if Instant::now() >= deadline {
            panic!("timed out after {DEFAULT_WAIT_TIMEOUT:?} waiting for: {description}");
        }

        sleep(POLL_INTERVAL).await;
    }
}
