//! Cooperative waiting for dependencies to appear.
//!
//! A message may reference entities that have not reached the local service
//! yet. Rather than failing it outright, the consumer polls an existence check
//! with exponential backoff until it succeeds or the budget runs out. Waiting
//! uses `tokio::time::sleep`, so thousands of messages can wait at once without
//! holding a worker thread each.

use crate::config::BackoffConfig;
use std::convert::Infallible;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

/// Result of a dependency wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitOutcome {
    /// Whether the predicate returned true before the budget ran out.
    pub found: bool,
    /// How many times the predicate was evaluated.
    pub probes: u32,
    /// Time spent waiting.
    pub elapsed: Duration,
}

impl WaitOutcome {
    /// Returns true if the wait ended because the budget ran out.
    pub fn timed_out(&self) -> bool {
        !self.found
    }
}

/// Polls `predicate` until it returns true or `max_wait` elapses.
///
/// The predicate is always evaluated at least once, and once more at the
/// deadline. Timing out is not an error: it returns `found == false`.
pub async fn wait_until<F, Fut>(
    mut predicate: F,
    max_wait: Duration,
    backoff: &BackoffConfig,
) -> WaitOutcome
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let result = try_wait_until(
        || {
            let probe = predicate();
            async move { Ok::<bool, Infallible>(probe.await) }
        },
        max_wait,
        backoff,
    )
    .await;

    match result {
        Ok(outcome) => outcome,
        Err(never) => match never {},
    }
}

/// Like [`wait_until`], but the predicate may fail.
///
/// A predicate error ends the wait immediately and is returned to the caller.
pub async fn try_wait_until<F, Fut, E>(
    mut predicate: F,
    max_wait: Duration,
    backoff: &BackoffConfig,
) -> Result<WaitOutcome, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool, E>>,
{
    let start = Instant::now();
    let deadline = start + max_wait;
    let mut probes = 0u32;
    let mut attempt = 0u32;

    loop {
        probes += 1;
        if predicate().await? {
            return Ok(WaitOutcome {
                found: true,
                probes,
                elapsed: start.elapsed(),
            });
        }

        let now = Instant::now();
        if now >= deadline {
            return Ok(WaitOutcome {
                found: false,
                probes,
                elapsed: start.elapsed(),
            });
        }

        let delay = backoff.delay_for_attempt(attempt).min(deadline - now);
        attempt = attempt.saturating_add(1);
        tokio::time::sleep(delay).await;
    }
}
