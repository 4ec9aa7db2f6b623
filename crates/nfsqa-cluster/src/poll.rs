//! Bounded polling for eventually-true cluster conditions.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How many times, and how far apart, a condition is re-checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollPolicy {
    /// Total number of checks, including the first (default: 60).
    pub attempts: u32,
    /// Delay between checks in milliseconds (default: 1000).
    pub interval_ms: u64,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            attempts: 60,
            interval_ms: 1000,
        }
    }
}

impl PollPolicy {
    /// Policy with `attempts` checks spaced `interval` apart.
    pub fn new(attempts: u32, interval: Duration) -> Self {
        Self {
            attempts,
            interval_ms: interval.as_millis() as u64,
        }
    }

    /// Delay between checks.
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// Longest time a poll under this policy can wait between checks.
    pub fn max_wait(&self) -> Duration {
        self.interval() * self.attempts.saturating_sub(1)
    }
}

/// Re-checks `check` until it returns `Ok(true)` or the attempts run out.
///
/// Errors from `check` end the poll immediately; only a clean `false` is
/// retried. Returns `Ok(false)` when every attempt said no.
pub async fn poll_until<F, Fut, E>(policy: PollPolicy, what: &str, mut check: F) -> Result<bool, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool, E>>,
{
    for attempt in 1..=policy.attempts {
        if check().await? {
            tracing::debug!(what = what, attempt = attempt, "condition met");
            return Ok(true);
        }
        if attempt < policy.attempts {
            tokio::time::sleep(policy.interval()).await;
        }
    }
    tracing::warn!(
        what = what,
        attempts = policy.attempts,
        "condition not met within poll bound"
    );
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_poll_policy_default() {
        let policy = PollPolicy::default();
        assert_eq!(policy.attempts, 60);
        assert_eq!(policy.interval(), Duration::from_secs(1));
        assert_eq!(policy.max_wait(), Duration::from_secs(59));
    }

    #[test]
    fn test_poll_policy_zero_attempts_max_wait() {
        let policy = PollPolicy::new(0, Duration::from_secs(5));
        assert_eq!(policy.max_wait(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_until_eventually_true() {
        let calls = AtomicU32::new(0);
        let ok: Result<bool, ()> = poll_until(PollPolicy::new(5, Duration::from_secs(2)), "third time", || {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            async move { Ok(n >= 3) }
        })
        .await;
        assert_eq!(ok, Ok(true));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_until_bounded() {
        let calls = AtomicU32::new(0);
        let ok: Result<bool, ()> = poll_until(PollPolicy::new(4, Duration::from_secs(1)), "never", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok(false) }
        })
        .await;
        assert_eq!(ok, Ok(false));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_until_error_stops_immediately() {
        let calls = AtomicU32::new(0);
        let res: Result<bool, &str> = poll_until(PollPolicy::default(), "boom", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err("unreachable") }
        })
        .await;
        assert_eq!(res, Err("unreachable"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_poll_until_zero_attempts_is_false() {
        let res: Result<bool, ()> =
            poll_until(PollPolicy::new(0, Duration::ZERO), "nothing", || async { Ok(true) }).await;
        assert_eq!(res, Ok(false));
    }
}
