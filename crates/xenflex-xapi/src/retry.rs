//! Bounded retry for idempotent, read-only calls.

use crate::XapiResult;
use log::warn;
use serde::Deserialize;
use std::thread::sleep;
use std::time::Duration;

/// How often a read-only query may be re-issued after a transient failure.
///
/// Mutating calls are never retried: a request that timed out may still
/// have been applied by the hypervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts including the first; values below 1 behave as 1.
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles on each further attempt.
    pub backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            backoff_ms: 500,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts,
            backoff_ms: u64::try_from(backoff.as_millis()).unwrap_or(u64::MAX),
        }
    }

    fn backoff_for(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.backoff_ms.saturating_mul(1 << (attempt - 1).min(5)))
    }

    /// Run `op` until it succeeds, fails permanently, or attempts run out.
    pub fn run<T>(&self, what: &str, mut op: impl FnMut() -> XapiResult<T>) -> XapiResult<T> {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && attempt < attempts => {
                    let backoff = self.backoff_for(attempt);
                    warn!(
                        "{} failed (attempt {}/{}): {}; retrying in {:?}",
                        what, attempt, attempts, err, backoff
                    );
                    sleep(backoff);
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::XapiError;
    use std::cell::Cell;

    #[test]
    fn default_policy_makes_one_attempt() {
        let calls = Cell::new(0);
        let result: XapiResult<()> = RetryPolicy::default().run("query", || {
            calls.set(calls.get() + 1);
            Err(XapiError::Transport("reset".into()))
        });
        assert!(result.is_err());
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn transient_failures_are_retried() {
        let calls = Cell::new(0);
        let policy = RetryPolicy::new(3, Duration::ZERO);
        let result = policy.run("query", || {
            calls.set(calls.get() + 1);
            if calls.get() < 3 {
                Err(XapiError::Http { status: 503 })
            } else {
                Ok(7)
            }
        });
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn api_errors_are_not_retried() {
        let calls = Cell::new(0);
        let policy = RetryPolicy::new(5, Duration::ZERO);
        let result: XapiResult<()> = policy.run("query", || {
            calls.set(calls.get() + 1);
            Err(XapiError::api("SESSION_INVALID"))
        });
        assert!(result.unwrap_err().has_code("SESSION_INVALID"));
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy::new(10, Duration::from_millis(100));
        assert_eq!(policy.backoff_for(1), Duration::from_millis(100));
        assert_eq!(policy.backoff_for(3), Duration::from_millis(400));
        assert_eq!(policy.backoff_for(9), Duration::from_millis(3200));
    }

    #[test]
    fn oversized_backoff_saturates() {
        let policy = RetryPolicy::new(2, Duration::MAX);
        assert_eq!(policy.backoff_ms, u64::MAX);
        assert_eq!(policy.backoff_for(4), Duration::from_millis(u64::MAX));
    }

    #[test]
    fn deserializes_with_defaults() {
        let policy: RetryPolicy = serde_json::from_str(r#"{"max_attempts": 3}"#).unwrap();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.backoff_ms, 500);
    }
}
