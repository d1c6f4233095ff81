//! Retry-with-backoff shared by the API client and the database gateway.
//!
//! A failed attempt `n` (0-based) is followed by a delay of
//! `base_delay * 2^n`, so the schedule is base, 2*base, 4*base, ... and at most
//! `max_attempts - 1` delays happen before the last error is returned.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;
use tracing::warn;

/// Something that can wait. Production code uses tokio's timer; tests record
/// the requested delays instead of sleeping.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Records every delay and returns immediately.
#[derive(Debug, Default)]
pub struct RecordingSleeper {
    delays: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn delays(&self) -> Vec<Duration> {
        self.delays
            .lock()
            .map(|delays| delays.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        if let Ok(mut delays) = self.delays.lock() {
            delays.push(duration);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1000
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay_ms: base_delay.as_millis() as u64,
        }
    }

    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    /// Delay after the failed attempt with 0-based index `attempt`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt.min(32)).unwrap_or(u64::MAX);
        Duration::from_millis(self.base_delay_ms.saturating_mul(factor))
    }

    /// Run `op` until it succeeds, fails with an error `is_retryable` rejects,
    /// or `max_attempts` attempts have been made. The last error is returned.
    ///
    /// `op` receives the 0-based attempt index.
    pub async fn run<T, E, F, Fut, P>(
        &self,
        sleeper: &dyn Sleeper,
        operation: &str,
        mut op: F,
        is_retryable: P,
    ) -> Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
        E: std::fmt::Display,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    if !is_retryable(&e) || attempt + 1 >= max_attempts {
                        return Err(e);
                    }
                    let delay = self.delay_for(attempt);
                    warn!(
                        "{} failed (attempt {}/{}): {}; retrying in {:?}",
                        operation,
                        attempt + 1,
                        max_attempts,
                        e,
                        delay
                    );
                    sleeper.sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug, PartialEq)]
    enum TestError {
        Unavailable,
        Invalid,
    }

    impl std::fmt::Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "{:?}", self)
        }
    }

    fn transient(e: &TestError) -> bool {
        *e == TestError::Unavailable
    }

    #[test]
    fn test_delay_doubles() {
        let policy = RetryPolicy::new(5, Duration::from_millis(500));
        assert_eq!(policy.delay_for(0), Duration::from_millis(500));
        assert_eq!(policy.delay_for(1), Duration::from_millis(1000));
        assert_eq!(policy.delay_for(2), Duration::from_millis(2000));
        assert_eq!(policy.delay_for(3), Duration::from_millis(4000));
    }

    #[test]
    fn test_delay_saturates() {
        let policy = RetryPolicy::new(5, Duration::from_secs(1));
        assert!(policy.delay_for(200) >= policy.delay_for(40));
    }

    #[tokio::test]
    async fn test_succeeds_on_third_attempt_after_two_delays() {
        let policy = RetryPolicy::new(3, Duration::from_secs(1));
        let sleeper = RecordingSleeper::new();
        let calls = AtomicU32::new(0);

        let result = policy
            .run(
                &sleeper,
                "connect",
                |_| {
                    let n = calls.fetch_add(1, Ordering::SeqCst);
                    async move {
                        if n < 2 {
                            Err(TestError::Unavailable)
                        } else {
                            Ok("connected")
                        }
                    }
                },
                transient,
            )
            .await;

        assert_eq!(result, Ok("connected"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(
            sleeper.delays(),
            vec![Duration::from_secs(1), Duration::from_secs(2)]
        );
    }

    #[tokio::test]
    async fn test_non_retryable_error_surfaces_immediately() {
        let policy = RetryPolicy::new(5, Duration::from_secs(1));
        let sleeper = RecordingSleeper::new();
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = policy
            .run(
                &sleeper,
                "write",
                |_| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err(TestError::Invalid) }
                },
                transient,
            )
            .await;

        assert_eq!(result, Err(TestError::Invalid));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(sleeper.delays().is_empty());
    }

    #[tokio::test]
    async fn test_exhaustion_returns_last_error() {
        let policy = RetryPolicy::new(3, Duration::from_millis(10));
        let sleeper = RecordingSleeper::new();

        let result: Result<(), _> = policy
            .run(
                &sleeper,
                "connect",
                |_| async { Err(TestError::Unavailable) },
                transient,
            )
            .await;

        assert_eq!(result, Err(TestError::Unavailable));
        assert_eq!(
            sleeper.delays(),
            vec![Duration::from_millis(10), Duration::from_millis(20)]
        );
    }

    #[tokio::test]
    async fn test_zero_attempts_still_runs_once() {
        let policy = RetryPolicy::new(0, Duration::from_millis(10));
        let sleeper = RecordingSleeper::new();

        let result: Result<u8, TestError> = policy
            .run(&sleeper, "noop", |attempt| async move { Ok(attempt as u8) }, transient)
            .await;

        assert_eq!(result, Ok(0));
    }
}
