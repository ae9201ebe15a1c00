/// Bounded retry with exponential backoff
///
/// Used for venue downloads: a failing call is retried with a doubling,
/// capped delay, and after the last attempt the failure is handed back to
/// the caller together with the attempt count.

use std::time::Duration;
use tokio::time::sleep;
use tracing::{error, warn};

/// Retry configuration for a fallible task
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, first call included
    pub max_attempts: u32,
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

/// Exponential backoff state
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
    failures: u32,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            current: initial,
            failures: 0,
        }
    }

    /// Records a failure and returns the delay to wait before the next try.
    pub fn record_failure(&mut self) -> Duration {
        let delay = self.current;
        self.failures += 1;
        // Exponential backoff with cap
        self.current = std::cmp::min(self.current * 2, self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.failures = 0;
        self.current = self.initial;
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }
}

/// Run `task_fn` until it succeeds or `policy.max_attempts` is exhausted
///
/// # Returns
/// The task's value, or the number of attempts made together with the last
/// error.
pub async fn retry_with_backoff<T, E, F, Fut>(
    task_name: &str,
    policy: &RetryPolicy,
    mut task_fn: F,
) -> Result<T, (u32, E)>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut backoff = Backoff::new(policy.initial_delay, policy.max_delay);

    loop {
        match task_fn().await {
            Ok(value) => {
                if backoff.failures() > 0 {
                    warn!(
                        "Task '{}' recovered after {} failures",
                        task_name,
                        backoff.failures()
                    );
                }
                return Ok(value);
            }
            Err(e) => {
                let delay = backoff.record_failure();
                let attempts = backoff.failures();
                error!(
                    "Task '{}' failed (attempt {}/{}): {}",
                    task_name, attempts, max_attempts, e
                );

                if attempts >= max_attempts {
                    return Err((attempts, e));
                }

                warn!("Task '{}' will retry in {:?}", task_name, delay);
                sleep(delay).await;
            }
        }
    }
}
