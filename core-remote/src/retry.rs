//! Retry policies with exponential backoff

use crate::error::{EdamErrorCode, RemoteError, Result};
use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// Decides whether a failed remote request is attempted again.
pub trait RetryPolicy: Send + Sync {
    /// `attempt` is the 1-based number of the attempt that just failed.
    fn should_retry(&self, error: &RemoteError, attempt: u32) -> bool;

    /// Delay to wait before the attempt following `attempt`.
    fn delay_for_attempt(&self, attempt: u32) -> Duration;
}

/// Exponential backoff that only retries transient failures.
///
/// Rate limits and expired authentication are never retried: both must
/// surface to the caller as stop conditions.
#[derive(Debug, Clone)]
pub struct ExponentialRetryPolicy {
    /// Maximum number of attempts (including the first attempt)
    max_attempts: u32,
    initial_delay: Duration,
    max_delay: Duration,
    multiplier: f64,
}

impl ExponentialRetryPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Transport hiccups and an unavailable shard are worth another try.
    pub fn is_retryable(error: &RemoteError) -> bool {
        match error {
            RemoteError::Transport(_) => true,
            RemoteError::System { code, .. } => *code == EdamErrorCode::ShardUnavailable,
            _ => false,
        }
    }
}

impl Default for ExponentialRetryPolicy {
    fn default() -> Self {
        Self::new(3)
    }
}

impl RetryPolicy for ExponentialRetryPolicy {
    fn should_retry(&self, error: &RemoteError, attempt: u32) -> bool {
        attempt < self.max_attempts && Self::is_retryable(error)
    }

    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let base_delay =
            self.initial_delay.as_millis() as f64 * self.multiplier.powi(attempt as i32 - 1);
        let capped_delay = base_delay.min(self.max_delay.as_millis() as f64);

        Duration::from_millis(capped_delay as u64)
    }
}

/// Runs `operation` until it succeeds, the policy gives up, or
/// `max_attempts` is reached.
pub async fn with_retry<T, F, Fut>(
    policy: &dyn RetryPolicy,
    max_attempts: u32,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 1;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(error) => {
                if attempt >= max_attempts.max(1) || !policy.should_retry(&error, attempt) {
                    return Err(error);
                }

                let delay = policy.delay_for_attempt(attempt);
                debug!(attempt, delay_ms = delay.as_millis() as u64, error = %error, "Retrying remote request");
                if !delay.is_zero() {
                    core_async::sleep(delay).await;
                }
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_exponential_backoff() {
        let policy = ExponentialRetryPolicy::new(5).with_initial_delay(Duration::from_millis(100));

        assert_eq!(policy.delay_for_attempt(0), Duration::ZERO);
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(400));
    }

    #[test]
    fn test_max_delay_cap() {
        let policy = ExponentialRetryPolicy::new(10)
            .with_initial_delay(Duration::from_secs(1))
            .with_max_delay(Duration::from_secs(5));

        assert_eq!(policy.delay_for_attempt(10), Duration::from_secs(5));
    }

    #[test]
    fn test_stop_conditions_are_never_retried() {
        let policy = ExponentialRetryPolicy::new(5);

        assert!(!policy.should_retry(&RemoteError::rate_limit_reached(60), 1));
        assert!(!policy.should_retry(&RemoteError::auth_expired(), 1));
        assert!(!policy.should_retry(&RemoteError::not_found("Note.guid", "x"), 1));
        assert!(policy.should_retry(&RemoteError::Transport("reset".into()), 1));
        assert!(policy.should_retry(
            &RemoteError::system(EdamErrorCode::ShardUnavailable, "down"),
            4
        ));
        assert!(!policy.should_retry(&RemoteError::Transport("reset".into()), 5));
    }

    #[core_async::test]
    async fn test_with_retry_recovers_from_transient_failure() {
        let policy = ExponentialRetryPolicy::new(3).with_initial_delay(Duration::ZERO);
        let calls = AtomicU32::new(0);

        let result = with_retry(&policy, 3, || {
            let call = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if call == 0 {
                    Err(RemoteError::Transport("connection reset".into()))
                } else {
                    Ok(call)
                }
            }
        })
        .await;

        assert_eq!(result, Ok(1));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[core_async::test]
    async fn test_with_retry_respects_attempt_cap() {
        let policy = ExponentialRetryPolicy::new(10).with_initial_delay(Duration::ZERO);
        let calls = AtomicU32::new(0);

        let result: Result<()> = with_retry(&policy, 2, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(RemoteError::Transport("timeout".into())) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[core_async::test]
    async fn test_with_retry_returns_rate_limit_immediately() {
        let policy = ExponentialRetryPolicy::new(3).with_initial_delay(Duration::ZERO);
        let calls = AtomicU32::new(0);

        let result: Result<()> = with_retry(&policy, 3, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(RemoteError::rate_limit_reached(30)) }
        })
        .await;

        assert_eq!(result.unwrap_err().rate_limit_duration(), Some(30));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
