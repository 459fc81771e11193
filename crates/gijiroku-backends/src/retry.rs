//! Retry budget shared by the engine's stage runner.

use gijiroku_common::AppError;
use std::time::Duration;

/// Bounded retry with exponential backoff. The defaults give two retries at
/// 1 s and 4 s, applied only to transient backend failures.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub backoff_factor: u32,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_delay: Duration::from_secs(1),
            backoff_factor: 4,
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Delay before retrying after the given 0-indexed failed attempt.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = self.backoff_factor.saturating_pow(attempt);
        let delay = self.initial_delay.saturating_mul(factor);
        delay.min(self.max_delay)
    }

    /// Whether the given failure, on the given attempt, is worth another try.
    pub fn should_retry(&self, error: &AppError, attempt: u32) -> bool {
        attempt < self.max_retries && error.is_transient()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_schedule() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for_attempt(0), Duration::from_secs(1));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(4));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(16));
    }

    #[test]
    fn test_delay_is_capped() {
        let policy = RetryPolicy {
            max_delay: Duration::from_secs(5),
            ..Default::default()
        };
        assert_eq!(policy.delay_for_attempt(10), Duration::from_secs(5));
    }

    #[test]
    fn test_should_retry_only_transient_within_budget() {
        let policy = RetryPolicy::default();
        let transient = AppError::LlmUnavailable("connection refused".into());
        let fatal = AppError::LlmBadResponse("not json".into());

        assert!(policy.should_retry(&transient, 0));
        assert!(policy.should_retry(&transient, 1));
        assert!(!policy.should_retry(&transient, 2), "budget exhausted");
        assert!(!policy.should_retry(&fatal, 0));
    }
}
