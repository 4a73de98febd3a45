//! Retry policy for failed sync runs.
//!
//! Runs that fail with a transient remote error are retried with exponential
//! backoff. Authentication failures and local errors are never retried.

use crate::SyncError;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first run
    pub max_attempts: u32,
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Upper bound for any computed delay
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(30),
            max_delay: Duration::from_secs(15 * 60),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
        }
    }

    /// A policy that never retries
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// `base * 2^(attempt - 1)` capped at `max_delay`
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base_delay
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// How long to wait before retrying after `attempt` failed with `error`
    ///
    /// `None` means the failure is final. Rate-limited runs wait at least as
    /// long as the remote asked.
    pub fn delay_for(&self, attempt: u32, error: &SyncError) -> Option<Duration> {
        if attempt >= self.max_attempts || error.is_fatal() || !error.is_retryable() {
            return None;
        }

        let backoff = self.backoff(attempt);
        Some(match error.retry_after() {
            Some(hint) => backoff.max(hint),
            None => backoff,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_traits::BridgeError;

    fn server_error() -> SyncError {
        SyncError::Remote(BridgeError::Server {
            status: 502,
            message: "bad gateway".to_string(),
        })
    }

    #[test]
    fn test_exponential_backoff_with_cap() {
        let policy = RetryPolicy::new(10, Duration::from_secs(30), Duration::from_secs(300));

        assert_eq!(policy.backoff(1), Duration::from_secs(30));
        assert_eq!(policy.backoff(2), Duration::from_secs(60));
        assert_eq!(policy.backoff(3), Duration::from_secs(120));
        assert_eq!(policy.backoff(5), Duration::from_secs(300));
        assert_eq!(policy.backoff(64), Duration::from_secs(300));
    }

    #[test]
    fn test_retries_stop_at_max_attempts() {
        let policy = RetryPolicy::default();

        assert_eq!(policy.delay_for(1, &server_error()), Some(Duration::from_secs(30)));
        assert_eq!(policy.delay_for(2, &server_error()), Some(Duration::from_secs(60)));
        assert_eq!(policy.delay_for(3, &server_error()), None);
    }

    #[test]
    fn test_authentication_never_retried() {
        let policy = RetryPolicy::default();
        let error = SyncError::from(BridgeError::Authentication("expired".to_string()));

        assert_eq!(policy.delay_for(1, &error), None);
        assert_eq!(policy.delay_for(1, &SyncError::Cancelled), None);
    }

    #[test]
    fn test_rate_limit_hint_respected() {
        let policy = RetryPolicy::default();
        let error = SyncError::from(BridgeError::RateLimited {
            retry_after_secs: Some(120),
        });

        assert_eq!(policy.delay_for(1, &error), Some(Duration::from_secs(120)));
        assert_eq!(RetryPolicy::none().delay_for(1, &error), None);
    }
}
