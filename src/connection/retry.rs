use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Retry configuration for transient HTTP failures. Disabled by default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub enabled: bool,
    /// Maximum number of retries for a single request
    pub max_retries: u32,
    /// Upper bound on the summed waits of one request, in milliseconds
    pub max_total_wait_ms: u64,
    /// Wait before the first retry, in milliseconds
    pub base_interval_ms: u64,
    /// Growth factor applied to the wait on every further retry
    pub multiplier: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            enabled: false,
            max_retries: 1,
            max_total_wait_ms: 10_000,
            base_interval_ms: 250,
            multiplier: 2,
        }
    }
}

impl RetryPolicy {
    pub fn enabled() -> Self {
        Self {
            enabled: true,
            ..Default::default()
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_max_total_wait(mut self, wait: Duration) -> Self {
        self.max_total_wait_ms = wait.as_millis() as u64;
        self
    }

    pub fn with_base_interval(mut self, interval: Duration) -> Self {
        self.base_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn with_multiplier(mut self, multiplier: u32) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// Wait before retry number `attempt` (1-based): the exponential backoff
    /// or the server's suggestion, whichever is longer.
    pub fn interval(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        let factor = self
            .multiplier
            .saturating_pow(attempt.saturating_sub(1)) as u64;
        let backoff = Duration::from_millis(self.base_interval_ms.saturating_mul(factor));
        match retry_after {
            Some(suggested) if suggested > backoff => suggested,
            _ => backoff,
        }
    }

    /// Decides whether `error` gets another attempt after `retries` retries
    /// and `waited` accumulated backoff. Returns the wait when it does.
    pub fn next_wait(&self, error: &Error, retries: u32, waited: Duration) -> Option<Duration> {
        if !self.enabled || !error.is_retryable() || retries >= self.max_retries {
            return None;
        }
        let retry_after = error.as_http().and_then(|err| err.retry_after());
        let interval = self.interval(retries + 1, retry_after);
        match waited.checked_add(interval) {
            Some(total) if total < Duration::from_millis(self.max_total_wait_ms) => Some(interval),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{HttpError, HttpErrorKind};
    use crate::response::RestResponse;

    fn unavailable() -> Error {
        Error::Http(HttpError::new(
            HttpErrorKind::ServiceUnavailable,
            RestResponse::new(503),
        ))
    }

    fn policy() -> RetryPolicy {
        RetryPolicy::enabled()
            .with_max_retries(3)
            .with_base_interval(Duration::from_millis(250))
            .with_multiplier(2)
            .with_max_total_wait(Duration::from_millis(10_000))
    }

    #[test]
    fn test_backoff_sequence_stops_at_max_retries() {
        let policy = policy();
        let error = unavailable();
        let mut waited = Duration::ZERO;
        let mut waits = Vec::new();
        for retries in 0.. {
            match policy.next_wait(&error, retries, waited) {
                Some(wait) => {
                    waited += wait;
                    waits.push(wait.as_millis());
                }
                None => break,
            }
        }
        assert_eq!(waits, vec![250, 500, 1000]);
    }

    #[test]
    fn test_total_wait_budget() {
        let policy = policy().with_max_retries(10).with_max_total_wait(Duration::from_millis(800));
        let error = unavailable();
        assert!(policy.next_wait(&error, 0, Duration::ZERO).is_some());
        assert!(policy.next_wait(&error, 1, Duration::from_millis(250)).is_some());
        // 750 + 1000 would exceed the budget
        assert!(policy.next_wait(&error, 2, Duration::from_millis(750)).is_none());
    }

    #[test]
    fn test_server_suggestion_wins_when_longer() {
        let policy = policy();
        assert_eq!(
            policy.interval(1, Some(Duration::from_secs(2))),
            Duration::from_millis(2000)
        );
        assert_eq!(
            policy.interval(3, Some(Duration::from_millis(10))),
            Duration::from_millis(1000)
        );

        let error = Error::Http(HttpError::new(
            HttpErrorKind::TooManyRequests,
            RestResponse::new(429).with_header("Retry-After", 1),
        ));
        assert_eq!(
            policy.next_wait(&error, 0, Duration::ZERO),
            Some(Duration::from_millis(1000))
        );
    }

    #[test]
    fn test_client_errors_and_disabled_policy_never_retry() {
        let forbidden = Error::Http(HttpError::new(
            HttpErrorKind::Forbidden,
            RestResponse::new(403),
        ));
        assert!(policy().next_wait(&forbidden, 0, Duration::ZERO).is_none());
        assert!(
            RetryPolicy::default()
                .next_wait(&unavailable(), 0, Duration::ZERO)
                .is_none()
        );
    }

    #[test]
    fn test_huge_retry_after_is_over_budget() {
        let error = Error::Http(HttpError::new(
            HttpErrorKind::TooManyRequests,
            RestResponse::new(429).with_header("Retry-After", u64::MAX),
        ));
        assert_eq!(policy().next_wait(&error, 1, Duration::from_millis(250)), None);
        assert_eq!(policy().next_wait(&unavailable(), 0, Duration::MAX), None);
        assert!(policy().interval(64, None) >= policy().interval(3, None));
    }
}
