//! Dispatch retry policy and failure classification.
//!
//! Pure functions of the attempt history so the back-off curve can be tested
//! without any I/O.

use std::time::Duration;

use alarmd_core::config::RetryConfig;
use alarmd_core::error::AlarmError;

pub const TOO_MANY_REQUESTS: u16 = 429;

/// 4xx codes that are worth retrying.
const TRANSIENT_CLIENT_ERRORS: [u16; 3] = [408, TOO_MANY_REQUESTS, 409];

/// How a failed dispatch attempt is treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    /// Never retried; the trigger gets disabled with this status.
    Terminal(u16),
    /// Retried within the budget. `status` is `None` for transport errors.
    Retryable { status: Option<u16> },
}

impl Failure {
    pub fn is_throttled(&self) -> bool {
        matches!(self, Failure::Retryable { status: Some(TOO_MANY_REQUESTS) })
    }
}

/// True for 4xx statuses outside the transient allow-list.
pub fn is_terminal_status(status: u16) -> bool {
    (400..500).contains(&status) && !TRANSIENT_CLIENT_ERRORS.contains(&status)
}

pub fn classify(err: &AlarmError) -> Failure {
    match err.http_status() {
        Some(status) if is_terminal_status(status) => Failure::Terminal(status),
        status => Failure::Retryable { status },
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub attempts: u32,
    pub delay: Duration,
    /// Ceiling of the rate-limit back-off.
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            attempts: config.attempts,
            delay: Duration::from_millis(config.delay_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
        }
    }

    /// Delay before retry number `retry` (1-based), or `None` once the budget
    /// is spent. `throttled` counts the 429 responses seen so far; each one
    /// grows the wait quadratically, floored at `delay` and capped at
    /// `max_backoff`.
    pub fn next_delay(&self, retry: u32, throttled: u32) -> Option<Duration> {
        if retry > self.attempts {
            return None;
        }
        let backoff = Duration::from_millis(1000u64.saturating_mul(u64::from(throttled).pow(2)))
            .min(self.max_backoff.max(self.delay));
        Some(self.delay.max(backoff))
    }

    /// Every attempt (first plus all retries) was rate-limited.
    pub fn throttled_out(&self, throttled: u32) -> bool {
        throttled > self.attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        let http = |s| AlarmError::Http {
            status: Some(s),
            message: String::new(),
        };
        assert_eq!(classify(&http(404)), Failure::Terminal(404));
        assert_eq!(classify(&http(401)), Failure::Terminal(401));
        assert!(classify(&http(429)).is_throttled());
        assert_eq!(
            classify(&http(408)),
            Failure::Retryable { status: Some(408) }
        );
        assert_eq!(
            classify(&http(503)),
            Failure::Retryable { status: Some(503) }
        );
        let transport = AlarmError::Http {
            status: None,
            message: "reset".into(),
        };
        assert_eq!(classify(&transport), Failure::Retryable { status: None });
    }

    #[test]
    fn test_budget_and_fixed_delay() {
        let policy = RetryPolicy {
            attempts: 3,
            delay: Duration::from_millis(500),
            max_backoff: Duration::from_secs(60),
        };
        assert_eq!(policy.next_delay(1, 0), Some(Duration::from_millis(500)));
        assert_eq!(policy.next_delay(3, 0), Some(Duration::from_millis(500)));
        assert_eq!(policy.next_delay(4, 0), None);
    }

    #[test]
    fn test_quadratic_throttle_backoff() {
        let policy = RetryPolicy {
            attempts: 10,
            delay: Duration::from_millis(1000),
            max_backoff: Duration::from_secs(30),
        };
        assert_eq!(policy.next_delay(2, 1), Some(Duration::from_secs(1)));
        assert_eq!(policy.next_delay(3, 3), Some(Duration::from_secs(9)));
        assert_eq!(policy.next_delay(9, 8), Some(Duration::from_secs(30)));
        assert!(policy.throttled_out(11));
        assert!(!policy.throttled_out(10));
    }
}
