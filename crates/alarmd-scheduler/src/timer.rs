//! Wall-clock timers that stay correct over days and weeks.
//!
//! A single long `tokio::time::sleep` drifts from the wall clock (suspend,
//! NTP steps) and has an upper bound. Long waits are cut into bounded chunks
//! and the remaining time is re-read from the clock after each one.

use std::time::Duration;

use chrono::{DateTime, Utc};

/// Longest single sleep before the deadline is re-checked.
pub const MAX_CHUNK: Duration = Duration::from_secs(6 * 60 * 60);

/// Time left until `deadline`, zero when already due.
pub fn remaining(deadline: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (deadline - now).to_std().unwrap_or(Duration::ZERO)
}

/// Sleep until the wall clock reaches `deadline`.
pub async fn sleep_until(deadline: DateTime<Utc>) {
    loop {
        let left = remaining(deadline, Utc::now());
        if left.is_zero() {
            return;
        }
        tokio::time::sleep(left.min(MAX_CHUNK)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remaining_never_negative() {
        let now = Utc::now();
        assert_eq!(remaining(now - chrono::Duration::seconds(5), now), Duration::ZERO);
        assert_eq!(
            remaining(now + chrono::Duration::days(40), now),
            Duration::from_secs(40 * 24 * 3600)
        );
    }

    #[tokio::test]
    async fn test_sleep_until_past_deadline_returns() {
        sleep_until(Utc::now() - chrono::Duration::seconds(1)).await;
        let start = std::time::Instant::now();
        sleep_until(Utc::now() + chrono::Duration::milliseconds(50)).await;
        assert!(start.elapsed() >= Duration::from_millis(40));
    }
}
