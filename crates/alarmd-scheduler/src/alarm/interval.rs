//! Interval strategy: every `minutes`, anchored at the start date.

use alarmd_core::error::{AlarmError, Result};
use alarmd_core::schedule::{interval_period, next_interval_fire};
use chrono::{DateTime, Duration, Utc};

#[derive(Debug, Clone)]
pub struct IntervalAlarm {
    pub minutes: u32,
    period: Duration,
    /// Anchor of the cadence; boundaries are `start + k * period`.
    pub start: DateTime<Utc>,
    pub stop_date: Option<DateTime<Utc>>,
}

impl IntervalAlarm {
    /// A missing start date anchors the cadence at `now`.
    pub fn new(
        minutes: u32,
        start_date: Option<DateTime<Utc>>,
        stop_date: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        if minutes == 0 {
            return Err(AlarmError::Schedule(
                "the minutes parameter must be an integer greater than zero".into(),
            ));
        }
        let alarm = Self {
            minutes,
            period: interval_period(minutes),
            start: start_date.unwrap_or(now),
            stop_date,
        };
        if let Some(stop) = stop_date {
            if stop <= now {
                return Err(AlarmError::Schedule("the stop date has expired".into()));
            }
            if alarm.first_fire(now) > stop {
                return Err(AlarmError::Schedule(
                    "the next scheduled trigger fire is after the stop date".into(),
                ));
            }
        }
        Ok(alarm)
    }

    /// The start date when still ahead, otherwise the next aligned boundary.
    pub fn first_fire(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        next_interval_fire(self.start, self.period, now)
    }

    pub fn next_fire(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        Some(next_interval_fire(self.start, self.period, after))
            .filter(|next| self.stop_date.is_none_or(|stop| *next <= stop))
    }

    /// One more period would overrun the stop date.
    pub fn is_last_fire(&self, fired_at: DateTime<Utc>) -> bool {
        self.stop_date
            .is_some_and(|stop| fired_at + self.period > stop)
    }
}
