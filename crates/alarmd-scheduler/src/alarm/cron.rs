//! Cron strategy.

use alarmd_core::error::{AlarmError, Result};
use alarmd_core::schedule::CronSpec;
use chrono::{DateTime, Utc};

#[derive(Debug, Clone)]
pub struct CronAlarm {
    pub spec: CronSpec,
    /// Fires begin after this instant.
    pub start_date: Option<DateTime<Utc>>,
    pub stop_date: Option<DateTime<Utc>>,
}

impl CronAlarm {
    pub fn new(
        pattern: &str,
        timezone: Option<&str>,
        start_date: Option<DateTime<Utc>>,
        stop_date: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        let spec = CronSpec::parse(pattern, timezone)?;
        let alarm = Self {
            spec,
            start_date: start_date.filter(|s| *s > now),
            stop_date,
        };
        if let Some(stop) = stop_date {
            if stop <= now {
                return Err(AlarmError::Schedule("the stop date has expired".into()));
            }
            if alarm.unbounded_next(now).is_none_or(|next| next > stop) {
                return Err(AlarmError::Schedule(
                    "the next scheduled trigger fire is after the stop date".into(),
                ));
            }
        }
        Ok(alarm)
    }

    fn unbounded_next(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let from = match self.start_date {
            Some(start) if start > after => start,
            _ => after,
        };
        self.spec.next_after(from)
    }

    pub fn next_fire(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.unbounded_next(after)
            .filter(|next| self.stop_date.is_none_or(|stop| *next <= stop))
    }

    /// The following occurrence would land past the stop date.
    pub fn is_last_fire(&self, fired_at: DateTime<Utc>) -> bool {
        match self.stop_date {
            Some(stop) => self.unbounded_next(fired_at).is_none_or(|next| next > stop),
            None => false,
        }
    }
}
