//! Schedule kinds and the time arithmetic shared by validation and the engine.
//!
//! Cron expressions may have 5 fields (minute granularity) or 6 (leading
//! seconds). The `cron` crate wants the seconds field, so 5-field patterns get
//! a `0` prepended before parsing.

use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;

use crate::error::{AlarmError, Result};
use crate::trigger::DeleteAfterFire;

/// The three mutually exclusive ways a trigger can be scheduled.
#[derive(Debug, Clone, PartialEq)]
pub enum Schedule {
    Cron {
        expression: String,
        timezone: Option<String>,
    },
    Interval {
        minutes: u32,
    },
    Once {
        date: DateTime<Utc>,
        delete_after_fire: DeleteAfterFire,
    },
}

impl Schedule {
    pub fn kind(&self) -> ScheduleKind {
        match self {
            Schedule::Cron { .. } => ScheduleKind::Cron,
            Schedule::Interval { .. } => ScheduleKind::Interval,
            Schedule::Once { .. } => ScheduleKind::Date,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleKind {
    Interval,
    Date,
    Cron,
}

impl std::fmt::Display for ScheduleKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScheduleKind::Interval => write!(f, "interval"),
            ScheduleKind::Date => write!(f, "date"),
            ScheduleKind::Cron => write!(f, "cron"),
        }
    }
}

/// A parsed cron pattern bound to an optional IANA timezone.
#[derive(Debug, Clone)]
pub struct CronSpec {
    schedule: cron::Schedule,
    timezone: Option<Tz>,
}

impl CronSpec {
    pub fn parse(pattern: &str, timezone: Option<&str>) -> Result<Self> {
        let timezone = match timezone.map(str::trim).filter(|tz| !tz.is_empty()) {
            Some(name) => Some(
                name.parse::<Tz>()
                    .map_err(|_| AlarmError::Validation("Invalid timezone.".into()))?,
            ),
            None => None,
        };

        let fields = pattern.split_whitespace().count();
        let normalized = match fields {
            5 => format!("0 {}", pattern.trim()),
            6 => pattern.trim().to_string(),
            _ => return Err(invalid_pattern(pattern)),
        };
        let schedule =
            cron::Schedule::from_str(&normalized).map_err(|_| invalid_pattern(pattern))?;

        Ok(Self { schedule, timezone })
    }

    /// First fire strictly after `after`.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self.timezone {
            Some(tz) => self
                .schedule
                .after(&after.with_timezone(&tz))
                .next()
                .map(|d| d.with_timezone(&Utc)),
            None => self.schedule.after(&after).next(),
        }
    }
}

/// True when the pattern carries a non-zero seconds field.
pub fn has_seconds_granularity(pattern: &str) -> bool {
    let fields: Vec<&str> = pattern.split_whitespace().collect();
    fields.len() > 5 && fields[fields.len() - 6] != "0"
}

fn invalid_pattern(pattern: &str) -> AlarmError {
    AlarmError::Validation(format!("cron pattern '{pattern}' is not valid"))
}

pub fn interval_period(minutes: u32) -> Duration {
    Duration::minutes(i64::from(minutes))
}

/// First interval boundary anchored at `start` that is due no earlier than `now`.
///
/// A future `start` is itself the first fire. Once `start` has passed the next
/// aligned boundary strictly after `now` is used, so a restarted process keeps
/// the original cadence instead of drifting to "now + period".
pub fn next_interval_fire(
    start: DateTime<Utc>,
    period: Duration,
    now: DateTime<Utc>,
) -> DateTime<Utc> {
    if start > now {
        return start;
    }
    let period_ms = period.num_milliseconds().max(1);
    let elapsed = (now - start).num_milliseconds();
    let fired = elapsed / period_ms;
    start + Duration::milliseconds(period_ms * (fired + 1))
}
