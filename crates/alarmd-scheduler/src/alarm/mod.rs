//! Alarm strategies: turn a trigger document into a sequence of fire times.
//!
//! The schedule kind is resolved once, when the trigger is armed. Each
//! strategy validates its window against `now` up front (expired dates, stop
//! dates already passed, first fire past the stop date) and afterwards only
//! answers "when is the next fire after `t`", never returning a time past
//! the trigger's stop date.

pub mod cron;
pub mod date;
pub mod interval;

use std::sync::Arc;

use alarmd_core::error::Result;
use alarmd_core::schedule::{Schedule, ScheduleKind};
use alarmd_core::trigger::TriggerDoc;
use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;

pub use self::cron::CronAlarm;
pub use self::date::DateAlarm;
pub use self::interval::IntervalAlarm;

use crate::timer;

/// Called by the timer task for every due fire, with the scheduled time.
pub type OnTick = Arc<dyn Fn(DateTime<Utc>) + Send + Sync>;

#[derive(Debug, Clone)]
pub enum Alarm {
    Cron(CronAlarm),
    Interval(IntervalAlarm),
    Date(DateAlarm),
}

impl Alarm {
    /// Pick and validate the strategy for `doc` as of `now`.
    pub fn from_doc(doc: &TriggerDoc, now: DateTime<Utc>) -> Result<Self> {
        Ok(match doc.schedule()? {
            Schedule::Cron {
                expression,
                timezone,
            } => Alarm::Cron(CronAlarm::new(
                &expression,
                timezone.as_deref(),
                doc.start_date,
                doc.stop_date,
                now,
            )?),
            Schedule::Interval { minutes } => Alarm::Interval(IntervalAlarm::new(
                minutes,
                doc.start_date,
                doc.stop_date,
                now,
            )?),
            Schedule::Once {
                date,
                delete_after_fire,
            } => Alarm::Date(DateAlarm::new(date, delete_after_fire, now)?),
        })
    }

    pub fn kind(&self) -> ScheduleKind {
        match self {
            Alarm::Cron(_) => ScheduleKind::Cron,
            Alarm::Interval(_) => ScheduleKind::Interval,
            Alarm::Date(_) => ScheduleKind::Date,
        }
    }

    /// Next fire strictly after `after`, if any remains inside the window.
    pub fn next_fire(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Alarm::Cron(a) => a.next_fire(after),
            Alarm::Interval(a) => a.next_fire(after),
            Alarm::Date(a) => a.next_fire(after),
        }
    }

    pub fn stop_date(&self) -> Option<DateTime<Utc>> {
        match self {
            Alarm::Cron(a) => a.stop_date,
            Alarm::Interval(a) => a.stop_date,
            Alarm::Date(_) => None,
        }
    }

    /// Whether the fire at `fired_at` was the last one before the stop date.
    pub fn past_last_fire(&self, fired_at: DateTime<Utc>) -> bool {
        match self {
            Alarm::Cron(a) => a.is_last_fire(fired_at),
            Alarm::Interval(a) => a.is_last_fire(fired_at),
            Alarm::Date(_) => true,
        }
    }
}

/// Start the timer task driving `on_tick` until the schedule runs out.
pub fn spawn_timer(id: &str, alarm: Alarm, on_tick: OnTick) -> JoinHandle<()> {
    let id = id.to_string();
    tokio::spawn(async move {
        let mut after = Utc::now();
        while let Some(at) = alarm.next_fire(after) {
            tracing::debug!("⏳ {id} next fire at {at}");
            timer::sleep_until(at).await;
            on_tick(at);
            after = at;
        }
        tracing::debug!("{id} has no fires left in its schedule");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use std::sync::Mutex;

    #[test]
    fn test_kind_follows_document() {
        let now = Utc::now();
        let doc = TriggerDoc {
            minutes: Some(5),
            ..Default::default()
        };
        assert_eq!(Alarm::from_doc(&doc, now).unwrap().kind(), ScheduleKind::Interval);

        let doc = TriggerDoc {
            cron: Some("*/5 * * * *".into()),
            ..Default::default()
        };
        assert_eq!(Alarm::from_doc(&doc, now).unwrap().kind(), ScheduleKind::Cron);
    }

    #[tokio::test]
    async fn test_timer_ticks_every_second_for_seconds_cron() {
        let now = Utc::now();
        let doc = TriggerDoc {
            cron: Some("* * * * * *".into()),
            stop_date: Some(now + Duration::milliseconds(2500)),
            ..Default::default()
        };
        let alarm = Alarm::from_doc(&doc, now).unwrap();
        let ticks = Arc::new(Mutex::new(Vec::new()));
        let sink = ticks.clone();
        let handle = spawn_timer(
            "t",
            alarm,
            Arc::new(move |at| sink.lock().unwrap().push(at)),
        );
        tokio::time::timeout(std::time::Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();

        let ticks = ticks.lock().unwrap();
        assert!(ticks.len() >= 2 && ticks.len() <= 3);
        assert!(ticks.iter().all(|t| *t <= now + Duration::milliseconds(2500)));
    }
}
