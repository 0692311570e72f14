//! One-shot strategy.

use alarmd_core::error::{AlarmError, Result};
use alarmd_core::trigger::DeleteAfterFire;
use chrono::{DateTime, Utc};

#[derive(Debug, Clone)]
pub struct DateAlarm {
    pub date: DateTime<Utc>,
    pub delete_after_fire: DeleteAfterFire,
}

impl DateAlarm {
    pub fn new(
        date: DateTime<Utc>,
        delete_after_fire: DeleteAfterFire,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        if date <= now {
            return Err(AlarmError::Schedule("the fire once date has expired".into()));
        }
        Ok(Self {
            date,
            delete_after_fire,
        })
    }

    pub fn next_fire(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        (self.date > after).then_some(self.date)
    }
}
