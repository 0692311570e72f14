//! # alarmd core
//!
//! Shared vocabulary of the alarm provider: the persisted trigger document,
//! the schedule sum type, CRUD validation, configuration, the error type, and
//! the traits behind which the store, the trigger platform and the
//! active/standby channel live.
//!
//! ```text
//! TriggerDoc ──schedule()──▶ Schedule::{Cron, Interval, Once}
//!     │
//!     ├── TriggerStore        (documents + worker-filtered change feed)
//!     ├── Platform            (fire / look up / delete upstream)
//!     └── CoordinationChannel (active host key + swap topic)
//! ```

pub mod config;
pub mod error;
pub mod schedule;
pub mod traits;
pub mod trigger;
pub mod validate;

pub use config::AlarmConfig;
pub use error::{AlarmError, Result};
pub use schedule::{CronSpec, Schedule, ScheduleKind};
pub use trigger::{
    DEFAULT_WORKER, DeleteAfterFire, ReasonKind, StatusReason, TriggerDoc, TriggerStatus,
    UNLIMITED, trigger_id,
};
pub use validate::{TriggerPatch, TriggerRequest, validate_create, validate_update};
