//! # alarmd scheduler
//!
//! Arms stored triggers as in-process timers and fires them against the
//! trigger platform.
//!
//! ## Architecture
//! ```text
//! TriggerStore ──bootstrap + change feed──▶ AlarmEngine
//!                                             ├── TriggerRegistry (id → timer + fire state)
//!                                             │     └── Alarm::{Cron, Interval, Date} → tick
//!                                             ├── fire → Platform (retry / throttle back-off)
//!                                             │     └── post-fire checks → Sanitizer
//!                                             ├── ActiveHost (active/standby + swap topic)
//!                                             └── MonitorStatus ◀── SelfTestMonitor
//! ```

pub mod active;
pub mod alarm;
pub mod engine;
pub mod fire;
pub mod monitor;
pub mod registry;
pub mod retry;
pub mod sanitizer;
pub mod sync;
pub mod timer;
pub mod upstream;

#[cfg(test)]
mod testing;

pub use active::ActiveHost;
pub use engine::{AlarmEngine, EngineHealth};
pub use fire::FireOutcome;
pub use monitor::{MonitorReport, SelfTestMonitor};
pub use registry::TriggerRegistry;
pub use retry::RetryPolicy;
pub use sanitizer::Sanitizer;
pub use upstream::HttpPlatform;
