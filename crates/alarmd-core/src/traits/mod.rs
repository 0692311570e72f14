//! Seams to the external collaborators the engine drives.

pub mod coordination;
pub mod platform;
pub mod store;

pub use coordination::{CoordinationChannel, SwapStream};
pub use platform::{Platform, PlatformTrigger, TriggerTarget};
pub use store::{Change, ChangeStream, FeedPosition, MalformedDoc, TriggerStore, WorkerTriggers};
