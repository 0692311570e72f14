//! Active/standby coordination channel trait.
//!
//! A keyed hash field holds the active host id; a pub/sub topic on the same
//! key broadcasts swaps.

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::error::Result;

/// Stream of active-host ids published on the swap topic.
pub type SwapStream = BoxStream<'static, String>;

#[async_trait]
pub trait CoordinationChannel: Send + Sync {
    async fn get_active(&self, key: &str, field: &str) -> Result<Option<String>>;

    async fn set_active(&self, key: &str, field: &str, host: &str) -> Result<()>;

    async fn publish(&self, key: &str, host: &str) -> Result<()>;

    async fn subscribe(&self, key: &str) -> Result<SwapStream>;
}
