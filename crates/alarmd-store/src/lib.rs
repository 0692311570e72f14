//! # alarmd store
//!
//! Backends for the collaborator traits declared in `alarmd-core`:
//! - [`MemoryStore`]: process-local documents and change feed (single node, tests)
//! - [`CouchStore`]: CouchDB database with a continuous `_changes` feed
//! - [`MemoryChannel`] / [`RedisChannel`]: active-host key plus swap topic

pub mod coordination;
pub mod couchdb;
pub mod memory;
pub mod redis_channel;

use std::sync::Arc;

use alarmd_core::config::{CoordinationConfig, StoreBackend, StoreConfig};
use alarmd_core::error::Result;
use alarmd_core::traits::{CoordinationChannel, TriggerStore};

pub use coordination::MemoryChannel;
pub use couchdb::CouchStore;
pub use memory::MemoryStore;
pub use redis_channel::RedisChannel;

/// Open the configured trigger store, creating the database and its
/// design documents when the backend needs them.
pub async fn open_store(config: &StoreConfig) -> Result<Arc<dyn TriggerStore>> {
    match config.backend {
        StoreBackend::Memory => {
            tracing::info!("🗄️ Using in-memory trigger store");
            Ok(Arc::new(MemoryStore::new()))
        }
        StoreBackend::CouchDb => {
            let store = CouchStore::new(
                &config.url,
                &config.db_name,
                config.username.as_deref(),
                config.password.as_deref(),
            )?;
            store.ensure_database().await?;
            tracing::info!("🗄️ Using CouchDB trigger store: {}", config.db_name);
            Ok(Arc::new(store))
        }
    }
}

/// Open the coordination channel, or `None` for single-host mode.
pub async fn open_channel(
    config: &CoordinationConfig,
) -> Result<Option<Arc<dyn CoordinationChannel>>> {
    match config.redis_url.as_deref() {
        Some(url) => {
            let channel = RedisChannel::connect(url).await?;
            tracing::info!("🔗 Connected to redis coordination channel");
            Ok(Some(Arc::new(channel)))
        }
        None => Ok(None),
    }
}
