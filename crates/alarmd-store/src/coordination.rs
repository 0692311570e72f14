//! In-process coordination channel.
//!
//! Stands in for Redis when both hosts of a pair run in one process (tests,
//! local demos): a keyed hash of fields plus a broadcast topic per key.

use std::collections::HashMap;
use std::sync::Mutex;

use alarmd_core::error::{AlarmError, Result};
use alarmd_core::traits::{CoordinationChannel, SwapStream};
use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

pub struct MemoryChannel {
    hashes: Mutex<HashMap<String, HashMap<String, String>>>,
    topic: broadcast::Sender<(String, String)>,
}

impl Default for MemoryChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryChannel {
    pub fn new() -> Self {
        let (topic, _) = broadcast::channel(64);
        Self {
            hashes: Mutex::new(HashMap::new()),
            topic,
        }
    }

    fn hashes(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, HashMap<String, String>>>> {
        self.hashes
            .lock()
            .map_err(|_| AlarmError::Coordination("memory channel lock poisoned".into()))
    }
}

#[async_trait]
impl CoordinationChannel for MemoryChannel {
    async fn get_active(&self, key: &str, field: &str) -> Result<Option<String>> {
        Ok(self
            .hashes()?
            .get(key)
            .and_then(|fields| fields.get(field))
            .cloned())
    }

    async fn set_active(&self, key: &str, field: &str, host: &str) -> Result<()> {
        self.hashes()?
            .entry(key.to_string())
            .or_default()
            .insert(field.to_string(), host.to_string());
        Ok(())
    }

    async fn publish(&self, key: &str, host: &str) -> Result<()> {
        let _ = self.topic.send((key.to_string(), host.to_string()));
        Ok(())
    }

    async fn subscribe(&self, key: &str) -> Result<SwapStream> {
        let key = key.to_string();
        let stream = BroadcastStream::new(self.topic.subscribe()).filter_map(move |msg| {
            let key = key.clone();
            async move {
                match msg {
                    Ok((topic, host)) if topic == key => Some(host),
                    _ => None,
                }
            }
        });
        Ok(stream.boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_hash_and_topic() {
        let channel = MemoryChannel::new();
        assert_eq!(channel.get_active("k", "active").await.unwrap(), None);
        channel.set_active("k", "active", "host1").await.unwrap();
        assert_eq!(
            channel.get_active("k", "active").await.unwrap().as_deref(),
            Some("host1")
        );

        let mut swaps = channel.subscribe("k").await.unwrap();
        channel.publish("other", "host0").await.unwrap();
        channel.publish("k", "host0").await.unwrap();
        assert_eq!(swaps.next().await.as_deref(), Some("host0"));
    }
}
