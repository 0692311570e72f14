//! Redis coordination channel: `HGET`/`HSET` on the worker key plus pub/sub
//! on the same key for swap notifications.

use alarmd_core::error::{AlarmError, Result};
use alarmd_core::traits::{CoordinationChannel, SwapStream};
use async_trait::async_trait;
use futures::StreamExt;
use redis::AsyncCommands;
use redis::aio::MultiplexedConnection;

pub struct RedisChannel {
    client: redis::Client,
    conn: MultiplexedConnection,
}

fn redis_err(e: redis::RedisError) -> AlarmError {
    AlarmError::Coordination(e.to_string())
}

impl RedisChannel {
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url).map_err(redis_err)?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(redis_err)?;
        Ok(Self { client, conn })
    }
}

#[async_trait]
impl CoordinationChannel for RedisChannel {
    async fn get_active(&self, key: &str, field: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        conn.hget::<_, _, Option<String>>(key, field)
            .await
            .map_err(redis_err)
    }

    async fn set_active(&self, key: &str, field: &str, host: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.hset::<_, _, _, ()>(key, field, host)
            .await
            .map_err(redis_err)
    }

    async fn publish(&self, key: &str, host: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.publish::<_, _, ()>(key, host)
            .await
            .map_err(redis_err)
    }

    async fn subscribe(&self, key: &str) -> Result<SwapStream> {
        let mut pubsub = self.client.get_async_pubsub().await.map_err(redis_err)?;
        pubsub.subscribe(key).await.map_err(redis_err)?;
        let stream = pubsub.into_on_message().filter_map(|msg| async move {
            match msg.get_payload::<String>() {
                Ok(host) => Some(host),
                Err(e) => {
                    tracing::warn!("⚠️ Ignoring undecodable swap message: {e}");
                    None
                }
            }
        });
        Ok(stream.boxed())
    }
}
