//! Redis-backed store.
//!
//! Commands share one multiplexed connection. Every channel subscription
//! opens its own pub/sub connection, which is closed when the returned
//! stream is dropped.

use super::{BackingStore, PayloadStream};
use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_util::{future, StreamExt};
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client};
use tracing::{info, warn};

pub struct RedisStore {
    client: Client,
    connection: MultiplexedConnection,
}

impl RedisStore {
    pub async fn connect(url: &str) -> Result<Self> {
        let client = Client::open(url).with_context(|| format!("Invalid Redis URL: {url}"))?;
        let connection = client
            .get_multiplexed_async_connection()
            .await
            .with_context(|| format!("Failed to connect to Redis at {url}"))?;

        info!("Connected to Redis at {}", url);
        Ok(Self { client, connection })
    }
}

#[async_trait]
impl BackingStore for RedisStore {
    async fn ping(&self) -> Result<()> {
        let mut conn = self.connection.clone();
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .context("Redis PING failed")?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.connection.clone();
        let value: Option<String> = conn.get(key).await.context("Redis GET failed")?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut conn = self.connection.clone();
        conn.set::<_, _, ()>(key, value)
            .await
            .context("Redis SET failed")?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.connection.clone();
        conn.del::<_, ()>(key).await.context("Redis DEL failed")?;
        Ok(())
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, String)>> {
        let mut conn = self.connection.clone();
        let keys: Vec<String> = conn
            .keys(format!("{prefix}*"))
            .await
            .context("Redis KEYS failed")?;
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let values: Vec<Option<String>> = redis::cmd("MGET")
            .arg(&keys)
            .query_async(&mut conn)
            .await
            .context("Redis MGET failed")?;

        Ok(keys
            .into_iter()
            .zip(values)
            .filter_map(|(key, value)| value.map(|value| (key, value)))
            .collect())
    }

    async fn publish(&self, channel: &str, payload: &str) -> Result<()> {
        let mut conn = self.connection.clone();
        conn.publish::<_, _, ()>(channel, payload)
            .await
            .context("Redis PUBLISH failed")?;
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<PayloadStream> {
        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .context("Failed to open Redis pub/sub connection")?;
        pubsub
            .subscribe(channel)
            .await
            .with_context(|| format!("Failed to subscribe to {channel}"))?;

        let channel = channel.to_string();
        let stream = pubsub.into_on_message().filter_map(move |msg| {
            future::ready(match msg.get_payload::<String>() {
                Ok(payload) => Some(payload),
                Err(err) => {
                    warn!(channel = %channel, error = %err, "Dropping non-text pub/sub payload");
                    None
                }
            })
        });

        Ok(stream.boxed())
    }
}
