//! In-process backing store.
//!
//! Several caches sharing one `MemoryStore` behave like several processes
//! sharing a Redis instance. Availability can be toggled to exercise the
//! degraded, local-only paths.

use super::{BackingStore, PayloadStream};
use anyhow::{bail, Result};
use async_trait::async_trait;
use futures_util::{future, StreamExt};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{broadcast, Mutex};
use tokio_stream::wrappers::BroadcastStream;
use tracing::warn;

const CHANNEL_CAPACITY: usize = 1024;

pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
    channels: Mutex<HashMap<String, broadcast::Sender<String>>>,
    available: AtomicBool,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            channels: Mutex::new(HashMap::new()),
            available: AtomicBool::new(true),
        }
    }

    /// Simulates the store going away (or coming back). Existing channel
    /// subscriptions stay open.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<()> {
        if !self.available.load(Ordering::SeqCst) {
            bail!("memory store is unavailable");
        }
        Ok(())
    }
}

#[async_trait]
impl BackingStore for MemoryStore {
    async fn ping(&self) -> Result<()> {
        self.check_available()
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.check_available()?;
        Ok(self.entries.lock().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.check_available()?;
        self.entries
            .lock()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.check_available()?;
        self.entries.lock().await.remove(key);
        Ok(())
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, String)>> {
        self.check_available()?;
        let entries = self.entries.lock().await;
        Ok(entries
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect())
    }

    async fn publish(&self, channel: &str, payload: &str) -> Result<()> {
        self.check_available()?;
        let channels = self.channels.lock().await;
        if let Some(sender) = channels.get(channel) {
            // No receivers left is not an error for pub/sub.
            let _ = sender.send(payload.to_string());
        }
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<PayloadStream> {
        self.check_available()?;
        let receiver = {
            let mut channels = self.channels.lock().await;
            channels
                .entry(channel.to_string())
                .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
                .subscribe()
        };

        let channel = channel.to_string();
        let stream = BroadcastStream::new(receiver).filter_map(move |item| {
            future::ready(match item {
                Ok(payload) => Some(payload),
                Err(err) => {
                    warn!(channel = %channel, error = %err, "Subscriber lagged behind channel");
                    None
                }
            })
        });

        Ok(stream.boxed())
    }
}
