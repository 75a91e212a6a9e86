//! Replicated state cache.
//!
//! Values live in a local mirror and, when a backing store is connected, in
//! the shared store. Every write is published on the namespace channel so
//! other processes can update their mirrors. Store failures never reach the
//! caller: the cache logs them and keeps serving from the mirror.

use super::event::{channel_name, store_key, valid_namespace, PropagationEvent};
use super::listener::{run_isolated, same_listener, Origin, StateChange, StateListener};
use super::store::{BackingStore, PayloadStream};
use anyhow::Result;
use futures_util::StreamExt;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

type Mirror = Arc<RwLock<HashMap<String, HashMap<String, Value>>>>;
type ListenerSet = Arc<RwLock<Vec<Arc<dyn StateListener>>>>;

struct NamespaceSubscription {
    listeners: ListenerSet,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

pub struct ReplicatedCache {
    instance_id: String,
    store: Option<Arc<dyn BackingStore>>,
    connected: AtomicBool,
    mirror: Mirror,
    subscriptions: Mutex<HashMap<String, NamespaceSubscription>>,
}

impl ReplicatedCache {
    /// Creates a cache. Without a store it can only ever run local-only.
    pub fn new(store: Option<Arc<dyn BackingStore>>) -> Self {
        Self {
            instance_id: Uuid::new_v4().to_string(),
            store,
            connected: AtomicBool::new(false),
            mirror: Arc::new(RwLock::new(HashMap::new())),
            subscriptions: Mutex::new(HashMap::new()),
        }
    }

    /// Local-only cache with no backing store.
    pub fn local() -> Self {
        Self::new(None)
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Checks backing-store connectivity. Idempotent; `false` means the cache
    /// keeps running in local-only mode.
    pub async fn connect(&self) -> bool {
        if self.is_connected() {
            return true;
        }

        let Some(store) = &self.store else {
            warn!("State replication is disabled; running in local-only mode");
            return false;
        };

        match store.ping().await {
            Ok(()) => {
                self.connected.store(true, Ordering::Release);
                info!(instance_id = %self.instance_id, "State replication connected");
                true
            }
            Err(err) => {
                warn!(
                    "Backing store unreachable, running in local-only mode: {:#}",
                    err
                );
                false
            }
        }
    }

    /// Stops every propagation listener and returns to local-only mode.
    pub async fn disconnect(&self) {
        let mut subscriptions = self.subscriptions.lock().await;
        for (namespace, subscription) in subscriptions.drain() {
            subscription.cancel.cancel();
            debug!(namespace = %namespace, "Propagation listener cancelled");
        }
        if self.connected.swap(false, Ordering::AcqRel) {
            info!("State replication disconnected");
        }
    }

    fn active_store(&self) -> Option<Arc<dyn BackingStore>> {
        if self.is_connected() {
            self.store.clone()
        } else {
            None
        }
    }

    /// Writes the mirror, then persists and publishes on a best-effort basis.
    /// Returns `false` only for a namespace containing `:`.
    pub async fn set(&self, namespace: &str, key: &str, value: Value) -> bool {
        if !self.accepts(namespace) {
            return false;
        }
        self.set_propagated(namespace, key, value).await;
        true
    }

    /// Same write as [`set`](Self::set), but reports whether the change was
    /// persisted and published. `false` means only this process's mirror
    /// holds it and no subscriber, local or remote, will hear about it.
    pub async fn set_propagated(&self, namespace: &str, key: &str, value: Value) -> bool {
        if !self.accepts(namespace) {
            return false;
        }

        self.mirror
            .write()
            .await
            .entry(namespace.to_string())
            .or_default()
            .insert(key.to_string(), value.clone());

        let Some(store) = self.active_store() else {
            return false;
        };
        match self.persist(store.as_ref(), namespace, key, value).await {
            Ok(()) => true,
            Err(err) => {
                warn!(
                    namespace = %namespace,
                    key = %key,
                    "Failed to replicate state update: {:#}",
                    err
                );
                false
            }
        }
    }

    fn accepts(&self, namespace: &str) -> bool {
        if valid_namespace(namespace) {
            return true;
        }
        warn!(namespace = %namespace, "Rejecting namespace containing ':'");
        false
    }

    async fn persist(
        &self,
        store: &dyn BackingStore,
        namespace: &str,
        key: &str,
        value: Value,
    ) -> Result<()> {
        let encoded = serde_json::to_string(&value)?;
        store.set(&store_key(namespace, key), &encoded).await?;

        let event = PropagationEvent::Update {
            namespace: namespace.to_string(),
            key: key.to_string(),
            value,
            origin: Some(self.instance_id.clone()),
        };
        store
            .publish(&channel_name(namespace), &serde_json::to_string(&event)?)
            .await
    }

    /// Mirror first; a miss reads through to the store and fills the mirror.
    pub async fn get(&self, namespace: &str, key: &str) -> Option<Value> {
        if !valid_namespace(namespace) {
            return None;
        }
        {
            let mirror = self.mirror.read().await;
            if let Some(value) = mirror.get(namespace).and_then(|entries| entries.get(key)) {
                return Some(value.clone());
            }
        }

        let store = self.active_store()?;
        let raw = match store.get(&store_key(namespace, key)).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(err) => {
                warn!(namespace = %namespace, key = %key, "Failed to read state: {:#}", err);
                return None;
            }
        };

        match serde_json::from_str::<Value>(&raw) {
            Ok(value) => {
                self.mirror
                    .write()
                    .await
                    .entry(namespace.to_string())
                    .or_default()
                    .insert(key.to_string(), value.clone());
                Some(value)
            }
            Err(err) => {
                warn!(namespace = %namespace, key = %key, error = %err, "Stored value is not valid JSON");
                None
            }
        }
    }

    pub async fn delete(&self, namespace: &str, key: &str) -> bool {
        if !self.accepts(namespace) {
            return false;
        }
        self.delete_propagated(namespace, key).await;
        true
    }

    /// Counterpart of [`set_propagated`](Self::set_propagated) for deletes.
    pub async fn delete_propagated(&self, namespace: &str, key: &str) -> bool {
        if !self.accepts(namespace) {
            return false;
        }

        if let Some(entries) = self.mirror.write().await.get_mut(namespace) {
            entries.remove(key);
        }

        let Some(store) = self.active_store() else {
            return false;
        };
        match self.remove_remote(store.as_ref(), namespace, key).await {
            Ok(()) => true,
            Err(err) => {
                warn!(
                    namespace = %namespace,
                    key = %key,
                    "Failed to replicate state delete: {:#}",
                    err
                );
                false
            }
        }
    }

    async fn remove_remote(&self, store: &dyn BackingStore, namespace: &str, key: &str) -> Result<()> {
        store.delete(&store_key(namespace, key)).await?;

        let event = PropagationEvent::Delete {
            namespace: namespace.to_string(),
            key: key.to_string(),
            origin: Some(self.instance_id.clone()),
        };
        store
            .publish(&channel_name(namespace), &serde_json::to_string(&event)?)
            .await
    }

    /// Snapshot of a namespace: store entries overlaid with the mirror.
    pub async fn get_all(&self, namespace: &str) -> HashMap<String, Value> {
        let mut result = HashMap::new();
        if !self.accepts(namespace) {
            return result;
        }

        if let Some(store) = self.active_store() {
            let prefix = store_key(namespace, "");
            match store.scan_prefix(&prefix).await {
                Ok(pairs) => {
                    for (full_key, raw) in pairs {
                        let Some(key) = full_key.strip_prefix(&prefix) else {
                            continue;
                        };
                        match serde_json::from_str::<Value>(&raw) {
                            Ok(value) => {
                                result.insert(key.to_string(), value);
                            }
                            Err(err) => {
                                warn!(key = %full_key, error = %err, "Skipping non-JSON stored value");
                            }
                        }
                    }
                }
                Err(err) => {
                    warn!(namespace = %namespace, "Failed to scan stored state: {:#}", err);
                }
            }
        }

        if let Some(entries) = self.mirror.read().await.get(namespace) {
            for (key, value) in entries {
                result.insert(key.clone(), value.clone());
            }
        }

        result
    }

    /// Registers a listener for a namespace. The first listener starts the
    /// namespace's propagation task. Returns `false` in local-only mode.
    pub async fn subscribe(&self, namespace: &str, listener: Arc<dyn StateListener>) -> bool {
        if !self.accepts(namespace) {
            return false;
        }
        let Some(store) = self.active_store() else {
            warn!(namespace = %namespace, "Replication not connected; cannot subscribe");
            return false;
        };

        let mut subscriptions = self.subscriptions.lock().await;

        if let Some(existing) = subscriptions.get(namespace) {
            if !existing.task.is_finished() {
                let mut listeners = existing.listeners.write().await;
                if !listeners.iter().any(|l| same_listener(l, &listener)) {
                    listeners.push(listener);
                }
                return true;
            }
        }

        let stream = match store.subscribe(&channel_name(namespace)).await {
            Ok(stream) => stream,
            Err(err) => {
                warn!(namespace = %namespace, "Failed to subscribe to propagation channel: {:#}", err);
                return false;
            }
        };

        // A finished task means its stream ended; keep its listeners and restart.
        let listeners = match subscriptions.remove(namespace) {
            Some(stale) => {
                warn!(namespace = %namespace, "Restarting ended propagation listener");
                {
                    let mut registered = stale.listeners.write().await;
                    if !registered.iter().any(|l| same_listener(l, &listener)) {
                        registered.push(listener);
                    }
                }
                stale.listeners
            }
            None => Arc::new(RwLock::new(vec![listener])),
        };

        let cancel = CancellationToken::new();
        let worker = PropagationWorker {
            namespace: namespace.to_string(),
            instance_id: self.instance_id.clone(),
            mirror: self.mirror.clone(),
            listeners: listeners.clone(),
            cancel: cancel.clone(),
        };
        let task = tokio::spawn(worker.run(stream));

        subscriptions.insert(
            namespace.to_string(),
            NamespaceSubscription {
                listeners,
                cancel,
                task,
            },
        );
        info!(namespace = %namespace, "Propagation listener started");
        true
    }

    /// Removes a listener. The last one out stops the namespace task.
    pub async fn unsubscribe(&self, namespace: &str, listener: &Arc<dyn StateListener>) -> bool {
        let mut subscriptions = self.subscriptions.lock().await;
        let Some(subscription) = subscriptions.get(namespace) else {
            return false;
        };

        let now_empty = {
            let mut listeners = subscription.listeners.write().await;
            let before = listeners.len();
            listeners.retain(|l| !same_listener(l, listener));
            if listeners.len() == before {
                return false;
            }
            listeners.is_empty()
        };

        if now_empty {
            if let Some(subscription) = subscriptions.remove(namespace) {
                subscription.cancel.cancel();
                info!(namespace = %namespace, "Propagation listener stopped");
            }
        }
        true
    }

    /// Number of namespaces with a running propagation task.
    pub async fn active_listener_tasks(&self) -> usize {
        self.subscriptions
            .lock()
            .await
            .values()
            .filter(|subscription| !subscription.task.is_finished())
            .count()
    }
}

/// Single consumer of one namespace channel.
struct PropagationWorker {
    namespace: String,
    instance_id: String,
    mirror: Mirror,
    listeners: ListenerSet,
    cancel: CancellationToken,
}

impl PropagationWorker {
    async fn run(self, mut stream: PayloadStream) {
        loop {
            let payload = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                next = stream.next() => match next {
                    Some(payload) => payload,
                    None => {
                        warn!(namespace = %self.namespace, "Propagation channel closed");
                        break;
                    }
                },
            };
            self.handle_payload(&payload).await;
        }
        debug!(namespace = %self.namespace, "Propagation worker exiting");
    }

    async fn handle_payload(&self, payload: &str) {
        let event = match PropagationEvent::decode(payload) {
            Ok(event) => event,
            Err(err) => {
                warn!(namespace = %self.namespace, error = %err, "Dropping malformed propagation payload");
                return;
            }
        };

        if event.namespace() != self.namespace {
            warn!(
                namespace = %self.namespace,
                event_namespace = %event.namespace(),
                "Dropping propagation event for a different namespace"
            );
            return;
        }

        let origin = if event.origin() == Some(self.instance_id.as_str()) {
            Origin::Local
        } else {
            Origin::Remote
        };

        // Our own writes are already mirrored, possibly with a newer value.
        if origin == Origin::Remote {
            let mut mirror = self.mirror.write().await;
            match event.value() {
                Some(value) => {
                    mirror
                        .entry(self.namespace.clone())
                        .or_default()
                        .insert(event.key().to_string(), value.clone());
                }
                None => {
                    if let Some(entries) = mirror.get_mut(&self.namespace) {
                        entries.remove(event.key());
                    }
                }
            }
        }

        let change = StateChange {
            namespace: self.namespace.clone(),
            key: event.key().to_string(),
            value: event.value().cloned(),
            origin,
        };

        let listeners = self.listeners.read().await.clone();
        for listener in listeners {
            if let Err(err) = run_isolated(listener.on_change(&change)).await {
                warn!(
                    namespace = %self.namespace,
                    key = %change.key,
                    "State listener failed: {}",
                    err
                );
            }
        }
    }
}
