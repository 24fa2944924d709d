use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;

use super::{Backend, EventStream, listed};
use crate::error::ArgfigError;
use crate::types::{ChangeEvent, Key, Pair, lock};

type Watcher = mpsc::UnboundedSender<Result<ChangeEvent, ArgfigError>>;

/// In-process store. Every `set` and `delete` is broadcast to open watches.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    root: String,
    data: Mutex<BTreeMap<Key, String>>,
    watchers: Mutex<Vec<Watcher>>,
}

impl MemoryBackend {
    pub fn new(root: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            ..Self::default()
        }
    }

    /// Seed a value without notifying watchers.
    pub fn insert(&self, key: Key, value: impl Into<String>) {
        lock(&self.data).insert(key, value.into());
    }

    pub fn delete(&self, key: &Key) -> Result<(), ArgfigError> {
        if lock(&self.data).remove(key).is_none() {
            return Err(ArgfigError::KeyNotFound(key.clone()));
        }
        self.broadcast(ChangeEvent::deleted(key.clone()));
        Ok(())
    }

    /// Close every open watch stream, as a dropped connection would.
    pub fn disconnect_watchers(&self) {
        lock(&self.watchers).clear();
    }

    /// Deliver an error to every open watch stream.
    pub fn fail_watchers(&self, reason: &str) {
        for tx in lock(&self.watchers).iter() {
            let _ = tx.send(Err(ArgfigError::Watch(reason.to_string())));
        }
    }

    pub fn watcher_count(&self) -> usize {
        let mut watchers = lock(&self.watchers);
        watchers.retain(|tx| !tx.is_closed());
        watchers.len()
    }

    fn broadcast(&self, event: ChangeEvent) {
        let mut watchers = lock(&self.watchers);
        watchers.retain(|tx| tx.send(Ok(event.clone())).is_ok());
        debug!(key = %event.key, watchers = watchers.len(), "broadcast change");
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn get(&self, key: &Key) -> Result<Pair, ArgfigError> {
        lock(&self.data)
            .get(key)
            .map(|v| Pair::new(key.clone(), v.clone()))
            .ok_or_else(|| ArgfigError::KeyNotFound(key.clone()))
    }

    async fn list(&self, key: &Key) -> Result<Vec<Pair>, ArgfigError> {
        Ok(lock(&self.data)
            .iter()
            .filter(|(k, _)| listed(key, k))
            .map(|(k, v)| Pair::new(k.clone(), v.clone()))
            .collect())
    }

    async fn set(&self, key: &Key, value: &str) -> Result<(), ArgfigError> {
        lock(&self.data).insert(key.clone(), value.to_string());
        self.broadcast(ChangeEvent::set(key.clone(), value));
        Ok(())
    }

    async fn watch(&self, _root: &str) -> Result<EventStream, ArgfigError> {
        let (tx, rx) = mpsc::unbounded_channel();
        lock(&self.watchers).push(tx);
        Ok(rx)
    }

    fn root_key(&self) -> &str {
        &self.root
    }

    async fn close(&self) -> Result<(), ArgfigError> {
        self.disconnect_watchers();
        Ok(())
    }
}
