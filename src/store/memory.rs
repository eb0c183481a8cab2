//! In-process value store.

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use parking_lot::RwLock;
use std::collections::HashMap;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::data::Value;
use crate::error::Result;
use crate::store::{ValueStore, ValueStream};

/// A [`ValueStore`] kept in memory, with a broadcast channel per watched key.
///
/// Every `set` is recorded, which makes the store double as a test recorder.
pub struct MemoryStore {
    values: RwLock<HashMap<String, Value>>,
    watchers: RwLock<HashMap<String, broadcast::Sender<Value>>>,
    history: RwLock<Vec<(String, Value)>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            values: RwLock::new(HashMap::new()),
            watchers: RwLock::new(HashMap::new()),
            history: RwLock::new(Vec::new()),
        }
    }

    /// Create a store holding `entries`, without recording them as writes.
    pub fn with_values<'a>(entries: impl IntoIterator<Item = (&'a str, Value)>) -> Self {
        let store = Self::new();
        store.values.write().extend(
            entries
                .into_iter()
                .map(|(key, value)| (key.to_string(), value)),
        );
        store
    }

    /// Every write so far, in order.
    pub fn history(&self) -> Vec<(String, Value)> {
        self.history.read().clone()
    }

    /// Every value written to `key`, in order.
    pub fn writes_to(&self, key: &str) -> Vec<Value> {
        self.history
            .read()
            .iter()
            .filter(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
            .collect()
    }

    fn sender(&self, key: &str) -> broadcast::Sender<Value> {
        if let Some(tx) = self.watchers.read().get(key) {
            return tx.clone();
        }
        self.watchers
            .write()
            .entry(key.to_string())
            .or_insert_with(|| broadcast::channel(64).0)
            .clone()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ValueStore for MemoryStore {
    async fn set(&self, key: &str, value: Value) -> Result<()> {
        info!("{} = {}", key, value);

        self.values.write().insert(key.to_string(), value.clone());
        self.history.write().push((key.to_string(), value.clone()));

        let watcher = self.watchers.read().get(key).cloned();
        if let Some(tx) = watcher {
            if tx.send(value).is_err() {
                debug!("No active watchers for {}", key);
            }
        }

        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.values.read().get(key).cloned())
    }

    async fn watch(&self, key: &str) -> Result<ValueStream> {
        let rx = self.sender(key).subscribe();
        let key = key.to_string();

        Ok(stream::unfold((rx, key), |(mut rx, key)| async move {
            loop {
                match rx.recv().await {
                    Ok(value) => return Some((value, (rx, key))),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Watch on {} skipped {} changes", key, skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        })
        .boxed())
    }
}
