//! Shared key/value string store.
//!
//! Non-authoritative: values here are hints between contexts, never a source
//! of truth, and a watcher may miss changes if it lags behind.

use dashmap::DashMap;
use tokio::sync::broadcast;

const CHANGE_BUFFER: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageChange {
    pub key: String,
    /// `None` when the key was removed.
    pub value: Option<String>,
}

pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;

    fn set(&self, key: &str, value: String);

    fn remove(&self, key: &str);

    /// Stream of changes made by any context sharing this store.
    fn watch(&self) -> broadcast::Receiver<StorageChange>;
}

/// Process-wide store shared between contexts through an `Arc`.
#[derive(Debug)]
pub struct MemoryStorage {
    entries: DashMap<String, String>,
    changes: broadcast::Sender<StorageChange>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_BUFFER);
        Self {
            entries: DashMap::new(),
            changes,
        }
    }

    fn announce(&self, key: &str, value: Option<String>) {
        // No watchers is fine.
        let _ = self.changes.send(StorageChange {
            key: key.to_string(),
            value,
        });
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyValueStore for MemoryStorage {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.get(key).map(|entry| entry.value().clone())
    }

    fn set(&self, key: &str, value: String) {
        self.entries.insert(key.to_string(), value.clone());
        self.announce(key, Some(value));
    }

    fn remove(&self, key: &str) {
        if self.entries.remove(key).is_some() {
            self.announce(key, None);
        }
    }

    fn watch(&self) -> broadcast::Receiver<StorageChange> {
        self.changes.subscribe()
    }
}
