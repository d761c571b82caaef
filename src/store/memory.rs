//! In-process reference store: last-write-wins namespaces with self-echoing
//! fan-out.
//!
//! DESIGN
//! ======
//! Mirrors the external store's observable contract closely enough to stand
//! in for it: per-key LWW overwrite, subscription callbacks fired for every
//! mutation *including the writer's own*, and delivery in store order. All
//! sessions in a test share one `MemoryStore`, which also makes it the
//! offline/local backend. Locks are plain `std::sync::Mutex` held only for
//! map access — never across an await point.

#[cfg(test)]
#[path = "memory_test.rs"]
mod memory_test;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

use super::{RemoteStore, StoreDelta, StoreEntry, StoreError, StoreHandle, SubscriptionGuard};

struct Subscriber {
    id: u64,
    pattern: String,
    sink: mpsc::UnboundedSender<StoreDelta>,
}

#[derive(Default)]
struct NamespaceState {
    entries: HashMap<String, serde_json::Value>,
    subscribers: Vec<Subscriber>,
}

#[derive(Default)]
struct Inner {
    namespaces: HashMap<String, NamespaceState>,
    next_subscriber_id: u64,
}

/// Shared in-memory store.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().expect("store lock poisoned")
    }
}

#[async_trait::async_trait]
impl RemoteStore for MemoryStore {
    async fn populate(&self, namespace: &str) -> Result<(), StoreError> {
        self.lock().namespaces.entry(namespace.to_owned()).or_default();
        Ok(())
    }

    fn create(&self, namespace: &str) -> Arc<dyn StoreHandle> {
        self.lock().namespaces.entry(namespace.to_owned()).or_default();
        Arc::new(MemoryHandle { store: self.clone(), namespace: namespace.to_owned() })
    }
}

/// Handle onto one namespace of a [`MemoryStore`].
pub struct MemoryHandle {
    store: MemoryStore,
    namespace: String,
}

impl MemoryHandle {
    fn apply(&self, key: &str, value: Option<serde_json::Value>) {
        let mut inner = self.store.lock();
        let state = inner.namespaces.entry(self.namespace.clone()).or_default();
        match &value {
            Some(v) => {
                state.entries.insert(key.to_owned(), v.clone());
            }
            None => {
                state.entries.remove(key);
            }
        }

        let delta = StoreDelta { namespace: self.namespace.clone(), key: key.to_owned(), value };
        // Subscribers whose receiving side has gone away are dropped here.
        state.subscribers.retain(|sub| {
            if !pattern_matches(&sub.pattern, &delta.key) {
                return true;
            }
            sub.sink.send(delta.clone()).is_ok()
        });
    }
}

fn pattern_matches(pattern: &str, key: &str) -> bool {
    pattern == "*" || key.starts_with(pattern)
}

#[async_trait::async_trait]
impl StoreHandle for MemoryHandle {
    fn namespace(&self) -> &str {
        &self.namespace
    }

    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>, StoreError> {
        Ok(self
            .store
            .lock()
            .namespaces
            .get(&self.namespace)
            .and_then(|ns| ns.entries.get(key).cloned()))
    }

    async fn get_all(&self) -> Result<HashMap<String, serde_json::Value>, StoreError> {
        Ok(self
            .store
            .lock()
            .namespaces
            .get(&self.namespace)
            .map(|ns| ns.entries.clone())
            .unwrap_or_default())
    }

    async fn set(&self, key: &str, value: serde_json::Value) -> Result<(), StoreError> {
        self.apply(key, Some(value));
        Ok(())
    }

    async fn bulk_set(&self, entries: Vec<StoreEntry>) -> Result<(), StoreError> {
        for entry in entries {
            self.apply(&entry.key, Some(entry.payload));
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.apply(key, None);
        Ok(())
    }

    async fn bulk_delete(&self, keys: Vec<String>) -> Result<(), StoreError> {
        for key in keys {
            self.apply(&key, None);
        }
        Ok(())
    }

    fn subscribe(
        &self,
        pattern: &str,
        sink: mpsc::UnboundedSender<StoreDelta>,
    ) -> SubscriptionGuard {
        let id = {
            let mut inner = self.store.lock();
            let id = inner.next_subscriber_id;
            inner.next_subscriber_id += 1;
            let state = inner.namespaces.entry(self.namespace.clone()).or_default();
            state.subscribers.push(Subscriber { id, pattern: pattern.to_owned(), sink });
            id
        };

        let store = self.store.clone();
        let namespace = self.namespace.clone();
        SubscriptionGuard::new(move || {
            let mut inner = store.lock();
            if let Some(state) = inner.namespaces.get_mut(&namespace) {
                state.subscribers.retain(|sub| sub.id != id);
            }
        })
    }
}
