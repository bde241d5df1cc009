use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use super::{PersistentStore, StoreError};

/// In-process store. Nothing survives a restart; used for tests and
/// ephemeral sessions.
#[derive(Debug, Default)]
pub struct MemoryStore {
    documents: RwLock<HashMap<String, Value>>,
    writes: AtomicUsize,
    fail_writes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful `set` calls so far.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Make every following `set` fail with `StoreError::Unavailable`.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub async fn snapshot(&self, key: &str) -> Option<Value> {
        self.documents.read().await.get(key).cloned()
    }
}

#[async_trait]
impl PersistentStore for MemoryStore {
    async fn get(&self, keys: &[&str]) -> Result<HashMap<String, Value>, StoreError> {
        let documents = self.documents.read().await;
        Ok(keys
            .iter()
            .filter_map(|key| documents.get(*key).map(|v| (key.to_string(), v.clone())))
            .collect())
    }

    async fn set(&self, entries: HashMap<String, Value>) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("writes disabled".to_string()));
        }

        let mut documents = self.documents.write().await;
        documents.extend(entries);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
