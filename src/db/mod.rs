//! Persistent key-value storage for cache documents.
//!
//! The caches treat the store as an opaque async dictionary of JSON
//! documents. Any backend that can get and set whole documents by key
//! can sit behind [`PersistentStore`].

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

pub mod connection;
pub mod memory;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait PersistentStore: Send + Sync {
    /// Fetch the documents stored under `keys`. Missing keys are absent from the map.
    async fn get(&self, keys: &[&str]) -> Result<HashMap<String, Value>, StoreError>;

    /// Write every document in `entries`, replacing previous values.
    async fn set(&self, entries: HashMap<String, Value>) -> Result<(), StoreError>;
}

pub const INIT_SCHEMA: &str = r#"
-- Key-value table holding whole JSON documents
CREATE TABLE IF NOT EXISTS kv_store (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    updated_at INTEGER NOT NULL
);
"#;
