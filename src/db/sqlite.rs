use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;
use sqlx::{Pool, Row, Sqlite};
use tracing::debug;

use super::{connection, PersistentStore, StoreError, INIT_SCHEMA};

/// SQLite-backed document store. One row per key, value stored as JSON text.
#[derive(Clone)]
pub struct SqliteStore {
    pool: Pool<Sqlite>,
}

impl SqliteStore {
    /// Wrap an existing pool. The schema must already exist, see [`SqliteStore::init`].
    pub fn new(pool: Pool<Sqlite>) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = connection::establish_connection(database_url).await?;
        Ok(Self::new(pool))
    }

    /// Create the kv table on a pool that did not go through `establish_connection`.
    pub async fn init(pool: &Pool<Sqlite>) -> Result<(), StoreError> {
        sqlx::query(INIT_SCHEMA).execute(pool).await?;
        Ok(())
    }
}

#[async_trait]
impl PersistentStore for SqliteStore {
    async fn get(&self, keys: &[&str]) -> Result<HashMap<String, Value>, StoreError> {
        let mut documents = HashMap::with_capacity(keys.len());

        for key in keys {
            let row = sqlx::query("SELECT value FROM kv_store WHERE key = ?")
                .bind(*key)
                .fetch_optional(&self.pool)
                .await?;

            if let Some(row) = row {
                let raw: String = row.get("value");
                documents.insert(key.to_string(), serde_json::from_str(&raw)?);
            }
        }

        Ok(documents)
    }

    async fn set(&self, entries: HashMap<String, Value>) -> Result<(), StoreError> {
        let now = chrono::Utc::now().timestamp_millis();

        // All documents of one call land atomically
        let mut tx = self.pool.begin().await?;

        for (key, value) in &entries {
            let raw = serde_json::to_string(value)?;
            sqlx::query(
                r#"
                INSERT INTO kv_store (key, value, updated_at)
                VALUES (?, ?, ?)
                ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
                "#,
            )
            .bind(key)
            .bind(raw)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        debug!("Persisted {} document(s)", entries.len());

        Ok(())
    }
}
