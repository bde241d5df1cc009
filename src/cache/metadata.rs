//! Token metadata cache, persisted as one document per store.
//!
//! Entries never expire on read. Each chain is bounded: once it holds more
//! than `capacity` entries, the oldest quarter (by `cached_at`) is dropped.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

use super::keys::{normalize_address, METADATA_STORE_KEY};
use crate::blockchain::client::ChainProvider;
use crate::blockchain::retry::{metadata_resource_key, RetryingFetcher};
use crate::clock::Clock;
use crate::db::{PersistentStore, StoreError};
use crate::models::{ChainId, MetadataEntry, TokenMetadata};

type MetadataDocument = BTreeMap<ChainId, BTreeMap<String, MetadataEntry>>;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetadataStats {
    pub total_entries: usize,
    pub entries_by_chain: BTreeMap<ChainId, usize>,
    pub oldest_entry: Option<i64>,
    pub newest_entry: Option<i64>,
}

pub struct MetadataCache {
    store: Arc<dyn PersistentStore>,
    clock: Arc<dyn Clock>,
    capacity: usize,
    /// In-memory mirror of the stored document; `None` until first load.
    state: Mutex<Option<MetadataDocument>>,
}

impl MetadataCache {
    pub fn new(store: Arc<dyn PersistentStore>, clock: Arc<dyn Clock>, capacity: usize) -> Self {
        Self {
            store,
            clock,
            capacity,
            state: Mutex::new(None),
        }
    }

    async fn lock_loaded(
        &self,
    ) -> Result<MutexGuard<'_, Option<MetadataDocument>>, StoreError> {
        let mut guard = self.state.lock().await;
        if guard.is_none() {
            let mut docs = self.store.get(&[METADATA_STORE_KEY]).await?;
            let document = match docs.remove(METADATA_STORE_KEY) {
                Some(value) => serde_json::from_value(value).unwrap_or_else(|e| {
                    warn!("Discarding unreadable metadata cache document: {}", e);
                    MetadataDocument::new()
                }),
                None => MetadataDocument::new(),
            };
            *guard = Some(document);
        }
        Ok(guard)
    }

    async fn persist(
        &self,
        guard: &mut MutexGuard<'_, Option<MetadataDocument>>,
    ) -> Result<(), StoreError> {
        let value = match guard.as_ref() {
            Some(document) => serde_json::to_value(document)?,
            None => return Ok(()),
        };

        if let Err(e) = self
            .store
            .set(HashMap::from([(METADATA_STORE_KEY.to_string(), value)]))
            .await
        {
            // Mirror may now be ahead of the store; reload on next access
            **guard = None;
            return Err(e);
        }
        Ok(())
    }

    pub async fn get(
        &self,
        chain_id: ChainId,
        contract_address: &str,
    ) -> Result<Option<TokenMetadata>, StoreError> {
        let guard = self.lock_loaded().await?;
        let address = normalize_address(contract_address);
        Ok(guard
            .as_ref()
            .and_then(|doc| doc.get(&chain_id))
            .and_then(|entries| entries.get(&address))
            .map(|entry| entry.metadata.clone()))
    }

    /// Cached metadata for every address that has an entry. Missing ones are absent.
    pub async fn get_many(
        &self,
        chain_id: ChainId,
        contract_addresses: &[String],
    ) -> Result<HashMap<String, TokenMetadata>, StoreError> {
        let guard = self.lock_loaded().await?;
        let Some(entries) = guard.as_ref().and_then(|doc| doc.get(&chain_id)) else {
            return Ok(HashMap::new());
        };

        Ok(contract_addresses
            .iter()
            .map(|a| normalize_address(a))
            .filter_map(|a| entries.get(&a).map(|e| (a, e.metadata.clone())))
            .collect())
    }

    pub async fn missing(
        &self,
        chain_id: ChainId,
        contract_addresses: &[String],
    ) -> Result<Vec<String>, StoreError> {
        let guard = self.lock_loaded().await?;
        let entries = guard.as_ref().and_then(|doc| doc.get(&chain_id));

        let mut missing: Vec<String> = Vec::new();
        for address in contract_addresses.iter().map(|a| normalize_address(a)) {
            let cached = entries.is_some_and(|e| e.contains_key(&address));
            if !cached && !missing.contains(&address) {
                missing.push(address);
            }
        }
        Ok(missing)
    }

    pub async fn put(
        &self,
        chain_id: ChainId,
        contract_address: &str,
        metadata: TokenMetadata,
    ) -> Result<(), StoreError> {
        self.put_many(
            chain_id,
            HashMap::from([(contract_address.to_string(), metadata)]),
        )
        .await
    }

    pub async fn put_many(
        &self,
        chain_id: ChainId,
        metadata: HashMap<String, TokenMetadata>,
    ) -> Result<(), StoreError> {
        if metadata.is_empty() {
            return Ok(());
        }

        let now = self.clock.now_millis();
        let mut guard = self.lock_loaded().await?;
        if let Some(document) = guard.as_mut() {
            let entries = document.entry(chain_id).or_default();
            for (address, metadata) in metadata {
                let contract_address = normalize_address(&address);
                entries.insert(
                    contract_address.clone(),
                    MetadataEntry {
                        chain_id,
                        contract_address,
                        metadata,
                        cached_at: now,
                    },
                );
            }
            evict_oldest(document, chain_id, self.capacity);
        }

        self.persist(&mut guard).await
    }

    /// Drop the oldest quarter of `chain_id` if it is over capacity. Returns the number removed.
    pub async fn evict_if_over_capacity(&self, chain_id: ChainId) -> Result<usize, StoreError> {
        let mut guard = self.lock_loaded().await?;
        let removed = match guard.as_mut() {
            Some(document) => evict_oldest(document, chain_id, self.capacity),
            None => 0,
        };
        if removed > 0 {
            self.persist(&mut guard).await?;
        }
        Ok(removed)
    }

    /// Remove every entry of one chain, or of all chains. Returns the number removed.
    pub async fn clear(&self, chain_id: Option<ChainId>) -> Result<usize, StoreError> {
        let mut guard = self.lock_loaded().await?;
        let removed = match (guard.as_mut(), chain_id) {
            (Some(document), Some(chain_id)) => {
                document.remove(&chain_id).map(|e| e.len()).unwrap_or(0)
            }
            (Some(document), None) => {
                let count = document.values().map(BTreeMap::len).sum();
                document.clear();
                count
            }
            (None, _) => 0,
        };
        self.persist(&mut guard).await?;
        info!(chain_id = ?chain_id, removed, "Cleared metadata cache");
        Ok(removed)
    }

    pub async fn stats(&self) -> Result<MetadataStats, StoreError> {
        let guard = self.lock_loaded().await?;
        let mut stats = MetadataStats::default();

        for (chain_id, entries) in guard.iter().flatten() {
            stats.entries_by_chain.insert(*chain_id, entries.len());
            stats.total_entries += entries.len();
            for entry in entries.values() {
                stats.oldest_entry = Some(
                    stats
                        .oldest_entry
                        .map_or(entry.cached_at, |t| t.min(entry.cached_at)),
                );
                stats.newest_entry = Some(
                    stats
                        .newest_entry
                        .map_or(entry.cached_at, |t| t.max(entry.cached_at)),
                );
            }
        }

        Ok(stats)
    }

    /// Metadata for every requested address.
    ///
    /// Cached entries are returned as-is. Missing ones go through a bounded
    /// batch fetch; successful lookups are written back, failed or timed out
    /// ones resolve to [`TokenMetadata::unknown`] and are not cached.
    pub async fn get_or_fetch(
        &self,
        chain_id: ChainId,
        contract_addresses: &[String],
        fetcher: &RetryingFetcher,
        provider: &dyn ChainProvider,
    ) -> Result<HashMap<String, TokenMetadata>, StoreError> {
        let mut result = self.get_many(chain_id, contract_addresses).await?;
        let missing = self.missing(chain_id, contract_addresses).await?;
        if missing.is_empty() {
            return Ok(result);
        }

        debug!(chain_id, missing = missing.len(), "Backfilling token metadata");

        let resource_key = metadata_resource_key(chain_id);
        let outcomes = fetcher
            .fetch_batch(
                &resource_key,
                missing,
                move |address: String| async move { provider.get_token_metadata(&address).await },
                |_| TokenMetadata::unknown(),
            )
            .await;

        let mut fetched = HashMap::new();
        for (address, outcome) in outcomes {
            if outcome.is_fallback() {
                result.insert(address, outcome.into_inner());
            } else {
                let metadata = outcome.into_inner();
                fetched.insert(address.clone(), metadata.clone());
                result.insert(address, metadata);
            }
        }

        if !fetched.is_empty() {
            self.put_many(chain_id, fetched).await?;
        }

        Ok(result)
    }
}

/// Generational eviction: when over capacity, remove `ceil(count / 4)` entries with the smallest `cached_at`.
fn evict_oldest(document: &mut MetadataDocument, chain_id: ChainId, capacity: usize) -> usize {
    let Some(entries) = document.get_mut(&chain_id) else {
        return 0;
    };
    let count = entries.len();
    if count <= capacity {
        return 0;
    }

    let to_remove = count.div_ceil(4);
    let mut by_age: Vec<(i64, String)> = entries
        .iter()
        .map(|(address, entry)| (entry.cached_at, address.clone()))
        .collect();
    by_age.sort();

    for (_, address) in by_age.into_iter().take(to_remove) {
        entries.remove(&address);
    }

    info!(
        chain_id,
        removed = to_remove,
        remaining = entries.len(),
        "Evicted oldest token metadata entries"
    );
    to_remove
}
