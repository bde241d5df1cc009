//! Per-(address, chain) transaction history cache
//!
//! Buckets are kept sorted by (block_number, transaction_index), unique by
//! hash and bounded to the most recent `max_transactions` records.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

use super::keys::{normalize_address, CacheKey, TRANSACTION_STORE_KEY};
use crate::clock::Clock;
use crate::config::CacheConfig;
use crate::db::{PersistentStore, StoreError};
use crate::models::{ChainId, TransactionCacheBucket, TransactionRecord};

type TransactionDocument = BTreeMap<String, BTreeMap<ChainId, TransactionCacheBucket>>;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransactionStats {
    pub addresses: usize,
    pub buckets: usize,
    pub transactions: usize,
    pub oldest_fetch: Option<i64>,
}

/// Merge `incoming` into `existing`, dropping records whose hash is already
/// present, and sort the result.
pub fn merge_transactions(
    existing: Vec<TransactionRecord>,
    incoming: Vec<TransactionRecord>,
) -> Vec<TransactionRecord> {
    let mut seen: HashSet<String> = HashSet::with_capacity(existing.len() + incoming.len());
    let mut merged = Vec::with_capacity(existing.len() + incoming.len());

    for record in existing.into_iter().chain(incoming) {
        if seen.insert(record.hash.clone()) {
            merged.push(record);
        }
    }

    merged.sort_by_key(TransactionRecord::sort_key);
    merged
}

/// Keep only the `cap` most recent records of a sorted history.
pub fn trim_to_recent(transactions: &mut Vec<TransactionRecord>, cap: usize) {
    if transactions.len() > cap {
        let excess = transactions.len() - cap;
        transactions.drain(..excess);
    }
}

pub struct TransactionCache {
    store: Arc<dyn PersistentStore>,
    clock: Arc<dyn Clock>,
    max_transactions: usize,
    freshness_window: Duration,
    state: Mutex<Option<TransactionDocument>>,
    bucket_locks: DashMap<CacheKey, Arc<Mutex<()>>>,
}

impl TransactionCache {
    pub fn new(store: Arc<dyn PersistentStore>, clock: Arc<dyn Clock>, config: &CacheConfig) -> Self {
        Self {
            store,
            clock,
            max_transactions: config.max_transactions_per_bucket,
            freshness_window: config.freshness_window,
            state: Mutex::new(None),
            bucket_locks: DashMap::new(),
        }
    }

    /// Lock guarding read-modify-write sequences on one bucket.
    ///
    /// Holders may await network calls; the document lock is only taken
    /// for the individual reads and writes inside.
    pub fn bucket_lock(&self, address: &str, chain_id: ChainId) -> Arc<Mutex<()>> {
        self.bucket_locks
            .entry(CacheKey::transaction_bucket(address, chain_id))
            .or_default()
            .clone()
    }

    /// Forget the lock of a bucket once nobody holds or waits on it.
    ///
    /// Callers drop their own handle first.
    pub fn release_bucket_lock(&self, address: &str, chain_id: ChainId) {
        self.bucket_locks
            .remove_if(&CacheKey::transaction_bucket(address, chain_id), |_, lock| {
                Arc::strong_count(lock) == 1
            });
    }

    #[cfg(test)]
    pub(crate) fn bucket_lock_count(&self) -> usize {
        self.bucket_locks.len()
    }

    async fn lock_loaded(
        &self,
    ) -> Result<MutexGuard<'_, Option<TransactionDocument>>, StoreError> {
        let mut guard = self.state.lock().await;
        if guard.is_none() {
            let mut docs = self.store.get(&[TRANSACTION_STORE_KEY]).await?;
            let document = match docs.remove(TRANSACTION_STORE_KEY) {
                Some(value) => serde_json::from_value(value).unwrap_or_else(|e| {
                    warn!("Discarding unreadable transaction cache document: {}", e);
                    TransactionDocument::new()
                }),
                None => TransactionDocument::new(),
            };
            *guard = Some(document);
        }
        Ok(guard)
    }

    async fn persist(
        &self,
        guard: &mut MutexGuard<'_, Option<TransactionDocument>>,
    ) -> Result<(), StoreError> {
        let value = match guard.as_ref() {
            Some(document) => serde_json::to_value(document)?,
            None => return Ok(()),
        };

        if let Err(e) = self
            .store
            .set(HashMap::from([(TRANSACTION_STORE_KEY.to_string(), value)]))
            .await
        {
            **guard = None;
            return Err(e);
        }
        Ok(())
    }

    pub async fn get_bucket(
        &self,
        address: &str,
        chain_id: ChainId,
    ) -> Result<Option<TransactionCacheBucket>, StoreError> {
        let guard = self.lock_loaded().await?;
        let address = normalize_address(address);
        Ok(guard
            .as_ref()
            .and_then(|doc| doc.get(&address))
            .and_then(|buckets| buckets.get(&chain_id))
            .cloned())
    }

    /// A bucket is fresh while less than the freshness window has passed since its last fetch.
    pub fn is_fresh(&self, bucket: &TransactionCacheBucket) -> bool {
        let age = self.clock.now_millis() - bucket.last_fetch_timestamp;
        age < self.freshness_window.as_millis() as i64
    }

    /// Overwrite the bucket. `last_block` is taken as given.
    pub async fn replace(
        &self,
        address: &str,
        chain_id: ChainId,
        transactions: Vec<TransactionRecord>,
        last_block: u64,
    ) -> Result<TransactionCacheBucket, StoreError> {
        let address = normalize_address(address);
        let mut transactions = merge_transactions(Vec::new(), transactions);
        trim_to_recent(&mut transactions, self.max_transactions);

        let bucket = TransactionCacheBucket {
            address: address.clone(),
            chain_id,
            transactions,
            last_block,
            last_fetch_timestamp: self.clock.now_millis(),
        };

        let mut guard = self.lock_loaded().await?;
        if let Some(document) = guard.as_mut() {
            document
                .entry(address.clone())
                .or_default()
                .insert(chain_id, bucket.clone());
        }
        self.persist(&mut guard).await?;

        debug!(
            address = %address,
            chain_id,
            count = bucket.transactions.len(),
            last_block,
            "Replaced transaction bucket"
        );
        Ok(bucket)
    }

    /// Merge new records into the bucket, creating it if needed.
    pub async fn append(
        &self,
        address: &str,
        chain_id: ChainId,
        new_transactions: Vec<TransactionRecord>,
        new_last_block: u64,
    ) -> Result<TransactionCacheBucket, StoreError> {
        let address = normalize_address(address);
        let now = self.clock.now_millis();

        let mut guard = self.lock_loaded().await?;
        let Some(document) = guard.as_mut() else {
            return Err(StoreError::Unavailable("transaction cache not loaded".to_string()));
        };

        let buckets = document.entry(address.clone()).or_default();
        let bucket = match buckets.remove(&chain_id) {
            Some(existing) => {
                let added = new_transactions.len();
                let mut transactions = merge_transactions(existing.transactions, new_transactions);
                trim_to_recent(&mut transactions, self.max_transactions);
                debug!(
                    address = %address,
                    chain_id,
                    incoming = added,
                    total = transactions.len(),
                    "Appended to transaction bucket"
                );
                TransactionCacheBucket {
                    address: address.clone(),
                    chain_id,
                    transactions,
                    last_block: existing.last_block.max(new_last_block),
                    last_fetch_timestamp: now,
                }
            }
            None => {
                let mut transactions = merge_transactions(Vec::new(), new_transactions);
                trim_to_recent(&mut transactions, self.max_transactions);
                TransactionCacheBucket {
                    address: address.clone(),
                    chain_id,
                    transactions,
                    last_block: new_last_block,
                    last_fetch_timestamp: now,
                }
            }
        };
        buckets.insert(chain_id, bucket.clone());

        self.persist(&mut guard).await?;
        Ok(bucket)
    }

    /// Refresh `last_fetch_timestamp` without touching the contents.
    pub async fn touch(
        &self,
        address: &str,
        chain_id: ChainId,
    ) -> Result<Option<TransactionCacheBucket>, StoreError> {
        let address = normalize_address(address);
        let now = self.clock.now_millis();

        let mut guard = self.lock_loaded().await?;
        let touched = guard
            .as_mut()
            .and_then(|doc| doc.get_mut(&address))
            .and_then(|buckets| buckets.get_mut(&chain_id))
            .map(|bucket| {
                bucket.last_fetch_timestamp = now;
                bucket.clone()
            });

        if touched.is_some() {
            self.persist(&mut guard).await?;
        }
        Ok(touched)
    }

    /// Drop one bucket, or every bucket of `address`. Returns the number of buckets removed.
    ///
    /// Waits for in-flight syncs of the affected buckets, so a sync cannot
    /// write a bucket back after it was invalidated.
    pub async fn invalidate(
        &self,
        address: &str,
        chain_id: Option<ChainId>,
    ) -> Result<usize, StoreError> {
        let address = normalize_address(address);
        let chains = match chain_id {
            Some(chain_id) => vec![chain_id],
            None => self.cached_chains(&address).await?,
        };

        // Ascending chain order; a sync only ever holds one bucket lock
        let locks: Vec<_> = chains
            .iter()
            .map(|chain_id| self.bucket_lock(&address, *chain_id))
            .collect();
        let mut guards = Vec::with_capacity(locks.len());
        for lock in &locks {
            guards.push(lock.lock().await);
        }

        let removed = self.remove_buckets(&address, chain_id).await;

        drop(guards);
        drop(locks);
        for chain_id in &chains {
            self.release_bucket_lock(&address, *chain_id);
        }
        removed
    }

    async fn cached_chains(&self, address: &str) -> Result<Vec<ChainId>, StoreError> {
        let guard = self.lock_loaded().await?;
        Ok(guard
            .as_ref()
            .and_then(|doc| doc.get(address))
            .map(|buckets| buckets.keys().copied().collect())
            .unwrap_or_default())
    }

    async fn remove_buckets(
        &self,
        address: &str,
        chain_id: Option<ChainId>,
    ) -> Result<usize, StoreError> {
        let mut guard = self.lock_loaded().await?;
        let Some(document) = guard.as_mut() else {
            return Ok(0);
        };

        let removed = match chain_id {
            Some(chain_id) => {
                let removed = document
                    .get_mut(address)
                    .and_then(|buckets| buckets.remove(&chain_id))
                    .is_some() as usize;
                if document.get(address).is_some_and(BTreeMap::is_empty) {
                    document.remove(address);
                }
                removed
            }
            None => document.remove(address).map(|b| b.len()).unwrap_or(0),
        };

        if removed > 0 {
            self.persist(&mut guard).await?;
            info!(address = %address, chain_id = ?chain_id, removed, "Invalidated transaction cache");
        }
        Ok(removed)
    }

    pub async fn stats(&self) -> Result<TransactionStats, StoreError> {
        let guard = self.lock_loaded().await?;
        let mut stats = TransactionStats::default();

        for buckets in guard.iter().flat_map(|doc| doc.values()) {
            stats.addresses += 1;
            for bucket in buckets.values() {
                stats.buckets += 1;
                stats.transactions += bucket.transactions.len();
                stats.oldest_fetch = Some(
                    stats
                        .oldest_fetch
                        .map_or(bucket.last_fetch_timestamp, |t| t.min(bucket.last_fetch_timestamp)),
                );
            }
        }

        Ok(stats)
    }
}
