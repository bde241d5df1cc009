//! Incremental transaction history sync on top of the transaction cache.

use std::sync::Arc;

use tracing::{debug, info, warn};

use super::client::{ChainProvider, FetchError, TransactionQuery};
use super::retry::{transactions_resource_key, RetryingFetcher};
use crate::cache::TransactionCache;
use crate::error::Result;
use crate::models::{TransactionCacheBucket, TransactionRecord};

/// Where the returned history came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncSource {
    /// Cached bucket within the freshness window, no network call.
    Fresh,
    /// First fetch for this address and chain.
    Initial,
    /// New records appended to an existing bucket.
    Incremental,
    /// Provider had nothing new; the bucket was re-stamped.
    Unchanged,
    /// Provider failed; the cached bucket is returned as-is.
    Stale,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SyncOutcome {
    pub transactions: Vec<TransactionRecord>,
    pub last_block: u64,
    pub source: SyncSource,
}

impl SyncOutcome {
    fn from_bucket(bucket: TransactionCacheBucket, source: SyncSource) -> Self {
        Self {
            transactions: bucket.transactions,
            last_block: bucket.last_block,
            source,
        }
    }
}

struct FetchedHistory {
    records: Vec<TransactionRecord>,
    latest_block: Option<u64>,
    /// False when paging stopped early (page cap or a failed follow-up page).
    complete: bool,
}

impl FetchedHistory {
    /// Cursor to store after this fetch. Never below `previous`.
    fn next_cursor(&self, previous: Option<u64>) -> u64 {
        let max_record = self.records.iter().map(|r| r.block_number).max();
        let reached = match (max_record, self.complete) {
            // The last block may have been cut at a page boundary; fetch it again next time
            (Some(block), false) => block.saturating_sub(1),
            (Some(block), true) => block.max(self.latest_block.unwrap_or(0)),
            (None, _) => self.latest_block.unwrap_or(0),
        };
        reached.max(previous.unwrap_or(0))
    }
}

pub struct SmartSync {
    cache: Arc<TransactionCache>,
    fetcher: Arc<RetryingFetcher>,
    max_pages: usize,
}

impl SmartSync {
    pub fn new(cache: Arc<TransactionCache>, fetcher: Arc<RetryingFetcher>, max_pages: usize) -> Self {
        Self {
            cache,
            fetcher,
            max_pages: max_pages.max(1),
        }
    }

    pub fn cache(&self) -> &Arc<TransactionCache> {
        &self.cache
    }

    /// Return the history of `address` on the provider's chain, fetching only
    /// what the cache does not have yet.
    ///
    /// Concurrent calls for the same address and chain run one after the other.
    pub async fn sync(&self, address: &str, provider: &dyn ChainProvider) -> Result<SyncOutcome> {
        let chain_id = provider.chain_id();
        let lock = self.cache.bucket_lock(address, chain_id);
        let guard = lock.lock().await;

        let result = self.sync_locked(address, provider).await;

        drop(guard);
        drop(lock);
        self.cache.release_bucket_lock(address, chain_id);
        result
    }

    async fn sync_locked(&self, address: &str, provider: &dyn ChainProvider) -> Result<SyncOutcome> {
        let chain_id = provider.chain_id();
        let bucket = match self.cache.get_bucket(address, chain_id).await {
            Ok(bucket) => bucket,
            Err(e) => {
                warn!(address, chain_id, "Transaction cache read failed, treating as cold: {}", e);
                None
            }
        };

        if let Some(bucket) = &bucket {
            if self.cache.is_fresh(bucket) {
                debug!(address, chain_id, "Serving fresh transaction bucket");
                return Ok(SyncOutcome::from_bucket(bucket.clone(), SyncSource::Fresh));
            }
        }

        let previous_cursor = bucket.as_ref().map(|b| b.last_block);
        // A cursor at u64::MAX stays there instead of wrapping back to a full scan
        let start_block = previous_cursor.map_or(0, |b| b.saturating_add(1));

        let fetched = match self.fetch_history(address, start_block, provider).await {
            Ok(fetched) => fetched,
            Err(e) => {
                return match bucket {
                    Some(bucket) => {
                        warn!(
                            address,
                            chain_id,
                            last_block = bucket.last_block,
                            "Sync failed, serving stale transactions: {}",
                            e
                        );
                        Ok(SyncOutcome::from_bucket(bucket, SyncSource::Stale))
                    }
                    None => Err(e.into()),
                };
            }
        };

        let cursor = fetched.next_cursor(previous_cursor);
        let new_records = fetched.records.len();

        let outcome = match bucket {
            Some(bucket) if new_records == 0 => {
                let refreshed = if cursor > bucket.last_block {
                    Some(self.cache.append(address, chain_id, Vec::new(), cursor).await?)
                } else {
                    self.cache.touch(address, chain_id).await?
                };
                SyncOutcome::from_bucket(refreshed.unwrap_or(bucket), SyncSource::Unchanged)
            }
            Some(_) => {
                let merged = self
                    .cache
                    .append(address, chain_id, fetched.records, cursor)
                    .await?;
                SyncOutcome::from_bucket(merged, SyncSource::Incremental)
            }
            None => {
                let merged = self
                    .cache
                    .append(address, chain_id, fetched.records, cursor)
                    .await?;
                SyncOutcome::from_bucket(merged, SyncSource::Initial)
            }
        };

        info!(
            address,
            chain_id,
            new_records,
            total = outcome.transactions.len(),
            last_block = outcome.last_block,
            source = ?outcome.source,
            "Synced transactions"
        );
        Ok(outcome)
    }

    /// Fetch `[start_block, latest]`, following page cursors up to `max_pages`.
    ///
    /// A failed first page is an error. A failed follow-up page keeps what
    /// was already fetched and marks the history incomplete.
    async fn fetch_history(
        &self,
        address: &str,
        start_block: u64,
        provider: &dyn ChainProvider,
    ) -> std::result::Result<FetchedHistory, FetchError> {
        let resource_key = transactions_resource_key(provider.chain_id());
        let mut query = TransactionQuery::from_block(address, start_block);
        let mut history = FetchedHistory {
            records: Vec::new(),
            latest_block: None,
            complete: false,
        };

        for page_number in 0..self.max_pages {
            let page = match self
                .fetcher
                .fetch(&resource_key, || provider.get_transactions(&query))
                .await
            {
                Ok(page) => page,
                Err(e) if page_number == 0 => return Err(e),
                Err(e) => {
                    warn!(address, page_number, "Stopping pagination early: {}", e);
                    return Ok(history);
                }
            };

            history.records.extend(page.records);
            if let Some(latest) = page.latest_block {
                history.latest_block = Some(history.latest_block.map_or(latest, |b| b.max(latest)));
            }

            match page.next_cursor {
                Some(cursor) => query = query.with_cursor(cursor),
                None => {
                    history.complete = true;
                    return Ok(history);
                }
            }
        }

        debug!(address, max_pages = self.max_pages, "Page limit reached");
        Ok(history)
    }
}
