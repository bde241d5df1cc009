pub mod keys;
pub mod metadata;
pub mod price;
pub mod transaction;

use std::sync::Arc;

pub use keys::CacheKey;
pub use metadata::{MetadataCache, MetadataStats};
pub use price::PriceCache;
pub use transaction::{TransactionCache, TransactionStats};

use crate::clock::Clock;
use crate::config::CacheConfig;
use crate::db::{PersistentStore, StoreError};

/// All caches sharing one persistent store and one clock.
#[derive(Clone)]
pub struct AppCache {
    pub metadata_cache: Arc<MetadataCache>,
    pub transaction_cache: Arc<TransactionCache>,
    pub price_cache: PriceCache,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CacheStats {
    pub metadata: MetadataStats,
    pub transactions: TransactionStats,
    pub cached_prices: u64,
}

impl AppCache {
    pub fn new(store: Arc<dyn PersistentStore>, clock: Arc<dyn Clock>, config: &CacheConfig) -> Self {
        Self {
            metadata_cache: Arc::new(MetadataCache::new(
                store.clone(),
                clock.clone(),
                config.metadata_capacity_per_chain,
            )),
            transaction_cache: Arc::new(TransactionCache::new(store, clock, config)),
            price_cache: PriceCache::new(config.price_capacity, config.price_ttl),
        }
    }

    pub async fn stats(&self) -> Result<CacheStats, StoreError> {
        Ok(CacheStats {
            metadata: self.metadata_cache.stats().await?,
            transactions: self.transaction_cache.stats().await?,
            cached_prices: self.price_cache.entry_count().await,
        })
    }
}
