//! Short-lived USD price cache using Moka

use std::collections::HashMap;
use std::time::Duration;

use moka::future::Cache;
use tracing::debug;

use super::keys::CacheKey;
use crate::models::ChainId;

/// USD prices keyed by (chain, contract). Entries expire after the TTL.
#[derive(Clone)]
pub struct PriceCache {
    cache: Cache<CacheKey, f64>,
}

impl PriceCache {
    pub fn new(capacity: u64, ttl: Duration) -> Self {
        let cache = Cache::builder()
            .max_capacity(capacity)
            .time_to_live(ttl)
            .build();

        Self { cache }
    }

    /// `contract_address: None` is the chain's native asset.
    pub async fn get(&self, chain_id: ChainId, contract_address: Option<&str>) -> Option<f64> {
        let key = CacheKey::price(chain_id, contract_address);
        let result = self.cache.get(&key).await;
        if result.is_none() {
            debug!("Cache miss for key: {}", key);
        }
        result
    }

    pub async fn insert(&self, chain_id: ChainId, contract_address: Option<&str>, price: f64) {
        self.cache
            .insert(CacheKey::price(chain_id, contract_address), price)
            .await;
    }

    /// Cached prices for the given contracts. Uncached ones are absent.
    pub async fn get_many(
        &self,
        chain_id: ChainId,
        contract_addresses: &[Option<String>],
    ) -> HashMap<Option<String>, f64> {
        let mut prices = HashMap::new();
        for address in contract_addresses {
            if let Some(price) = self.get(chain_id, address.as_deref()).await {
                prices.insert(address.clone(), price);
            }
        }
        prices
    }

    /// Live entries, after pending inserts and expirations are applied.
    pub async fn entry_count(&self) -> u64 {
        self.cache.run_pending_tasks().await;
        self.cache.entry_count()
    }
}
