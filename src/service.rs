//! Consumer-facing entry point tying caches, providers and sync together.

use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use tracing::{info, warn};

use crate::aggregator::{Aggregator, DexPlatform};
use crate::blockchain::chains::chain_info;
use crate::blockchain::circuit_breaker::{BreakerConfig, CircuitBreaker};
use crate::blockchain::client::{ChainProvider, ProviderRegistry};
use crate::blockchain::evm::EvmHttpProvider;
use crate::blockchain::polling::{SyncScheduler, SyncTarget};
use crate::blockchain::prices::{LlamaPriceSource, PriceSource};
use crate::blockchain::retry::{RetryConfig, RetryingFetcher};
use crate::blockchain::sync::{SmartSync, SyncOutcome};
use crate::cache::{AppCache, CacheStats};
use crate::clock::{Clock, SystemClock};
use crate::config::{CacheConfig, Config};
use crate::db::{PersistentStore, SqliteStore};
use crate::error::{Error, Result};
use crate::models::{ChainId, UnifiedToken};
use crate::validation::normalize_wallet_address;

pub struct WalletSyncBuilder {
    store: Arc<dyn PersistentStore>,
    clock: Arc<dyn Clock>,
    cache_config: CacheConfig,
    breaker_config: BreakerConfig,
    retry_config: RetryConfig,
    rng: Option<StdRng>,
    providers: ProviderRegistry,
    price_source: Option<Arc<dyn PriceSource>>,
    dex_platforms: Vec<Arc<dyn DexPlatform>>,
    include_zero_native: bool,
}

impl WalletSyncBuilder {
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn cache_config(mut self, config: CacheConfig) -> Self {
        self.cache_config = config;
        self
    }

    pub fn breaker_config(mut self, config: BreakerConfig) -> Self {
        self.breaker_config = config;
        self
    }

    pub fn retry_config(mut self, config: RetryConfig) -> Self {
        self.retry_config = config;
        self
    }

    /// Seed the jitter source, for reproducible backoff.
    pub fn rng(mut self, rng: StdRng) -> Self {
        self.rng = Some(rng);
        self
    }

    pub fn provider(mut self, provider: Arc<dyn ChainProvider>) -> Self {
        self.providers.register(provider);
        self
    }

    pub fn price_source(mut self, source: Arc<dyn PriceSource>) -> Self {
        self.price_source = Some(source);
        self
    }

    pub fn dex_platform(mut self, platform: Arc<dyn DexPlatform>) -> Self {
        self.dex_platforms.push(platform);
        self
    }

    pub fn include_zero_native(mut self, include: bool) -> Self {
        self.include_zero_native = include;
        self
    }

    pub fn build(self) -> WalletSync {
        if self.providers.is_empty() {
            warn!("No chain providers registered, every chain lookup will fail");
        }
        let cache = AppCache::new(self.store, self.clock.clone(), &self.cache_config);
        let breaker = Arc::new(CircuitBreaker::new(self.breaker_config, self.clock));
        let fetcher = Arc::new(match self.rng {
            Some(rng) => RetryingFetcher::with_rng(breaker.clone(), self.retry_config, rng),
            None => RetryingFetcher::new(breaker.clone(), self.retry_config),
        });

        let sync = Arc::new(SmartSync::new(
            cache.transaction_cache.clone(),
            fetcher.clone(),
            self.cache_config.max_pages_per_sync,
        ));

        let mut aggregator = Aggregator::new(
            cache.metadata_cache.clone(),
            cache.price_cache.clone(),
            fetcher.clone(),
            self.providers.clone(),
        )
        .include_zero_native(self.include_zero_native);
        if let Some(source) = self.price_source {
            aggregator = aggregator.with_price_source(source);
        }
        for platform in self.dex_platforms {
            aggregator = aggregator.with_dex_platform(platform);
        }

        WalletSync {
            cache,
            breaker,
            providers: self.providers,
            sync,
            aggregator,
        }
    }
}

pub struct WalletSync {
    cache: AppCache,
    breaker: Arc<CircuitBreaker>,
    providers: ProviderRegistry,
    sync: Arc<SmartSync>,
    aggregator: Aggregator,
}

impl WalletSync {
    pub fn builder(store: Arc<dyn PersistentStore>) -> WalletSyncBuilder {
        WalletSyncBuilder {
            store,
            clock: Arc::new(SystemClock),
            cache_config: CacheConfig::default(),
            breaker_config: BreakerConfig::default(),
            retry_config: RetryConfig::default(),
            rng: None,
            providers: ProviderRegistry::new(),
            price_source: None,
            dex_platforms: Vec::new(),
            include_zero_native: false,
        }
    }

    /// SQLite store, one HTTP provider per configured chain and the public price API.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let store = SqliteStore::connect(&config.database_url).await?;
        let timeout = Duration::from_secs(config.rpc_timeout_secs);

        let mut builder = WalletSync::builder(Arc::new(store))
            .cache_config(config.cache.clone())
            .breaker_config(config.breaker.clone())
            .retry_config(config.retry.clone())
            .include_zero_native(config.include_zero_native)
            .price_source(Arc::new(LlamaPriceSource::new(&config.price_api_url, timeout)?));

        for chain_id in &config.active_chains {
            let endpoint = config
                .chain_endpoints
                .get(chain_id)
                .ok_or(Error::MissingProvider(*chain_id))?;
            let provider = EvmHttpProvider::new(*chain_id, endpoint, timeout, config.rpc_rate_limit)?;
            builder = builder.provider(Arc::new(provider));
        }

        info!(chains = ?config.active_chains, "Wallet sync initialized");
        Ok(builder.build())
    }

    fn provider(&self, chain_id: ChainId) -> Result<Arc<dyn ChainProvider>> {
        if chain_info(chain_id).is_none() {
            return Err(Error::UnknownChain(chain_id));
        }
        self.providers
            .get(chain_id)
            .ok_or(Error::MissingProvider(chain_id))
    }

    /// Transaction history of `address` on `chain_id`, from cache while fresh.
    pub async fn get_cached_or_fresh_transactions(
        &self,
        address: &str,
        chain_id: ChainId,
    ) -> Result<SyncOutcome> {
        let address = normalize_wallet_address(address)?;
        let provider = self.provider(chain_id)?;
        self.sync.sync(&address, provider.as_ref()).await
    }

    pub async fn get_unified_tokens(
        &self,
        address: &str,
        chains: &[ChainId],
    ) -> Result<Vec<UnifiedToken>> {
        let address = normalize_wallet_address(address)?;
        if let Some(unknown) = chains.iter().find(|id| chain_info(**id).is_none()) {
            return Err(Error::UnknownChain(*unknown));
        }
        Ok(self.aggregator.get_unified_tokens(&address, chains).await)
    }

    /// Drop cached history for one chain, or all chains, of `address`.
    pub async fn invalidate(&self, address: &str, chain_id: Option<ChainId>) -> Result<usize> {
        let address = normalize_wallet_address(address)?;
        Ok(self.cache.transaction_cache.invalidate(&address, chain_id).await?)
    }

    pub async fn cache_stats(&self) -> Result<CacheStats> {
        Ok(self.cache.stats().await?)
    }

    pub fn cache(&self) -> &AppCache {
        &self.cache
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    /// Background scheduler keeping every (address, chain) pair of `addresses` warm.
    pub fn scheduler(&self, addresses: &[String], interval: Duration) -> SyncScheduler {
        let targets = addresses
            .iter()
            .flat_map(|address| {
                self.providers.chain_ids().into_iter().map(move |chain_id| SyncTarget {
                    address: address.clone(),
                    chain_id,
                })
            })
            .collect();

        SyncScheduler::new(self.sync.clone(), self.providers.clone(), targets, interval)
    }
}
