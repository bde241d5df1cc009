//! Scripted providers shared by the scenario tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::aggregator::DexPlatform;
use crate::blockchain::client::{ChainProvider, FetchError, TransactionPage, TransactionQuery};
use crate::blockchain::prices::PriceSource;
use crate::clock::ManualClock;
use crate::config::CacheConfig;
use crate::db::MemoryStore;
use crate::models::{ChainId, DexBalance, TokenBalance, TokenMetadata, TransactionRecord};
use crate::service::{WalletSync, WalletSyncBuilder};

pub const WALLET: &str = "0xabcdef0123456789abcdef0123456789abcdef01";
pub const START_MILLIS: i64 = 1_700_000_000_000;

pub fn tx(hash: &str, block: u64, index: u64) -> TransactionRecord {
    TransactionRecord::new(hash, block, index)
}

pub fn token_meta(symbol: &str, decimals: u8) -> TokenMetadata {
    TokenMetadata {
        name: format!("{} Token", symbol),
        symbol: symbol.to_string(),
        decimals,
        logo: None,
    }
}

#[derive(Debug, Clone)]
pub enum MetadataBehaviour {
    Ok(TokenMetadata),
    Err(FetchError),
    Delay(Duration, TokenMetadata),
}

pub struct MockProvider {
    chain_id: ChainId,
    pages: Mutex<VecDeque<Result<TransactionPage, FetchError>>>,
    page_delay: Mutex<Option<Duration>>,
    balance: Mutex<Result<String, FetchError>>,
    token_balances: Mutex<Result<Vec<TokenBalance>, FetchError>>,
    metadata: Mutex<HashMap<String, MetadataBehaviour>>,
    queries: Mutex<Vec<TransactionQuery>>,
    transaction_calls: AtomicUsize,
    metadata_calls: AtomicUsize,
}

impl MockProvider {
    pub fn new(chain_id: ChainId) -> Self {
        Self {
            chain_id,
            pages: Mutex::new(VecDeque::new()),
            page_delay: Mutex::new(None),
            balance: Mutex::new(Ok("0x0".to_string())),
            token_balances: Mutex::new(Ok(Vec::new())),
            metadata: Mutex::new(HashMap::new()),
            queries: Mutex::new(Vec::new()),
            transaction_calls: AtomicUsize::new(0),
            metadata_calls: AtomicUsize::new(0),
        }
    }

    /// Queue a page. Once the queue is empty, every query returns an empty page.
    pub fn push_page(&self, records: Vec<TransactionRecord>, next_cursor: Option<&str>) {
        self.pages.lock().unwrap().push_back(Ok(TransactionPage {
            records,
            next_cursor: next_cursor.map(str::to_string),
            latest_block: None,
        }));
    }

    pub fn push_error(&self, error: FetchError) {
        self.pages.lock().unwrap().push_back(Err(error));
    }

    pub fn set_page_delay(&self, delay: Duration) {
        *self.page_delay.lock().unwrap() = Some(delay);
    }

    pub fn set_balance(&self, balance: Result<String, FetchError>) {
        *self.balance.lock().unwrap() = balance;
    }

    pub fn set_token_balances(&self, balances: Result<Vec<(&str, &str)>, FetchError>) {
        *self.token_balances.lock().unwrap() = balances.map(|list| {
            list.into_iter()
                .map(|(contract, balance)| TokenBalance {
                    contract_address: contract.to_string(),
                    balance: balance.to_string(),
                })
                .collect()
        });
    }

    pub fn set_metadata(&self, contract: &str, behaviour: MetadataBehaviour) {
        self.metadata
            .lock()
            .unwrap()
            .insert(contract.to_lowercase(), behaviour);
    }

    pub fn transaction_calls(&self) -> usize {
        self.transaction_calls.load(Ordering::SeqCst)
    }

    pub fn metadata_calls(&self) -> usize {
        self.metadata_calls.load(Ordering::SeqCst)
    }

    pub fn queries(&self) -> Vec<TransactionQuery> {
        self.queries.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChainProvider for MockProvider {
    fn chain_id(&self) -> ChainId {
        self.chain_id
    }

    async fn get_balance(&self, _address: &str) -> Result<String, FetchError> {
        self.balance.lock().unwrap().clone()
    }

    async fn get_token_balances(&self, _address: &str) -> Result<Vec<TokenBalance>, FetchError> {
        self.token_balances.lock().unwrap().clone()
    }

    async fn get_token_metadata(&self, contract_address: &str) -> Result<TokenMetadata, FetchError> {
        self.metadata_calls.fetch_add(1, Ordering::SeqCst);
        let behaviour = self
            .metadata
            .lock()
            .unwrap()
            .get(&contract_address.to_lowercase())
            .cloned();

        match behaviour {
            Some(MetadataBehaviour::Ok(meta)) => Ok(meta),
            Some(MetadataBehaviour::Err(e)) => Err(e),
            Some(MetadataBehaviour::Delay(delay, meta)) => {
                tokio::time::sleep(delay).await;
                Ok(meta)
            }
            None => Err(FetchError::Rejected {
                status: 404,
                message: format!("unknown contract {}", contract_address),
            }),
        }
    }

    async fn get_transactions(&self, query: &TransactionQuery) -> Result<TransactionPage, FetchError> {
        self.transaction_calls.fetch_add(1, Ordering::SeqCst);
        self.queries.lock().unwrap().push(query.clone());

        let delay = *self.page_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let next = self.pages.lock().unwrap().pop_front();
        next.unwrap_or_else(|| Ok(TransactionPage::default()))
    }
}

#[derive(Default)]
pub struct MockPriceSource {
    prices: Mutex<HashMap<(ChainId, Option<String>), f64>>,
    fail: Mutex<bool>,
    calls: AtomicUsize,
}

impl MockPriceSource {
    pub fn set_price(&self, chain_id: ChainId, contract: Option<&str>, price: f64) {
        self.prices
            .lock()
            .unwrap()
            .insert((chain_id, contract.map(str::to_lowercase)), price);
    }

    pub fn set_failing(&self, fail: bool) {
        *self.fail.lock().unwrap() = fail;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PriceSource for MockPriceSource {
    async fn get_usd_prices(
        &self,
        chain_id: ChainId,
        assets: &[Option<String>],
    ) -> Result<HashMap<Option<String>, f64>, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if *self.fail.lock().unwrap() {
            return Err(FetchError::Rejected {
                status: 401,
                message: "no key".to_string(),
            });
        }

        let prices = self.prices.lock().unwrap();
        Ok(assets
            .iter()
            .filter_map(|asset| {
                prices
                    .get(&(chain_id, asset.clone()))
                    .map(|price| (asset.clone(), *price))
            })
            .collect())
    }
}

pub struct MockDex {
    pub name: String,
    pub balances: Vec<DexBalance>,
}

#[async_trait]
impl DexPlatform for MockDex {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get_balances(&self, _address: &str) -> Result<Vec<DexBalance>, FetchError> {
        Ok(self.balances.clone())
    }
}

/// Builder over an in-memory store, a manual clock and seeded jitter.
pub fn builder(store: Arc<MemoryStore>, clock: Arc<ManualClock>) -> WalletSyncBuilder {
    WalletSync::builder(store)
        .clock(clock)
        .rng(StdRng::seed_from_u64(42))
}

pub struct Harness {
    pub service: WalletSync,
    pub provider: Arc<MockProvider>,
    pub clock: Arc<ManualClock>,
    pub store: Arc<MemoryStore>,
}

/// One chain-1 provider wired into a fresh service.
pub fn harness() -> Harness {
    harness_with(CacheConfig::default())
}

pub fn harness_with(cache_config: CacheConfig) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let clock = Arc::new(ManualClock::new(START_MILLIS));
    let provider = Arc::new(MockProvider::new(1));

    let service = builder(store.clone(), clock.clone())
        .cache_config(cache_config)
        .provider(provider.clone())
        .build();

    Harness {
        service,
        provider,
        clock,
        store,
    }
}
