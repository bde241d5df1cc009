//! Unified token view across chains and DEX platforms.

use std::collections::HashMap;
use std::sync::Arc;

use alloy_primitives::U256;
use async_trait::async_trait;
use futures::future::join_all;
use tracing::{debug, info, warn};

use crate::blockchain::chains::{canonical_symbol, chain_info, is_native_placeholder, ChainInfo};
use crate::blockchain::client::{ChainProvider, FetchError, ProviderRegistry};
use crate::blockchain::prices::PriceSource;
use crate::blockchain::retry::{balances_resource_key, prices_resource_key, RetryingFetcher};
use crate::cache::{MetadataCache, PriceCache};
use crate::error::{Error, Result};
use crate::models::{ChainId, DexBalance, TokenBalance, TokenMetadata, UnifiedToken};

/// Balances held on an exchange account rather than a chain address.
#[async_trait]
pub trait DexPlatform: Send + Sync {
    /// Display name, used in place of a chain name.
    fn name(&self) -> &str;

    async fn get_balances(&self, address: &str) -> std::result::Result<Vec<DexBalance>, FetchError>;
}

/// Parse a raw integer amount, decimal or `0x` hex.
pub fn parse_raw_amount(raw: &str) -> Option<U256> {
    let raw = raw.trim();
    match raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
        Some("") => Some(U256::ZERO),
        Some(hex) => U256::from_str_radix(hex, 16).ok(),
        None => U256::from_str_radix(raw, 10).ok(),
    }
}

/// Format token units to a human-readable decimal string.
pub fn format_amount(amount: U256, decimals: u8) -> String {
    if amount.is_zero() {
        return "0".to_string();
    }

    let divisor = U256::from(10u64).pow(U256::from(decimals));
    let whole = amount / divisor;
    let remainder = amount % divisor;

    if remainder.is_zero() {
        whole.to_string()
    } else {
        let decimal_str = format!("{:0>width$}", remainder.to_string(), width = decimals as usize);
        let trimmed = decimal_str.trim_end_matches('0');
        if trimmed.is_empty() {
            whole.to_string()
        } else {
            format!("{}.{}", whole, trimmed)
        }
    }
}

/// Highest USD value first; ties by chain name, then symbol.
pub fn sort_tokens(tokens: &mut [UnifiedToken]) {
    tokens.sort_by(|a, b| {
        b.usd_value
            .unwrap_or(0.0)
            .total_cmp(&a.usd_value.unwrap_or(0.0))
            .then_with(|| a.chain.cmp(&b.chain))
            .then_with(|| a.symbol.cmp(&b.symbol))
    });
}

fn usd_value(balance_formatted: &str, usd_price: Option<f64>) -> Option<f64> {
    let balance: f64 = balance_formatted.parse().unwrap_or(0.0);
    Some(usd_price.map_or(0.0, |price| balance * price))
}

pub struct Aggregator {
    metadata_cache: Arc<MetadataCache>,
    price_cache: PriceCache,
    fetcher: Arc<RetryingFetcher>,
    providers: ProviderRegistry,
    price_source: Option<Arc<dyn PriceSource>>,
    dex_platforms: Vec<Arc<dyn DexPlatform>>,
    include_zero_native: bool,
}

impl Aggregator {
    pub fn new(
        metadata_cache: Arc<MetadataCache>,
        price_cache: PriceCache,
        fetcher: Arc<RetryingFetcher>,
        providers: ProviderRegistry,
    ) -> Self {
        Self {
            metadata_cache,
            price_cache,
            fetcher,
            providers,
            price_source: None,
            dex_platforms: Vec::new(),
            include_zero_native: false,
        }
    }

    pub fn with_price_source(mut self, source: Arc<dyn PriceSource>) -> Self {
        self.price_source = Some(source);
        self
    }

    pub fn with_dex_platform(mut self, platform: Arc<dyn DexPlatform>) -> Self {
        self.dex_platforms.push(platform);
        self
    }

    pub fn include_zero_native(mut self, include: bool) -> Self {
        self.include_zero_native = include;
        self
    }

    /// Every non-zero holding of `wallet` on `chains` plus DEX platforms,
    /// sorted by USD value. A chain or platform that fails is left out.
    pub async fn get_unified_tokens(&self, wallet: &str, chains: &[ChainId]) -> Vec<UnifiedToken> {
        let chain_tasks = chains.iter().map(|chain_id| async move {
            match self.chain_tokens(wallet, *chain_id).await {
                Ok(tokens) => tokens,
                Err(e) => {
                    warn!(chain_id, "Skipping chain in token view: {}", e);
                    Vec::new()
                }
            }
        });
        let dex_tasks = self.dex_platforms.iter().map(|platform| async move {
            match self.dex_tokens(wallet, platform.as_ref()).await {
                Ok(tokens) => tokens,
                Err(e) => {
                    warn!(platform = platform.name(), "Skipping DEX platform in token view: {}", e);
                    Vec::new()
                }
            }
        });

        let (chain_results, dex_results) = tokio::join!(join_all(chain_tasks), join_all(dex_tasks));

        let mut tokens: Vec<UnifiedToken> = chain_results
            .into_iter()
            .chain(dex_results)
            .flatten()
            .collect();
        sort_tokens(&mut tokens);

        info!(
            wallet,
            chains = chains.len(),
            tokens = tokens.len(),
            "Built unified token view"
        );
        tokens
    }

    async fn chain_tokens(&self, wallet: &str, chain_id: ChainId) -> Result<Vec<UnifiedToken>> {
        let info = chain_info(chain_id).ok_or(Error::UnknownChain(chain_id))?;
        let provider = self
            .providers
            .get(chain_id)
            .ok_or(Error::MissingProvider(chain_id))?;
        let provider = provider.as_ref();

        let balances_key = balances_resource_key(chain_id);
        let (native, token_balances) = tokio::join!(
            self.fetcher.fetch(&balances_key, || provider.get_balance(wallet)),
            self.fetcher.fetch(&balances_key, || provider.get_token_balances(wallet)),
        );

        let (native, token_balances) = match (native, token_balances) {
            (Err(e), Err(_)) => return Err(e.into()),
            (native, tokens) => {
                let native = native
                    .inspect_err(|e| warn!(chain_id, "Native balance unavailable: {}", e))
                    .ok();
                let tokens = tokens
                    .inspect_err(|e| warn!(chain_id, "Token balances unavailable: {}", e))
                    .unwrap_or_default();
                (native, tokens)
            }
        };

        let native_amount = native.as_deref().and_then(parse_raw_amount);
        let include_native = match native_amount {
            Some(amount) => !amount.is_zero() || self.include_zero_native,
            None => false,
        };

        let held: Vec<(TokenBalance, U256)> = token_balances
            .into_iter()
            .filter_map(|b| {
                let amount = parse_raw_amount(&b.balance)?;
                (!amount.is_zero()).then_some((b, amount))
            })
            .collect();

        let contracts: Vec<String> = held
            .iter()
            .map(|(b, _)| b.contract_address.to_lowercase())
            .collect();
        let metadata = self.token_metadata(chain_id, &contracts, provider).await;

        let mut assets: Vec<Option<String>> = vec![None];
        assets.extend(contracts.iter().cloned().map(Some));
        let prices = self.usd_prices(chain_id, &assets).await;

        let mut tokens = Vec::with_capacity(held.len() + 1);
        if include_native {
            let amount = native_amount.unwrap_or(U256::ZERO);
            let raw = native.clone().unwrap_or_else(|| "0x0".to_string());
            tokens.push(native_token(info, raw, amount, prices.get(&None).copied()));
        }
        let native_symbol = canonical_symbol(info.native_symbol);

        for (balance, amount) in held {
            let contract = balance.contract_address.to_lowercase();
            let meta = metadata
                .get(&contract)
                .cloned()
                .unwrap_or_else(TokenMetadata::unknown);

            if include_native
                && (is_native_placeholder(&contract) || canonical_symbol(&meta.symbol) == native_symbol)
            {
                debug!(chain_id, contract = %contract, symbol = %meta.symbol, "Dropping duplicate of native token");
                continue;
            }

            let balance_formatted = format_amount(amount, meta.decimals);
            let usd_price = prices.get(&Some(contract.clone())).copied();
            tokens.push(UnifiedToken {
                chain: info.name.to_string(),
                chain_id: Some(chain_id),
                contract_address: Some(contract),
                symbol: meta.symbol,
                name: meta.name,
                decimals: meta.decimals,
                balance_raw: balance.balance,
                usd_value: usd_value(&balance_formatted, usd_price),
                balance_formatted,
                usd_price,
                is_native: false,
            });
        }

        Ok(tokens)
    }

    async fn token_metadata(
        &self,
        chain_id: ChainId,
        contracts: &[String],
        provider: &dyn ChainProvider,
    ) -> HashMap<String, TokenMetadata> {
        if contracts.is_empty() {
            return HashMap::new();
        }
        match self
            .metadata_cache
            .get_or_fetch(chain_id, contracts, &self.fetcher, provider)
            .await
        {
            Ok(metadata) => metadata,
            Err(e) => {
                warn!(chain_id, "Metadata cache unavailable: {}", e);
                HashMap::new()
            }
        }
    }

    /// Best effort: cached prices first, then one source lookup for the rest.
    async fn usd_prices(&self, chain_id: ChainId, assets: &[Option<String>]) -> HashMap<Option<String>, f64> {
        let mut prices = self.price_cache.get_many(chain_id, assets).await;

        let Some(source) = &self.price_source else {
            return prices;
        };
        let missing: Vec<Option<String>> = assets
            .iter()
            .filter(|a| !prices.contains_key(*a))
            .cloned()
            .collect();
        if missing.is_empty() {
            return prices;
        }

        let resource_key = prices_resource_key(chain_id);
        match self
            .fetcher
            .fetch(&resource_key, || source.get_usd_prices(chain_id, &missing))
            .await
        {
            Ok(fetched) => {
                for (asset, price) in fetched {
                    self.price_cache.insert(chain_id, asset.as_deref(), price).await;
                    prices.insert(asset, price);
                }
            }
            Err(e) => warn!(chain_id, "USD prices unavailable: {}", e),
        }
        prices
    }

    async fn dex_tokens(&self, wallet: &str, platform: &dyn DexPlatform) -> Result<Vec<UnifiedToken>> {
        let resource_key = format!("dex:{}", platform.name());
        let balances = self
            .fetcher
            .fetch(&resource_key, || platform.get_balances(wallet))
            .await?;

        Ok(balances
            .into_iter()
            .filter_map(|b| {
                let amount = parse_raw_amount(&b.balance_raw)?;
                if amount.is_zero() {
                    return None;
                }
                let balance_formatted = format_amount(amount, b.decimals);
                Some(UnifiedToken {
                    chain: platform.name().to_string(),
                    chain_id: None,
                    contract_address: b.contract_address.map(|c| c.to_lowercase()),
                    symbol: b.symbol,
                    name: b.name,
                    decimals: b.decimals,
                    balance_raw: b.balance_raw,
                    usd_value: usd_value(&balance_formatted, b.usd_price),
                    balance_formatted,
                    usd_price: b.usd_price,
                    is_native: false,
                })
            })
            .collect())
    }
}

fn native_token(info: &ChainInfo, balance_raw: String, amount: U256, usd_price: Option<f64>) -> UnifiedToken {
    let balance_formatted = format_amount(amount, info.native_decimals);
    UnifiedToken {
        chain: info.name.to_string(),
        chain_id: Some(info.chain_id),
        contract_address: None,
        symbol: info.native_symbol.to_string(),
        name: info.native_name.to_string(),
        decimals: info.native_decimals,
        balance_raw,
        usd_value: usd_value(&balance_formatted, usd_price),
        balance_formatted,
        usd_price,
        is_native: true,
    }
}
