// Configuration for the sync core:
// - Database connection string
// - Per-chain RPC and explorer endpoints
// - Cache limits and freshness window
// - Circuit breaker and retry policy
// - Background polling interval and watched addresses

use dotenv::dotenv;
use std::collections::HashMap;
use std::env;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use crate::blockchain::circuit_breaker::BreakerConfig;
use crate::blockchain::retry::RetryConfig;
use crate::models::ChainId;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },

    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    #[error("No RPC endpoint configured for active chain {0}")]
    MissingEndpoint(ChainId),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChainEndpoint {
    pub rpc_url: String,
    pub explorer_url: Option<String>,
    pub explorer_api_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CacheConfig {
    pub max_transactions_per_bucket: usize,
    pub freshness_window: Duration,
    pub metadata_capacity_per_chain: usize,
    pub price_ttl: Duration,
    pub price_capacity: u64,
    pub max_pages_per_sync: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_transactions_per_bucket: 5_000,
            freshness_window: Duration::from_secs(5 * 60),
            metadata_capacity_per_chain: 2_000,
            price_ttl: Duration::from_secs(60),
            price_capacity: 10_000,
            max_pages_per_sync: 10,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub active_chains: Vec<ChainId>,
    pub watch_addresses: Vec<String>,
    pub chain_endpoints: HashMap<ChainId, ChainEndpoint>,
    pub cache: CacheConfig,
    pub breaker: BreakerConfig,
    pub retry: RetryConfig,
    pub rpc_timeout_secs: u64,
    pub rpc_rate_limit: Option<u32>,
    pub polling_interval_secs: u64,
    pub price_api_url: String,
    pub include_zero_native: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: "sqlite://wallet_sync.db".to_string(),
            active_chains: vec![1],
            watch_addresses: Vec::new(),
            chain_endpoints: HashMap::new(),
            cache: CacheConfig::default(),
            breaker: BreakerConfig::default(),
            retry: RetryConfig::default(),
            rpc_timeout_secs: 15,
            rpc_rate_limit: None,
            polling_interval_secs: 60,
            price_api_url: "https://coins.llama.fi".to_string(),
            include_zero_native: false,
        }
    }
}

fn parse_var<T: FromStr>(key: &str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(value) => value.trim().parse().map_err(|_| ConfigError::InvalidValue {
            key: key.to_string(),
            value,
        }),
        Err(_) => Ok(default),
    }
}

fn parse_secs(key: &str, default: Duration) -> Result<Duration, ConfigError> {
    parse_var(key, default.as_secs()).map(Duration::from_secs)
}

fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv().ok();

        let defaults = Config::default();

        let database_url = env::var("DATABASE_URL").unwrap_or(defaults.database_url);

        let active_chains = match env::var("ACTIVE_CHAINS") {
            Ok(raw) => parse_list(&raw)
                .into_iter()
                .map(|id| {
                    id.parse::<ChainId>().map_err(|_| ConfigError::InvalidValue {
                        key: "ACTIVE_CHAINS".to_string(),
                        value: id,
                    })
                })
                .collect::<Result<Vec<_>, _>>()?,
            Err(_) => defaults.active_chains,
        };

        let watch_addresses = env::var("WATCH_ADDRESSES")
            .map(|raw| parse_list(&raw))
            .unwrap_or_default();

        let explorer_api_key = env::var("EXPLORER_API_KEY").ok();
        let mut chain_endpoints = HashMap::new();
        for chain_id in &active_chains {
            if let Ok(rpc_url) = env::var(format!("RPC_URL_{}", chain_id)) {
                chain_endpoints.insert(
                    *chain_id,
                    ChainEndpoint {
                        rpc_url,
                        explorer_url: env::var(format!("EXPLORER_URL_{}", chain_id)).ok(),
                        explorer_api_key: explorer_api_key.clone(),
                    },
                );
            }
        }

        let cache = CacheConfig {
            max_transactions_per_bucket: parse_var(
                "MAX_TRANSACTIONS_PER_BUCKET",
                defaults.cache.max_transactions_per_bucket,
            )?,
            freshness_window: parse_secs("FRESHNESS_WINDOW_SECS", defaults.cache.freshness_window)?,
            metadata_capacity_per_chain: parse_var(
                "METADATA_CAPACITY_PER_CHAIN",
                defaults.cache.metadata_capacity_per_chain,
            )?,
            price_ttl: parse_secs("PRICE_CACHE_TTL_SECS", defaults.cache.price_ttl)?,
            price_capacity: defaults.cache.price_capacity,
            max_pages_per_sync: parse_var("MAX_PAGES_PER_SYNC", defaults.cache.max_pages_per_sync)?,
        };

        let breaker = BreakerConfig {
            failure_threshold: parse_var(
                "BREAKER_FAILURE_THRESHOLD",
                defaults.breaker.failure_threshold,
            )?,
            reset_timeout: parse_secs("BREAKER_RESET_SECS", defaults.breaker.reset_timeout)?,
            unavailable_threshold: parse_var(
                "BREAKER_UNAVAILABLE_THRESHOLD",
                defaults.breaker.unavailable_threshold,
            )?,
            unavailable_reset_timeout: parse_secs(
                "BREAKER_UNAVAILABLE_RESET_SECS",
                defaults.breaker.unavailable_reset_timeout,
            )?,
        };

        let rpc_timeout_secs = parse_var("RPC_TIMEOUT_SECS", defaults.rpc_timeout_secs)?;

        let retry = RetryConfig {
            max_attempts: parse_var("RETRY_MAX_ATTEMPTS", defaults.retry.max_attempts)?,
            attempt_timeout: Duration::from_secs(rpc_timeout_secs),
            batch_timeout: parse_secs("METADATA_BATCH_TIMEOUT_SECS", defaults.retry.batch_timeout)?,
        };

        let rpc_rate_limit = match env::var("RPC_RATE_LIMIT") {
            Ok(v) => Some(v.trim().parse().map_err(|_| ConfigError::InvalidValue {
                key: "RPC_RATE_LIMIT".to_string(),
                value: v,
            })?),
            Err(_) => None,
        };

        let polling_interval_secs =
            parse_var("POLLING_INTERVAL_SECS", defaults.polling_interval_secs)?;
        let price_api_url = env::var("PRICE_API_URL").unwrap_or(defaults.price_api_url);
        let include_zero_native = parse_var("INCLUDE_ZERO_NATIVE", defaults.include_zero_native)?;

        Ok(Self {
            database_url,
            active_chains,
            watch_addresses,
            chain_endpoints,
            cache,
            breaker,
            retry,
            rpc_timeout_secs,
            rpc_rate_limit,
            polling_interval_secs,
            price_api_url,
            include_zero_native,
        })
    }

    /// Reject settings that would make the caches or the retry loop degenerate.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cache.max_transactions_per_bucket == 0 {
            return Err(ConfigError::Zero("MAX_TRANSACTIONS_PER_BUCKET"));
        }
        if self.cache.metadata_capacity_per_chain == 0 {
            return Err(ConfigError::Zero("METADATA_CAPACITY_PER_CHAIN"));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Zero("RETRY_MAX_ATTEMPTS"));
        }
        if self.polling_interval_secs == 0 {
            return Err(ConfigError::Zero("POLLING_INTERVAL_SECS"));
        }
        if self.rpc_rate_limit == Some(0) {
            return Err(ConfigError::Zero("RPC_RATE_LIMIT"));
        }
        for chain_id in &self.active_chains {
            if !self.chain_endpoints.contains_key(chain_id) {
                return Err(ConfigError::MissingEndpoint(*chain_id));
            }
        }
        Ok(())
    }

    pub fn polling_interval(&self) -> Duration {
        Duration::from_secs(self.polling_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_constants() {
        let config = Config::default();
        assert_eq!(config.cache.max_transactions_per_bucket, 5_000);
        assert_eq!(config.cache.freshness_window, Duration::from_secs(300));
        assert_eq!(config.cache.metadata_capacity_per_chain, 2_000);
        assert_eq!(config.cache.price_ttl, Duration::from_secs(60));
        assert_eq!(config.breaker.failure_threshold, 8);
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.batch_timeout, Duration::from_secs(8));
    }

    #[test]
    fn list_parsing_skips_blanks() {
        assert_eq!(parse_list(" 1, ,137 ,"), vec!["1", "137"]);
    }

    #[test]
    fn validate_requires_endpoint_for_active_chain() {
        let mut config = Config::default();
        assert_eq!(config.validate(), Err(ConfigError::MissingEndpoint(1)));

        config.chain_endpoints.insert(
            1,
            ChainEndpoint {
                rpc_url: "http://localhost:8545".to_string(),
                explorer_url: None,
                explorer_api_key: None,
            },
        );
        assert!(config.validate().is_ok());

        config.retry.max_attempts = 0;
        assert_eq!(
            config.validate(),
            Err(ConfigError::Zero("RETRY_MAX_ATTEMPTS"))
        );
    }
}
