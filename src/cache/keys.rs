//! Cache key generation and management

use std::fmt;

use crate::models::ChainId;

/// Store key of the token metadata document.
pub const METADATA_STORE_KEY: &str = "token_metadata_cache";
/// Store key of the transaction history document.
pub const TRANSACTION_STORE_KEY: &str = "transaction_cache";

/// A structured cache key that can be converted to a string
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    /// History bucket of one wallet on one chain
    TransactionBucket { address: String, chain_id: ChainId },
    /// USD price of a token; `None` is the chain's native asset
    Price {
        chain_id: ChainId,
        contract_address: Option<String>,
    },
}

/// Lowercase hex addresses; base58 addresses are case sensitive and left alone.
pub fn normalize_address(address: &str) -> String {
    let address = address.trim();
    if address.starts_with("0x") || address.starts_with("0X") {
        address.to_ascii_lowercase()
    } else {
        address.to_string()
    }
}

impl CacheKey {
    pub fn transaction_bucket(address: &str, chain_id: ChainId) -> Self {
        Self::TransactionBucket {
            address: normalize_address(address),
            chain_id,
        }
    }

    pub fn price(chain_id: ChainId, contract_address: Option<&str>) -> Self {
        Self::Price {
            chain_id,
            contract_address: contract_address.map(normalize_address),
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TransactionBucket { address, chain_id } => {
                write!(f, "tx:{}:{}", address, chain_id)
            }
            Self::Price {
                chain_id,
                contract_address,
            } => write!(
                f,
                "price:{}:{}",
                chain_id,
                contract_address.as_deref().unwrap_or("native")
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_normalize_hex_addresses() {
        let a = CacheKey::transaction_bucket("0xABCdef", 1);
        let b = CacheKey::transaction_bucket("0xabcDEF", 1);
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "tx:0xabcdef:1");
    }

    #[test]
    fn base58_addresses_keep_case() {
        let key = CacheKey::transaction_bucket("9ii1FEiWSgDzXAbwj2oTmJXzkfCw78mnHwPQv9WQ5iTn", 0);
        assert_eq!(key.to_string(), "tx:9ii1FEiWSgDzXAbwj2oTmJXzkfCw78mnHwPQv9WQ5iTn:0");
    }

    #[test]
    fn price_key_display() {
        assert_eq!(CacheKey::price(137, None).to_string(), "price:137:native");
        assert_eq!(
            CacheKey::price(1, Some("0xA0b8")).to_string(),
            "price:1:0xa0b8"
        );
    }
}
