//! Built-in chain registry.

use crate::models::ChainId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainInfo {
    pub chain_id: ChainId,
    pub name: &'static str,
    pub native_symbol: &'static str,
    pub native_name: &'static str,
    pub native_decimals: u8,
    /// Platform slug used by the price API for token contracts.
    pub price_platform: &'static str,
    /// Price API id of the native asset.
    pub native_price_id: &'static str,
}

pub const CHAINS: &[ChainInfo] = &[
    ChainInfo {
        chain_id: 1,
        name: "Ethereum",
        native_symbol: "ETH",
        native_name: "Ether",
        native_decimals: 18,
        price_platform: "ethereum",
        native_price_id: "coingecko:ethereum",
    },
    ChainInfo {
        chain_id: 10,
        name: "Optimism",
        native_symbol: "ETH",
        native_name: "Ether",
        native_decimals: 18,
        price_platform: "optimism",
        native_price_id: "coingecko:ethereum",
    },
    ChainInfo {
        chain_id: 56,
        name: "BNB Smart Chain",
        native_symbol: "BNB",
        native_name: "BNB",
        native_decimals: 18,
        price_platform: "bsc",
        native_price_id: "coingecko:binancecoin",
    },
    ChainInfo {
        chain_id: 137,
        name: "Polygon",
        native_symbol: "POL",
        native_name: "Polygon Ecosystem Token",
        native_decimals: 18,
        price_platform: "polygon",
        native_price_id: "coingecko:polygon-ecosystem-token",
    },
    ChainInfo {
        chain_id: 8453,
        name: "Base",
        native_symbol: "ETH",
        native_name: "Ether",
        native_decimals: 18,
        price_platform: "base",
        native_price_id: "coingecko:ethereum",
    },
    ChainInfo {
        chain_id: 42161,
        name: "Arbitrum",
        native_symbol: "ETH",
        native_name: "Ether",
        native_decimals: 18,
        price_platform: "arbitrum",
        native_price_id: "coingecko:ethereum",
    },
    ChainInfo {
        chain_id: 43114,
        name: "Avalanche",
        native_symbol: "AVAX",
        native_name: "Avalanche",
        native_decimals: 18,
        price_platform: "avax",
        native_price_id: "coingecko:avalanche-2",
    },
];

/// Contract addresses that some indexers report for the native asset.
pub const NATIVE_PLACEHOLDER_ADDRESSES: &[&str] = &[
    "0xeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeee",
    "0x0000000000000000000000000000000000000000",
    "0x0000000000000000000000000000000000001010",
];

pub fn chain_info(chain_id: ChainId) -> Option<&'static ChainInfo> {
    CHAINS.iter().find(|c| c.chain_id == chain_id)
}

pub fn is_native_placeholder(contract_address: &str) -> bool {
    let address = contract_address.trim().to_ascii_lowercase();
    NATIVE_PLACEHOLDER_ADDRESSES.contains(&address.as_str())
}

/// Symbol used to compare tokens across bridges: uppercase, trimmed, and
/// without a ".E" / ".B" bridge suffix.
pub fn canonical_symbol(symbol: &str) -> String {
    let upper = symbol.trim().to_uppercase();
    for suffix in [".E", ".B"] {
        if let Some(stripped) = upper.strip_suffix(suffix) {
            return stripped.to_string();
        }
    }
    upper
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_known_and_unknown_chains() {
        assert_eq!(chain_info(137).map(|c| c.native_symbol), Some("POL"));
        assert_eq!(chain_info(43114).map(|c| c.name), Some("Avalanche"));
        assert!(chain_info(999_999).is_none());
    }

    #[test]
    fn canonical_symbols() {
        assert_eq!(canonical_symbol(" weth.e "), "WETH");
        assert_eq!(canonical_symbol("USDC.b"), "USDC");
        assert_eq!(canonical_symbol("eth"), "ETH");
        assert_eq!(canonical_symbol("E"), "E");
    }

    #[test]
    fn placeholder_addresses() {
        assert!(is_native_placeholder("0xEeeeeEeeeEeEeeEeEeEeeEEEeeeeEeeeeeeeEEeE"));
        assert!(is_native_placeholder("0x0000000000000000000000000000000000001010"));
        assert!(!is_native_placeholder("0xa0b86991c6218b36c1d19d4a2e9eb0ce3606eb48"));
    }
}
