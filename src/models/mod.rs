// Cache entities and the unified token output.
// Field names serialize in camelCase; that is the document schema kept in
// the persistent store.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub type ChainId = u64;

/// Token metadata as reported by a provider. Immutable in practice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenMetadata {
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logo: Option<String>,
}

impl TokenMetadata {
    pub const UNKNOWN_NAME: &'static str = "Unknown Token";
    pub const UNKNOWN_SYMBOL: &'static str = "UNKNOWN";

    /// Placeholder used when a metadata lookup fails or times out.
    pub fn unknown() -> Self {
        Self {
            name: Self::UNKNOWN_NAME.to_string(),
            symbol: Self::UNKNOWN_SYMBOL.to_string(),
            decimals: 18,
            logo: None,
        }
    }

    pub fn is_unknown(&self) -> bool {
        self.name == Self::UNKNOWN_NAME && self.symbol == Self::UNKNOWN_SYMBOL
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataEntry {
    pub chain_id: ChainId,
    /// Always lowercased.
    pub contract_address: String,
    pub metadata: TokenMetadata,
    pub cached_at: i64,
}

/// One transaction in an address history bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRecord {
    pub hash: String,
    pub block_number: u64,
    #[serde(default)]
    pub transaction_index: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    /// Raw value in the chain's smallest unit, decimal string.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    /// Block timestamp, Unix seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gas_used: Option<String>,
    #[serde(default)]
    pub is_error: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contract_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_symbol: Option<String>,
    /// Provider fields with no typed counterpart.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl TransactionRecord {
    pub fn new(hash: impl Into<String>, block_number: u64, transaction_index: u64) -> Self {
        Self {
            hash: hash.into(),
            block_number,
            transaction_index,
            from: None,
            to: None,
            value: None,
            timestamp: None,
            gas_used: None,
            is_error: false,
            contract_address: None,
            token_symbol: None,
            extra: Map::new(),
        }
    }

    /// Position in the per-bucket total order.
    pub fn sort_key(&self) -> (u64, u64) {
        (self.block_number, self.transaction_index)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionCacheBucket {
    pub address: String,
    pub chain_id: ChainId,
    /// Sorted ascending by (block_number, transaction_index), unique by hash.
    pub transactions: Vec<TransactionRecord>,
    pub last_block: u64,
    pub last_fetch_timestamp: i64,
}

/// Raw ERC20-style balance from a provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenBalance {
    pub contract_address: String,
    /// Raw integer balance, decimal or 0x-hex.
    pub balance: String,
}

/// Balance held on a DEX platform account rather than on a chain address.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DexBalance {
    pub symbol: String,
    pub name: String,
    pub decimals: u8,
    pub balance_raw: String,
    #[serde(default)]
    pub contract_address: Option<String>,
    #[serde(default)]
    pub usd_price: Option<f64>,
}

/// Read-only view handed to the display layer. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnifiedToken {
    /// Chain or platform display name.
    pub chain: String,
    pub chain_id: Option<ChainId>,
    /// None for native tokens.
    pub contract_address: Option<String>,
    pub symbol: String,
    pub name: String,
    pub decimals: u8,
    pub balance_raw: String,
    pub balance_formatted: String,
    pub usd_price: Option<f64>,
    pub usd_value: Option<f64>,
    pub is_native: bool,
}
