use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

use super::client::FetchError;
use crate::models::{TokenBalance, TokenMetadata, TransactionRecord};

#[derive(Debug, Serialize)]
pub struct RpcRequest<'a> {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: &'a str,
    pub params: Value,
}

impl<'a> RpcRequest<'a> {
    pub fn new(method: &'a str, params: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id: 1,
            method,
            params,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RpcErrorObject {
    pub code: i64,
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct RpcResponse<T> {
    pub result: Option<T>,
    pub error: Option<RpcErrorObject>,
}

impl<T> RpcResponse<T> {
    pub fn into_result(self) -> Result<T, FetchError> {
        if let Some(error) = self.error {
            return Err(FetchError::from_rpc_error(error.code, error.message));
        }
        self.result
            .ok_or_else(|| FetchError::MalformedResponse("missing result".to_string()))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcTokenBalance {
    pub contract_address: String,
    pub token_balance: Option<String>,
    #[serde(default)]
    pub error: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcTokenBalances {
    pub token_balances: Vec<RpcTokenBalance>,
}

impl RpcTokenBalances {
    /// Balances that were reported without an error.
    pub fn into_balances(self) -> Vec<TokenBalance> {
        self.token_balances
            .into_iter()
            .filter(|b| b.error.is_none())
            .filter_map(|b| {
                b.token_balance.map(|balance| TokenBalance {
                    contract_address: b.contract_address.to_lowercase(),
                    balance,
                })
            })
            .collect()
    }
}

#[derive(Debug, Deserialize)]
pub struct RpcTokenMetadata {
    pub name: Option<String>,
    pub symbol: Option<String>,
    pub decimals: Option<u8>,
    pub logo: Option<String>,
}

impl From<RpcTokenMetadata> for TokenMetadata {
    fn from(raw: RpcTokenMetadata) -> Self {
        let unknown = TokenMetadata::unknown();
        Self {
            name: raw.name.filter(|s| !s.is_empty()).unwrap_or(unknown.name),
            symbol: raw.symbol.filter(|s| !s.is_empty()).unwrap_or(unknown.symbol),
            decimals: raw.decimals.unwrap_or(unknown.decimals),
            logo: raw.logo.filter(|s| !s.is_empty()),
        }
    }
}

/// Envelope of the explorer `account` module.
#[derive(Debug, Deserialize)]
pub struct ExplorerResponse {
    pub status: String,
    pub message: String,
    pub result: Value,
}

impl ExplorerResponse {
    /// The raw transaction list, or the error the explorer reported.
    pub fn into_transactions(self) -> Result<Vec<Value>, FetchError> {
        match self.result {
            Value::Array(items) => Ok(items),
            Value::String(text) => {
                if self.message.starts_with("No transactions found") {
                    return Ok(Vec::new());
                }
                let lower = text.to_lowercase();
                if lower.contains("rate limit") {
                    Err(FetchError::RateLimited(text))
                } else if lower.contains("unavailable") || lower.contains("overloaded") {
                    Err(FetchError::ServiceUnavailable(text))
                } else {
                    Err(FetchError::Rejected {
                        status: 400,
                        message: format!("{}: {}", self.message, text),
                    })
                }
            }
            Value::Null if self.status == "0" => Ok(Vec::new()),
            other => Err(FetchError::MalformedResponse(format!(
                "unexpected explorer result: {}",
                other
            ))),
        }
    }
}

/// Parse a decimal or `0x` hex quantity.
pub fn parse_quantity(raw: &str) -> Option<u64> {
    let raw = raw.trim();
    match raw.strip_prefix("0x") {
        Some(hex) => u64::from_str_radix(hex, 16).ok(),
        None => raw.parse().ok(),
    }
}

fn quantity_field(fields: &Map<String, Value>, key: &str) -> Option<u64> {
    match fields.get(key)? {
        Value::String(s) => parse_quantity(s),
        Value::Number(n) => n.as_u64(),
        _ => None,
    }
}

fn string_field(fields: &Map<String, Value>, key: &str) -> Option<String> {
    fields
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Extract an explorer transaction into our cache model.
///
/// Fields with a typed counterpart are lifted out; everything else is kept
/// in `extra`. Entries without a hash or block number are skipped.
pub fn extract_transaction(raw: Value) -> Option<TransactionRecord> {
    let Value::Object(mut fields) = raw else {
        warn!("Skipping non-object explorer transaction");
        return None;
    };

    let hash = match string_field(&fields, "hash") {
        Some(hash) => hash,
        None => {
            warn!("Skipping explorer transaction without hash");
            return None;
        }
    };
    let block_number = match quantity_field(&fields, "blockNumber") {
        Some(block) => block,
        None => {
            warn!("Transaction {} has no block number", hash);
            return None;
        }
    };

    let mut record = TransactionRecord::new(
        hash,
        block_number,
        quantity_field(&fields, "transactionIndex").unwrap_or(0),
    );
    record.from = string_field(&fields, "from").map(|s| s.to_lowercase());
    record.to = string_field(&fields, "to").map(|s| s.to_lowercase());
    record.value = string_field(&fields, "value");
    record.timestamp = quantity_field(&fields, "timeStamp").map(|t| t as i64);
    record.gas_used = string_field(&fields, "gasUsed");
    record.is_error = string_field(&fields, "isError").as_deref() == Some("1");
    record.contract_address = string_field(&fields, "contractAddress").map(|s| s.to_lowercase());
    record.token_symbol = string_field(&fields, "tokenSymbol");

    for key in [
        "hash",
        "blockNumber",
        "transactionIndex",
        "from",
        "to",
        "value",
        "timeStamp",
        "gasUsed",
        "isError",
        "contractAddress",
        "tokenSymbol",
    ] {
        fields.remove(key);
    }
    record.extra = fields;

    Some(record)
}
