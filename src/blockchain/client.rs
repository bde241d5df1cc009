use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::{ChainId, TokenBalance, TokenMetadata, TransactionRecord};

/// Failure of one call to an upstream provider.
///
/// The variant decides the retry policy, see [`crate::blockchain::retry`].
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FetchError {
    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Server error {status}: {message}")]
    ServerError { status: u16, message: String },

    #[error("Request rejected ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Circuit open for {0}")]
    CircuitOpen(String),
}

impl FetchError {
    /// Classify an HTTP error status.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            429 => Self::RateLimited(message),
            503 => Self::ServiceUnavailable(message),
            500..=599 => Self::ServerError { status, message },
            _ => Self::Rejected { status, message },
        }
    }

    /// Classify a JSON-RPC error object returned with HTTP 200.
    pub fn from_rpc_error(code: i64, message: impl Into<String>) -> Self {
        let message = message.into();
        match code {
            429 | -32005 => Self::RateLimited(message),
            -32603 | -32000 => Self::ServerError {
                status: 500,
                message,
            },
            _ => Self::Rejected {
                status: 400,
                message,
            },
        }
    }

    pub fn message(&self) -> String {
        match self {
            Self::RateLimited(m)
            | Self::ServiceUnavailable(m)
            | Self::NetworkError(m)
            | Self::MalformedResponse(m)
            | Self::CircuitOpen(m) => m.clone(),
            Self::ServerError { message, .. } | Self::Rejected { message, .. } => message.clone(),
            Self::Timeout(d) => format!("timed out after {:?}", d),
        }
    }

    /// Upstream overload: HTTP 503, or any error whose message mentions it.
    pub fn is_service_unavailable(&self) -> bool {
        match self {
            Self::ServiceUnavailable(_) => true,
            Self::CircuitOpen(_) => false,
            other => {
                let message = other.message().to_lowercase();
                message.contains("overloaded") || message.contains("unavailable")
            }
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        if let Some(status) = e.status() {
            Self::from_status(status.as_u16(), e.to_string())
        } else if e.is_timeout() {
            Self::NetworkError(format!("timeout: {}", e))
        } else if e.is_decode() {
            Self::MalformedResponse(e.to_string())
        } else {
            Self::NetworkError(e.to_string())
        }
    }
}

impl From<serde_json::Error> for FetchError {
    fn from(e: serde_json::Error) -> Self {
        Self::MalformedResponse(e.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    #[default]
    Ascending,
    Descending,
}

impl SortOrder {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ascending => "asc",
            Self::Descending => "desc",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionQuery {
    pub address: String,
    pub start_block: u64,
    /// `None` means up to the latest block.
    pub end_block: Option<u64>,
    pub sort: SortOrder,
    /// Opaque continuation token from a previous page.
    pub cursor: Option<String>,
}

impl TransactionQuery {
    pub fn from_block(address: &str, start_block: u64) -> Self {
        Self {
            address: address.to_string(),
            start_block,
            end_block: None,
            sort: SortOrder::Ascending,
            cursor: None,
        }
    }

    pub fn with_cursor(&self, cursor: String) -> Self {
        Self {
            cursor: Some(cursor),
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransactionPage {
    pub records: Vec<TransactionRecord>,
    pub next_cursor: Option<String>,
    /// Chain head observed by the provider, when it reports one.
    pub latest_block: Option<u64>,
}

/// One blockchain's data endpoint.
#[async_trait]
pub trait ChainProvider: Send + Sync {
    fn chain_id(&self) -> ChainId;

    /// Native balance as a `0x` hex string in the smallest unit.
    async fn get_balance(&self, address: &str) -> Result<String, FetchError>;

    async fn get_token_balances(&self, address: &str) -> Result<Vec<TokenBalance>, FetchError>;

    async fn get_token_metadata(&self, contract_address: &str) -> Result<TokenMetadata, FetchError>;

    async fn get_transactions(&self, query: &TransactionQuery) -> Result<TransactionPage, FetchError>;
}

/// Providers by chain id.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: HashMap<ChainId, Arc<dyn ChainProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, provider: Arc<dyn ChainProvider>) {
        self.providers.insert(provider.chain_id(), provider);
    }

    pub fn get(&self, chain_id: ChainId) -> Option<Arc<dyn ChainProvider>> {
        self.providers.get(&chain_id).cloned()
    }

    pub fn chain_ids(&self) -> Vec<ChainId> {
        let mut ids: Vec<_> = self.providers.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}
