pub mod aggregator;
pub mod blockchain;
pub mod cache;
pub mod clock;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod service;
pub mod validation;

#[cfg(test)]
pub mod tests;

// Re-export specific items for convenience
pub use aggregator::Aggregator;
pub use blockchain::circuit_breaker::{BreakerConfig, CircuitBreaker};
pub use blockchain::client::{ChainProvider, FetchError, ProviderRegistry};
pub use blockchain::retry::{RetryConfig, RetryingFetcher};
pub use blockchain::sync::{SmartSync, SyncOutcome, SyncSource};
pub use cache::{AppCache, CacheStats, MetadataCache, TransactionCache};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Config;
pub use db::{MemoryStore, PersistentStore, SqliteStore, StoreError};
pub use error::Error;
pub use models::{
    ChainId, MetadataEntry, TokenMetadata, TransactionCacheBucket, TransactionRecord, UnifiedToken,
};
pub use service::WalletSync;
