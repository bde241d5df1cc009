pub mod chains;
pub mod circuit_breaker;
pub mod client;
pub mod evm;
pub mod models;
pub mod polling;
pub mod prices;
pub mod retry;
pub mod sync;

// Re-exports for convenience
pub use client::{ChainProvider, FetchError, ProviderRegistry};
pub use evm::EvmHttpProvider;
pub use polling::{SyncScheduler, SyncTarget};
pub use prices::{LlamaPriceSource, PriceSource};
