// Initialize configuration
// Set up logging
// Open the persistent store and providers
// Start background sync for watched addresses
// Wait for shutdown

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use wallet_sync::validation::normalize_wallet_address;
use wallet_sync::{Config, WalletSync};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "wallet_sync=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting wallet-sync");

    // Load configuration
    let config = Config::from_env()?;
    config.validate()?;
    tracing::info!("Configuration loaded: {:?}", config.active_chains);

    let service = Arc::new(WalletSync::from_config(&config).await?);

    let addresses = config
        .watch_addresses
        .iter()
        .map(|a| normalize_wallet_address(a))
        .collect::<Result<Vec<_>, _>>()?;
    if addresses.is_empty() {
        tracing::warn!("WATCH_ADDRESSES is empty, background sync has nothing to do");
    }

    // Start background sync task
    let shutdown = CancellationToken::new();
    let scheduler = service.scheduler(&addresses, config.polling_interval());
    let polling_shutdown = shutdown.clone();
    let polling = tokio::spawn(async move {
        scheduler.start_polling(polling_shutdown).await;
    });
    tracing::info!("Background sync task started");

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown requested");
    shutdown.cancel();
    polling.await?;

    let stats = service.cache_stats().await?;
    tracing::info!(
        metadata_entries = stats.metadata.total_entries,
        buckets = stats.transactions.buckets,
        transactions = stats.transactions.transactions,
        "Final cache stats"
    );

    Ok(())
}
