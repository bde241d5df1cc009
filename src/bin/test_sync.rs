use std::env;
use std::time::Instant;

use tracing::{info, warn, Level};
use wallet_sync::{Config, WalletSync};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Setup tracing
    tracing_subscriber::fmt().with_max_level(Level::INFO).init();

    info!("Starting live sync smoke test...");

    let config = Config::from_env()?;
    config.validate()?;
    let service = WalletSync::from_config(&config).await?;

    let address = match env::args().nth(1).or_else(|| config.watch_addresses.first().cloned()) {
        Some(address) => address,
        None => {
            warn!("Pass an address or set WATCH_ADDRESSES");
            return Ok(());
        }
    };

    for chain_id in &config.active_chains {
        // 1. Cold or stale read hits the network
        let started = Instant::now();
        let first = service.get_cached_or_fresh_transactions(&address, *chain_id).await?;
        info!(
            "✅ chain {}: {} transactions up to block {} ({:?}, {:?})",
            chain_id,
            first.transactions.len(),
            first.last_block,
            first.source,
            started.elapsed()
        );

        // 2. Second read must come from the cache
        let started = Instant::now();
        let second = service.get_cached_or_fresh_transactions(&address, *chain_id).await?;
        info!(
            "✅ chain {}: cached read returned {} transactions ({:?}, {:?})",
            chain_id,
            second.transactions.len(),
            second.source,
            started.elapsed()
        );
    }

    // 3. Token view
    let tokens = service.get_unified_tokens(&address, &config.active_chains).await?;
    for token in &tokens {
        info!(
            "{:>12} {:<10} {:>24} ${:.2}",
            token.chain,
            token.symbol,
            token.balance_formatted,
            token.usd_value.unwrap_or(0.0)
        );
    }

    let stats = service.cache_stats().await?;
    info!("Cache stats: {:?}", stats);
    info!("All checks completed!");
    Ok(())
}
