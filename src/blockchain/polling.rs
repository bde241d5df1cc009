use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::client::ProviderRegistry;
use super::sync::{SmartSync, SyncSource};
use crate::models::ChainId;

/// One watched history: a wallet on a chain.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SyncTarget {
    pub address: String,
    pub chain_id: ChainId,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RoundSummary {
    pub synced: usize,
    pub fresh: usize,
    pub stale: usize,
    pub failed: usize,
}

/// Keeps watched histories warm by re-running smart sync on an interval.
pub struct SyncScheduler {
    sync: Arc<SmartSync>,
    providers: ProviderRegistry,
    targets: Vec<SyncTarget>,
    interval: Duration,
    max_concurrent: usize,
}

impl SyncScheduler {
    pub fn new(
        sync: Arc<SmartSync>,
        providers: ProviderRegistry,
        targets: Vec<SyncTarget>,
        interval: Duration,
    ) -> Self {
        Self {
            sync,
            providers,
            targets,
            interval,
            max_concurrent: num_cpus::get(),
        }
    }

    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent.max(1);
        self
    }

    pub fn targets(&self) -> &[SyncTarget] {
        &self.targets
    }

    /// Sync every target once, at most `max_concurrent` at a time.
    pub async fn run_once(&self) -> RoundSummary {
        // Each future owns its target and handles so the round stays Send
        let results: Vec<Option<SyncSource>> = stream::iter(self.targets.clone())
            .map(|target| {
                let sync = self.sync.clone();
                let provider = self.providers.get(target.chain_id);
                async move {
                    let Some(provider) = provider else {
                        error!(chain_id = target.chain_id, "No provider for watched chain");
                        return None;
                    };
                    match sync.sync(&target.address, provider.as_ref()).await {
                        Ok(outcome) => Some(outcome.source),
                        Err(e) => {
                            error!(
                                address = %target.address,
                                chain_id = target.chain_id,
                                "Background sync failed: {}",
                                e
                            );
                            None
                        }
                    }
                }
            })
            .buffer_unordered(self.max_concurrent)
            .collect()
            .await;

        let mut summary = RoundSummary::default();
        for result in results {
            match result {
                Some(SyncSource::Fresh) => summary.fresh += 1,
                Some(SyncSource::Stale) => summary.stale += 1,
                Some(_) => summary.synced += 1,
                None => summary.failed += 1,
            }
        }
        summary
    }

    pub async fn start_polling(&self, shutdown: CancellationToken) {
        info!(
            targets = self.targets.len(),
            interval = ?self.interval,
            max_concurrent = self.max_concurrent,
            "Starting background transaction sync"
        );

        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let summary = self.run_once().await;
                    debug!(?summary, "Sync round finished");
                    if summary.failed > 0 || summary.stale > 0 {
                        info!(
                            synced = summary.synced,
                            stale = summary.stale,
                            failed = summary.failed,
                            "Sync round finished with errors"
                        );
                    }
                }
                _ = shutdown.cancelled() => {
                    info!("Shutting down background transaction sync");
                    break;
                }
            }
        }
    }
}
