//! USD price lookups.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use super::chains::chain_info;
use super::client::FetchError;
use crate::models::ChainId;

#[async_trait]
pub trait PriceSource: Send + Sync {
    /// USD prices for the given assets on one chain. `None` is the native
    /// asset. Assets without a known price are absent from the result.
    async fn get_usd_prices(
        &self,
        chain_id: ChainId,
        assets: &[Option<String>],
    ) -> Result<HashMap<Option<String>, f64>, FetchError>;
}

#[derive(Debug, Deserialize)]
struct LlamaCoin {
    price: f64,
}

#[derive(Debug, Deserialize)]
struct LlamaPrices {
    coins: HashMap<String, LlamaCoin>,
}

/// DefiLlama `prices/current` endpoint.
pub struct LlamaPriceSource {
    http: Client,
    base_url: String,
}

impl LlamaPriceSource {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, FetchError> {
        Ok(Self {
            http: Client::builder().timeout(timeout).build()?,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Coin ids for each asset, in request order.
    fn coin_ids(chain_id: ChainId, assets: &[Option<String>]) -> Vec<(Option<String>, String)> {
        let Some(chain) = chain_info(chain_id) else {
            return Vec::new();
        };

        assets
            .iter()
            .map(|asset| {
                let id = match asset {
                    Some(contract) => {
                        format!("{}:{}", chain.price_platform, contract.to_lowercase())
                    }
                    None => chain.native_price_id.to_string(),
                };
                (asset.clone(), id)
            })
            .collect()
    }
}

#[async_trait]
impl PriceSource for LlamaPriceSource {
    async fn get_usd_prices(
        &self,
        chain_id: ChainId,
        assets: &[Option<String>],
    ) -> Result<HashMap<Option<String>, f64>, FetchError> {
        let ids = Self::coin_ids(chain_id, assets);
        if ids.is_empty() {
            return Ok(HashMap::new());
        }

        let joined = ids
            .iter()
            .map(|(_, id)| id.as_str())
            .collect::<Vec<_>>()
            .join(",");
        let url = format!("{}/prices/current/{}", self.base_url, joined);
        debug!(chain_id, assets = ids.len(), "Fetching USD prices");

        let response = self.http.get(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(FetchError::from_status(status.as_u16(), body));
        }

        let body: LlamaPrices = response.json().await?;
        Ok(ids
            .into_iter()
            .filter_map(|(asset, id)| body.coins.get(&id).map(|coin| (asset, coin.price)))
            .collect())
    }
}
