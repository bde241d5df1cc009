use std::num::NonZeroU32;
use std::time::Duration;

use async_trait::async_trait;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::{debug, info};

use super::client::{ChainProvider, FetchError, TransactionPage, TransactionQuery};
use super::models::{
    extract_transaction, ExplorerResponse, RpcRequest, RpcResponse,
    RpcTokenBalances, RpcTokenMetadata,
};
use crate::config::ChainEndpoint;
use crate::models::{ChainId, TokenBalance, TokenMetadata};

/// Records requested per explorer page.
pub const EXPLORER_PAGE_SIZE: usize = 1_000;

/// JSON-RPC node plus block-explorer API for one EVM chain.
pub struct EvmHttpProvider {
    chain_id: ChainId,
    http: Client,
    rpc_url: String,
    explorer_url: Option<String>,
    explorer_api_key: Option<String>,
    limiter: Option<DefaultDirectRateLimiter>,
}

impl EvmHttpProvider {
    pub fn new(
        chain_id: ChainId,
        endpoint: &ChainEndpoint,
        timeout: Duration,
        rate_limit: Option<u32>,
    ) -> Result<Self, FetchError> {
        let http = Client::builder().timeout(timeout).build()?;

        let limiter = rate_limit
            .and_then(NonZeroU32::new)
            .map(|rate| RateLimiter::direct(Quota::per_second(rate)));

        info!(
            "Initializing EVM provider for chain {} with RPC endpoint: {}",
            chain_id, endpoint.rpc_url
        );

        Ok(Self {
            chain_id,
            http,
            rpc_url: endpoint.rpc_url.clone(),
            explorer_url: endpoint.explorer_url.clone(),
            explorer_api_key: endpoint.explorer_api_key.clone(),
            limiter,
        })
    }

    async fn throttle(&self) {
        if let Some(limiter) = &self.limiter {
            limiter.until_ready().await;
        }
    }

    async fn rpc<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T, FetchError> {
        self.throttle().await;
        debug!(chain_id = self.chain_id, method, "JSON-RPC call");

        let response = self
            .http
            .post(&self.rpc_url)
            .json(&RpcRequest::new(method, params))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(FetchError::from_status(status.as_u16(), body));
        }

        let body: RpcResponse<T> = response.json().await?;
        body.into_result()
    }

    fn explorer_query(&self, query: &TransactionQuery) -> Result<(String, Vec<(String, String)>), FetchError> {
        let url = self.explorer_url.clone().ok_or_else(|| FetchError::Rejected {
            status: 400,
            message: format!("no explorer configured for chain {}", self.chain_id),
        })?;

        let page: u64 = match &query.cursor {
            Some(cursor) => cursor
                .parse()
                .map_err(|_| FetchError::MalformedResponse(format!("bad page cursor {}", cursor)))?,
            None => 1,
        };

        let mut params = vec![
            ("module".to_string(), "account".to_string()),
            ("action".to_string(), "txlist".to_string()),
            ("address".to_string(), query.address.clone()),
            ("startblock".to_string(), query.start_block.to_string()),
            (
                "endblock".to_string(),
                query.end_block.unwrap_or(99_999_999).to_string(),
            ),
            ("page".to_string(), page.to_string()),
            ("offset".to_string(), EXPLORER_PAGE_SIZE.to_string()),
            ("sort".to_string(), query.sort.as_str().to_string()),
        ];
        if let Some(key) = &self.explorer_api_key {
            params.push(("apikey".to_string(), key.clone()));
        }

        Ok((url, params))
    }
}

#[async_trait]
impl ChainProvider for EvmHttpProvider {
    fn chain_id(&self) -> ChainId {
        self.chain_id
    }

    async fn get_balance(&self, address: &str) -> Result<String, FetchError> {
        self.rpc("eth_getBalance", json!([address, "latest"])).await
    }

    async fn get_token_balances(&self, address: &str) -> Result<Vec<TokenBalance>, FetchError> {
        let raw: RpcTokenBalances = self
            .rpc("alchemy_getTokenBalances", json!([address, "erc20"]))
            .await?;
        Ok(raw.into_balances())
    }

    async fn get_token_metadata(&self, contract_address: &str) -> Result<TokenMetadata, FetchError> {
        let raw: RpcTokenMetadata = self
            .rpc("alchemy_getTokenMetadata", json!([contract_address]))
            .await?;
        Ok(raw.into())
    }

    async fn get_transactions(&self, query: &TransactionQuery) -> Result<TransactionPage, FetchError> {
        let (url, params) = self.explorer_query(query)?;
        self.throttle().await;

        debug!(
            chain_id = self.chain_id,
            address = %query.address,
            start_block = query.start_block,
            cursor = ?query.cursor,
            "Fetching transaction page"
        );

        let response = self.http.get(&url).query(&params).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(FetchError::from_status(status.as_u16(), body));
        }

        let body: ExplorerResponse = response.json().await?;
        let raw = body.into_transactions()?;
        let full_page = raw.len() >= EXPLORER_PAGE_SIZE;

        let records: Vec<_> = raw.into_iter().filter_map(extract_transaction).collect();

        let page: u64 = query
            .cursor
            .as_deref()
            .and_then(|c| c.parse().ok())
            .unwrap_or(1);
        let next_cursor = full_page.then(|| (page + 1).to_string());

        Ok(TransactionPage {
            records,
            next_cursor,
            latest_block: None,
        })
    }
}
