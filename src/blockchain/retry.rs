//! Retry with error-class dependent backoff, gated by the circuit breaker.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::stream::{FuturesUnordered, StreamExt};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::time::{sleep, timeout, timeout_at, Instant};
use tracing::{debug, warn};

use super::circuit_breaker::CircuitBreaker;
use super::client::FetchError;
use crate::models::ChainId;

#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub attempt_timeout: Duration,
    /// Deadline for a whole `fetch_batch` call.
    pub batch_timeout: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            attempt_timeout: Duration::from_secs(15),
            batch_timeout: Duration::from_secs(8),
        }
    }
}

pub fn transactions_resource_key(chain_id: ChainId) -> String {
    format!("transactions:{}", chain_id)
}

pub fn balances_resource_key(chain_id: ChainId) -> String {
    format!("balances:{}", chain_id)
}

pub fn metadata_resource_key(chain_id: ChainId) -> String {
    format!("metadata:{}", chain_id)
}

pub fn prices_resource_key(chain_id: ChainId) -> String {
    format!("prices:{}", chain_id)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryClass {
    ServiceUnavailable,
    RateLimited,
    ServerError,
    Transient,
    Fatal,
}

impl RetryClass {
    pub fn of(error: &FetchError) -> Self {
        if error.is_service_unavailable() {
            return Self::ServiceUnavailable;
        }
        match error {
            FetchError::RateLimited(_) => Self::RateLimited,
            FetchError::ServerError { .. } => Self::ServerError,
            FetchError::NetworkError(_) | FetchError::Timeout(_) => Self::Transient,
            _ => Self::Fatal,
        }
    }
}

/// Delay before the retry following 0-based `attempt`. `None` means do not retry.
pub fn backoff_delay<R: Rng + ?Sized>(class: RetryClass, attempt: u32, rng: &mut R) -> Option<Duration> {
    let secs = |exp: u32| Duration::from_secs(2u64.saturating_pow(exp));
    match class {
        RetryClass::ServiceUnavailable => Some(
            secs(attempt).min(Duration::from_secs(16))
                + Duration::from_millis(rng.gen_range(0..=2_000)),
        ),
        RetryClass::RateLimited => {
            Some(secs(attempt + 1) + Duration::from_millis(rng.gen_range(0..=1_000)))
        }
        RetryClass::ServerError => {
            Some(secs(attempt) + Duration::from_millis(rng.gen_range(0..=1_000)))
        }
        RetryClass::Transient => Some(Duration::from_secs(3)),
        RetryClass::Fatal => None,
    }
}

/// Result of one lookup in a batch.
#[derive(Debug, Clone, PartialEq)]
pub enum BatchOutcome<V> {
    Fetched(V),
    /// The lookup failed or missed the batch deadline.
    Fallback(V),
}

impl<V> BatchOutcome<V> {
    pub fn is_fallback(&self) -> bool {
        matches!(self, Self::Fallback(_))
    }

    pub fn into_inner(self) -> V {
        match self {
            Self::Fetched(v) | Self::Fallback(v) => v,
        }
    }
}

pub struct RetryingFetcher {
    breaker: Arc<CircuitBreaker>,
    config: RetryConfig,
    rng: Mutex<StdRng>,
}

impl RetryingFetcher {
    pub fn new(breaker: Arc<CircuitBreaker>, config: RetryConfig) -> Self {
        Self::with_rng(breaker, config, StdRng::from_entropy())
    }

    pub fn with_rng(breaker: Arc<CircuitBreaker>, config: RetryConfig, rng: StdRng) -> Self {
        Self {
            breaker,
            config,
            rng: Mutex::new(rng),
        }
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    fn next_delay(&self, class: RetryClass, attempt: u32) -> Option<Duration> {
        let mut rng = self.rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        backoff_delay(class, attempt, &mut *rng)
    }

    fn record_final_failure(&self, resource_key: &str, class: RetryClass, error: &FetchError) {
        match (class, error) {
            (RetryClass::ServiceUnavailable, _) => self.breaker.record_failure(resource_key, true),
            // Caller mistakes say nothing about the upstream's health
            (_, FetchError::Rejected { .. }) => {}
            _ => self.breaker.record_failure(resource_key, false),
        }
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or the
    /// attempt budget runs out.
    ///
    /// The breaker is consulted once before the first attempt.
    pub async fn fetch<T, F, Fut>(&self, resource_key: &str, mut op: F) -> Result<T, FetchError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, FetchError>>,
    {
        if !self.breaker.allow(resource_key) {
            debug!(resource = resource_key, "Circuit open, skipping call");
            return Err(FetchError::CircuitOpen(resource_key.to_string()));
        }

        let mut attempt = 0u32;
        loop {
            let result = match timeout(self.config.attempt_timeout, op()).await {
                Ok(result) => result,
                Err(_) => Err(FetchError::Timeout(self.config.attempt_timeout)),
            };

            let error = match result {
                Ok(value) => {
                    self.breaker.record_success(resource_key);
                    return Ok(value);
                }
                Err(e) => e,
            };

            let class = RetryClass::of(&error);
            let delay = if attempt + 1 < self.config.max_attempts {
                self.next_delay(class, attempt)
            } else {
                None
            };

            match delay {
                Some(delay) => {
                    warn!(
                        resource = resource_key,
                        attempt = attempt + 1,
                        ?class,
                        ?delay,
                        "Request failed, retrying: {}",
                        error
                    );
                    sleep(delay).await;
                    attempt += 1;
                }
                None => {
                    warn!(
                        resource = resource_key,
                        attempts = attempt + 1,
                        ?class,
                        "Request failed: {}",
                        error
                    );
                    self.record_final_failure(resource_key, class, &error);
                    return Err(error);
                }
            }
        }
    }

    /// Run one retried lookup per key concurrently, bounded by `batch_timeout`.
    ///
    /// Every key gets an outcome. Lookups that fail or have not finished by
    /// the deadline resolve to `fallback(key)`; those that finished in time
    /// are kept.
    pub async fn fetch_batch<K, V, F, Fut, D>(
        &self,
        resource_key: &str,
        keys: Vec<K>,
        op: F,
        fallback: D,
    ) -> HashMap<K, BatchOutcome<V>>
    where
        K: Eq + Hash + Clone,
        F: Fn(K) -> Fut,
        Fut: Future<Output = Result<V, FetchError>>,
        D: Fn(&K) -> V,
    {
        let deadline = Instant::now() + self.config.batch_timeout;
        let op = &op;

        let mut pending: FuturesUnordered<_> = keys
            .iter()
            .cloned()
            .map(|key| async move {
                let result = self.fetch(resource_key, || op(key.clone())).await;
                (key, result)
            })
            .collect();

        let mut outcomes = HashMap::with_capacity(keys.len());
        loop {
            let next = timeout_at(deadline, pending.next()).await;
            match next {
                Ok(Some((key, Ok(value)))) => {
                    outcomes.insert(key, BatchOutcome::Fetched(value));
                }
                Ok(Some((key, Err(e)))) => {
                    debug!(resource = resource_key, "Batch lookup failed: {}", e);
                    let value = fallback(&key);
                    outcomes.insert(key, BatchOutcome::Fallback(value));
                }
                Ok(None) => break,
                Err(_) => {
                    warn!(
                        resource = resource_key,
                        unfinished = pending.len(),
                        "Batch deadline reached"
                    );
                    break;
                }
            }
        }

        for key in keys {
            if !outcomes.contains_key(&key) {
                let value = fallback(&key);
                outcomes.insert(key, BatchOutcome::Fallback(value));
            }
        }

        outcomes
    }
}
