use thiserror::Error;

use crate::blockchain::client::FetchError;
use crate::config::ConfigError;
use crate::db::StoreError;
use crate::models::ChainId;
use crate::validation::ValidationError;

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Unknown chain id: {0}")]
    UnknownChain(ChainId),

    #[error("No provider configured for chain {0}")]
    MissingProvider(ChainId),
}

pub type Result<T> = std::result::Result<T, Error>;
