//! Error taxonomy for the freshness engine.
//!
//! Each variant corresponds to one of the error kinds in the system design:
//! transient failures (`RpcError`, `PoolNotFound`, `StorageUnavailable`,
//! `DecodeError`, `InvalidAddress`) are swallowed by their callers and never
//! reach a client; only `ChainNotSupported` and unexpected internal failures
//! surface as non-2xx HTTP responses.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AggregatorError {
    #[error("chain not supported: {0}")]
    ChainNotSupported(String),

    #[error("rpc error: {0}")]
    RpcError(#[from] anyhow::Error),

    #[error("pool not found at {0:#x}")]
    PoolNotFound(ethers::types::Address),

    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("decode error: {0}")]
    DecodeError(String),

    #[error("invalid address: {0}")]
    InvalidAddress(String),
}

pub type Result<T> = std::result::Result<T, AggregatorError>;
