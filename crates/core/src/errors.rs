//! Error types

use thiserror::Error;

use crate::PriceSource;

/// Core error types
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid price: {0}")]
    InvalidPrice(String),
}

impl From<config::ConfigError> for CoreError {
    fn from(err: config::ConfigError) -> Self {
        CoreError::InvalidConfig(err.to_string())
    }
}

/// Price feed errors
///
/// Per-source variants never leave the failover cascade; a cascade only
/// ever surfaces [`PriceFeedError::AllSourcesFailed`].
#[derive(Debug, Error)]
pub enum PriceFeedError {
    #[error("HTTP client error: {0}")]
    Client(String),

    #[error("{provider} request failed: {message}")]
    Http {
        provider: PriceSource,
        message: String,
    },

    #[error("{provider} API failed with status {status}")]
    Status { provider: PriceSource, status: u16 },

    #[error("{provider} returned an unexpected payload: {message}")]
    Decode {
        provider: PriceSource,
        message: String,
    },

    #[error("All oracle sources failed")]
    AllSourcesFailed,
}

/// Chain connection and pallet errors
///
/// `Clone` so that one connection attempt's outcome can be handed to every
/// caller waiting on it.
#[derive(Debug, Clone, Error)]
pub enum ChainError {
    #[error("Failed to connect to RPC: {0}")]
    ConnectionFailed(String),

    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("Timed out waiting for {0}")]
    Timeout(String),

    #[error("Connection closed")]
    Disconnected,

    #[error("Roracle pallet not found: {0}. Make sure you are connected to the R-Oracle chain.")]
    PalletMissing(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Invalid price: {0}")]
    InvalidPrice(String),

    #[error("Signing failed: {0}")]
    Signing(String),

    #[error("Extrinsic {0}")]
    Extrinsic(String),

    #[error("Failed to {op}: {message}")]
    Query { op: &'static str, message: String },
}

impl ChainError {
    /// Prefix an error with the pallet operation that produced it
    pub fn during(op: &'static str, err: ChainError) -> Self {
        match err {
            ChainError::Query { .. } => err,
            other => ChainError::Query {
                op,
                message: other.to_string(),
            },
        }
    }
}

impl From<CoreError> for ChainError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::InvalidPrice(p) => ChainError::InvalidPrice(p),
            CoreError::InvalidConfig(c) => ChainError::ConnectionFailed(c),
        }
    }
}

/// Result type alias
pub type CoreResult<T> = Result<T, CoreError>;
pub type PriceFeedResult<T> = Result<T, PriceFeedError>;
pub type ChainResult<T> = Result<T, ChainError>;
