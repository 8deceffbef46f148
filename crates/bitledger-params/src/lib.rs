//! Bitledger network parameters and ledger policy
//!
//! This crate provides network definitions, the fee and dust policy constants
//! used by the transaction factory, and the serde-backed ledger configuration.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod network;
pub mod policy;

pub use config::LedgerConfig;
pub use network::{Network, NetworkType};
pub use policy::{
    DEFAULT_CHANGE_OUTPUTS, DEFAULT_LOOK_AHEAD, DEFAULT_TRUNK_LENGTH, DUST_LIMIT, KB_FEE,
    MAXIMUM_FEE, MAX_CHANGE_SPLIT_ATTEMPTS, MAX_FEE_ITERATIONS, MINIMUM_FEE,
};

/// Error types for parameter operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid network specified
    #[error("Invalid network: {0}")]
    InvalidNetwork(String),

    /// Configuration value out of range or inconsistent
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Configuration file could not be read
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration could not be parsed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for parameter operations
pub type Result<T> = std::result::Result<T, Error>;
