//! Ledger configuration
//!
//! Every field has a default taken from [`crate::policy`], so a configuration
//! file only needs to name the values it overrides.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::network::{Network, NetworkType};
use crate::policy;
use crate::{Error, Result};

/// Ledger configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Network addresses and keys are encoded for
    pub network: NetworkType,
    /// Largest value still treated as dust
    pub dust_limit: u64,
    /// Fee per started kilobyte at normal priority
    pub fee_per_kb: u64,
    /// Floor for calculated fees and quantum for change splitting
    pub minimum_fee: u64,
    /// Ceiling for any fee
    pub maximum_fee: u64,
    /// Unused addresses derived past the highest used index
    pub look_ahead: u32,
    /// Block hashes kept for reorganization detection
    pub trunk_length: usize,
    /// Bound on assemble/measure rounds for calculated fees
    pub max_fee_iterations: u32,
    /// Bound on change split resampling rounds
    pub max_change_split_attempts: u32,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            network: NetworkType::Mainnet,
            dust_limit: policy::DUST_LIMIT,
            fee_per_kb: policy::KB_FEE,
            minimum_fee: policy::MINIMUM_FEE,
            maximum_fee: policy::MAXIMUM_FEE,
            look_ahead: policy::DEFAULT_LOOK_AHEAD,
            trunk_length: policy::DEFAULT_TRUNK_LENGTH,
            max_fee_iterations: policy::MAX_FEE_ITERATIONS,
            max_change_split_attempts: policy::MAX_CHANGE_SPLIT_ATTEMPTS,
        }
    }
}

impl LedgerConfig {
    /// Default configuration for the given network
    pub fn for_network(network: NetworkType) -> Self {
        Self {
            network,
            ..Self::default()
        }
    }

    /// Parse from a JSON document and validate
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a JSON file and validate
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    /// Write as pretty-printed JSON
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Network parameters for the configured network type
    pub fn network_params(&self) -> Network {
        Network::from_type(self.network)
    }

    /// Check the fee bounds and window sizes are usable
    pub fn validate(&self) -> Result<()> {
        if self.minimum_fee == 0 {
            return Err(Error::InvalidConfig(
                "minimum_fee must be positive".to_string(),
            ));
        }
        if self.minimum_fee > self.maximum_fee {
            return Err(Error::InvalidConfig(format!(
                "minimum_fee {} exceeds maximum_fee {}",
                self.minimum_fee, self.maximum_fee
            )));
        }
        if self.trunk_length == 0 {
            return Err(Error::InvalidConfig(
                "trunk_length must be positive".to_string(),
            ));
        }
        if self.look_ahead == 0 {
            return Err(Error::InvalidConfig(
                "look_ahead must be positive".to_string(),
            ));
        }
        if self.max_fee_iterations == 0 || self.max_change_split_attempts == 0 {
            return Err(Error::InvalidConfig(
                "iteration caps must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
