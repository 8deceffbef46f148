//! Logging bootstrap for embedders and tools

use tracing_subscriber::EnvFilter;

use crate::{Error, Result};

/// Install a fmt subscriber.
///
/// `RUST_LOG` wins over `default_filter` when set. Fails if a global
/// subscriber is already installed.
pub fn init_logging(default_filter: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .map_err(|e| Error::Other(format!("Invalid log filter: {}", e)))?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true)
        .try_init()
        .map_err(|e| Error::Other(format!("Logging already initialized: {}", e)))?;

    tracing::info!("Ledger logging initialized");
    Ok(())
}
