//! Change splitting
//!
//! Change above the dust limit may be spread over several outputs so the
//! change amount is not recognizable as a single round remainder. Shares are
//! drawn at random, quantized to the minimum fee, and redrawn while any share
//! would be dust.

use bitledger_params::LedgerConfig;
use rand::Rng;

use crate::{Error, Result};

/// Limits applied when splitting change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChangePolicy {
    /// Largest value treated as dust
    pub dust_limit: u64,
    /// Shares are multiples of this value, except the first
    pub quantum: u64,
    /// Resampling rounds before giving up
    pub max_attempts: u32,
}

impl ChangePolicy {
    /// Policy from the ledger configuration
    pub fn from_config(config: &LedgerConfig) -> Self {
        Self {
            dust_limit: config.dust_limit,
            quantum: config.minimum_fee,
            max_attempts: config.max_change_split_attempts,
        }
    }
}

impl Default for ChangePolicy {
    fn default() -> Self {
        Self::from_config(&LedgerConfig::default())
    }
}

/// Split `change` into `outputs` shares that sum to `change`
pub fn split_change<R: Rng + ?Sized>(
    change: u64,
    outputs: usize,
    policy: &ChangePolicy,
    rng: &mut R,
) -> Result<Vec<u64>> {
    let n = outputs.max(1);
    let quantum = policy.quantum.max(1);
    if n == 1 || change <= quantum.saturating_mul(n as u64) {
        return Ok(vec![change]);
    }

    for attempt in 1..=policy.max_attempts {
        let samples: Vec<f64> = (0..n).map(|_| (1.0 - rng.gen::<f64>()).exp()).collect();
        let sum: f64 = samples.iter().sum();

        let mut shares = Vec::with_capacity(n);
        shares.push(0);
        for sample in &samples[1..] {
            let share = (change as f64 * sample / sum / quantum as f64).floor() as u64 * quantum;
            shares.push(share);
        }
        let rest: u64 = shares.iter().sum();
        let Some(first) = change.checked_sub(rest) else {
            continue;
        };
        shares[0] = first;

        if shares.iter().all(|share| *share > policy.dust_limit) {
            tracing::debug!(change, outputs = n, attempt, "Change split");
            return Ok(shares);
        }
    }

    Err(Error::ChangeSplitExhausted(format!(
        "Could not split {} into {} outputs above dust {} in {} attempts",
        change, n, policy.dust_limit, policy.max_attempts
    )))
}
