//! Coin selection
//!
//! Candidates are taken smallest first, confirmed outputs before change
//! outputs, until they cover the amount plus fee. Selection guarantees
//! sufficiency, not a minimal input set.

use crate::utxo::Output;
use crate::{Error, Result};

/// Selection result
#[derive(Debug, Clone)]
pub struct SelectionResult {
    /// Selected outputs, in selection order
    pub outputs: Vec<Output>,
    /// Total value of selected outputs
    pub total_value: u64,
    /// Value left over after amount plus fee
    pub change: u64,
}

/// Smallest-first selector over confirmed then change outputs
#[derive(Debug, Default, Clone, Copy)]
pub struct CoinSelector;

impl CoinSelector {
    /// Create selector
    pub fn new() -> Self {
        Self
    }

    /// Order candidates: confirmed ascending, then change ascending
    pub fn candidates(mut confirmed: Vec<Output>, mut change: Vec<Output>) -> Vec<Output> {
        confirmed.sort_by_key(|output| output.value);
        change.sort_by_key(|output| output.value);
        confirmed.extend(change);
        confirmed
    }

    /// Select outputs covering `amount + fee`
    pub fn select(
        &self,
        confirmed: Vec<Output>,
        change: Vec<Output>,
        amount: u64,
        fee: u64,
    ) -> Result<SelectionResult> {
        let required = amount
            .checked_add(fee)
            .ok_or_else(|| Error::AmountOverflow(format!("{} + {}", amount, fee)))?;

        let mut selected = Vec::new();
        let mut total = 0u64;
        for output in Self::candidates(confirmed, change) {
            if total >= required {
                break;
            }
            total = total
                .checked_add(output.value)
                .ok_or_else(|| Error::AmountOverflow("Selected value overflow".to_string()))?;
            selected.push(output);
        }

        if total < required {
            return Err(Error::InsufficientFunds(format!(
                "Required {} satoshis, have {} satoshis",
                required, total
            )));
        }

        tracing::info!(
            inputs = selected.len(),
            total,
            change = total - required,
            "Selected inputs"
        );

        Ok(SelectionResult {
            outputs: selected,
            total_value: total,
            change: total - required,
        })
    }

    /// Whether the outputs together cover `required`
    pub fn check_sufficient(outputs: &[Output], required: u64) -> bool {
        Self::total_available(outputs) >= required
    }

    /// Total value of the outputs
    pub fn total_available(outputs: &[Output]) -> u64 {
        outputs.iter().map(|output| output.value).sum()
    }
}
