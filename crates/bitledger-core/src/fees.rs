//! Transaction fee calculation
//!
//! Fees are charged per started kilobyte of the serialized transaction,
//! floored at the minimum fee and capped at the maximum fee.

use bitledger_params::LedgerConfig;

use crate::{Error, Result};

/// Confirmation priority requested for a payment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Priority {
    /// No fee (slow confirmation)
    Low,
    /// Fee per kB from the configuration
    #[default]
    Normal,
    /// Minimum fee charged per kB (fast confirmation)
    High,
}

/// Size based fee calculator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeCalculator {
    fee_per_kb: u64,
    minimum_fee: u64,
    maximum_fee: u64,
}

impl FeeCalculator {
    /// Create with explicit bounds
    pub fn new(fee_per_kb: u64, minimum_fee: u64, maximum_fee: u64) -> Self {
        Self {
            fee_per_kb,
            minimum_fee,
            maximum_fee,
        }
    }

    /// Create from the ledger configuration
    pub fn from_config(config: &LedgerConfig) -> Self {
        Self::new(config.fee_per_kb, config.minimum_fee, config.maximum_fee)
    }

    /// Fee for a transaction of `size` bytes
    pub fn estimate_fee(&self, size: usize, priority: Priority) -> u64 {
        let rate = match priority {
            Priority::Low => return 0,
            Priority::Normal => self.fee_per_kb,
            Priority::High => self.minimum_fee,
        };

        let kilobytes = (size as u64).div_ceil(1000);
        let fee = kilobytes
            .saturating_mul(rate)
            .max(self.minimum_fee)
            .min(self.maximum_fee);

        tracing::debug!(size, ?priority, fee, "Estimated fee");
        fee
    }

    /// Fee a calculated fee loop starts from
    pub fn initial_fee(&self, priority: Priority) -> u64 {
        match priority {
            Priority::Low => 0,
            Priority::Normal | Priority::High => self.minimum_fee,
        }
    }

    /// Validate a caller supplied fee
    pub fn validate_fee(&self, fee: u64) -> Result<()> {
        if fee > self.maximum_fee {
            return Err(Error::InvalidFee(format!(
                "Fee {} exceeds maximum {}",
                fee, self.maximum_fee
            )));
        }
        Ok(())
    }

    /// Fee per kB at normal priority
    pub fn fee_per_kb(&self) -> u64 {
        self.fee_per_kb
    }

    /// Fee floor
    pub fn minimum_fee(&self) -> u64 {
        self.minimum_fee
    }

    /// Fee ceiling
    pub fn maximum_fee(&self) -> u64 {
        self.maximum_fee
    }
}

impl Default for FeeCalculator {
    fn default() -> Self {
        Self::from_config(&LedgerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimum_fee_floor() {
        let calculator = FeeCalculator::new(1_000, 10_000, 1_000_000);

        assert_eq!(calculator.estimate_fee(1_800, Priority::Normal), 10_000);
        assert_eq!(calculator.estimate_fee(1_800, Priority::Low), 0);
    }

    #[test]
    fn test_started_kilobytes_are_charged() {
        let calculator = FeeCalculator::new(20_000, 10_000, 1_000_000);

        assert_eq!(calculator.estimate_fee(1_000, Priority::Normal), 20_000);
        assert_eq!(calculator.estimate_fee(1_001, Priority::Normal), 40_000);
        assert_eq!(calculator.estimate_fee(0, Priority::Normal), 10_000);
    }

    #[test]
    fn test_high_priority_rate() {
        let calculator = FeeCalculator::new(1_000, 10_000, 1_000_000);

        assert_eq!(calculator.estimate_fee(2_500, Priority::High), 30_000);
    }

    #[test]
    fn test_maximum_fee_cap() {
        let calculator = FeeCalculator::new(1_000, 10_000, 50_000);

        assert_eq!(calculator.estimate_fee(200_000, Priority::High), 50_000);
    }

    #[test]
    fn test_fee_validation() {
        let calculator = FeeCalculator::default();

        assert!(calculator.validate_fee(0).is_ok());
        assert!(calculator.validate_fee(calculator.maximum_fee()).is_ok());
        assert!(matches!(
            calculator.validate_fee(calculator.maximum_fee() + 1),
            Err(Error::InvalidFee(_))
        ));
    }

    #[test]
    fn test_initial_fee() {
        let calculator = FeeCalculator::default();

        assert_eq!(calculator.initial_fee(Priority::Low), 0);
        assert_eq!(calculator.initial_fee(Priority::Normal), calculator.minimum_fee());
    }
}
