//! Payment options

use crate::fees::Priority;

/// Who pays the fee
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FeeSource {
    /// Added on top of the requested amounts
    #[default]
    Sender,
    /// Deducted from the requested outputs, last output first
    Receiver,
}

/// How the fee is determined
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FeeCalculation {
    /// Exactly this fee
    Fixed(u64),
    /// Estimated from the serialized size
    #[default]
    Calculated,
}

/// Ordering of the outputs in the final transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputOrder {
    /// Receivers in request order, change last
    Fixed,
    /// Random permutation
    #[default]
    Shuffled,
}

/// Options of one payment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaymentOptions {
    /// Confirmation priority
    pub priority: Priority,
    /// Who pays the fee
    pub fee_source: FeeSource,
    /// Fixed or calculated fee
    pub fee_calculation: FeeCalculation,
    /// Output ordering
    pub output_order: OutputOrder,
    /// Number of change outputs to split change into
    pub change: usize,
}

impl Default for PaymentOptions {
    fn default() -> Self {
        Self {
            priority: Priority::Normal,
            fee_source: FeeSource::Sender,
            fee_calculation: FeeCalculation::Calculated,
            output_order: OutputOrder::Shuffled,
            change: bitledger_params::DEFAULT_CHANGE_OUTPUTS,
        }
    }
}

impl PaymentOptions {
    /// Options with a fixed fee
    pub fn fixed_fee(fee: u64) -> Self {
        Self {
            fee_calculation: FeeCalculation::Fixed(fee),
            ..Self::default()
        }
    }

    /// Set the priority
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Set who pays the fee
    pub fn with_fee_source(mut self, fee_source: FeeSource) -> Self {
        self.fee_source = fee_source;
        self
    }

    /// Set the output ordering
    pub fn with_output_order(mut self, output_order: OutputOrder) -> Self {
        self.output_order = output_order;
        self
    }

    /// Set the number of change outputs
    pub fn with_change_outputs(mut self, change: usize) -> Self {
        self.change = change;
        self
    }
}
