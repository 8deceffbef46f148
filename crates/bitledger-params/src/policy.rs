//! Ledger policy constants
//!
//! Amounts are in satoshis.

/// Outputs at or below this value are dust and are never created as change.
pub const DUST_LIMIT: u64 = 5_430;

/// Fee charged per started kilobyte of serialized transaction.
pub const KB_FEE: u64 = 1_000;

/// Lowest fee a calculated fee is raised to (unless priority is low).
/// Also the quantum used when splitting change.
pub const MINIMUM_FEE: u64 = 10_000;

/// Highest fee the factory will ever attach to a transaction.
pub const MAXIMUM_FEE: u64 = 1_000_000;

/// Unused addresses kept derived past the highest used index.
pub const DEFAULT_LOOK_AHEAD: u32 = 10;

/// Block hashes kept in the trunk for reorganization detection.
pub const DEFAULT_TRUNK_LENGTH: usize = 144;

/// Default number of change outputs per payment.
pub const DEFAULT_CHANGE_OUTPUTS: usize = 1;

/// Upper bound on assemble/measure rounds when the fee is calculated.
pub const MAX_FEE_ITERATIONS: u32 = 16;

/// Upper bound on resampling rounds when splitting change.
pub const MAX_CHANGE_SPLIT_ATTEMPTS: u32 = 1_000;
