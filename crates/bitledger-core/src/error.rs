//! Error types for Bitledger Core
//!
//! Validation errors are returned synchronously from the transaction factory
//! and the key deriver. Listener faults never surface here; they are logged at
//! the notification boundary.

use std::fmt;

/// Result type
pub type Result<T> = std::result::Result<T, Error>;

/// Bitledger Core errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Spendable outputs do not cover amount plus fee
    #[error("Insufficient funds: {0}")]
    InsufficientFunds(String),

    /// Fee outside the configured bounds, or not coverable by the receivers
    #[error("Invalid fee: {0}")]
    InvalidFee(String),

    /// Inputs do not equal outputs plus fee
    #[error("Unbalanced transaction: {0}")]
    UnbalancedTransaction(String),

    /// Output script cannot be spent by this wallet
    #[error("Unspendable output: {0}")]
    UnspendableOutput(String),

    /// No signing key is known for an input's address
    #[error("Missing key: {0}")]
    MissingKey(String),

    /// Deriving further keys would leave the non-hardened index range
    #[error("Look-ahead exhausted: {0}")]
    LookAheadExhausted(String),

    /// Key derivation failed
    #[error("Key derivation error: {0}")]
    KeyDerivation(String),

    /// Key material could not be parsed
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// Mnemonic phrase could not be parsed
    #[error("Invalid mnemonic: {0}")]
    InvalidMnemonic(String),

    /// Amount is zero or otherwise unusable
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    /// Amount arithmetic overflowed
    #[error("Amount overflow: {0}")]
    AmountOverflow(String),

    /// Receivers and amounts do not describe a payment
    #[error("Invalid payment: {0}")]
    InvalidPayment(String),

    /// Receiver-paid fee consumed every output
    #[error("No outputs left: {0}")]
    NoOutputsLeft(String),

    /// Calculated fee did not settle within the iteration cap
    #[error("Fee did not converge: {0}")]
    FeeConvergence(String),

    /// Change could not be split without dust within the attempt cap
    #[error("Change split exhausted: {0}")]
    ChangeSplitExhausted(String),

    /// Signing an input failed
    #[error("Transaction signing error: {0}")]
    TransactionSigning(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] bitledger_params::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Check if error is a user-facing error (vs internal error)
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            Error::InsufficientFunds(_)
                | Error::InvalidFee(_)
                | Error::InvalidAmount(_)
                | Error::InvalidPayment(_)
                | Error::NoOutputsLeft(_)
                | Error::InvalidMnemonic(_)
        )
    }

    /// Get user-friendly error message
    pub fn user_message(&self) -> String {
        match self {
            Error::InsufficientFunds(_) => {
                "You don't have enough confirmed funds for this payment.".to_string()
            }
            Error::InvalidFee(_) => "The fee is outside the allowed range.".to_string(),
            Error::InvalidAmount(_) => {
                "The amount is invalid. Please enter a positive amount.".to_string()
            }
            Error::NoOutputsLeft(_) => {
                "The fee would consume every payment output.".to_string()
            }
            Error::InvalidMnemonic(_) => {
                "The recovery phrase is invalid. Please check and try again.".to_string()
            }
            _ => self.to_string(),
        }
    }

    /// Get error category for logging
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::InsufficientFunds(_)
            | Error::InvalidAmount(_)
            | Error::AmountOverflow(_)
            | Error::InvalidPayment(_) => ErrorCategory::Amount,
            Error::InvalidFee(_) | Error::FeeConvergence(_) | Error::NoOutputsLeft(_) => {
                ErrorCategory::Fee
            }
            Error::UnbalancedTransaction(_)
            | Error::UnspendableOutput(_)
            | Error::ChangeSplitExhausted(_)
            | Error::TransactionSigning(_) => ErrorCategory::Transaction,
            Error::MissingKey(_)
            | Error::LookAheadExhausted(_)
            | Error::KeyDerivation(_)
            | Error::InvalidKey(_)
            | Error::InvalidMnemonic(_) => ErrorCategory::Keys,
            Error::Config(_) => ErrorCategory::Config,
            Error::Other(_) => ErrorCategory::Internal,
        }
    }
}

/// Error categories for classification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Amount-related errors
    Amount,
    /// Fee-related errors
    Fee,
    /// Transaction assembly errors
    Transaction,
    /// Key-related errors
    Keys,
    /// Configuration errors
    Config,
    /// Internal/system errors
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::Amount => write!(f, "Amount"),
            ErrorCategory::Fee => write!(f, "Fee"),
            ErrorCategory::Transaction => write!(f, "Transaction"),
            ErrorCategory::Keys => write!(f, "Keys"),
            ErrorCategory::Config => write!(f, "Config"),
            ErrorCategory::Internal => write!(f, "Internal"),
        }
    }
}
