//! Bitledger wallet core
//!
//! This crate implements the wallet-side ledger: per-account classification
//! of unspent outputs into buckets, a chain tracker that follows the best
//! chain through reorganizations and double spends, a transaction factory
//! with coin selection, fee sizing and change splitting, and a look-ahead key
//! deriver for hierarchical wallets.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod account;
pub mod address_book;
pub mod chain;
pub mod change;
pub mod deriver;
pub mod error;
pub mod fees;
pub mod keys;
pub mod listener;
pub mod logging;
pub mod monitor;
pub mod payment;
pub mod receiver_change;
pub mod record;
pub mod reservation;
pub mod selection;
pub mod store;
pub mod transaction;
pub mod utxo;
pub mod wallet;

#[cfg(test)]
mod testing;

pub use account::{Account, AccountListener};
pub use address_book::{AddressBook, AddressList, KeyStore};
pub use chain::{ChainTracker, ConfirmationListener, LedgerAccount, DEFAULT_TRUNK_LENGTH};
pub use change::{split_change, ChangePolicy};
pub use deriver::{DeriverState, KeyDeriver, KeyUsage, DEFAULT_LOOK_AHEAD};
pub use error::{Error, ErrorCategory, Result};
pub use fees::{FeeCalculator, Priority};
pub use keys::{DerivedKey, ExtendedKeyChain, KeyChain, MAX_NORMAL_INDEX};
pub use listener::ListenerRegistry;
pub use logging::init_logging;
pub use monitor::{PaymentRequest, PaymentRequestListener, PaymentRequestMonitor, RequestConfirmation};
pub use payment::{FeeCalculation, FeeSource, OutputOrder, PaymentOptions};
pub use receiver_change::{ReceiverChangeKeys, CHANGE_CHAIN, RECEIVE_CHAIN};
pub use record::{Block, BlockRef, ConfirmationStatus, Rejection, TransactionRecord};
pub use reservation::InputReservations;
pub use selection::{CoinSelector, SelectionResult};
pub use store::{in_memory_factory, Bucket, Buckets, InMemoryUtxoStore, StoreFactory, UtxoStore};
pub use transaction::{ConsensusSizer, SignedTransaction, TransactionFactory, TransactionSizer};
pub use utxo::{Output, OutputValue};
pub use wallet::{Wallet, WalletType};
