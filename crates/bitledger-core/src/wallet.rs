//! Wallet management

use bitcoin::Address;
use bitledger_params::LedgerConfig;
use std::sync::Arc;

use crate::account::Account;
use crate::address_book::KeyStore;
use crate::chain::ChainTracker;
use crate::keys::{ExtendedKeyChain, KeyChain};
use crate::payment::PaymentOptions;
use crate::receiver_change::ReceiverChangeKeys;
use crate::record::{Rejection, TransactionRecord};
use crate::transaction::{SignedTransaction, TransactionFactory};
use crate::{Error, Result};

/// Wallet type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalletType {
    /// Full wallet (can spend)
    Full,
    /// Watch-only (tracks funds, cannot sign)
    WatchOnly,
}

/// One BIP-44 account: keys, reconciled ledger and payment factory
pub struct Wallet {
    wallet_type: WalletType,
    config: LedgerConfig,
    account_key: ExtendedKeyChain,
    keys: Arc<ReceiverChangeKeys>,
    account: Arc<Account>,
    factory: TransactionFactory,
}

impl Wallet {
    /// Create from mnemonic (full wallet)
    pub fn from_mnemonic(
        mnemonic: &str,
        passphrase: &str,
        account_index: u32,
        config: LedgerConfig,
    ) -> Result<Self> {
        config.validate()?;
        let account_key = ExtendedKeyChain::from_mnemonic(
            mnemonic,
            passphrase,
            &config.network_params(),
            account_index,
        )?;
        Self::assemble(WalletType::Full, account_key, config)
    }

    /// Create from an account-level extended public key (watch-only wallet)
    pub fn watch_only(xpub: &str, config: LedgerConfig) -> Result<Self> {
        config.validate()?;
        let network = config.network_params().bitcoin_network();
        let account_key = ExtendedKeyChain::from_xpub_str(xpub, network)?;
        Self::assemble(WalletType::WatchOnly, account_key, config)
    }

    fn assemble(
        wallet_type: WalletType,
        account_key: ExtendedKeyChain,
        config: LedgerConfig,
    ) -> Result<Self> {
        let keys = Arc::new(ReceiverChangeKeys::new(&account_key, config.look_ahead)?);
        let account = Arc::new(Account::new(
            account_key.xpub().fingerprint().to_string(),
            keys.clone(),
            account_key.network(),
        ));
        let factory = TransactionFactory::new(account.clone(), keys.clone(), &config);

        tracing::info!(
            account = %account.name(),
            ?wallet_type,
            network = ?config.network,
            "Wallet opened"
        );

        Ok(Self {
            wallet_type,
            config,
            account_key,
            keys,
            account,
            factory,
        })
    }

    /// Get wallet type
    pub fn wallet_type(&self) -> WalletType {
        self.wallet_type
    }

    /// Check if watch-only
    pub fn is_watch_only(&self) -> bool {
        self.wallet_type == WalletType::WatchOnly
    }

    /// Configuration the wallet was opened with
    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    /// Export the account xpub for a watch-only copy
    pub fn export_xpub(&self) -> String {
        self.account_key.xpub().to_string()
    }

    /// Receiving and change keys
    pub fn keys(&self) -> &Arc<ReceiverChangeKeys> {
        &self.keys
    }

    /// Reconciled ledger
    pub fn account(&self) -> &Arc<Account> {
        &self.account
    }

    /// Payment factory
    pub fn factory(&self) -> &TransactionFactory {
        &self.factory
    }

    /// Track confirmations through `tracker`
    pub fn register(&self, tracker: &ChainTracker) {
        tracker.add_account(self.account.clone());
    }

    /// Stop tracking confirmations through `tracker`
    pub fn unregister(&self, tracker: &ChainTracker) -> bool {
        tracker.remove_account(&self.account)
    }

    /// Next unused receiving address
    pub fn receive_address(&self) -> Result<Address> {
        self.keys.next_receive_address()
    }

    /// Confirmed, change and receiving funds
    pub fn balance(&self) -> u64 {
        self.account.balance()
    }

    /// Confirmed and change funds available to payments
    pub fn spendable(&self) -> u64 {
        self.account.confirmed() + self.account.change()
    }

    /// Build and sign a payment
    pub fn pay(
        &self,
        receivers: &[Address],
        amounts: &[u64],
        options: &PaymentOptions,
    ) -> Result<SignedTransaction> {
        if self.is_watch_only() {
            return Err(Error::MissingKey(
                "Watch-only wallet cannot sign payments".to_string(),
            ));
        }
        self.factory.pay(receivers, amounts, options)
    }

    /// Apply an observed or broadcast transaction
    pub fn apply(&self, record: &TransactionRecord) -> bool {
        self.account.apply(record)
    }

    /// Revert a transaction the network rejected
    pub fn reject(&self, rejection: &Rejection) -> Option<TransactionRecord> {
        self.factory.reject(rejection)
    }
}

impl std::fmt::Debug for Wallet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Wallet")
            .field("wallet_type", &self.wallet_type)
            .field("account", &self.account)
            .finish()
    }
}
