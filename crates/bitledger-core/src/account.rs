//! Ledger reconciler
//!
//! An [`Account`] ingests transaction snapshots and keeps its outputs sorted
//! into four disjoint buckets (see [`Bucket`]). It detects conflicting spends
//! of its own inputs, voids the loser, and keeps every known transaction that
//! touches it.
//!
//! All state sits behind one lock. Listeners are notified after that lock is
//! released, so they may query the account from inside the callback.

use bitcoin::{Address, Network, OutPoint, Txid};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

use crate::address_book::AddressBook;
use crate::listener::ListenerRegistry;
use crate::record::{ConfirmationStatus, Rejection, TransactionRecord};
use crate::store::{in_memory_factory, Bucket, Buckets, StoreFactory};
use crate::utxo::Output;

/// Receives account changes
pub trait AccountListener: Send + Sync {
    /// A transaction changed the account's buckets or was voided
    fn account_changed(&self, account: &Account, record: &TransactionRecord) -> anyhow::Result<()>;
}

struct KnownTransaction {
    record: TransactionRecord,
    spending: bool,
    consumed: Vec<(Bucket, Output)>,
}

struct AccountState {
    buckets: Buckets,
    known: HashMap<Txid, KnownTransaction>,
    spenders: HashMap<OutPoint, Txid>,
    created: u64,
}

impl AccountState {
    fn new(factory: &StoreFactory, created: u64) -> Self {
        Self {
            buckets: Buckets::new(factory),
            known: HashMap::new(),
            spenders: HashMap::new(),
            created,
        }
    }

    fn forget(&mut self, txid: &Txid) -> Option<KnownTransaction> {
        let known = self.known.remove(txid)?;
        for outpoint in known.record.spent_outpoints() {
            if self.spenders.get(&outpoint) == Some(txid) {
                self.spenders.remove(&outpoint);
            }
        }
        Some(known)
    }

    fn evict_outputs(&mut self, record: &TransactionRecord) -> bool {
        let mut removed = false;
        for outpoint in record.created_outpoints() {
            if let Some((bucket, output)) = self.buckets.evict(&outpoint) {
                tracing::trace!(%outpoint, %bucket, value = output.value, "Output evicted");
                removed = true;
            }
        }
        removed
    }

    fn restore(&mut self, consumed: Vec<(Bucket, Output)>) {
        for (bucket, output) in consumed {
            let outpoint = output.outpoint;
            if self.spenders.contains_key(&outpoint) || self.buckets.locate(&outpoint).is_some() {
                continue;
            }
            tracing::trace!(%outpoint, %bucket, "Output restored");
            self.buckets.insert(bucket, output);
        }
    }
}

/// Outcome of applying one record while the lock is held
struct Applied {
    modified: bool,
    notify: Vec<TransactionRecord>,
    observed: Vec<Address>,
}

/// One account's reconciled view of the ledger
pub struct Account {
    name: String,
    network: Network,
    book: Arc<dyn AddressBook>,
    factory: StoreFactory,
    state: Mutex<AccountState>,
    listeners: ListenerRegistry<dyn AccountListener>,
}

impl Account {
    /// Create an account backed by in-memory stores
    pub fn new(name: impl Into<String>, book: Arc<dyn AddressBook>, network: Network) -> Self {
        Self::with_store_factory(name, book, network, in_memory_factory())
    }

    /// Create an account whose buckets come from `factory`
    pub fn with_store_factory(
        name: impl Into<String>,
        book: Arc<dyn AddressBook>,
        network: Network,
        factory: StoreFactory,
    ) -> Self {
        let created = chrono::Utc::now().timestamp().max(0) as u64;
        Self {
            name: name.into(),
            network,
            state: Mutex::new(AccountState::new(&factory, created)),
            book,
            factory,
            listeners: ListenerRegistry::new(),
        }
    }

    /// Account name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Network outputs are decoded for
    pub fn network(&self) -> Network {
        self.network
    }

    /// Ownership predicate of the account
    pub fn address_book(&self) -> &Arc<dyn AddressBook> {
        &self.book
    }

    /// Whether outputs paid to the address belong to the account
    pub fn is_own_address(&self, address: &Address) -> bool {
        self.book.is_own_address(address)
    }

    /// Addresses tracked by the account
    pub fn addresses(&self) -> Vec<Address> {
        self.book.addresses()
    }

    /// Apply a transaction snapshot, returning whether any bucket changed
    pub fn apply(&self, record: &TransactionRecord) -> bool {
        let applied = {
            let mut state = self.state.lock();
            let applied = if record.is_void() {
                self.apply_void(&mut state, record)
            } else {
                self.apply_live(&mut state, record)
            };
            for address in &applied.observed {
                self.book.observe_output(address);
            }
            applied
        };

        self.notify(&applied.notify);
        applied.modified
    }

    fn apply_void(&self, state: &mut AccountState, record: &TransactionRecord) -> Applied {
        let txid = record.txid();
        let removed = state.evict_outputs(record);
        let forgotten = state.forget(&txid);
        let modified = removed || forgotten.is_some();

        // A voided spend releases its inputs; the conflicting transaction
        // consumes them again when it is applied.
        if let (Some(known), Some(_)) = (forgotten, record.offending()) {
            state.restore(known.consumed);
        }

        if modified {
            tracing::debug!(
                account = %self.name,
                %txid,
                expired = record.is_expired(),
                offending = ?record.offending(),
                "Transaction removed"
            );
        }

        Applied {
            modified,
            notify: if modified { vec![record.clone()] } else { Vec::new() },
            observed: Vec::new(),
        }
    }

    fn apply_live(&self, state: &mut AccountState, record: &TransactionRecord) -> Applied {
        let txid = record.txid();
        let confirmed = record.is_confirmed();
        let mut modified = false;
        let mut notify = Vec::new();
        let mut consumed = Vec::new();

        // Conflicting spends of the same outpoint void the earlier transaction.
        let spent: Vec<OutPoint> = record.spent_outpoints().collect();
        for outpoint in &spent {
            let Some(&other) = state.spenders.get(outpoint) else {
                continue;
            };
            if other == txid {
                continue;
            }
            let Some(victim) = state.forget(&other) else {
                continue;
            };

            let voided = victim
                .record
                .with_status(ConfirmationStatus::DoubleSpent { offending: txid });
            state.evict_outputs(&voided);

            let (taken, released): (Vec<_>, Vec<_>) = victim
                .consumed
                .into_iter()
                .partition(|(_, output)| spent.contains(&output.outpoint));
            consumed.extend(taken);
            state.restore(released);

            tracing::info!(account = %self.name, victim = %other, %txid, "Double spend voided");
            notify.push(voided);
            modified = true;
        }

        for outpoint in &spent {
            if let Some((bucket, output)) = state.buckets.consume(outpoint) {
                tracing::trace!(%outpoint, %bucket, value = output.value, "Input consumed");
                consumed.push((bucket, output));
                modified = true;
            }
        }

        let previous = state.known.remove(&txid);
        let spending =
            !consumed.is_empty() || previous.as_ref().map_or(false, |known| known.spending);

        let mut touched = spending;
        let mut observed = Vec::new();
        for (vout, tx_out) in record.tx().output.iter().enumerate() {
            let outpoint = OutPoint::new(txid, vout as u32);
            let prior = state.buckets.evict(&outpoint).map(|(bucket, _)| bucket);
            let output = Output::from_tx_out(outpoint, tx_out, self.network);
            let owned = output
                .address
                .as_ref()
                .map_or(false, |address| self.book.is_own_address(address));
            touched |= owned;

            // Spent by a known transaction: stays out of every bucket.
            let target = if state.spenders.contains_key(&outpoint) {
                None
            } else {
                classify(owned, confirmed, spending)
            };

            match target {
                Some(bucket) => {
                    if owned {
                        if let Some(address) = &output.address {
                            observed.push(address.clone());
                        }
                    }
                    if prior != Some(bucket) {
                        tracing::trace!(%outpoint, %bucket, value = output.value, "Output filed");
                        modified = true;
                    }
                    state.buckets.insert(bucket, output);
                    touched = true;
                }
                None => modified |= prior.is_some(),
            }
        }

        if touched {
            let mut all_consumed = previous.map(|known| known.consumed).unwrap_or_default();
            all_consumed.extend(consumed);
            for outpoint in &spent {
                state.spenders.insert(*outpoint, txid);
            }
            state.known.insert(
                txid,
                KnownTransaction {
                    record: record.clone(),
                    spending,
                    consumed: all_consumed,
                },
            );
        }

        if modified {
            tracing::debug!(
                account = %self.name,
                %txid,
                confirmed,
                spending,
                "Transaction applied"
            );
            notify.push(record.clone());
        }

        Applied {
            modified,
            notify,
            observed,
        }
    }

    /// Revert a rejected, still unconfirmed transaction.
    ///
    /// Its outputs are removed, the outputs it consumed return to the buckets
    /// they came from, and the transaction is forgotten. Returns the reverted
    /// record, marked expired.
    pub fn reject(&self, rejection: &Rejection) -> Option<TransactionRecord> {
        let reverted = {
            let mut state = self.state.lock();
            let confirmed = state
                .known
                .get(&rejection.txid)
                .map(|known| known.record.is_confirmed())?;
            if confirmed {
                tracing::warn!(account = %self.name, %rejection, "Ignoring rejection of confirmed transaction");
                return None;
            }

            let known = state.forget(&rejection.txid)?;
            state.evict_outputs(&known.record);
            state.restore(known.consumed);
            known.record.expire()
        };

        tracing::info!(account = %self.name, %rejection, "Transaction rejected");
        self.notify(std::slice::from_ref(&reverted));
        Some(reverted)
    }

    fn notify(&self, records: &[TransactionRecord]) {
        for record in records {
            self.listeners
                .notify("account_changed", |listener| listener.account_changed(self, record));
        }
    }

    /// Whether the transaction is retained by the account
    pub fn is_known_transaction(&self, txid: &Txid) -> bool {
        self.state.lock().known.contains_key(txid)
    }

    /// Retained snapshot of a transaction
    pub fn transaction(&self, txid: &Txid) -> Option<TransactionRecord> {
        self.state
            .lock()
            .known
            .get(txid)
            .map(|known| known.record.clone())
    }

    /// All retained transactions
    pub fn transactions(&self) -> Vec<TransactionRecord> {
        self.state
            .lock()
            .known
            .values()
            .map(|known| known.record.clone())
            .collect()
    }

    /// Bucket holding the outpoint
    pub fn locate(&self, outpoint: &OutPoint) -> Option<Bucket> {
        self.state.lock().buckets.locate(outpoint)
    }

    /// Total of one bucket
    pub fn total(&self, bucket: Bucket) -> u64 {
        self.state.lock().buckets.total(bucket)
    }

    /// Outputs of one bucket
    pub fn outputs(&self, bucket: Bucket) -> Vec<Output> {
        self.state.lock().buckets.outputs(bucket)
    }

    /// Confirmed plus change plus receiving
    pub fn balance(&self) -> u64 {
        self.state.lock().buckets.balance()
    }

    /// Confirmed total
    pub fn confirmed(&self) -> u64 {
        self.total(Bucket::Confirmed)
    }

    /// Change total
    pub fn change(&self) -> u64 {
        self.total(Bucket::Change)
    }

    /// Receiving total
    pub fn receiving(&self) -> u64 {
        self.total(Bucket::Receiving)
    }

    /// Sending total
    pub fn sending(&self) -> u64 {
        self.total(Bucket::Sending)
    }

    /// Confirmed outputs
    pub fn confirmed_outputs(&self) -> Vec<Output> {
        self.outputs(Bucket::Confirmed)
    }

    /// Change outputs
    pub fn change_outputs(&self) -> Vec<Output> {
        self.outputs(Bucket::Change)
    }

    /// Receiving outputs
    pub fn receiving_outputs(&self) -> Vec<Output> {
        self.outputs(Bucket::Receiving)
    }

    /// Sending outputs
    pub fn sending_outputs(&self) -> Vec<Output> {
        self.outputs(Bucket::Sending)
    }

    /// Earliest time (unix seconds) relevant to the account
    pub fn created(&self) -> u64 {
        self.state.lock().created
    }

    /// Move the creation watermark
    pub fn set_created(&self, created: u64) {
        self.state.lock().created = created;
    }

    /// Drop every output and transaction, keeping the creation watermark
    pub fn reset(&self) {
        let mut state = self.state.lock();
        let created = state.created;
        *state = AccountState::new(&self.factory, created);
        tracing::info!(account = %self.name, "Account reset");
    }

    /// Register a listener
    pub fn add_listener(&self, listener: Arc<dyn AccountListener>) {
        self.listeners.add(listener);
    }

    /// Unregister a listener
    pub fn remove_listener(&self, listener: &Arc<dyn AccountListener>) -> bool {
        self.listeners.remove(listener)
    }
}

impl std::fmt::Debug for Account {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Account")
            .field("name", &self.name)
            .field("buckets", &state.buckets)
            .field("known", &state.known.len())
            .finish()
    }
}

fn classify(owned: bool, confirmed: bool, spending: bool) -> Option<Bucket> {
    match (owned, confirmed, spending) {
        (true, true, _) => Some(Bucket::Confirmed),
        (true, false, true) => Some(Bucket::Change),
        (true, false, false) => Some(Bucket::Receiving),
        (false, false, true) => Some(Bucket::Sending),
        (false, _, _) => None,
    }
}
