//! Chain tracker
//!
//! Maintains a bounded trunk of block hashes shared by all registered accounts,
//! detects reorganizations against it, and republishes confirmation and height
//! changes. Transactions confirmed in trunk blocks are indexed by the outpoints
//! they spend so a conflicting confirmation voids the earlier spend for every
//! account.
//!
//! Lock order: tracker, then account, then key deriver. Accounts never call
//! back into the tracker. Confirmation listeners run after the tracker lock is
//! released.

use bitcoin::{BlockHash, OutPoint, Txid};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use crate::account::Account;
use crate::listener::ListenerRegistry;
use crate::record::{Block, BlockRef, ConfirmationStatus, TransactionRecord};

pub use bitledger_params::DEFAULT_TRUNK_LENGTH;

/// Account as seen by the chain tracker
pub trait LedgerAccount: Send + Sync {
    /// Apply a snapshot, returning whether the account changed
    fn apply(&self, record: &TransactionRecord) -> bool;

    /// Whether the account retains the transaction
    fn is_known_transaction(&self, txid: &Txid) -> bool;
}

impl LedgerAccount for Account {
    fn apply(&self, record: &TransactionRecord) -> bool {
        Account::apply(self, record)
    }

    fn is_known_transaction(&self, txid: &Txid) -> bool {
        Account::is_known_transaction(self, txid)
    }
}

/// Receives confirmation and height changes
pub trait ConfirmationListener: Send + Sync {
    /// Confirmation status of a tracked transaction changed.
    ///
    /// Called with a confirmed snapshot, with an unconfirmed one after a
    /// reorganization, and with a double-spent one when a conflicting spend
    /// confirmed.
    fn confirmed(&self, record: &TransactionRecord) -> anyhow::Result<()>;

    /// The trunk tip moved to `height`
    fn new_height(&self, height: u32) -> anyhow::Result<()>;
}

enum ConfirmationEvent {
    Status(TransactionRecord),
    Height(u32),
}

#[derive(Default)]
struct TrackerState {
    trunk: VecDeque<BlockHash>,
    confirmations: HashMap<BlockHash, Vec<Txid>>,
    cached: HashMap<Txid, TransactionRecord>,
    inputs: HashMap<OutPoint, HashSet<Txid>>,
    height: u32,
    accounts: Vec<Arc<dyn LedgerAccount>>,
}

impl TrackerState {
    fn index(&mut self, record: TransactionRecord) {
        let txid = record.txid();
        for outpoint in record.spent_outpoints() {
            self.inputs.entry(outpoint).or_default().insert(txid);
        }
        if let Some(block) = record.block() {
            self.confirmations.entry(block.hash).or_default().push(txid);
        }
        self.cached.insert(txid, record);
    }

    fn forget(&mut self, txid: &Txid) -> Option<TransactionRecord> {
        let record = self.cached.remove(txid)?;
        for outpoint in record.spent_outpoints() {
            if let Some(spenders) = self.inputs.get_mut(&outpoint) {
                spenders.remove(txid);
                if spenders.is_empty() {
                    self.inputs.remove(&outpoint);
                }
            }
        }
        if let Some(block) = record.block() {
            if let Some(txids) = self.confirmations.get_mut(&block.hash) {
                txids.retain(|t| t != txid);
            }
        }
        Some(record)
    }

    /// Clear the confirmation of everything cached under `hash`
    fn unconfirm_block(&mut self, hash: &BlockHash, reorged: &mut HashMap<Txid, TransactionRecord>) {
        for txid in self.confirmations.remove(hash).unwrap_or_default() {
            if let Some(record) = self.cached.get_mut(&txid) {
                *record = record.with_status(ConfirmationStatus::Unconfirmed);
                reorged.insert(txid, record.clone());
            }
        }
    }

    /// Conflicting spends of the record's inputs
    fn conflicts(&self, record: &TransactionRecord) -> Vec<Txid> {
        let txid = record.txid();
        let mut victims: Vec<Txid> = record
            .spent_outpoints()
            .filter_map(|outpoint| self.inputs.get(&outpoint))
            .flatten()
            .filter(|victim| **victim != txid)
            .copied()
            .collect();
        victims.sort();
        victims.dedup();
        victims
    }
}

/// Trunk of recent blocks and confirmation cache
pub struct ChainTracker {
    trunk_length: usize,
    state: Mutex<TrackerState>,
    listeners: ListenerRegistry<dyn ConfirmationListener>,
}

impl ChainTracker {
    /// Create with an empty trunk
    pub fn new(trunk_length: usize) -> Self {
        Self {
            trunk_length: trunk_length.max(1),
            state: Mutex::new(TrackerState::default()),
            listeners: ListenerRegistry::new(),
        }
    }

    /// Create with a trunk seeded from a known inventory (oldest first)
    pub fn with_inventory(trunk_length: usize, inventory: &[BlockHash], height: u32) -> Self {
        let tracker = Self::new(trunk_length);
        {
            let mut state = tracker.state.lock();
            let skip = inventory.len().saturating_sub(tracker.trunk_length);
            state.trunk = inventory.iter().skip(skip).copied().collect();
            state.height = height;
        }
        tracker
    }

    /// Height of the trunk tip
    pub fn height(&self) -> u32 {
        self.state.lock().height
    }

    /// Hash of the trunk tip
    pub fn tip(&self) -> Option<BlockHash> {
        self.state.lock().trunk.back().copied()
    }

    /// Trunk hashes, oldest first
    pub fn trunk(&self) -> Vec<BlockHash> {
        self.state.lock().trunk.iter().copied().collect()
    }

    /// Configured trunk bound
    pub fn trunk_length(&self) -> usize {
        self.trunk_length
    }

    /// Block a cached transaction is confirmed in
    pub fn confirmation(&self, txid: &Txid) -> Option<BlockRef> {
        self.state.lock().cached.get(txid).and_then(|record| record.block())
    }

    /// Whether the transaction is held in the confirmation cache
    pub fn is_cached(&self, txid: &Txid) -> bool {
        self.state.lock().cached.contains_key(txid)
    }

    /// Register an account
    pub fn add_account(&self, account: Arc<dyn LedgerAccount>) {
        let mut state = self.state.lock();
        if !state.accounts.iter().any(|a| Arc::ptr_eq(a, &account)) {
            state.accounts.push(account);
        }
    }

    /// Unregister an account, returning whether it was registered
    pub fn remove_account<A: ?Sized>(&self, account: &Arc<A>) -> bool {
        let mut state = self.state.lock();
        let before = state.accounts.len();
        state
            .accounts
            .retain(|a| !std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(account)));
        state.accounts.len() != before
    }

    /// Register a confirmation listener
    pub fn add_confirmation_listener(&self, listener: Arc<dyn ConfirmationListener>) {
        self.listeners.add(listener);
    }

    /// Unregister a confirmation listener
    pub fn remove_confirmation_listener(&self, listener: &Arc<dyn ConfirmationListener>) -> bool {
        self.listeners.remove(listener)
    }

    /// Extend the trunk with `added` blocks, oldest first.
    ///
    /// The first block's parent decides whether this is an extension, a
    /// reorganization back to a trunk block, or a full replacement.
    pub fn trunk_update(&self, added: &[Block]) {
        if added.is_empty() {
            tracing::debug!("Ignoring empty trunk update");
            return;
        }

        let events = {
            let mut state = self.state.lock();
            self.update_locked(&mut state, added)
        };

        for event in events {
            match event {
                ConfirmationEvent::Status(record) => self
                    .listeners
                    .notify("confirmed", |listener| listener.confirmed(&record)),
                ConfirmationEvent::Height(height) => self
                    .listeners
                    .notify("new_height", |listener| listener.new_height(height)),
            }
        }
    }

    fn update_locked(&self, state: &mut TrackerState, added: &[Block]) -> Vec<ConfirmationEvent> {
        let accounts = state.accounts.clone();
        let mut events = Vec::new();
        let mut reorged: HashMap<Txid, TransactionRecord> = HashMap::new();

        let prev = added[0].prev_hash;
        if state.trunk.back().is_some_and(|tip| *tip != prev) {
            if state.trunk.contains(&prev) {
                while let Some(popped) = state.trunk.pop_back() {
                    if popped == prev {
                        state.trunk.push_back(popped);
                        break;
                    }
                    state.unconfirm_block(&popped, &mut reorged);
                    tracing::debug!(block = %popped, "Block removed by reorganization");
                }
                tracing::info!(
                    fork = %prev,
                    unconfirmed = reorged.len(),
                    "Chain reorganization"
                );
            } else {
                tracing::warn!(
                    prev = %prev,
                    trunk = state.trunk.len(),
                    "No common ancestor in trunk, replacing it"
                );
                let hashes: Vec<BlockHash> = state.trunk.drain(..).collect();
                for hash in hashes {
                    state.unconfirm_block(&hash, &mut reorged);
                }
                let stale: Vec<BlockHash> = state.confirmations.keys().copied().collect();
                for hash in stale {
                    state.unconfirm_block(&hash, &mut reorged);
                }
            }
        }

        for block in added {
            state.trunk.push_back(block.hash);
            let block_ref = block.block_ref();

            for tx in &block.transactions {
                let record = TransactionRecord::from_arc(tx.clone())
                    .with_status(ConfirmationStatus::Confirmed(block_ref));
                let txid = record.txid();
                reorged.remove(&txid);

                for victim in state.conflicts(&record) {
                    let Some(previous) = state.forget(&victim) else {
                        continue;
                    };
                    reorged.remove(&victim);
                    let voided =
                        previous.with_status(ConfirmationStatus::DoubleSpent { offending: txid });
                    for account in &accounts {
                        account.apply(&voided);
                    }
                    tracing::info!(%victim, offending = %txid, "Double spend confirmed");
                    events.push(ConfirmationEvent::Status(voided));
                }

                let mut relevant = false;
                for account in &accounts {
                    let modified = account.apply(&record);
                    relevant |= modified || account.is_known_transaction(&txid);
                }

                if relevant {
                    // A re-confirmed transaction may still sit under an older block.
                    state.forget(&txid);
                    state.index(record.clone());
                    events.push(ConfirmationEvent::Status(record));
                }
            }

            state.height = block.height;
            tracing::debug!(block = %block.hash, height = block.height, "Block added to trunk");
        }

        // Unconfirmed records leave the cache once the accounts have them;
        // the accounts' own input index catches later conflicts.
        for record in reorged.into_values() {
            state.forget(&record.txid());
            for account in &accounts {
                account.apply(&record);
            }
            events.push(ConfirmationEvent::Status(record));
        }

        while state.trunk.len() > self.trunk_length {
            if let Some(oldest) = state.trunk.pop_front() {
                for txid in state.confirmations.remove(&oldest).unwrap_or_default() {
                    state.forget(&txid);
                }
            }
        }

        events.push(ConfirmationEvent::Height(state.height));
        events
    }
}

impl Default for ChainTracker {
    fn default() -> Self {
        Self::new(DEFAULT_TRUNK_LENGTH)
    }
}

impl std::fmt::Debug for ChainTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("ChainTracker")
            .field("height", &state.height)
            .field("trunk", &state.trunk.len())
            .field("cached", &state.cached.len())
            .field("accounts", &state.accounts.len())
            .finish()
    }
}
