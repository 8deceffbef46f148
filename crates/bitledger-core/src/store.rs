//! UTXO stores and the per-account bucket set
//!
//! Every account classifies its outputs into four buckets, each backed by its
//! own [`UtxoStore`]. The store is a trait so persistent backends can replace
//! [`InMemoryUtxoStore`]; the account only needs keyed access and a running
//! total.

use bitcoin::OutPoint;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::utxo::Output;

/// Keyed output storage with total-value aggregation
pub trait UtxoStore: Send {
    /// Insert an output, replacing any output with the same outpoint
    fn add(&mut self, output: Output);

    /// Look up an output
    fn get(&self, outpoint: &OutPoint) -> Option<&Output>;

    /// Remove and return an output
    fn remove(&mut self, outpoint: &OutPoint) -> Option<Output>;

    /// Whether the outpoint is stored
    fn contains(&self, outpoint: &OutPoint) -> bool {
        self.get(outpoint).is_some()
    }

    /// Copy of all stored outputs
    fn outputs(&self) -> Vec<Output>;

    /// Sum of all stored values
    fn total(&self) -> u64;

    /// Number of stored outputs
    fn len(&self) -> usize;

    /// Whether the store is empty
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Hash-map backed store
#[derive(Debug, Default, Clone)]
pub struct InMemoryUtxoStore {
    outputs: HashMap<OutPoint, Output>,
    total: u64,
}

impl InMemoryUtxoStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }
}

impl UtxoStore for InMemoryUtxoStore {
    fn add(&mut self, output: Output) {
        let value = output.value;
        if let Some(previous) = self.outputs.insert(output.outpoint, output) {
            self.total -= previous.value;
        }
        self.total += value;
    }

    fn get(&self, outpoint: &OutPoint) -> Option<&Output> {
        self.outputs.get(outpoint)
    }

    fn remove(&mut self, outpoint: &OutPoint) -> Option<Output> {
        let removed = self.outputs.remove(outpoint)?;
        self.total -= removed.value;
        Some(removed)
    }

    fn outputs(&self) -> Vec<Output> {
        self.outputs.values().cloned().collect()
    }

    fn total(&self) -> u64 {
        self.total
    }

    fn len(&self) -> usize {
        self.outputs.len()
    }
}

/// Classification of an account's outputs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Bucket {
    /// Owned outputs of confirmed transactions
    Confirmed,
    /// Owned outputs of unconfirmed transactions that spent account funds
    Change,
    /// Owned outputs of unconfirmed transactions that did not
    Receiving,
    /// Foreign outputs of unconfirmed transactions that spent account funds
    Sending,
}

impl Bucket {
    /// All buckets
    pub const ALL: [Bucket; 4] = [
        Bucket::Confirmed,
        Bucket::Change,
        Bucket::Receiving,
        Bucket::Sending,
    ];

    /// Buckets an input may consume from, in lookup order
    pub const SPENDABLE: [Bucket; 3] = [Bucket::Confirmed, Bucket::Change, Bucket::Receiving];

    fn slot(self) -> usize {
        match self {
            Bucket::Confirmed => 0,
            Bucket::Change => 1,
            Bucket::Receiving => 2,
            Bucket::Sending => 3,
        }
    }
}

impl fmt::Display for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Bucket::Confirmed => write!(f, "confirmed"),
            Bucket::Change => write!(f, "change"),
            Bucket::Receiving => write!(f, "receiving"),
            Bucket::Sending => write!(f, "sending"),
        }
    }
}

/// Creates the backing store for each bucket
pub type StoreFactory = Arc<dyn Fn(Bucket) -> Box<dyn UtxoStore> + Send + Sync>;

/// Factory producing [`InMemoryUtxoStore`]s
pub fn in_memory_factory() -> StoreFactory {
    Arc::new(|_| Box::new(InMemoryUtxoStore::new()))
}

/// The four disjoint buckets of one account
pub struct Buckets {
    stores: [Box<dyn UtxoStore>; 4],
}

impl Buckets {
    /// Create empty buckets from a factory
    pub fn new(factory: &StoreFactory) -> Self {
        Self {
            stores: Bucket::ALL.map(|bucket| factory(bucket)),
        }
    }

    /// Store backing a bucket
    pub fn store(&self, bucket: Bucket) -> &dyn UtxoStore {
        self.stores[bucket.slot()].as_ref()
    }

    /// Bucket currently holding the outpoint
    pub fn locate(&self, outpoint: &OutPoint) -> Option<Bucket> {
        Bucket::ALL
            .into_iter()
            .find(|bucket| self.store(*bucket).contains(outpoint))
    }

    /// Remove the outpoint from whichever bucket holds it
    pub fn evict(&mut self, outpoint: &OutPoint) -> Option<(Bucket, Output)> {
        let bucket = self.locate(outpoint)?;
        let output = self.stores[bucket.slot()].remove(outpoint)?;
        Some((bucket, output))
    }

    /// Remove the outpoint from the first spendable bucket holding it
    pub fn consume(&mut self, outpoint: &OutPoint) -> Option<(Bucket, Output)> {
        Bucket::SPENDABLE.into_iter().find_map(|bucket| {
            self.stores[bucket.slot()]
                .remove(outpoint)
                .map(|output| (bucket, output))
        })
    }

    /// File an output; the caller has already evicted any prior occupant
    pub fn insert(&mut self, bucket: Bucket, output: Output) {
        self.stores[bucket.slot()].add(output);
    }

    /// Total value of a bucket
    pub fn total(&self, bucket: Bucket) -> u64 {
        self.store(bucket).total()
    }

    /// Copy of a bucket's outputs
    pub fn outputs(&self, bucket: Bucket) -> Vec<Output> {
        self.store(bucket).outputs()
    }

    /// Confirmed plus change plus receiving
    pub fn balance(&self) -> u64 {
        Bucket::SPENDABLE
            .into_iter()
            .map(|bucket| self.total(bucket))
            .sum()
    }
}

impl fmt::Debug for Buckets {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("Buckets");
        for bucket in Bucket::ALL {
            let store = self.store(bucket);
            debug.field(&bucket.to_string(), &(store.len(), store.total()));
        }
        debug.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::hashes::Hash;
    use bitcoin::{ScriptBuf, Txid};

    fn output(tag: u8, vout: u32, value: u64) -> Output {
        Output {
            outpoint: OutPoint::new(Txid::from_byte_array([tag; 32]), vout),
            value,
            script_pubkey: ScriptBuf::new(),
            address: None,
        }
    }

    #[test]
    fn test_store_totals() {
        let mut store = InMemoryUtxoStore::new();
        store.add(output(1, 0, 5_000));
        store.add(output(1, 1, 7_000));
        assert_eq!(store.total(), 12_000);
        assert_eq!(store.len(), 2);

        // Replacing the same outpoint does not double count
        store.add(output(1, 1, 3_000));
        assert_eq!(store.total(), 8_000);

        let removed = store.remove(&output(1, 0, 0).outpoint).unwrap();
        assert_eq!(removed.value, 5_000);
        assert_eq!(store.total(), 3_000);
        assert!(store.remove(&output(1, 0, 0).outpoint).is_none());
    }

    #[test]
    fn test_locate_and_evict() {
        let mut buckets = Buckets::new(&in_memory_factory());
        let change = output(2, 0, 20_000);
        buckets.insert(Bucket::Change, change.clone());

        assert_eq!(buckets.locate(&change.outpoint), Some(Bucket::Change));
        let (bucket, evicted) = buckets.evict(&change.outpoint).unwrap();
        assert_eq!(bucket, Bucket::Change);
        assert_eq!(evicted, change);
        assert_eq!(buckets.locate(&change.outpoint), None);
    }

    #[test]
    fn test_consume_skips_sending() {
        let mut buckets = Buckets::new(&in_memory_factory());
        let foreign = output(3, 0, 9_000);
        buckets.insert(Bucket::Sending, foreign.clone());

        assert!(buckets.consume(&foreign.outpoint).is_none());
        assert_eq!(buckets.total(Bucket::Sending), 9_000);
    }

    #[test]
    fn test_balance_excludes_sending() {
        let mut buckets = Buckets::new(&in_memory_factory());
        buckets.insert(Bucket::Confirmed, output(4, 0, 1_000));
        buckets.insert(Bucket::Change, output(4, 1, 2_000));
        buckets.insert(Bucket::Receiving, output(4, 2, 4_000));
        buckets.insert(Bucket::Sending, output(4, 3, 8_000));

        assert_eq!(buckets.balance(), 7_000);
    }
}
