//! Key deriver with a look-ahead window
//!
//! Keeps `look_ahead` unused keys derived past the highest used index so
//! payments to freshly handed-out addresses are recognized. Observing an output
//! paid to a derived address marks its index used and extends the window.

use bitcoin::Address;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::address_book::{AddressBook, KeyStore};
use crate::keys::{DerivedKey, KeyChain, MAX_NORMAL_INDEX};
use crate::{Error, Result};

pub use bitledger_params::DEFAULT_LOOK_AHEAD;

/// Derived key plus its usage
#[derive(Debug, Clone)]
pub struct KeyUsage {
    /// Derived key
    pub key: DerivedKey,
    /// Whether an output paid to the key was observed
    pub used: bool,
    /// When the first such output was observed
    pub first_used: Option<DateTime<Utc>>,
}

impl KeyUsage {
    fn new(key: DerivedKey) -> Self {
        Self {
            key,
            used: false,
            first_used: None,
        }
    }

    fn mark_used(&mut self) {
        if !self.used {
            self.used = true;
            self.first_used = Some(Utc::now());
        }
    }
}

/// Persistable deriver position
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeriverState {
    /// Lowest derived index
    pub first_index: u32,
    /// Next index handed out by `get_next_key`
    pub next_index: u32,
    /// Indices observed as used
    pub used_indices: Vec<u32>,
}

struct Inner {
    first_index: u32,
    next_index: u32,
    keys: BTreeMap<u32, KeyUsage>,
    by_address: HashMap<Address, u32>,
    used: BTreeSet<u32>,
}

/// Deterministic key deriver
pub struct KeyDeriver {
    chain: Box<dyn KeyChain>,
    look_ahead: u32,
    inner: Mutex<Inner>,
}

impl KeyDeriver {
    /// Create a deriver starting at index 0
    pub fn new(chain: impl KeyChain + 'static, look_ahead: u32) -> Result<Self> {
        Self::with_first_index(chain, look_ahead, 0)
    }

    /// Create a deriver whose first index is `first_index`
    pub fn with_first_index(
        chain: impl KeyChain + 'static,
        look_ahead: u32,
        first_index: u32,
    ) -> Result<Self> {
        let deriver = Self {
            chain: Box::new(chain),
            look_ahead,
            inner: Mutex::new(Inner {
                first_index,
                next_index: first_index,
                keys: BTreeMap::new(),
                by_address: HashMap::new(),
                used: BTreeSet::new(),
            }),
        };
        deriver.ensure_look_ahead(first_index)?;
        Ok(deriver)
    }

    /// Restore from persisted state
    pub fn restore(
        chain: impl KeyChain + 'static,
        look_ahead: u32,
        state: &DeriverState,
    ) -> Result<Self> {
        let deriver = Self::with_first_index(chain, look_ahead, state.first_index)?;
        {
            let mut inner = deriver.inner.lock();
            inner.next_index = state.next_index.max(state.first_index);
        }
        for index in &state.used_indices {
            deriver.mark_index_used(*index)?;
        }
        deriver.ensure_look_ahead(state.next_index)?;
        Ok(deriver)
    }

    /// Get state for persistence
    pub fn state(&self) -> DeriverState {
        let inner = self.inner.lock();
        DeriverState {
            first_index: inner.first_index,
            next_index: inner.next_index,
            used_indices: inner.used.iter().copied().collect(),
        }
    }

    /// Make sure every index up to `from + look_ahead` is derived
    pub fn ensure_look_ahead(&self, from: u32) -> Result<()> {
        let mut inner = self.inner.lock();
        self.extend_locked(&mut inner, from)
    }

    fn extend_locked(&self, inner: &mut Inner, from: u32) -> Result<()> {
        let target = from
            .checked_add(self.look_ahead)
            .filter(|target| *target <= MAX_NORMAL_INDEX)
            .ok_or_else(|| {
                Error::LookAheadExhausted(format!(
                    "Cannot derive {} keys past index {}",
                    self.look_ahead, from
                ))
            })?;

        let mut index = inner
            .keys
            .keys()
            .next_back()
            .map_or(inner.first_index, |last| last + 1);
        if index > target {
            return Ok(());
        }
        while index <= target {
            let key = self.chain.derive(index)?;
            inner.by_address.insert(key.address.clone(), index);
            inner.keys.insert(index, KeyUsage::new(key));
            index += 1;
        }

        tracing::trace!(upto = target, "Look-ahead window extended");
        Ok(())
    }

    /// Key at `index`, extending the window past it
    pub fn get_key(&self, index: u32) -> Result<DerivedKey> {
        let mut inner = self.inner.lock();
        if index < inner.first_index {
            return Err(Error::KeyDerivation(format!(
                "Index {} precedes first index {}",
                index, inner.first_index
            )));
        }
        self.extend_locked(&mut inner, index)?;
        inner
            .keys
            .get(&index)
            .map(|usage| usage.key.clone())
            .ok_or_else(|| Error::KeyDerivation(format!("Index {} not derived", index)))
    }

    /// Key at the next index, advancing it
    pub fn get_next_key(&self) -> Result<DerivedKey> {
        let mut inner = self.inner.lock();
        let index = inner.next_index;
        self.extend_locked(&mut inner, index)?;
        let key = inner
            .keys
            .get(&index)
            .map(|usage| usage.key.clone())
            .ok_or_else(|| Error::KeyDerivation(format!("Index {} not derived", index)))?;
        inner.next_index = index + 1;
        Ok(key)
    }

    /// Take back keys handed out by `get_next_key` that were never used.
    ///
    /// Only the run of returned indices directly below the next index is
    /// taken back, so keys handed out since stay allocated. Returns the new
    /// next index.
    pub fn rewind(&self, addresses: &[Address]) -> u32 {
        let mut inner = self.inner.lock();
        let returned: BTreeSet<u32> = addresses
            .iter()
            .filter_map(|address| inner.by_address.get(address).copied())
            .collect();

        let before = inner.next_index;
        while inner.next_index > inner.first_index {
            let last = inner.next_index - 1;
            if !returned.contains(&last) || inner.used.contains(&last) {
                break;
            }
            inner.next_index = last;
        }
        if inner.next_index != before {
            tracing::debug!(from = before, to = inner.next_index, "Unused keys taken back");
        }
        inner.next_index
    }

    /// Move the next index
    pub fn set_next_key(&self, index: u32) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.next_index = index.max(inner.first_index);
        let next = inner.next_index;
        self.extend_locked(&mut inner, next)
    }

    /// Index of an owned address
    pub fn index_of(&self, address: &Address) -> Option<u32> {
        self.inner.lock().by_address.get(address).copied()
    }

    /// Signing key of an owned address, `None` when unknown
    pub fn key_for_address(&self, address: &Address) -> Option<DerivedKey> {
        let inner = self.inner.lock();
        let index = inner.by_address.get(address)?;
        inner.keys.get(index).map(|usage| usage.key.clone())
    }

    /// Usage record of an index
    pub fn usage(&self, index: u32) -> Option<KeyUsage> {
        self.inner.lock().keys.get(&index).cloned()
    }

    /// Mark the address used, returning whether it is owned
    pub fn mark_used(&self, address: &Address) -> Result<bool> {
        match self.index_of(address) {
            Some(index) => {
                self.mark_index_used(index)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn mark_index_used(&self, index: u32) -> Result<()> {
        let mut inner = self.inner.lock();
        self.extend_locked(&mut inner, index)?;
        if let Some(usage) = inner.keys.get_mut(&index) {
            usage.mark_used();
        }
        if inner.used.insert(index) {
            tracing::debug!(index, "Key marked used");
        }
        if inner.next_index <= index {
            inner.next_index = index + 1;
        }
        Ok(())
    }

    /// Highest index observed as used
    pub fn highest_used(&self) -> Option<u32> {
        self.inner.lock().used.iter().next_back().copied()
    }

    /// Next index handed out by `get_next_key`
    pub fn next_index(&self) -> u32 {
        self.inner.lock().next_index
    }

    /// Lowest derived index
    pub fn first_index(&self) -> u32 {
        self.inner.lock().first_index
    }

    /// Indices observed as used, ascending
    pub fn used_indices(&self) -> Vec<u32> {
        self.inner.lock().used.iter().copied().collect()
    }

    /// Whether `index` has been derived
    pub fn is_derived(&self, index: u32) -> bool {
        self.inner.lock().keys.contains_key(&index)
    }

    /// Number of derived keys
    pub fn derived_count(&self) -> usize {
        self.inner.lock().keys.len()
    }

    /// Configured look-ahead
    pub fn look_ahead(&self) -> u32 {
        self.look_ahead
    }

    /// Whether derived keys can sign
    pub fn can_sign(&self) -> bool {
        self.chain.can_sign()
    }
}

impl AddressBook for KeyDeriver {
    fn is_own_address(&self, address: &Address) -> bool {
        self.inner.lock().by_address.contains_key(address)
    }

    fn addresses(&self) -> Vec<Address> {
        self.inner
            .lock()
            .keys
            .values()
            .map(|usage| usage.key.address.clone())
            .collect()
    }

    fn observe_output(&self, address: &Address) {
        if let Err(e) = self.mark_used(address) {
            tracing::warn!(%address, error = %e, "Could not extend look-ahead window");
        }
    }
}

impl KeyStore for KeyDeriver {
    fn key_for_address(&self, address: &Address) -> Option<DerivedKey> {
        KeyDeriver::key_for_address(self, address)
    }

    fn next_change_address(&self) -> Result<Address> {
        Ok(self.get_next_key()?.address)
    }

    fn next_receive_address(&self) -> Result<Address> {
        Ok(self.get_next_key()?.address)
    }

    fn return_change_addresses(&self, addresses: &[Address]) {
        self.rewind(addresses);
    }
}

impl std::fmt::Debug for KeyDeriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("KeyDeriver")
            .field("first_index", &inner.first_index)
            .field("next_index", &inner.next_index)
            .field("derived", &inner.keys.len())
            .field("used", &inner.used.len())
            .field("look_ahead", &self.look_ahead)
            .finish()
    }
}
