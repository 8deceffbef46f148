//! Address ownership and signing key lookup
//!
//! An [`Account`](crate::account::Account) decides which outputs it owns
//! through an [`AddressBook`]. The transaction factory additionally needs a
//! [`KeyStore`] to obtain change addresses and signing keys.

use bitcoin::Address;
use parking_lot::RwLock;
use std::collections::HashSet;

use crate::keys::DerivedKey;
use crate::Result;

/// Ownership predicate over addresses
pub trait AddressBook: Send + Sync {
    /// Whether outputs paid to the address belong to the account
    fn is_own_address(&self, address: &Address) -> bool;

    /// All currently tracked addresses
    fn addresses(&self) -> Vec<Address>;

    /// Called for each owned output the account files
    fn observe_output(&self, _address: &Address) {}
}

/// Address book that can also sign and hand out fresh addresses
pub trait KeyStore: AddressBook {
    /// Signing key for an owned address, `None` when unknown
    fn key_for_address(&self, address: &Address) -> Option<DerivedKey>;

    /// Fresh address for change outputs
    fn next_change_address(&self) -> Result<Address>;

    /// Fresh address to give out for incoming payments
    fn next_receive_address(&self) -> Result<Address>;

    /// Change addresses handed out for a payment that did not use them
    fn return_change_addresses(&self, _addresses: &[Address]) {}
}

/// Fixed, growable set of watched addresses
#[derive(Debug, Default)]
pub struct AddressList {
    addresses: RwLock<HashSet<Address>>,
}

impl AddressList {
    /// Create an empty list
    pub fn new() -> Self {
        Self::default()
    }

    /// Create from a set of addresses
    pub fn with_addresses(addresses: impl IntoIterator<Item = Address>) -> Self {
        Self {
            addresses: RwLock::new(addresses.into_iter().collect()),
        }
    }

    /// Start watching an address, returning whether it was new
    pub fn add_address(&self, address: Address) -> bool {
        self.addresses.write().insert(address)
    }

    /// Stop watching an address, returning whether it was watched
    pub fn remove_address(&self, address: &Address) -> bool {
        self.addresses.write().remove(address)
    }

    /// Number of watched addresses
    pub fn len(&self) -> usize {
        self.addresses.read().len()
    }

    /// Whether no address is watched
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl AddressBook for AddressList {
    fn is_own_address(&self, address: &Address) -> bool {
        self.addresses.read().contains(address)
    }

    fn addresses(&self) -> Vec<Address> {
        self.addresses.read().iter().cloned().collect()
    }
}
