//! Receiving and change chains of one account key

use bitcoin::Address;

use crate::address_book::{AddressBook, KeyStore};
use crate::deriver::KeyDeriver;
use crate::keys::{DerivedKey, ExtendedKeyChain};
use crate::Result;

/// Child chain handing out addresses for incoming payments
pub const RECEIVE_CHAIN: u32 = 0;

/// Child chain handing out change addresses
pub const CHANGE_CHAIN: u32 = 1;

/// Two derivers below one account key: receiving on child 0, change on child 1
#[derive(Debug)]
pub struct ReceiverChangeKeys {
    receiving: KeyDeriver,
    change: KeyDeriver,
}

impl ReceiverChangeKeys {
    /// Derive both chains from an account-level key chain
    pub fn new(account: &ExtendedKeyChain, look_ahead: u32) -> Result<Self> {
        Ok(Self {
            receiving: KeyDeriver::new(account.child(RECEIVE_CHAIN)?, look_ahead)?,
            change: KeyDeriver::new(account.child(CHANGE_CHAIN)?, look_ahead)?,
        })
    }

    /// Receiving deriver
    pub fn receiving(&self) -> &KeyDeriver {
        &self.receiving
    }

    /// Change deriver
    pub fn change(&self) -> &KeyDeriver {
        &self.change
    }

    /// `(chain, index)` of an owned address
    pub fn key_path_for_address(&self, address: &Address) -> Option<(u32, u32)> {
        self.receiving
            .index_of(address)
            .map(|index| (RECEIVE_CHAIN, index))
            .or_else(|| self.change.index_of(address).map(|index| (CHANGE_CHAIN, index)))
    }
}

impl AddressBook for ReceiverChangeKeys {
    fn is_own_address(&self, address: &Address) -> bool {
        self.receiving.is_own_address(address) || self.change.is_own_address(address)
    }

    fn addresses(&self) -> Vec<Address> {
        let mut addresses = self.receiving.addresses();
        addresses.extend(self.change.addresses());
        addresses
    }

    fn observe_output(&self, address: &Address) {
        match self.key_path_for_address(address) {
            Some((RECEIVE_CHAIN, _)) => self.receiving.observe_output(address),
            Some(_) => self.change.observe_output(address),
            None => {}
        }
    }
}

impl KeyStore for ReceiverChangeKeys {
    fn key_for_address(&self, address: &Address) -> Option<DerivedKey> {
        self.receiving
            .key_for_address(address)
            .or_else(|| self.change.key_for_address(address))
    }

    fn next_change_address(&self) -> Result<Address> {
        Ok(self.change.get_next_key()?.address)
    }

    fn next_receive_address(&self) -> Result<Address> {
        Ok(self.receiving.get_next_key()?.address)
    }

    fn return_change_addresses(&self, addresses: &[Address]) {
        self.change.rewind(addresses);
    }
}
