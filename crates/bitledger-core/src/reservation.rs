//! Input reservations
//!
//! Outputs handed to a transaction that is not yet confirmed are reserved so a
//! concurrent payment does not select them again. Reservations are independent
//! of bucket membership and must be released explicitly.

use bitcoin::OutPoint;
use parking_lot::Mutex;
use std::collections::HashSet;

/// Registry of reserved outpoints shared across payments
#[derive(Debug, Default)]
pub struct InputReservations {
    reserved: Mutex<HashSet<OutPoint>>,
}

impl InputReservations {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve outpoints, returning how many were newly reserved
    pub fn reserve_inputs<'a>(&self, outpoints: impl IntoIterator<Item = &'a OutPoint>) -> usize {
        let mut reserved = self.reserved.lock();
        outpoints
            .into_iter()
            .filter(|outpoint| reserved.insert(**outpoint))
            .count()
    }

    /// Reserve every outpoint or none of them.
    ///
    /// Returns false, reserving nothing, if any outpoint is already held.
    pub fn try_reserve_all<'a>(&self, outpoints: impl IntoIterator<Item = &'a OutPoint>) -> bool {
        let outpoints: Vec<OutPoint> = outpoints.into_iter().copied().collect();
        let mut reserved = self.reserved.lock();
        if outpoints.iter().any(|outpoint| reserved.contains(outpoint)) {
            return false;
        }
        reserved.extend(outpoints);
        true
    }

    /// Release outpoints, returning how many were reserved
    pub fn release_inputs<'a>(&self, outpoints: impl IntoIterator<Item = &'a OutPoint>) -> usize {
        let mut reserved = self.reserved.lock();
        outpoints
            .into_iter()
            .filter(|outpoint| reserved.remove(*outpoint))
            .count()
    }

    /// Whether the outpoint is reserved
    pub fn is_reserved(&self, outpoint: &OutPoint) -> bool {
        self.reserved.lock().contains(outpoint)
    }

    /// Number of reserved outpoints
    pub fn len(&self) -> usize {
        self.reserved.lock().len()
    }

    /// Whether nothing is reserved
    pub fn is_empty(&self) -> bool {
        self.reserved.lock().is_empty()
    }
}
