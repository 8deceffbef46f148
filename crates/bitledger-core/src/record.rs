//! Transaction and block records delivered by the upstream feed
//!
//! A [`TransactionRecord`] is an immutable snapshot. Confirmation changes
//! produce a new snapshot through [`TransactionRecord::with_status`], so a
//! record held by one account is never altered by another.

use bitcoin::{BlockHash, OutPoint, Transaction, Txid};
use std::fmt;
use std::sync::Arc;

/// Block a transaction is confirmed in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockRef {
    /// Block hash
    pub hash: BlockHash,
    /// Block height
    pub height: u32,
    /// Block timestamp (unix seconds)
    pub time: u32,
}

/// Confirmation state of a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfirmationStatus {
    /// Seen but not in the trunk
    Unconfirmed,
    /// Included in a trunk block
    Confirmed(BlockRef),
    /// Replaced by a conflicting transaction
    DoubleSpent {
        /// Transaction that spent the same input
        offending: Txid,
    },
}

/// Transaction snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionRecord {
    txid: Txid,
    tx: Arc<Transaction>,
    status: ConfirmationStatus,
    expired: bool,
}

impl TransactionRecord {
    /// Unconfirmed record for a transaction
    pub fn new(tx: Transaction) -> Self {
        Self::from_arc(Arc::new(tx))
    }

    /// Unconfirmed record sharing an existing transaction body
    pub fn from_arc(tx: Arc<Transaction>) -> Self {
        Self {
            txid: tx.compute_txid(),
            tx,
            status: ConfirmationStatus::Unconfirmed,
            expired: false,
        }
    }

    /// Record confirmed in the given block
    pub fn confirmed(tx: Transaction, block: BlockRef) -> Self {
        Self::new(tx).with_status(ConfirmationStatus::Confirmed(block))
    }

    /// Same transaction with another status
    pub fn with_status(&self, status: ConfirmationStatus) -> Self {
        Self {
            status,
            ..self.clone()
        }
    }

    /// Same transaction marked expired by the upstream feed
    pub fn expire(&self) -> Self {
        Self {
            expired: true,
            ..self.clone()
        }
    }

    /// Transaction id
    pub fn txid(&self) -> Txid {
        self.txid
    }

    /// Transaction body
    pub fn tx(&self) -> &Transaction {
        &self.tx
    }

    /// Shared transaction body
    pub fn tx_arc(&self) -> &Arc<Transaction> {
        &self.tx
    }

    /// Confirmation status
    pub fn status(&self) -> ConfirmationStatus {
        self.status
    }

    /// Block the transaction is confirmed in
    pub fn block(&self) -> Option<BlockRef> {
        match self.status {
            ConfirmationStatus::Confirmed(block) => Some(block),
            _ => None,
        }
    }

    /// Whether the transaction is in a trunk block
    pub fn is_confirmed(&self) -> bool {
        matches!(self.status, ConfirmationStatus::Confirmed(_))
    }

    /// Conflicting transaction that voided this one
    pub fn offending(&self) -> Option<Txid> {
        match self.status {
            ConfirmationStatus::DoubleSpent { offending } => Some(offending),
            _ => None,
        }
    }

    /// Whether the upstream feed declared the transaction expired
    pub fn is_expired(&self) -> bool {
        self.expired
    }

    /// Whether the transaction must be removed from every bucket
    pub fn is_void(&self) -> bool {
        self.expired || self.offending().is_some()
    }

    /// Whether the transaction is a coinbase
    pub fn is_coinbase(&self) -> bool {
        self.tx.is_coinbase()
    }

    /// Outpoints consumed by the transaction (none for a coinbase)
    pub fn spent_outpoints(&self) -> impl Iterator<Item = OutPoint> + '_ {
        self.tx
            .input
            .iter()
            .map(|input| input.previous_output)
            .filter(|outpoint| !outpoint.is_null())
    }

    /// Outpoints created by the transaction
    pub fn created_outpoints(&self) -> impl Iterator<Item = OutPoint> + '_ {
        let txid = self.txid;
        (0..self.tx.output.len() as u32).map(move |vout| OutPoint::new(txid, vout))
    }
}

/// Block as delivered by the upstream feed
#[derive(Debug, Clone)]
pub struct Block {
    /// Block hash
    pub hash: BlockHash,
    /// Hash of the parent block
    pub prev_hash: BlockHash,
    /// Height
    pub height: u32,
    /// Timestamp (unix seconds)
    pub time: u32,
    /// Transactions in block order
    pub transactions: Vec<Arc<Transaction>>,
}

impl Block {
    /// Reference used for confirmation status
    pub fn block_ref(&self) -> BlockRef {
        BlockRef {
            hash: self.hash,
            height: self.height,
            time: self.time,
        }
    }
}

/// Network rejection notice for a broadcast transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    /// Message type that was rejected
    pub command: String,
    /// Rejected transaction
    pub txid: Txid,
    /// Reason text from the peer
    pub reason: String,
    /// Reject code from the peer
    pub code: u8,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} rejected (code {:#04x}): {}",
            self.command, self.txid, self.code, self.reason
        )
    }
}
