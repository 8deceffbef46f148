//! Builders for transactions, blocks and addresses used by tests

use bitcoin::absolute::LockTime;
use bitcoin::hashes::Hash;
use bitcoin::transaction::Version;
use bitcoin::{
    Address, Amount, BlockHash, Network, OutPoint, PubkeyHash, ScriptBuf, Sequence, Transaction,
    TxIn, TxOut, Txid, Witness,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::record::{Block, BlockRef};

static NONCE: AtomicU64 = AtomicU64::new(1);

/// Regtest pay-to-public-key-hash address with a repeated-byte hash
pub fn address(byte: u8) -> Address {
    Address::p2pkh(PubkeyHash::from_byte_array([byte; 20]), Network::Regtest)
}

/// Outpoint of a transaction nobody tracks, unique per call
pub fn foreign_outpoint() -> OutPoint {
    let nonce = NONCE.fetch_add(1, Ordering::SeqCst);
    let mut bytes = [0xee; 32];
    bytes[..8].copy_from_slice(&nonce.to_le_bytes());
    OutPoint::new(Txid::from_byte_array(bytes), 0)
}

/// Block hash derived from a tag
pub fn block_hash(tag: u32) -> BlockHash {
    let mut bytes = [0u8; 32];
    bytes[..4].copy_from_slice(&tag.to_le_bytes());
    bytes[31] = 0xb1;
    BlockHash::from_byte_array(bytes)
}

/// Block reference at a height, hashed by height
pub fn block_ref(height: u32) -> BlockRef {
    BlockRef {
        hash: block_hash(height),
        height,
        time: 1_700_000_000 + height * 600,
    }
}

/// Transaction spending `inputs` into `outputs`
pub fn spend(inputs: &[OutPoint], outputs: &[(Address, u64)]) -> Transaction {
    Transaction {
        version: Version::ONE,
        lock_time: LockTime::ZERO,
        input: inputs
            .iter()
            .map(|outpoint| TxIn {
                previous_output: *outpoint,
                script_sig: ScriptBuf::new(),
                sequence: Sequence::MAX,
                witness: Witness::new(),
            })
            .collect(),
        output: outputs
            .iter()
            .map(|(address, value)| TxOut {
                value: Amount::from_sat(*value),
                script_pubkey: address.script_pubkey(),
            })
            .collect(),
    }
}

/// Transaction funded from a foreign outpoint
pub fn payment(outputs: &[(Address, u64)]) -> Transaction {
    spend(&[foreign_outpoint()], outputs)
}

/// Block `tag` on top of `prev`
pub fn block(tag: u32, prev: BlockHash, height: u32, transactions: Vec<Transaction>) -> Block {
    Block {
        hash: block_hash(tag),
        prev_hash: prev,
        height,
        time: 1_700_000_000 + height * 600,
        transactions: transactions.into_iter().map(Arc::new).collect(),
    }
}
