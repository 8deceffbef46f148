//! Unspent transaction outputs

use bitcoin::{Address, Network, OutPoint, ScriptBuf, TxOut};

/// Output value (satoshis)
pub type OutputValue = u64;

/// An unspent output as tracked by an account
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Output {
    /// Transaction and index that created the output
    pub outpoint: OutPoint,
    /// Value in satoshis
    pub value: OutputValue,
    /// Locking script
    pub script_pubkey: ScriptBuf,
    /// Address form of the locking script, when it has one
    pub address: Option<Address>,
}

impl Output {
    /// Create from a transaction output, deriving the address from its script
    pub fn from_tx_out(outpoint: OutPoint, tx_out: &TxOut, network: Network) -> Self {
        Self {
            outpoint,
            value: tx_out.value.to_sat(),
            address: Address::from_script(&tx_out.script_pubkey, network).ok(),
            script_pubkey: tx_out.script_pubkey.clone(),
        }
    }

    /// Whether the locking script is pay-to-public-key-hash
    pub fn is_p2pkh(&self) -> bool {
        self.script_pubkey.is_p2pkh()
    }
}
