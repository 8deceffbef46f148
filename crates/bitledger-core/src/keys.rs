//! Key derivation and signing
//!
//! Implements BIP-32/BIP-39/BIP-44 derivation of pay-to-public-key-hash keys
//! on top of `bitcoin::bip32`. A [`KeyChain`] maps a derivation index to a
//! key; [`ExtendedKeyChain`] is the extended-key implementation, holding either
//! a private key (can sign) or only the public key (watch-only).

use bip39::{Language, Mnemonic};
use bitcoin::bip32::{ChildNumber, DerivationPath, Xpriv, Xpub};
use bitcoin::hashes::Hash;
use bitcoin::script::{Builder, PushBytesBuf};
use bitcoin::secp256k1::{All, Message, Secp256k1};
use bitcoin::sighash::{EcdsaSighashType, SighashCache};
use bitcoin::{ecdsa, Address, Network, PrivateKey, PublicKey, Script, ScriptBuf, Transaction};
use once_cell::sync::Lazy;
use std::fmt;
use zeroize::Zeroize;

use crate::{Error, Result};

static SECP: Lazy<Secp256k1<All>> = Lazy::new(Secp256k1::new);

/// Highest index usable for non-hardened derivation
pub const MAX_NORMAL_INDEX: u32 = (1 << 31) - 1;

/// Key derived at one index
#[derive(Clone)]
pub struct DerivedKey {
    /// Derivation index
    pub index: u32,
    /// Public key
    pub public_key: PublicKey,
    /// Private key, absent for watch-only chains
    pub private_key: Option<PrivateKey>,
    /// Pay-to-public-key-hash address of the key
    pub address: Address,
}

impl DerivedKey {
    /// Whether the key can sign
    pub fn can_sign(&self) -> bool {
        self.private_key.is_some()
    }

    /// Unlocking script for input `input_index` of a fully assembled transaction.
    ///
    /// Signs the legacy SIGHASH_ALL digest over `script_pubkey`, the locking
    /// script of the output being spent.
    pub fn p2pkh_script_sig(
        &self,
        tx: &Transaction,
        input_index: usize,
        script_pubkey: &Script,
    ) -> Result<ScriptBuf> {
        let private_key = self.private_key.as_ref().ok_or_else(|| {
            Error::MissingKey(format!("No private key for {}", self.address))
        })?;

        let sighash = SighashCache::new(tx)
            .legacy_signature_hash(input_index, script_pubkey, EcdsaSighashType::All.to_u32())
            .map_err(|e| Error::TransactionSigning(e.to_string()))?;
        let message = Message::from_digest(sighash.to_byte_array());
        let signature = ecdsa::Signature {
            signature: SECP.sign_ecdsa(&message, &private_key.inner),
            sighash_type: EcdsaSighashType::All,
        };

        let push = PushBytesBuf::try_from(signature.to_vec())
            .map_err(|e| Error::TransactionSigning(e.to_string()))?;
        Ok(Builder::new()
            .push_slice(push)
            .push_key(&self.public_key)
            .into_script())
    }
}

impl fmt::Debug for DerivedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DerivedKey")
            .field("index", &self.index)
            .field("address", &self.address)
            .field("can_sign", &self.can_sign())
            .finish()
    }
}

/// Deterministic index to key mapping
pub trait KeyChain: Send + Sync {
    /// Derive the key at `index`
    fn derive(&self, index: u32) -> Result<DerivedKey>;

    /// Network addresses are encoded for
    fn network(&self) -> Network;

    /// Whether derived keys carry private keys
    fn can_sign(&self) -> bool;
}

#[derive(Clone)]
enum ExtendedKey {
    Private(Xpriv),
    Public(Xpub),
}

/// BIP-32 extended key chain
#[derive(Clone)]
pub struct ExtendedKeyChain {
    key: ExtendedKey,
    network: Network,
}

impl ExtendedKeyChain {
    /// Chain over an extended private key
    pub fn from_xpriv(xpriv: Xpriv, network: Network) -> Self {
        Self {
            key: ExtendedKey::Private(xpriv),
            network,
        }
    }

    /// Watch-only chain over an extended public key
    pub fn from_xpub(xpub: Xpub, network: Network) -> Self {
        Self {
            key: ExtendedKey::Public(xpub),
            network,
        }
    }

    /// Chain rooted at `path` below the master key of `seed`
    pub fn from_seed(seed: &[u8], network: Network, path: &DerivationPath) -> Result<Self> {
        let master = Xpriv::new_master(network, seed)
            .map_err(|e| Error::KeyDerivation(e.to_string()))?;
        let account = master
            .derive_priv(&SECP, path)
            .map_err(|e| Error::KeyDerivation(e.to_string()))?;
        Ok(Self::from_xpriv(account, network))
    }

    /// BIP-44 account chain from a mnemonic phrase.
    ///
    /// Path: m/44'/coin_type'/account'
    pub fn from_mnemonic(
        mnemonic: &str,
        passphrase: &str,
        network: &bitledger_params::Network,
        account: u32,
    ) -> Result<Self> {
        let mnemonic = Mnemonic::parse_in_normalized(Language::English, mnemonic)
            .map_err(|e| Error::InvalidMnemonic(e.to_string()))?;
        let path = bip44_account_path(network.coin_type, account)?;

        let mut seed = mnemonic.to_seed(passphrase);
        let chain = Self::from_seed(&seed, network.bitcoin_network(), &path);
        seed.zeroize();
        chain
    }

    /// Watch-only chain from a base58 extended public key
    pub fn from_xpub_str(encoded: &str, network: Network) -> Result<Self> {
        let xpub = encoded
            .parse::<Xpub>()
            .map_err(|e| Error::InvalidKey(e.to_string()))?;
        Ok(Self::from_xpub(xpub, network))
    }

    /// Non-hardened child chain, e.g. 0 for receiving and 1 for change
    pub fn child(&self, chain: u32) -> Result<Self> {
        let child = [normal_child(chain)?];
        let key = match &self.key {
            ExtendedKey::Private(xpriv) => ExtendedKey::Private(
                xpriv
                    .derive_priv(&SECP, &child)
                    .map_err(|e| Error::KeyDerivation(e.to_string()))?,
            ),
            ExtendedKey::Public(xpub) => ExtendedKey::Public(
                xpub.derive_pub(&SECP, &child)
                    .map_err(|e| Error::KeyDerivation(e.to_string()))?,
            ),
        };
        Ok(Self {
            key,
            network: self.network,
        })
    }

    /// Extended public key of the chain
    pub fn xpub(&self) -> Xpub {
        match &self.key {
            ExtendedKey::Private(xpriv) => Xpub::from_priv(&SECP, xpriv),
            ExtendedKey::Public(xpub) => *xpub,
        }
    }
}

impl KeyChain for ExtendedKeyChain {
    fn derive(&self, index: u32) -> Result<DerivedKey> {
        let child = [normal_child(index)?];
        let (public_key, private_key) = match &self.key {
            ExtendedKey::Private(xpriv) => {
                let derived = xpriv
                    .derive_priv(&SECP, &child)
                    .map_err(|e| Error::KeyDerivation(e.to_string()))?;
                let private_key = PrivateKey::new(derived.private_key, self.network);
                (private_key.public_key(&SECP), Some(private_key))
            }
            ExtendedKey::Public(xpub) => {
                let derived = xpub
                    .derive_pub(&SECP, &child)
                    .map_err(|e| Error::KeyDerivation(e.to_string()))?;
                (PublicKey::new(derived.public_key), None)
            }
        };

        Ok(DerivedKey {
            index,
            address: Address::p2pkh(public_key.pubkey_hash(), self.network),
            public_key,
            private_key,
        })
    }

    fn network(&self) -> Network {
        self.network
    }

    fn can_sign(&self) -> bool {
        matches!(self.key, ExtendedKey::Private(_))
    }
}

impl fmt::Debug for ExtendedKeyChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtendedKeyChain")
            .field("xpub", &self.xpub().to_string())
            .field("network", &self.network)
            .finish()
    }
}

fn normal_child(index: u32) -> Result<ChildNumber> {
    ChildNumber::from_normal_idx(index).map_err(|_| {
        Error::LookAheadExhausted(format!(
            "Index {} is outside the non-hardened range",
            index
        ))
    })
}

fn bip44_account_path(coin_type: u32, account: u32) -> Result<DerivationPath> {
    let hardened = |index: u32| {
        ChildNumber::from_hardened_idx(index).map_err(|e| Error::KeyDerivation(e.to_string()))
    };
    Ok(DerivationPath::from(vec![
        hardened(44)?,
        hardened(coin_type)?,
        hardened(account)?,
    ]))
}
