//! m-of-n P2WSH multisig construction
//!
//! The witness script is the bare multisig template
//!
//! ```text
//! OP_m <key_1> ... <key_n> OP_n OP_CHECKMULTISIG
//! ```
//!
//! with the keys in exactly the order the caller hands them over. Key order
//! changes the script bytes and therefore the address, so ordering policy
//! lives in [`KeyOrder`] and is applied by whoever assembles the key list.

use crate::keys::Account;
use bitcoin::opcodes::all::OP_CHECKMULTISIG;
use bitcoin::script::{Builder, Script, ScriptBuf};
use bitcoin::{Address, Network, PublicKey};
use miniscript::descriptor::DescriptorPublicKey;
use miniscript::Descriptor;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Largest key count the builder accepts.
pub const MAX_MULTISIG_KEYS: usize = 15;

#[derive(Error, Debug)]
pub enum MultisigError {
    #[error("Invalid threshold: {m} of {n} keys")]
    InvalidThreshold { m: usize, n: usize },

    #[error("Invalid key set: {n} keys (supported: 1 to 15)")]
    InvalidKeySet { n: usize },

    #[error("Descriptor error: {0}")]
    Descriptor(String),
}

/// Canonical ordering of cosigner keys inside the script.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyOrder {
    /// Ascending account branch index (0', 1', 2', ...).
    #[default]
    Derivation,
    /// BIP-67: ascending serialized compressed public key.
    Lexicographic,
}

impl fmt::Display for KeyOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyOrder::Derivation => write!(f, "derivation"),
            KeyOrder::Lexicographic => write!(f, "lexicographic"),
        }
    }
}

/// Arrange accounts in script order according to `order`.
pub fn order_keys(accounts: &[Account], order: KeyOrder) -> Vec<&Account> {
    let mut ordered: Vec<&Account> = accounts.iter().collect();
    match order {
        KeyOrder::Derivation => ordered.sort_by_key(|a| a.branch()),
        KeyOrder::Lexicographic => ordered.sort_by_key(|a| a.public_key().inner.serialize()),
    }
    ordered
}

/// Build `OP_m <keys> OP_n OP_CHECKMULTISIG` from keys in the given order.
pub fn build_redeem_script(m: usize, pubkeys: &[PublicKey]) -> Result<ScriptBuf, MultisigError> {
    let n = pubkeys.len();
    if n == 0 || n > MAX_MULTISIG_KEYS {
        return Err(MultisigError::InvalidKeySet { n });
    }
    if m == 0 || m > n {
        return Err(MultisigError::InvalidThreshold { m, n });
    }

    let mut builder = Builder::new().push_int(m as i64);
    for key in pubkeys {
        builder = builder.push_key(key);
    }
    Ok(builder
        .push_int(n as i64)
        .push_opcode(OP_CHECKMULTISIG)
        .into_script())
}

/// P2WSH address committing to `redeem_script` on `network`.
pub fn wrap_segwit(redeem_script: &Script, network: Network) -> Address {
    Address::p2wsh(redeem_script, network)
}

/// A built m-of-n multisig: keys, witness script and address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultisigDescriptor {
    threshold: usize,
    pubkeys: Vec<PublicKey>,
    network: Network,
    witness_script: ScriptBuf,
    address: Address,
}

impl MultisigDescriptor {
    pub fn new(
        threshold: usize,
        pubkeys: Vec<PublicKey>,
        network: Network,
    ) -> Result<Self, MultisigError> {
        let witness_script = build_redeem_script(threshold, &pubkeys)?;
        let address = wrap_segwit(&witness_script, network);
        Ok(Self {
            threshold,
            pubkeys,
            network,
            witness_script,
            address,
        })
    }

    /// Build from accounts already arranged in script order.
    pub fn from_accounts(
        threshold: usize,
        accounts: &[&Account],
        network: Network,
    ) -> Result<Self, MultisigError> {
        let pubkeys = accounts.iter().map(|a| a.public_key()).collect();
        Self::new(threshold, pubkeys, network)
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    pub fn total_signers(&self) -> usize {
        self.pubkeys.len()
    }

    pub fn pubkeys(&self) -> &[PublicKey] {
        &self.pubkeys
    }

    pub fn network(&self) -> Network {
        self.network
    }

    pub fn witness_script(&self) -> &Script {
        &self.witness_script
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn script_pubkey(&self) -> ScriptBuf {
        self.address.script_pubkey()
    }
}

/// `wsh(multi(m,[origin]xpub,...))` output descriptor, keys in the given order.
///
/// The xpubs carry no further derivation steps, so the descriptor commits to
/// the account keys themselves.
pub fn descriptor_string(threshold: usize, accounts: &[&Account]) -> Result<String, MultisigError> {
    if accounts.is_empty() || accounts.len() > MAX_MULTISIG_KEYS {
        return Err(MultisigError::InvalidKeySet { n: accounts.len() });
    }
    if threshold == 0 || threshold > accounts.len() {
        return Err(MultisigError::InvalidThreshold {
            m: threshold,
            n: accounts.len(),
        });
    }

    let keys: Vec<String> = accounts
        .iter()
        .map(|a| format!("{}{}", a.key_origin(), a.xpub()))
        .collect();
    let raw = format!("wsh(multi({},{}))", threshold, keys.join(","));

    let descriptor = Descriptor::<DescriptorPublicKey>::from_str(&raw)
        .map_err(|e| MultisigError::Descriptor(e.to_string()))?;
    Ok(descriptor.to_string())
}

/// Address a descriptor produced by [`descriptor_string`] resolves to.
pub fn descriptor_address(descriptor: &str, network: Network) -> Result<Address, MultisigError> {
    let descriptor = Descriptor::<DescriptorPublicKey>::from_str(descriptor)
        .map_err(|e| MultisigError::Descriptor(e.to_string()))?;
    let definite = descriptor
        .at_derivation_index(0)
        .map_err(|e| MultisigError::Descriptor(e.to_string()))?;
    definite
        .address(network)
        .map_err(|e| MultisigError::Descriptor(e.to_string()))
}
