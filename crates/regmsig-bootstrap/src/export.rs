//! Bootstrap result and the coordinator configuration exported from it.
//!
//! The exported document is what downstream multisig coordinators import:
//!
//! ```json
//! {
//!   "xpubs": ["tpub...", "tpub...", "tpub..."],
//!   "quorum": { "requiredSigners": 2, "totalSigners": 3 },
//!   "network": "regtest"
//! }
//! ```
//!
//! Field order follows struct order. `xpubs` are in witness-script key order.

use anyhow::{Context, Result};
use bitcoin::{BlockHash, Txid};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// One (new address, send, confirm) round of generated history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistoryEntry {
    pub recipient: String,
    pub txid: Txid,
    /// Block that confirmed the send
    pub block_hash: BlockHash,
}

/// Everything a finished bootstrap run produced.
#[derive(Debug, Clone)]
pub struct BootstrapResult {
    pub threshold: usize,
    pub total_signers: usize,
    /// Neutered account keys, in script order
    pub xpubs: Vec<String>,
    /// `[fingerprint/path]` per xpub, same order
    pub key_origins: Vec<String>,
    pub network: String,
    pub address: String,
    /// Witness script, hex
    pub witness_script: String,
    /// `wsh(multi(...))` output descriptor with checksum
    pub descriptor: String,
    pub mnemonic: String,
    pub miner_address: String,
    pub deposit_txid: Txid,
    pub history: Vec<HistoryEntry>,
}

impl BootstrapResult {
    /// Public-only coordinator configuration.
    pub fn export(&self) -> CoordinatorConfig {
        CoordinatorConfig {
            xpubs: self.xpubs.clone(),
            quorum: Quorum {
                required_signers: self.threshold,
                total_signers: self.total_signers,
            },
            network: self.network.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    pub xpubs: Vec<String>,
    pub quorum: Quorum,
    pub network: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Quorum {
    pub required_signers: usize,
    pub total_signers: usize,
}

impl CoordinatorConfig {
    pub fn to_json_pretty(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("Failed to serialize coordinator config")
    }

    /// Write the pretty-printed JSON to `path`.
    pub fn write_to(&self, path: &Path) -> Result<()> {
        let json = self.to_json_pretty()?;
        std::fs::write(path, json + "\n")
            .with_context(|| format!("Failed to write export file: {}", path.display()))
    }
}
