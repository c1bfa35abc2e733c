//! Bootstrap configuration, parsed from TOML with environment variable overrides.
//!
//! Priority: environment variables > config file > defaults. Every field has a
//! default, so running without a config file targets a stock local regtest
//! node.

use crate::orchestrator::BootstrapPlan;
use anyhow::{Context, Result};
use bitcoin::{Amount, Network};
use regmsig_core::{
    parse_mnemonic, AccountTemplate, KeyOrder, MAX_MULTISIG_KEYS, SUPPORTED_ENTROPY_BITS,
};
use regmsig_node::CliSettings;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Top-level bootstrap configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BootstrapConfig {
    /// Node connection
    #[serde(default)]
    pub node: NodeSection,

    #[serde(default)]
    pub wallet: WalletSection,

    /// Run parameters
    #[serde(default)]
    pub bootstrap: BootstrapSection,

    #[serde(default)]
    pub export: ExportSection,
}

/// How to reach the node through `bitcoin-cli`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSection {
    #[serde(default = "default_cli_path")]
    pub cli_path: PathBuf,

    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_rpc_user")]
    pub rpc_user: String,

    #[serde(default = "default_rpc_password")]
    pub rpc_password: String,

    /// Only "regtest" passes validation
    #[serde(default = "default_network")]
    pub network: String,
}

impl Default for NodeSection {
    fn default() -> Self {
        Self {
            cli_path: default_cli_path(),
            host: default_host(),
            port: default_port(),
            rpc_user: default_rpc_user(),
            rpc_password: default_rpc_password(),
            network: default_network(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletSection {
    /// Node wallet that mines and funds
    #[serde(default = "default_wallet_name")]
    pub name: String,
}

impl Default for WalletSection {
    fn default() -> Self {
        Self {
            name: default_wallet_name(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BootstrapSection {
    /// Readiness checks before giving up
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Entropy for a fresh mnemonic (128, 160, 192, 224 or 256)
    #[serde(default = "default_entropy_bits")]
    pub entropy_bits: usize,

    #[serde(default = "default_required_signers")]
    pub required_signers: usize,

    #[serde(default = "default_total_signers")]
    pub total_signers: usize,

    #[serde(default)]
    pub key_order: KeyOrder,

    #[serde(default = "default_deposit_btc")]
    pub deposit_btc: f64,

    /// Number of (address, send, confirm) rounds after the deposit
    #[serde(default = "default_history_count")]
    pub history_count: u32,

    #[serde(default = "default_history_amount_btc")]
    pub history_amount_btc: f64,

    /// Replay this mnemonic instead of generating one
    #[serde(default)]
    pub mnemonic: Option<String>,

    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for BootstrapSection {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            poll_interval_ms: default_poll_interval_ms(),
            entropy_bits: default_entropy_bits(),
            required_signers: default_required_signers(),
            total_signers: default_total_signers(),
            key_order: KeyOrder::default(),
            deposit_btc: default_deposit_btc(),
            history_count: default_history_count(),
            history_amount_btc: default_history_amount_btc(),
            mnemonic: None,
            log_level: default_log_level(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExportSection {
    /// Also write the coordinator JSON here
    #[serde(default)]
    pub path: Option<PathBuf>,
}

// ============================================================================
// Default value functions
// ============================================================================

fn default_cli_path() -> PathBuf {
    PathBuf::from("bitcoin-cli")
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    18443
}

fn default_rpc_user() -> String {
    "user".to_string()
}

fn default_rpc_password() -> String {
    "pass".to_string()
}

fn default_network() -> String {
    "regtest".to_string()
}

fn default_wallet_name() -> String {
    "caravan_test_wallet".to_string()
}

fn default_max_attempts() -> u32 {
    10
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_entropy_bits() -> usize {
    regmsig_core::DEFAULT_ENTROPY_BITS
}

fn default_required_signers() -> usize {
    2
}

fn default_total_signers() -> usize {
    3
}

fn default_deposit_btc() -> f64 {
    10.0
}

fn default_history_count() -> u32 {
    5
}

fn default_history_amount_btc() -> f64 {
    1.0
}

fn default_log_level() -> String {
    "info".to_string()
}

// ============================================================================
// Loading & environment override
// ============================================================================

impl BootstrapConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: BootstrapConfig =
            toml::from_str(&contents).with_context(|| "Failed to parse TOML config")?;
        Ok(config)
    }

    /// Apply environment variable overrides.
    ///
    /// Supported env vars:
    /// - `REGMSIG_CLI_PATH`
    /// - `REGMSIG_RPC_HOST`
    /// - `REGMSIG_RPC_PORT`
    /// - `REGMSIG_RPC_USER`
    /// - `REGMSIG_RPC_PASSWORD`
    /// - `REGMSIG_NETWORK`
    /// - `REGMSIG_WALLET`
    /// - `REGMSIG_MNEMONIC`
    /// - `REGMSIG_LOG_LEVEL`
    /// - `REGMSIG_EXPORT_PATH`
    pub fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("REGMSIG_CLI_PATH") {
            self.node.cli_path = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("REGMSIG_RPC_HOST") {
            self.node.host = v;
        }
        if let Ok(v) = std::env::var("REGMSIG_RPC_PORT") {
            if let Ok(port) = v.parse::<u16>() {
                self.node.port = port;
            }
        }
        if let Ok(v) = std::env::var("REGMSIG_RPC_USER") {
            self.node.rpc_user = v;
        }
        if let Ok(v) = std::env::var("REGMSIG_RPC_PASSWORD") {
            self.node.rpc_password = v;
        }
        if let Ok(v) = std::env::var("REGMSIG_NETWORK") {
            self.node.network = v;
        }
        if let Ok(v) = std::env::var("REGMSIG_WALLET") {
            self.wallet.name = v;
        }
        if let Ok(v) = std::env::var("REGMSIG_MNEMONIC") {
            self.bootstrap.mnemonic = Some(v);
        }
        if let Ok(v) = std::env::var("REGMSIG_LOG_LEVEL") {
            self.bootstrap.log_level = v;
        }
        if let Ok(v) = std::env::var("REGMSIG_EXPORT_PATH") {
            self.export.path = Some(PathBuf::from(v));
        }
    }

    /// Parse the network string to a `bitcoin::Network`.
    pub fn network(&self) -> Result<Network> {
        Network::from_str(&self.node.network)
            .with_context(|| format!("Unknown network: {}", self.node.network))
    }

    /// Validate that the configuration is usable.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            self.network()? == Network::Regtest,
            "node.network must be \"regtest\" (got \"{}\")",
            self.node.network
        );

        anyhow::ensure!(
            !self.wallet.name.trim().is_empty(),
            "wallet.name must not be empty"
        );

        let b = &self.bootstrap;
        anyhow::ensure!(b.max_attempts >= 1, "bootstrap.max_attempts must be >= 1");

        anyhow::ensure!(
            b.required_signers >= 1 && b.required_signers <= b.total_signers,
            "bootstrap.required_signers must be between 1 and total_signers ({})",
            b.total_signers
        );
        anyhow::ensure!(
            b.total_signers <= MAX_MULTISIG_KEYS,
            "bootstrap.total_signers must be <= {}",
            MAX_MULTISIG_KEYS
        );

        anyhow::ensure!(
            SUPPORTED_ENTROPY_BITS.contains(&b.entropy_bits),
            "bootstrap.entropy_bits must be one of {:?}",
            SUPPORTED_ENTROPY_BITS
        );

        anyhow::ensure!(b.deposit_btc > 0.0, "bootstrap.deposit_btc must be > 0");
        anyhow::ensure!(
            b.history_amount_btc > 0.0,
            "bootstrap.history_amount_btc must be > 0"
        );

        if let Some(ref words) = b.mnemonic {
            parse_mnemonic(words).context("bootstrap.mnemonic is not a valid BIP-39 phrase")?;
        }

        Ok(())
    }

    /// Connection settings for the production runner.
    pub fn cli_settings(&self) -> Result<CliSettings> {
        Ok(CliSettings {
            program: self.node.cli_path.clone(),
            host: self.node.host.clone(),
            port: self.node.port,
            rpc_user: self.node.rpc_user.clone(),
            rpc_password: self.node.rpc_password.clone(),
            network: self.network()?,
        })
    }

    /// Typed run parameters for the orchestrator.
    pub fn plan(&self) -> Result<BootstrapPlan> {
        let b = &self.bootstrap;
        Ok(BootstrapPlan {
            network: self.network()?,
            wallet_name: self.wallet.name.clone(),
            max_attempts: b.max_attempts,
            poll_interval: Duration::from_millis(b.poll_interval_ms),
            entropy_bits: b.entropy_bits,
            required_signers: b.required_signers,
            total_signers: b.total_signers,
            key_order: b.key_order,
            template: AccountTemplate::default(),
            deposit: Amount::from_btc(b.deposit_btc).context("bootstrap.deposit_btc")?,
            history_count: b.history_count,
            history_amount: Amount::from_btc(b.history_amount_btc)
                .context("bootstrap.history_amount_btc")?,
            mnemonic: b.mnemonic.clone(),
        })
    }
}

// ============================================================================
// Tests
// ============================================================================
