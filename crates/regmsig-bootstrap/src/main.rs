//! regmsig-bootstrap: one-shot regtest multisig environment setup
//!
//! # Usage
//!
//! ```bash
//! regmsig-bootstrap                              # defaults: local regtest node
//! regmsig-bootstrap --config regmsig.toml --export caravan.json
//! regmsig-bootstrap --mnemonic "abandon ... about"   # reproducible keys
//! regmsig-bootstrap --validate
//! ```

use anyhow::{Context, Result};
use regmsig_bootstrap::{BootstrapConfig, BootstrapResult, Orchestrator};
use regmsig_node::{BitcoinCli, NodeClient};
use std::path::{Path, PathBuf};

fn main() -> Result<()> {
    // Parse CLI args (minimal, no clap)
    let args: Vec<String> = std::env::args().collect();

    let mut config_path: Option<PathBuf> = None;
    let mut export_path: Option<PathBuf> = None;
    let mut mnemonic: Option<String> = None;
    let mut validate_only = false;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" | "-c" => {
                i += 1;
                if i < args.len() {
                    config_path = Some(PathBuf::from(&args[i]));
                } else {
                    anyhow::bail!("--config requires a path argument");
                }
            }
            "--export" => {
                i += 1;
                if i < args.len() {
                    export_path = Some(PathBuf::from(&args[i]));
                } else {
                    anyhow::bail!("--export requires a path argument");
                }
            }
            "--mnemonic" => {
                i += 1;
                if i < args.len() {
                    mnemonic = Some(args[i].clone());
                } else {
                    anyhow::bail!("--mnemonic requires a quoted phrase");
                }
            }
            "--validate" => {
                validate_only = true;
            }
            "--help" | "-h" => {
                print_help();
                return Ok(());
            }
            "--version" | "-V" => {
                println!("regmsig-bootstrap {}", env!("CARGO_PKG_VERSION"));
                return Ok(());
            }
            other => {
                anyhow::bail!("Unknown argument: {}", other);
            }
        }
        i += 1;
    }

    let mut config = match config_path {
        Some(ref path) => BootstrapConfig::from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => BootstrapConfig::default(),
    };

    // Command line > env > file
    config.apply_env_overrides();
    if mnemonic.is_some() {
        config.bootstrap.mnemonic = mnemonic;
    }
    if export_path.is_some() {
        config.export.path = export_path;
    }

    config.validate().context("Configuration validation failed")?;

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(config.bootstrap.log_level.as_str()),
    )
    .init();

    if validate_only {
        println!("Configuration is valid.");
        println!("  Node:          {}:{}", config.node.host, config.node.port);
        println!("  bitcoin-cli:   {}", config.node.cli_path.display());
        println!("  Network:       {}", config.node.network);
        println!("  Wallet:        {}", config.wallet.name);
        println!(
            "  Quorum:        {}-of-{} ({} key order)",
            config.bootstrap.required_signers,
            config.bootstrap.total_signers,
            config.bootstrap.key_order
        );
        println!("  Deposit:       {} BTC", config.bootstrap.deposit_btc);
        println!(
            "  History:       {} x {} BTC",
            config.bootstrap.history_count, config.bootstrap.history_amount_btc
        );
        println!(
            "  Mnemonic:      {}",
            if config.bootstrap.mnemonic.is_some() {
                "replayed"
            } else {
                "fresh"
            }
        );
        return Ok(());
    }

    let plan = config.plan()?;
    let node = NodeClient::new(BitcoinCli::new(config.cli_settings()?), plan.network);
    let mut orchestrator = Orchestrator::new(plan, node);

    match orchestrator.run() {
        Ok(result) => report(&result, config.export.path.as_deref()),
        Err(e) => {
            eprintln!("Setup failed: {:#}", anyhow::Error::new(e));
            std::process::exit(1);
        }
    }
}

fn report(result: &BootstrapResult, export_path: Option<&Path>) -> Result<()> {
    let exported = result.export();

    println!("Setup completed successfully");
    println!();
    println!("Seed Phrase (Mnemonic):");
    println!("  {}", result.mnemonic);
    println!();
    println!("Multisig Address: {}", result.address);
    println!("Descriptor:       {}", result.descriptor);
    for (xpub, origin) in result.xpubs.iter().zip(&result.key_origins) {
        println!("  {}{}", origin, xpub);
    }
    println!();
    println!("Caravan Multisig Configuration:");
    println!("{}", exported.to_json_pretty()?);

    if let Some(path) = export_path {
        exported.write_to(path)?;
        log::info!("Wrote coordinator config to {}", path.display());
    }
    Ok(())
}

fn print_help() {
    println!(
        r#"regmsig-bootstrap: funded regtest multisig for coordinator testing

USAGE:
    regmsig-bootstrap [OPTIONS]

OPTIONS:
    -c, --config <PATH>   Config file path (optional, defaults apply)
    --export <PATH>       Also write the coordinator JSON to PATH
    --mnemonic <WORDS>    Replay a BIP-39 phrase instead of generating one
    --validate            Validate configuration and exit
    -h, --help            Show this help message
    -V, --version         Show version

ENVIRONMENT VARIABLES (override config file):
    REGMSIG_CLI_PATH       bitcoin-cli binary
    REGMSIG_RPC_HOST       Node RPC host
    REGMSIG_RPC_PORT       Node RPC port
    REGMSIG_RPC_USER       RPC username
    REGMSIG_RPC_PASSWORD   RPC password
    REGMSIG_NETWORK        Network (only regtest is accepted)
    REGMSIG_WALLET         Node wallet name
    REGMSIG_MNEMONIC       Mnemonic to replay
    REGMSIG_LOG_LEVEL      Log level (error/warn/info/debug/trace)
    REGMSIG_EXPORT_PATH    Export file path

EXAMPLES:
    # Stock local regtest node
    regmsig-bootstrap

    # Custom node, write the coordinator file
    regmsig-bootstrap --config regmsig.toml --export caravan.json
"#
    );
}
