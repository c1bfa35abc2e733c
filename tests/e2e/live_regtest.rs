//! Live bootstrap against a real `bitcoind -regtest`.
//!
//! Requires a running node and `bitcoin-cli` on PATH. Connection settings
//! come from the usual `REGMSIG_*` environment variables, defaulting to
//! 127.0.0.1:18443 with user/pass.
//!
//! Run with:
//!   cargo test -p regmsig-e2e --test live_regtest -- --ignored --nocapture

use bitcoin::Amount;
use regmsig_bootstrap::{BootstrapConfig, Orchestrator};
use regmsig_node::{BitcoinCli, NodeClient, ResultShape, RpcMethod};
use serde_json::json;

fn live_config() -> BootstrapConfig {
    let mut config = BootstrapConfig::default();
    config.apply_env_overrides();
    config.bootstrap.max_attempts = 5;
    config.validate().expect("invalid live config");
    config
}

#[test]
#[ignore]
fn test_live_bootstrap() {
    let config = live_config();
    let plan = config.plan().unwrap();
    let deposit = plan.deposit;
    let node = NodeClient::new(BitcoinCli::new(config.cli_settings().unwrap()), plan.network);

    let mut orchestrator = Orchestrator::new(plan, node);
    let result = orchestrator.run().expect("bootstrap failed");
    println!("Multisig address: {}", result.address);
    println!("{}", result.export().to_json_pretty().unwrap());

    let node = orchestrator.node();

    // Deposit is confirmed
    let tx = node
        .call(
            &RpcMethod::custom("gettransaction", ResultShape::Json),
            &[json!(result.deposit_txid.to_string())],
        )
        .unwrap();
    let confirmations = tx.as_json().unwrap()["confirmations"].as_i64().unwrap();
    assert!(confirmations >= 1 + result.history.len() as i64);

    // The multisig UTXO set holds at least the deposit
    let scan = node
        .call(
            &RpcMethod::custom("scantxoutset", ResultShape::Json),
            &[json!("start"), json!([format!("addr({})", result.address)])],
        )
        .unwrap();
    let total = scan.as_json().unwrap()["total_amount"].as_f64().unwrap();
    assert!(Amount::from_btc(total).unwrap() >= deposit);
}

#[test]
#[ignore]
fn test_live_rerun_is_idempotent() {
    let config = live_config();

    for _ in 0..2 {
        let plan = config.plan().unwrap();
        let node = NodeClient::new(BitcoinCli::new(config.cli_settings().unwrap()), plan.network);
        Orchestrator::new(plan, node)
            .run()
            .expect("bootstrap failed on rerun");
    }
}
