//! Bootstrap failure modes observed from the outside.
//!
//! Each scenario scripts the in-memory node into one failure and checks that
//! the run stops in the right state, says why, and never touches the node
//! again afterwards.

use bitcoin::Network;
use regmsig_bootstrap::{BootstrapPlan, BootstrapState, Orchestrator, StepError};
use regmsig_node::testing::{FakeNode, Reply};
use regmsig_node::NodeClient;
use std::time::Duration;

fn quick_plan() -> BootstrapPlan {
    BootstrapPlan {
        max_attempts: 4,
        poll_interval: Duration::from_millis(1),
        ..BootstrapPlan::default()
    }
}

fn run(fake: &FakeNode, plan: BootstrapPlan) -> (BootstrapState, Result<(), String>) {
    let mut orch = Orchestrator::new(plan, NodeClient::new(fake, Network::Regtest));
    let outcome = orch.run().map(|_| ()).map_err(|e| {
        let cause = e.source.to_string();
        format!("{} @ {}", cause, e.state)
    });
    (orch.state(), outcome)
}

#[test]
fn test_node_never_comes_up() {
    let fake = FakeNode::regtest();
    fake.unreachable_for(4);

    let (state, outcome) = run(&fake, quick_plan());
    assert_eq!(state, BootstrapState::Failed);
    assert_eq!(
        outcome.unwrap_err(),
        "Node unavailable after 4 attempt(s) @ waiting for node"
    );
    assert_eq!(fake.calls().len(), 4);
}

#[test]
fn test_node_on_wrong_chain() {
    let fake = FakeNode::regtest();
    fake.push_reply(
        "getblockchaininfo",
        Reply::Ok(format!(
            "{{\"chain\": \"main\", \"blocks\": 800000, \"bestblockhash\": \"{:064x}\"}}",
            7
        )),
    );

    let (state, outcome) = run(&fake, quick_plan());
    assert_eq!(state, BootstrapState::Failed);
    assert!(outcome.unwrap_err().contains("expected 'regtest'"));
    assert_eq!(fake.calls().len(), 1);
}

#[test]
fn test_cli_binary_missing() {
    let fake = FakeNode::regtest();
    for _ in 0..4 {
        fake.push_reply("getblockchaininfo", Reply::Missing);
    }

    let (_, outcome) = run(&fake, quick_plan());
    assert!(outcome.unwrap_err().contains("Node unavailable"));
}

#[test]
fn test_wallet_load_failure() {
    let fake = FakeNode::regtest();
    fake.push_reply(
        "createwallet",
        Reply::Fail("error code: -4\nerror message:\nDatabase already exists.".into()),
    );
    fake.push_reply(
        "loadwallet",
        Reply::Fail("error code: -4\nerror message:\nWallet file verification failed.".into()),
    );

    let (state, outcome) = run(&fake, quick_plan());
    assert_eq!(state, BootstrapState::Failed);
    let message = outcome.unwrap_err();
    assert!(message.contains("caravan_test_wallet"));
    assert!(message.ends_with("@ provisioning wallet"));
    assert_eq!(
        fake.methods(),
        vec!["getblockchaininfo", "createwallet", "loadwallet"]
    );
}

#[test]
fn test_unparseable_mining_output() {
    let fake = FakeNode::regtest();
    fake.push_reply("generatetoaddress", Reply::Ok("not json".into()));

    let (state, outcome) = run(&fake, quick_plan());
    assert_eq!(state, BootstrapState::Failed);
    assert!(outcome.unwrap_err().ends_with("@ mining initial coins"));
    // Nothing was sent after the failed mining step
    assert!(!fake.methods().contains(&"sendtoaddress".to_string()));
}

#[test]
fn test_foreign_network_address_rejected() {
    let fake = FakeNode::regtest();
    fake.push_reply(
        "getnewaddress",
        Reply::Ok("bc1qw508d6qejxtdg4y5r3zarvary0c5xw7kv8f3t4".into()),
    );

    let (state, outcome) = run(&fake, quick_plan());
    assert_eq!(state, BootstrapState::Failed);
    assert!(outcome.unwrap_err().contains("not valid on regtest"));
    assert_eq!(fake.height(), 0);
}

#[test]
fn test_overspend_fails_funding() {
    let fake = FakeNode::regtest();
    let plan = BootstrapPlan {
        deposit: bitcoin::Amount::from_int_btc(51),
        ..quick_plan()
    };

    let (state, outcome) = run(&fake, plan);
    assert_eq!(state, BootstrapState::Failed);
    let message = outcome.unwrap_err();
    assert!(message.contains("Insufficient funds"));
    assert!(message.ends_with("@ funding multisig"));
}

#[test]
fn test_confirmation_failure() {
    let fake = FakeNode::regtest();
    // Initial mining succeeds, confirmation block fails
    fake.push_reply(
        "generatetoaddress",
        Reply::Ok(format!(
            "[{}]",
            (1..=101)
                .map(|h| format!("\"{:064x}\"", h))
                .collect::<Vec<_>>()
                .join(",")
        )),
    );
    fake.push_reply("generatetoaddress", Reply::Fail("error: node shutting down".into()));
    // Scripted mining matured nothing, so the deposit is scripted too
    fake.push_reply("sendtoaddress", Reply::Ok(format!("{:064x}", 42)));

    let mut orch = Orchestrator::new(quick_plan(), NodeClient::new(&fake, Network::Regtest));
    let err = orch.run().unwrap_err();
    assert_eq!(err.state, BootstrapState::ConfirmingDeposit);
    assert!(matches!(err.source, StepError::Node(_)));
    assert_eq!(fake.methods().len(), 6);
}
