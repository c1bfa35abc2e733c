//! In-memory stand-in for a regtest node, for tests.
//!
//! [`FakeNode`] answers `bitcoin-cli` requests the way a fresh regtest
//! `bitcoind` would (wallets, block height, coinbase maturity) and records
//! every invocation so tests can assert on exact call order. Replies can be
//! scripted per method with [`FakeNode::push_reply`].

use crate::command::{CommandOutput, CommandRunner};
use bitcoin::script::ScriptBuf;
use bitcoin::{Address, Network};
use std::cell::RefCell;
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::io;

/// Blocks before a regtest coinbase can be spent.
const FAKE_COINBASE_MATURITY: u64 = 100;

/// Regtest block subsidy in BTC (ignoring halvings past height 150).
const FAKE_SUBSIDY_BTC: u64 = 50;

/// Scripted reply for one request.
#[derive(Debug, Clone)]
pub enum Reply {
    /// Success with this stdout
    Ok(String),
    /// Command failed with this stderr
    Fail(String),
    /// Node not reachable
    Unreachable,
    /// The CLI binary could not be started
    Missing,
}

#[derive(Debug, Default)]
struct FakeState {
    calls: Vec<Vec<String>>,
    queued: HashMap<String, VecDeque<Reply>>,
    wallets: BTreeSet<String>,
    loaded: BTreeSet<String>,
    height: u64,
    next_address: u32,
    next_txid: u64,
    sent_sats: u64,
}

/// Scripted regtest node.
#[derive(Debug, Default)]
pub struct FakeNode {
    state: RefCell<FakeState>,
}

impl FakeNode {
    /// Fresh regtest node at height 0 with no wallets.
    pub fn regtest() -> Self {
        Self::default()
    }

    /// Queue a reply for the next request of `method`.
    pub fn push_reply(&self, method: &str, reply: Reply) {
        self.state
            .borrow_mut()
            .queued
            .entry(method.to_string())
            .or_default()
            .push_back(reply);
    }

    /// Make the next `n` readiness checks fail as if the node were down.
    pub fn unreachable_for(&self, n: usize) {
        for _ in 0..n {
            self.push_reply("getblockchaininfo", Reply::Unreachable);
        }
    }

    /// Unload every wallet, as a node restart would.
    pub fn unload_all(&self) {
        self.state.borrow_mut().loaded.clear();
    }

    /// Every invocation so far, arguments as passed to the runner.
    pub fn calls(&self) -> Vec<Vec<String>> {
        self.state.borrow().calls.clone()
    }

    /// Method names of every invocation so far, in order.
    pub fn methods(&self) -> Vec<String> {
        self.state
            .borrow()
            .calls
            .iter()
            .filter_map(|args| method_of(args).map(str::to_string))
            .collect()
    }

    pub fn height(&self) -> u64 {
        self.state.borrow().height
    }

    /// The `index`-th address this node hands out.
    pub fn address_for(&self, index: u32) -> Address {
        let script = ScriptBuf::from_bytes(index.to_be_bytes().to_vec());
        Address::p2wsh(&script, Network::Regtest)
    }

    fn respond(&self, args: &[String]) -> io::Result<CommandOutput> {
        let method = method_of(args).unwrap_or_default().to_string();
        let params: Vec<&str> = args
            .iter()
            .skip_while(|a| a.as_str() != method)
            .skip(1)
            .map(String::as_str)
            .collect();

        let queued = self
            .state
            .borrow_mut()
            .queued
            .get_mut(&method)
            .and_then(VecDeque::pop_front);
        if let Some(reply) = queued {
            return match reply {
                Reply::Ok(stdout) => Ok(CommandOutput::ok(stdout)),
                Reply::Fail(stderr) => Ok(CommandOutput::failed(stderr)),
                Reply::Unreachable => Ok(CommandOutput::failed(
                    "error: Could not connect to the server 127.0.0.1:18443",
                )),
                Reply::Missing => Err(io::Error::new(
                    io::ErrorKind::NotFound,
                    "bitcoin-cli: command not found",
                )),
            };
        }

        Ok(self.simulate(&method, &params))
    }

    fn simulate(&self, method: &str, params: &[&str]) -> CommandOutput {
        let mut state = self.state.borrow_mut();
        match method {
            "getblockchaininfo" => CommandOutput::ok(format!(
                "{{\"chain\": \"regtest\", \"blocks\": {}, \"bestblockhash\": \"{}\"}}\n",
                state.height,
                block_hash(state.height)
            )),
            "createwallet" => {
                let name = params.first().copied().unwrap_or_default().to_string();
                if state.wallets.contains(&name) {
                    CommandOutput::failed(format!(
                        "error code: -4\nerror message:\nWallet file verification failed. \
                         Failed to create database path '/regtest/wallets/{}'. Database already exists.",
                        name
                    ))
                } else {
                    state.wallets.insert(name.clone());
                    state.loaded.insert(name.clone());
                    CommandOutput::ok(format!("{{\"name\": \"{}\"}}\n", name))
                }
            }
            "loadwallet" => {
                let name = params.first().copied().unwrap_or_default().to_string();
                if state.loaded.contains(&name) {
                    CommandOutput::failed(format!(
                        "error code: -35\nerror message:\nWallet \"{}\" is already loaded.",
                        name
                    ))
                } else if state.wallets.contains(&name) {
                    state.loaded.insert(name.clone());
                    CommandOutput::ok(format!("{{\"name\": \"{}\"}}\n", name))
                } else {
                    CommandOutput::failed(format!(
                        "error code: -18\nerror message:\nPath does not exist: {}",
                        name
                    ))
                }
            }
            "getnewaddress" => {
                let index = state.next_address;
                state.next_address += 1;
                drop(state);
                CommandOutput::ok(format!("{}\n", self.address_for(index)))
            }
            "generatetoaddress" => {
                let count: u64 = params.first().and_then(|p| p.parse().ok()).unwrap_or(0);
                let mut hashes = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    state.height += 1;
                    hashes.push(format!("\"{}\"", block_hash(state.height)));
                }
                CommandOutput::ok(format!("[\n{}\n]\n", hashes.join(",\n")))
            }
            "sendtoaddress" => {
                let amount_btc: f64 = params.get(1).and_then(|p| p.parse().ok()).unwrap_or(0.0);
                let amount_sats = (amount_btc * 100_000_000.0).round() as u64;
                if amount_sats == 0 || amount_sats > spendable_sats(&state) {
                    return CommandOutput::failed(
                        "error code: -6\nerror message:\nInsufficient funds",
                    );
                }
                state.sent_sats += amount_sats;
                state.next_txid += 1;
                CommandOutput::ok(format!("{:064x}\n", 0xfeed_0000_u64 + state.next_txid))
            }
            "getbalance" => {
                let sats = spendable_sats(&state);
                CommandOutput::ok(format!("{}.{:08}\n", sats / 100_000_000, sats % 100_000_000))
            }
            other => CommandOutput::failed(format!(
                "error code: -32601\nerror message:\nMethod not found: {}",
                other
            )),
        }
    }
}

impl CommandRunner for FakeNode {
    fn run(&self, args: &[String]) -> io::Result<CommandOutput> {
        self.state.borrow_mut().calls.push(args.to_vec());
        self.respond(args)
    }
}

/// First argument that is not a `-option`.
fn method_of(args: &[String]) -> Option<&str> {
    args.iter().map(String::as_str).find(|a| !a.starts_with('-'))
}

fn block_hash(height: u64) -> String {
    format!("{:064x}", 0x0b10_c000_0000_u64 + height)
}

/// Matured coinbase value minus what was sent (sends to own addresses are
/// treated as spent).
fn spendable_sats(state: &FakeState) -> u64 {
    let matured = state.height.saturating_sub(FAKE_COINBASE_MATURITY);
    (matured * FAKE_SUBSIDY_BTC * 100_000_000).saturating_sub(state.sent_sats)
}
