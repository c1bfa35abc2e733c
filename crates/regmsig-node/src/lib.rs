//! regmsig Node Client
//!
//! Synchronous access to a local regtest `bitcoind` for:
//! - Readiness polling (bounded retries)
//! - Idempotent wallet provisioning (create, or load if it exists)
//! - Mining, address generation and coin transfers
//!
//! Every request is one `bitcoin-cli` invocation through a [`CommandRunner`].
//! Each [`RpcMethod`] declares the shape of its result, and output is decoded
//! against that declaration only.
//!
//! # Example
//!
//! ```ignore
//! use regmsig_node::{BitcoinCli, CliSettings, NodeClient};
//! use bitcoin::Network;
//! use std::time::Duration;
//!
//! let mut client = NodeClient::new(BitcoinCli::new(CliSettings::default()), Network::Regtest);
//! client.wait_ready(10, Duration::from_secs(1))?;
//! client.create_or_load_wallet("caravan_test_wallet")?;
//! let miner = client.get_new_address()?;
//! client.generate_to_address(101, &miner)?;
//! ```

pub mod command;
pub mod method;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use command::{BitcoinCli, CliSettings, CommandOutput, CommandRunner};
pub use method::{render_param, ResultShape, RpcMethod, RpcValue};

use bitcoin::address::NetworkUnchecked;
use bitcoin::{Address, Amount, BlockHash, Network, Txid};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::io;
use std::str::FromStr;
use std::thread;
use std::time::Duration;
use thiserror::Error;

/// Errors from node operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("Node unavailable after {attempts} attempt(s)")]
    NodeUnavailable {
        attempts: u32,
        /// Why the final attempt failed
        #[source]
        last: Option<Box<Error>>,
    },

    #[error("Node runs chain '{actual}', expected '{expected}'")]
    WrongChain { expected: String, actual: String },

    #[error("Failed to provision wallet '{wallet}': {reason}")]
    WalletProvision { wallet: String, reason: String },

    #[error("RPC {method} failed: {stderr}")]
    Rpc { method: String, stderr: String },

    #[error("Could not run node command for {method}: {source}")]
    Spawn {
        method: String,
        #[source]
        source: io::Error,
    },

    #[error("Unexpected {method} result: {reason}")]
    Decode { method: String, reason: String },

    #[error("Address {address} is not valid on {network}")]
    WrongNetwork { address: String, network: Network },
}

/// Subset of `getblockchaininfo` the bootstrap looks at.
#[derive(Debug, Clone, Deserialize)]
pub struct BlockchainInfo {
    pub chain: String,
    pub blocks: u64,
    #[serde(rename = "bestblockhash")]
    pub best_block_hash: BlockHash,
}

/// How [`NodeClient::create_or_load_wallet`] obtained the wallet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalletProvision {
    Created,
    /// Existed on disk and was loaded
    Loaded,
    /// Existed and was already loaded by the node
    AlreadyLoaded,
}

/// Synchronous node client
pub struct NodeClient<R: CommandRunner> {
    runner: R,
    network: Network,
    wallet: Option<String>,
}

impl<R: CommandRunner> NodeClient<R> {
    pub fn new(runner: R, network: Network) -> Self {
        Self {
            runner,
            network,
            wallet: None,
        }
    }

    /// Get the network this client is configured for
    pub fn network(&self) -> Network {
        self.network
    }

    /// Wallet that wallet-scoped requests are sent to, once provisioned.
    pub fn wallet(&self) -> Option<&str> {
        self.wallet.as_deref()
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    /// Poll `getblockchaininfo` until the node answers.
    ///
    /// Sleeps `poll_interval` between failed attempts and gives up with
    /// [`Error::NodeUnavailable`] after `max_attempts` consecutive failures.
    /// A node answering for a different chain fails immediately. The last
    /// attempt's failure is kept as the error's source.
    pub fn wait_ready(
        &self,
        max_attempts: u32,
        poll_interval: Duration,
    ) -> Result<BlockchainInfo, Error> {
        let mut last = None;
        for attempt in 1..=max_attempts {
            match self.get_blockchain_info() {
                Ok(info) => {
                    let expected = self.network.to_core_arg();
                    if info.chain != expected {
                        return Err(Error::WrongChain {
                            expected: expected.to_string(),
                            actual: info.chain,
                        });
                    }
                    log::info!(
                        "Node ready after {} attempt(s): chain={} height={}",
                        attempt,
                        info.chain,
                        info.blocks
                    );
                    return Ok(info);
                }
                Err(e) => {
                    log::info!(
                        "Waiting for node… (attempt {}/{})",
                        attempt,
                        max_attempts
                    );
                    log::debug!("Readiness check failed: {}", e);
                    if attempt < max_attempts {
                        thread::sleep(poll_interval);
                    }
                    last = Some(Box::new(e));
                }
            }
        }

        Err(Error::NodeUnavailable {
            attempts: max_attempts,
            last,
        })
    }

    /// Create the wallet, or load it if it already exists.
    ///
    /// Safe to call on every run: an existing wallet is loaded, and a wallet
    /// the node already has loaded is accepted as is. Wallet-scoped requests
    /// go to `name` afterwards.
    pub fn create_or_load_wallet(&mut self, name: &str) -> Result<WalletProvision, Error> {
        // createwallet <name> disable_private_keys=false blank=false
        let created = self.call(
            &RpcMethod::CreateWallet,
            &[json!(name), json!(false), json!(false)],
        );

        let provision = match created {
            Ok(_) => {
                log::info!("Created wallet: {}", name);
                WalletProvision::Created
            }
            Err(Error::Rpc { ref stderr, .. }) if stderr.contains("already exists") => {
                log::info!("Wallet {} exists, loading…", name);
                match self.call(&RpcMethod::LoadWallet, &[json!(name)]) {
                    Ok(_) => {
                        log::info!("Loaded wallet: {}", name);
                        WalletProvision::Loaded
                    }
                    Err(Error::Rpc { ref stderr, .. }) if stderr.contains("already loaded") => {
                        log::info!("Wallet {} already loaded", name);
                        WalletProvision::AlreadyLoaded
                    }
                    Err(e) => return Err(provision_error(name, e)),
                }
            }
            Err(e) => return Err(provision_error(name, e)),
        };

        self.wallet = Some(name.to_string());
        Ok(provision)
    }

    /// Send one request and decode the result by the method's declared shape.
    pub fn call(&self, method: &RpcMethod, params: &[Value]) -> Result<RpcValue, Error> {
        let mut args = Vec::with_capacity(params.len() + 2);
        if method.wallet_scoped() {
            if let Some(wallet) = &self.wallet {
                args.push(format!("-rpcwallet={}", wallet));
            }
        }
        args.push(method.name().to_string());
        args.extend(params.iter().map(render_param));

        log::debug!("Executing: bitcoin-cli {}", args.join(" "));

        let output = self.runner.run(&args).map_err(|source| Error::Spawn {
            method: method.name().to_string(),
            source,
        })?;

        if !output.success {
            return Err(Error::Rpc {
                method: method.name().to_string(),
                stderr: output.stderr.trim().to_string(),
            });
        }

        RpcValue::decode(method.result_shape(), &output.stdout).map_err(|reason| Error::Decode {
            method: method.name().to_string(),
            reason,
        })
    }

    pub fn get_blockchain_info(&self) -> Result<BlockchainInfo, Error> {
        let value = self.call(&RpcMethod::GetBlockchainInfo, &[])?;
        from_json(&RpcMethod::GetBlockchainInfo, value)
    }

    /// New receive address from the provisioned wallet.
    pub fn get_new_address(&self) -> Result<Address, Error> {
        let value = self.call(&RpcMethod::GetNewAddress, &[])?;
        let text = expect_text(&RpcMethod::GetNewAddress, &value)?;
        self.checked_address(&RpcMethod::GetNewAddress, text)
    }

    /// Mine `blocks` blocks paying to `address`.
    pub fn generate_to_address(
        &self,
        blocks: u32,
        address: &Address,
    ) -> Result<Vec<BlockHash>, Error> {
        let method = RpcMethod::GenerateToAddress;
        let value = self.call(&method, &[json!(blocks), json!(address.to_string())])?;
        let hashes: Vec<BlockHash> = from_json(&method, value)?;
        if hashes.len() != blocks as usize {
            return Err(Error::Decode {
                method: method.name().to_string(),
                reason: format!("expected {} block hashes, got {}", blocks, hashes.len()),
            });
        }
        Ok(hashes)
    }

    /// Send `amount` to `address` from the provisioned wallet.
    pub fn send_to_address(&self, address: &Address, amount: Amount) -> Result<Txid, Error> {
        let method = RpcMethod::SendToAddress;
        let value = self.call(&method, &[json!(address.to_string()), json!(amount.to_btc())])?;
        let text = expect_text(&method, &value)?;
        Txid::from_str(text).map_err(|e| Error::Decode {
            method: method.name().to_string(),
            reason: format!("invalid txid {:?}: {}", text, e),
        })
    }

    /// Trusted balance of the provisioned wallet.
    pub fn get_balance(&self) -> Result<Amount, Error> {
        let method = RpcMethod::GetBalance;
        let value = self.call(&method, &[])?;
        let btc = value
            .as_json()
            .and_then(Value::as_f64)
            .ok_or_else(|| Error::Decode {
                method: method.name().to_string(),
                reason: "expected a number".to_string(),
            })?;
        Amount::from_btc(btc).map_err(|e| Error::Decode {
            method: method.name().to_string(),
            reason: e.to_string(),
        })
    }

    fn checked_address(&self, method: &RpcMethod, text: &str) -> Result<Address, Error> {
        let unchecked = Address::<NetworkUnchecked>::from_str(text).map_err(|e| Error::Decode {
            method: method.name().to_string(),
            reason: format!("invalid address {:?}: {}", text, e),
        })?;
        unchecked
            .require_network(self.network)
            .map_err(|_| Error::WrongNetwork {
                address: text.to_string(),
                network: self.network,
            })
    }
}

fn provision_error(wallet: &str, err: Error) -> Error {
    let reason = match err {
        Error::Rpc { stderr, .. } => stderr,
        other => other.to_string(),
    };
    Error::WalletProvision {
        wallet: wallet.to_string(),
        reason,
    }
}

fn expect_text<'a>(method: &RpcMethod, value: &'a RpcValue) -> Result<&'a str, Error> {
    value.as_text().ok_or_else(|| Error::Decode {
        method: method.name().to_string(),
        reason: "expected a text result".to_string(),
    })
}

fn from_json<T: DeserializeOwned>(method: &RpcMethod, value: RpcValue) -> Result<T, Error> {
    let json = match value {
        RpcValue::Json(json) => json,
        _ => {
            return Err(Error::Decode {
                method: method.name().to_string(),
                reason: "expected a JSON result".to_string(),
            })
        }
    };
    serde_json::from_value(json).map_err(|e| Error::Decode {
        method: method.name().to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeNode, Reply};

    fn client(fake: &FakeNode) -> NodeClient<&FakeNode> {
        NodeClient::new(fake, Network::Regtest)
    }

    #[test]
    fn test_wait_ready_first_try() {
        let fake = FakeNode::regtest();
        let info = client(&fake).wait_ready(3, Duration::ZERO).unwrap();
        assert_eq!(info.chain, "regtest");
        assert_eq!(fake.methods(), vec!["getblockchaininfo"]);
    }

    #[test]
    fn test_wait_ready_retries_until_up() {
        let fake = FakeNode::regtest();
        fake.unreachable_for(2);

        client(&fake).wait_ready(5, Duration::ZERO).unwrap();
        assert_eq!(fake.methods().len(), 3);
    }

    #[test]
    fn test_wait_ready_gives_up() {
        let fake = FakeNode::regtest();
        fake.unreachable_for(10);

        let err = client(&fake)
            .wait_ready(4, Duration::from_millis(1))
            .unwrap_err();
        assert!(matches!(err, Error::NodeUnavailable { attempts: 4, .. }));
        assert_eq!(fake.methods().len(), 4);
    }

    #[test]
    fn test_wait_ready_keeps_last_failure() {
        let fake = FakeNode::regtest();
        fake.push_reply(
            "getblockchaininfo",
            Reply::Fail("error: Authorization failed: Incorrect rpcuser or rpcpassword".into()),
        );

        let err = client(&fake).wait_ready(1, Duration::ZERO).unwrap_err();
        assert_eq!(err.to_string(), "Node unavailable after 1 attempt(s)");

        let cause = std::error::Error::source(&err).unwrap().to_string();
        assert!(cause.contains("Authorization failed"));
        assert!(cause.starts_with("RPC getblockchaininfo failed"));
    }

    #[test]
    fn test_wait_ready_reports_missing_binary() {
        let fake = FakeNode::regtest();
        fake.push_reply("getblockchaininfo", Reply::Missing);
        fake.push_reply("getblockchaininfo", Reply::Missing);

        let err = client(&fake).wait_ready(2, Duration::ZERO).unwrap_err();
        match err {
            Error::NodeUnavailable {
                attempts: 2,
                last: Some(last),
            } => assert!(matches!(*last, Error::Spawn { .. })),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_wait_ready_zero_attempts() {
        let fake = FakeNode::regtest();
        let err = client(&fake).wait_ready(0, Duration::ZERO).unwrap_err();
        assert!(matches!(
            err,
            Error::NodeUnavailable {
                attempts: 0,
                last: None
            }
        ));
        assert!(fake.calls().is_empty());
    }

    #[test]
    fn test_wait_ready_wrong_chain() {
        let fake = FakeNode::regtest();
        let client = NodeClient::new(&fake, Network::Signet);
        let err = client.wait_ready(3, Duration::ZERO).unwrap_err();
        assert!(matches!(err, Error::WrongChain { .. }));
        // Not retried
        assert_eq!(fake.methods().len(), 1);
    }

    #[test]
    fn test_create_then_load_is_idempotent() {
        let fake = FakeNode::regtest();

        let mut first = client(&fake);
        assert_eq!(
            first.create_or_load_wallet("caravan_test_wallet").unwrap(),
            WalletProvision::Created
        );

        // Simulate a node restart: wallet on disk but not loaded
        fake.unload_all();

        let mut second = client(&fake);
        assert_eq!(
            second.create_or_load_wallet("caravan_test_wallet").unwrap(),
            WalletProvision::Loaded
        );
        assert_eq!(second.wallet(), Some("caravan_test_wallet"));
        assert_eq!(
            fake.methods(),
            vec!["createwallet", "createwallet", "loadwallet"]
        );
    }

    #[test]
    fn test_create_twice_while_loaded() {
        let fake = FakeNode::regtest();
        let mut node = client(&fake);

        node.create_or_load_wallet("w").unwrap();
        assert_eq!(
            node.create_or_load_wallet("w").unwrap(),
            WalletProvision::AlreadyLoaded
        );
    }

    #[test]
    fn test_create_wallet_other_failure() {
        let fake = FakeNode::regtest();
        fake.push_reply(
            "createwallet",
            Reply::Fail("error code: -18\nerror message:\nRequested wallet does not exist".into()),
        );

        let err = client(&fake).create_or_load_wallet("w").unwrap_err();
        match err {
            Error::WalletProvision { wallet, reason } => {
                assert_eq!(wallet, "w");
                assert!(reason.contains("does not exist"));
            }
            other => panic!("unexpected error: {other}"),
        }
        // No load attempt after a non-"exists" failure
        assert_eq!(fake.methods(), vec!["createwallet"]);
    }

    #[test]
    fn test_wallet_scoped_args() {
        let fake = FakeNode::regtest();
        let mut node = client(&fake);
        node.create_or_load_wallet("caravan").unwrap();
        node.get_new_address().unwrap();

        let calls = fake.calls();
        assert_eq!(calls[0], vec!["createwallet", "caravan", "false", "false"]);
        assert_eq!(calls[1], vec!["-rpcwallet=caravan", "getnewaddress"]);
    }

    #[test]
    fn test_rpc_failure_carries_stderr() {
        let fake = FakeNode::regtest();
        fake.push_reply("getnewaddress", Reply::Fail("error code: -18\nNo wallet".into()));

        let err = client(&fake).get_new_address().unwrap_err();
        match err {
            Error::Rpc { method, stderr } => {
                assert_eq!(method, "getnewaddress");
                assert!(stderr.contains("No wallet"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_spawn_failure() {
        let fake = FakeNode::regtest();
        fake.push_reply("getblockchaininfo", Reply::Missing);
        let err = client(&fake).get_blockchain_info().unwrap_err();
        assert!(matches!(err, Error::Spawn { .. }));
    }

    #[test]
    fn test_generate_and_send() {
        let fake = FakeNode::regtest();
        let mut node = client(&fake);
        node.create_or_load_wallet("w").unwrap();

        let miner = node.get_new_address().unwrap();
        let hashes = node.generate_to_address(101, &miner).unwrap();
        assert_eq!(hashes.len(), 101);
        assert_eq!(node.get_blockchain_info().unwrap().blocks, 101);

        let target = node.get_new_address().unwrap();
        assert_ne!(miner, target);
        node.send_to_address(&target, Amount::from_btc(1.0).unwrap())
            .unwrap();

        let send = fake
            .calls()
            .into_iter()
            .find(|c| c.iter().any(|arg| arg == "sendtoaddress"))
            .unwrap();
        assert_eq!(send[2], target.to_string());
        assert_eq!(send[3], "1.0");
    }

    #[test]
    fn test_send_before_maturity_fails() {
        let fake = FakeNode::regtest();
        let mut node = client(&fake);
        node.create_or_load_wallet("w").unwrap();
        let miner = node.get_new_address().unwrap();
        node.generate_to_address(100, &miner).unwrap();

        let err = node
            .send_to_address(&miner, Amount::from_btc(1.0).unwrap())
            .unwrap_err();
        assert!(matches!(err, Error::Rpc { ref stderr, .. } if stderr.contains("Insufficient funds")));
    }

    #[test]
    fn test_generate_count_mismatch() {
        let fake = FakeNode::regtest();
        let node = client(&fake);
        fake.push_reply("generatetoaddress", Reply::Ok("[]".into()));

        let addr = fake.address_for(7);
        let err = node.generate_to_address(1, &addr).unwrap_err();
        assert!(matches!(err, Error::Decode { .. }));
    }

    #[test]
    fn test_address_on_wrong_network() {
        let fake = FakeNode::regtest();
        fake.push_reply(
            "getnewaddress",
            Reply::Ok("bc1qw508d6qejxtdg4y5r3zarvary0c5xw7kv8f3t4".into()),
        );
        let err = client(&fake).get_new_address().unwrap_err();
        assert!(matches!(err, Error::WrongNetwork { .. }));
    }

    #[test]
    fn test_get_balance() {
        let fake = FakeNode::regtest();
        let mut node = client(&fake);
        node.create_or_load_wallet("w").unwrap();
        let miner = node.get_new_address().unwrap();
        node.generate_to_address(101, &miner).unwrap();

        assert_eq!(node.get_balance().unwrap(), Amount::from_btc(50.0).unwrap());
    }

    #[test]
    fn test_custom_method() {
        let fake = FakeNode::regtest();
        fake.push_reply("listlabels", Reply::Ok("[\"\"]\n".into()));

        let value = client(&fake)
            .call(&RpcMethod::custom("listlabels", ResultShape::Json), &[])
            .unwrap();
        assert_eq!(value.as_json(), Some(&json!([""])));
    }
}
