//! Bootstrap state machine.
//!
//! ```text
//! WaitingForNode → ProvisioningWallet → DerivingKeys → BuildingMultisig
//!   → MiningInitialCoins → FundingMultisig → ConfirmingDeposit
//!   → GeneratingHistory → Done
//! ```
//!
//! Any handler failure moves the machine to `Failed`. Transitions only go
//! forward; the only retry anywhere is the node readiness poll.

use crate::export::{BootstrapResult, HistoryEntry};
use bitcoin::{Address, Amount, Network, Txid};
use regmsig_core::{
    derive_accounts, descriptor_address, descriptor_string, neutered_export, new_seed,
    order_keys, parse_mnemonic, root_from, Account, AccountTemplate, KeyError, KeyOrder,
    MultisigDescriptor, MultisigError, SeedError, SeedMaterial, DEFAULT_ENTROPY_BITS,
};
use regmsig_node::{CommandRunner, NodeClient};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Blocks a coinbase output must wait before it can be spent.
pub const COINBASE_MATURITY: u32 = 100;

/// Initial mining: one block past maturity so exactly one coinbase is spendable.
pub const INITIAL_BLOCKS: u32 = COINBASE_MATURITY + 1;

/// Blocks mined to confirm each send.
pub const CONFIRMATION_BLOCKS: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapState {
    WaitingForNode,
    ProvisioningWallet,
    DerivingKeys,
    BuildingMultisig,
    MiningInitialCoins,
    FundingMultisig,
    ConfirmingDeposit,
    GeneratingHistory,
    Done,
    Failed,
}

impl BootstrapState {
    /// Successor on success. Terminal states map to themselves.
    pub fn next(self) -> Self {
        use BootstrapState::*;
        match self {
            WaitingForNode => ProvisioningWallet,
            ProvisioningWallet => DerivingKeys,
            DerivingKeys => BuildingMultisig,
            BuildingMultisig => MiningInitialCoins,
            MiningInitialCoins => FundingMultisig,
            FundingMultisig => ConfirmingDeposit,
            ConfirmingDeposit => GeneratingHistory,
            GeneratingHistory => Done,
            Done => Done,
            Failed => Failed,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, BootstrapState::Done | BootstrapState::Failed)
    }
}

impl fmt::Display for BootstrapState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BootstrapState::WaitingForNode => "waiting for node",
            BootstrapState::ProvisioningWallet => "provisioning wallet",
            BootstrapState::DerivingKeys => "deriving keys",
            BootstrapState::BuildingMultisig => "building multisig",
            BootstrapState::MiningInitialCoins => "mining initial coins",
            BootstrapState::FundingMultisig => "funding multisig",
            BootstrapState::ConfirmingDeposit => "confirming deposit",
            BootstrapState::GeneratingHistory => "generating history",
            BootstrapState::Done => "done",
            BootstrapState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Cause of a failed step.
#[derive(Error, Debug)]
pub enum StepError {
    #[error(transparent)]
    Node(#[from] regmsig_node::Error),

    #[error(transparent)]
    Seed(#[from] SeedError),

    #[error(transparent)]
    Key(#[from] KeyError),

    #[error(transparent)]
    Multisig(#[from] MultisigError),

    #[error("Descriptor resolves to {descriptor}, witness script gives {script}")]
    DescriptorMismatch { descriptor: String, script: String },

    #[error("No {0} available at this step")]
    MissingInput(&'static str),

    #[error("Bootstrap already finished")]
    AlreadyFinished,
}

/// A step failed; `state` is the state whose handler failed.
#[derive(Error, Debug)]
#[error("Bootstrap failed while {state}")]
pub struct BootstrapError {
    pub state: BootstrapState,
    #[source]
    pub source: StepError,
}

/// Validated, typed run parameters.
#[derive(Debug, Clone)]
pub struct BootstrapPlan {
    pub network: Network,
    pub wallet_name: String,
    pub max_attempts: u32,
    pub poll_interval: Duration,
    pub entropy_bits: usize,
    pub required_signers: usize,
    pub total_signers: usize,
    pub key_order: KeyOrder,
    pub template: AccountTemplate,
    pub deposit: Amount,
    pub history_count: u32,
    pub history_amount: Amount,
    /// Replay this phrase instead of drawing fresh entropy
    pub mnemonic: Option<String>,
}

impl Default for BootstrapPlan {
    fn default() -> Self {
        Self {
            network: Network::Regtest,
            wallet_name: "caravan_test_wallet".to_string(),
            max_attempts: 10,
            poll_interval: Duration::from_secs(1),
            entropy_bits: DEFAULT_ENTROPY_BITS,
            required_signers: 2,
            total_signers: 3,
            key_order: KeyOrder::default(),
            template: AccountTemplate::default(),
            deposit: Amount::from_int_btc(10),
            history_count: 5,
            history_amount: Amount::from_int_btc(1),
            mnemonic: None,
        }
    }
}

/// What earlier steps produced for later ones.
#[derive(Default)]
struct Progress {
    seed: Option<SeedMaterial>,
    accounts: Vec<Account>,
    multisig: Option<MultisigDescriptor>,
    descriptor: Option<String>,
    xpubs: Vec<String>,
    key_origins: Vec<String>,
    miner: Option<Address>,
    deposit_txid: Option<Txid>,
    history: Vec<HistoryEntry>,
}

/// Drives a node from "maybe not up yet" to a funded multisig with history.
pub struct Orchestrator<R: CommandRunner> {
    plan: BootstrapPlan,
    node: NodeClient<R>,
    state: BootstrapState,
    progress: Progress,
}

impl<R: CommandRunner> Orchestrator<R> {
    pub fn new(plan: BootstrapPlan, node: NodeClient<R>) -> Self {
        Self {
            plan,
            node,
            state: BootstrapState::WaitingForNode,
            progress: Progress::default(),
        }
    }

    pub fn state(&self) -> BootstrapState {
        self.state
    }

    pub fn plan(&self) -> &BootstrapPlan {
        &self.plan
    }

    pub fn node(&self) -> &NodeClient<R> {
        &self.node
    }

    /// Run the current state's handler and advance.
    ///
    /// Returns the result on the step that reaches `Done`, `None` before that.
    /// Stepping a finished machine fails with [`StepError::AlreadyFinished`].
    pub fn step(&mut self) -> Result<Option<BootstrapResult>, BootstrapError> {
        let state = self.state;
        let outcome = match state {
            BootstrapState::WaitingForNode => self.wait_for_node(),
            BootstrapState::ProvisioningWallet => self.provision_wallet(),
            BootstrapState::DerivingKeys => self.derive_keys(),
            BootstrapState::BuildingMultisig => self.build_multisig(),
            BootstrapState::MiningInitialCoins => self.mine_initial_coins(),
            BootstrapState::FundingMultisig => self.fund_multisig(),
            BootstrapState::ConfirmingDeposit => self.confirm_deposit(),
            BootstrapState::GeneratingHistory => self.generate_history(),
            BootstrapState::Done | BootstrapState::Failed => Err(StepError::AlreadyFinished),
        };

        if let Err(source) = outcome {
            if !state.is_terminal() {
                self.state = BootstrapState::Failed;
                log::debug!("{} → {}", state, self.state);
            }
            return Err(BootstrapError { state, source });
        }

        self.state = state.next();
        log::debug!("{} → {}", state, self.state);

        if self.state == BootstrapState::Done {
            let result = self.assemble_result().map_err(|source| {
                self.state = BootstrapState::Failed;
                BootstrapError {
                    state: BootstrapState::Done,
                    source,
                }
            })?;
            log::info!("Bootstrap complete: {} funded", result.address);
            return Ok(Some(result));
        }

        Ok(None)
    }

    /// Step until `Done` or the first failure.
    pub fn run(&mut self) -> Result<BootstrapResult, BootstrapError> {
        loop {
            if let Some(result) = self.step()? {
                return Ok(result);
            }
        }
    }

    fn wait_for_node(&mut self) -> Result<(), StepError> {
        self.node
            .wait_ready(self.plan.max_attempts, self.plan.poll_interval)?;
        Ok(())
    }

    fn provision_wallet(&mut self) -> Result<(), StepError> {
        let provision = self.node.create_or_load_wallet(&self.plan.wallet_name)?;
        log::info!("Wallet {} ready ({:?})", self.plan.wallet_name, provision);
        Ok(())
    }

    fn derive_keys(&mut self) -> Result<(), StepError> {
        let seed = match &self.plan.mnemonic {
            Some(words) => {
                log::info!("Replaying configured mnemonic");
                SeedMaterial::from_mnemonic(parse_mnemonic(words)?)
            }
            None => new_seed(self.plan.entropy_bits)?,
        };

        let count = u32::try_from(self.plan.total_signers).map_err(|_| {
            MultisigError::InvalidKeySet {
                n: self.plan.total_signers,
            }
        })?;
        let root = root_from(seed.seed(), self.plan.network)?;
        let accounts = derive_accounts(&root, count, &self.plan.template)?;
        log::info!(
            "Derived {} cosigner accounts under {}",
            accounts.len(),
            self.plan.template
        );

        self.progress.seed = Some(seed);
        self.progress.accounts = accounts;
        Ok(())
    }

    fn build_multisig(&mut self) -> Result<(), StepError> {
        let network = self.plan.network;
        let ordered = order_keys(&self.progress.accounts, self.plan.key_order);
        if ordered.is_empty() {
            return Err(StepError::MissingInput("cosigner accounts"));
        }

        let multisig =
            MultisigDescriptor::from_accounts(self.plan.required_signers, &ordered, network)?;
        let descriptor = descriptor_string(self.plan.required_signers, &ordered)?;

        let resolved = descriptor_address(&descriptor, network)?;
        if &resolved != multisig.address() {
            return Err(StepError::DescriptorMismatch {
                descriptor: resolved.to_string(),
                script: multisig.address().to_string(),
            });
        }

        log::info!(
            "Multisig {}-of-{} address: {}",
            multisig.threshold(),
            multisig.total_signers(),
            multisig.address()
        );
        log::debug!("Descriptor: {}", descriptor);

        self.progress.xpubs = ordered.iter().map(|a| neutered_export(a)).collect();
        self.progress.key_origins = ordered.iter().map(|a| a.key_origin()).collect();
        self.progress.descriptor = Some(descriptor);
        self.progress.multisig = Some(multisig);
        Ok(())
    }

    fn mine_initial_coins(&mut self) -> Result<(), StepError> {
        let miner = self.node.get_new_address()?;
        log::info!("Mining {} blocks to {}", INITIAL_BLOCKS, miner);
        self.node.generate_to_address(INITIAL_BLOCKS, &miner)?;
        self.progress.miner = Some(miner);
        Ok(())
    }

    fn fund_multisig(&mut self) -> Result<(), StepError> {
        let multisig = self
            .progress
            .multisig
            .as_ref()
            .ok_or(StepError::MissingInput("multisig address"))?;
        let txid = self
            .node
            .send_to_address(multisig.address(), self.plan.deposit)?;
        log::info!(
            "Sent {} to {} in {}",
            self.plan.deposit,
            multisig.address(),
            txid
        );
        self.progress.deposit_txid = Some(txid);
        Ok(())
    }

    fn confirm_deposit(&mut self) -> Result<(), StepError> {
        let miner = self
            .progress
            .miner
            .as_ref()
            .ok_or(StepError::MissingInput("miner address"))?;
        self.node.generate_to_address(CONFIRMATION_BLOCKS, miner)?;
        Ok(())
    }

    fn generate_history(&mut self) -> Result<(), StepError> {
        let miner = self
            .progress
            .miner
            .as_ref()
            .ok_or(StepError::MissingInput("miner address"))?;

        for round in 1..=self.plan.history_count {
            let recipient = self.node.get_new_address()?;
            let txid = self
                .node
                .send_to_address(&recipient, self.plan.history_amount)?;
            let block_hash = self
                .node
                .generate_to_address(CONFIRMATION_BLOCKS, miner)?
                .last()
                .copied()
                .ok_or(StepError::MissingInput("confirming block"))?;
            log::info!(
                "History {}/{}: {} to {} ({})",
                round,
                self.plan.history_count,
                self.plan.history_amount,
                recipient,
                txid
            );
            self.progress.history.push(HistoryEntry {
                recipient: recipient.to_string(),
                txid,
                block_hash,
            });
        }
        Ok(())
    }

    fn assemble_result(&mut self) -> Result<BootstrapResult, StepError> {
        let progress = std::mem::take(&mut self.progress);
        let seed = progress.seed.ok_or(StepError::MissingInput("seed"))?;
        let multisig = progress
            .multisig
            .ok_or(StepError::MissingInput("multisig address"))?;

        Ok(BootstrapResult {
            threshold: multisig.threshold(),
            total_signers: multisig.total_signers(),
            xpubs: progress.xpubs,
            key_origins: progress.key_origins,
            network: self.plan.network.to_string(),
            address: multisig.address().to_string(),
            witness_script: multisig.witness_script().to_hex_string(),
            descriptor: progress
                .descriptor
                .ok_or(StepError::MissingInput("descriptor"))?,
            mnemonic: seed.phrase(),
            miner_address: progress
                .miner
                .ok_or(StepError::MissingInput("miner address"))?
                .to_string(),
            deposit_txid: progress
                .deposit_txid
                .ok_or(StepError::MissingInput("deposit txid"))?,
            history: progress.history,
        })
    }
}
