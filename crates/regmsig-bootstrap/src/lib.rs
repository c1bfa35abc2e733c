//! regmsig Bootstrap
//!
//! Brings a local regtest node from "maybe not up yet" to a funded m-of-n
//! P2WSH multisig with a short transaction history, and exports the
//! coordinator configuration for it.
//!
//! - [`config`]: TOML + environment configuration
//! - [`orchestrator`]: the bootstrap state machine
//! - [`export`]: run result and coordinator JSON

pub mod config;
pub mod export;
pub mod orchestrator;

pub use config::BootstrapConfig;
pub use export::{BootstrapResult, CoordinatorConfig, HistoryEntry, Quorum};
pub use orchestrator::{
    BootstrapError, BootstrapPlan, BootstrapState, Orchestrator, StepError, COINBASE_MATURITY,
};
