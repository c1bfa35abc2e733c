//! regmsig Core
//!
//! Pure key and script construction for the regtest multisig bootstrap.
//!
//! # Key Derivation
//!
//! From a single BIP-39 seed, one account per cosigner:
//! - Cosigner `i` via BIP-48 (P2WSH, test networks): m/48'/1'/i'/2'
//!
//! # Multisig
//!
//! The account public keys themselves (not per-address children) go into an
//! `OP_m ... OP_n OP_CHECKMULTISIG` witness script, wrapped as P2WSH.

pub mod keys;
pub mod multisig;
pub mod seed;

pub use keys::*;
pub use multisig::*;
pub use seed::*;
