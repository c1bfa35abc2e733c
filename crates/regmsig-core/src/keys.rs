//! Cosigner account derivation
//!
//! All cosigner accounts derive from one master key along the BIP-48 P2WSH
//! template for test networks:
//!
//! ```text
//! m/48'/1'/<branch>'/2'
//!    │   │     │     └── script type 2 (native segwit multisig)
//!    │   │     └──────── one branch per cosigner: 0', 1', 2'
//!    │   └────────────── coin type 1 (test networks)
//!    └────────────────── purpose 48 (multisig)
//! ```
//!
//! Every level is hardened. The xpubs of these accounts are exported, and a
//! leaked non-hardened child key plus its parent xpub would reveal the
//! parent private key.

use bitcoin::bip32::{ChildNumber, DerivationPath, Fingerprint, Xpriv, Xpub};
use bitcoin::secp256k1::Secp256k1;
use bitcoin::{Network, PublicKey};
use std::fmt;
use thiserror::Error;

/// First index reserved for hardened derivation.
pub const HARDENED_LIMIT: u32 = 1 << 31;

/// BIP-48 purpose index.
pub const BIP48_PURPOSE: u32 = 48;

/// SLIP-44 coin type shared by all test networks.
pub const TEST_COIN_TYPE: u32 = 1;

/// BIP-48 script type for native segwit (P2WSH) multisig.
pub const P2WSH_SCRIPT_TYPE: u32 = 2;

#[derive(Error, Debug)]
pub enum KeyError {
    #[error("Invalid derivation path: index {0} is outside the hardened range")]
    InvalidDerivationPath(u32),
    #[error("Derivation failed: {0}")]
    Derivation(String),
    #[error("Accounts {0} and {1} derived the same public key")]
    DuplicateKey(u32, u32),
}

/// Path shape every account is derived under: `m/<base>/<branch>'/<suffix>`.
///
/// Indices are stored unhardened and hardened on use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountTemplate {
    base: Vec<u32>,
    suffix: Vec<u32>,
}

impl AccountTemplate {
    pub fn new(base: Vec<u32>, suffix: Vec<u32>) -> Self {
        Self { base, suffix }
    }

    /// `m/48'/1'/<branch>'/2'`
    pub fn bip48_p2wsh_testnet() -> Self {
        Self::new(
            vec![BIP48_PURPOSE, TEST_COIN_TYPE],
            vec![P2WSH_SCRIPT_TYPE],
        )
    }

    /// Full hardened path for one cosigner branch.
    pub fn path_for(&self, branch: u32) -> Result<DerivationPath, KeyError> {
        let children = self
            .base
            .iter()
            .chain(std::iter::once(&branch))
            .chain(self.suffix.iter())
            .map(|&index| {
                ChildNumber::from_hardened_idx(index)
                    .map_err(|_| KeyError::InvalidDerivationPath(index))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(DerivationPath::from(children))
    }
}

impl Default for AccountTemplate {
    fn default() -> Self {
        Self::bip48_p2wsh_testnet()
    }
}

impl fmt::Display for AccountTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "m")?;
        for index in &self.base {
            write!(f, "/{}'", index)?;
        }
        write!(f, "/<branch>'")?;
        for index in &self.suffix {
            write!(f, "/{}'", index)?;
        }
        Ok(())
    }
}

/// One cosigner's account-level key.
#[derive(Clone)]
pub struct Account {
    branch: u32,
    path: DerivationPath,
    master_fingerprint: Fingerprint,
    xpriv: Xpriv,
    xpub: Xpub,
}

impl Account {
    /// Branch index this account was derived under.
    pub fn branch(&self) -> u32 {
        self.branch
    }

    pub fn path(&self) -> &DerivationPath {
        &self.path
    }

    pub fn master_fingerprint(&self) -> Fingerprint {
        self.master_fingerprint
    }

    /// Private extended key. Stays inside the process; export via
    /// [`neutered_export`].
    pub fn xpriv(&self) -> &Xpriv {
        &self.xpriv
    }

    pub fn xpub(&self) -> &Xpub {
        &self.xpub
    }

    /// Compressed account public key, used directly as a cosigner key.
    pub fn public_key(&self) -> PublicKey {
        PublicKey::new(self.xpub.public_key)
    }

    /// Key origin in descriptor notation, e.g. `[d34db33f/48'/1'/0'/2']`.
    pub fn key_origin(&self) -> String {
        format!(
            "[{}/{}]",
            self.master_fingerprint,
            self.path.to_string().trim_start_matches("m/")
        )
    }
}

impl fmt::Debug for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Account")
            .field("branch", &self.branch)
            .field("path", &self.path.to_string())
            .field("master_fingerprint", &self.master_fingerprint)
            .field("xpub", &self.xpub.to_string())
            .finish_non_exhaustive()
    }
}

/// Build the master extended key from seed bytes.
pub fn root_from(seed: &[u8], network: Network) -> Result<Xpriv, KeyError> {
    Xpriv::new_master(network, seed).map_err(|e| KeyError::Derivation(e.to_string()))
}

/// Derive `count` cosigner accounts, branches `0..count`, under `template`.
pub fn derive_accounts(
    root: &Xpriv,
    count: u32,
    template: &AccountTemplate,
) -> Result<Vec<Account>, KeyError> {
    let secp = Secp256k1::new();
    let master_fingerprint = root.fingerprint(&secp);

    let mut accounts: Vec<Account> = Vec::with_capacity(count as usize);
    for branch in 0..count {
        let path = template.path_for(branch)?;
        let xpriv = root
            .derive_priv(&secp, &path)
            .map_err(|e| KeyError::Derivation(e.to_string()))?;
        let xpub = Xpub::from_priv(&secp, &xpriv);

        if let Some(existing) = accounts
            .iter()
            .find(|a| a.xpub.public_key == xpub.public_key)
        {
            return Err(KeyError::DuplicateKey(existing.branch, branch));
        }

        log::debug!("Derived cosigner account {} at {}", branch, path);
        accounts.push(Account {
            branch,
            path,
            master_fingerprint,
            xpriv,
            xpub,
        });
    }

    Ok(accounts)
}

/// Public-only serialization of an account (`tpub...` on test networks).
pub fn neutered_export(account: &Account) -> String {
    account.xpub.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::seed::{parse_mnemonic, SeedMaterial};
    use std::str::FromStr;

    fn fixed_seed() -> SeedMaterial {
        SeedMaterial::from_mnemonic(
            parse_mnemonic(
                "leader monkey parrot ring guide accident before fence cannon height naive bean",
            )
            .unwrap(),
        )
    }

    fn fixed_accounts() -> Vec<Account> {
        let root = root_from(fixed_seed().seed(), Network::Regtest).unwrap();
        derive_accounts(&root, 3, &AccountTemplate::default()).unwrap()
    }

    #[test]
    fn test_default_template_paths() {
        let template = AccountTemplate::default();
        for branch in 0..3 {
            let path = template.path_for(branch).unwrap();
            assert_eq!(
                path,
                DerivationPath::from_str(&format!("m/48'/1'/{}'/2'", branch)).unwrap()
            );
        }
        assert_eq!(template.to_string(), "m/48'/1'/<branch>'/2'");
    }

    #[test]
    fn test_derivation_is_deterministic() {
        let first = fixed_accounts();
        let second = fixed_accounts();

        assert_eq!(first.len(), 3);
        for (a, b) in first.iter().zip(second.iter()) {
            assert_eq!(a.public_key(), b.public_key());
            assert_eq!(neutered_export(a), neutered_export(b));
            assert_eq!(a.path(), b.path());
        }
    }

    #[test]
    fn test_account_keys_distinct() {
        let accounts = fixed_accounts();
        assert_ne!(accounts[0].public_key(), accounts[1].public_key());
        assert_ne!(accounts[0].public_key(), accounts[2].public_key());
        assert_ne!(accounts[1].public_key(), accounts[2].public_key());
    }

    #[test]
    fn test_every_path_element_hardened() {
        for account in fixed_accounts() {
            let children: &[ChildNumber] = account.path().as_ref();
            assert_eq!(children.len(), 4);
            assert!(children.iter().all(|child| child.is_hardened()));
        }
    }

    #[test]
    fn test_out_of_range_index_rejected() {
        let template = AccountTemplate::new(vec![BIP48_PURPOSE, HARDENED_LIMIT], vec![2]);
        assert!(matches!(
            template.path_for(0),
            Err(KeyError::InvalidDerivationPath(HARDENED_LIMIT))
        ));

        let root = root_from(fixed_seed().seed(), Network::Regtest).unwrap();
        assert!(matches!(
            derive_accounts(&root, 3, &template),
            Err(KeyError::InvalidDerivationPath(_))
        ));
    }

    #[test]
    fn test_neutered_export_is_public_only() {
        for account in fixed_accounts() {
            let exported = neutered_export(&account);
            assert!(exported.starts_with("tpub"), "got {}", exported);

            let parsed = Xpub::from_str(&exported).unwrap();
            assert_eq!(parsed, Xpub::from_priv(&Secp256k1::new(), account.xpriv()));
            assert!(!exported.contains(&account.xpriv().to_string()));
        }
    }

    #[test]
    fn test_key_origin_format() {
        let accounts = fixed_accounts();
        let fingerprint = accounts[0].master_fingerprint();

        assert_eq!(
            accounts[1].key_origin(),
            format!("[{}/48'/1'/1'/2']", fingerprint)
        );
        // All accounts share the master fingerprint
        assert!(accounts.iter().all(|a| a.master_fingerprint() == fingerprint));
    }

    #[test]
    fn test_different_seeds_different_accounts() {
        let other = SeedMaterial::from_mnemonic(
            parse_mnemonic(
                "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about",
            )
            .unwrap(),
        );
        let root = root_from(other.seed(), Network::Regtest).unwrap();
        let others = derive_accounts(&root, 3, &AccountTemplate::default()).unwrap();

        for (a, b) in fixed_accounts().iter().zip(others.iter()) {
            assert_ne!(a.public_key(), b.public_key());
        }
    }

    #[test]
    fn test_debug_omits_private_key() {
        let account = &fixed_accounts()[0];
        let debug = format!("{:?}", account);
        assert!(!debug.contains("tprv"));
        assert!(debug.contains("tpub"));
    }
}
