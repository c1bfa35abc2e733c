//! BIP-39 seed material
//!
//! Draws fresh entropy from the OS, turns it into a mnemonic, and expands the
//! mnemonic into seed bytes. The seed never leaves memory and is wiped on drop.

use bip39::{Language, Mnemonic};
use rand::rngs::OsRng;
use rand::RngCore;
use std::fmt;
use thiserror::Error;
use zeroize::Zeroizing;

/// Entropy strengths BIP-39 defines (12, 15, 18, 21 and 24 words).
pub const SUPPORTED_ENTROPY_BITS: [usize; 5] = [128, 160, 192, 224, 256];

/// 24 words.
pub const DEFAULT_ENTROPY_BITS: usize = 256;

#[derive(Error, Debug)]
pub enum SeedError {
    #[error("Entropy source unavailable: {0}")]
    EntropySource(String),
    #[error("Unsupported entropy strength: {0} bits (expected 128, 160, 192, 224 or 256)")]
    UnsupportedEntropy(usize),
    #[error("Invalid mnemonic: {0}")]
    InvalidMnemonic(String),
}

/// A mnemonic together with the seed it expands to (empty passphrase).
pub struct SeedMaterial {
    mnemonic: Mnemonic,
    seed: Zeroizing<[u8; 64]>,
}

impl SeedMaterial {
    /// Expand a mnemonic into seed material.
    pub fn from_mnemonic(mnemonic: Mnemonic) -> Self {
        let seed = Zeroizing::new(mnemonic.to_seed(""));
        Self { mnemonic, seed }
    }

    pub fn mnemonic(&self) -> &Mnemonic {
        &self.mnemonic
    }

    /// The space-separated phrase.
    pub fn phrase(&self) -> String {
        self.mnemonic.to_string()
    }

    pub fn word_count(&self) -> usize {
        self.mnemonic.word_count()
    }

    /// Raw 64-byte BIP-39 seed.
    pub fn seed(&self) -> &[u8; 64] {
        &self.seed
    }
}

impl fmt::Debug for SeedMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SeedMaterial")
            .field("words", &self.word_count())
            .finish_non_exhaustive()
    }
}

/// Generate a new mnemonic of the given strength from the OS RNG.
pub fn new_seed(entropy_bits: usize) -> Result<SeedMaterial, SeedError> {
    new_seed_from_rng(entropy_bits, &mut OsRng)
}

/// Generate a new mnemonic from an arbitrary RNG.
///
/// RNG failures surface as [`SeedError::EntropySource`] instead of panicking.
pub fn new_seed_from_rng<R: RngCore + ?Sized>(
    entropy_bits: usize,
    rng: &mut R,
) -> Result<SeedMaterial, SeedError> {
    if !SUPPORTED_ENTROPY_BITS.contains(&entropy_bits) {
        return Err(SeedError::UnsupportedEntropy(entropy_bits));
    }

    let mut entropy = Zeroizing::new(vec![0u8; entropy_bits / 8]);
    rng.try_fill_bytes(&mut entropy)
        .map_err(|e| SeedError::EntropySource(e.to_string()))?;

    let mnemonic = Mnemonic::from_entropy_in(Language::English, &entropy)
        .map_err(|e| SeedError::InvalidMnemonic(e.to_string()))?;
    Ok(SeedMaterial::from_mnemonic(mnemonic))
}

/// Parse a mnemonic from words
pub fn parse_mnemonic(words: &str) -> Result<Mnemonic, SeedError> {
    Mnemonic::parse_in(Language::English, words)
        .map_err(|e| SeedError::InvalidMnemonic(e.to_string()))
}
