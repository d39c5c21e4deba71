//! Core types for banjo consensus.
//!
//! This crate provides the foundational types used throughout the consensus
//! implementation:
//!
//! - **Primitives**: [`Hash`], cryptographic keys and signatures
//! - **Consensus types**: [`Block`], [`Vote`], [`VoteSet`], [`CommitCertificate`]
//! - **Membership**: [`Validator`], [`ValidatorSet`]
//!
//! # Design Philosophy
//!
//! This crate is self-contained with minimal dependencies. It does not depend
//! on any other workspace crate, making it the foundation layer.
//!
//! All wire-visible types derive the workspace codec (SBOR) so that encoding
//! is canonical and deterministic. Signatures always cover the canonical
//! encoding of a value with its signature field zeroed.

mod block;
mod crypto;
mod hash;
mod proposal;
mod validator;
mod vote;

pub use block::{Block, BlockStatus, CommitCertificate, ExtendedBlock};
pub use crypto::{PrivateKey, Signature, ValidatorId};
pub use hash::{Hash, HexError};
pub use proposal::Proposal;
pub use validator::{Validator, ValidatorSet};
pub use vote::{Vote, VoteSet};

/// Test utilities.
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils {
    use super::*;

    /// Create a deterministic private key from a seed byte.
    pub fn test_key(seed: u8) -> PrivateKey {
        PrivateKey::from_seed(&[seed; 32])
    }

    /// Create a test hash from a seed byte.
    pub fn test_hash(seed: u8) -> Hash {
        Hash::from_bytes([seed; 32])
    }

    /// Create a validator set of `n` equal-stake validators from seeded keys.
    ///
    /// Returns the keys alongside the set so tests can sign votes.
    pub fn test_validator_set(n: u8, stake: u64) -> (Vec<PrivateKey>, ValidatorSet) {
        let keys: Vec<PrivateKey> = (0..n).map(|i| test_key(i + 1)).collect();
        let set = ValidatorSet::new(
            keys.iter()
                .map(|k| Validator::new(k.validator_id(), stake))
                .collect(),
        );
        (keys, set)
    }
}
