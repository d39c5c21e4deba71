//! Signing keys, signatures, and validator identities.
//!
//! A validator's identity is its Ed25519 public key, so votes and blocks can
//! be verified directly against the identity they carry without a separate
//! key registry.

use ed25519_dalek::{Signer, SigningKey, Verifier, VerifyingKey};
use std::fmt;

/// A validator identity: the raw Ed25519 public key bytes.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, sbor::prelude::BasicSbor)]
pub struct ValidatorId([u8; 32]);

impl ValidatorId {
    /// Construct from raw public key bytes.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        ValidatorId(bytes)
    }

    /// The raw bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Verify `signature` over `message` against this identity.
    ///
    /// Returns false for malformed keys as well as bad signatures; a vote
    /// carrying an unusable identity is simply invalid.
    pub fn verify(&self, message: &[u8], signature: &Signature) -> bool {
        let Ok(key) = VerifyingKey::from_bytes(&self.0) else {
            return false;
        };
        let sig = ed25519_dalek::Signature::from_bytes(&signature.0);
        key.verify(message, &sig).is_ok()
    }
}

impl fmt::Display for ValidatorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for ValidatorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..", &hex::encode(&self.0[..4]))
    }
}

/// An Ed25519 signature.
#[derive(Clone, Copy, PartialEq, Eq, sbor::prelude::BasicSbor)]
pub struct Signature([u8; 64]);

impl Signature {
    /// The zero placeholder used while computing sign-bytes.
    pub fn zero() -> Self {
        Signature([0u8; 64])
    }

    /// Construct from raw bytes.
    pub fn from_bytes(bytes: [u8; 64]) -> Self {
        Signature(bytes)
    }

    /// The raw bytes.
    pub fn as_bytes(&self) -> &[u8; 64] {
        &self.0
    }

    /// Whether this is the zero placeholder.
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 64]
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sig:{}..", &hex::encode(&self.0[..4]))
    }
}

/// An Ed25519 signing key.
#[derive(Clone)]
pub struct PrivateKey(SigningKey);

impl PrivateKey {
    /// Generate a fresh key from a cryptographic RNG.
    pub fn generate<R: rand_core::CryptoRngCore>(rng: &mut R) -> Self {
        PrivateKey(SigningKey::generate(rng))
    }

    /// Derive a key deterministically from a 32-byte seed.
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        PrivateKey(SigningKey::from_bytes(seed))
    }

    /// The validator identity for this key.
    pub fn validator_id(&self) -> ValidatorId {
        ValidatorId(self.0.verifying_key().to_bytes())
    }

    /// Sign a message.
    pub fn sign(&self, message: &[u8]) -> Signature {
        Signature(self.0.sign(message).to_bytes())
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PrivateKey")
            .field(&self.validator_id())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_and_verify() {
        let key = PrivateKey::from_seed(&[7u8; 32]);
        let id = key.validator_id();
        let sig = key.sign(b"vote bytes");
        assert!(id.verify(b"vote bytes", &sig));
        assert!(!id.verify(b"other bytes", &sig));
    }

    #[test]
    fn wrong_identity_rejects() {
        let key = PrivateKey::from_seed(&[1u8; 32]);
        let other = PrivateKey::from_seed(&[2u8; 32]);
        let sig = key.sign(b"msg");
        assert!(!other.validator_id().verify(b"msg", &sig));
    }

    #[test]
    fn seed_is_deterministic() {
        let a = PrivateKey::from_seed(&[9u8; 32]);
        let b = PrivateKey::from_seed(&[9u8; 32]);
        assert_eq!(a.validator_id(), b.validator_id());
    }

    #[test]
    fn zero_signature_never_verifies() {
        let key = PrivateKey::from_seed(&[3u8; 32]);
        assert!(!key.validator_id().verify(b"msg", &Signature::zero()));
    }

    #[test]
    fn generation_from_seeded_rng_is_deterministic() {
        use rand::SeedableRng;
        let mut rng = rand_chacha::ChaCha8Rng::seed_from_u64(11);
        let a = PrivateKey::generate(&mut rng);
        let mut rng = rand_chacha::ChaCha8Rng::seed_from_u64(11);
        let b = PrivateKey::generate(&mut rng);
        assert_eq!(a.validator_id(), b.validator_id());

        let sig = a.sign(b"msg");
        assert!(b.validator_id().verify(b"msg", &sig));
    }
}
