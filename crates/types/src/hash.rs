//! Content hashes.

use std::fmt;
use thiserror::Error;

/// Errors from parsing a hex-encoded hash.
#[derive(Debug, Error)]
pub enum HexError {
    #[error("Invalid hex string: {0}")]
    InvalidHex(#[from] hex::FromHexError),

    #[error("Invalid hash length: expected 32 bytes, got {0}")]
    InvalidLength(usize),
}

/// A 32-byte blake3 content hash.
///
/// [`Hash::ZERO`] marks the absence of a block reference (the genesis
/// block's parent, an unset HCC).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, sbor::prelude::BasicSbor)]
pub struct Hash([u8; 32]);

impl Hash {
    /// The all-zero hash.
    pub const ZERO: Hash = Hash([0u8; 32]);

    /// Hash arbitrary bytes with blake3.
    pub fn digest(data: &[u8]) -> Self {
        Hash(*blake3::hash(data).as_bytes())
    }

    /// Construct from raw bytes (no hashing).
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Hash(bytes)
    }

    /// The raw bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Whether this is the zero hash.
    pub fn is_zero(&self) -> bool {
        *self == Hash::ZERO
    }

    /// Parse from a hex string (with or without `0x` prefix).
    pub fn from_hex(s: &str) -> Result<Self, HexError> {
        let s = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(s)?;
        if bytes.len() != 32 {
            return Err(HexError::InvalidLength(bytes.len()));
        }
        let mut out = [0u8; 32];
        out.copy_from_slice(&bytes);
        Ok(Hash(out))
    }

    /// Render as a `0x`-prefixed hex string.
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }
}

impl Default for Hash {
    fn default() -> Self {
        Hash::ZERO
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Abbreviated form for log readability.
        write!(f, "{}..", &hex::encode(&self.0[..4]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_is_deterministic() {
        let a = Hash::digest(b"banjo");
        let b = Hash::digest(b"banjo");
        assert_eq!(a, b);
        assert_ne!(a, Hash::digest(b"ukulele"));
    }

    #[test]
    fn hex_round_trip() {
        let h = Hash::digest(b"block");
        let parsed = Hash::from_hex(&h.to_hex()).unwrap();
        assert_eq!(h, parsed);
    }

    #[test]
    fn rejects_bad_length() {
        assert!(matches!(
            Hash::from_hex("0xdeadbeef"),
            Err(HexError::InvalidLength(4))
        ));
    }

    #[test]
    fn zero_hash() {
        assert!(Hash::ZERO.is_zero());
        assert!(!Hash::digest(b"x").is_zero());
        assert_eq!(Hash::default(), Hash::ZERO);
    }
}
