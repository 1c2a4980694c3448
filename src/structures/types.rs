//! Common Types

use crate::crypto::hash::sha256;
use serde::{Deserialize, Serialize};
use std::fmt;

/// 256-bit hash (32 bytes)
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct Hash256(pub [u8; 32]);

impl Hash256 {
    /// Zero hash
    pub const ZERO: Self = Self([0u8; 32]);

    /// Create from bytes
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Try to create from slice
    pub fn try_from_slice(slice: &[u8]) -> Option<Self> {
        if slice.len() != 32 {
            return None;
        }
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(slice);
        Some(Self(bytes))
    }

    /// Get as bytes
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Check if zero
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }

    /// Convert to hex string
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse from hex string
    pub fn from_hex(s: &str) -> Option<Self> {
        let bytes = hex::decode(s).ok()?;
        Self::try_from_slice(&bytes)
    }
}

impl fmt::Debug for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash256({})", &hex::encode(&self.0[..8]))
    }
}

impl fmt::Display for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}...{}", &hex::encode(&self.0[..4]), &hex::encode(&self.0[28..]))
    }
}

impl AsRef<[u8]> for Hash256 {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<[u8; 32]> for Hash256 {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

/// Block height
pub type Height = u64;

/// Amount in atomic units
pub type Amount = u64;

/// Key image (for double-spend prevention)
///
/// Curve-agnostic 32-byte encoding: ring key images are Ristretto points,
/// FCMP key images are Edwards points. The ledger only ever sees `hash()`.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct KeyImage(pub [u8; 32]);

impl KeyImage {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Ledger key material: SHA-256 of the encoding
    pub fn hash(&self) -> Hash256 {
        Hash256(sha256(&self.0))
    }

    /// All-zero placeholder
    pub fn is_null(&self) -> bool {
        self.0 == [0u8; 32]
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Option<Self> {
        let bytes = hex::decode(s).ok()?;
        Hash256::try_from_slice(&bytes).map(|h| Self(h.0))
    }
}

impl fmt::Debug for KeyImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyImage({})", &hex::encode(&self.0[..8]))
    }
}

/// Reference to a prior transaction output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct OutPoint {
    pub tx_hash: Hash256,
    pub index: u32,
}

impl OutPoint {
    pub fn new(tx_hash: Hash256, index: u32) -> Self {
        Self { tx_hash, index }
    }

    pub fn is_null(&self) -> bool {
        self.tx_hash.is_zero() && self.index == u32::MAX
    }

    pub fn null() -> Self {
        Self { tx_hash: Hash256::ZERO, index: u32::MAX }
    }

    /// Serialize to 36 bytes
    pub fn to_bytes(&self) -> [u8; 36] {
        let mut result = [0u8; 36];
        result[..32].copy_from_slice(&self.tx_hash.0);
        result[32..].copy_from_slice(&self.index.to_le_bytes());
        result
    }
}

impl fmt::Display for OutPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.tx_hash, self.index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash256_hex() {
        let hash = Hash256([0x12, 0x34, 0x56, 0x78, 0x9a, 0xbc, 0xde, 0xf0,
                           0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
                           0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
                           0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01]);

        let hex = hash.to_hex();
        let parsed = Hash256::from_hex(&hex).unwrap();
        assert_eq!(hash, parsed);
    }

    #[test]
    fn test_hash256_zero() {
        assert!(Hash256::ZERO.is_zero());
        assert!(!Hash256([1u8; 32]).is_zero());
    }

    #[test]
    fn test_key_image_hash_is_sha256() {
        let ki = KeyImage([7u8; 32]);
        assert_eq!(ki.hash().0, sha256(&[7u8; 32]));
        assert!(KeyImage([0u8; 32]).is_null());
    }

    #[test]
    fn test_outpoint_bytes() {
        let op = OutPoint::new(Hash256([9u8; 32]), 3);
        let bytes = op.to_bytes();
        assert_eq!(&bytes[..32], &[9u8; 32]);
        assert_eq!(&bytes[32..], &3u32.to_le_bytes());
        assert!(OutPoint::null().is_null());
        assert!(!op.is_null());
    }
}
