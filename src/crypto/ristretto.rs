//! Ring curve algebra (Ristretto255)
//!
//! Compressed point wrapper used for ring signatures, stealth addresses and
//! confidential amounts. Ristretto encodings are canonical by construction,
//! so a point is valid exactly when it decompresses.

use curve25519_dalek::{
    constants::RISTRETTO_BASEPOINT_POINT,
    ristretto::{CompressedRistretto, RistrettoPoint},
    scalar::Scalar,
    traits::Identity,
};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha512};
use std::fmt;

/// Compressed Ristretto255 point
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RingPoint(pub [u8; 32]);

impl RingPoint {
    /// Compress a group element
    pub fn from_point(point: &RistrettoPoint) -> Self {
        Self(point.compress().to_bytes())
    }

    /// Public key for a secret scalar: x*G
    pub fn from_secret(secret: &Scalar) -> Self {
        Self::from_point(&(secret * RISTRETTO_BASEPOINT_POINT))
    }

    /// Identity element
    pub fn identity() -> Self {
        Self::from_point(&RistrettoPoint::identity())
    }

    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let arr: [u8; 32] = bytes.try_into().ok()?;
        Some(Self(arr))
    }

    pub fn decompress(&self) -> Option<RistrettoPoint> {
        CompressedRistretto(self.0).decompress()
    }

    /// Structurally valid (canonical encoding of a group element)
    pub fn is_valid(&self) -> bool {
        self.decompress().is_some()
    }

    pub fn is_identity(&self) -> bool {
        *self == Self::identity()
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for RingPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RingPoint({})", hex::encode(&self.0[..8]))
    }
}

impl From<RistrettoPoint> for RingPoint {
    fn from(point: RistrettoPoint) -> Self {
        Self::from_point(&point)
    }
}

/// Base generator G
#[inline]
pub fn basepoint() -> RistrettoPoint {
    RISTRETTO_BASEPOINT_POINT
}

/// Hash arbitrary data to a group element with unknown discrete log.
pub fn hash_to_point(domain: &[u8], data: &[u8]) -> RistrettoPoint {
    let hasher = Sha512::new().chain_update(domain).chain_update(data);
    RistrettoPoint::from_hash(hasher)
}
