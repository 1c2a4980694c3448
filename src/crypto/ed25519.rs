//! Ed25519 algebra for FCMP
//!
//! Unlike Ristretto, an Edwards encoding can be non-canonical or land in a
//! small-order coset, so `EdPoint::is_valid` checks all three:
//! decompression, canonical re-encoding and torsion freedom.

use super::hash::{hash_to_scalar, sha256_multi};
use super::scalar::random_nonzero_scalar;
use crate::{Error, Result};
use curve25519_dalek::{
    constants::ED25519_BASEPOINT_POINT,
    edwards::{CompressedEdwardsY, EdwardsPoint},
    scalar::Scalar,
    traits::{Identity, IsIdentity, MultiscalarMul, VartimeMultiscalarMul},
};
use rand_core::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use std::fmt;

const HASH_TO_POINT_DOMAIN: &[u8] = b"PRIV-ed25519-Hp-v1";
const SCHNORR_DOMAIN: &[u8] = b"PRIV-ed25519-schnorr-v1";

/// Compressed Edwards point
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EdPoint(pub [u8; 32]);

impl EdPoint {
    pub fn from_point(point: &EdwardsPoint) -> Self {
        Self(point.compress().to_bytes())
    }

    pub fn identity() -> Self {
        Self::from_point(&EdwardsPoint::identity())
    }

    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let arr: [u8; 32] = bytes.try_into().ok()?;
        Some(Self(arr))
    }

    /// Decompress without validity checks beyond being on the curve.
    pub fn decompress(&self) -> Option<EdwardsPoint> {
        CompressedEdwardsY(self.0).decompress()
    }

    /// Decompress only if the encoding is canonical and the point lies in
    /// the prime-order subgroup.
    pub fn decompress_valid(&self) -> Option<EdwardsPoint> {
        let point = self.decompress()?;
        if point.compress().to_bytes() != self.0 || !point.is_torsion_free() {
            return None;
        }
        Some(point)
    }

    pub fn is_valid(&self) -> bool {
        self.decompress_valid().is_some()
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

impl Default for EdPoint {
    fn default() -> Self {
        Self::identity()
    }
}

impl fmt::Debug for EdPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EdPoint({})", hex::encode(&self.0[..8]))
    }
}

impl From<EdwardsPoint> for EdPoint {
    fn from(point: EdwardsPoint) -> Self {
        Self::from_point(&point)
    }
}

#[inline]
pub fn basepoint() -> EdwardsPoint {
    ED25519_BASEPOINT_POINT
}

/// Hash to a prime-order point (Hp).
///
/// Try-and-increment over SHA-256 candidates, clearing the cofactor of the
/// first candidate that decompresses.
pub fn hash_to_point(data: &[u8]) -> Result<EdwardsPoint> {
    for counter in 0..=u8::MAX {
        let candidate = sha256_multi(&[HASH_TO_POINT_DOMAIN, data, &[counter]]);
        if let Some(point) = CompressedEdwardsY(candidate).decompress() {
            let cleared = point.mul_by_cofactor();
            if !cleared.is_identity() {
                return Ok(cleared);
            }
        }
    }
    Err(Error::Crypto("hash to point exhausted all candidates".into()))
}

/// Constant-time multi-scalar multiplication
pub fn multiscalar_mul(scalars: &[Scalar], points: &[EdwardsPoint]) -> Result<EdwardsPoint> {
    if scalars.len() != points.len() {
        return Err(Error::InvalidInput(format!(
            "multiscalar length mismatch: {} scalars, {} points",
            scalars.len(),
            points.len()
        )));
    }
    Ok(EdwardsPoint::multiscalar_mul(scalars, points))
}

/// Variable-time multi-scalar multiplication, for public inputs only
pub fn vartime_multiscalar_mul(scalars: &[Scalar], points: &[EdwardsPoint]) -> Result<EdwardsPoint> {
    if scalars.len() != points.len() {
        return Err(Error::InvalidInput(format!(
            "multiscalar length mismatch: {} scalars, {} points",
            scalars.len(),
            points.len()
        )));
    }
    Ok(EdwardsPoint::vartime_multiscalar_mul(scalars, points))
}

/// a*A + b*G
pub fn double_scalar_mul_base(a: &Scalar, point: &EdwardsPoint, b: &Scalar) -> EdwardsPoint {
    EdwardsPoint::vartime_double_scalar_mul_basepoint(a, point, b)
}

/// Ed25519 key pair over raw scalars
#[derive(Clone)]
pub struct KeyPair {
    pub secret: Scalar,
    pub public: EdPoint,
}

impl KeyPair {
    pub fn generate<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        Self::from_secret(random_nonzero_scalar(rng))
    }

    pub fn from_secret(secret: Scalar) -> Self {
        let public = EdPoint::from_point(&(secret * ED25519_BASEPOINT_POINT));
        Self { secret, public }
    }

    /// Deterministic key pair from a seed.
    pub fn from_seed(seed: &[u8]) -> Self {
        Self::from_secret(hash_to_scalar(b"ed25519_key", &[seed]))
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair").field("public", &self.public).finish()
    }
}

/// Schnorr signature: e = H(R || P || m), s = r + e*x
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchnorrSignature {
    pub r: EdPoint,
    pub s: [u8; 32],
}

impl SchnorrSignature {
    pub fn sign<R: RngCore + CryptoRng>(keypair: &KeyPair, message: &[u8], rng: &mut R) -> Self {
        let nonce = random_nonzero_scalar(rng);
        let r = EdPoint::from_point(&(nonce * ED25519_BASEPOINT_POINT));
        let e = hash_to_scalar(SCHNORR_DOMAIN, &[&r.0, &keypair.public.0, message]);
        let s = nonce + e * keypair.secret;
        Self { r, s: s.to_bytes() }
    }

    pub fn verify(&self, public: &EdPoint, message: &[u8]) -> bool {
        let (Some(r), Some(p)) = (self.r.decompress_valid(), public.decompress_valid()) else {
            return false;
        };
        let Some(s) = super::scalar::scalar_from_canonical(&self.s) else {
            return false;
        };
        let e = hash_to_scalar(SCHNORR_DOMAIN, &[&self.r.0, &public.0, message]);
        // s*G - e*P == R
        double_scalar_mul_base(&(-e), &p, &s) == r
    }
}
