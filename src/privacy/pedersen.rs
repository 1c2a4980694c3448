//! Pedersen Commitments
//!
//! Pedersen commitments hide transaction amounts:
//! - C = v*H + r*G (commitment to value v with blinding factor r)
//! - Perfectly hiding: reveals nothing about v
//! - Computationally binding: can't change v without knowing r
//!
//! Sum(inputs) == Sum(outputs) + fee*H proves balance without amounts.

use crate::crypto::hash::hkdf_sha256;
use crate::crypto::ristretto::{self, basepoint, RingPoint};
use crate::crypto::scalar::random_nonzero_scalar;
use crate::{Error, Result};
use curve25519_dalek::{ristretto::RistrettoPoint, scalar::Scalar, traits::Identity};
use rand_core::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};

const GENERATOR_H_DOMAIN: &[u8] = b"PRIV-ct-GeneratorH-v1";
const AMOUNT_SALT: &[u8] = b"PRIV-ct-v1";
const AMOUNT_INFO: &[u8] = b"AmountEncrypt";

lazy_static::lazy_static! {
    /// Second generator H, nothing-up-my-sleeve
    static ref H: RistrettoPoint = ristretto::hash_to_point(GENERATOR_H_DOMAIN, b"");
}

pub fn generator_h() -> RistrettoPoint {
    *H
}

/// Pedersen commitment on the ring curve
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Commitment(pub RingPoint);

impl Commitment {
    pub fn from_point(point: &RistrettoPoint) -> Self {
        Self(RingPoint::from_point(point))
    }

    pub fn decompress(&self) -> Option<RistrettoPoint> {
        self.0.decompress()
    }

    pub fn is_valid(&self) -> bool {
        self.0.is_valid()
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        self.0.as_bytes()
    }

    /// Does (value, blinding) open this commitment?
    pub fn verify_opening(&self, value: u64, blinding: &Scalar) -> bool {
        commit_unchecked(value, blinding) == *self
    }

    /// C1 + C2 = (v1 + v2)*H + (r1 + r2)*G
    pub fn add(&self, other: &Self) -> Result<Self> {
        Ok(Self::from_point(&(decompress(self)? + decompress(other)?)))
    }

    /// C1 - C2 = (v1 - v2)*H + (r1 - r2)*G
    pub fn sub(&self, other: &Self) -> Result<Self> {
        Ok(Self::from_point(&(decompress(self)? - decompress(other)?)))
    }

    pub fn is_identity(&self) -> bool {
        self.0.is_identity()
    }
}

fn decompress(c: &Commitment) -> Result<RistrettoPoint> {
    c.decompress().ok_or_else(|| Error::Crypto("invalid commitment".into()))
}

fn commit_unchecked(value: u64, blinding: &Scalar) -> Commitment {
    let point = RistrettoPoint::vartime_double_scalar_mul_basepoint(&Scalar::from(value), &*H, blinding);
    Commitment::from_point(&point)
}

/// C = amount*H + blinding*G. A zero blinding factor is refused.
pub fn create_commitment(amount: u64, blinding: &Scalar) -> Result<Commitment> {
    if *blinding == Scalar::ZERO {
        return Err(Error::InvalidInput("zero blinding factor".into()));
    }
    Ok(commit_unchecked(amount, blinding))
}

/// Commit with a fresh random blinding factor.
pub fn commit_random<R: RngCore + CryptoRng>(amount: u64, rng: &mut R) -> (Commitment, Scalar) {
    let blinding = random_nonzero_scalar(rng);
    (commit_unchecked(amount, &blinding), blinding)
}

/// fee*H, the public fee as a commitment with zero blinding
pub fn commit_fee(fee: u64) -> Commitment {
    Commitment::from_point(&(Scalar::from(fee) * *H))
}

fn sum(commitments: &[Commitment]) -> Option<RistrettoPoint> {
    commitments
        .iter()
        .try_fold(RistrettoPoint::identity(), |acc, c| Some(acc + c.decompress()?))
}

/// Sum(inputs) == Sum(outputs) [+ fee]. Empty sides never balance.
pub fn verify_commitment_balance(
    inputs: &[Commitment],
    outputs: &[Commitment],
    fee: Option<&Commitment>,
) -> bool {
    if inputs.is_empty() || outputs.is_empty() {
        return false;
    }
    let (Some(input_sum), Some(mut output_sum)) = (sum(inputs), sum(outputs)) else {
        return false;
    };
    if let Some(fee) = fee {
        let Some(fee_point) = fee.decompress() else {
            return false;
        };
        output_sum += fee_point;
    }
    input_sum == output_sum
}

/// Blinding factor that makes the last output balance: Sum(in) - Sum(out).
pub fn balancing_blinding_factor(input_blinds: &[Scalar], output_blinds: &[Scalar]) -> Result<Scalar> {
    if input_blinds.is_empty() {
        return Err(Error::InvalidInput("no input blinding factors".into()));
    }
    let total: Scalar = input_blinds.iter().sum::<Scalar>() - output_blinds.iter().sum::<Scalar>();
    if total == Scalar::ZERO {
        return Err(Error::Crypto("balancing blinding factor is zero".into()));
    }
    Ok(total)
}

fn amount_mask(shared_secret: &[u8]) -> Result<[u8; 8]> {
    let okm = hkdf_sha256(shared_secret, AMOUNT_SALT, AMOUNT_INFO, 8)?;
    let mut mask = [0u8; 8];
    mask.copy_from_slice(&okm);
    Ok(mask)
}

/// XOR the little-endian amount with an HKDF mask of the shared secret.
pub fn encrypt_amount(amount: u64, shared_secret: &[u8]) -> Result<[u8; 8]> {
    let mask = amount_mask(shared_secret)?;
    let mut out = amount.to_le_bytes();
    out.iter_mut().zip(mask).for_each(|(b, m)| *b ^= m);
    Ok(out)
}

pub fn decrypt_amount(encrypted: &[u8; 8], shared_secret: &[u8]) -> Result<u64> {
    let mask = amount_mask(shared_secret)?;
    let mut plain = *encrypted;
    plain.iter_mut().zip(mask).for_each(|(b, m)| *b ^= m);
    Ok(u64::from_le_bytes(plain))
}

/// G, exposed for callers building commitments by hand
pub fn generator_g() -> RistrettoPoint {
    basepoint()
}
