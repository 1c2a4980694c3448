//! LSAG Ring Signatures
//!
//! Linkable Spontaneous Anonymous Group signatures allow:
//! - Spending an output without revealing which ring member is real
//! - Detecting double-spends via key images (linkability)
//! - Verification from public data only
//!
//! For every ring position:
//! - L_i = s_i*G + c_i*P_i
//! - R_i = s_i*Hp(P_i) + c_i*I
//! - c_{i+1} = H(m || L_i || R_i)
//!
//! The signer closes the ring with s_pi = alpha - c_pi*x.

use crate::constants::{MAX_RING_SIZE, MIN_RING_SIZE};
use crate::crypto::hash::hash_to_scalar;
use crate::crypto::ristretto::{self, basepoint, RingPoint};
use crate::crypto::scalar::{random_nonzero_scalar, random_scalar, scalar_from_canonical};
use crate::structures::types::{KeyImage, OutPoint};
use crate::{Error, Result};
use curve25519_dalek::{ristretto::RistrettoPoint, scalar::Scalar};
use rand_core::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};

const HP_DOMAIN: &[u8] = b"PRIV-ring-Hp-v1";
const CHALLENGE_DOMAIN: &[u8] = b"PRIV-ring-Challenge-v1";

/// Ring member: a prior output and its one-time key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RingMember {
    pub outpoint: OutPoint,
    pub public_key: RingPoint,
    /// Amount commitment, present for RingCT rings
    pub commitment: Option<RingPoint>,
}

impl RingMember {
    pub fn new(outpoint: OutPoint, public_key: RingPoint) -> Self {
        Self { outpoint, public_key, commitment: None }
    }

    pub fn with_commitment(mut self, commitment: RingPoint) -> Self {
        self.commitment = Some(commitment);
        self
    }
}

/// Public keys of a ring, in order
pub fn ring_keys(members: &[RingMember]) -> Vec<RingPoint> {
    members.iter().map(|m| m.public_key).collect()
}

/// Hp(P), the key image base of a public key
pub fn key_image_base(public_key: &RingPoint) -> RistrettoPoint {
    ristretto::hash_to_point(HP_DOMAIN, &public_key.0)
}

/// I = x*Hp(P)
pub fn generate_key_image(secret: &Scalar, public_key: &RingPoint) -> KeyImage {
    let image = secret * key_image_base(public_key);
    KeyImage(image.compress().to_bytes())
}

/// Decompress a key image, rejecting the identity.
pub fn key_image_point(key_image: &KeyImage) -> Option<RistrettoPoint> {
    let point = RingPoint(key_image.0);
    if point.is_identity() {
        return None;
    }
    point.decompress()
}

pub fn is_valid_key_image(key_image: &KeyImage) -> bool {
    key_image_point(key_image).is_some()
}

pub(crate) fn check_ring_size(n: usize) -> Result<()> {
    if n < MIN_RING_SIZE {
        return Err(Error::InvalidInput(format!("ring size {} below minimum {}", n, MIN_RING_SIZE)));
    }
    if n > MAX_RING_SIZE {
        return Err(Error::InvalidInput(format!("ring size {} above maximum {}", n, MAX_RING_SIZE)));
    }
    Ok(())
}

pub(crate) fn decompress_ring(ring: &[RingPoint]) -> Option<Vec<RistrettoPoint>> {
    ring.iter().map(|p| p.decompress()).collect()
}

fn challenge(message: &[u8], l: &RistrettoPoint, r: &RistrettoPoint) -> Scalar {
    hash_to_scalar(
        CHALLENGE_DOMAIN,
        &[message, l.compress().as_bytes(), r.compress().as_bytes()],
    )
}

/// Ring signature (LSAG)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RingSignature {
    pub key_image: KeyImage,
    /// Challenge at position 0
    pub c0: [u8; 32],
    /// One response per ring member
    pub responses: Vec<[u8; 32]>,
}

impl RingSignature {
    pub fn ring_size(&self) -> usize {
        self.responses.len()
    }

    /// key_image || c0 || s_0 .. s_{n-1}
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(64 + self.responses.len() * 32);
        buf.extend_from_slice(&self.key_image.0);
        buf.extend_from_slice(&self.c0);
        for s in &self.responses {
            buf.extend_from_slice(s);
        }
        buf
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < 64 || (bytes.len() - 64) % 32 != 0 {
            return None;
        }
        let mut key_image = [0u8; 32];
        let mut c0 = [0u8; 32];
        key_image.copy_from_slice(&bytes[..32]);
        c0.copy_from_slice(&bytes[32..64]);

        let responses = bytes[64..]
            .chunks_exact(32)
            .map(|chunk| {
                let mut s = [0u8; 32];
                s.copy_from_slice(chunk);
                s
            })
            .collect();

        Some(Self { key_image: KeyImage(key_image), c0, responses })
    }
}

/// Sign `message` as ring member `real_index`.
pub fn create_ring_signature<R: RngCore + CryptoRng>(
    message: &[u8],
    ring: &[RingPoint],
    real_index: usize,
    secret: &Scalar,
    rng: &mut R,
) -> Result<RingSignature> {
    let n = ring.len();
    check_ring_size(n)?;
    if real_index >= n {
        return Err(Error::InvalidInput("real index out of range".into()));
    }
    if *secret == Scalar::ZERO {
        return Err(Error::InvalidInput("zero secret key".into()));
    }
    if RingPoint::from_secret(secret) != ring[real_index] {
        return Err(Error::InvalidInput("secret key does not match ring member".into()));
    }

    let points = decompress_ring(ring).ok_or_else(|| Error::Crypto("invalid public key in ring".into()))?;

    let key_image = generate_key_image(secret, &ring[real_index]);
    let image_point = key_image_point(&key_image)
        .ok_or_else(|| Error::Crypto("degenerate key image".into()))?;

    let alpha = random_nonzero_scalar(rng);
    let mut c = vec![Scalar::ZERO; n];
    let mut s = vec![Scalar::ZERO; n];

    let l_real = alpha * basepoint();
    let r_real = alpha * key_image_base(&ring[real_index]);
    let mut idx = (real_index + 1) % n;
    c[idx] = challenge(message, &l_real, &r_real);

    while idx != real_index {
        s[idx] = random_scalar(rng);
        let l = s[idx] * basepoint() + c[idx] * points[idx];
        let r = s[idx] * key_image_base(&ring[idx]) + c[idx] * image_point;
        let next = (idx + 1) % n;
        c[next] = challenge(message, &l, &r);
        idx = next;
    }

    s[real_index] = alpha - c[real_index] * secret;

    Ok(RingSignature {
        key_image,
        c0: c[0].to_bytes(),
        responses: s.iter().map(|x| x.to_bytes()).collect(),
    })
}

/// Replay the challenge chain and check it closes on `c0`.
///
/// Fails closed on any malformed component.
pub fn verify_ring_signature(message: &[u8], ring: &[RingPoint], signature: &RingSignature) -> bool {
    let n = ring.len();
    if check_ring_size(n).is_err() || signature.responses.len() != n {
        return false;
    }
    let Some(image_point) = key_image_point(&signature.key_image) else {
        return false;
    };
    let Some(points) = decompress_ring(ring) else {
        return false;
    };
    let Some(c0) = scalar_from_canonical(&signature.c0) else {
        return false;
    };

    let mut c = c0;
    for i in 0..n {
        let Some(s) = scalar_from_canonical(&signature.responses[i]) else {
            return false;
        };
        let l = RistrettoPoint::vartime_double_scalar_mul_basepoint(&c, &points[i], &s);
        let r = s * key_image_base(&ring[i]) + c * image_point;
        c = challenge(message, &l, &r);
    }

    c == c0
}
