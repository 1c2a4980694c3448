//! MLSAG Signatures
//!
//! Multilayered LSAG: m inputs, each with a ring of n members, signed with
//! one challenge chain. Column i of every ring is checked together:
//!
//! - L_{j,i} = s_{j,i}*G + c_i*P_{j,i}
//! - R_{j,i} = s_{j,i}*Hp(P_{j,i}) + c_i*I_j
//! - c_{i+1} = H(m || L_{0,i} || R_{0,i} || ... || L_{m-1,i} || R_{m-1,i})
//!
//! All inputs share the same real column.

use super::ring::{check_ring_size, decompress_ring, generate_key_image, key_image_base, key_image_point};
use crate::crypto::hash::hash_to_scalar;
use crate::crypto::ristretto::{basepoint, RingPoint};
use crate::crypto::scalar::{random_nonzero_scalar, random_scalar, scalar_from_canonical};
use crate::structures::types::KeyImage;
use crate::{Error, Result};
use curve25519_dalek::{ristretto::RistrettoPoint, scalar::Scalar};
use rand_core::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};

const CHALLENGE_DOMAIN: &[u8] = b"PRIV-ring-MLSAGChallenge-v1";

/// MLSAG signature
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MlsagSignature {
    pub c0: [u8; 32],
    /// responses[i][j]: ring position i, input j
    pub responses: Vec<Vec<[u8; 32]>>,
    pub key_images: Vec<KeyImage>,
}

impl MlsagSignature {
    pub fn ring_size(&self) -> usize {
        self.responses.len()
    }

    pub fn input_count(&self) -> usize {
        self.key_images.len()
    }
}

fn column_challenge(message: &[u8], ls: &[RistrettoPoint], rs: &[RistrettoPoint]) -> Scalar {
    let mut encoded = Vec::with_capacity(ls.len() * 64);
    for (l, r) in ls.iter().zip(rs) {
        encoded.extend_from_slice(l.compress().as_bytes());
        encoded.extend_from_slice(r.compress().as_bytes());
    }
    hash_to_scalar(CHALLENGE_DOMAIN, &[message, &encoded])
}

/// Ring dimensions: (n, m). Rings must be non-empty and all the same size.
fn dimensions(rings: &[Vec<RingPoint>]) -> Result<(usize, usize)> {
    let m = rings.len();
    if m == 0 {
        return Err(Error::InvalidInput("MLSAG needs at least one ring".into()));
    }
    let n = rings[0].len();
    check_ring_size(n)?;
    if rings.iter().any(|r| r.len() != n) {
        return Err(Error::InvalidInput("MLSAG rings must have equal size".into()));
    }
    Ok((n, m))
}

pub fn create_mlsag<R: RngCore + CryptoRng>(
    message: &[u8],
    rings: &[Vec<RingPoint>],
    real_indices: &[usize],
    secrets: &[Scalar],
    rng: &mut R,
) -> Result<MlsagSignature> {
    let (n, m) = dimensions(rings)?;
    if real_indices.len() != m || secrets.len() != m {
        return Err(Error::InvalidInput("one real index and secret per ring required".into()));
    }
    let pi = real_indices[0];
    if real_indices.iter().any(|&idx| idx != pi) {
        return Err(Error::InvalidInput("MLSAG real indices must coincide".into()));
    }
    if pi >= n {
        return Err(Error::InvalidInput("real index out of range".into()));
    }

    let mut points = Vec::with_capacity(m);
    let mut key_images = Vec::with_capacity(m);
    let mut image_points = Vec::with_capacity(m);
    for (ring, secret) in rings.iter().zip(secrets) {
        if *secret == Scalar::ZERO || RingPoint::from_secret(secret) != ring[pi] {
            return Err(Error::InvalidInput("secret key does not match ring member".into()));
        }
        points.push(decompress_ring(ring).ok_or_else(|| Error::Crypto("invalid public key in ring".into()))?);
        let ki = generate_key_image(secret, &ring[pi]);
        image_points.push(key_image_point(&ki).ok_or_else(|| Error::Crypto("degenerate key image".into()))?);
        key_images.push(ki);
    }

    let alphas: Vec<Scalar> = (0..m).map(|_| random_nonzero_scalar(rng)).collect();
    let mut c = vec![Scalar::ZERO; n];
    let mut s = vec![vec![Scalar::ZERO; m]; n];

    let ls: Vec<_> = alphas.iter().map(|a| a * basepoint()).collect();
    let rs: Vec<_> = alphas
        .iter()
        .zip(rings)
        .map(|(a, ring)| a * key_image_base(&ring[pi]))
        .collect();
    let mut idx = (pi + 1) % n;
    c[idx] = column_challenge(message, &ls, &rs);

    while idx != pi {
        let mut ls = Vec::with_capacity(m);
        let mut rs = Vec::with_capacity(m);
        for j in 0..m {
            let s_ij = random_scalar(rng);
            s[idx][j] = s_ij;
            ls.push(s_ij * basepoint() + c[idx] * points[j][idx]);
            rs.push(s_ij * key_image_base(&rings[j][idx]) + c[idx] * image_points[j]);
        }
        let next = (idx + 1) % n;
        c[next] = column_challenge(message, &ls, &rs);
        idx = next;
    }

    for j in 0..m {
        s[pi][j] = alphas[j] - c[pi] * secrets[j];
    }

    Ok(MlsagSignature {
        c0: c[0].to_bytes(),
        responses: s
            .iter()
            .map(|column| column.iter().map(|x| x.to_bytes()).collect())
            .collect(),
        key_images,
    })
}

pub fn verify_mlsag(message: &[u8], rings: &[Vec<RingPoint>], signature: &MlsagSignature) -> bool {
    let Ok((n, m)) = dimensions(rings) else {
        return false;
    };
    if signature.responses.len() != n
        || signature.key_images.len() != m
        || signature.responses.iter().any(|column| column.len() != m)
    {
        return false;
    }

    let Some(image_points) = signature
        .key_images
        .iter()
        .map(key_image_point)
        .collect::<Option<Vec<_>>>()
    else {
        return false;
    };
    let Some(points) = rings.iter().map(|r| decompress_ring(r)).collect::<Option<Vec<_>>>() else {
        return false;
    };
    let Some(c0) = scalar_from_canonical(&signature.c0) else {
        return false;
    };

    let mut c = c0;
    for i in 0..n {
        let mut ls = Vec::with_capacity(m);
        let mut rs = Vec::with_capacity(m);
        for j in 0..m {
            let Some(s) = scalar_from_canonical(&signature.responses[i][j]) else {
                return false;
            };
            ls.push(RistrettoPoint::vartime_double_scalar_mul_basepoint(&c, &points[j][i], &s));
            rs.push(s * key_image_base(&rings[j][i]) + c * image_points[j]);
        }
        c = column_challenge(message, &ls, &rs);
    }

    c == c0
}
