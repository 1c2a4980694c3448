//! Hash Functions
//!
//! Provides:
//! - SHA-256 (key image ledger keys, view tags, transaction ids)
//! - SHA-512 (wide reduction into the scalar field)
//! - Domain-separated hash-to-scalar (Fiat-Shamir challenges, key tweaks)
//! - HKDF-SHA256 (amount masks)

use crate::{Error, Result};
use curve25519_dalek::scalar::Scalar;
use sha2::{Digest, Sha256, Sha512};

/// SHA-256 hash (32 bytes)
#[inline]
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// SHA-256 of multiple inputs
pub fn sha256_multi(inputs: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    for input in inputs {
        hasher.update(input);
    }
    hasher.finalize().into()
}

/// Double SHA-256
#[inline]
pub fn sha256d(data: &[u8]) -> [u8; 32] {
    sha256(&sha256(data))
}

/// SHA-512 hash (64 bytes)
#[inline]
pub fn sha512(data: &[u8]) -> [u8; 64] {
    let mut hasher = Sha512::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Hash a domain tag and a list of parts into a scalar.
///
/// SHA-512 output is reduced wide, so the result is uniform mod l.
pub fn hash_to_scalar(domain: &[u8], parts: &[&[u8]]) -> Scalar {
    let mut hasher = Sha512::new();
    hasher.update(domain);
    for part in parts {
        hasher.update(part);
    }
    let wide: [u8; 64] = hasher.finalize().into();
    Scalar::from_bytes_mod_order_wide(&wide)
}

/// HKDF-SHA256 key derivation
pub fn hkdf_sha256(ikm: &[u8], salt: &[u8], info: &[u8], output_len: usize) -> Result<Vec<u8>> {
    use hkdf::Hkdf;

    let hkdf = Hkdf::<Sha256>::new(Some(salt), ikm);
    let mut output = vec![0u8; output_len];
    hkdf.expand(info, &mut output)
        .map_err(|_| Error::InvalidInput(format!("HKDF output length {} too large", output_len)))?;
    Ok(output)
}
