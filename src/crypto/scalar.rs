//! Scalar helpers shared by both curves
//!
//! Ristretto255 and Ed25519 have the same prime-order subgroup of order l,
//! so one `Scalar` type serves ring signatures and FCMP alike.

use super::hash::sha512;
use curve25519_dalek::scalar::Scalar;
use rand_core::{CryptoRng, RngCore};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Draw a uniformly random scalar.
pub fn random_scalar<R: RngCore + CryptoRng>(rng: &mut R) -> Scalar {
    let mut wide = [0u8; 64];
    rng.fill_bytes(&mut wide);
    let scalar = Scalar::from_bytes_mod_order_wide(&wide);
    wide.zeroize();
    scalar
}

/// Draw a random scalar that is guaranteed non-zero.
pub fn random_nonzero_scalar<R: RngCore + CryptoRng>(rng: &mut R) -> Scalar {
    loop {
        let s = random_scalar(rng);
        if s != Scalar::ZERO {
            return s;
        }
    }
}

/// Parse a canonical 32-byte scalar encoding.
pub fn scalar_from_canonical(bytes: &[u8; 32]) -> Option<Scalar> {
    Option::from(Scalar::from_canonical_bytes(*bytes))
}

/// Reduce an arbitrary-length byte string into a scalar.
///
/// 32 and 64 byte inputs are reduced directly; anything else is first
/// hashed with SHA-512.
pub fn scalar_from_bytes_mod_order(bytes: &[u8]) -> Scalar {
    match bytes.len() {
        32 => {
            let mut buf = [0u8; 32];
            buf.copy_from_slice(bytes);
            Scalar::from_bytes_mod_order(buf)
        }
        64 => {
            let mut buf = [0u8; 64];
            buf.copy_from_slice(bytes);
            Scalar::from_bytes_mod_order_wide(&buf)
        }
        _ => Scalar::from_bytes_mod_order_wide(&sha512(bytes)),
    }
}

/// Multiplicative inverse, with zero mapping to zero.
pub fn invert_or_zero(s: &Scalar) -> Scalar {
    if *s == Scalar::ZERO {
        Scalar::ZERO
    } else {
        s.invert()
    }
}

/// Secret scalar that is wiped from memory when dropped.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SecretScalar(Scalar);

impl SecretScalar {
    pub fn new(scalar: Scalar) -> Self {
        Self(scalar)
    }

    pub fn random<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        Self(random_nonzero_scalar(rng))
    }

    pub fn expose(&self) -> &Scalar {
        &self.0
    }

    pub fn to_bytes(&self) -> [u8; 32] {
        self.0.to_bytes()
    }

    /// Parse from a canonical encoding.
    pub fn from_canonical(bytes: &[u8; 32]) -> Option<Self> {
        scalar_from_canonical(bytes).map(Self)
    }
}

impl std::fmt::Debug for SecretScalar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SecretScalar(..)")
    }
}
