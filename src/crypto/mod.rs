//! Cryptographic primitives
//!
//! This module provides:
//! - Hash functions (SHA-256, SHA-512, hash-to-scalar, HKDF)
//! - Scalar helpers shared by both curves
//! - Ristretto255 algebra (ring signatures, stealth, confidential amounts)
//! - Ed25519 algebra (FCMP)

pub mod hash;
pub mod scalar;
pub mod ristretto;
pub mod ed25519;

pub use hash::{sha256, sha256d, sha512, hash_to_scalar};
pub use scalar::{random_scalar, random_nonzero_scalar, invert_or_zero, SecretScalar};
pub use ristretto::RingPoint;
pub use ed25519::EdPoint;
