//! Ed25519 Pedersen generators and the curve-tree hash
//!
//! `PedersenGenerators` is passed around as a context object. Every
//! generator is derived from a public seed with hash-to-point, so no one
//! knows a discrete log relation between them.
//!
//! `PedersenHash` is the node hash of the curve tree:
//!
//! ```text
//! hash(x_0..x_n) = init + sum(x_i * G_i)
//! ```
//!
//! It is linear in its inputs, which is what makes incremental `grow` and
//! `trim` possible without rehashing a whole node.

use crate::crypto::ed25519::{basepoint, hash_to_point, vartime_multiscalar_mul};
use crate::{Error, Result};
use curve25519_dalek::{edwards::EdwardsPoint, scalar::Scalar};

pub const DEFAULT_GENERATOR_SEED: &[u8] = b"FCMP_Pedersen_Generators_v1";
pub const TREE_HASH_SEED: &[u8] = b"CurveTree_v1";
pub const PRECOMPUTED_GENERATORS: usize = 256;

fn derive_generators(seed: &[u8], count: usize) -> Result<Vec<EdwardsPoint>> {
    (0..count as u64)
        .map(|i| {
            let mut data = Vec::with_capacity(seed.len() + 9);
            data.extend_from_slice(seed);
            data.push(b'G');
            data.extend_from_slice(&i.to_le_bytes());
            hash_to_point(&data)
        })
        .collect()
}

fn tagged_point(seed: &[u8], tag: u8) -> Result<EdwardsPoint> {
    let mut data = seed.to_vec();
    data.push(tag);
    hash_to_point(&data)
}

/// Generator set: H for values, G (the basepoint) for blinding, and a
/// vector G_0..G_n for vector commitments.
#[derive(Clone)]
pub struct PedersenGenerators {
    h: EdwardsPoint,
    vector: Vec<EdwardsPoint>,
}

impl PedersenGenerators {
    pub fn new(seed: &[u8]) -> Result<Self> {
        Self::with_capacity(seed, PRECOMPUTED_GENERATORS)
    }

    pub fn with_capacity(seed: &[u8], count: usize) -> Result<Self> {
        Ok(Self {
            h: tagged_point(seed, b'H')?,
            vector: derive_generators(seed, count)?,
        })
    }

    /// Generators from the default seed
    pub fn standard() -> Result<Self> {
        Self::new(DEFAULT_GENERATOR_SEED)
    }

    pub fn h(&self) -> EdwardsPoint {
        self.h
    }

    pub fn g(&self) -> EdwardsPoint {
        basepoint()
    }

    pub fn vector_generator(&self, index: usize) -> Option<&EdwardsPoint> {
        self.vector.get(index)
    }

    pub fn vector_len(&self) -> usize {
        self.vector.len()
    }

    /// v*H + r*G
    pub fn commit(&self, value: u64, blinding: &Scalar) -> EdwardsPoint {
        self.commit_scalar(&Scalar::from(value), blinding)
    }

    pub fn commit_scalar(&self, value: &Scalar, blinding: &Scalar) -> EdwardsPoint {
        EdwardsPoint::vartime_double_scalar_mul_basepoint(value, &self.h, blinding)
    }

    /// sum(v_i * G_i) + r*H
    pub fn commit_vector(&self, values: &[Scalar], blinding: &Scalar) -> Result<EdwardsPoint> {
        if values.len() > self.vector.len() {
            return Err(Error::InvalidInput(format!(
                "vector of {} values exceeds {} generators",
                values.len(),
                self.vector.len()
            )));
        }
        let sum = vartime_multiscalar_mul(values, &self.vector[..values.len()])?;
        Ok(sum + blinding * self.h)
    }
}

impl std::fmt::Debug for PedersenGenerators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PedersenGenerators")
            .field("vector_len", &self.vector.len())
            .finish()
    }
}

/// Linear node hash used by the curve tree
#[derive(Clone)]
pub struct PedersenHash {
    init: EdwardsPoint,
    generators: Vec<EdwardsPoint>,
}

impl PedersenHash {
    pub fn new(seed: &[u8], width: usize) -> Result<Self> {
        Ok(Self {
            init: tagged_point(seed, b'I')?,
            generators: derive_generators(seed, width)?,
        })
    }

    /// Starting point of every node, and the root of an empty tree
    pub fn init(&self) -> EdwardsPoint {
        self.init
    }

    pub fn width(&self) -> usize {
        self.generators.len()
    }

    fn span(&self, offset: usize, len: usize) -> Result<&[EdwardsPoint]> {
        let end = offset
            .checked_add(len)
            .filter(|end| *end <= self.generators.len())
            .ok_or_else(|| {
                Error::InvalidInput(format!(
                    "elements {}..{} exceed hash width {}",
                    offset,
                    offset.saturating_add(len),
                    self.generators.len()
                ))
            })?;
        Ok(&self.generators[offset..end])
    }

    pub fn hash(&self, elements: &[Scalar]) -> Result<EdwardsPoint> {
        self.grow(&self.init, 0, elements)
    }

    /// Add `new` at positions `offset..` to an existing hash.
    pub fn grow(&self, existing: &EdwardsPoint, offset: usize, new: &[Scalar]) -> Result<EdwardsPoint> {
        let gens = self.span(offset, new.len())?;
        Ok(existing + vartime_multiscalar_mul(new, gens)?)
    }

    /// Remove `removed` from positions `offset..` of an existing hash.
    pub fn trim(&self, existing: &EdwardsPoint, offset: usize, removed: &[Scalar]) -> Result<EdwardsPoint> {
        let gens = self.span(offset, removed.len())?;
        Ok(existing - vartime_multiscalar_mul(removed, gens)?)
    }
}

impl std::fmt::Debug for PedersenHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PedersenHash").field("width", &self.generators.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::scalar::random_scalar;
    use curve25519_dalek::traits::Identity;
    use rand::rngs::OsRng;

    #[test]
    fn test_generators_deterministic() {
        let a = PedersenGenerators::with_capacity(b"seed", 4).unwrap();
        let b = PedersenGenerators::with_capacity(b"seed", 4).unwrap();
        let c = PedersenGenerators::with_capacity(b"other", 4).unwrap();
        assert_eq!(a.h(), b.h());
        assert_eq!(a.vector_generator(3), b.vector_generator(3));
        assert_ne!(a.h(), c.h());
        assert_ne!(a.h(), a.g());
        assert!(a.vector_generator(4).is_none());
    }

    #[test]
    fn test_standard_has_256_torsion_free_generators() {
        let gens = PedersenGenerators::standard().unwrap();
        assert_eq!(gens.vector_len(), PRECOMPUTED_GENERATORS);
        assert!(gens.h().is_torsion_free());
        assert!(gens.vector_generator(255).unwrap().is_torsion_free());
    }

    #[test]
    fn test_commit_homomorphic() {
        let gens = PedersenGenerators::with_capacity(b"t", 2).unwrap();
        let r1 = random_scalar(&mut OsRng);
        let r2 = random_scalar(&mut OsRng);
        assert_eq!(gens.commit(3, &r1) + gens.commit(4, &r2), gens.commit(7, &(r1 + r2)));
    }

    #[test]
    fn test_commit_vector() {
        let gens = PedersenGenerators::with_capacity(b"t", 2).unwrap();
        let v = [Scalar::from(2u64), Scalar::from(5u64)];
        let r = Scalar::from(9u64);
        let expected = Scalar::from(2u64) * gens.vector_generator(0).unwrap()
            + Scalar::from(5u64) * gens.vector_generator(1).unwrap()
            + r * gens.h();
        assert_eq!(gens.commit_vector(&v, &r).unwrap(), expected);
        assert!(gens.commit_vector(&[Scalar::ONE; 3], &r).is_err());
    }

    #[test]
    fn test_hash_grow_trim() {
        let hasher = PedersenHash::new(TREE_HASH_SEED, 8).unwrap();
        let xs: Vec<Scalar> = (0..6).map(|_| random_scalar(&mut OsRng)).collect();

        let full = hasher.hash(&xs).unwrap();
        let partial = hasher.hash(&xs[..2]).unwrap();
        assert_eq!(hasher.grow(&partial, 2, &xs[2..]).unwrap(), full);
        assert_eq!(hasher.trim(&full, 2, &xs[2..]).unwrap(), partial);
        assert_eq!(hasher.hash(&[]).unwrap(), hasher.init());
        assert_ne!(hasher.init(), EdwardsPoint::identity());
    }

    #[test]
    fn test_hash_width_enforced() {
        let hasher = PedersenHash::new(TREE_HASH_SEED, 4).unwrap();
        assert!(hasher.hash(&[Scalar::ONE; 5]).is_err());
        assert!(hasher.grow(&hasher.init(), 3, &[Scalar::ONE; 2]).is_err());
        assert!(hasher.grow(&hasher.init(), usize::MAX, &[Scalar::ONE]).is_err());
    }
}
