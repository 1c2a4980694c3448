//! Membership proof backends
//!
//! A membership proof shows that a re-randomized input tuple opens to some
//! leaf under a given tree root without saying which. The real prover is
//! an external circuit; this crate ships only the deterministic
//! placeholder, which binds the tuple to the root but proves nothing about
//! membership to a verifier.

use super::curve_tree::{verify_branch_with, OutputTuple, TreeBranch, LEAF_ELEMENTS};
use super::input::InputTuple;
use super::pedersen::{PedersenHash, TREE_HASH_SEED};
use crate::crypto::ed25519::EdPoint;
use crate::crypto::hash::sha256_multi;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};

const PLACEHOLDER_DOMAIN: &[u8] = b"FCMP_MEMBERSHIP_PLACEHOLDER_v1";
pub const PLACEHOLDER_PROOF_LEN: usize = 64;
pub const PROOF_VERSION: u8 = 1;

/// Proof bytes plus the root they were produced against
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MembershipProof {
    pub version: u8,
    pub proof: Vec<u8>,
    pub tree_root: EdPoint,
}

impl MembershipProof {
    pub fn new(proof: Vec<u8>, tree_root: EdPoint) -> Self {
        Self { version: PROOF_VERSION, proof, tree_root }
    }

    pub fn is_empty(&self) -> bool {
        self.proof.is_empty()
    }

    pub fn is_valid(&self) -> bool {
        !self.proof.is_empty() && self.tree_root.is_valid()
    }
}

/// What the prover knows about the leaf being spent
#[derive(Debug, Clone)]
pub struct MembershipWitness<'a> {
    pub output: &'a OutputTuple,
    pub branch: &'a TreeBranch,
}

pub trait MembershipBackend: Send + Sync {
    fn name(&self) -> &'static str;

    fn prove(&self, tuple: &InputTuple, root: &EdPoint, witness: &MembershipWitness<'_>) -> Result<MembershipProof>;

    fn verify(&self, tuple: &InputTuple, root: &EdPoint, proof: &MembershipProof) -> bool;
}

/// Deterministic stand-in for the membership circuit.
///
/// `proof = H(domain || O~ || I~ || C~ || root) || H(domain || root)`.
/// The prover refuses unless the witness branch really opens to the root,
/// but the verifier can only recompute the hash.
pub struct PlaceholderMembership {
    hasher: PedersenHash,
}

impl PlaceholderMembership {
    pub fn new() -> Result<Self> {
        Ok(Self { hasher: PedersenHash::new(TREE_HASH_SEED, LEAF_ELEMENTS)? })
    }

    fn proof_bytes(tuple: &InputTuple, root: &EdPoint) -> Vec<u8> {
        let mut out = Vec::with_capacity(PLACEHOLDER_PROOF_LEN);
        out.extend_from_slice(&sha256_multi(&[
            PLACEHOLDER_DOMAIN,
            &tuple.o_tilde.0,
            &tuple.i_tilde.0,
            &tuple.c_tilde.0,
            &root.0,
        ]));
        out.extend_from_slice(&sha256_multi(&[PLACEHOLDER_DOMAIN, &root.0]));
        out
    }
}

impl MembershipBackend for PlaceholderMembership {
    fn name(&self) -> &'static str {
        "placeholder"
    }

    fn prove(&self, tuple: &InputTuple, root: &EdPoint, witness: &MembershipWitness<'_>) -> Result<MembershipProof> {
        if !verify_branch_with(&self.hasher, root, witness.output, witness.branch) {
            return Err(Error::Crypto(format!(
                "leaf {} does not open to the tree root",
                witness.branch.leaf_index
            )));
        }
        Ok(MembershipProof::new(Self::proof_bytes(tuple, root), *root))
    }

    fn verify(&self, tuple: &InputTuple, root: &EdPoint, proof: &MembershipProof) -> bool {
        proof.version == PROOF_VERSION
            && proof.tree_root == *root
            && proof.proof.len() == PLACEHOLDER_PROOF_LEN
            && proof.proof == Self::proof_bytes(tuple, root)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::ed25519::{basepoint, hash_to_point};
    use crate::crypto::scalar::random_nonzero_scalar;
    use crate::fcmp::curve_tree::CurveTree;
    use rand::rngs::OsRng;

    fn random_tuple() -> OutputTuple {
        let o = random_nonzero_scalar(&mut OsRng) * basepoint();
        let i = hash_to_point(o.compress().as_bytes()).unwrap();
        let c = random_nonzero_scalar(&mut OsRng) * basepoint();
        OutputTuple::new(o.into(), i.into(), c.into())
    }

    fn input_tuple(output: &OutputTuple) -> InputTuple {
        InputTuple { o_tilde: output.o, i_tilde: output.i, c_tilde: output.c }
    }

    #[test]
    fn test_placeholder_roundtrip() {
        let outputs: Vec<_> = (0..5).map(|_| random_tuple()).collect();
        let mut tree = CurveTree::in_memory().unwrap();
        let root = tree.add_outputs(&outputs).unwrap();
        let branch = tree.branch(2).unwrap();
        let backend = PlaceholderMembership::new().unwrap();
        let tuple = input_tuple(&outputs[2]);

        let witness = MembershipWitness { output: &outputs[2], branch: &branch };
        let proof = backend.prove(&tuple, &root, &witness).unwrap();
        assert_eq!(proof.proof.len(), PLACEHOLDER_PROOF_LEN);
        assert!(proof.is_valid());
        assert!(backend.verify(&tuple, &root, &proof));

        let other_root = tree.add_outputs(&[random_tuple()]).unwrap();
        assert!(!backend.verify(&tuple, &other_root, &proof));
        assert!(!backend.verify(&input_tuple(&outputs[3]), &root, &proof));
    }

    #[test]
    fn test_prover_refuses_foreign_leaf() {
        let outputs: Vec<_> = (0..3).map(|_| random_tuple()).collect();
        let mut tree = CurveTree::in_memory().unwrap();
        let root = tree.add_outputs(&outputs).unwrap();
        let branch = tree.branch(0).unwrap();
        let stranger = random_tuple();
        let backend = PlaceholderMembership::new().unwrap();

        let witness = MembershipWitness { output: &stranger, branch: &branch };
        assert!(backend.prove(&input_tuple(&stranger), &root, &witness).is_err());
    }
}
