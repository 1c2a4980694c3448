//! Full-Chain Membership Proofs
//!
//! Spends prove membership in the set of *all* FCMP outputs, accumulated
//! in a curve tree on Ed25519, instead of in a small decoy ring.
//!
//! - `pedersen`: generators, commitments and the linear tree hash
//! - `curve_tree`: the accumulator, its branches and reorg truncation
//! - `storage`: memory and sled persistence for the tree
//! - `membership`: pluggable membership provers
//! - `input`: re-randomized inputs, SA+L signatures, balance, builder

pub mod pedersen;
pub mod curve_tree;
pub mod storage;
pub mod membership;
pub mod input;

pub use curve_tree::{CurveTree, OutputTuple, TreeBranch, TreeIndex, TreeNode};
pub use input::{FcmpInput, FcmpInputError, FcmpTransactionBuilder, InputTuple, SalSignature};
pub use membership::{MembershipBackend, MembershipProof, PlaceholderMembership};
pub use pedersen::{PedersenGenerators, PedersenHash};
pub use storage::{MemoryTreeStorage, SledTreeStorage, TreeBatch, TreeStorage};
