//! Privacy Core Library
//!
//! Privacy-layer cryptography for a UTXO ledger and its consensus glue.
//!
//! ## Modules
//!
//! - `crypto`: SHA-2 helpers, scalars, Ristretto255 and Ed25519 algebra
//! - `structures`: Hash256, KeyImage, OutPoint
//! - `ledger`: Key image double-spend ledger (memory and sled backends)
//! - `privacy`: Stealth addresses, LSAG/MLSAG, decoys, Pedersen commitments, range proofs
//! - `fcmp`: Full-chain membership proofs over an Ed25519 curve tree
//! - `consensus`: Parameters, wire markers, transaction checks, block connect/disconnect
//!
//! ## Curves
//!
//! Ring signatures, stealth addresses and RingCT commitments live on
//! Ristretto255. FCMP lives on Ed25519. Both share the same scalar field.
//!
//! ## Soundness caveat
//!
//! `privacy::range_proof` has no inner-product argument and its `t_hat`
//! reveals the committed amount. It is a placeholder, not a Bulletproof.

pub mod crypto;
pub mod structures;
pub mod ledger;
pub mod privacy;
pub mod fcmp;
pub mod consensus;

// Re-exports for convenience
pub use structures::types::{Amount, Hash256, Height, KeyImage, OutPoint};

pub use ledger::{KeyImageLedger, KeyImageStore, MemoryStore, SledStore, SpendDomain, SpendRecord};

pub use privacy::{
    mlsag::MlsagSignature,
    pedersen::Commitment,
    range_proof::RangeProof,
    ring::RingSignature,
    stealth::{StealthAddress, StealthOutput, StealthSecrets},
    transaction::{PrivacyTransaction, PrivacyType},
};

pub use fcmp::{
    curve_tree::{CurveTree, OutputTuple, TreeBranch},
    input::{FcmpInput, FcmpTransactionBuilder},
    pedersen::PedersenGenerators,
};

pub use consensus::{
    params::ConsensusParams,
    state::PrivacyState,
    validator::Rejection,
};

/// Protocol constants
pub mod constants {
    /// Absolute floor on ring size, below every height band
    pub const MIN_RING_SIZE: usize = 2;

    /// Anti-DoS ceiling on ring size
    pub const MAX_RING_SIZE: usize = 64;

    /// Largest amount a range proof will attest to (2^63)
    pub const MAX_PROVABLE_AMOUNT: u64 = 1 << 63;

    /// Curve tree branching factor
    pub const TREE_WIDTH: usize = 38;

    /// Scalars per output tuple leaf
    pub const ELEMENTS_PER_OUTPUT: usize = 6;

    /// Blocks before an FCMP output may be spent
    pub const DEFAULT_FCMP_MATURITY: u64 = 10;

    /// Wire protocol version for privacy payloads
    pub const PROTOCOL_VERSION: u32 = 1;
}

/// Error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Cryptographic error: {0}")]
    Crypto(String),

    #[error("Consensus error: {0}")]
    Consensus(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl From<bincode::Error> for Error {
    fn from(e: bincode::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
