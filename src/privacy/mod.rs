//! Ring-curve privacy primitives
//!
//! Everything here runs on Ristretto255:
//! - Stealth addresses (one-time keys for each output)
//! - LSAG ring signatures and MLSAG for multi-input spends
//! - Decoy selection for rings
//! - Pedersen commitments and range proofs (hiding amounts)
//! - The privacy transaction payload and its builder

pub mod stealth;
pub mod ring;
pub mod mlsag;
pub mod decoy;
pub mod pedersen;
pub mod range_proof;
pub mod transaction;

pub use mlsag::MlsagSignature;
pub use pedersen::Commitment;
pub use range_proof::RangeProof;
pub use ring::{RingMember, RingSignature};
pub use stealth::{StealthAddress, StealthOutput, StealthSecrets};
pub use transaction::{PrivacyInput, PrivacyOutput, PrivacyTransaction, PrivacyType, RingCtBuilder};
