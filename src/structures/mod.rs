//! Data Structures
//!
//! Common types shared by the ledger, privacy and consensus layers
//! (Hash256, KeyImage, OutPoint, Height, Amount).
//!
//! All structures use serde for bincode serialization.

pub mod types;

pub use types::{Hash256, Height, Amount, KeyImage, OutPoint};
