//! Consensus Integration
//!
//! Glue between the privacy layer and the host ledger:
//! - Network parameters (ring-size bands, activation heights, maturity)
//! - Carrier wire markers for privacy payloads and FCMP outputs
//! - Context-free and contextual transaction checks
//! - Block connect/disconnect over the key image ledger and curve tree

pub mod params;
pub mod wire;
pub mod validator;
pub mod state;

pub use params::{ConsensusParams, RingSizeBand};
pub use state::{BlockSummary, PrivacyState, PrivacyStats};
pub use validator::{OutputResolver, Rejection, ResolvedOutput, TxValidator, ValidationResult};
pub use wire::{CarrierBlock, CarrierInput, CarrierOutput, CarrierTx};
