//! Consensus Parameters
//!
//! Every height-dependent knob of the privacy layer lives here, so a node
//! can run mainnet, testnet or a private regtest from one JSON file.

use crate::constants::{DEFAULT_FCMP_MATURITY, MAX_RING_SIZE, MIN_RING_SIZE};
use crate::privacy::decoy::DecoySelectionParams;
use crate::structures::types::Height;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Minimum ring size from `from_height` onward
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RingSizeBand {
    pub from_height: Height,
    pub min_ring_size: usize,
}

impl RingSizeBand {
    pub const fn new(from_height: Height, min_ring_size: usize) -> Self {
        Self { from_height, min_ring_size }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsensusParams {
    /// Network name, informational only
    pub network: String,

    /// Ring-size floor by height, ascending by `from_height`
    pub ring_size_bands: Vec<RingSizeBand>,

    /// Anti-DoS ceiling on ring size
    pub max_ring_size: usize,

    /// First height at which privacy transactions are accepted
    pub privacy_activation_height: Height,

    /// First height at which FCMP transactions are accepted
    pub fcmp_activation_height: Height,

    /// Blocks an FCMP output must wait before it can be spent
    pub fcmp_maturity: u64,

    /// Defaults handed to wallets building rings
    #[serde(default)]
    pub decoy: DecoySelectionParams,
}

impl Default for ConsensusParams {
    fn default() -> Self {
        Self::mainnet()
    }
}

impl ConsensusParams {
    pub fn mainnet() -> Self {
        Self {
            network: "mainnet".into(),
            ring_size_bands: vec![
                RingSizeBand::new(0, 3),
                RingSizeBand::new(100_000, 7),
                RingSizeBand::new(500_000, 11),
            ],
            max_ring_size: MAX_RING_SIZE,
            privacy_activation_height: 0,
            fcmp_activation_height: 210_000,
            fcmp_maturity: DEFAULT_FCMP_MATURITY,
            decoy: DecoySelectionParams::default(),
        }
    }

    pub fn testnet() -> Self {
        Self {
            network: "testnet".into(),
            fcmp_activation_height: 2_000,
            ..Self::mainnet()
        }
    }

    /// Everything active almost immediately, short maturity
    pub fn regtest() -> Self {
        Self {
            network: "regtest".into(),
            ring_size_bands: vec![RingSizeBand::new(0, MIN_RING_SIZE)],
            fcmp_activation_height: 1,
            fcmp_maturity: 1,
            decoy: DecoySelectionParams {
                min_confirmations: 1,
                ..DecoySelectionParams::default()
            },
            ..Self::mainnet()
        }
    }

    /// Look up a preset by name
    pub fn for_network(name: &str) -> Option<Self> {
        match name {
            "mainnet" | "main" => Some(Self::mainnet()),
            "testnet" | "test" => Some(Self::testnet()),
            "regtest" => Some(Self::regtest()),
            _ => None,
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let params: Self = serde_json::from_str(json)
            .map_err(|e| Error::Serialization(format!("consensus params: {}", e)))?;
        params.validate()?;
        Ok(params)
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| Error::InvalidInput(format!("cannot read {}: {}", path.display(), e)))?;
        Self::from_json_str(&json)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Reject parameter sets no node could enforce consistently.
    pub fn validate(&self) -> Result<()> {
        let first = self
            .ring_size_bands
            .first()
            .ok_or_else(|| Error::Consensus("ring size bands are empty".into()))?;
        if first.from_height != 0 {
            return Err(Error::Consensus("first ring size band must start at height 0".into()));
        }
        for pair in self.ring_size_bands.windows(2) {
            if pair[1].from_height <= pair[0].from_height {
                return Err(Error::Consensus("ring size bands must be strictly ascending".into()));
            }
        }

        let largest = self
            .ring_size_bands
            .iter()
            .map(|b| b.min_ring_size)
            .max()
            .unwrap_or(MIN_RING_SIZE);
        if self.ring_size_bands.iter().any(|b| b.min_ring_size < MIN_RING_SIZE) {
            return Err(Error::Consensus(format!("minimum ring size below {}", MIN_RING_SIZE)));
        }
        if self.max_ring_size < largest {
            return Err(Error::Consensus(format!(
                "max ring size {} below largest minimum {}",
                self.max_ring_size, largest
            )));
        }
        if self.max_ring_size > MAX_RING_SIZE {
            return Err(Error::Consensus(format!(
                "max ring size {} above protocol limit {}",
                self.max_ring_size, MAX_RING_SIZE
            )));
        }
        if self.fcmp_activation_height < self.privacy_activation_height {
            return Err(Error::Consensus("FCMP cannot activate before privacy".into()));
        }

        let decoy = &self.decoy;
        if !(0.0..=1.0).contains(&decoy.amount_similarity) {
            return Err(Error::Consensus("decoy amount similarity must be within [0, 1]".into()));
        }
        if !(decoy.gamma_shape > 0.0 && decoy.gamma_scale > 0.0) {
            return Err(Error::Consensus("gamma parameters must be positive".into()));
        }
        if decoy.max_confirmations != 0 && decoy.max_confirmations < decoy.min_confirmations {
            return Err(Error::Consensus("decoy confirmation window is empty".into()));
        }
        Ok(())
    }

    /// Ring-size floor in force at `height`
    pub fn min_ring_size(&self, height: Height) -> usize {
        self.ring_size_bands
            .iter()
            .rev()
            .find(|b| b.from_height <= height)
            .map_or(MIN_RING_SIZE, |b| b.min_ring_size)
    }

    pub fn is_privacy_active(&self, height: Height) -> bool {
        height >= self.privacy_activation_height
    }

    pub fn is_fcmp_active(&self, height: Height) -> bool {
        height >= self.fcmp_activation_height
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets_validate() {
        for params in [ConsensusParams::mainnet(), ConsensusParams::testnet(), ConsensusParams::regtest()] {
            params.validate().unwrap();
        }
        assert_eq!(ConsensusParams::for_network("test").unwrap().fcmp_activation_height, 2_000);
        assert!(ConsensusParams::for_network("moon").is_none());
    }

    #[test]
    fn test_ring_size_bands() {
        let params = ConsensusParams::mainnet();
        assert_eq!(params.min_ring_size(0), 3);
        assert_eq!(params.min_ring_size(99_999), 3);
        assert_eq!(params.min_ring_size(100_000), 7);
        assert_eq!(params.min_ring_size(499_999), 7);
        assert_eq!(params.min_ring_size(500_000), 11);
        assert_eq!(params.min_ring_size(u64::MAX), 11);
    }

    #[test]
    fn test_activation() {
        let params = ConsensusParams::mainnet();
        assert!(params.is_privacy_active(0));
        assert!(!params.is_fcmp_active(209_999));
        assert!(params.is_fcmp_active(210_000));
        assert!(ConsensusParams::regtest().is_fcmp_active(1));
    }

    #[test]
    fn test_validate_rejects_inconsistent() {
        let mut params = ConsensusParams::mainnet();
        params.ring_size_bands.clear();
        assert!(params.validate().is_err());

        let mut params = ConsensusParams::mainnet();
        params.ring_size_bands[0].min_ring_size = 1;
        assert!(params.validate().is_err());

        let mut params = ConsensusParams::mainnet();
        params.max_ring_size = 8;
        assert!(params.validate().is_err());

        let mut params = ConsensusParams::mainnet();
        params.ring_size_bands.swap(1, 2);
        assert!(params.validate().is_err());

        let mut params = ConsensusParams::mainnet();
        params.decoy.amount_similarity = 2.0;
        assert!(params.validate().is_err());
    }

    #[test]
    fn test_json_roundtrip() {
        let params = ConsensusParams::testnet();
        let json = params.to_json().unwrap();
        assert_eq!(ConsensusParams::from_json_str(&json).unwrap(), params);

        let bad = json.replace("\"max_ring_size\": 64", "\"max_ring_size\": 1");
        assert!(ConsensusParams::from_json_str(&bad).is_err());
        assert!(ConsensusParams::from_json_str("{").is_err());
    }

    #[test]
    fn test_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("params.json");
        std::fs::write(&path, ConsensusParams::regtest().to_json().unwrap()).unwrap();
        assert_eq!(ConsensusParams::from_json_file(&path).unwrap(), ConsensusParams::regtest());
        assert!(ConsensusParams::from_json_file(dir.path().join("missing.json")).is_err());
    }

    #[test]
    fn test_decoy_section_optional() {
        let mut value = serde_json::to_value(ConsensusParams::mainnet()).unwrap();
        value.as_object_mut().unwrap().remove("decoy");
        let params = ConsensusParams::from_json_str(&value.to_string()).unwrap();
        assert_eq!(params.decoy, DecoySelectionParams::default());
    }
}
