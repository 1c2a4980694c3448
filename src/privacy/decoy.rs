//! Decoy Selection
//!
//! Picks ring decoys from the output set. Ages are drawn from a Gamma
//! distribution so decoys look like genuine spends (recent outputs are
//! spent more often); a uniform pass fills whatever the Gamma pass missed.

use super::ring::{check_ring_size, RingMember};
use crate::crypto::ristretto::RingPoint;
use crate::structures::types::{Amount, Hash256, Height, OutPoint};
use crate::{Error, Result};
use rand::Rng;
use rand_core::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{debug, warn};

/// An output eligible to appear in a ring
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecoyCandidate {
    pub outpoint: OutPoint,
    pub public_key: RingPoint,
    pub amount: Amount,
    pub height: Height,
    pub is_coinbase: bool,
}

impl DecoyCandidate {
    fn to_member(self) -> RingMember {
        RingMember::new(self.outpoint, self.public_key)
    }
}

/// Decoy selection knobs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecoySelectionParams {
    pub min_confirmations: u64,
    /// 0 = no limit
    pub max_confirmations: u64,
    /// 0.0 = exact amounts only, 1.0 = any amount
    pub amount_similarity: f64,
    pub use_gamma: bool,
    pub gamma_shape: f64,
    pub gamma_scale: f64,
    pub exclude_coinbase: bool,
}

impl Default for DecoySelectionParams {
    fn default() -> Self {
        Self {
            min_confirmations: 10,
            max_confirmations: 0,
            amount_similarity: 0.5,
            use_gamma: true,
            gamma_shape: 19.28,
            gamma_scale: 1.0,
            exclude_coinbase: true,
        }
    }
}

/// Read access to the output set
pub trait DecoyProvider {
    fn output_count(&self) -> u64;

    fn height(&self) -> Height;

    fn output_by_index(&self, index: u64) -> Option<DecoyCandidate>;

    /// Up to `count` random outputs with height in `[min_height, max_height]`.
    fn random_outputs(
        &self,
        count: usize,
        min_height: Height,
        max_height: Height,
        rng: &mut dyn RngCore,
    ) -> Vec<DecoyCandidate>;
}

/// Output set held in memory, indexed by insertion order
#[derive(Debug, Clone, Default)]
pub struct MemoryDecoyProvider {
    outputs: Vec<DecoyCandidate>,
    height: Height,
}

impl MemoryDecoyProvider {
    pub fn new(height: Height) -> Self {
        Self { outputs: Vec::new(), height }
    }

    pub fn add_output(&mut self, candidate: DecoyCandidate) {
        self.outputs.push(candidate);
    }

    pub fn set_height(&mut self, height: Height) {
        self.height = height;
    }
}

impl DecoyProvider for MemoryDecoyProvider {
    fn output_count(&self) -> u64 {
        self.outputs.len() as u64
    }

    fn height(&self) -> Height {
        self.height
    }

    fn output_by_index(&self, index: u64) -> Option<DecoyCandidate> {
        self.outputs.get(usize::try_from(index).ok()?).copied()
    }

    fn random_outputs(
        &self,
        count: usize,
        min_height: Height,
        max_height: Height,
        rng: &mut dyn RngCore,
    ) -> Vec<DecoyCandidate> {
        let eligible: Vec<&DecoyCandidate> = self
            .outputs
            .iter()
            .filter(|c| c.height >= min_height && c.height <= max_height)
            .collect();
        if eligible.is_empty() {
            return Vec::new();
        }
        (0..count)
            .map(|_| *eligible[rng.gen_range(0..eligible.len())])
            .collect()
    }
}

/// Standard normal via Box-Muller
fn sample_normal<R: RngCore + ?Sized>(rng: &mut R) -> f64 {
    let u1: f64 = rng.gen::<f64>().max(1e-10);
    let u2: f64 = rng.gen();
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
}

/// Gamma(shape, scale) via Marsaglia-Tsang, clamped to `[0, max]`.
pub fn sample_gamma<R: RngCore + ?Sized>(shape: f64, scale: f64, max: u64, rng: &mut R) -> u64 {
    let shape = shape.max(1.0);
    let d = shape - 1.0 / 3.0;
    let c = 1.0 / (9.0 * d).sqrt();

    loop {
        let (x, v) = loop {
            let x = sample_normal(rng);
            let v = 1.0 + c * x;
            if v > 0.0 {
                break (x, v * v * v);
            }
        };
        let u: f64 = rng.gen();
        let x2 = x * x;
        if u < 1.0 - 0.0331 * x2 * x2 || u.ln() < 0.5 * x2 + d * (1.0 - v + v.ln()) {
            let result = (d * v * scale).clamp(0.0, max as f64);
            return result as u64;
        }
    }
}

struct Selection<'a> {
    params: &'a DecoySelectionParams,
    real_amount: Amount,
    min_height: Height,
    max_height: Height,
    used_txids: HashSet<Hash256>,
    picked: Vec<RingMember>,
}

impl<'a> Selection<'a> {
    fn eligible(&self, c: &DecoyCandidate) -> bool {
        c.height >= self.min_height
            && c.height <= self.max_height
            && !(self.params.exclude_coinbase && c.is_coinbase)
            && !self.used_txids.contains(&c.outpoint.tx_hash)
    }

    fn amount_too_different(&self, c: &DecoyCandidate) -> bool {
        if self.params.amount_similarity >= 1.0 || self.real_amount == 0 {
            return false;
        }
        let ratio = if c.amount == 0 {
            f64::INFINITY
        } else {
            let r = c.amount as f64 / self.real_amount as f64;
            if r < 1.0 { 1.0 / r } else { r }
        };
        ratio > 1.0 + 10.0 * self.params.amount_similarity
    }

    fn take(&mut self, c: DecoyCandidate) {
        self.used_txids.insert(c.outpoint.tx_hash);
        self.picked.push(c.to_member());
    }
}

/// Choose `ring_size - 1` decoys for the real output.
pub fn select_decoys<P, R>(
    provider: &P,
    real_outpoint: &OutPoint,
    ring_size: usize,
    real_amount: Amount,
    params: &DecoySelectionParams,
    rng: &mut R,
) -> Result<Vec<RingMember>>
where
    P: DecoyProvider + ?Sized,
    R: RngCore + CryptoRng,
{
    check_ring_size(ring_size)?;
    let total = provider.output_count();
    if total < ring_size as u64 {
        return Err(Error::InvalidInput(format!(
            "output set has {} outputs, ring needs {}",
            total, ring_size
        )));
    }

    let height = provider.height();
    let max_height = height
        .checked_sub(params.min_confirmations)
        .ok_or_else(|| Error::InvalidInput("chain too short for decoy confirmations".into()))?;
    let min_height = if params.max_confirmations == 0 {
        0
    } else {
        height.saturating_sub(params.max_confirmations)
    };

    let needed = ring_size - 1;
    let mut selection = Selection {
        params,
        real_amount,
        min_height,
        max_height,
        used_txids: HashSet::from([real_outpoint.tx_hash]),
        picked: Vec::with_capacity(needed),
    };

    if params.use_gamma {
        let max_attempts = needed * 10;
        let mut attempts = 0;
        while selection.picked.len() < needed && attempts < max_attempts {
            attempts += 1;
            let age = sample_gamma(params.gamma_shape, params.gamma_scale, total, rng);
            let index = (total - 1).saturating_sub(age);
            let Some(candidate) = provider.output_by_index(index) else {
                continue;
            };
            if !selection.eligible(&candidate) {
                continue;
            }
            if selection.amount_too_different(&candidate) && rng.gen_range(0..=100u32) > 20 {
                continue;
            }
            selection.take(candidate);
        }
    }

    if selection.picked.len() < needed {
        let missing = needed - selection.picked.len();
        debug!(missing, "falling back to uniform decoy selection");
        for candidate in provider.random_outputs(missing * 2, min_height, max_height, &mut *rng) {
            if selection.picked.len() >= needed {
                break;
            }
            if selection.eligible(&candidate) {
                selection.take(candidate);
            }
        }
    }

    if selection.picked.len() < needed {
        warn!(
            found = selection.picked.len(),
            needed,
            "not enough decoys for ring"
        );
        return Err(Error::InvalidInput(format!(
            "found {} of {} decoys",
            selection.picked.len(),
            needed
        )));
    }

    Ok(selection.picked)
}

/// Insert the real member at a uniformly random position.
pub fn build_ring<R: RngCore + CryptoRng>(
    real: RingMember,
    decoys: Vec<RingMember>,
    rng: &mut R,
) -> Result<(Vec<RingMember>, usize)> {
    check_ring_size(decoys.len() + 1)?;
    let real_index = rng.gen_range(0..=decoys.len());
    let mut ring = decoys;
    ring.insert(real_index, real);
    Ok((ring, real_index))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::scalar::random_nonzero_scalar;
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    fn candidate(i: u64, height: Height, amount: Amount, coinbase: bool, rng: &mut ChaCha20Rng) -> DecoyCandidate {
        let mut txid = [0u8; 32];
        txid[..8].copy_from_slice(&i.to_le_bytes());
        DecoyCandidate {
            outpoint: OutPoint::new(Hash256(txid), 0),
            public_key: RingPoint::from_secret(&random_nonzero_scalar(rng)),
            amount,
            height,
            is_coinbase: coinbase,
        }
    }

    fn provider(count: u64, height: Height, rng: &mut ChaCha20Rng) -> MemoryDecoyProvider {
        let mut p = MemoryDecoyProvider::new(height);
        for i in 0..count {
            p.add_output(candidate(i, i * height / count.max(1), 1_000, false, rng));
        }
        p
    }

    #[test]
    fn test_gamma_sampler_bounded() {
        let mut rng = ChaCha20Rng::seed_from_u64(1);
        for _ in 0..1000 {
            assert!(sample_gamma(19.28, 1.0, 50, &mut rng) <= 50);
        }
        // Mean of Gamma(k, 1) is k
        let mean: f64 = (0..2000)
            .map(|_| sample_gamma(19.28, 1.0, 10_000, &mut rng) as f64)
            .sum::<f64>()
            / 2000.0;
        assert!((mean - 19.28).abs() < 2.0, "mean {}", mean);
    }

    #[test]
    fn test_select_decoys_fills_ring() {
        let mut rng = ChaCha20Rng::seed_from_u64(7);
        let p = provider(500, 1000, &mut rng);
        let real = OutPoint::new(Hash256([0xee; 32]), 0);

        let decoys = select_decoys(&p, &real, 11, 1_000, &DecoySelectionParams::default(), &mut rng).unwrap();
        assert_eq!(decoys.len(), 10);

        let txids: HashSet<_> = decoys.iter().map(|d| d.outpoint.tx_hash).collect();
        assert_eq!(txids.len(), 10);
        assert!(!txids.contains(&real.tx_hash));
        for d in &decoys {
            let idx = u64::from_le_bytes(d.outpoint.tx_hash.0[..8].try_into().unwrap());
            assert!(p.output_by_index(idx).unwrap().height <= 990);
        }
    }

    #[test]
    fn test_coinbase_excluded() {
        let mut rng = ChaCha20Rng::seed_from_u64(3);
        let mut p = MemoryDecoyProvider::new(1_000);
        for i in 0..200 {
            p.add_output(candidate(i, i / 2, 1_000, i % 2 == 0, &mut rng));
        }
        let real = OutPoint::new(Hash256([0xee; 32]), 0);
        let decoys = select_decoys(&p, &real, 5, 1_000, &DecoySelectionParams::default(), &mut rng).unwrap();
        for d in decoys {
            let idx = u64::from_le_bytes(d.outpoint.tx_hash.0[..8].try_into().unwrap());
            assert_eq!(idx % 2, 1);
        }
    }

    #[test]
    fn test_not_enough_outputs() {
        let mut rng = ChaCha20Rng::seed_from_u64(5);
        let p = provider(3, 1000, &mut rng);
        let real = OutPoint::new(Hash256([0xee; 32]), 0);
        assert!(select_decoys(&p, &real, 11, 0, &DecoySelectionParams::default(), &mut rng).is_err());

        // Everything too young
        let mut young = MemoryDecoyProvider::new(100);
        for i in 0..50 {
            young.add_output(candidate(i, 95, 1, false, &mut rng));
        }
        assert!(select_decoys(&young, &real, 3, 0, &DecoySelectionParams::default(), &mut rng).is_err());
    }

    #[test]
    fn test_uniform_only() {
        let mut rng = ChaCha20Rng::seed_from_u64(9);
        let p = provider(100, 1000, &mut rng);
        let real = OutPoint::new(Hash256([0xee; 32]), 0);
        let params = DecoySelectionParams { use_gamma: false, ..Default::default() };
        assert_eq!(select_decoys(&p, &real, 4, 0, &params, &mut rng).unwrap().len(), 3);
    }

    #[test]
    fn test_build_ring_places_real() {
        let mut rng = ChaCha20Rng::seed_from_u64(11);
        let decoys: Vec<RingMember> = (0..6).map(|i| candidate(i, 1, 1, false, &mut rng).to_member()).collect();
        let real = candidate(99, 1, 1, false, &mut rng).to_member();

        let mut positions = HashSet::new();
        for _ in 0..64 {
            let (ring, idx) = build_ring(real, decoys.clone(), &mut rng).unwrap();
            assert_eq!(ring.len(), 7);
            assert_eq!(ring[idx], real);
            positions.insert(idx);
        }
        assert!(positions.len() > 1);
        assert!(build_ring(real, Vec::new(), &mut rng).is_err());
    }
}
