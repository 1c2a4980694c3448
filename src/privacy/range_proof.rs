//! Range Proofs (simplified)
//!
//! Bulletproofs-shaped proof that a commitment V = v*H + gamma*G hides
//! v in [0, 2^64). The prover commits to the bit decomposition (A), to
//! blinding vectors (S) and to two polynomial blinders (T1, T2), draws
//! y, z, x from a merlin transcript, and the verifier checks
//!
//!   tau_x*G + t_hat*H == z^2*V + x*T1 + x^2*T2
//!
//! WARNING: there is no inner-product argument, so A and S are never
//! opened, and t_hat = z^2*v discloses v to anyone who reruns the
//! transcript. This is NOT a sound or hiding range proof.
//!
//! Version 1 layout (225 bytes):
//!   0x01 || A || S || T1 || T2 || tau_x || mu || t_hat
//!
//! Version 2 (aggregated) layout:
//!   0x02 || count u8 || (len u16 LE || v1 proof)*

use super::pedersen::{generator_h, Commitment};
use crate::constants::MAX_PROVABLE_AMOUNT;
use crate::crypto::ristretto::{self, basepoint, RingPoint};
use crate::crypto::scalar::{random_nonzero_scalar, random_scalar, scalar_from_canonical};
use crate::{Error, Result};
use curve25519_dalek::{ristretto::RistrettoPoint, scalar::Scalar, traits::MultiscalarMul};
use merlin::Transcript;
use rand_core::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};

/// Bits in the proven range
pub const RANGE_BITS: usize = 64;
pub const VERSION_SINGLE: u8 = 0x01;
pub const VERSION_AGGREGATED: u8 = 0x02;
/// Encoded size of a version 1 proof
pub const SINGLE_PROOF_LEN: usize = 1 + 7 * 32;

const GENS_DOMAIN: &[u8] = b"PRIV-rangeproof-gens-v1";
const TRANSCRIPT_LABEL: &[u8] = b"PRIV-rangeproof-v1";

struct VectorGenerators {
    g: Vec<RistrettoPoint>,
    h: Vec<RistrettoPoint>,
}

lazy_static::lazy_static! {
    static ref GENS: VectorGenerators = {
        let derive = |tag: u8, i: usize| {
            let mut data = vec![tag];
            data.extend_from_slice(&(i as u64).to_le_bytes());
            ristretto::hash_to_point(GENS_DOMAIN, &data)
        };
        VectorGenerators {
            g: (0..RANGE_BITS).map(|i| derive(b'G', i)).collect(),
            h: (0..RANGE_BITS).map(|i| derive(b'H', i)).collect(),
        }
    };
}

/// Versioned range proof blob
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeProof(pub Vec<u8>);

impl RangeProof {
    pub fn version(&self) -> Option<u8> {
        self.0.first().copied()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

struct SingleProof {
    a: RingPoint,
    s: RingPoint,
    t1: RingPoint,
    t2: RingPoint,
    tau_x: Scalar,
    mu: Scalar,
    t_hat: Scalar,
}

impl SingleProof {
    fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(SINGLE_PROOF_LEN);
        out.push(VERSION_SINGLE);
        for p in [&self.a, &self.s, &self.t1, &self.t2] {
            out.extend_from_slice(&p.0);
        }
        for s in [&self.tau_x, &self.mu, &self.t_hat] {
            out.extend_from_slice(s.as_bytes());
        }
        out
    }

    fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != SINGLE_PROOF_LEN || bytes[0] != VERSION_SINGLE {
            return None;
        }
        let field = |i: usize| -> [u8; 32] {
            let mut out = [0u8; 32];
            out.copy_from_slice(&bytes[1 + i * 32..1 + (i + 1) * 32]);
            out
        };
        let points = [field(0), field(1), field(2), field(3)].map(RingPoint);
        if points.iter().any(|p| !p.is_valid()) {
            return None;
        }
        Some(Self {
            a: points[0],
            s: points[1],
            t1: points[2],
            t2: points[3],
            tau_x: scalar_from_canonical(&field(4))?,
            mu: scalar_from_canonical(&field(5))?,
            t_hat: scalar_from_canonical(&field(6))?,
        })
    }
}

fn challenge(transcript: &mut Transcript, label: &'static [u8]) -> Scalar {
    let mut wide = [0u8; 64];
    transcript.challenge_bytes(label, &mut wide);
    Scalar::from_bytes_mod_order_wide(&wide)
}

/// (y, z, x) for a proof over `commitment`
fn challenges(commitment: &Commitment, a: &RingPoint, s: &RingPoint, t1: &RingPoint, t2: &RingPoint) -> (Scalar, Scalar, Scalar) {
    let mut transcript = Transcript::new(TRANSCRIPT_LABEL);
    transcript.append_message(b"V", commitment.as_bytes());
    transcript.append_message(b"A", &a.0);
    transcript.append_message(b"S", &s.0);
    let y = challenge(&mut transcript, b"y");
    let z = challenge(&mut transcript, b"z");
    transcript.append_message(b"T1", &t1.0);
    transcript.append_message(b"T2", &t2.0);
    let x = challenge(&mut transcript, b"x");
    (y, z, x)
}

fn vector_commit(blind: &Scalar, left: &[Scalar], right: &[Scalar]) -> RistrettoPoint {
    let scalars = std::iter::once(blind).chain(left).chain(right);
    let points = std::iter::once(&basepoint()).chain(&GENS.g).chain(&GENS.h).copied().collect::<Vec<_>>();
    RistrettoPoint::multiscalar_mul(scalars, points)
}

/// Prove `commitment` opens to `amount` under `blinding`.
pub fn create_range_proof<R: RngCore + CryptoRng>(
    amount: u64,
    blinding: &Scalar,
    commitment: &Commitment,
    rng: &mut R,
) -> Result<RangeProof> {
    if amount > MAX_PROVABLE_AMOUNT {
        return Err(Error::InvalidInput(format!("amount {} above provable maximum", amount)));
    }
    if *blinding == Scalar::ZERO {
        return Err(Error::InvalidInput("zero blinding factor".into()));
    }
    if !commitment.verify_opening(amount, blinding) {
        return Err(Error::InvalidInput("commitment does not open to amount".into()));
    }

    // a_L = bits of v, a_R = a_L - 1
    let a_l: Vec<Scalar> = (0..RANGE_BITS).map(|i| Scalar::from((amount >> i) & 1)).collect();
    let a_r: Vec<Scalar> = a_l.iter().map(|b| b - Scalar::ONE).collect();
    let alpha = random_nonzero_scalar(rng);
    let a = RingPoint::from_point(&vector_commit(&alpha, &a_l, &a_r));

    let s_l: Vec<Scalar> = (0..RANGE_BITS).map(|_| random_scalar(rng)).collect();
    let s_r: Vec<Scalar> = (0..RANGE_BITS).map(|_| random_scalar(rng)).collect();
    let rho = random_nonzero_scalar(rng);
    let s = RingPoint::from_point(&vector_commit(&rho, &s_l, &s_r));

    let tau1 = random_nonzero_scalar(rng);
    let tau2 = random_nonzero_scalar(rng);
    let t1 = RingPoint::from_secret(&tau1);
    let t2 = RingPoint::from_secret(&tau2);

    let (_y, z, x) = challenges(commitment, &a, &s, &t1, &t2);
    let z2 = z * z;

    let proof = SingleProof {
        a,
        s,
        t1,
        t2,
        tau_x: tau1 * x + tau2 * x * x + z2 * blinding,
        mu: alpha + rho * x,
        t_hat: z2 * Scalar::from(amount),
    };
    Ok(RangeProof(proof.encode()))
}

/// Check a version 1 proof against `commitment`.
pub fn verify_range_proof(commitment: &Commitment, proof: &RangeProof) -> bool {
    let Some(v) = commitment.decompress() else {
        return false;
    };
    let Some(p) = SingleProof::decode(&proof.0) else {
        return false;
    };
    let (Some(t1), Some(t2)) = (p.t1.decompress(), p.t2.decompress()) else {
        return false;
    };

    let (_y, z, x) = challenges(commitment, &p.a, &p.s, &p.t1, &p.t2);
    let lhs = RistrettoPoint::vartime_double_scalar_mul_basepoint(&p.t_hat, &generator_h(), &p.tau_x);
    let rhs = RistrettoPoint::multiscalar_mul([z * z, x, x * x], [v, t1, t2]);
    lhs == rhs
}

/// Concatenate single proofs under one version 2 envelope.
pub fn create_aggregated_range_proof<R: RngCore + CryptoRng>(
    amounts: &[u64],
    blindings: &[Scalar],
    commitments: &[Commitment],
    rng: &mut R,
) -> Result<RangeProof> {
    let count = amounts.len();
    if count == 0 || count != blindings.len() || count != commitments.len() {
        return Err(Error::InvalidInput("mismatched aggregated range proof inputs".into()));
    }
    let count_byte = u8::try_from(count)
        .map_err(|_| Error::InvalidInput(format!("{} proofs exceed aggregation limit", count)))?;

    let mut out = vec![VERSION_AGGREGATED, count_byte];
    for ((amount, blinding), commitment) in amounts.iter().zip(blindings).zip(commitments) {
        let single = create_range_proof(*amount, blinding, commitment, rng)?;
        out.extend_from_slice(&(single.len() as u16).to_le_bytes());
        out.extend_from_slice(single.as_bytes());
    }
    Ok(RangeProof(out))
}

pub fn verify_aggregated_range_proof(commitments: &[Commitment], proof: &RangeProof) -> bool {
    let data = proof.as_bytes();
    if data.len() < 2 || data[0] != VERSION_AGGREGATED {
        return false;
    }
    let count = data[1] as usize;
    if count == 0 || count != commitments.len() {
        return false;
    }

    let mut offset = 2;
    for commitment in commitments {
        let Some(len_bytes) = data.get(offset..offset + 2) else {
            return false;
        };
        let len = u16::from_le_bytes([len_bytes[0], len_bytes[1]]) as usize;
        offset += 2;
        let Some(single) = data.get(offset..offset + len) else {
            return false;
        };
        if !verify_range_proof(commitment, &RangeProof(single.to_vec())) {
            return false;
        }
        offset += len;
    }
    offset == data.len()
}
