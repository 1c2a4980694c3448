//! Privacy Transaction Validation
//!
//! Two passes, mirroring how a node sees a transaction:
//!
//! - context-free: shape, point encodings, ring-size bounds, duplicates
//! - contextual: activation, spent key images, ring members against the
//!   output set, MLSAG, commitment balance, range proofs, FCMP proofs
//!
//! Every structural check runs before any cryptographic one, and every
//! refusal carries a stable reason string.

use super::params::ConsensusParams;
use crate::fcmp::input::{check_fcmp_input_structure, check_fcmp_inputs, verify_fcmp_balance, FcmpInputError};
use crate::fcmp::membership::MembershipBackend;
use crate::fcmp::pedersen::PedersenGenerators;
use crate::crypto::ed25519::EdPoint;
use crate::crypto::ristretto::RingPoint;
use crate::ledger::SpentKeyImages;
use crate::privacy::pedersen::Commitment;
use crate::privacy::ring::is_valid_key_image;
use crate::privacy::transaction::{PrivacyTransaction, PrivacyType};
use crate::structures::types::{Height, KeyImage, OutPoint};
use crate::Result;
use std::collections::HashSet;
use thiserror::Error;
use tracing::debug;

/// Why a transaction was refused. Display strings are stable.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Rejection {
    #[error("privacy-no-inputs")]
    NoInputs,
    #[error("privacy-no-outputs")]
    NoOutputs,
    #[error("privacy-mixed-types")]
    MixedTypes,
    #[error("privacy-invalid-key-image")]
    InvalidKeyImage,
    #[error("privacy-invalid-ring")]
    InvalidRing,
    #[error("privacy-ring-too-small")]
    RingTooSmall,
    #[error("privacy-ring-too-large")]
    RingTooLarge,
    #[error("privacy-invalid-ring-member")]
    InvalidRingMember,
    #[error("privacy-duplicate-ring-member")]
    DuplicateRingMember,
    #[error("privacy-invalid-input-commitment")]
    InvalidInputCommitment,
    #[error("privacy-invalid-stealth-pubkey")]
    InvalidStealthPubkey,
    #[error("privacy-invalid-output-commitment")]
    InvalidOutputCommitment,
    #[error("privacy-duplicate-key-image")]
    DuplicateKeyImage,
    #[error("privacy-missing-range-proof")]
    MissingRangeProof,

    #[error("privacy-not-active")]
    NotActive,
    #[error("privacy-key-image-spent")]
    KeyImageSpent,
    #[error("privacy-ring-member-unknown")]
    RingMemberUnknown,
    #[error("privacy-invalid-mlsag")]
    InvalidMlsag,
    #[error("privacy-commitment-imbalance")]
    CommitmentImbalance,
    #[error("privacy-invalid-range-proof")]
    InvalidRangeProof,

    #[error("fcmp-not-active")]
    FcmpNotActive,
    #[error("fcmp-keyimage-null")]
    FcmpKeyImageNull,
    #[error("fcmp-input-invalid-points")]
    FcmpInvalidPoints,
    #[error("fcmp-proof-empty")]
    FcmpProofEmpty,
    #[error("fcmp-pseudo-output-invalid")]
    FcmpPseudoOutputInvalid,
    #[error("fcmp-duplicate-keyimage")]
    FcmpDuplicateKeyImage,
    #[error("fcmp-keyimage-spent")]
    FcmpKeyImageSpent,
    #[error("fcmp-proof-stale-root")]
    FcmpStaleRoot,
    #[error("fcmp-verification-failed")]
    FcmpVerificationFailed,
    #[error("fcmp-balance-invalid")]
    FcmpBalanceInvalid,
    #[error("fcmp-output-invalid")]
    FcmpOutputInvalid,
    #[error("fcmp-output-mismatch")]
    FcmpOutputMismatch,
}

impl Rejection {
    pub fn is_fcmp(&self) -> bool {
        self.to_string().starts_with("fcmp-")
    }
}

impl From<FcmpInputError> for Rejection {
    fn from(e: FcmpInputError) -> Self {
        match e {
            FcmpInputError::NullKeyImage => Rejection::FcmpKeyImageNull,
            FcmpInputError::InvalidPoints => Rejection::FcmpInvalidPoints,
            FcmpInputError::EmptyProof => Rejection::FcmpProofEmpty,
            FcmpInputError::InvalidPseudoOutput => Rejection::FcmpPseudoOutputInvalid,
            FcmpInputError::DuplicateKeyImage => Rejection::FcmpDuplicateKeyImage,
            FcmpInputError::KeyImageSpent => Rejection::FcmpKeyImageSpent,
            FcmpInputError::StaleRoot => Rejection::FcmpStaleRoot,
            FcmpInputError::VerificationFailed => Rejection::FcmpVerificationFailed,
        }
    }
}

/// Transaction validation result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationResult {
    Valid,
    Invalid(Rejection),
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        matches!(self, ValidationResult::Valid)
    }

    pub fn rejection(&self) -> Option<Rejection> {
        match self {
            ValidationResult::Valid => None,
            ValidationResult::Invalid(r) => Some(*r),
        }
    }
}

impl From<std::result::Result<(), Rejection>> for ValidationResult {
    fn from(result: std::result::Result<(), Rejection>) -> Self {
        match result {
            Ok(()) => ValidationResult::Valid,
            Err(r) => ValidationResult::Invalid(r),
        }
    }
}

/// A prior output as the coins view knows it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedOutput {
    pub public_key: RingPoint,
    pub commitment: Option<RingPoint>,
    pub height: Height,
}

/// Read access to the host ledger's output set
pub trait OutputResolver {
    fn resolve(&self, outpoint: &OutPoint) -> Option<ResolvedOutput>;
}

impl<F> OutputResolver for F
where
    F: Fn(&OutPoint) -> Option<ResolvedOutput>,
{
    fn resolve(&self, outpoint: &OutPoint) -> Option<ResolvedOutput> {
        self(outpoint)
    }
}

/// Everything a contextual check reads
pub struct ValidationContext<'a> {
    pub height: Height,
    pub ring_ledger: &'a dyn SpentKeyImages,
    pub fcmp_ledger: &'a dyn SpentKeyImages,
    pub resolver: &'a dyn OutputResolver,
    pub tree_root: EdPoint,
}

type Check = std::result::Result<(), Rejection>;

fn valid_ring_point(p: &RingPoint) -> bool {
    p.is_valid() && !p.is_identity()
}

fn valid_commitment(c: &Option<Commitment>) -> bool {
    matches!(c, Some(c) if c.is_valid() && !c.is_identity())
}

/// Privacy transaction validator
pub struct TxValidator<'a> {
    params: &'a ConsensusParams,
    gens: &'a PedersenGenerators,
    backend: &'a dyn MembershipBackend,
}

impl<'a> TxValidator<'a> {
    pub fn new(params: &'a ConsensusParams, gens: &'a PedersenGenerators, backend: &'a dyn MembershipBackend) -> Self {
        Self { params, gens, backend }
    }

    /// Checks that need nothing but the transaction and the height.
    pub fn check_transaction(&self, tx: &PrivacyTransaction, height: Height) -> ValidationResult {
        let result = match tx.privacy_type {
            PrivacyType::Fcmp => self.check_fcmp_structure(tx),
            _ => self.check_ring_structure(tx, height),
        };
        if let Err(rejection) = result {
            debug!(kind = tx.privacy_type.name(), height, %rejection, "privacy tx failed structural checks");
        }
        result.into()
    }

    /// Full check against chain state. Storage failures are errors, not
    /// rejections.
    pub fn check_contextual(&self, tx: &PrivacyTransaction, ctx: &ValidationContext<'_>) -> Result<ValidationResult> {
        if let ValidationResult::Invalid(r) = self.check_transaction(tx, ctx.height) {
            return Ok(ValidationResult::Invalid(r));
        }
        let result = match tx.privacy_type {
            PrivacyType::Fcmp => self.check_fcmp_contextual(tx, ctx)?,
            _ => self.check_ring_contextual(tx, ctx)?,
        };
        if let Err(rejection) = result {
            debug!(kind = tx.privacy_type.name(), height = ctx.height, %rejection, "privacy tx rejected");
        }
        Ok(result.into())
    }

    fn check_ring_structure(&self, tx: &PrivacyTransaction, height: Height) -> Check {
        if tx.inputs.is_empty() {
            return Err(Rejection::NoInputs);
        }
        if tx.outputs.is_empty() {
            return Err(Rejection::NoOutputs);
        }
        if !tx.fcmp_inputs.is_empty() || !tx.fcmp_outputs.is_empty() {
            return Err(Rejection::MixedTypes);
        }

        let kind = tx.privacy_type;
        let min_ring = self.params.min_ring_size(height);
        for input in &tx.inputs {
            if kind.uses_rings() {
                if !is_valid_key_image(&input.key_image) {
                    return Err(Rejection::InvalidKeyImage);
                }
                if input.ring.is_empty() {
                    return Err(Rejection::InvalidRing);
                }
                if input.ring.len() < min_ring {
                    return Err(Rejection::RingTooSmall);
                }
                if input.ring.len() > self.params.max_ring_size {
                    return Err(Rejection::RingTooLarge);
                }
                let mut outpoints = HashSet::with_capacity(input.ring.len());
                let mut keys = HashSet::with_capacity(input.ring.len());
                for member in &input.ring {
                    if !valid_ring_point(&member.public_key) {
                        return Err(Rejection::InvalidRingMember);
                    }
                    if matches!(&member.commitment, Some(c) if !valid_ring_point(c)) {
                        return Err(Rejection::InvalidRingMember);
                    }
                    if !outpoints.insert(member.outpoint) || !keys.insert(member.public_key) {
                        return Err(Rejection::DuplicateRingMember);
                    }
                }
            } else if input.ring.len() != 1 {
                return Err(Rejection::InvalidRing);
            }

            if kind.has_confidential_amounts() && !valid_commitment(&input.commitment) {
                return Err(Rejection::InvalidInputCommitment);
            }
        }

        for output in &tx.outputs {
            if matches!(kind, PrivacyType::Stealth | PrivacyType::RingCt) {
                if let Some(stealth) = &output.stealth {
                    if !valid_ring_point(&stealth.one_time_key) || !valid_ring_point(&stealth.ephemeral_key) {
                        return Err(Rejection::InvalidStealthPubkey);
                    }
                }
            }
            if kind.has_confidential_amounts() && !valid_commitment(&output.commitment) {
                return Err(Rejection::InvalidOutputCommitment);
            }
        }

        if kind.uses_rings() {
            let mut seen = HashSet::with_capacity(tx.inputs.len());
            if !tx.inputs.iter().all(|i| seen.insert(i.key_image)) {
                return Err(Rejection::DuplicateKeyImage);
            }
        }

        if kind.has_confidential_amounts() && tx.range_proof.is_none() {
            return Err(Rejection::MissingRangeProof);
        }
        Ok(())
    }

    fn check_fcmp_structure(&self, tx: &PrivacyTransaction) -> Check {
        if tx.fcmp_inputs.is_empty() {
            return Err(Rejection::NoInputs);
        }
        if tx.fcmp_outputs.is_empty() {
            return Err(Rejection::NoOutputs);
        }
        if !tx.inputs.is_empty() || !tx.outputs.is_empty() || tx.mlsag.is_some() {
            return Err(Rejection::MixedTypes);
        }

        let mut seen: HashSet<KeyImage> = HashSet::with_capacity(tx.fcmp_inputs.len());
        for input in &tx.fcmp_inputs {
            check_fcmp_input_structure(input)?;
            if !seen.insert(input.key_image) {
                return Err(Rejection::FcmpDuplicateKeyImage);
            }
        }
        if !tx.fcmp_outputs.iter().all(|t| t.is_valid()) {
            return Err(Rejection::FcmpOutputInvalid);
        }
        Ok(())
    }

    fn check_ring_contextual(&self, tx: &PrivacyTransaction, ctx: &ValidationContext<'_>) -> Result<Check> {
        let kind = tx.privacy_type;
        if kind != PrivacyType::Transparent && !self.params.is_privacy_active(ctx.height) {
            return Ok(Err(Rejection::NotActive));
        }

        if kind.uses_rings() {
            for input in &tx.inputs {
                if ctx.ring_ledger.is_spent(&input.key_image)? {
                    return Ok(Err(Rejection::KeyImageSpent));
                }
            }
            for member in tx.inputs.iter().flat_map(|i| &i.ring) {
                let Some(found) = ctx.resolver.resolve(&member.outpoint) else {
                    return Ok(Err(Rejection::RingMemberUnknown));
                };
                let commitment_mismatch = match (member.commitment, found.commitment) {
                    (Some(claimed), Some(actual)) => claimed != actual,
                    (Some(_), None) => true,
                    (None, _) => false,
                };
                if found.public_key != member.public_key || commitment_mismatch {
                    return Ok(Err(Rejection::RingMemberUnknown));
                }
            }
            if !tx.verify_mlsag() {
                return Ok(Err(Rejection::InvalidMlsag));
            }
        }

        if kind.has_confidential_amounts() {
            if !tx.verify_balance() {
                return Ok(Err(Rejection::CommitmentImbalance));
            }
            if !tx.verify_range_proofs() {
                return Ok(Err(Rejection::InvalidRangeProof));
            }
        }
        Ok(Ok(()))
    }

    fn check_fcmp_contextual(&self, tx: &PrivacyTransaction, ctx: &ValidationContext<'_>) -> Result<Check> {
        if !self.params.is_fcmp_active(ctx.height) {
            return Ok(Err(Rejection::FcmpNotActive));
        }
        let message = tx.signing_hash();
        if let Err(e) = check_fcmp_inputs(
            &tx.fcmp_inputs,
            &ctx.tree_root,
            message.as_bytes(),
            ctx.fcmp_ledger,
            self.backend,
        )? {
            return Ok(Err(e.into()));
        }
        let outputs: Vec<EdPoint> = tx.fcmp_outputs.iter().map(|t| t.c).collect();
        if !verify_fcmp_balance(&tx.fcmp_inputs, &outputs, tx.fee, self.gens) {
            return Ok(Err(Rejection::FcmpBalanceInvalid));
        }
        Ok(Ok(()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fcmp::membership::PlaceholderMembership;
    use crate::ledger::{KeyImageLedger, MemoryStore, SpendDomain};
    use crate::privacy::decoy::MemoryDecoyProvider;
    use crate::privacy::ring::RingMember;
    use crate::privacy::stealth::StealthSecrets;
    use crate::privacy::transaction::RingCtBuilder;
    use crate::crypto::scalar::random_nonzero_scalar;
    use crate::structures::types::Hash256;
    use rand::rngs::OsRng;
    use std::collections::HashMap;

    struct Fixture {
        params: ConsensusParams,
        gens: PedersenGenerators,
        backend: PlaceholderMembership,
        ledger: KeyImageLedger<MemoryStore>,
        outputs: HashMap<OutPoint, ResolvedOutput>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                params: ConsensusParams::regtest(),
                gens: PedersenGenerators::standard().unwrap(),
                backend: PlaceholderMembership::new().unwrap(),
                ledger: KeyImageLedger::new(MemoryStore::new()),
                outputs: HashMap::new(),
            }
        }

        fn validator(&self) -> TxValidator<'_> {
            TxValidator::new(&self.params, &self.gens, &self.backend)
        }

        fn member(&mut self, n: u8) -> (RingMember, curve25519_dalek::scalar::Scalar) {
            let x = random_nonzero_scalar(&mut OsRng);
            let member = RingMember::new(OutPoint::new(Hash256([n; 32]), 0), RingPoint::from_secret(&x));
            self.outputs.insert(
                member.outpoint,
                ResolvedOutput { public_key: member.public_key, commitment: None, height: 1 },
            );
            (member, x)
        }

        fn ring_tx(&mut self, kind: PrivacyType) -> PrivacyTransaction {
            let (real, x) = self.member(1);
            let decoys: Vec<_> = (2..5).map(|n| self.member(n).0).collect();
            let recipient = StealthSecrets::generate(&mut OsRng);
            let mut builder = RingCtBuilder::new(kind).unwrap();
            builder.set_ring_size(4).unwrap();
            builder.add_input_with_decoys(real, x, 1_000, decoys).unwrap();
            builder.add_output(recipient.address(), 990).unwrap();
            builder.set_fee(10);
            builder.build(&MemoryDecoyProvider::new(0), &mut OsRng).unwrap()
        }

        fn contextual(&self, tx: &PrivacyTransaction, height: Height) -> ValidationResult {
            let outputs = self.outputs.clone();
            let resolver = move |o: &OutPoint| outputs.get(o).copied();
            let ctx = ValidationContext {
                height,
                ring_ledger: &self.ledger.domain(SpendDomain::Ring),
                fcmp_ledger: &self.ledger.domain(SpendDomain::Fcmp),
                resolver: &resolver,
                tree_root: EdPoint::identity(),
            };
            self.validator().check_contextual(tx, &ctx).unwrap()
        }
    }

    #[test]
    fn test_ringct_passes_both_passes() {
        let mut f = Fixture::new();
        let tx = f.ring_tx(PrivacyType::RingCt);
        assert!(f.validator().check_transaction(&tx, 10).is_valid());
        assert_eq!(f.contextual(&tx, 10), ValidationResult::Valid);
    }

    #[test]
    fn test_reason_strings() {
        assert_eq!(Rejection::NoInputs.to_string(), "privacy-no-inputs");
        assert_eq!(Rejection::RingMemberUnknown.to_string(), "privacy-ring-member-unknown");
        assert_eq!(Rejection::FcmpBalanceInvalid.to_string(), "fcmp-balance-invalid");
        assert_eq!(Rejection::from(FcmpInputError::StaleRoot).to_string(), "fcmp-proof-stale-root");
        assert!(Rejection::FcmpNotActive.is_fcmp());
        assert!(!Rejection::NotActive.is_fcmp());
    }

    #[test]
    fn test_empty_transactions() {
        let f = Fixture::new();
        let v = f.validator();
        let tx = PrivacyTransaction::new(PrivacyType::Ring);
        assert_eq!(v.check_transaction(&tx, 0).rejection(), Some(Rejection::NoInputs));
        let tx = PrivacyTransaction::new(PrivacyType::Fcmp);
        assert_eq!(v.check_transaction(&tx, 0).rejection(), Some(Rejection::NoInputs));
    }

    #[test]
    fn test_ring_size_bounds() {
        let mut f = Fixture::new();
        let tx = f.ring_tx(PrivacyType::Ring);
        f.params.ring_size_bands[0].min_ring_size = 5;
        assert_eq!(f.validator().check_transaction(&tx, 0).rejection(), Some(Rejection::RingTooSmall));
        f.params.ring_size_bands[0].min_ring_size = 2;
        f.params.max_ring_size = 3;
        assert_eq!(f.validator().check_transaction(&tx, 0).rejection(), Some(Rejection::RingTooLarge));
    }

    #[test]
    fn test_structural_rejections() {
        let mut f = Fixture::new();
        let tx = f.ring_tx(PrivacyType::RingCt);
        let v = f.validator();

        let mut bad = tx.clone();
        bad.inputs[0].key_image = KeyImage::default();
        assert_eq!(v.check_transaction(&bad, 0).rejection(), Some(Rejection::InvalidKeyImage));

        let mut bad = tx.clone();
        bad.inputs[0].ring[1].public_key = RingPoint([0xff; 32]);
        assert_eq!(v.check_transaction(&bad, 0).rejection(), Some(Rejection::InvalidRingMember));

        let mut bad = tx.clone();
        bad.inputs[0].ring[1] = bad.inputs[0].ring[0];
        assert_eq!(v.check_transaction(&bad, 0).rejection(), Some(Rejection::DuplicateRingMember));

        let mut bad = tx.clone();
        bad.inputs[0].commitment = None;
        assert_eq!(v.check_transaction(&bad, 0).rejection(), Some(Rejection::InvalidInputCommitment));

        let mut bad = tx.clone();
        bad.outputs[0].commitment = Some(Commitment(RingPoint([0xff; 32])));
        assert_eq!(v.check_transaction(&bad, 0).rejection(), Some(Rejection::InvalidOutputCommitment));

        let mut bad = tx.clone();
        if let Some(s) = bad.outputs[0].stealth.as_mut() {
            s.one_time_key = RingPoint::identity();
        }
        assert_eq!(v.check_transaction(&bad, 0).rejection(), Some(Rejection::InvalidStealthPubkey));

        let mut bad = tx.clone();
        let first = bad.inputs[0].clone();
        bad.inputs.push(first);
        assert_eq!(v.check_transaction(&bad, 0).rejection(), Some(Rejection::DuplicateKeyImage));

        let mut bad = tx.clone();
        bad.range_proof = None;
        assert_eq!(v.check_transaction(&bad, 0).rejection(), Some(Rejection::MissingRangeProof));

        let mut bad = tx;
        bad.fcmp_outputs.push(crate::fcmp::curve_tree::OutputTuple::new(
            EdPoint::identity(),
            EdPoint::identity(),
            EdPoint::identity(),
        ));
        assert_eq!(v.check_transaction(&bad, 0).rejection(), Some(Rejection::MixedTypes));
    }

    #[test]
    fn test_contextual_rejections() {
        let mut f = Fixture::new();
        let tx = f.ring_tx(PrivacyType::RingCt);

        let mut bad = tx.clone();
        bad.fee += 1;
        assert_eq!(f.contextual(&bad, 10).rejection(), Some(Rejection::InvalidMlsag));

        let mut bad = tx.clone();
        bad.range_proof = Some(crate::privacy::range_proof::RangeProof(vec![0x02, 0x00]));
        assert_eq!(f.contextual(&bad, 10).rejection(), Some(Rejection::InvalidRangeProof));

        f.ledger
            .mark_spent(SpendDomain::Ring, &tx.inputs[0].key_image, Hash256([9; 32]), 3)
            .unwrap();
        assert_eq!(f.contextual(&tx, 10).rejection(), Some(Rejection::KeyImageSpent));
    }

    #[test]
    fn test_unknown_ring_member() {
        let mut f = Fixture::new();
        let tx = f.ring_tx(PrivacyType::Ring);
        let stranger = tx.inputs[0].ring[2].outpoint;
        f.outputs.remove(&stranger);
        assert_eq!(f.contextual(&tx, 10).rejection(), Some(Rejection::RingMemberUnknown));
    }

    #[test]
    fn test_activation_heights() {
        let mut f = Fixture::new();
        f.params.privacy_activation_height = 100;
        f.params.fcmp_activation_height = 100;
        let tx = f.ring_tx(PrivacyType::Ring);
        assert_eq!(f.contextual(&tx, 99).rejection(), Some(Rejection::NotActive));
        assert!(f.contextual(&tx, 100).is_valid());
    }
}
