//! Privacy Transactions
//!
//! The payload a privacy transaction carries next to its container:
//! rings and key images for ring spends, commitments and a range proof for
//! confidential amounts, FCMP inputs and output tuples for full-chain
//! spends. `signing_hash` is the message every signature in it commits to.

use super::decoy::{build_ring, select_decoys, DecoyProvider, DecoySelectionParams};
use super::mlsag::{create_mlsag, verify_mlsag, MlsagSignature};
use super::pedersen::{
    balancing_blinding_factor, commit_fee, create_commitment, decrypt_amount, encrypt_amount,
    verify_commitment_balance, Commitment,
};
use super::range_proof::{
    create_aggregated_range_proof, verify_aggregated_range_proof, verify_range_proof, RangeProof,
    VERSION_AGGREGATED, VERSION_SINGLE,
};
use super::ring::{check_ring_size, generate_key_image, ring_keys, RingMember};
use super::stealth::{generate_destination, recipient_shared_secret, sender_shared_secret, StealthAddress, StealthOutput};
use crate::crypto::hash::{hash_to_scalar, sha256d};
use crate::crypto::ristretto::RingPoint;
use crate::crypto::scalar::{random_nonzero_scalar, SecretScalar};
use crate::fcmp::curve_tree::OutputTuple;
use crate::fcmp::input::FcmpInput;
use crate::ledger::SpendDomain;
use crate::structures::types::{Amount, Hash256, KeyImage};
use crate::{Error, Result};
use curve25519_dalek::scalar::Scalar;
use rand_core::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use tracing::debug;

pub const TX_VERSION: u32 = 2;
pub const DEFAULT_RING_SIZE: usize = 11;

const SIGNING_DOMAIN: &[u8] = b"PRIV-tx-signing-v1";
const OUTPUT_BLINDING_DOMAIN: &[u8] = b"PRIV-ct-OutputBlinding-v1";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum PrivacyType {
    Transparent = 0,
    Stealth = 1,
    Ring = 2,
    Confidential = 3,
    RingCt = 4,
    Fcmp = 5,
}

impl PrivacyType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Transparent),
            1 => Some(Self::Stealth),
            2 => Some(Self::Ring),
            3 => Some(Self::Confidential),
            4 => Some(Self::RingCt),
            5 => Some(Self::Fcmp),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Inputs are rings signed with MLSAG
    pub fn uses_rings(self) -> bool {
        matches!(self, Self::Ring | Self::RingCt)
    }

    /// Outputs carry commitments instead of plain values
    pub fn has_confidential_amounts(self) -> bool {
        matches!(self, Self::Confidential | Self::RingCt)
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Transparent => "transparent",
            Self::Stealth => "stealth",
            Self::Ring => "ring",
            Self::Confidential => "confidential",
            Self::RingCt => "ringct",
            Self::Fcmp => "fcmp",
        }
    }
}

/// A ring input. For confidential types `commitment` is the pseudo-output
/// commitment to the spent amount.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrivacyInput {
    pub ring: Vec<RingMember>,
    pub key_image: KeyImage,
    pub commitment: Option<Commitment>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrivacyOutput {
    pub stealth: Option<StealthOutput>,
    pub commitment: Option<Commitment>,
    pub encrypted_amount: Option<[u8; 8]>,
    pub script: Vec<u8>,
    /// Plain value; zero when the amount is confidential
    pub value: Amount,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrivacyTransaction {
    pub version: u32,
    pub privacy_type: PrivacyType,
    pub inputs: Vec<PrivacyInput>,
    pub outputs: Vec<PrivacyOutput>,
    pub mlsag: Option<MlsagSignature>,
    pub fcmp_inputs: Vec<FcmpInput>,
    pub fcmp_outputs: Vec<OutputTuple>,
    pub range_proof: Option<RangeProof>,
    pub fee: Amount,
    pub lock_time: u32,
}

impl PrivacyTransaction {
    pub fn new(privacy_type: PrivacyType) -> Self {
        Self {
            version: TX_VERSION,
            privacy_type,
            inputs: Vec::new(),
            outputs: Vec::new(),
            mlsag: None,
            fcmp_inputs: Vec::new(),
            fcmp_outputs: Vec::new(),
            range_proof: None,
            fee: 0,
            lock_time: 0,
        }
    }

    /// Hash of everything except the signatures and proofs.
    pub fn signing_hash(&self) -> Hash256 {
        let mut buf = Vec::with_capacity(256);
        buf.extend_from_slice(SIGNING_DOMAIN);
        buf.extend_from_slice(&self.version.to_le_bytes());
        buf.push(self.privacy_type.as_u8());

        buf.extend_from_slice(&(self.inputs.len() as u32).to_le_bytes());
        for input in &self.inputs {
            buf.extend_from_slice(&input.key_image.0);
            buf.extend_from_slice(&(input.ring.len() as u32).to_le_bytes());
            for member in &input.ring {
                buf.extend_from_slice(&member.outpoint.to_bytes());
                buf.extend_from_slice(&member.public_key.0);
            }
            match &input.commitment {
                Some(c) => {
                    buf.push(1);
                    buf.extend_from_slice(c.as_bytes());
                }
                None => buf.push(0),
            }
        }

        buf.extend_from_slice(&(self.fcmp_inputs.len() as u32).to_le_bytes());
        for input in &self.fcmp_inputs {
            buf.extend_from_slice(&input.key_image.0);
            buf.extend_from_slice(&input.tuple.o_tilde.0);
            buf.extend_from_slice(&input.tuple.i_tilde.0);
            buf.extend_from_slice(&input.tuple.c_tilde.0);
            buf.extend_from_slice(&input.pseudo_output.0);
        }

        buf.extend_from_slice(&(self.outputs.len() as u32).to_le_bytes());
        for output in &self.outputs {
            match &output.stealth {
                Some(s) => {
                    buf.push(1);
                    buf.extend_from_slice(&s.one_time_key.0);
                    buf.extend_from_slice(&s.ephemeral_key.0);
                    buf.push(s.view_tag);
                    buf.extend_from_slice(&s.output_index.to_le_bytes());
                }
                None => buf.push(0),
            }
            match &output.commitment {
                Some(c) => {
                    buf.push(1);
                    buf.extend_from_slice(c.as_bytes());
                }
                None => buf.push(0),
            }
            if let Some(enc) = &output.encrypted_amount {
                buf.extend_from_slice(enc);
            }
            buf.extend_from_slice(&(output.script.len() as u32).to_le_bytes());
            buf.extend_from_slice(&output.script);
            buf.extend_from_slice(&output.value.to_le_bytes());
        }

        buf.extend_from_slice(&(self.fcmp_outputs.len() as u32).to_le_bytes());
        for tuple in &self.fcmp_outputs {
            buf.extend_from_slice(&tuple.to_bytes());
        }

        buf.extend_from_slice(&self.fee.to_le_bytes());
        buf.extend_from_slice(&self.lock_time.to_le_bytes());
        Hash256(sha256d(&buf))
    }

    /// Every key image this transaction consumes, tagged with its domain
    pub fn key_images(&self) -> Vec<(SpendDomain, KeyImage)> {
        let mut images = Vec::with_capacity(self.inputs.len() + self.fcmp_inputs.len());
        if self.privacy_type.uses_rings() {
            images.extend(self.inputs.iter().map(|i| (SpendDomain::Ring, i.key_image)));
        }
        images.extend(self.fcmp_inputs.iter().map(|i| (SpendDomain::Fcmp, i.key_image)));
        images
    }

    /// Output commitments, or `None` if any output lacks one
    pub fn output_commitments(&self) -> Option<Vec<Commitment>> {
        self.outputs.iter().map(|o| o.commitment).collect()
    }

    pub fn input_commitments(&self) -> Option<Vec<Commitment>> {
        self.inputs.iter().map(|i| i.commitment).collect()
    }

    pub fn rings(&self) -> Vec<Vec<RingPoint>> {
        self.inputs.iter().map(|i| ring_keys(&i.ring)).collect()
    }

    /// MLSAG over the signing hash, with key images matching the inputs
    pub fn verify_mlsag(&self) -> bool {
        let Some(sig) = &self.mlsag else {
            return false;
        };
        if sig.key_images.len() != self.inputs.len()
            || sig.key_images.iter().zip(&self.inputs).any(|(ki, input)| *ki != input.key_image)
        {
            return false;
        }
        verify_mlsag(self.signing_hash().as_bytes(), &self.rings(), sig)
    }

    /// sum(input commitments) == sum(output commitments) + fee*H
    pub fn verify_balance(&self) -> bool {
        let (Some(inputs), Some(outputs)) = (self.input_commitments(), self.output_commitments()) else {
            return false;
        };
        verify_commitment_balance(&inputs, &outputs, Some(&commit_fee(self.fee)))
    }

    pub fn verify_range_proofs(&self) -> bool {
        let (Some(proof), Some(commitments)) = (&self.range_proof, self.output_commitments()) else {
            return false;
        };
        match proof.version() {
            Some(VERSION_AGGREGATED) => verify_aggregated_range_proof(&commitments, proof),
            Some(VERSION_SINGLE) if commitments.len() == 1 => verify_range_proof(&commitments[0], proof),
            _ => false,
        }
    }
}

/// Blinding factor of a stealth output, derivable by sender and recipient
pub fn output_blinding(shared_secret: &[u8; 32], output_index: u32) -> Scalar {
    hash_to_scalar(OUTPUT_BLINDING_DOMAIN, &[shared_secret, &output_index.to_le_bytes()])
}

/// Recover (amount, blinding) of a confidential stealth output addressed to
/// us. Fails closed if the opening does not match the commitment.
pub fn recover_output(output: &PrivacyOutput, scan_secret: &Scalar) -> Option<(Amount, Scalar)> {
    let stealth = output.stealth.as_ref()?;
    let commitment = output.commitment.as_ref()?;
    let encrypted = output.encrypted_amount.as_ref()?;
    let shared = recipient_shared_secret(stealth, scan_secret)?;
    let amount = decrypt_amount(encrypted, &shared).ok()?;
    let blinding = output_blinding(&shared, stealth.output_index);
    commitment.verify_opening(amount, &blinding).then_some((amount, blinding))
}

struct PendingInput {
    member: RingMember,
    secret: SecretScalar,
    amount: Amount,
    decoys: Option<Vec<RingMember>>,
}

enum OutputTarget {
    Stealth(StealthAddress),
    Script(Vec<u8>),
}

struct PendingOutput {
    target: OutputTarget,
    amount: Amount,
}

/// Builds stealth, ring, confidential and RingCT transactions.
pub struct RingCtBuilder {
    privacy_type: PrivacyType,
    inputs: Vec<PendingInput>,
    outputs: Vec<PendingOutput>,
    fee: Amount,
    ring_size: usize,
    lock_time: u32,
    decoy_params: DecoySelectionParams,
}

impl RingCtBuilder {
    pub fn new(privacy_type: PrivacyType) -> Result<Self> {
        if matches!(privacy_type, PrivacyType::Transparent | PrivacyType::Fcmp) {
            return Err(Error::InvalidInput(format!(
                "{} transactions are not built here",
                privacy_type.name()
            )));
        }
        Ok(Self {
            privacy_type,
            inputs: Vec::new(),
            outputs: Vec::new(),
            fee: 0,
            ring_size: DEFAULT_RING_SIZE,
            lock_time: 0,
            decoy_params: DecoySelectionParams::default(),
        })
    }

    /// Spend `member`; decoys are drawn from the provider at build time.
    pub fn add_input(&mut self, member: RingMember, secret: Scalar, amount: Amount) -> Result<()> {
        self.push_input(member, secret, amount, None)
    }

    /// Spend `member` hiding among caller-chosen decoys.
    pub fn add_input_with_decoys(
        &mut self,
        member: RingMember,
        secret: Scalar,
        amount: Amount,
        decoys: Vec<RingMember>,
    ) -> Result<()> {
        if decoys.iter().any(|d| d.outpoint == member.outpoint) {
            return Err(Error::InvalidInput("real output listed among decoys".into()));
        }
        check_ring_size(decoys.len() + 1)?;
        self.push_input(member, secret, amount, Some(decoys))
    }

    fn push_input(
        &mut self,
        member: RingMember,
        secret: Scalar,
        amount: Amount,
        decoys: Option<Vec<RingMember>>,
    ) -> Result<()> {
        if secret == Scalar::ZERO || RingPoint::from_secret(&secret) != member.public_key {
            return Err(Error::InvalidInput("secret key does not match the spent output".into()));
        }
        if self.inputs.iter().any(|i| i.member.outpoint == member.outpoint) {
            return Err(Error::InvalidInput(format!("{} already added", member.outpoint)));
        }
        self.inputs.push(PendingInput { member, secret: SecretScalar::new(secret), amount, decoys });
        Ok(())
    }

    pub fn add_output(&mut self, address: StealthAddress, amount: Amount) -> Result<()> {
        if !address.is_valid() {
            return Err(Error::InvalidInput("invalid stealth address".into()));
        }
        self.outputs.push(PendingOutput { target: OutputTarget::Stealth(address), amount });
        Ok(())
    }

    pub fn add_script_output(&mut self, script: Vec<u8>, amount: Amount) {
        self.outputs.push(PendingOutput { target: OutputTarget::Script(script), amount });
    }

    pub fn set_fee(&mut self, fee: Amount) {
        self.fee = fee;
    }

    pub fn set_ring_size(&mut self, ring_size: usize) -> Result<()> {
        check_ring_size(ring_size)?;
        self.ring_size = ring_size;
        Ok(())
    }

    pub fn set_lock_time(&mut self, lock_time: u32) {
        self.lock_time = lock_time;
    }

    pub fn set_decoy_params(&mut self, params: DecoySelectionParams) {
        self.decoy_params = params;
    }

    fn check_funds(&self) -> Result<()> {
        let overflow = || Error::InvalidInput("amount overflow".into());
        let total_in = self
            .inputs
            .iter()
            .try_fold(0u64, |acc, i| acc.checked_add(i.amount))
            .ok_or_else(overflow)?;
        let total_out = self
            .outputs
            .iter()
            .try_fold(self.fee, |acc, o| acc.checked_add(o.amount))
            .ok_or_else(overflow)?;

        if total_in < total_out {
            return Err(Error::InvalidInput(format!(
                "insufficient funds: {} in, {} out including fee",
                total_in, total_out
            )));
        }
        if self.privacy_type.has_confidential_amounts() && total_in != total_out {
            return Err(Error::InvalidInput(format!(
                "confidential inputs must exactly cover outputs and fee ({} != {}); add a change output",
                total_in, total_out
            )));
        }
        Ok(())
    }

    /// Rings sharing one real column, and that column
    fn assemble_rings<P, R>(&self, provider: &P, rng: &mut R) -> Result<(Vec<Vec<RingMember>>, usize)>
    where
        P: DecoyProvider + ?Sized,
        R: RngCore + CryptoRng,
    {
        let mut rings = Vec::with_capacity(self.inputs.len());
        let mut real_index = None;
        for input in &self.inputs {
            let decoys = match &input.decoys {
                Some(decoys) => decoys.clone(),
                None => select_decoys(
                    provider,
                    &input.member.outpoint,
                    self.ring_size,
                    input.amount,
                    &self.decoy_params,
                    rng,
                )?,
            };
            let ring = match real_index {
                None => {
                    let (ring, index) = build_ring(input.member, decoys, rng)?;
                    real_index = Some(index);
                    ring
                }
                Some(index) => {
                    if decoys.len() + 1 != rings.first().map_or(0, |r: &Vec<RingMember>| r.len()) {
                        return Err(Error::InvalidInput("all rings must have the same size".into()));
                    }
                    let mut ring = decoys;
                    ring.insert(index, input.member);
                    ring
                }
            };
            rings.push(ring);
        }
        let real_index = real_index.ok_or_else(|| Error::InvalidInput("no inputs".into()))?;
        Ok((rings, real_index))
    }

    pub fn build<P, R>(&self, provider: &P, rng: &mut R) -> Result<PrivacyTransaction>
    where
        P: DecoyProvider + ?Sized,
        R: RngCore + CryptoRng,
    {
        if self.inputs.is_empty() {
            return Err(Error::InvalidInput("transaction has no inputs".into()));
        }
        if self.outputs.is_empty() {
            return Err(Error::InvalidInput("transaction has no outputs".into()));
        }
        self.check_funds()?;

        let confidential = self.privacy_type.has_confidential_amounts();
        let mut tx = PrivacyTransaction::new(self.privacy_type);
        tx.fee = self.fee;
        tx.lock_time = self.lock_time;

        let mut output_blinds = Vec::with_capacity(self.outputs.len());
        let mut commitments = Vec::with_capacity(self.outputs.len());
        for (index, pending) in self.outputs.iter().enumerate() {
            let index = u32::try_from(index).map_err(|_| Error::InvalidInput("too many outputs".into()))?;
            let mut output = PrivacyOutput {
                stealth: None,
                commitment: None,
                encrypted_amount: None,
                script: Vec::new(),
                value: if confidential { 0 } else { pending.amount },
            };
            let blinding = match &pending.target {
                OutputTarget::Stealth(address) => {
                    let (ephemeral, stealth) = generate_destination(address, index, rng)
                        .ok_or_else(|| Error::Crypto("could not derive stealth destination".into()))?;
                    let shared = sender_shared_secret(address, &ephemeral)
                        .ok_or_else(|| Error::Crypto("invalid scan key".into()))?;
                    if confidential {
                        output.encrypted_amount = Some(encrypt_amount(pending.amount, &shared)?);
                    }
                    output.stealth = Some(stealth);
                    output_blinding(&shared, index)
                }
                OutputTarget::Script(script) => {
                    output.script = script.clone();
                    random_nonzero_scalar(rng)
                }
            };
            if confidential {
                let commitment = create_commitment(pending.amount, &blinding)?;
                output.commitment = Some(commitment);
                commitments.push(commitment);
                output_blinds.push(blinding);
            }
            tx.outputs.push(output);
        }

        // Pseudo-outputs take fresh blindings; the last one balances.
        let mut pseudo_blinds = Vec::with_capacity(self.inputs.len());
        if confidential {
            for _ in 1..self.inputs.len() {
                pseudo_blinds.push(random_nonzero_scalar(rng));
            }
            pseudo_blinds.push(balancing_blinding_factor(&output_blinds, &pseudo_blinds)?);
            let amounts: Vec<Amount> = self.outputs.iter().map(|o| o.amount).collect();
            tx.range_proof = Some(create_aggregated_range_proof(&amounts, &output_blinds, &commitments, rng)?);
        }

        let rings = if self.privacy_type.uses_rings() {
            let (rings, real_index) = self.assemble_rings(provider, rng)?;
            Some((rings, real_index))
        } else {
            None
        };

        for (k, input) in self.inputs.iter().enumerate() {
            let ring = match &rings {
                Some((rings, _)) => rings[k].clone(),
                None => vec![input.member],
            };
            let key_image = if self.privacy_type.uses_rings() {
                generate_key_image(input.secret.expose(), &input.member.public_key)
            } else {
                KeyImage::default()
            };
            let commitment = if confidential {
                Some(create_commitment(input.amount, &pseudo_blinds[k])?)
            } else {
                None
            };
            tx.inputs.push(PrivacyInput { ring, key_image, commitment });
        }

        if let Some((rings, real_index)) = &rings {
            let keys: Vec<Vec<RingPoint>> = rings.iter().map(|r| ring_keys(r)).collect();
            let secrets: Vec<Scalar> = self.inputs.iter().map(|i| *i.secret.expose()).collect();
            let message = tx.signing_hash();
            tx.mlsag = Some(create_mlsag(
                message.as_bytes(),
                &keys,
                &vec![*real_index; rings.len()],
                &secrets,
                rng,
            )?);
        }

        debug!(
            kind = self.privacy_type.name(),
            inputs = tx.inputs.len(),
            outputs = tx.outputs.len(),
            fee = self.fee,
            "built privacy transaction"
        );
        Ok(tx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::privacy::decoy::{DecoyCandidate, MemoryDecoyProvider};
    use crate::privacy::stealth::{derive_spending_key, StealthSecrets};
    use crate::structures::types::OutPoint;
    use rand::rngs::OsRng;
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    fn outpoint(n: u8) -> OutPoint {
        OutPoint::new(Hash256([n; 32]), 0)
    }

    fn owned(n: u8) -> (RingMember, Scalar) {
        let x = random_nonzero_scalar(&mut OsRng);
        (RingMember::new(outpoint(n), RingPoint::from_secret(&x)), x)
    }

    fn decoys(start: u8, count: u8) -> Vec<RingMember> {
        (start..start + count).map(|n| owned(n).0).collect()
    }

    fn empty_provider() -> MemoryDecoyProvider {
        MemoryDecoyProvider::new(0)
    }

    #[test]
    fn test_privacy_type_codes() {
        for code in 0..=5u8 {
            assert_eq!(PrivacyType::from_u8(code).unwrap().as_u8(), code);
        }
        assert!(PrivacyType::from_u8(6).is_none());
        assert!(PrivacyType::RingCt.uses_rings());
        assert!(!PrivacyType::Confidential.uses_rings());
        assert!(PrivacyType::Confidential.has_confidential_amounts());
        assert!(RingCtBuilder::new(PrivacyType::Fcmp).is_err());
    }

    #[test]
    fn test_ringct_build_and_verify() {
        let recipient = StealthSecrets::generate(&mut OsRng);
        let change = StealthSecrets::generate(&mut OsRng);
        let (m1, x1) = owned(1);
        let (m2, x2) = owned(2);

        let mut builder = RingCtBuilder::new(PrivacyType::RingCt).unwrap();
        builder.add_input_with_decoys(m1, x1, 700, decoys(10, 4)).unwrap();
        builder.add_input_with_decoys(m2, x2, 300, decoys(20, 4)).unwrap();
        builder.add_output(recipient.address(), 850).unwrap();
        builder.add_output(change.address(), 140).unwrap();
        builder.set_fee(10);

        let tx = builder.build(&empty_provider(), &mut OsRng).unwrap();
        assert_eq!(tx.inputs.len(), 2);
        assert!(tx.inputs.iter().all(|i| i.ring.len() == 5));
        assert!(tx.outputs.iter().all(|o| o.value == 0));
        assert!(tx.verify_mlsag());
        assert!(tx.verify_balance());
        assert!(tx.verify_range_proofs());
        assert_eq!(tx.key_images().len(), 2);
        assert_eq!(tx.inputs[0].key_image, generate_key_image(&x1, &m1.public_key));

        // Both rings hide the real member in the same column.
        let col = tx.inputs[0].ring.iter().position(|m| *m == m1).unwrap();
        assert_eq!(tx.inputs[1].ring[col], m2);
    }

    #[test]
    fn test_recipient_recovers_output() {
        let recipient = StealthSecrets::generate(&mut OsRng);
        let (m1, x1) = owned(1);
        let mut builder = RingCtBuilder::new(PrivacyType::RingCt).unwrap();
        builder.add_input_with_decoys(m1, x1, 1000, decoys(10, 2)).unwrap();
        builder.add_output(recipient.address(), 995).unwrap();
        builder.set_fee(5);
        let tx = builder.build(&empty_provider(), &mut OsRng).unwrap();

        let output = &tx.outputs[0];
        let (amount, _) = recover_output(output, &recipient.scan_secret).unwrap();
        assert_eq!(amount, 995);
        let stealth = output.stealth.unwrap();
        let x = derive_spending_key(&stealth, &recipient.scan_secret, &recipient.spend_secret).unwrap();
        assert_eq!(RingPoint::from_secret(&x), stealth.one_time_key);

        let stranger = StealthSecrets::generate(&mut OsRng);
        assert!(recover_output(output, &stranger.scan_secret).is_none());
    }

    #[test]
    fn test_tampering_breaks_signature() {
        let recipient = StealthSecrets::generate(&mut OsRng);
        let (m1, x1) = owned(1);
        let mut builder = RingCtBuilder::new(PrivacyType::RingCt).unwrap();
        builder.add_input_with_decoys(m1, x1, 100, decoys(10, 3)).unwrap();
        builder.add_output(recipient.address(), 99).unwrap();
        builder.set_fee(1);
        let tx = builder.build(&empty_provider(), &mut OsRng).unwrap();

        let mut higher_fee = tx.clone();
        higher_fee.fee = 2;
        assert_ne!(higher_fee.signing_hash(), tx.signing_hash());
        assert!(!higher_fee.verify_mlsag());
        assert!(!higher_fee.verify_balance());

        let mut no_proof = tx.clone();
        no_proof.range_proof = None;
        assert!(!no_proof.verify_range_proofs());

        let mut wrong_image = tx;
        wrong_image.inputs[0].key_image = generate_key_image(&x1, &decoys(40, 1)[0].public_key);
        assert!(!wrong_image.verify_mlsag());
    }

    #[test]
    fn test_funds_checks() {
        let recipient = StealthSecrets::generate(&mut OsRng);
        let (m1, x1) = owned(1);

        let mut short = RingCtBuilder::new(PrivacyType::RingCt).unwrap();
        short.add_input_with_decoys(m1, x1, 100, decoys(10, 2)).unwrap();
        short.add_output(recipient.address(), 100).unwrap();
        short.set_fee(1);
        assert!(short.build(&empty_provider(), &mut OsRng).is_err());

        let mut surplus = RingCtBuilder::new(PrivacyType::RingCt).unwrap();
        surplus.add_input_with_decoys(m1, x1, 100, decoys(10, 2)).unwrap();
        surplus.add_output(recipient.address(), 50).unwrap();
        assert!(surplus.build(&empty_provider(), &mut OsRng).is_err());

        // Transparent amounts may leave change implicit.
        let mut ring = RingCtBuilder::new(PrivacyType::Ring).unwrap();
        ring.add_input_with_decoys(m1, x1, 100, decoys(10, 2)).unwrap();
        ring.add_output(recipient.address(), 50).unwrap();
        let tx = ring.build(&empty_provider(), &mut OsRng).unwrap();
        assert_eq!(tx.outputs[0].value, 50);
        assert!(tx.verify_mlsag());
        assert!(tx.range_proof.is_none());
    }

    #[test]
    fn test_input_refusals() {
        let (m1, x1) = owned(1);
        let (_, other) = owned(2);
        let mut builder = RingCtBuilder::new(PrivacyType::Ring).unwrap();
        assert!(builder.add_input(m1, other, 10).is_err());
        assert!(builder.add_input_with_decoys(m1, x1, 10, vec![m1]).is_err());
        assert!(builder.add_input_with_decoys(m1, x1, 10, Vec::new()).is_err());
        builder.add_input(m1, x1, 10).unwrap();
        assert!(builder.add_input(m1, x1, 10).is_err());
        assert!(builder.set_ring_size(1).is_err());
    }

    #[test]
    fn test_mismatched_ring_sizes_rejected() {
        let recipient = StealthSecrets::generate(&mut OsRng);
        let (m1, x1) = owned(1);
        let (m2, x2) = owned(2);
        let mut builder = RingCtBuilder::new(PrivacyType::Ring).unwrap();
        builder.add_input_with_decoys(m1, x1, 10, decoys(10, 2)).unwrap();
        builder.add_input_with_decoys(m2, x2, 10, decoys(20, 3)).unwrap();
        builder.add_output(recipient.address(), 20).unwrap();
        assert!(builder.build(&empty_provider(), &mut OsRng).is_err());
    }

    #[test]
    fn test_build_with_provider_decoys() {
        let mut provider = MemoryDecoyProvider::new(1000);
        for n in 0..200u32 {
            let (member, _) = owned((n % 250) as u8);
            provider.add_output(DecoyCandidate {
                outpoint: OutPoint::new(Hash256::from_bytes(crate::crypto::hash::sha256(&n.to_le_bytes())), 0),
                public_key: member.public_key,
                amount: 100,
                height: u64::from(n) * 4,
                is_coinbase: false,
            });
        }
        let recipient = StealthSecrets::generate(&mut OsRng);
        let (m1, x1) = owned(255);
        let mut builder = RingCtBuilder::new(PrivacyType::RingCt).unwrap();
        builder.set_ring_size(7).unwrap();
        builder.add_input(m1, x1, 100).unwrap();
        builder.add_output(recipient.address(), 100).unwrap();

        let mut rng = ChaCha20Rng::seed_from_u64(7);
        let tx = builder.build(&provider, &mut rng).unwrap();
        assert_eq!(tx.inputs[0].ring.len(), 7);
        assert!(tx.inputs[0].ring.contains(&m1));
        assert!(tx.verify_mlsag());
        assert!(tx.verify_balance());
    }

    #[test]
    fn test_stealth_only_transaction() {
        let recipient = StealthSecrets::generate(&mut OsRng);
        let (m1, x1) = owned(1);
        let mut builder = RingCtBuilder::new(PrivacyType::Stealth).unwrap();
        builder.add_input(m1, x1, 40).unwrap();
        builder.add_output(recipient.address(), 30).unwrap();
        builder.add_script_output(vec![0x51], 5);
        let tx = builder.build(&empty_provider(), &mut OsRng).unwrap();

        assert!(tx.mlsag.is_none());
        assert!(tx.key_images().is_empty());
        assert_eq!(tx.inputs[0].ring, vec![m1]);
        assert_eq!(tx.outputs[1].script, vec![0x51]);
        assert!(tx.outputs[0].stealth.is_some());
    }
}
