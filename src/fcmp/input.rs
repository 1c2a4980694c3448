//! FCMP inputs
//!
//! Spending leaf k of the curve tree:
//!
//! 1. Re-randomize its tuple with a fresh r:
//!    O~ = O + r*G, I~ = I, C~ = C + r*H
//! 2. Key image KI = x * Hp(O)
//! 3. Membership proof that the tuple opens to a leaf under the root
//! 4. SA+L signature: R = k*G, c = H(R || I~ || O~ || KI || m),
//!    s = k + c*(x + r), checked as s*G == R + c*O~
//!
//! I~ is never re-randomized: it is what makes two spends of one leaf
//! collide in the key image ledger.

use super::curve_tree::{CurveTree, OutputTuple};
use super::membership::{MembershipBackend, MembershipProof, MembershipWitness};
use super::pedersen::PedersenGenerators;
use super::storage::TreeStorage;
use crate::crypto::ed25519::{basepoint, double_scalar_mul_base, hash_to_point, EdPoint};
use crate::crypto::hash::hash_to_scalar;
use crate::crypto::scalar::{random_nonzero_scalar, scalar_from_canonical};
use crate::ledger::SpentKeyImages;
use crate::privacy::transaction::{PrivacyTransaction, PrivacyType};
use crate::structures::types::{Amount, KeyImage};
use crate::{Error, Result};
use curve25519_dalek::{edwards::EdwardsPoint, scalar::Scalar, traits::Identity};
use rand_core::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;
use tracing::debug;
use zeroize::{Zeroize, ZeroizeOnDrop};

const SAL_DOMAIN: &[u8] = b"FCMP_SAL_v1";

/// Re-randomized view of the output being spent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputTuple {
    pub o_tilde: EdPoint,
    pub i_tilde: EdPoint,
    pub c_tilde: EdPoint,
}

impl InputTuple {
    pub fn is_valid(&self) -> bool {
        [&self.o_tilde, &self.i_tilde, &self.c_tilde]
            .iter()
            .all(|p| p.is_valid() && !p.is_identity())
    }
}

/// Spend authorization + linkability signature
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SalSignature {
    /// Nonce commitment k*G
    pub r: EdPoint,
    pub s: [u8; 32],
}

impl SalSignature {
    fn empty() -> Self {
        Self { r: EdPoint::identity(), s: [0u8; 32] }
    }
}

/// One FCMP input as carried in a transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FcmpInput {
    pub key_image: KeyImage,
    pub tuple: InputTuple,
    pub membership: MembershipProof,
    pub sal: SalSignature,
    /// Commitment to the input amount under a fresh blinding, for balance
    pub pseudo_output: EdPoint,
}

impl FcmpInput {
    fn key_image_point(&self) -> Option<EdwardsPoint> {
        EdPoint(self.key_image.0)
            .decompress_valid()
            .filter(|p| *p != EdwardsPoint::identity())
    }
}

/// Why an FCMP input was refused. Display strings are the stable
/// rejection reasons.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FcmpInputError {
    #[error("fcmp-keyimage-null")]
    NullKeyImage,
    #[error("fcmp-input-invalid-points")]
    InvalidPoints,
    #[error("fcmp-proof-empty")]
    EmptyProof,
    #[error("fcmp-pseudo-output-invalid")]
    InvalidPseudoOutput,
    #[error("fcmp-duplicate-keyimage")]
    DuplicateKeyImage,
    #[error("fcmp-keyimage-spent")]
    KeyImageSpent,
    #[error("fcmp-proof-stale-root")]
    StaleRoot,
    #[error("fcmp-verification-failed")]
    VerificationFailed,
}

/// Secret material for one input, wiped on drop
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SpendSecret {
    secret_key: Scalar,
    blinding: Scalar,
}

impl SpendSecret {
    pub fn new(secret_key: Scalar, blinding: Scalar) -> Self {
        Self { secret_key, blinding }
    }
}

impl std::fmt::Debug for SpendSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SpendSecret(..)")
    }
}

/// O = spend_pub, I = Hp(O), C = amount*H + blinding*G
pub fn generate_output_tuple(
    spend_public: &EdPoint,
    amount: Amount,
    blinding: &Scalar,
    gens: &PedersenGenerators,
) -> Result<OutputTuple> {
    if !spend_public.is_valid() || spend_public.is_identity() {
        return Err(Error::InvalidInput("invalid spend public key".into()));
    }
    let i = hash_to_point(&spend_public.0)?;
    let c = gens.commit(amount, blinding);
    Ok(OutputTuple::new(*spend_public, i.into(), c.into()))
}

/// x * Hp(O)
pub fn fcmp_key_image(secret: &Scalar, output_key: &EdPoint) -> Result<KeyImage> {
    let base = hash_to_point(&output_key.0)?;
    Ok(KeyImage(EdPoint::from_point(&(secret * base)).0))
}

pub fn rerandomize(output: &OutputTuple, r: &Scalar, gens: &PedersenGenerators) -> Result<InputTuple> {
    let o = output
        .o
        .decompress_valid()
        .ok_or_else(|| Error::Crypto("invalid output key".into()))?;
    let c = output
        .c
        .decompress_valid()
        .ok_or_else(|| Error::Crypto("invalid output commitment".into()))?;
    Ok(InputTuple {
        o_tilde: EdPoint::from_point(&(o + r * basepoint())),
        i_tilde: output.i,
        c_tilde: EdPoint::from_point(&(c + r * gens.h())),
    })
}

fn sal_challenge(r: &EdPoint, tuple: &InputTuple, key_image: &KeyImage, message: &[u8]) -> Scalar {
    hash_to_scalar(
        SAL_DOMAIN,
        &[&r.0, &tuple.i_tilde.0, &tuple.o_tilde.0, &key_image.0, message],
    )
}

/// Sign with the discrete log of O~, which is x + r.
pub fn sign_sal<R: RngCore + CryptoRng>(
    secret: &Scalar,
    rerandomizer: &Scalar,
    tuple: &InputTuple,
    key_image: &KeyImage,
    message: &[u8],
    rng: &mut R,
) -> SalSignature {
    let k = random_nonzero_scalar(rng);
    let r = EdPoint::from_point(&(k * basepoint()));
    let c = sal_challenge(&r, tuple, key_image, message);
    let s = k + c * (secret + rerandomizer);
    SalSignature { r, s: s.to_bytes() }
}

pub fn verify_sal(signature: &SalSignature, tuple: &InputTuple, key_image: &KeyImage, message: &[u8]) -> bool {
    let (Some(r), Some(o_tilde)) = (signature.r.decompress_valid(), tuple.o_tilde.decompress_valid()) else {
        return false;
    };
    let Some(s) = scalar_from_canonical(&signature.s) else {
        return false;
    };
    if s == Scalar::ZERO {
        return false;
    }
    let c = sal_challenge(&signature.r, tuple, key_image, message);
    // s*G - c*O~ == R
    double_scalar_mul_base(&(-c), &o_tilde, &s) == r
}

fn check_structure(input: &FcmpInput) -> std::result::Result<(), FcmpInputError> {
    if input.key_image.is_null() || input.key_image_point().is_none() {
        return Err(FcmpInputError::NullKeyImage);
    }
    if !input.tuple.is_valid() {
        return Err(FcmpInputError::InvalidPoints);
    }
    if !input.membership.is_valid() {
        return Err(FcmpInputError::EmptyProof);
    }
    if !input.pseudo_output.is_valid() || input.pseudo_output.is_identity() {
        return Err(FcmpInputError::InvalidPseudoOutput);
    }
    Ok(())
}

/// Context-free checks only: points, key image, non-empty proof.
pub fn check_fcmp_input_structure(input: &FcmpInput) -> std::result::Result<(), FcmpInputError> {
    check_structure(input)
}

/// Full check of one input against the authoritative root.
pub fn check_fcmp_input(
    input: &FcmpInput,
    root: &EdPoint,
    message: &[u8],
    backend: &dyn MembershipBackend,
) -> std::result::Result<(), FcmpInputError> {
    check_structure(input)?;
    if input.membership.tree_root != *root {
        return Err(FcmpInputError::StaleRoot);
    }
    if !backend.verify(&input.tuple, root, &input.membership) {
        return Err(FcmpInputError::VerificationFailed);
    }
    if !verify_sal(&input.sal, &input.tuple, &input.key_image, message) {
        return Err(FcmpInputError::VerificationFailed);
    }
    Ok(())
}

pub fn verify_fcmp_input(
    input: &FcmpInput,
    root: &EdPoint,
    message: &[u8],
    backend: &dyn MembershipBackend,
) -> bool {
    check_fcmp_input(input, root, message, backend).is_ok()
}

/// sum(pseudo outputs) == sum(outputs) + fee*H
pub fn verify_fcmp_balance(inputs: &[FcmpInput], outputs: &[EdPoint], fee: Amount, gens: &PedersenGenerators) -> bool {
    if inputs.is_empty() || outputs.is_empty() {
        return false;
    }
    let mut lhs = EdwardsPoint::identity();
    for input in inputs {
        let Some(p) = input.pseudo_output.decompress_valid() else {
            return false;
        };
        lhs += p;
    }
    let mut rhs = Scalar::from(fee) * gens.h();
    for output in outputs {
        let Some(p) = output.decompress_valid() else {
            return false;
        };
        rhs += p;
    }
    lhs == rhs
}

/// Check every input, plus double-spend status and in-transaction
/// duplicates. Inputs are verified one by one.
pub fn check_fcmp_inputs(
    inputs: &[FcmpInput],
    root: &EdPoint,
    message: &[u8],
    ledger: &dyn SpentKeyImages,
    backend: &dyn MembershipBackend,
) -> Result<std::result::Result<(), FcmpInputError>> {
    let mut seen = HashSet::with_capacity(inputs.len());
    for input in inputs {
        if let Err(e) = check_structure(input) {
            return Ok(Err(e));
        }
        if !seen.insert(input.key_image) {
            return Ok(Err(FcmpInputError::DuplicateKeyImage));
        }
        if ledger.is_spent(&input.key_image)? {
            return Ok(Err(FcmpInputError::KeyImageSpent));
        }
    }
    for input in inputs {
        if let Err(e) = check_fcmp_input(input, root, message, backend) {
            return Ok(Err(e));
        }
    }
    Ok(Ok(()))
}

pub fn batch_verify_fcmp_inputs(
    inputs: &[FcmpInput],
    root: &EdPoint,
    message: &[u8],
    ledger: &dyn SpentKeyImages,
    backend: &dyn MembershipBackend,
) -> Result<bool> {
    if inputs.is_empty() {
        return Ok(false);
    }
    Ok(check_fcmp_inputs(inputs, root, message, ledger, backend)?.is_ok())
}

struct PendingInput {
    leaf: u64,
    output: OutputTuple,
    secret: SpendSecret,
    amount: Amount,
}

struct PendingOutput {
    tuple: OutputTuple,
    amount: Amount,
    blinding: Scalar,
}

/// Input with everything but the signature and membership proof
struct PreparedInput {
    input: FcmpInput,
    rerandomizer: Scalar,
}

impl Drop for PreparedInput {
    fn drop(&mut self) {
        self.rerandomizer.zeroize();
    }
}

/// Assembles FCMP inputs spending leaves of `tree`.
pub struct FcmpTransactionBuilder<'a, T: TreeStorage> {
    tree: &'a CurveTree<T>,
    gens: &'a PedersenGenerators,
    backend: &'a dyn MembershipBackend,
    inputs: Vec<PendingInput>,
    outputs: Vec<PendingOutput>,
    fee: Amount,
    mature_leaves: Option<u64>,
}

impl<'a, T: TreeStorage> FcmpTransactionBuilder<'a, T> {
    pub fn new(tree: &'a CurveTree<T>, gens: &'a PedersenGenerators, backend: &'a dyn MembershipBackend) -> Self {
        Self {
            tree,
            gens,
            backend,
            inputs: Vec::new(),
            outputs: Vec::new(),
            fee: 0,
            mature_leaves: None,
        }
    }

    /// Only leaves below `count` may be spent.
    pub fn with_mature_leaf_count(mut self, count: u64) -> Self {
        self.mature_leaves = Some(count);
        self
    }

    pub fn add_input(
        &mut self,
        leaf: u64,
        output: OutputTuple,
        secret_key: Scalar,
        amount: Amount,
        blinding: Scalar,
    ) -> Result<()> {
        if let Some(mature) = self.mature_leaves {
            if leaf >= mature {
                return Err(Error::Validation(format!("leaf {} is not mature", leaf)));
            }
        }
        if self.inputs.iter().any(|i| i.leaf == leaf) {
            return Err(Error::InvalidInput(format!("leaf {} already added", leaf)));
        }
        if self.tree.output(leaf)? != Some(output) {
            return Err(Error::InvalidInput(format!("leaf {} does not hold this output", leaf)));
        }
        if EdPoint::from_point(&(secret_key * basepoint())) != output.o {
            return Err(Error::InvalidInput("secret key does not open the output key".into()));
        }
        if EdPoint::from_point(&self.gens.commit(amount, &blinding)) != output.c {
            return Err(Error::InvalidInput("amount and blinding do not open the commitment".into()));
        }
        self.inputs.push(PendingInput {
            leaf,
            output,
            secret: SpendSecret::new(secret_key, blinding),
            amount,
        });
        Ok(())
    }

    pub fn add_output(&mut self, tuple: OutputTuple, amount: Amount, blinding: Scalar) -> Result<()> {
        if !tuple.is_valid() {
            return Err(Error::InvalidInput("invalid output tuple".into()));
        }
        if EdPoint::from_point(&self.gens.commit(amount, &blinding)) != tuple.c {
            return Err(Error::InvalidInput("amount and blinding do not open the commitment".into()));
        }
        self.outputs.push(PendingOutput { tuple, amount, blinding });
        Ok(())
    }

    pub fn set_fee(&mut self, fee: Amount) {
        self.fee = fee;
    }

    pub fn input_sum(&self) -> Result<Amount> {
        self.inputs
            .iter()
            .try_fold(0u64, |acc, i| acc.checked_add(i.amount))
            .ok_or_else(|| Error::InvalidInput("input amounts overflow".into()))
    }

    pub fn output_sum(&self) -> Result<Amount> {
        self.outputs
            .iter()
            .try_fold(0u64, |acc, o| acc.checked_add(o.amount))
            .ok_or_else(|| Error::InvalidInput("output amounts overflow".into()))
    }

    /// Inputs exactly cover outputs plus fee
    pub fn verify_balance(&self) -> bool {
        match (self.input_sum(), self.output_sum()) {
            (Ok(inputs), Ok(outputs)) => outputs.checked_add(self.fee) == Some(inputs),
            _ => false,
        }
    }

    fn prepare<R: RngCore + CryptoRng>(&self, rng: &mut R) -> Result<Vec<PreparedInput>> {
        if self.inputs.is_empty() || self.outputs.is_empty() {
            return Err(Error::InvalidInput("FCMP transaction needs inputs and outputs".into()));
        }
        if !self.verify_balance() {
            return Err(Error::InvalidInput(format!(
                "inputs do not balance outputs plus fee {}",
                self.fee
            )));
        }

        // Pseudo-output blindings must sum to the output blindings.
        let output_blinding: Scalar = self.outputs.iter().map(|o| o.blinding).sum();
        let mut pseudo_blindings: Vec<Scalar> = (1..self.inputs.len()).map(|_| random_nonzero_scalar(rng)).collect();
        let last = output_blinding - pseudo_blindings.iter().sum::<Scalar>();
        if last == Scalar::ZERO {
            return Err(Error::Crypto("degenerate pseudo-output blinding".into()));
        }
        pseudo_blindings.push(last);

        let mut prepared = Vec::with_capacity(self.inputs.len());
        for (pending, pseudo_blinding) in self.inputs.iter().zip(&pseudo_blindings) {
            let rerandomizer = random_nonzero_scalar(rng);
            let tuple = rerandomize(&pending.output, &rerandomizer, self.gens)?;
            let key_image = fcmp_key_image(&pending.secret.secret_key, &pending.output.o)?;
            let pseudo_output = EdPoint::from_point(&self.gens.commit(pending.amount, pseudo_blinding));
            prepared.push(PreparedInput {
                input: FcmpInput {
                    key_image,
                    tuple,
                    membership: MembershipProof::new(Vec::new(), EdPoint::identity()),
                    sal: SalSignature::empty(),
                    pseudo_output,
                },
                rerandomizer,
            });
        }
        pseudo_blindings.zeroize();
        Ok(prepared)
    }

    fn sign<R: RngCore + CryptoRng>(
        &self,
        prepared: Vec<PreparedInput>,
        message: &[u8],
        rng: &mut R,
    ) -> Result<Vec<FcmpInput>> {
        let root = self.tree.root()?;
        let mut signed = Vec::with_capacity(prepared.len());
        for (pending, mut item) in self.inputs.iter().zip(prepared) {
            let branch = self.tree.branch(pending.leaf)?;
            let witness = MembershipWitness { output: &pending.output, branch: &branch };
            item.input.membership = self.backend.prove(&item.input.tuple, &root, &witness)?;
            item.input.sal = sign_sal(
                &pending.secret.secret_key,
                &item.rerandomizer,
                &item.input.tuple,
                &item.input.key_image,
                message,
                rng,
            );
            signed.push(item.input.clone());
        }
        debug!(inputs = signed.len(), backend = self.backend.name(), "built FCMP inputs");
        Ok(signed)
    }

    /// Inputs signed over a caller-supplied message.
    pub fn build_inputs<R: RngCore + CryptoRng>(&self, message: &[u8], rng: &mut R) -> Result<Vec<FcmpInput>> {
        let prepared = self.prepare(rng)?;
        self.sign(prepared, message, rng)
    }

    /// A complete FCMP transaction signed over its own signing hash.
    pub fn build_transaction<R: RngCore + CryptoRng>(&self, lock_time: u32, rng: &mut R) -> Result<PrivacyTransaction> {
        let prepared = self.prepare(rng)?;
        let mut tx = PrivacyTransaction::new(PrivacyType::Fcmp);
        tx.fcmp_inputs = prepared.iter().map(|p| p.input.clone()).collect();
        tx.fcmp_outputs = self.outputs.iter().map(|o| o.tuple).collect();
        tx.fee = self.fee;
        tx.lock_time = lock_time;

        let message = tx.signing_hash();
        tx.fcmp_inputs = self.sign(prepared, message.as_bytes(), rng)?;
        Ok(tx)
    }
}
