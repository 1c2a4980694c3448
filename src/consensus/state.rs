//! Privacy Consensus State
//!
//! One object owns everything block processing touches: the parameters,
//! the key image ledger, the curve tree, the membership backend and the
//! generators. The host ledger calls it at three points:
//!
//! - mempool / block acceptance: `check_transaction*`
//! - block connection: `connect_block`
//! - reorg: `disconnect_block`, tip first
//!
//! Connecting a block writes its key images in one ledger batch and its
//! FCMP outputs plus the block record in one tree batch. A failed tree
//! write erases the ledger batch again.

use super::params::ConsensusParams;
use super::validator::{OutputResolver, Rejection, TxValidator, ValidationContext, ValidationResult};
use super::wire::{extract_fcmp_outputs, extract_privacy_tx, CarrierBlock, CarrierTx};
use crate::crypto::ed25519::EdPoint;
use crate::fcmp::curve_tree::{CurveTree, OutputTuple};
use crate::fcmp::input::FcmpTransactionBuilder;
use crate::fcmp::membership::{MembershipBackend, PlaceholderMembership};
use crate::fcmp::pedersen::PedersenGenerators;
use crate::fcmp::storage::{MemoryTreeStorage, SledTreeStorage, TreeStorage};
use crate::ledger::{KeyImageLedger, KeyImageStore, MemoryStore, SledStore, Spend, SpendDomain, SpendRecord};
use crate::privacy::transaction::{PrivacyTransaction, PrivacyType};
use crate::structures::types::{Hash256, Height, KeyImage};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{error, info, warn};

/// What connecting or disconnecting a block changed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockSummary {
    pub height: Height,
    pub privacy_txs: usize,
    pub key_images: usize,
    pub outputs: u64,
    pub tree_size: u64,
    pub tree_root: EdPoint,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrivacyStats {
    pub network: String,
    pub ring_key_images: u64,
    pub fcmp_key_images: u64,
    pub tree_outputs: u64,
    pub tree_depth: usize,
    pub tree_root: EdPoint,
    pub tip_height: Option<Height>,
    pub membership_backend: String,
}

/// Privacy payload and FCMP outputs of one carrier transaction
struct BlockEntry {
    txid: Hash256,
    privacy: Option<PrivacyTransaction>,
    fcmp_outputs: Vec<OutputTuple>,
}

pub struct PrivacyState<S: KeyImageStore, T: TreeStorage> {
    params: ConsensusParams,
    ledger: KeyImageLedger<S>,
    tree: RwLock<CurveTree<T>>,
    backend: Box<dyn MembershipBackend>,
    gens: PedersenGenerators,
}

impl PrivacyState<MemoryStore, MemoryTreeStorage> {
    pub fn in_memory(params: ConsensusParams) -> Result<Self> {
        Self::new(params, MemoryStore::new(), MemoryTreeStorage::new())
    }
}

impl PrivacyState<SledStore, SledTreeStorage> {
    /// Ledger and tree share one sled database at `path`.
    pub fn open_sled<P: AsRef<Path>>(params: ConsensusParams, path: P) -> Result<Self> {
        let db = sled::open(path.as_ref()).map_err(|e| Error::Database(e.to_string()))?;
        let store = SledStore::from_db(db.clone())?;
        let tree = SledTreeStorage::from_db(db)?;
        Self::new(params, store, tree)
    }
}

impl<S: KeyImageStore, T: TreeStorage> PrivacyState<S, T> {
    pub fn new(params: ConsensusParams, store: S, tree_storage: T) -> Result<Self> {
        params.validate()?;
        let state = Self {
            params,
            ledger: KeyImageLedger::new(store),
            tree: RwLock::new(CurveTree::open(tree_storage)?),
            backend: Box::new(PlaceholderMembership::new()?),
            gens: PedersenGenerators::standard()?,
        };
        {
            let tree = state.tree()?;
            info!(
                network = %state.params.network,
                tree_outputs = tree.output_count(),
                tip = ?tree.tip_height()?,
                "privacy state opened"
            );
        }
        Ok(state)
    }

    /// Swap in another membership prover/verifier.
    pub fn with_backend(mut self, backend: Box<dyn MembershipBackend>) -> Self {
        self.backend = backend;
        self
    }

    pub fn params(&self) -> &ConsensusParams {
        &self.params
    }

    pub fn ledger(&self) -> &KeyImageLedger<S> {
        &self.ledger
    }

    pub fn generators(&self) -> &PedersenGenerators {
        &self.gens
    }

    pub fn backend(&self) -> &dyn MembershipBackend {
        self.backend.as_ref()
    }

    pub fn tree(&self) -> Result<RwLockReadGuard<'_, CurveTree<T>>> {
        self.tree
            .read()
            .map_err(|_| Error::Database("curve tree lock poisoned".into()))
    }

    fn tree_mut(&self) -> Result<RwLockWriteGuard<'_, CurveTree<T>>> {
        self.tree
            .write()
            .map_err(|_| Error::Database("curve tree lock poisoned".into()))
    }

    pub fn tree_root(&self) -> Result<EdPoint> {
        self.tree()?.root()
    }

    fn validator(&self) -> TxValidator<'_> {
        TxValidator::new(&self.params, &self.gens, self.backend.as_ref())
    }

    pub fn is_privacy_tx(&self, tx: &CarrierTx) -> bool {
        extract_privacy_tx(tx).is_some()
    }

    /// Context-free checks. A carrier without a privacy payload is valid
    /// as far as this layer is concerned.
    pub fn check_transaction(&self, tx: &CarrierTx, height: Height) -> ValidationResult {
        let Some((_, ptx)) = extract_privacy_tx(tx) else {
            return ValidationResult::Valid;
        };
        if let Err(r) = check_carrier_outputs(tx, &ptx) {
            return ValidationResult::Invalid(r);
        }
        self.validator().check_transaction(&ptx, height)
    }

    /// Full check against the ledger, the tree and the host's output set.
    pub fn check_transaction_contextual(
        &self,
        tx: &CarrierTx,
        height: Height,
        resolver: &dyn OutputResolver,
    ) -> Result<ValidationResult> {
        let Some((_, ptx)) = extract_privacy_tx(tx) else {
            return Ok(ValidationResult::Valid);
        };
        if let Err(r) = check_carrier_outputs(tx, &ptx) {
            return Ok(ValidationResult::Invalid(r));
        }
        self.check_privacy_tx(&ptx, height, resolver)
    }

    /// Contextual check of a bare privacy payload.
    pub fn check_privacy_tx(
        &self,
        ptx: &PrivacyTransaction,
        height: Height,
        resolver: &dyn OutputResolver,
    ) -> Result<ValidationResult> {
        // Hold the read lock so the root cannot move under the check.
        let tree = self.tree()?;
        let ring_ledger = self.ledger.domain(SpendDomain::Ring);
        let fcmp_ledger = self.ledger.domain(SpendDomain::Fcmp);
        let ctx = ValidationContext {
            height,
            ring_ledger: &ring_ledger,
            fcmp_ledger: &fcmp_ledger,
            resolver,
            tree_root: tree.root()?,
        };
        self.validator().check_contextual(ptx, &ctx)
    }

    fn block_entries(block: &CarrierBlock) -> Result<Vec<BlockEntry>> {
        block
            .transactions
            .iter()
            .map(|tx| {
                Ok(BlockEntry {
                    txid: tx.txid()?,
                    privacy: extract_privacy_tx(tx).map(|(_, ptx)| ptx),
                    fcmp_outputs: extract_fcmp_outputs(tx),
                })
            })
            .collect()
    }

    fn block_spends(entries: &[BlockEntry], height: Height) -> Vec<Spend> {
        entries
            .iter()
            .filter_map(|e| e.privacy.as_ref().map(|ptx| (e.txid, ptx)))
            .flat_map(|(txid, ptx)| {
                ptx.key_images().into_iter().map(move |(domain, key_image)| Spend {
                    domain,
                    key_image,
                    record: SpendRecord { tx_hash: txid, height },
                })
            })
            .collect()
    }

    /// Apply a validated block. Refuses blocks that reuse a key image.
    pub fn connect_block(&self, block: &CarrierBlock) -> Result<BlockSummary> {
        let height = block.height;
        let entries = Self::block_entries(block)?;
        let spends = Self::block_spends(&entries, height);
        let outputs: Vec<OutputTuple> = if self.params.is_fcmp_active(height) {
            entries.iter().flat_map(|e| e.fcmp_outputs.iter().copied()).collect()
        } else {
            Vec::new()
        };

        let mut tree = self.tree_mut()?;
        if let Some(tip) = tree.tip_height()? {
            if tip.checked_add(1) != Some(height) {
                return Err(Error::Consensus(format!("block {} does not extend tip {}", height, tip)));
            }
        }

        if let Err(e) = self.ledger.write_batch(&spends) {
            warn!(height, error = %e, "refusing block with spent or duplicate key images");
            return Err(e);
        }
        let root = match tree.append_block(height, &outputs) {
            Ok(root) => root,
            Err(e) => {
                error!(height, error = %e, "curve tree append failed, rolling back key images");
                let images: Vec<(SpendDomain, KeyImage)> = spends.iter().map(|s| (s.domain, s.key_image)).collect();
                self.ledger.erase_batch(&images)?;
                return Err(e);
            }
        };

        let summary = BlockSummary {
            height,
            privacy_txs: entries.iter().filter(|e| e.privacy.is_some()).count(),
            key_images: spends.len(),
            outputs: outputs.len() as u64,
            tree_size: tree.output_count(),
            tree_root: root,
        };
        if summary.key_images > 0 || summary.outputs > 0 {
            info!(
                height,
                key_images = summary.key_images,
                outputs = summary.outputs,
                tree_size = summary.tree_size,
                "privacy block connected"
            );
        }
        Ok(summary)
    }

    /// Undo the tip block: erase its key images and remove its tree leaves.
    /// Every key image must be recorded as spent by this block's own
    /// transaction at this height, or nothing is touched.
    pub fn disconnect_block(&self, block: &CarrierBlock) -> Result<BlockSummary> {
        let height = block.height;
        let mut tree = self.tree_mut()?;
        if tree.tip_height()? != Some(height) {
            return Err(Error::Consensus(format!("block {} is not the privacy tip", height)));
        }
        let before = tree.output_count();

        let entries = Self::block_entries(block)?;
        let spends = Self::block_spends(&entries, height);
        for spend in &spends {
            let recorded = self.ledger.spending_info(spend.domain, &spend.key_image)?;
            if recorded != Some(spend.record) {
                warn!(
                    height,
                    domain = spend.domain.name(),
                    key_image = %spend.key_image.to_hex(),
                    "disconnect refused, key image not spent by this block"
                );
                return Err(Error::Consensus(format!(
                    "key image {} was not spent by block {}",
                    spend.key_image.to_hex(),
                    height
                )));
            }
        }
        let images: Vec<(SpendDomain, KeyImage)> = spends.iter().map(|s| (s.domain, s.key_image)).collect();
        self.ledger.erase_batch(&images)?;

        let root = match tree.revert_block(height) {
            Ok(root) => root,
            Err(e) => {
                error!(height, error = %e, "curve tree revert failed, restoring key images");
                self.ledger.write_batch(&spends)?;
                return Err(e);
            }
        };

        let summary = BlockSummary {
            height,
            privacy_txs: entries.iter().filter(|e| e.privacy.is_some()).count(),
            key_images: spends.len(),
            outputs: before - tree.output_count(),
            tree_size: tree.output_count(),
            tree_root: root,
        };
        info!(
            height,
            key_images = summary.key_images,
            outputs = summary.outputs,
            tree_size = summary.tree_size,
            "privacy block disconnected"
        );
        Ok(summary)
    }

    /// Tree leaves spendable by a transaction mined at `height`
    pub fn mature_leaf_count(&self, height: Height) -> Result<u64> {
        let Some(cutoff) = height.checked_sub(self.params.fcmp_maturity) else {
            return Ok(0);
        };
        self.tree()?.count_after_block(cutoff)
    }

    pub fn is_leaf_mature(&self, leaf: u64, height: Height) -> Result<bool> {
        Ok(leaf < self.mature_leaf_count(height)?)
    }

    /// Run `f` with an FCMP builder that only accepts leaves mature at
    /// `height`. The tree stays read-locked for the duration.
    pub fn with_fcmp_builder<F, R>(&self, height: Height, f: F) -> Result<R>
    where
        F: FnOnce(FcmpTransactionBuilder<'_, T>) -> Result<R>,
    {
        let mature = self.mature_leaf_count(height)?;
        let tree = self.tree()?;
        let builder = FcmpTransactionBuilder::new(&tree, &self.gens, self.backend.as_ref()).with_mature_leaf_count(mature);
        f(builder)
    }

    pub fn stats(&self) -> Result<PrivacyStats> {
        let tree = self.tree()?;
        Ok(PrivacyStats {
            network: self.params.network.clone(),
            ring_key_images: self.ledger.spent_count(SpendDomain::Ring)?,
            fcmp_key_images: self.ledger.spent_count(SpendDomain::Fcmp)?,
            tree_outputs: tree.output_count(),
            tree_depth: tree.depth(),
            tree_root: tree.root()?,
            tip_height: tree.tip_height()?,
            membership_backend: self.backend.name().to_string(),
        })
    }

    /// Flush ledger and tree to durable storage.
    pub fn sync(&self) -> Result<()> {
        self.ledger.sync()?;
        self.tree_mut()?.flush()
    }
}

/// An FCMP payload must list exactly the tuples its carrier outputs hold.
fn check_carrier_outputs(tx: &CarrierTx, ptx: &PrivacyTransaction) -> std::result::Result<(), Rejection> {
    if ptx.privacy_type == PrivacyType::Fcmp && extract_fcmp_outputs(tx) != ptx.fcmp_outputs {
        return Err(Rejection::FcmpOutputMismatch);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consensus::wire::CarrierOutput;
    use crate::crypto::ed25519::{basepoint, hash_to_point};
    use crate::crypto::scalar::random_nonzero_scalar;
    use crate::fcmp::input::FcmpInput;
    use crate::structures::types::OutPoint;
    use rand::rngs::OsRng;

    fn tuple() -> OutputTuple {
        let o = random_nonzero_scalar(&mut OsRng) * basepoint();
        let i = hash_to_point(o.compress().as_bytes()).unwrap();
        let c = random_nonzero_scalar(&mut OsRng) * basepoint();
        OutputTuple::new(o.into(), i.into(), c.into())
    }

    fn key_image() -> KeyImage {
        KeyImage(EdPoint::from_point(&(random_nonzero_scalar(&mut OsRng) * basepoint())).0)
    }

    /// Carrier spending the given FCMP key images; only the images matter
    /// to block connection.
    fn spending_tx(images: &[KeyImage], outputs: usize) -> CarrierTx {
        let mut ptx = PrivacyTransaction::new(PrivacyType::Fcmp);
        let template = FcmpInput {
            key_image: KeyImage::default(),
            tuple: crate::fcmp::input::InputTuple {
                o_tilde: EdPoint::identity(),
                i_tilde: EdPoint::identity(),
                c_tilde: EdPoint::identity(),
            },
            membership: crate::fcmp::membership::MembershipProof::new(vec![1], EdPoint::identity()),
            sal: crate::fcmp::input::SalSignature { r: EdPoint::identity(), s: [0; 32] },
            pseudo_output: EdPoint::identity(),
        };
        ptx.fcmp_inputs = images.iter().map(|ki| FcmpInput { key_image: *ki, ..template.clone() }).collect();
        ptx.fcmp_outputs = (0..outputs).map(|_| tuple()).collect();
        CarrierTx::new(2).with_fcmp_payload(OutPoint::null(), &ptx).unwrap()
    }

    fn block(height: Height, transactions: Vec<CarrierTx>) -> CarrierBlock {
        CarrierBlock { height, transactions }
    }

    #[test]
    fn test_connect_and_disconnect() {
        let state = PrivacyState::in_memory(ConsensusParams::regtest()).unwrap();
        let empty_root = state.tree_root().unwrap();
        let ki = key_image();

        let b5 = block(5, vec![spending_tx(&[ki], 3)]);
        let summary = state.connect_block(&b5).unwrap();
        assert_eq!(summary.key_images, 1);
        assert_eq!(summary.outputs, 3);
        assert!(state.ledger().is_spent(SpendDomain::Fcmp, &ki).unwrap());
        assert!(!state.ledger().is_spent(SpendDomain::Ring, &ki).unwrap());
        assert_eq!(state.tree().unwrap().output_count(), 3);

        let b6 = block(6, vec![spending_tx(&[key_image()], 2)]);
        state.connect_block(&b6).unwrap();
        assert!(state.disconnect_block(&block(5, vec![])).is_err());

        let undone = state.disconnect_block(&b6).unwrap();
        assert_eq!(undone.outputs, 2);
        assert_eq!(state.tree().unwrap().output_count(), 3);

        state.disconnect_block(&block(5, vec![spending_tx(&[ki], 3)])).unwrap();
        assert!(!state.ledger().is_spent(SpendDomain::Fcmp, &ki).unwrap());
        assert_eq!(state.tree_root().unwrap(), empty_root);
    }

    #[test]
    fn test_disconnect_refuses_foreign_spends() {
        let state = PrivacyState::in_memory(ConsensusParams::regtest()).unwrap();
        let ki = key_image();
        let b1 = block(1, vec![spending_tx(&[ki], 1)]);
        state.connect_block(&b1).unwrap();
        state.connect_block(&block(2, vec![])).unwrap();
        let root = state.tree_root().unwrap();

        // Block 2 claiming a key image spent in block 1
        assert!(state.disconnect_block(&block(2, vec![spending_tx(&[ki], 0)])).is_err());
        assert!(state.ledger().is_spent(SpendDomain::Fcmp, &ki).unwrap());
        assert_eq!(state.stats().unwrap().tip_height, Some(2));
        assert_eq!(state.tree_root().unwrap(), root);

        // An unspent key image
        assert!(state.disconnect_block(&block(2, vec![spending_tx(&[key_image()], 0)])).is_err());
        assert_eq!(state.stats().unwrap().tip_height, Some(2));

        state.disconnect_block(&block(2, vec![])).unwrap();

        // Right height and key image, different transaction
        assert!(state.disconnect_block(&block(1, vec![spending_tx(&[ki], 1)])).is_err());
        assert!(state.ledger().is_spent(SpendDomain::Fcmp, &ki).unwrap());
        assert_eq!(state.tree().unwrap().output_count(), 1);

        state.disconnect_block(&b1).unwrap();
        assert!(!state.ledger().is_spent(SpendDomain::Fcmp, &ki).unwrap());
        assert_eq!(state.stats().unwrap().tip_height, None);
    }

    #[test]
    fn test_double_spend_block_refused_atomically() {
        let state = PrivacyState::in_memory(ConsensusParams::regtest()).unwrap();
        let ki = key_image();
        state.connect_block(&block(1, vec![spending_tx(&[ki], 1)])).unwrap();

        let fresh = key_image();
        let replay = block(2, vec![spending_tx(&[fresh], 1), spending_tx(&[ki], 1)]);
        assert!(state.connect_block(&replay).is_err());
        assert!(!state.ledger().is_spent(SpendDomain::Fcmp, &fresh).unwrap());
        assert_eq!(state.tree().unwrap().output_count(), 1);
        assert_eq!(state.tree().unwrap().tip_height().unwrap(), Some(1));

        let twice = block(2, vec![spending_tx(&[fresh, fresh], 1)]);
        assert!(state.connect_block(&twice).is_err());
    }

    #[test]
    fn test_blocks_must_extend_tip() {
        let state = PrivacyState::in_memory(ConsensusParams::regtest()).unwrap();
        state.connect_block(&block(10, vec![])).unwrap();
        assert!(state.connect_block(&block(12, vec![])).is_err());
        state.connect_block(&block(11, vec![])).unwrap();
    }

    #[test]
    fn test_outputs_ignored_before_fcmp_activation() {
        let mut params = ConsensusParams::regtest();
        params.fcmp_activation_height = 50;
        let state = PrivacyState::in_memory(params).unwrap();

        let mut carrier = CarrierTx::new(2);
        carrier.outputs.push(CarrierOutput::new(0, crate::consensus::wire::fcmp_output_script(&tuple())));
        state.connect_block(&block(49, vec![carrier.clone()])).unwrap();
        assert_eq!(state.tree().unwrap().output_count(), 0);
        state.connect_block(&block(50, vec![carrier])).unwrap();
        assert_eq!(state.tree().unwrap().output_count(), 1);
    }

    #[test]
    fn test_maturity() {
        let mut params = ConsensusParams::regtest();
        params.fcmp_maturity = 10;
        let state = PrivacyState::in_memory(params).unwrap();

        let mut carrier = CarrierTx::new(2);
        carrier.outputs.push(CarrierOutput::new(0, crate::consensus::wire::fcmp_output_script(&tuple())));
        state.connect_block(&block(1, vec![carrier.clone()])).unwrap();
        state.connect_block(&block(2, vec![carrier])).unwrap();

        assert_eq!(state.mature_leaf_count(5).unwrap(), 0);
        assert_eq!(state.mature_leaf_count(11).unwrap(), 1);
        assert!(state.is_leaf_mature(0, 11).unwrap());
        assert!(!state.is_leaf_mature(1, 11).unwrap());
        assert_eq!(state.mature_leaf_count(12).unwrap(), 2);
    }

    #[test]
    fn test_output_mismatch_rejected() {
        let state = PrivacyState::in_memory(ConsensusParams::regtest()).unwrap();
        let mut carrier = spending_tx(&[key_image()], 2);
        carrier.outputs.pop();
        assert_eq!(
            state.check_transaction(&carrier, 10).rejection(),
            Some(Rejection::FcmpOutputMismatch)
        );
        assert!(state.check_transaction(&CarrierTx::new(2), 10).is_valid());
        assert!(!state.is_privacy_tx(&CarrierTx::new(2)));
    }

    #[test]
    fn test_stats_and_sled_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let ki = key_image();
        {
            let state = PrivacyState::open_sled(ConsensusParams::regtest(), dir.path()).unwrap();
            state.connect_block(&block(3, vec![spending_tx(&[ki], 4)])).unwrap();
            state.sync().unwrap();
        }
        let state = PrivacyState::open_sled(ConsensusParams::regtest(), dir.path()).unwrap();
        let stats = state.stats().unwrap();
        assert_eq!(stats.fcmp_key_images, 1);
        assert_eq!(stats.ring_key_images, 0);
        assert_eq!(stats.tree_outputs, 4);
        assert_eq!(stats.tip_height, Some(3));
        assert_eq!(stats.membership_backend, "placeholder");
        assert!(state.ledger().is_spent(SpendDomain::Fcmp, &ki).unwrap());
    }
}
