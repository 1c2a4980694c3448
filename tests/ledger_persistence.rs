//! Key image ledger and curve tree survive a restart on sled.

use privacy_core::consensus::wire::{fcmp_output_script, CarrierBlock, CarrierOutput, CarrierTx};
use privacy_core::consensus::{ConsensusParams, PrivacyState};
use privacy_core::crypto::ed25519::basepoint;
use privacy_core::crypto::scalar::random_nonzero_scalar;
use privacy_core::crypto::{EdPoint, RingPoint};
use privacy_core::fcmp::input::generate_output_tuple;
use privacy_core::privacy::decoy::MemoryDecoyProvider;
use privacy_core::privacy::ring::RingMember;
use privacy_core::privacy::transaction::{PrivacyType, RingCtBuilder};
use privacy_core::{Hash256, KeyImage, KeyImageLedger, OutPoint, OutputTuple, PedersenGenerators, SledStore, SpendDomain, StealthSecrets};
use rand::rngs::OsRng;
use tempfile::TempDir;

fn tuple(gens: &PedersenGenerators) -> OutputTuple {
    let public = EdPoint::from_point(&(random_nonzero_scalar(&mut OsRng) * basepoint()));
    generate_output_tuple(&public, 9, &random_nonzero_scalar(&mut OsRng), gens).unwrap()
}

fn funding_and_spend(gens: &PedersenGenerators, height: u64) -> (CarrierBlock, KeyImage) {
    let x = random_nonzero_scalar(&mut OsRng);
    let member = RingMember::new(OutPoint::new(Hash256([height as u8; 32]), 0), RingPoint::from_secret(&x));
    let decoy = RingMember::new(
        OutPoint::new(Hash256([0xd0 + height as u8; 32]), 1),
        RingPoint::from_secret(&random_nonzero_scalar(&mut OsRng)),
    );
    let mut builder = RingCtBuilder::new(PrivacyType::Ring).unwrap();
    builder.add_input_with_decoys(member, x, 50, vec![decoy]).unwrap();
    builder.add_output(StealthSecrets::generate(&mut OsRng).address(), 50).unwrap();
    let ptx = builder.build(&MemoryDecoyProvider::new(0), &mut OsRng).unwrap();

    let mut funding = CarrierTx::new(2);
    funding.outputs = (0..3).map(|_| CarrierOutput::new(0, fcmp_output_script(&tuple(gens)))).collect();
    let spend = CarrierTx::new(2).with_privacy_payload(&ptx).unwrap();
    let block = CarrierBlock { height, transactions: vec![funding, spend] };
    (block, ptx.inputs[0].key_image)
}

#[test]
fn test_state_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let params = ConsensusParams::regtest();

    let (stats, first, second, key_images) = {
        let state = PrivacyState::open_sled(params.clone(), dir.path()).unwrap();
        let gens = state.generators().clone();
        let (first, ki1) = funding_and_spend(&gens, 1);
        let (second, ki2) = funding_and_spend(&gens, 2);
        state.connect_block(&first).unwrap();
        state.connect_block(&second).unwrap();
        state.sync().unwrap();
        (state.stats().unwrap(), first, second, [ki1, ki2])
    };
    assert_eq!(stats.ring_key_images, 2);
    assert_eq!(stats.tree_outputs, 6);
    assert_eq!(stats.tip_height, Some(2));

    let state = PrivacyState::open_sled(params, dir.path()).unwrap();
    assert_eq!(state.stats().unwrap(), stats);
    for ki in &key_images {
        assert!(state.ledger().is_spent(SpendDomain::Ring, ki).unwrap());
    }
    assert!(state.tree().unwrap().verify_integrity().unwrap());
    assert_eq!(state.mature_leaf_count(3).unwrap(), 6);
    assert_eq!(state.mature_leaf_count(2).unwrap(), 3);

    // Reorg after restart uses the persisted block log.
    assert!(state.disconnect_block(&first).is_err());
    let summary = state.disconnect_block(&second).unwrap();
    assert_eq!(summary.outputs, 3);
    assert!(!state.ledger().is_spent(SpendDomain::Ring, &key_images[1]).unwrap());
    assert_eq!(state.stats().unwrap().tip_height, Some(1));
    state.connect_block(&second).unwrap();
    assert_eq!(state.stats().unwrap().tree_root, stats.tree_root);
}

#[test]
fn test_ledger_reopen() {
    let dir = TempDir::new().unwrap();
    let ki = KeyImage(RingPoint::from_secret(&random_nonzero_scalar(&mut OsRng)).0);
    let txid = Hash256([7; 32]);
    {
        let ledger = KeyImageLedger::new(SledStore::open(dir.path()).unwrap());
        ledger.mark_spent(SpendDomain::Fcmp, &ki, txid, 42).unwrap();
        ledger.sync().unwrap();
    }

    let ledger = KeyImageLedger::new(SledStore::open(dir.path()).unwrap());
    assert!(ledger.is_spent(SpendDomain::Fcmp, &ki).unwrap());
    assert!(!ledger.is_spent(SpendDomain::Ring, &ki).unwrap());
    let record = ledger.spending_info(SpendDomain::Fcmp, &ki).unwrap().unwrap();
    assert_eq!(record.tx_hash, txid);
    assert_eq!(record.height, 42);
    assert!(ledger.mark_spent(SpendDomain::Fcmp, &ki, Hash256([8; 32]), 43).is_err());
    assert_eq!(ledger.spent_count(SpendDomain::Fcmp).unwrap(), 1);
}
