//! Key Image Ledger
//!
//! The single authority on double-spend status. Both ring/RingCT key images
//! and FCMP key images live in one store, separated by a prefix byte:
//!
//! - key:   `domain prefix || SHA-256(key image)`
//! - value: bincode `SpendRecord { tx_hash, height }`
//!
//! All reads and writes serialize through one coarse lock, so "is this key
//! image spent" is linearizable with respect to block connection. Batches
//! are atomic: a block's spends are recorded entirely or not at all.

pub mod memory;
pub mod sled_store;

pub use memory::MemoryStore;
pub use sled_store::SledStore;

use crate::structures::types::{Hash256, Height, KeyImage};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;
use tracing::{debug, warn};

/// Storage backend errors
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),
    #[error("serialization error: {0}")]
    Serialize(#[from] bincode::Error),
    #[error("corrupt entry: {0}")]
    Corrupt(String),
}

impl From<StoreError> for Error {
    fn from(e: StoreError) -> Self {
        Error::Database(e.to_string())
    }
}

/// A single write in an atomic batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOp {
    Put(Vec<u8>, Vec<u8>),
    Delete(Vec<u8>),
}

/// Pluggable key-value backend for the ledger
pub trait KeyImageStore: Send {
    fn get(&self, key: &[u8]) -> std::result::Result<Option<Vec<u8>>, StoreError>;

    fn contains(&self, key: &[u8]) -> std::result::Result<bool, StoreError> {
        Ok(self.get(key)?.is_some())
    }

    fn insert(&mut self, key: Vec<u8>, value: Vec<u8>) -> std::result::Result<(), StoreError> {
        self.write_batch(vec![StoreOp::Put(key, value)])
    }

    fn remove(&mut self, key: Vec<u8>) -> std::result::Result<(), StoreError> {
        self.write_batch(vec![StoreOp::Delete(key)])
    }

    /// Apply all operations atomically.
    fn write_batch(&mut self, ops: Vec<StoreOp>) -> std::result::Result<(), StoreError>;

    /// Make previous writes durable.
    fn flush(&mut self) -> std::result::Result<(), StoreError>;

    /// Number of entries whose key starts with `prefix`.
    fn count_prefix(&self, prefix: u8) -> std::result::Result<u64, StoreError>;

    /// Total number of entries.
    fn len(&self) -> std::result::Result<u64, StoreError>;

    fn is_empty(&self) -> std::result::Result<bool, StoreError> {
        Ok(self.len()? == 0)
    }
}

/// Which protocol produced a key image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SpendDomain {
    /// Ring signature / RingCT spends
    Ring,
    /// Full-chain membership proof spends
    Fcmp,
}

impl SpendDomain {
    pub fn prefix(self) -> u8 {
        match self {
            SpendDomain::Ring => b'k',
            SpendDomain::Fcmp => b'K',
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            SpendDomain::Ring => "ring",
            SpendDomain::Fcmp => "fcmp",
        }
    }
}

/// Where a key image was consumed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpendRecord {
    pub tx_hash: Hash256,
    pub height: Height,
}

/// One entry of a block-sized write batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Spend {
    pub domain: SpendDomain,
    pub key_image: KeyImage,
    pub record: SpendRecord,
}

fn storage_key(domain: SpendDomain, key_image: &KeyImage) -> Vec<u8> {
    let mut key = Vec::with_capacity(33);
    key.push(domain.prefix());
    key.extend_from_slice(&key_image.hash().0);
    key
}

/// Read-only view used by verifiers that must reject spent key images.
pub trait SpentKeyImages {
    fn is_spent(&self, key_image: &KeyImage) -> Result<bool>;
}

/// Unified key image ledger
pub struct KeyImageLedger<S: KeyImageStore> {
    store: Mutex<S>,
}

impl<S: KeyImageStore> KeyImageLedger<S> {
    pub fn new(store: S) -> Self {
        Self { store: Mutex::new(store) }
    }

    fn lock(&self) -> Result<MutexGuard<'_, S>> {
        self.store
            .lock()
            .map_err(|_| Error::Database("key image ledger lock poisoned".into()))
    }

    /// Absent keys are "unspent", not errors.
    pub fn is_spent(&self, domain: SpendDomain, key_image: &KeyImage) -> Result<bool> {
        let store = self.lock()?;
        Ok(store.contains(&storage_key(domain, key_image))?)
    }

    pub fn spending_info(&self, domain: SpendDomain, key_image: &KeyImage) -> Result<Option<SpendRecord>> {
        let store = self.lock()?;
        match store.get(&storage_key(domain, key_image))? {
            Some(bytes) => {
                let record = bincode::deserialize(&bytes).map_err(StoreError::from)?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    /// Record a single spend. Never overwrites an existing entry.
    pub fn mark_spent(
        &self,
        domain: SpendDomain,
        key_image: &KeyImage,
        tx_hash: Hash256,
        height: Height,
    ) -> Result<()> {
        self.write_batch(&[Spend {
            domain,
            key_image: *key_image,
            record: SpendRecord { tx_hash, height },
        }])
    }

    /// Remove a spend. Returns whether an entry existed.
    pub fn unmark(&self, domain: SpendDomain, key_image: &KeyImage) -> Result<bool> {
        let mut store = self.lock()?;
        let key = storage_key(domain, key_image);
        let existed = store.contains(&key)?;
        store.remove(key)?;
        debug!(domain = domain.name(), key_image = %key_image.to_hex(), existed, "unmarked key image");
        Ok(existed)
    }

    /// Record a block's spends atomically.
    ///
    /// Fails without writing anything if any image is already spent or
    /// appears twice in `spends`.
    pub fn write_batch(&self, spends: &[Spend]) -> Result<()> {
        if spends.is_empty() {
            return Ok(());
        }
        let mut store = self.lock()?;
        let mut seen = HashSet::with_capacity(spends.len());
        let mut ops = Vec::with_capacity(spends.len());
        for spend in spends {
            let key = storage_key(spend.domain, &spend.key_image);
            if !seen.insert(key.clone()) {
                return Err(Error::Consensus(format!(
                    "duplicate key image {} in batch",
                    spend.key_image.to_hex()
                )));
            }
            if store.contains(&key)? {
                warn!(
                    domain = spend.domain.name(),
                    key_image = %spend.key_image.to_hex(),
                    "refusing to overwrite spent key image"
                );
                return Err(Error::Consensus(format!(
                    "key image {} already spent",
                    spend.key_image.to_hex()
                )));
            }
            let value = bincode::serialize(&spend.record).map_err(StoreError::from)?;
            ops.push(StoreOp::Put(key, value));
        }
        store.write_batch(ops)?;
        debug!(count = spends.len(), "wrote key image batch");
        Ok(())
    }

    /// Remove a block's spends atomically. Missing entries are ignored.
    pub fn erase_batch(&self, images: &[(SpendDomain, KeyImage)]) -> Result<()> {
        if images.is_empty() {
            return Ok(());
        }
        let mut store = self.lock()?;
        let ops = images
            .iter()
            .map(|(domain, ki)| StoreOp::Delete(storage_key(*domain, ki)))
            .collect();
        store.write_batch(ops)?;
        debug!(count = images.len(), "erased key image batch");
        Ok(())
    }

    /// Flush to durable storage.
    pub fn sync(&self) -> Result<()> {
        let mut store = self.lock()?;
        store.flush()?;
        Ok(())
    }

    pub fn spent_count(&self, domain: SpendDomain) -> Result<u64> {
        let store = self.lock()?;
        Ok(store.count_prefix(domain.prefix())?)
    }

    /// Per-domain view with the narrow single-ledger contract.
    pub fn domain(&self, domain: SpendDomain) -> DomainLedger<'_, S> {
        DomainLedger { ledger: self, domain }
    }
}

/// A ledger restricted to one spend domain
pub struct DomainLedger<'a, S: KeyImageStore> {
    ledger: &'a KeyImageLedger<S>,
    domain: SpendDomain,
}

impl<'a, S: KeyImageStore> DomainLedger<'a, S> {
    pub fn is_spent(&self, key_image: &KeyImage) -> Result<bool> {
        self.ledger.is_spent(self.domain, key_image)
    }

    pub fn mark_spent(&self, key_image: &KeyImage, tx_hash: Hash256, height: Height) -> Result<()> {
        self.ledger.mark_spent(self.domain, key_image, tx_hash, height)
    }

    pub fn unmark(&self, key_image: &KeyImage) -> Result<bool> {
        self.ledger.unmark(self.domain, key_image)
    }

    pub fn write_batch(&self, spends: &[(KeyImage, SpendRecord)]) -> Result<()> {
        let spends: Vec<Spend> = spends
            .iter()
            .map(|(key_image, record)| Spend { domain: self.domain, key_image: *key_image, record: *record })
            .collect();
        self.ledger.write_batch(&spends)
    }

    pub fn erase_batch(&self, key_images: &[KeyImage]) -> Result<()> {
        let images: Vec<_> = key_images.iter().map(|ki| (self.domain, *ki)).collect();
        self.ledger.erase_batch(&images)
    }

    pub fn sync(&self) -> Result<()> {
        self.ledger.sync()
    }
}

impl<'a, S: KeyImageStore> SpentKeyImages for DomainLedger<'a, S> {
    fn is_spent(&self, key_image: &KeyImage) -> Result<bool> {
        DomainLedger::is_spent(self, key_image)
    }
}
