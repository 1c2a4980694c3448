//! Sled-backed key image store

use super::{KeyImageStore, StoreError, StoreOp};
use sled::{Batch, Db, Tree};
use std::path::Path;

const TREE_NAME: &str = "key_images";

/// Persistent store: one sled tree, written through `sled::Batch`
pub struct SledStore {
    db: Db,
    images: Tree,
}

impl SledStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let db = sled::open(path)?;
        Self::from_db(db)
    }

    /// Throwaway database removed on drop
    pub fn temporary() -> Result<Self, StoreError> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db)
    }

    pub fn from_db(db: Db) -> Result<Self, StoreError> {
        let images = db.open_tree(TREE_NAME)?;
        Ok(Self { db, images })
    }
}

impl KeyImageStore for SledStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.images.get(key)?.map(|v| v.to_vec()))
    }

    fn contains(&self, key: &[u8]) -> Result<bool, StoreError> {
        Ok(self.images.contains_key(key)?)
    }

    fn write_batch(&mut self, ops: Vec<StoreOp>) -> Result<(), StoreError> {
        let mut batch = Batch::default();
        for op in ops {
            match op {
                StoreOp::Put(key, value) => batch.insert(key, value),
                StoreOp::Delete(key) => batch.remove(key),
            }
        }
        self.images.apply_batch(batch)?;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), StoreError> {
        self.db.flush()?;
        Ok(())
    }

    fn count_prefix(&self, prefix: u8) -> Result<u64, StoreError> {
        let mut count = 0u64;
        for item in self.images.scan_prefix([prefix]) {
            item?;
            count += 1;
        }
        Ok(count)
    }

    fn len(&self) -> Result<u64, StoreError> {
        Ok(self.images.len() as u64)
    }
}
