//! In-memory key image store

use super::{KeyImageStore, StoreError, StoreOp};
use std::collections::BTreeMap;

/// `BTreeMap`-backed store for tests and ephemeral nodes
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    entries: BTreeMap<Vec<u8>, Vec<u8>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyImageStore for MemoryStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.entries.get(key).cloned())
    }

    fn write_batch(&mut self, ops: Vec<StoreOp>) -> Result<(), StoreError> {
        // Infallible once we get here, so applying in order is atomic.
        for op in ops {
            match op {
                StoreOp::Put(key, value) => {
                    self.entries.insert(key, value);
                }
                StoreOp::Delete(key) => {
                    self.entries.remove(&key);
                }
            }
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<(), StoreError> {
        Ok(())
    }

    fn count_prefix(&self, prefix: u8) -> Result<u64, StoreError> {
        let count = self
            .entries
            .range(vec![prefix]..)
            .take_while(|(k, _)| k.first() == Some(&prefix))
            .count();
        Ok(count as u64)
    }

    fn len(&self) -> Result<u64, StoreError> {
        Ok(self.entries.len() as u64)
    }
}
