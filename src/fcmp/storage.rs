//! Curve tree persistence
//!
//! Key layout:
//!
//! - node:     `'N' || layer u32 BE || index u64 BE`  -> bincode `TreeNode`
//! - output:   `'O' || index u64 BE`                  -> 96-byte tuple
//! - metadata: `'M' || key`                           -> u64 LE
//!
//! Big-endian indices keep sled's lexicographic order equal to tree order.

use super::curve_tree::{OutputTuple, TreeIndex, TreeNode};
use crate::ledger::{StoreError, StoreOp};
use sled::{Batch, Db, Tree};
use std::collections::BTreeMap;
use std::path::Path;

const NODE_PREFIX: u8 = b'N';
const OUTPUT_PREFIX: u8 = b'O';
const META_PREFIX: u8 = b'M';
const SLED_TREE_NAME: &str = "curve_tree";

pub const META_OUTPUT_COUNT: &str = "output_count";
pub const META_DEPTH: &str = "depth";
/// Last connected block height plus one, zero when none
pub const META_TIP: &str = "tip";

/// Metadata name holding the output count at the start of block `height`
pub fn block_meta_name(height: u64) -> String {
    format!("block:{}", height)
}

pub fn node_key(index: TreeIndex) -> Vec<u8> {
    let mut key = Vec::with_capacity(13);
    key.push(NODE_PREFIX);
    key.extend_from_slice(&index.layer.to_be_bytes());
    key.extend_from_slice(&index.index.to_be_bytes());
    key
}

pub fn output_key(index: u64) -> Vec<u8> {
    let mut key = Vec::with_capacity(9);
    key.push(OUTPUT_PREFIX);
    key.extend_from_slice(&index.to_be_bytes());
    key
}

pub fn meta_key(name: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(1 + name.len());
    key.push(META_PREFIX);
    key.extend_from_slice(name.as_bytes());
    key
}

/// Writes collected for one atomic tree update
#[derive(Debug, Default, Clone)]
pub struct TreeBatch {
    ops: Vec<StoreOp>,
}

impl TreeBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_node(&mut self, index: TreeIndex, node: &TreeNode) -> Result<(), StoreError> {
        self.ops.push(StoreOp::Put(node_key(index), bincode::serialize(node)?));
        Ok(())
    }

    pub fn delete_node(&mut self, index: TreeIndex) {
        self.ops.push(StoreOp::Delete(node_key(index)));
    }

    pub fn put_output(&mut self, index: u64, output: &OutputTuple) {
        self.ops.push(StoreOp::Put(output_key(index), output.to_bytes().to_vec()));
    }

    pub fn delete_output(&mut self, index: u64) {
        self.ops.push(StoreOp::Delete(output_key(index)));
    }

    pub fn put_meta(&mut self, name: &str, value: u64) {
        self.ops.push(StoreOp::Put(meta_key(name), value.to_le_bytes().to_vec()));
    }

    pub fn delete_meta(&mut self, name: &str) {
        self.ops.push(StoreOp::Delete(meta_key(name)));
    }

    /// Append every operation of `other` after ours.
    pub fn extend(&mut self, other: TreeBatch) {
        self.ops.extend(other.ops);
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn into_ops(self) -> Vec<StoreOp> {
        self.ops
    }
}

/// Backend for the curve tree. Implementors provide raw access; typed
/// accessors are shared.
pub trait TreeStorage: Send + Sync {
    fn get_raw(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError>;

    /// Apply a batch atomically.
    fn write(&mut self, batch: TreeBatch) -> Result<(), StoreError>;

    fn flush(&mut self) -> Result<(), StoreError>;

    fn get_node(&self, index: TreeIndex) -> Result<Option<TreeNode>, StoreError> {
        match self.get_raw(&node_key(index))? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    fn get_output(&self, index: u64) -> Result<Option<OutputTuple>, StoreError> {
        match self.get_raw(&output_key(index))? {
            Some(bytes) => OutputTuple::from_bytes(&bytes)
                .map(Some)
                .ok_or_else(|| StoreError::Corrupt(format!("output {} is not a 96-byte tuple", index))),
            None => Ok(None),
        }
    }

    fn get_meta(&self, name: &str) -> Result<Option<u64>, StoreError> {
        match self.get_raw(&meta_key(name))? {
            Some(bytes) => {
                let arr: [u8; 8] = bytes
                    .as_slice()
                    .try_into()
                    .map_err(|_| StoreError::Corrupt(format!("metadata {} has {} bytes", name, bytes.len())))?;
                Ok(Some(u64::from_le_bytes(arr)))
            }
            None => Ok(None),
        }
    }

    fn output_count(&self) -> Result<u64, StoreError> {
        Ok(self.get_meta(META_OUTPUT_COUNT)?.unwrap_or(0))
    }
}

/// In-memory tree storage
#[derive(Debug, Default, Clone)]
pub struct MemoryTreeStorage {
    entries: BTreeMap<Vec<u8>, Vec<u8>>,
}

impl MemoryTreeStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl TreeStorage for MemoryTreeStorage {
    fn get_raw(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.entries.get(key).cloned())
    }

    fn write(&mut self, batch: TreeBatch) -> Result<(), StoreError> {
        for op in batch.into_ops() {
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
}

/// Sled-backed tree storage
pub struct SledTreeStorage {
    db: Db,
    tree: Tree,
}

impl SledTreeStorage {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        Self::from_db(sled::open(path)?)
    }

    pub fn temporary() -> Result<Self, StoreError> {
        Self::from_db(sled::Config::new().temporary(true).open()?)
    }

    /// Share a database with the key image ledger.
    pub fn from_db(db: Db) -> Result<Self, StoreError> {
        let tree = db.open_tree(SLED_TREE_NAME)?;
        Ok(Self { db, tree })
    }
}

impl TreeStorage for SledTreeStorage {
    fn get_raw(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.tree.get(key)?.map(|v| v.to_vec()))
    }

    fn write(&mut self, batch: TreeBatch) -> Result<(), StoreError> {
        let mut sled_batch = Batch::default();
        for op in batch.into_ops() {
            match op {
                StoreOp::Put(key, value) => sled_batch.insert(key, value),
                StoreOp::Delete(key) => sled_batch.remove(key),
            }
        }
        self.tree.apply_batch(sled_batch)?;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), StoreError> {
        self.db.flush()?;
        Ok(())
    }
}
