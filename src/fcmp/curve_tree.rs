//! Curve Tree
//!
//! An accumulator over every FCMP output on chain. Leaves are output tuples
//! (O, I, C); each leaf node hashes up to 38 of them (six scalars apiece)
//! and each internal node hashes up to 38 child hashes. The tree has a
//! single root, which is what membership proofs commit to.
//!
//! ```text
//! layer 2:                    root
//! layer 1:        n(1,0)     ...     n(1,k)
//! layer 0:   n(0,0) .. n(0,37)  ...
//! outputs:   o0..o37  o38..o75  ...
//! ```
//!
//! Appends update only the right edge of every layer with `grow`/`trim`,
//! and `truncate` removes leaves for real on reorg.

use super::pedersen::{PedersenHash, TREE_HASH_SEED};
use super::storage::{
    block_meta_name, MemoryTreeStorage, TreeBatch, TreeStorage, META_DEPTH, META_OUTPUT_COUNT, META_TIP,
};
use crate::constants::{ELEMENTS_PER_OUTPUT, TREE_WIDTH};
use crate::crypto::ed25519::EdPoint;
use crate::crypto::hash::sha512;
use crate::crypto::scalar::scalar_from_canonical;
use crate::{Error, Result};
use curve25519_dalek::{edwards::EdwardsPoint, scalar::Scalar};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info};

pub const MAX_DEPTH: usize = 32;
/// Scalars hashed by a full leaf node
pub const LEAF_ELEMENTS: usize = TREE_WIDTH * ELEMENTS_PER_OUTPUT;
pub const OUTPUT_TUPLE_LEN: usize = 96;

const WIDTH: u64 = TREE_WIDTH as u64;

fn reduce(bytes: &[u8]) -> Scalar {
    Scalar::from_bytes_mod_order_wide(&sha512(bytes))
}

/// Scalar a child hash contributes to its parent
fn child_scalar(point: &EdwardsPoint) -> Scalar {
    reduce(point.compress().as_bytes())
}

/// A spendable FCMP output: one-time key O, key image base I = Hp(O) and
/// amount commitment C
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OutputTuple {
    pub o: EdPoint,
    pub i: EdPoint,
    pub c: EdPoint,
}

impl OutputTuple {
    pub fn new(o: EdPoint, i: EdPoint, c: EdPoint) -> Self {
        Self { o, i, c }
    }

    /// All three points valid and none the identity
    pub fn is_valid(&self) -> bool {
        [&self.o, &self.i, &self.c]
            .iter()
            .all(|p| p.is_valid() && !p.is_identity())
    }

    /// Six leaf elements, one per 16-byte half of each point
    pub fn to_elements(&self) -> [Scalar; ELEMENTS_PER_OUTPUT] {
        let mut out = [Scalar::ZERO; ELEMENTS_PER_OUTPUT];
        for (k, point) in [&self.o, &self.i, &self.c].iter().enumerate() {
            out[2 * k] = reduce(&point.0[..16]);
            out[2 * k + 1] = reduce(&point.0[16..]);
        }
        out
    }

    pub fn to_bytes(&self) -> [u8; OUTPUT_TUPLE_LEN] {
        let mut out = [0u8; OUTPUT_TUPLE_LEN];
        out[..32].copy_from_slice(&self.o.0);
        out[32..64].copy_from_slice(&self.i.0);
        out[64..].copy_from_slice(&self.c.0);
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != OUTPUT_TUPLE_LEN {
            return None;
        }
        Some(Self {
            o: EdPoint::from_slice(&bytes[..32])?,
            i: EdPoint::from_slice(&bytes[32..64])?,
            c: EdPoint::from_slice(&bytes[64..])?,
        })
    }
}

/// Position of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TreeIndex {
    pub layer: u32,
    pub index: u64,
}

impl TreeIndex {
    pub fn new(layer: u32, index: u64) -> Self {
        Self { layer, index }
    }
}

/// Stored node: its hash and how many children it covers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeNode {
    pub hash: EdPoint,
    pub children: u32,
}

/// Authentication path from a leaf to the root
///
/// `layers[0]` holds the scalar elements of the leaf node containing the
/// output, `layers[k]` for k > 0 the child hashes of the layer-k node on
/// the path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeBranch {
    pub leaf_index: u64,
    pub layers: Vec<Vec<[u8; 32]>>,
}

impl TreeBranch {
    pub fn depth(&self) -> usize {
        self.layers.len()
    }

    /// leaf u64 LE || layer count u32 LE || (count u32 LE || elements)*
    pub fn to_bytes(&self) -> Vec<u8> {
        let total: usize = self.layers.iter().map(|l| 4 + 32 * l.len()).sum();
        let mut out = Vec::with_capacity(12 + total);
        out.extend_from_slice(&self.leaf_index.to_le_bytes());
        out.extend_from_slice(&(self.layers.len() as u32).to_le_bytes());
        for layer in &self.layers {
            out.extend_from_slice(&(layer.len() as u32).to_le_bytes());
            for element in layer {
                out.extend_from_slice(element);
            }
        }
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let mut reader = ByteReader { data: bytes, pos: 0 };
        let leaf_index = u64::from_le_bytes(reader.take(8)?.try_into().ok()?);
        let layer_count = u32::from_le_bytes(reader.take(4)?.try_into().ok()?) as usize;
        if layer_count > MAX_DEPTH {
            return None;
        }
        let mut layers = Vec::with_capacity(layer_count);
        for _ in 0..layer_count {
            let count = u32::from_le_bytes(reader.take(4)?.try_into().ok()?) as usize;
            if count > LEAF_ELEMENTS {
                return None;
            }
            let mut layer: Vec<[u8; 32]> = Vec::with_capacity(count);
            for _ in 0..count {
                layer.push(reader.take(32)?.try_into().ok()?);
            }
            layers.push(layer);
        }
        if reader.pos != bytes.len() {
            return None;
        }
        Some(Self { leaf_index, layers })
    }
}

struct ByteReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    fn take(&mut self, n: usize) -> Option<&'a [u8]> {
        let end = self.pos.checked_add(n)?;
        let slice = self.data.get(self.pos..end)?;
        self.pos = end;
        Some(slice)
    }
}

/// Node counts per layer for `count` outputs. Empty for an empty tree.
fn layer_sizes(count: u64) -> Vec<u64> {
    let mut sizes = Vec::new();
    if count == 0 {
        return sizes;
    }
    let mut n = count.div_ceil(WIDTH);
    sizes.push(n);
    while n > 1 {
        n = n.div_ceil(WIDTH);
        sizes.push(n);
    }
    sizes
}

fn children_of(parent: u64, layer_below: u64) -> std::ops::Range<u64> {
    let start = parent * WIDTH;
    start..layer_below.min(start + WIDTH)
}

/// Curve tree over a pluggable storage backend
pub struct CurveTree<T: TreeStorage> {
    storage: T,
    hasher: PedersenHash,
    output_count: u64,
    depth: usize,
}

impl CurveTree<MemoryTreeStorage> {
    pub fn in_memory() -> Result<Self> {
        Self::open(MemoryTreeStorage::new())
    }
}

impl<T: TreeStorage> CurveTree<T> {
    /// Load a tree from storage, empty if nothing was stored.
    pub fn open(storage: T) -> Result<Self> {
        let hasher = PedersenHash::new(TREE_HASH_SEED, LEAF_ELEMENTS)?;
        let output_count = storage.output_count()?;
        let depth = storage.get_meta(META_DEPTH)?.unwrap_or(0) as usize;
        if depth != layer_sizes(output_count).len() {
            return Err(Error::Database(format!(
                "stored depth {} does not fit {} outputs",
                depth, output_count
            )));
        }
        Ok(Self { storage, hasher, output_count, depth })
    }

    pub fn output_count(&self) -> u64 {
        self.output_count
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn is_empty(&self) -> bool {
        self.output_count == 0
    }

    pub fn storage(&self) -> &T {
        &self.storage
    }

    pub fn root(&self) -> Result<EdPoint> {
        if self.depth == 0 {
            return Ok(EdPoint::from_point(&self.hasher.init()));
        }
        let top = TreeIndex::new(self.depth as u32 - 1, 0);
        Ok(self.node(top)?.hash)
    }

    pub fn output(&self, index: u64) -> Result<Option<OutputTuple>> {
        if index >= self.output_count {
            return Ok(None);
        }
        Ok(self.storage.get_output(index)?)
    }

    fn node(&self, index: TreeIndex) -> Result<TreeNode> {
        self.storage
            .get_node(index)?
            .ok_or_else(|| Error::Database(format!("missing tree node {:?}", index)))
    }

    fn node_point(&self, index: TreeIndex) -> Result<EdwardsPoint> {
        let node = self.node(index)?;
        node.hash
            .decompress()
            .ok_or_else(|| Error::Database(format!("tree node {:?} is not a point", index)))
    }

    fn stored_output(&self, index: u64) -> Result<OutputTuple> {
        self.storage
            .get_output(index)?
            .ok_or_else(|| Error::Database(format!("missing tree output {}", index)))
    }

    fn leaf_elements(&self, node: u64, count: u64) -> Result<Vec<Scalar>> {
        let mut elements = Vec::with_capacity(LEAF_ELEMENTS);
        for i in children_of(node, count) {
            elements.extend_from_slice(&self.stored_output(i)?.to_elements());
        }
        Ok(elements)
    }

    /// Append outputs and return the new root.
    pub fn add_outputs(&mut self, outputs: &[OutputTuple]) -> Result<EdPoint> {
        self.add_outputs_with(outputs, TreeBatch::new())
    }

    /// Append outputs, committing `extra` in the same batch.
    fn add_outputs_with(&mut self, outputs: &[OutputTuple], extra: TreeBatch) -> Result<EdPoint> {
        if outputs.is_empty() {
            if !extra.is_empty() {
                self.storage.write(extra)?;
            }
            return self.root();
        }
        if let Some(bad) = outputs.iter().position(|o| !o.is_valid()) {
            return Err(Error::InvalidInput(format!("output tuple {} has invalid points", bad)));
        }

        let old_count = self.output_count;
        let new_count = old_count
            .checked_add(outputs.len() as u64)
            .ok_or_else(|| Error::InvalidInput("output count overflow".into()))?;
        let old_sizes = layer_sizes(old_count);
        let new_sizes = layer_sizes(new_count);
        if new_sizes.len() > MAX_DEPTH {
            return Err(Error::InvalidInput(format!("tree would exceed depth {}", MAX_DEPTH)));
        }

        let mut batch = TreeBatch::new();
        let mut written: HashMap<TreeIndex, EdwardsPoint> = HashMap::new();
        for (k, output) in outputs.iter().enumerate() {
            batch.put_output(old_count + k as u64, output);
        }

        // (node index, previous hash, new hash) for the layer just updated
        let mut changes: Vec<(u64, Option<EdwardsPoint>, EdwardsPoint)> = Vec::new();
        for node in old_count / WIDTH..=(new_count - 1) / WIDTH {
            let start = old_count.max(node * WIDTH);
            let end = new_count.min((node + 1) * WIDTH);
            let index = TreeIndex::new(0, node);
            let previous = if node < old_sizes.first().copied().unwrap_or(0) {
                Some(self.node_point(index)?)
            } else {
                None
            };

            let mut elements = Vec::with_capacity(((end - start) as usize) * ELEMENTS_PER_OUTPUT);
            for i in start..end {
                elements.extend_from_slice(&outputs[(i - old_count) as usize].to_elements());
            }
            let offset = ((start - node * WIDTH) as usize) * ELEMENTS_PER_OUTPUT;
            let base = previous.unwrap_or_else(|| self.hasher.init());
            let hash = self.hasher.grow(&base, offset, &elements)?;

            let node_record = TreeNode {
                hash: EdPoint::from_point(&hash),
                children: (end - node * WIDTH) as u32,
            };
            batch.put_node(index, &node_record)?;
            written.insert(index, hash);
            changes.push((node, previous, hash));
        }

        for layer in 1..new_sizes.len() {
            let below = new_sizes[layer - 1];
            let existed = old_sizes.get(layer).copied().unwrap_or(0);
            let mut grouped: BTreeMap<u64, Vec<(u64, Option<EdwardsPoint>, EdwardsPoint)>> = BTreeMap::new();
            for change in changes.drain(..) {
                grouped.entry(change.0 / WIDTH).or_default().push(change);
            }

            for (parent, children) in grouped {
                let index = TreeIndex::new(layer as u32, parent);
                let (previous, hash) = if parent < existed {
                    let previous = self.node_point(index)?;
                    let mut hash = previous;
                    for (child, old, new) in children {
                        let offset = (child % WIDTH) as usize;
                        if let Some(old) = old {
                            hash = self.hasher.trim(&hash, offset, &[child_scalar(&old)])?;
                        }
                        hash = self.hasher.grow(&hash, offset, &[child_scalar(&new)])?;
                    }
                    (Some(previous), hash)
                } else {
                    let mut scalars = Vec::with_capacity(TREE_WIDTH);
                    for child in children_of(parent, below) {
                        let child_index = TreeIndex::new(layer as u32 - 1, child);
                        let point = match written.get(&child_index) {
                            Some(p) => *p,
                            None => self.node_point(child_index)?,
                        };
                        scalars.push(child_scalar(&point));
                    }
                    (None, self.hasher.hash(&scalars)?)
                };

                let node_record = TreeNode {
                    hash: EdPoint::from_point(&hash),
                    children: (children_of(parent, below).end - parent * WIDTH) as u32,
                };
                batch.put_node(index, &node_record)?;
                written.insert(index, hash);
                changes.push((parent, previous, hash));
            }
        }

        batch.put_meta(META_OUTPUT_COUNT, new_count);
        batch.put_meta(META_DEPTH, new_sizes.len() as u64);
        batch.extend(extra);
        self.storage.write(batch)?;
        self.output_count = new_count;
        self.depth = new_sizes.len();

        let root = self.root()?;
        debug!(added = outputs.len(), count = new_count, depth = self.depth, root = %root.to_hex(), "curve tree grown");
        Ok(root)
    }

    /// Remove every output at index `new_count` and above.
    pub fn truncate(&mut self, new_count: u64) -> Result<EdPoint> {
        self.truncate_with(new_count, TreeBatch::new())
    }

    fn truncate_with(&mut self, new_count: u64, extra: TreeBatch) -> Result<EdPoint> {
        let old_count = self.output_count;
        if new_count > old_count {
            return Err(Error::InvalidInput(format!(
                "cannot truncate {} outputs to {}",
                old_count, new_count
            )));
        }
        if new_count == old_count {
            if !extra.is_empty() {
                self.storage.write(extra)?;
            }
            return self.root();
        }

        let old_sizes = layer_sizes(old_count);
        let new_sizes = layer_sizes(new_count);
        let mut batch = TreeBatch::new();
        for i in new_count..old_count {
            batch.delete_output(i);
        }

        let mut rewritten: Option<EdwardsPoint> = None;
        for (layer, &old_size) in old_sizes.iter().enumerate() {
            let new_size = new_sizes.get(layer).copied().unwrap_or(0);
            for node in new_size..old_size {
                batch.delete_node(TreeIndex::new(layer as u32, node));
            }
            if new_size == 0 {
                continue;
            }

            // Only the rightmost surviving node lost children.
            let last = new_size - 1;
            let (scalars, children) = if layer == 0 {
                let range = children_of(last, new_count);
                (self.leaf_elements(last, new_count)?, range.end - range.start)
            } else {
                let below = new_sizes[layer - 1];
                let range = children_of(last, below);
                let mut scalars = Vec::with_capacity(TREE_WIDTH);
                for child in range.clone() {
                    let point = if child == below - 1 {
                        match rewritten {
                            Some(p) => p,
                            None => self.node_point(TreeIndex::new(layer as u32 - 1, child))?,
                        }
                    } else {
                        self.node_point(TreeIndex::new(layer as u32 - 1, child))?
                    };
                    scalars.push(child_scalar(&point));
                }
                (scalars, range.end - range.start)
            };
            let hash = self.hasher.hash(&scalars)?;
            batch.put_node(
                TreeIndex::new(layer as u32, last),
                &TreeNode { hash: EdPoint::from_point(&hash), children: children as u32 },
            )?;
            rewritten = Some(hash);
        }

        batch.put_meta(META_OUTPUT_COUNT, new_count);
        batch.put_meta(META_DEPTH, new_sizes.len() as u64);
        batch.extend(extra);
        self.storage.write(batch)?;
        self.output_count = new_count;
        self.depth = new_sizes.len();

        let root = self.root()?;
        info!(removed = old_count - new_count, count = new_count, depth = self.depth, "curve tree truncated");
        Ok(root)
    }

    /// Height of the last block appended with `append_block`
    pub fn tip_height(&self) -> Result<Option<u64>> {
        Ok(self.storage.get_meta(META_TIP)?.and_then(|v| v.checked_sub(1)))
    }

    /// Output count when block `height` started, if that block is recorded
    pub fn block_start(&self, height: u64) -> Result<Option<u64>> {
        Ok(self.storage.get_meta(&block_meta_name(height))?)
    }

    /// Output count once block `height` was applied. Zero before the first
    /// recorded block.
    pub fn count_after_block(&self, height: u64) -> Result<u64> {
        let Some(tip) = self.tip_height()? else {
            return Ok(0);
        };
        if height >= tip {
            return Ok(self.output_count);
        }
        Ok(self.block_start(height + 1)?.unwrap_or(0))
    }

    /// Append the outputs of block `height`, which must follow the tip.
    pub fn append_block(&mut self, height: u64, outputs: &[OutputTuple]) -> Result<EdPoint> {
        if let Some(tip) = self.tip_height()? {
            if tip.checked_add(1) != Some(height) {
                return Err(Error::Consensus(format!("block {} does not extend tip {}", height, tip)));
            }
        }
        let marker = height
            .checked_add(1)
            .ok_or_else(|| Error::InvalidInput("block height overflow".into()))?;
        let mut extra = TreeBatch::new();
        extra.put_meta(&block_meta_name(height), self.output_count);
        extra.put_meta(META_TIP, marker);
        self.add_outputs_with(outputs, extra)
    }

    /// Remove the outputs of the tip block `height`.
    pub fn revert_block(&mut self, height: u64) -> Result<EdPoint> {
        if self.tip_height()? != Some(height) {
            return Err(Error::Consensus(format!("block {} is not the tree tip", height)));
        }
        let start = self
            .block_start(height)?
            .ok_or_else(|| Error::Database(format!("no record of block {}", height)))?;
        let mut extra = TreeBatch::new();
        extra.delete_meta(&block_meta_name(height));
        // The previous block becomes the tip only if it was recorded too.
        let previous = match height.checked_sub(1) {
            Some(prev) if self.block_start(prev)?.is_some() => prev + 1,
            _ => 0,
        };
        extra.put_meta(META_TIP, previous);
        self.truncate_with(start, extra)
    }

    /// Hashes of every layer recomputed from the stored outputs
    fn compute_layers(&self) -> Result<Vec<Vec<EdwardsPoint>>> {
        let sizes = layer_sizes(self.output_count);
        let mut layers: Vec<Vec<EdwardsPoint>> = Vec::with_capacity(sizes.len());
        for (layer, &size) in sizes.iter().enumerate() {
            let mut hashes = Vec::with_capacity(size as usize);
            for node in 0..size {
                let scalars = if layer == 0 {
                    self.leaf_elements(node, self.output_count)?
                } else {
                    let below = &layers[layer - 1];
                    children_of(node, below.len() as u64)
                        .map(|c| child_scalar(&below[c as usize]))
                        .collect()
                };
                hashes.push(self.hasher.hash(&scalars)?);
            }
            layers.push(hashes);
        }
        Ok(layers)
    }

    /// Recompute every node from the stored outputs and persist them.
    pub fn rebuild(&mut self) -> Result<EdPoint> {
        let layers = self.compute_layers()?;
        let mut batch = TreeBatch::new();
        for (layer, hashes) in layers.iter().enumerate() {
            let below = if layer == 0 {
                self.output_count
            } else {
                layers[layer - 1].len() as u64
            };
            for (node, hash) in hashes.iter().enumerate() {
                let range = children_of(node as u64, below);
                batch.put_node(
                    TreeIndex::new(layer as u32, node as u64),
                    &TreeNode { hash: EdPoint::from_point(hash), children: (range.end - range.start) as u32 },
                )?;
            }
        }
        batch.put_meta(META_DEPTH, layers.len() as u64);
        self.storage.write(batch)?;
        self.depth = layers.len();
        info!(count = self.output_count, depth = self.depth, "curve tree rebuilt");
        self.root()
    }

    /// Do the stored nodes match a full recomputation?
    pub fn verify_integrity(&self) -> Result<bool> {
        let layers = self.compute_layers()?;
        if layers.len() != self.depth {
            return Ok(false);
        }
        for (layer, hashes) in layers.iter().enumerate() {
            for (node, hash) in hashes.iter().enumerate() {
                match self.storage.get_node(TreeIndex::new(layer as u32, node as u64))? {
                    Some(stored) if stored.hash == EdPoint::from_point(hash) => {}
                    _ => return Ok(false),
                }
            }
        }
        Ok(true)
    }

    /// Authentication path for the output at `leaf_index`.
    pub fn branch(&self, leaf_index: u64) -> Result<TreeBranch> {
        if leaf_index >= self.output_count {
            return Err(Error::InvalidInput(format!(
                "leaf {} out of range ({} outputs)",
                leaf_index, self.output_count
            )));
        }
        let sizes = layer_sizes(self.output_count);
        let mut layers = Vec::with_capacity(sizes.len());

        let mut node = leaf_index / WIDTH;
        layers.push(
            self.leaf_elements(node, self.output_count)?
                .iter()
                .map(|s| s.to_bytes())
                .collect(),
        );
        for layer in 1..sizes.len() {
            let parent = node / WIDTH;
            let mut elements = Vec::with_capacity(TREE_WIDTH);
            for child in children_of(parent, sizes[layer - 1]) {
                elements.push(self.node(TreeIndex::new(layer as u32 - 1, child))?.hash.0);
            }
            layers.push(elements);
            node = parent;
        }
        Ok(TreeBranch { leaf_index, layers })
    }

    /// Check that `output` sits at `branch.leaf_index` under `root`.
    pub fn verify_branch(&self, root: &EdPoint, output: &OutputTuple, branch: &TreeBranch) -> bool {
        verify_branch_with(&self.hasher, root, output, branch)
    }

    pub fn flush(&mut self) -> Result<()> {
        self.storage.flush()?;
        Ok(())
    }
}

/// Full path verification: the output's elements sit at the right
/// position of the leaf node and every layer hashes into the next.
pub fn verify_branch_with(hasher: &PedersenHash, root: &EdPoint, output: &OutputTuple, branch: &TreeBranch) -> bool {
    if branch.layers.is_empty() || branch.layers.len() > MAX_DEPTH {
        return false;
    }

    let leaf = &branch.layers[0];
    let position = (branch.leaf_index % WIDTH) as usize * ELEMENTS_PER_OUTPUT;
    if leaf.len() % ELEMENTS_PER_OUTPUT != 0 || leaf.len() > LEAF_ELEMENTS || position >= leaf.len() {
        return false;
    }
    let expected = output.to_elements();
    if leaf[position..position + ELEMENTS_PER_OUTPUT]
        .iter()
        .zip(expected.iter())
        .any(|(got, want)| *got != want.to_bytes())
    {
        return false;
    }
    let Some(scalars) = leaf.iter().map(scalar_from_canonical).collect::<Option<Vec<_>>>() else {
        return false;
    };
    let Ok(mut hash) = hasher.hash(&scalars) else {
        return false;
    };

    let mut node = branch.leaf_index / WIDTH;
    for layer in &branch.layers[1..] {
        let position = (node % WIDTH) as usize;
        if layer.is_empty() || layer.len() > TREE_WIDTH || position >= layer.len() {
            return false;
        }
        if layer[position] != hash.compress().to_bytes() {
            return false;
        }
        let mut scalars = Vec::with_capacity(layer.len());
        for element in layer {
            let Some(point) = EdPoint(*element).decompress() else {
                return false;
            };
            scalars.push(child_scalar(&point));
        }
        let Ok(next) = hasher.hash(&scalars) else {
            return false;
        };
        hash = next;
        node /= WIDTH;
    }

    node == 0 && EdPoint::from_point(&hash) == *root
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::ed25519::{basepoint, hash_to_point};
    use crate::crypto::scalar::random_nonzero_scalar;
    use rand::rngs::OsRng;

    fn random_tuple() -> OutputTuple {
        let o = random_nonzero_scalar(&mut OsRng) * basepoint();
        let i = hash_to_point(o.compress().as_bytes()).unwrap();
        let c = random_nonzero_scalar(&mut OsRng) * basepoint();
        OutputTuple::new(o.into(), i.into(), c.into())
    }

    fn tuples(n: usize) -> Vec<OutputTuple> {
        (0..n).map(|_| random_tuple()).collect()
    }

    #[test]
    fn test_layer_sizes() {
        assert!(layer_sizes(0).is_empty());
        assert_eq!(layer_sizes(1), vec![1]);
        assert_eq!(layer_sizes(38), vec![1]);
        assert_eq!(layer_sizes(39), vec![2, 1]);
        assert_eq!(layer_sizes(38 * 38 + 1), vec![39, 2, 1]);
    }

    #[test]
    fn test_output_tuple_encoding() {
        let t = random_tuple();
        assert!(t.is_valid());
        assert_eq!(OutputTuple::from_bytes(&t.to_bytes()), Some(t));
        assert!(OutputTuple::from_bytes(&[0u8; 95]).is_none());

        let mut bad = t;
        bad.c = EdPoint::identity();
        assert!(!bad.is_valid());
        assert_ne!(random_tuple().to_elements(), t.to_elements());
    }

    #[test]
    fn test_empty_root_is_init() {
        let tree = CurveTree::in_memory().unwrap();
        assert_eq!(tree.depth(), 0);
        let hasher = PedersenHash::new(TREE_HASH_SEED, 1).unwrap();
        assert_eq!(tree.root().unwrap(), EdPoint::from_point(&hasher.init()));
    }

    #[test]
    fn test_incremental_matches_rebuild() {
        let outputs = tuples(90);
        let mut incremental = CurveTree::in_memory().unwrap();
        incremental.add_outputs(&outputs[..1]).unwrap();
        incremental.add_outputs(&outputs[1..37]).unwrap();
        incremental.add_outputs(&outputs[37..40]).unwrap();
        let root = incremental.add_outputs(&outputs[40..]).unwrap();

        let mut bulk = CurveTree::in_memory().unwrap();
        assert_eq!(bulk.add_outputs(&outputs).unwrap(), root);
        assert_eq!(incremental.depth(), 2);
        assert!(incremental.verify_integrity().unwrap());
        assert_eq!(incremental.rebuild().unwrap(), root);
    }

    #[test]
    fn test_truncate_restores_previous_root() {
        let outputs = tuples(80);
        let mut tree = CurveTree::in_memory().unwrap();
        tree.add_outputs(&outputs[..30]).unwrap();
        let root_30 = tree.root().unwrap();
        tree.add_outputs(&outputs[30..]).unwrap();
        assert_eq!(tree.depth(), 2);

        assert_eq!(tree.truncate(30).unwrap(), root_30);
        assert_eq!(tree.depth(), 1);
        assert_eq!(tree.output_count(), 30);
        assert!(tree.output(30).unwrap().is_none());
        assert!(tree.verify_integrity().unwrap());

        let empty = tree.truncate(0).unwrap();
        assert_eq!(empty, CurveTree::in_memory().unwrap().root().unwrap());
        assert_eq!(tree.depth(), 0);
        assert!(tree.storage().get_output(0).unwrap().is_none());
        assert!(tree.truncate(1).is_err());
    }

    #[test]
    fn test_branch_verifies() {
        let outputs = tuples(100);
        let mut tree = CurveTree::in_memory().unwrap();
        let root = tree.add_outputs(&outputs).unwrap();

        for leaf in [0u64, 37, 38, 99] {
            let branch = tree.branch(leaf).unwrap();
            assert_eq!(branch.depth(), 2);
            assert!(tree.verify_branch(&root, &outputs[leaf as usize], &branch));
            assert!(!tree.verify_branch(&root, &outputs[(leaf as usize + 1) % 100], &branch));
            assert_eq!(TreeBranch::from_bytes(&branch.to_bytes()), Some(branch));
        }
        assert!(tree.branch(100).is_err());
    }

    #[test]
    fn test_branch_rejects_wrong_root_and_tampering() {
        let outputs = tuples(40);
        let mut tree = CurveTree::in_memory().unwrap();
        let root = tree.add_outputs(&outputs).unwrap();
        let mut branch = tree.branch(5).unwrap();

        assert!(!tree.verify_branch(&EdPoint::from_point(&basepoint()), &outputs[5], &branch));
        branch.leaf_index = 6;
        assert!(!tree.verify_branch(&root, &outputs[5], &branch));
        branch.leaf_index = 5;
        branch.layers[0].push([0u8; 32]);
        assert!(!tree.verify_branch(&root, &outputs[5], &branch));
    }

    #[test]
    fn test_branch_decoding_limits() {
        let mut bytes = 0u64.to_le_bytes().to_vec();
        bytes.extend_from_slice(&(MAX_DEPTH as u32 + 1).to_le_bytes());
        assert!(TreeBranch::from_bytes(&bytes).is_none());

        let branch = TreeBranch { leaf_index: 3, layers: vec![vec![[1u8; 32]]] };
        let mut encoded = branch.to_bytes();
        encoded.push(0);
        assert!(TreeBranch::from_bytes(&encoded).is_none());
    }

    #[test]
    fn test_invalid_outputs_rejected() {
        let mut tree = CurveTree::in_memory().unwrap();
        let mut bad = random_tuple();
        bad.o = EdPoint([0xff; 32]);
        assert!(tree.add_outputs(&[random_tuple(), bad]).is_err());
        assert_eq!(tree.output_count(), 0);
    }

    #[test]
    fn test_block_append_and_revert() {
        let outputs = tuples(50);
        let mut tree = CurveTree::in_memory().unwrap();
        assert_eq!(tree.tip_height().unwrap(), None);
        let empty_root = tree.root().unwrap();

        let root_a = tree.append_block(7, &outputs[..30]).unwrap();
        tree.append_block(8, &[]).unwrap();
        let root_c = tree.append_block(9, &outputs[30..]).unwrap();
        assert_eq!(tree.tip_height().unwrap(), Some(9));
        assert!(tree.append_block(11, &outputs[..1]).is_err());

        assert_eq!(tree.count_after_block(6).unwrap(), 0);
        assert_eq!(tree.count_after_block(7).unwrap(), 30);
        assert_eq!(tree.count_after_block(8).unwrap(), 30);
        assert_eq!(tree.count_after_block(9).unwrap(), 50);
        assert_eq!(root_c, CurveTree::in_memory().unwrap().add_outputs(&outputs).unwrap());

        assert!(tree.revert_block(8).is_err());
        assert_eq!(tree.revert_block(9).unwrap(), root_a);
        assert_eq!(tree.tip_height().unwrap(), Some(8));
        assert_eq!(tree.revert_block(8).unwrap(), root_a);
        assert_eq!(tree.revert_block(7).unwrap(), empty_root);
        assert_eq!(tree.tip_height().unwrap(), None);
        assert!(tree.revert_block(6).is_err());

        // a fresh chain may start anywhere once the tip is cleared
        tree.append_block(100, &outputs[..2]).unwrap();
        assert_eq!(tree.output_count(), 2);
    }
}
