//! A disk-backed B-tree over opaque byte-string keys and values.
//!
//! One node occupies one page of the backing [`Pager`]. The root always
//! lives at page 0 and is lazily created as an empty leaf. Node images are
//! bincode-encoded and guarded by a crc32 checksum:
//! `[payload_len:4 LE][crc:4 LE][bincode bytes]`.

use std::cmp::Ordering;
use std::ops::Bound;
use std::path::Path;

use crc32fast::Hasher;
use serde::{Deserialize, Serialize};

use crate::error::{Error, ErrorKind, Result};
use crate::pager::Pager;
use crate::PageId;

pub const DEFAULT_DEGREE: usize = 2;

/// Nodes are small (a handful of keys), so the tree runs its pager on a
/// much tighter stride than the table-page size.
pub const NODE_PAGE_SIZE: usize = 1024;

const ROOT_PAGE_ID: PageId = 0;
const NODE_FRAME_HEADER: usize = 8;

/// A key/value pair stored in the tree.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Entry {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Node {
    page_id: PageId,
    leaf: bool,
    keys: Vec<Entry>,
    children: Vec<PageId>,
}

impl Node {
    fn new(page_id: PageId, leaf: bool) -> Self {
        Self {
            page_id,
            leaf,
            keys: Vec::new(),
            children: Vec::new(),
        }
    }

    fn search(&self, key: &[u8]) -> std::result::Result<usize, usize> {
        self.keys.binary_search_by(|e| e.key.as_slice().cmp(key))
    }
}

pub struct BTree {
    pager: Pager,
    degree: usize,
}

impl BTree {
    /// Opens a new or existing B-tree backed by the file at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with_degree(path, DEFAULT_DEGREE)
    }

    pub fn open_with_degree<P: AsRef<Path>>(path: P, degree: usize) -> Result<Self> {
        let path = path.as_ref();
        if path.as_os_str().is_empty() {
            return Err(Error::new(ErrorKind::InvalidTableName, "empty index file path"));
        }
        Ok(Self {
            pager: Pager::open_with_page_size(path, NODE_PAGE_SIZE)?,
            degree,
        })
    }

    pub fn close(&mut self) -> Result<()> {
        self.pager.close()
    }

    fn max_keys(&self) -> usize {
        2 * self.degree - 1
    }

    /// Inserts `key` → `value`. Duplicate keys are an error; the caller
    /// layering keeps composite keys unique.
    pub fn insert(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        let mut root = self.root()?;
        if root.keys.len() == self.max_keys() {
            // Move the old root's contents to a fresh page so the root
            // keeps page id 0, then split the moved node from above.
            let moved_page = self.reserve_page(root.leaf)?;
            root.page_id = moved_page;
            self.write_node(&root)?;

            let mut new_root = Node::new(ROOT_PAGE_ID, false);
            new_root.children.push(moved_page);
            self.split_child(&mut new_root, 0)?;
            root = new_root;
        }
        self.insert_non_full(&mut root, key, value)
    }

    /// Point lookup.
    pub fn get(&mut self, key: &[u8]) -> Result<Option<Entry>> {
        let mut node = self.root()?;
        loop {
            match node.search(key) {
                Ok(i) => return Ok(Some(node.keys[i].clone())),
                Err(i) => {
                    if node.leaf {
                        return Ok(None);
                    }
                    node = self.read_node(node.children[i])?;
                }
            }
        }
    }

    /// Removes `key`, returning whether it was present. Pages emptied by
    /// merges are handed back to the pager.
    pub fn remove(&mut self, key: &[u8]) -> Result<bool> {
        let mut root = self.root()?;
        let removed = self.remove_from(&mut root, key)?;

        // An emptied non-leaf root adopts its sole child without giving up
        // page 0.
        let mut root = self.read_node(ROOT_PAGE_ID)?;
        if root.keys.is_empty() && !root.leaf {
            let child = self.read_node(root.children[0])?;
            let child_page = child.page_id;
            root.leaf = child.leaf;
            root.keys = child.keys;
            root.children = child.children;
            self.write_node(&root)?;
            self.pager.delete(child_page)?;
        }
        Ok(removed)
    }

    /// All entries with key < `key`, ascending.
    pub fn less_than(&mut self, key: &[u8]) -> Result<Vec<Entry>> {
        self.range(Bound::Unbounded, Bound::Excluded(key.to_vec()))
    }

    /// All entries with key <= `key`, ascending.
    pub fn less_than_or_equal(&mut self, key: &[u8]) -> Result<Vec<Entry>> {
        self.range(Bound::Unbounded, Bound::Included(key.to_vec()))
    }

    /// All entries with key > `key`, ascending.
    pub fn greater_than(&mut self, key: &[u8]) -> Result<Vec<Entry>> {
        self.range(Bound::Excluded(key.to_vec()), Bound::Unbounded)
    }

    /// All entries with key >= `key`, ascending.
    pub fn greater_than_or_equal(&mut self, key: &[u8]) -> Result<Vec<Entry>> {
        self.range(Bound::Included(key.to_vec()), Bound::Unbounded)
    }

    /// All entries whose key begins with `prefix`, ascending.
    pub fn get_prefix(&mut self, prefix: &[u8]) -> Result<Vec<Entry>> {
        let upper = match prefix_successor(prefix) {
            Some(s) => Bound::Excluded(s),
            None => Bound::Unbounded,
        };
        self.range(Bound::Included(prefix.to_vec()), upper)
    }

    /// Total number of keys, via depth-first traversal.
    pub fn size(&mut self) -> Result<usize> {
        let root = self.root()?;
        self.count(&root)
    }

    fn count(&mut self, node: &Node) -> Result<usize> {
        let mut total = node.keys.len();
        if !node.leaf {
            for child in node.children.clone() {
                let child = self.read_node(child)?;
                total += self.count(&child)?;
            }
        }
        Ok(total)
    }

    fn range(&mut self, lower: Bound<Vec<u8>>, upper: Bound<Vec<u8>>) -> Result<Vec<Entry>> {
        let root = self.root()?;
        let mut out = Vec::new();
        self.collect_range(&root, &lower, &upper, &mut out)?;
        Ok(out)
    }

    /// In-order traversal pruned with per-node bounds: a pre-key child is
    /// only entered when the separators around it leave the range
    /// satisfiable, and the walk stops at the first key past the upper
    /// bound.
    fn collect_range(
        &mut self,
        node: &Node,
        lower: &Bound<Vec<u8>>,
        upper: &Bound<Vec<u8>>,
        out: &mut Vec<Entry>,
    ) -> Result<()> {
        let n = node.keys.len();
        for i in 0..n {
            let key = node.keys[i].key.as_slice();
            if !node.leaf && child_in_play(node, i, lower, upper) {
                let child = self.read_node(node.children[i])?;
                self.collect_range(&child, lower, upper, out)?;
            }
            if within_lower(key, lower) && within_upper(key, upper) {
                out.push(node.keys[i].clone());
            }
            if past_upper(key, upper) {
                return Ok(());
            }
        }
        if !node.leaf {
            if let Some(&last) = node.children.get(n) {
                let child = self.read_node(last)?;
                self.collect_range(&child, lower, upper, out)?;
            }
        }
        Ok(())
    }

    fn insert_non_full(&mut self, node: &mut Node, key: &[u8], value: &[u8]) -> Result<()> {
        match node.search(key) {
            Ok(_) => Err(duplicate(key)),
            Err(mut i) => {
                if node.leaf {
                    node.keys.insert(
                        i,
                        Entry {
                            key: key.to_vec(),
                            value: value.to_vec(),
                        },
                    );
                    return self.write_node(node);
                }
                let mut child = self.read_node(node.children[i])?;
                if child.keys.len() == self.max_keys() {
                    self.split_child(node, i)?;
                    // The promoted separator decides which half to descend
                    // into.
                    match key.cmp(node.keys[i].key.as_slice()) {
                        Ordering::Equal => return Err(duplicate(key)),
                        Ordering::Greater => i += 1,
                        Ordering::Less => {}
                    }
                    child = self.read_node(node.children[i])?;
                }
                self.insert_non_full(&mut child, key, value)
            }
        }
    }

    /// Splits the full child at `x.children[i]`, promoting its median key
    /// into `x`.
    fn split_child(&mut self, x: &mut Node, i: usize) -> Result<()> {
        let t = self.degree;
        let mut y = self.read_node(x.children[i])?;
        let mut z = self.alloc_node(y.leaf)?;

        z.keys = y.keys.split_off(t);
        let mid = y
            .keys
            .pop()
            .ok_or_else(|| Error::new(ErrorKind::BTreeWrite, "split of a non-full node"))?;
        if !y.leaf {
            z.children = y.children.split_off(t);
        }

        x.keys.insert(i, mid);
        x.children.insert(i + 1, z.page_id);

        self.write_node(&y)?;
        self.write_node(&z)?;
        self.write_node(x)
    }

    fn remove_from(&mut self, node: &mut Node, key: &[u8]) -> Result<bool> {
        let t = self.degree;
        match node.search(key) {
            Ok(i) => {
                if node.leaf {
                    node.keys.remove(i);
                    self.write_node(node)?;
                    return Ok(true);
                }
                let mut left = self.read_node(node.children[i])?;
                if left.keys.len() >= t {
                    // Replace with the in-order predecessor, then delete the
                    // predecessor out of the left subtree.
                    let pred = self.max_entry(&left)?;
                    node.keys[i] = pred.clone();
                    self.write_node(node)?;
                    self.remove_from(&mut left, &pred.key)?;
                    return Ok(true);
                }
                let mut right = self.read_node(node.children[i + 1])?;
                if right.keys.len() >= t {
                    let succ = self.min_entry(&right)?;
                    node.keys[i] = succ.clone();
                    self.write_node(node)?;
                    self.remove_from(&mut right, &succ.key)?;
                    return Ok(true);
                }
                // Neither neighbor can spare a key: fold the separator and
                // the right sibling into the left child and retry there.
                let sep = node.keys.remove(i);
                node.children.remove(i + 1);
                left.keys.push(sep);
                left.keys.append(&mut right.keys);
                left.children.append(&mut right.children);
                self.write_node(node)?;
                self.write_node(&left)?;
                self.pager.delete(right.page_id)?;
                self.remove_from(&mut left, key)
            }
            Err(i) => {
                if node.leaf {
                    return Ok(false);
                }
                let mut idx = i;
                let mut child = self.read_node(node.children[idx])?;
                if child.keys.len() < t {
                    // Top up the child before descending so the deletion
                    // below never underflows it.
                    idx = self.fill_child(node, idx)?;
                    child = self.read_node(node.children[idx])?;
                }
                self.remove_from(&mut child, key)
            }
        }
    }

    /// Brings `node.children[idx]` up to at least `t` keys by borrowing
    /// from a sibling or merging with one. Returns the index the caller
    /// should descend into (it shifts left when the child merges into its
    /// left sibling).
    fn fill_child(&mut self, node: &mut Node, idx: usize) -> Result<usize> {
        let t = self.degree;
        let mut child = self.read_node(node.children[idx])?;

        if idx > 0 {
            let mut left = self.read_node(node.children[idx - 1])?;
            if left.keys.len() >= t {
                // Rotate the right-most entry of the left sibling through
                // the parent.
                let sep = std::mem::replace(
                    &mut node.keys[idx - 1],
                    left.keys.pop().ok_or_else(empty_sibling)?,
                );
                child.keys.insert(0, sep);
                if !child.leaf {
                    child
                        .children
                        .insert(0, left.children.pop().ok_or_else(empty_sibling)?);
                }
                self.write_node(&left)?;
                self.write_node(&child)?;
                self.write_node(node)?;
                return Ok(idx);
            }
        }

        if idx + 1 < node.children.len() {
            let mut right = self.read_node(node.children[idx + 1])?;
            if right.keys.len() >= t {
                let sep = std::mem::replace(&mut node.keys[idx], right.keys.remove(0));
                child.keys.push(sep);
                if !child.leaf {
                    child.children.push(right.children.remove(0));
                }
                self.write_node(&right)?;
                self.write_node(&child)?;
                self.write_node(node)?;
                return Ok(idx);
            }
        }

        if idx + 1 < node.children.len() {
            // Merge the right sibling into the child.
            let mut right = self.read_node(node.children[idx + 1])?;
            child.keys.push(node.keys.remove(idx));
            child.keys.append(&mut right.keys);
            child.children.append(&mut right.children);
            node.children.remove(idx + 1);
            self.write_node(node)?;
            self.write_node(&child)?;
            self.pager.delete(right.page_id)?;
            Ok(idx)
        } else {
            // Right-most child: merge it into its left sibling.
            let mut left = self.read_node(node.children[idx - 1])?;
            left.keys.push(node.keys.remove(idx - 1));
            left.keys.append(&mut child.keys);
            left.children.append(&mut child.children);
            node.children.remove(idx);
            self.write_node(node)?;
            self.write_node(&left)?;
            self.pager.delete(child.page_id)?;
            Ok(idx - 1)
        }
    }

    fn max_entry(&mut self, node: &Node) -> Result<Entry> {
        if node.leaf {
            return node.keys.last().cloned().ok_or_else(empty_sibling);
        }
        let last = *node.children.last().ok_or_else(empty_sibling)?;
        let child = self.read_node(last)?;
        self.max_entry(&child)
    }

    fn min_entry(&mut self, node: &Node) -> Result<Entry> {
        if node.leaf {
            return node.keys.first().cloned().ok_or_else(empty_sibling);
        }
        let child = self.read_node(node.children[0])?;
        self.min_entry(&child)
    }

    /// Loads the root, creating an empty leaf at page 0 when the file is
    /// new.
    fn root(&mut self) -> Result<Node> {
        match self.pager.get(ROOT_PAGE_ID)? {
            Some(data) => decode_node(&data),
            None => {
                let root = Node::new(ROOT_PAGE_ID, true);
                self.write_node(&root)?;
                Ok(root)
            }
        }
    }

    fn read_node(&mut self, page_id: PageId) -> Result<Node> {
        let data = self.pager.get(page_id)?.ok_or_else(|| {
            Error::new(ErrorKind::BTreeRead, format!("missing node page {page_id}"))
        })?;
        decode_node(&data)
    }

    fn write_node(&mut self, node: &Node) -> Result<()> {
        let frame = encode_node(node)?;
        self.pager.write_to(node.page_id, &frame)
    }

    /// Reserves a page for a new empty node and returns the node.
    fn alloc_node(&mut self, leaf: bool) -> Result<Node> {
        let page_id = self.reserve_page(leaf)?;
        Ok(Node::new(page_id, leaf))
    }

    fn reserve_page(&mut self, leaf: bool) -> Result<PageId> {
        let placeholder = Node::new(0, leaf);
        let frame = encode_node(&placeholder)?;
        self.pager.write(&frame)
    }
}

fn duplicate(key: &[u8]) -> Error {
    Error::new(ErrorKind::DuplicateKey, format!("key: {key:?}"))
}

fn empty_sibling() -> Error {
    Error::new(ErrorKind::BTreeRead, "node unexpectedly empty")
}

fn encode_node(node: &Node) -> Result<Vec<u8>> {
    let payload =
        bincode::serialize(node).map_err(|e| Error::new(ErrorKind::BTreeWrite, e.to_string()))?;
    if NODE_FRAME_HEADER + payload.len() > NODE_PAGE_SIZE {
        return Err(Error::new(
            ErrorKind::NodeOverflow,
            format!(
                "node image of {} bytes exceeds the node page size of {}",
                NODE_FRAME_HEADER + payload.len(),
                NODE_PAGE_SIZE
            ),
        ));
    }
    let mut hasher = Hasher::new();
    hasher.update(&payload);
    let crc = hasher.finalize();

    let mut frame = Vec::with_capacity(NODE_FRAME_HEADER + payload.len());
    frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    frame.extend_from_slice(&crc.to_le_bytes());
    frame.extend_from_slice(&payload);
    Ok(frame)
}

fn decode_node(data: &[u8]) -> Result<Node> {
    if data.len() < NODE_FRAME_HEADER {
        return Err(Error::new(ErrorKind::BTreeRead, "node frame too short"));
    }
    let len = u32::from_le_bytes([data[0], data[1], data[2], data[3]]) as usize;
    if NODE_FRAME_HEADER + len > data.len() {
        return Err(Error::new(
            ErrorKind::BTreeRead,
            format!("node payload of {len} bytes does not fit its page"),
        ));
    }
    let crc = u32::from_le_bytes([data[4], data[5], data[6], data[7]]);
    let payload = &data[NODE_FRAME_HEADER..NODE_FRAME_HEADER + len];

    let mut hasher = Hasher::new();
    hasher.update(payload);
    if hasher.finalize() != crc {
        return Err(Error::new(ErrorKind::BTreeRead, "node crc mismatch"));
    }
    bincode::deserialize(payload).map_err(|e| Error::new(ErrorKind::BTreeRead, e.to_string()))
}

fn within_lower(key: &[u8], lower: &Bound<Vec<u8>>) -> bool {
    match lower {
        Bound::Unbounded => true,
        Bound::Included(b) => key >= b.as_slice(),
        Bound::Excluded(b) => key > b.as_slice(),
    }
}

fn within_upper(key: &[u8], upper: &Bound<Vec<u8>>) -> bool {
    match upper {
        Bound::Unbounded => true,
        Bound::Included(b) => key <= b.as_slice(),
        Bound::Excluded(b) => key < b.as_slice(),
    }
}

fn past_upper(key: &[u8], upper: &Bound<Vec<u8>>) -> bool {
    match upper {
        Bound::Unbounded => false,
        Bound::Included(b) | Bound::Excluded(b) => key >= b.as_slice(),
    }
}

/// Whether the subtree below `node.children[i]` (keys strictly between the
/// surrounding separators) can hold keys inside the bounds.
fn child_in_play(node: &Node, i: usize, lower: &Bound<Vec<u8>>, upper: &Bound<Vec<u8>>) -> bool {
    let lower_ok = match lower {
        Bound::Unbounded => true,
        Bound::Included(b) | Bound::Excluded(b) => node.keys[i].key.as_slice() > b.as_slice(),
    };
    let upper_ok = i == 0
        || match upper {
            Bound::Unbounded => true,
            Bound::Included(b) | Bound::Excluded(b) => {
                node.keys[i - 1].key.as_slice() < b.as_slice()
            }
        };
    lower_ok && upper_ok
}

/// The smallest byte string greater than every string starting with
/// `prefix`, or `None` when no such string exists (all `0xff`).
fn prefix_successor(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut p = prefix.to_vec();
    while let Some(&last) = p.last() {
        if last == 0xff {
            p.pop();
        } else {
            *p.last_mut().expect("non-empty") = last + 1;
            return Some(p);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::seq::SliceRandom;
    use rand::SeedableRng;
    use std::collections::BTreeMap;
    use tempfile::tempdir;

    fn key_of(i: u64) -> Vec<u8> {
        i.to_be_bytes().to_vec()
    }

    fn open_tree(dir: &tempfile::TempDir) -> BTree {
        BTree::open(dir.path().join("tree_idx.bin")).unwrap()
    }

    /// Walks the whole tree asserting the structural invariants: sorted
    /// keys per node, key-count bounds on non-roots, and uniform leaf
    /// depth.
    fn check_invariants(tree: &mut BTree) {
        let root = tree.root().unwrap();
        let mut leaf_depths = Vec::new();
        check_node(tree, &root, true, 0, &mut leaf_depths);
        leaf_depths.dedup();
        assert!(
            leaf_depths.len() <= 1,
            "leaves at differing depths: {leaf_depths:?}"
        );
    }

    fn check_node(tree: &mut BTree, node: &Node, is_root: bool, depth: usize, leaves: &mut Vec<usize>) {
        let t = tree.degree;
        if !is_root {
            assert!(
                node.keys.len() >= t - 1 && node.keys.len() <= 2 * t - 1,
                "node {} holds {} keys",
                node.page_id,
                node.keys.len()
            );
        }
        for pair in node.keys.windows(2) {
            assert!(pair[0].key < pair[1].key, "unsorted node {}", node.page_id);
        }
        if node.leaf {
            assert!(node.children.is_empty());
            leaves.push(depth);
        } else {
            assert_eq!(node.children.len(), node.keys.len() + 1);
            for child in node.children.clone() {
                let child = tree.read_node(child).unwrap();
                check_node(tree, &child, false, depth + 1, leaves);
            }
        }
    }

    #[test]
    fn test_insert_get_and_size() {
        let dir = tempdir().unwrap();
        let mut tree = open_tree(&dir);

        for i in 0..1000u64 {
            tree.insert(&key_of(i), &key_of(i)).unwrap();
        }
        assert_eq!(tree.size().unwrap(), 1000);
        check_invariants(&mut tree);

        for i in 0..1000u64 {
            let entry = tree.get(&key_of(i)).unwrap().unwrap();
            assert_eq!(entry.value, key_of(i));
        }
        assert!(tree.get(&key_of(5000)).unwrap().is_none());
        tree.close().unwrap();
    }

    #[test]
    fn range_counts_match_key_positions() {
        let dir = tempdir().unwrap();
        let mut tree = open_tree(&dir);
        for i in 0..1000u64 {
            tree.insert(&key_of(i), &key_of(i)).unwrap();
        }

        for i in (0..=1000u64).step_by(97) {
            let i_us = i as usize;
            assert_eq!(tree.less_than(&key_of(i)).unwrap().len(), i_us);
            assert_eq!(
                tree.less_than_or_equal(&key_of(i)).unwrap().len(),
                (i_us + 1).min(1000)
            );
            assert_eq!(
                tree.greater_than(&key_of(i)).unwrap().len(),
                999 - i_us.min(999)
            );
            assert_eq!(
                tree.greater_than_or_equal(&key_of(i)).unwrap().len(),
                1000 - i_us.min(1000)
            );
        }

        let all = tree.greater_than_or_equal(&key_of(0)).unwrap();
        let keys: Vec<_> = all.iter().map(|e| e.key.clone()).collect();
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted, "range results must ascend");
        tree.close().unwrap();
    }

    #[test]
    fn duplicate_keys_are_rejected() {
        let dir = tempdir().unwrap();
        let mut tree = open_tree(&dir);
        tree.insert(b"k", b"v1").unwrap();
        let err = tree.insert(b"k", b"v2").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DuplicateKey);
        tree.close().unwrap();
    }

    #[test]
    fn get_prefix_gathers_exactly_the_prefixed_keys() {
        let dir = tempdir().unwrap();
        let mut tree = open_tree(&dir);
        for word in ["apple", "applet", "apply", "banana", "band", "bandana"] {
            tree.insert(word.as_bytes(), b"x").unwrap();
        }
        let hits = tree.get_prefix(b"app").unwrap();
        let keys: Vec<_> = hits.iter().map(|e| e.key.clone()).collect();
        assert_eq!(keys, vec![b"apple".to_vec(), b"applet".to_vec(), b"apply".to_vec()]);
        assert_eq!(tree.get_prefix(b"band").unwrap().len(), 2);
        assert!(tree.get_prefix(b"zz").unwrap().is_empty());
        tree.close().unwrap();
    }

    #[test]
    fn remove_keeps_structure_and_membership() {
        let dir = tempdir().unwrap();
        let mut tree = open_tree(&dir);
        for i in 0..200u64 {
            tree.insert(&key_of(i), &key_of(i)).unwrap();
        }
        for i in (0..200u64).filter(|i| i % 3 == 0) {
            assert!(tree.remove(&key_of(i)).unwrap());
        }
        assert!(!tree.remove(&key_of(0)).unwrap(), "double remove finds nothing");

        check_invariants(&mut tree);
        for i in 0..200u64 {
            let found = tree.get(&key_of(i)).unwrap().is_some();
            assert_eq!(found, i % 3 != 0, "membership of {i}");
        }
        tree.close().unwrap();
    }

    #[test]
    fn mixed_random_inserts_and_removes_preserve_invariants() {
        let dir = tempdir().unwrap();
        let mut tree = open_tree(&dir);
        let mut rng = rand::rngs::StdRng::seed_from_u64(0x5eed);
        let mut model: BTreeMap<Vec<u8>, Vec<u8>> = BTreeMap::new();

        let mut keys: Vec<u64> = (0..500).collect();
        keys.shuffle(&mut rng);
        for (round, i) in keys.iter().enumerate() {
            tree.insert(&key_of(*i), &key_of(i * 2)).unwrap();
            model.insert(key_of(*i), key_of(i * 2));
            // Periodically remove an arbitrary live key.
            if round % 5 == 4 {
                let victim = model.keys().next().cloned().unwrap();
                assert!(tree.remove(&victim).unwrap());
                model.remove(&victim);
            }
        }

        check_invariants(&mut tree);
        assert_eq!(tree.size().unwrap(), model.len());

        let all = tree.greater_than_or_equal(&[]).unwrap();
        let got: Vec<_> = all.iter().map(|e| (e.key.clone(), e.value.clone())).collect();
        let want: Vec<_> = model.into_iter().collect();
        assert_eq!(got, want);
        tree.close().unwrap();
    }

    #[test]
    fn merges_hand_pages_back_to_the_pager() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tree_idx.bin");
        let mut tree = BTree::open(&path).unwrap();
        for i in 0..100u64 {
            tree.insert(&key_of(i), b"v").unwrap();
        }
        for i in 0..100u64 {
            assert!(tree.remove(&key_of(i)).unwrap());
        }
        assert_eq!(tree.size().unwrap(), 0);
        tree.close().unwrap();
        drop(tree);

        // Everything except the root page must be on the free list.
        let contents = std::fs::read_to_string(dir.path().join("tree_idx.bin.del")).unwrap();
        assert!(!contents.is_empty(), "free list should not be empty");
        assert!(!contents.split(',').any(|id| id == "0"));
    }

    #[test]
    fn persists_across_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tree_idx.bin");
        {
            let mut tree = BTree::open(&path).unwrap();
            for i in 0..64u64 {
                tree.insert(&key_of(i), &key_of(i)).unwrap();
            }
            tree.close().unwrap();
        }
        let mut tree = BTree::open(&path).unwrap();
        assert_eq!(tree.size().unwrap(), 64);
        assert!(tree.get(&key_of(63)).unwrap().is_some());
        tree.close().unwrap();
    }

    #[test]
    fn oversize_node_is_rejected() {
        let dir = tempdir().unwrap();
        let mut tree = open_tree(&dir);
        let huge = vec![0xabu8; NODE_PAGE_SIZE];
        let err = tree.insert(b"k", &huge).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NodeOverflow);
        tree.close().unwrap();
    }
}
