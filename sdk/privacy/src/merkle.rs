//! Merkle Accumulator for Deposit Commitments
//!
//! Append-only Poseidon Merkle tree using the filled-subtree algorithm of the
//! on-chain pool. Node hashes are circom Poseidon, so roots computed here
//! match the ledger's.
//!
//! ```text
//!                    Root
//!                   /    \
//!                 H01    H23
//!                /  \   /   \
//!               C0  C1 C2   Z0     Z0 = empty leaf (all zero bytes)
//! ```
//!
//! Empty subtrees hash to `Z[0] = 0`, `Z[i] = H(Z[i-1], Z[i-1])`.

use std::collections::{HashMap, VecDeque};

use serde::{Deserialize, Serialize};

use crate::commitment::Commitment;
use crate::error::PrivacyError;
use crate::hash::{Field, hash_pair};

pub const DEFAULT_TREE_DEPTH: usize = 8;
pub const MAX_TREE_DEPTH: usize = 32;
pub const DEFAULT_ROOT_HISTORY: usize = 30;

/// An authentication path proving inclusion of one leaf
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerklePath {
    /// Sibling hashes from leaf to root
    pub siblings: Vec<Field>,
    /// Position bits, LSB first (false = current node is the left child)
    pub path_bits: Vec<bool>,
    pub leaf_index: u32,
}

impl MerklePath {
    pub fn compute_root(&self, leaf: &Commitment) -> Field {
        let mut current = leaf.0;
        for (sibling, is_right) in self.siblings.iter().zip(self.path_bits.iter()) {
            current = if *is_right {
                hash_pair(sibling, &current)
            } else {
                hash_pair(&current, sibling)
            };
        }
        current
    }

    pub fn verify(&self, leaf: &Commitment, root: &Field) -> bool {
        self.siblings.len() == self.path_bits.len() && &self.compute_root(leaf) == root
    }

    /// Path indices as the proof engine expects them (0 = left, 1 = right).
    pub fn path_indices(&self) -> Vec<u8> {
        self.path_bits.iter().map(|b| *b as u8).collect()
    }
}

/// Result of appending a commitment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Insertion {
    pub leaf_index: u32,
    pub path: MerklePath,
    pub root: Field,
}

/// Serialized tree state.
///
/// `leaves` is optional: a compact snapshot can keep accepting inserts but
/// cannot serve paths for leaves it never saw.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeSnapshot {
    pub depth: usize,
    pub leaf_count: u64,
    pub filled_subtrees: Vec<Field>,
    pub root: Field,
    pub leaves: Option<Vec<Commitment>>,
}

pub struct MerkleTree {
    depth: usize,
    zeros: Vec<Field>,
    filled_subtrees: Vec<Field>,
    /// Written nodes below the root: (level, index) -> hash
    nodes: HashMap<(usize, u64), Field>,
    next_index: u64,
    root: Field,
    /// Restored from a snapshot without leaves.
    compact: bool,
}

/// `Z[0..=depth]`
pub fn zero_hashes(depth: usize) -> Vec<Field> {
    let mut zeros = Vec::with_capacity(depth + 1);
    let mut current = [0u8; 32];
    zeros.push(current);
    for _ in 0..depth {
        current = hash_pair(&current, &current);
        zeros.push(current);
    }
    zeros
}

impl MerkleTree {
    pub fn new(depth: usize) -> Result<Self, PrivacyError> {
        if depth == 0 || depth > MAX_TREE_DEPTH {
            return Err(PrivacyError::InvalidDepth(depth));
        }
        let zeros = zero_hashes(depth);
        Ok(Self {
            depth,
            filled_subtrees: zeros[..depth].to_vec(),
            root: zeros[depth],
            zeros,
            nodes: HashMap::new(),
            next_index: 0,
            compact: false,
        })
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn root(&self) -> Field {
        self.root
    }

    pub fn len(&self) -> u64 {
        self.next_index
    }

    pub fn is_empty(&self) -> bool {
        self.next_index == 0
    }

    pub fn capacity(&self) -> u64 {
        1u64 << self.depth
    }

    pub fn is_full(&self) -> bool {
        self.next_index >= self.capacity()
    }

    /// Append a commitment at the next free slot.
    pub fn insert(&mut self, commitment: &Commitment) -> Result<Insertion, PrivacyError> {
        if self.is_full() {
            return Err(PrivacyError::TreeFull {
                capacity: self.capacity(),
            });
        }

        let leaf_index = self.next_index;
        let mut index = leaf_index;
        let mut current = commitment.0;
        let mut siblings = Vec::with_capacity(self.depth);
        let mut path_bits = Vec::with_capacity(self.depth);

        self.nodes.insert((0, index), current);

        for level in 0..self.depth {
            let is_right = index & 1 == 1;
            let parent = if is_right {
                let sibling = self.filled_subtrees[level];
                siblings.push(sibling);
                hash_pair(&sibling, &current)
            } else {
                self.filled_subtrees[level] = current;
                let sibling = self.zeros[level];
                siblings.push(sibling);
                hash_pair(&current, &sibling)
            };
            path_bits.push(is_right);

            index >>= 1;
            current = parent;
            if level + 1 < self.depth {
                self.nodes.insert((level + 1, index), current);
            }
        }

        self.root = current;
        self.next_index += 1;

        Ok(Insertion {
            leaf_index: leaf_index as u32,
            path: MerklePath {
                siblings,
                path_bits,
                leaf_index: leaf_index as u32,
            },
            root: current,
        })
    }

    /// Path for `leaf_index` against the current root.
    pub fn proof(&self, leaf_index: u32) -> Result<MerklePath, PrivacyError> {
        let leaf = leaf_index as u64;
        if leaf >= self.next_index {
            return Err(PrivacyError::UnknownLeaf(leaf));
        }

        let mut siblings = Vec::with_capacity(self.depth);
        let mut path_bits = Vec::with_capacity(self.depth);
        let mut index = leaf;

        for level in 0..self.depth {
            let is_right = index & 1 == 1;
            let sibling_index = index ^ 1;
            siblings.push(self.node(level, sibling_index, leaf)?);
            path_bits.push(is_right);
            index >>= 1;
        }

        Ok(MerklePath {
            siblings,
            path_bits,
            leaf_index,
        })
    }

    fn node(&self, level: usize, index: u64, requested: u64) -> Result<Field, PrivacyError> {
        // first leaf covered by this node
        let first_leaf = index << level;
        if first_leaf >= self.next_index {
            return Ok(self.zeros[level]);
        }
        self.nodes
            .get(&(level, index))
            .copied()
            .ok_or(PrivacyError::PathUnavailable(requested))
    }

    /// Commitment stored at `leaf_index`, if known.
    pub fn leaf(&self, leaf_index: u32) -> Option<Commitment> {
        self.nodes.get(&(0, leaf_index as u64)).map(|h| Commitment(*h))
    }

    pub fn snapshot(&self, include_leaves: bool) -> TreeSnapshot {
        let leaves = if include_leaves && !self.compact {
            (0..self.next_index)
                .map(|i| self.nodes.get(&(0, i)).map(|h| Commitment(*h)))
                .collect::<Option<Vec<_>>>()
        } else {
            None
        };

        TreeSnapshot {
            depth: self.depth,
            leaf_count: self.next_index,
            filled_subtrees: self.filled_subtrees.clone(),
            root: self.root,
            leaves,
        }
    }

    pub fn restore(snapshot: &TreeSnapshot) -> Result<Self, PrivacyError> {
        let mut tree = Self::new(snapshot.depth)?;

        if snapshot.leaf_count > tree.capacity() {
            return Err(PrivacyError::InvalidSnapshot(format!(
                "leaf count {} exceeds capacity {}",
                snapshot.leaf_count,
                tree.capacity()
            )));
        }

        match &snapshot.leaves {
            Some(leaves) => {
                if leaves.len() as u64 != snapshot.leaf_count {
                    return Err(PrivacyError::InvalidSnapshot(
                        "leaf list does not match leaf count".into(),
                    ));
                }
                for leaf in leaves {
                    tree.insert(leaf)?;
                }
                if tree.root != snapshot.root {
                    return Err(PrivacyError::InvalidSnapshot(
                        "leaves do not hash to the recorded root".into(),
                    ));
                }
            }
            None => {
                if snapshot.filled_subtrees.len() != snapshot.depth {
                    return Err(PrivacyError::InvalidSnapshot(
                        "filled subtree count does not match depth".into(),
                    ));
                }
                tree.filled_subtrees = snapshot.filled_subtrees.clone();
                tree.next_index = snapshot.leaf_count;
                tree.root = snapshot.root;
                tree.compact = snapshot.leaf_count > 0;
            }
        }

        Ok(tree)
    }
}

/// Recent roots, newest first.
///
/// Mirrors the ledger's root window so a proof built against a slightly
/// stale root can still be checked.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RootHistory {
    roots: VecDeque<Field>,
    max_size: usize,
}

impl RootHistory {
    pub fn new(max_size: usize) -> Self {
        Self {
            roots: VecDeque::with_capacity(max_size),
            max_size,
        }
    }

    pub fn push(&mut self, root: Field) {
        self.roots.push_front(root);
        self.roots.truncate(self.max_size);
    }

    pub fn is_valid(&self, root: &Field) -> bool {
        self.roots.contains(root)
    }

    pub fn current(&self) -> Option<&Field> {
        self.roots.front()
    }

    pub fn len(&self) -> usize {
        self.roots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(i: u64) -> Commitment {
        let mut bytes = [0u8; 32];
        bytes[..8].copy_from_slice(&(i + 1).to_le_bytes());
        Commitment(bytes)
    }

    #[test]
    fn test_empty_tree() {
        let tree = MerkleTree::new(DEFAULT_TREE_DEPTH).unwrap();
        assert!(tree.is_empty());
        assert_eq!(tree.root(), zero_hashes(DEFAULT_TREE_DEPTH)[DEFAULT_TREE_DEPTH]);
        assert_eq!(tree.proof(0), Err(PrivacyError::UnknownLeaf(0)));
    }

    #[test]
    fn test_zero_hashes_match_onchain_table() {
        let be = |s: &str| {
            let mut bytes: Field = hex::decode(s).unwrap().try_into().unwrap();
            bytes.reverse();
            bytes
        };
        let zeros = zero_hashes(2);
        assert_eq!(zeros[0], [0u8; 32]);
        assert_eq!(
            zeros[1],
            be("2098f5fb9e239eab3ceac3f27b81e481dc3124d55ffed523a839ee8446b64864")
        );
        assert_eq!(
            zeros[2],
            be("1069673dcdb12263df301a6ff584a7ec261a44cb9dc68df067a4774460b1f1e1")
        );
    }

    #[test]
    fn test_invalid_depth() {
        assert_eq!(MerkleTree::new(0).err(), Some(PrivacyError::InvalidDepth(0)));
        assert_eq!(MerkleTree::new(33).err(), Some(PrivacyError::InvalidDepth(33)));
    }

    #[test]
    fn test_insert_returns_valid_path() {
        let mut tree = MerkleTree::new(DEFAULT_TREE_DEPTH).unwrap();

        let first = tree.insert(&leaf(0)).unwrap();
        let second = tree.insert(&leaf(1)).unwrap();

        assert_eq!(first.leaf_index, 0);
        assert_eq!(second.leaf_index, 1);
        assert_eq!(second.path.siblings.len(), DEFAULT_TREE_DEPTH);
        assert!(second.path.path_bits[0]);
        assert!(second.path.verify(&leaf(1), &tree.root()));
        // the insertion-time path is valid against the root at that time
        assert!(first.path.verify(&leaf(0), &first.root));
    }

    #[test]
    fn test_every_proof_matches_root_for_all_fill_levels() {
        let depth = 4;
        for k in 0..=(1u64 << depth) {
            let mut tree = MerkleTree::new(depth).unwrap();
            for i in 0..k {
                tree.insert(&leaf(i)).unwrap();
            }
            for i in 0..k {
                let path = tree.proof(i as u32).unwrap();
                assert!(
                    path.verify(&leaf(i), &tree.root()),
                    "leaf {i} of {k} does not verify"
                );
            }
        }
    }

    #[test]
    fn test_root_is_function_of_leaf_sequence() {
        let mut a = MerkleTree::new(5).unwrap();
        let mut b = MerkleTree::new(5).unwrap();
        for i in 0..7 {
            a.insert(&leaf(i)).unwrap();
            b.insert(&leaf(i)).unwrap();
        }
        assert_eq!(a.root(), b.root());

        let mut c = MerkleTree::new(5).unwrap();
        for i in [1, 0, 2, 3, 4, 5, 6] {
            c.insert(&leaf(i)).unwrap();
        }
        assert_ne!(a.root(), c.root(), "order matters");
    }

    #[test]
    fn test_tree_full() {
        let mut tree = MerkleTree::new(2).unwrap();
        for i in 0..4 {
            tree.insert(&leaf(i)).unwrap();
        }
        assert!(tree.is_full());
        let err = tree.insert(&leaf(4)).unwrap_err();
        assert_eq!(err, PrivacyError::TreeFull { capacity: 4 });
        assert_eq!(tree.len(), 4);
    }

    #[test]
    fn test_deposit_then_withdraw_against_older_root() {
        let mut tree = MerkleTree::new(DEFAULT_TREE_DEPTH).unwrap();
        let mut history = RootHistory::new(DEFAULT_ROOT_HISTORY);

        let c0 = crate::CommitmentVault::commit(&[1u8; 32], &[2u8; 32]);
        let first = tree.insert(&c0).unwrap();
        let r0 = tree.root();
        history.push(r0);

        let c1 = crate::CommitmentVault::commit(&[3u8; 32], &[4u8; 32]);
        let second = tree.insert(&c1).unwrap();
        let r1 = tree.root();
        history.push(r1);

        assert_eq!(first.leaf_index, 0);
        assert_eq!(second.leaf_index, 1);
        assert_ne!(r0, r1);

        // path captured at deposit time still proves inclusion under R0
        assert!(first.path.verify(&c0, &r0));
        assert!(history.is_valid(&r0));
        // and the current path proves it under R1
        assert!(tree.proof(0).unwrap().verify(&c0, &r1));
    }

    #[test]
    fn test_snapshot_with_leaves_round_trip() {
        let mut tree = MerkleTree::new(4).unwrap();
        for i in 0..5 {
            tree.insert(&leaf(i)).unwrap();
        }
        let snapshot = tree.snapshot(true);
        let restored = MerkleTree::restore(&snapshot).unwrap();

        assert_eq!(restored.root(), tree.root());
        assert_eq!(restored.len(), 5);
        assert!(restored.proof(2).unwrap().verify(&leaf(2), &tree.root()));
    }

    #[test]
    fn test_compact_snapshot_continues_inserts() {
        let mut full = MerkleTree::new(4).unwrap();
        for i in 0..3 {
            full.insert(&leaf(i)).unwrap();
        }
        let mut compact = MerkleTree::restore(&full.snapshot(false)).unwrap();
        assert_eq!(compact.root(), full.root());
        assert_eq!(compact.proof(1), Err(PrivacyError::PathUnavailable(1)));

        let a = full.insert(&leaf(3)).unwrap();
        let b = compact.insert(&leaf(3)).unwrap();
        assert_eq!(a.root, b.root);
        assert_eq!(a.path, b.path);
    }

    #[test]
    fn test_restore_rejects_tampered_root() {
        let mut tree = MerkleTree::new(4).unwrap();
        tree.insert(&leaf(0)).unwrap();
        let mut snapshot = tree.snapshot(true);
        snapshot.root = [9u8; 32];
        assert!(matches!(
            MerkleTree::restore(&snapshot),
            Err(PrivacyError::InvalidSnapshot(_))
        ));
    }

    #[test]
    fn test_root_history() {
        let mut history = RootHistory::new(2);
        history.push([1u8; 32]);
        history.push([2u8; 32]);
        history.push([3u8; 32]);

        assert!(!history.is_valid(&[1u8; 32]), "oldest root evicted");
        assert!(history.is_valid(&[2u8; 32]));
        assert_eq!(history.current(), Some(&[3u8; 32]));
        assert_eq!(history.len(), 2);
    }
}
