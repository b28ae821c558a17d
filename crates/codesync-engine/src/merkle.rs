//! Content-addressed change tree over tracked files
//!
//! Leaves are sorted by relative path. Internal levels pair adjacent nodes
//! with [`hash_pair`]; when a level has an odd number of nodes the last one is
//! promoted to the next level unchanged. Changing that rule changes every root
//! and breaks compatibility with persisted state.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::Result;
use crate::hasher::{hash_content, hash_pair};
use crate::persist::{read_json, state_path, write_json_atomic};

pub const TREE_STATE_FILE: &str = "tree-state.json";

/// One tracked file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MerkleLeaf {
    pub relative_path: String,
    pub hash: String,
}

impl MerkleLeaf {
    pub fn new(relative_path: impl Into<String>, hash: impl Into<String>) -> Self {
        Self { relative_path: relative_path.into(), hash: hash.into() }
    }
}

/// Root of a tree with no leaves
pub fn empty_root() -> String {
    hash_content(b"")
}

#[derive(Debug, Clone, PartialEq)]
pub struct MerkleTree {
    leaves: Vec<MerkleLeaf>,
    /// `levels[0]` holds the leaf hashes, the last level holds the root
    levels: Vec<Vec<String>>,
}

impl Default for MerkleTree {
    fn default() -> Self {
        Self::build(Vec::new())
    }
}

impl MerkleTree {
    /// Build from leaves in any order. A repeated path keeps its last hash.
    pub fn build(leaves: impl IntoIterator<Item = MerkleLeaf>) -> Self {
        let by_path: BTreeMap<String, String> = leaves
            .into_iter()
            .map(|leaf| (leaf.relative_path, leaf.hash))
            .collect();
        let leaves: Vec<MerkleLeaf> = by_path
            .into_iter()
            .map(|(relative_path, hash)| MerkleLeaf { relative_path, hash })
            .collect();

        let levels = Self::compute_levels(&leaves);
        Self { leaves, levels }
    }

    fn compute_levels(leaves: &[MerkleLeaf]) -> Vec<Vec<String>> {
        let mut levels = vec![leaves.iter().map(|leaf| leaf.hash.clone()).collect::<Vec<_>>()];
        while levels.last().is_some_and(|level| level.len() > 1) {
            let below = &levels[levels.len() - 1];
            let above = below
                .chunks(2)
                .map(|pair| match pair {
                    [left, right] => hash_pair(left, right),
                    // Odd node out: promoted unchanged
                    _ => pair[0].clone(),
                })
                .collect();
            levels.push(above);
        }
        levels
    }

    pub fn root(&self) -> String {
        match self.levels.last().and_then(|level| level.first()) {
            Some(root) => root.clone(),
            None => empty_root(),
        }
    }

    pub fn leaves(&self) -> &[MerkleLeaf] {
        &self.leaves
    }

    pub fn len(&self) -> usize {
        self.leaves.len()
    }

    pub fn is_empty(&self) -> bool {
        self.leaves.is_empty()
    }

    pub fn leaf_hash(&self, relative_path: &str) -> Option<&str> {
        self.position(relative_path)
            .ok()
            .map(|index| self.leaves[index].hash.as_str())
    }

    /// Every level from the leaves up to the root
    pub fn level_hashes(&self) -> &[Vec<String>] {
        &self.levels
    }

    fn position(&self, relative_path: &str) -> std::result::Result<usize, usize> {
        self.leaves
            .binary_search_by(|leaf| leaf.relative_path.as_str().cmp(relative_path))
    }

    /// Set the hash of one file and return the new root.
    ///
    /// An existing path recomputes only its ancestor path. A new path changes
    /// the shape of the tree and triggers a rebuild.
    pub fn update_leaf(&mut self, relative_path: &str, hash: &str) -> String {
        match self.position(relative_path) {
            Ok(index) => {
                if self.leaves[index].hash != hash {
                    self.leaves[index].hash = hash.to_string();
                    self.recompute_path(index, hash);
                }
            }
            Err(insert_at) => {
                self.leaves.insert(insert_at, MerkleLeaf::new(relative_path, hash));
                self.levels = Self::compute_levels(&self.leaves);
            }
        }
        self.root()
    }

    fn recompute_path(&mut self, leaf_index: usize, hash: &str) {
        self.levels[0][leaf_index] = hash.to_string();

        let mut index = leaf_index;
        for level in 0..self.levels.len() - 1 {
            let parent = index / 2;
            let left = 2 * parent;
            let below = &self.levels[level];
            let value = match below.get(left + 1) {
                Some(right) => hash_pair(&below[left], right),
                None => below[left].clone(),
            };
            self.levels[level + 1][parent] = value;
            index = parent;
        }
    }

    /// Stop tracking a file. Returns the new root, or `None` if the path was
    /// not tracked.
    pub fn remove_leaf(&mut self, relative_path: &str) -> Option<String> {
        let index = self.position(relative_path).ok()?;
        self.leaves.remove(index);
        self.levels = Self::compute_levels(&self.leaves);
        Some(self.root())
    }

    /// Paths that differ between a persisted state and this tree
    pub fn diff(&self, previous: &TreeState) -> TreeDiff {
        let before: BTreeMap<&str, &str> = previous
            .leaves
            .iter()
            .map(|leaf| (leaf.relative_path.as_str(), leaf.hash.as_str()))
            .collect();
        let after: BTreeMap<&str, &str> = self
            .leaves
            .iter()
            .map(|leaf| (leaf.relative_path.as_str(), leaf.hash.as_str()))
            .collect();

        let mut diff = TreeDiff::default();
        for (path, hash) in &after {
            match before.get(path) {
                None => diff.added.push(path.to_string()),
                Some(old) if old != hash => diff.modified.push(path.to_string()),
                Some(_) => {}
            }
        }
        diff.removed = before
            .keys()
            .filter(|path| !after.contains_key(*path))
            .map(|path| path.to_string())
            .collect();
        diff
    }

    pub fn to_state(&self, timestamp: DateTime<Utc>) -> TreeState {
        TreeState { root: self.root(), leaves: self.leaves.clone(), timestamp }
    }

    pub fn from_state(state: &TreeState) -> Self {
        Self::build(state.leaves.iter().cloned())
    }
}

/// Files added, removed or modified between two trees, each sorted by path
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TreeDiff {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub modified: Vec<String>,
}

impl TreeDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.modified.is_empty()
    }

    /// Every path whose content must be re-examined
    pub fn changed_paths(&self) -> impl Iterator<Item = &String> {
        self.added.iter().chain(self.modified.iter())
    }
}

/// Persisted snapshot of the tree after the last successful sync
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TreeState {
    pub root: String,
    pub leaves: Vec<MerkleLeaf>,
    pub timestamp: DateTime<Utc>,
}

impl TreeState {
    pub fn load(project_root: &Path) -> Result<Option<Self>> {
        read_json(&state_path(project_root, TREE_STATE_FILE))
    }

    pub fn save(&self, project_root: &Path) -> Result<()> {
        write_json_atomic(&state_path(project_root, TREE_STATE_FILE), self)
    }
}
