//! Per-file bookkeeping for incremental updates.
//!
//! The manifest records, for every indexed file, its last-seen whole-file
//! hash and the chunk ids it produced. Diffing the manifest against a fresh
//! scan classifies every file as added, modified, removed, or unchanged,
//! which drives the incremental update path.
//!
//! Invariants: each chunk id is owned by exactly one manifest entry, and
//! every referenced id exists in the vector index. Entries are replaced
//! wholesale on modification, never patched.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use super::vector::ChunkId;
use crate::hash::ContentHash;

/// One file's record: content hash plus owned chunk ids, in chunk order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileEntry {
    pub content_hash: ContentHash,
    pub chunk_ids: Vec<ChunkId>,
}

/// Classification of the current tree against the manifest.
#[derive(Debug, Default, PartialEq)]
pub struct TreeDiff {
    pub added: Vec<String>,
    pub modified: Vec<String>,
    pub removed: Vec<String>,
    pub unchanged: Vec<String>,
}

/// Map from relative file path to its indexing record.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Manifest {
    files: FxHashMap<String, FileEntry>,
}

impl Manifest {
    /// Compare a scan result (path, whole-file hash) against recorded state.
    /// Files in the manifest but missing from the scan are `removed`.
    /// Output lists are path-sorted for deterministic processing.
    pub fn diff(&self, scanned: &[(String, ContentHash)]) -> TreeDiff {
        let mut diff = TreeDiff::default();
        let mut seen: FxHashMap<&str, ()> = FxHashMap::default();

        for (path, hash) in scanned {
            seen.insert(path.as_str(), ());
            match self.files.get(path) {
                None => diff.added.push(path.clone()),
                Some(entry) if entry.content_hash != *hash => diff.modified.push(path.clone()),
                Some(_) => diff.unchanged.push(path.clone()),
            }
        }

        for path in self.files.keys() {
            if !seen.contains_key(path.as_str()) {
                diff.removed.push(path.clone());
            }
        }

        diff.added.sort();
        diff.modified.sort();
        diff.removed.sort();
        diff.unchanged.sort();
        diff
    }

    pub fn entry(&self, path: &str) -> Option<&FileEntry> {
        self.files.get(path)
    }

    /// Record (or replace) a file's entry.
    pub fn upsert(&mut self, path: String, content_hash: ContentHash, chunk_ids: Vec<ChunkId>) {
        self.files.insert(
            path,
            FileEntry {
                content_hash,
                chunk_ids,
            },
        );
    }

    /// Drop a file's entry, returning it so the caller can remove its chunk
    /// ids from the vector index.
    pub fn remove(&mut self, path: &str) -> Option<FileEntry> {
        self.files.remove(path)
    }

    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    pub fn chunk_count(&self) -> usize {
        self.files.values().map(|entry| entry.chunk_ids.len()).sum()
    }

    /// Iterate entries (unordered).
    pub fn files(&self) -> impl Iterator<Item = (&String, &FileEntry)> {
        self.files.iter()
    }

    pub fn clear(&mut self) {
        self.files.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hash(text: &str) -> ContentHash {
        ContentHash::of(text)
    }

    #[test]
    fn test_diff_classifies_all_cases() {
        let mut manifest = Manifest::default();
        manifest.upsert("same.py".into(), hash("v1"), vec![ChunkId(0)]);
        manifest.upsert("changed.py".into(), hash("v1"), vec![ChunkId(1)]);
        manifest.upsert("gone.py".into(), hash("v1"), vec![ChunkId(2)]);

        let scanned = vec![
            ("same.py".to_string(), hash("v1")),
            ("changed.py".to_string(), hash("v2")),
            ("new.py".to_string(), hash("v1")),
        ];

        let diff = manifest.diff(&scanned);
        assert_eq!(diff.added, vec!["new.py"]);
        assert_eq!(diff.modified, vec!["changed.py"]);
        assert_eq!(diff.removed, vec!["gone.py"]);
        assert_eq!(diff.unchanged, vec!["same.py"]);
    }

    #[test]
    fn test_diff_of_empty_manifest_is_all_added() {
        let manifest = Manifest::default();
        let scanned = vec![
            ("b.py".to_string(), hash("b")),
            ("a.py".to_string(), hash("a")),
        ];
        let diff = manifest.diff(&scanned);
        assert_eq!(diff.added, vec!["a.py", "b.py"]);
        assert!(diff.removed.is_empty());
    }

    #[test]
    fn test_upsert_replaces_wholesale() {
        let mut manifest = Manifest::default();
        manifest.upsert("f.py".into(), hash("v1"), vec![ChunkId(0), ChunkId(1)]);
        manifest.upsert("f.py".into(), hash("v2"), vec![ChunkId(5)]);

        let entry = manifest.entry("f.py").unwrap();
        assert_eq!(entry.content_hash, hash("v2"));
        assert_eq!(entry.chunk_ids, vec![ChunkId(5)]);
        assert_eq!(manifest.chunk_count(), 1);
    }

    #[test]
    fn test_remove_returns_entry() {
        let mut manifest = Manifest::default();
        manifest.upsert("f.py".into(), hash("v1"), vec![ChunkId(3)]);
        let entry = manifest.remove("f.py").unwrap();
        assert_eq!(entry.chunk_ids, vec![ChunkId(3)]);
        assert_eq!(manifest.file_count(), 0);
        assert!(manifest.remove("f.py").is_none());
    }
}
