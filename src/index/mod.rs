//! The vector index store: vectors, chunk metadata, and the file manifest,
//! kept consistent as one unit and persisted as one snapshot.

pub mod manifest;
pub mod persistence;
pub mod vector;

pub use manifest::{FileEntry, Manifest, TreeDiff};
pub use vector::{ChunkId, VectorIndex};

use rustc_hash::FxHashMap;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::chunking::Chunk;
use crate::error::Result;
use persistence::PersistedIndex;

/// In-memory index state. All mutation goes through a single owner; callers
/// that need concurrent reads share the store behind a reader-writer lock so
/// searches see either the pre- or post-update state, never a torn one.
pub struct IndexStore {
    model_id: String,
    dimension: usize,
    vectors: VectorIndex,
    chunks: FxHashMap<ChunkId, Chunk>,
    pub manifest: Manifest,
    next_chunk_id: u32,
    created_at_epoch_secs: u64,
}

impl IndexStore {
    /// Create an empty store bound to one embedding model.
    pub fn new(model_id: String, dimension: usize) -> Self {
        Self {
            model_id,
            dimension,
            vectors: VectorIndex::new(dimension),
            chunks: FxHashMap::default(),
            manifest: Manifest::default(),
            next_chunk_id: 0,
            created_at_epoch_secs: epoch_secs(),
        }
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    pub fn file_count(&self) -> usize {
        self.manifest.file_count()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Hand out a fresh chunk id. Ids are never reused within a store.
    pub fn allocate_id(&mut self) -> ChunkId {
        let id = ChunkId(self.next_chunk_id);
        self.next_chunk_id += 1;
        id
    }

    /// Insert one embedded chunk under a fresh id.
    pub fn insert(&mut self, id: ChunkId, chunk: Chunk, vector: Vec<f32>) -> Result<()> {
        self.vectors.insert(id, vector)?;
        self.chunks.insert(id, chunk);
        Ok(())
    }

    /// Remove chunks by id from both the vector index and the metadata map.
    /// Returns how many were present.
    pub fn remove(&mut self, ids: &[ChunkId]) -> usize {
        let removed = self.vectors.remove(ids);
        for id in ids {
            self.chunks.remove(id);
        }
        removed
    }

    /// k-NN over live vectors; see [`VectorIndex::search`] for ordering.
    pub fn search(&self, query: &[f32], k: usize) -> Vec<(ChunkId, f32)> {
        self.vectors.search(query, k)
    }

    pub fn chunk(&self, id: ChunkId) -> Option<&Chunk> {
        self.chunks.get(&id)
    }

    /// Stored vector for a live chunk, used for similar-file queries.
    pub fn vector(&self, id: ChunkId) -> Option<&[f32]> {
        self.vectors.get(id)
    }

    /// Drop all content but keep the model binding.
    pub fn clear(&mut self) {
        self.vectors = VectorIndex::new(self.dimension);
        self.chunks.clear();
        self.manifest.clear();
        self.next_chunk_id = 0;
        self.created_at_epoch_secs = epoch_secs();
    }

    /// Persist the full store under `dir`.
    pub fn save(&self, dir: &Path) -> Result<()> {
        let mut chunks: Vec<(ChunkId, Chunk)> = self
            .chunks
            .iter()
            .map(|(id, chunk)| (*id, chunk.clone()))
            .collect();
        chunks.sort_by_key(|(id, _)| *id);

        PersistedIndex {
            version: PersistedIndex::CURRENT_VERSION,
            model_id: self.model_id.clone(),
            dimension: self.dimension,
            next_chunk_id: self.next_chunk_id,
            created_at_epoch_secs: self.created_at_epoch_secs,
            vectors: self.vectors.live_entries(),
            chunks,
            manifest: self.manifest.clone(),
        }
        .save(dir)
    }

    /// Load a store from `dir`, or `None` if nothing is persisted there.
    pub fn load(dir: &Path) -> Result<Option<Self>> {
        let Some(persisted) = PersistedIndex::load(dir)? else {
            return Ok(None);
        };

        let vectors = VectorIndex::from_entries(persisted.dimension, persisted.vectors)?;
        Ok(Some(Self {
            model_id: persisted.model_id,
            dimension: persisted.dimension,
            vectors,
            chunks: persisted.chunks.into_iter().collect(),
            manifest: persisted.manifest,
            next_chunk_id: persisted.next_chunk_id,
            created_at_epoch_secs: persisted.created_at_epoch_secs,
        }))
    }
}

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::ContentHash;
    use tempfile::TempDir;

    fn chunk(path: &str, text: &str) -> Chunk {
        Chunk {
            file_path: path.into(),
            start_line: 1,
            end_line: 1,
            language: "py".into(),
            text: text.into(),
            content_hash: ContentHash::of(text),
        }
    }

    #[test]
    fn test_insert_search_remove() {
        let mut store = IndexStore::new("test-model".into(), 2);
        let id_a = store.allocate_id();
        let id_b = store.allocate_id();
        store.insert(id_a, chunk("a.py", "alpha"), vec![1.0, 0.0]).unwrap();
        store.insert(id_b, chunk("b.py", "beta"), vec![0.0, 1.0]).unwrap();

        let results = store.search(&[1.0, 0.0], 1);
        assert_eq!(results[0].0, id_a);
        assert_eq!(store.chunk(id_a).unwrap().file_path, "a.py");

        store.remove(&[id_a]);
        assert!(store.chunk(id_a).is_none());
        assert_eq!(store.search(&[1.0, 0.0], 5).len(), 1);
    }

    #[test]
    fn test_ids_not_reused_after_removal() {
        let mut store = IndexStore::new("test-model".into(), 2);
        let first = store.allocate_id();
        store.insert(first, chunk("a.py", "v1"), vec![1.0, 0.0]).unwrap();
        store.remove(&[first]);
        let second = store.allocate_id();
        assert_ne!(first, second);
    }

    #[test]
    fn test_save_load_identical_search() {
        let dir = TempDir::new().unwrap();
        let mut store = IndexStore::new("test-model".into(), 2);
        for (i, (path, vector)) in [
            ("a.py", vec![1.0, 0.0]),
            ("b.py", vec![0.5, 0.5]),
            ("c.py", vec![0.0, 1.0]),
        ]
        .into_iter()
        .enumerate()
        {
            let id = store.allocate_id();
            store
                .insert(id, chunk(path, &format!("content {i}")), vector)
                .unwrap();
        }
        store.manifest.upsert(
            "a.py".into(),
            ContentHash::of("content 0"),
            vec![ChunkId(0)],
        );
        store.save(dir.path()).unwrap();

        let loaded = IndexStore::load(dir.path()).unwrap().unwrap();
        assert_eq!(loaded.model_id(), "test-model");
        assert_eq!(loaded.chunk_count(), 3);
        assert_eq!(loaded.manifest.file_count(), 1);

        let query = [0.8, 0.2];
        let before: Vec<_> = store.search(&query, 3);
        let after: Vec<_> = loaded.search(&query, 3);
        assert_eq!(before, after);
    }
}
