//! Persistent index snapshot.
//!
//! The whole store (vectors, chunk metadata, manifest) serializes into one
//! versioned bincode file with advisory locking: exclusive for writes,
//! shared for reads. A human-readable `metadata.json` sidecar is written
//! alongside for inspection; only the snapshot is load-bearing.
//!
//! The contract is round-trip correctness, not a stable byte layout:
//! persist followed by load yields a store answering identical search
//! queries in identical order. Version or decode failures surface as
//! [`IndexError::Corrupt`], which callers remediate with a full reindex.

use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

use super::manifest::Manifest;
use super::vector::ChunkId;
use crate::chunking::Chunk;
use crate::error::{IndexError, Result};

const SNAPSHOT_FILE: &str = "index.bin";
const METADATA_FILE: &str = "metadata.json";

/// Serialized form of the complete index state.
#[derive(Serialize, Deserialize)]
pub struct PersistedIndex {
    /// Format version; bump when the layout changes.
    pub version: u32,
    /// Embedding model the vectors were produced by.
    pub model_id: String,
    pub dimension: usize,
    pub next_chunk_id: u32,
    pub created_at_epoch_secs: u64,
    /// Live vectors in insertion order (tie-break order round-trips).
    pub vectors: Vec<(ChunkId, Vec<f32>)>,
    pub chunks: Vec<(ChunkId, Chunk)>,
    pub manifest: Manifest,
}

/// Informational sidecar mirroring the snapshot's headline numbers.
#[derive(Serialize, Deserialize)]
struct IndexMetadata {
    model_id: String,
    dimension: usize,
    file_count: usize,
    chunk_count: usize,
    created_at_epoch_secs: u64,
}

impl PersistedIndex {
    pub const CURRENT_VERSION: u32 = 1;

    /// Write the snapshot (and metadata sidecar) under `dir` with an
    /// exclusive lock.
    pub fn save(&self, dir: &Path) -> Result<()> {
        std::fs::create_dir_all(dir)?;

        let path = snapshot_path(dir);
        let file = std::fs::File::create(&path)?;
        file.lock_exclusive()?;
        let writer = std::io::BufWriter::new(&file);
        bincode::serialize_into(writer, self)?;

        let metadata = IndexMetadata {
            model_id: self.model_id.clone(),
            dimension: self.dimension,
            file_count: self.manifest.file_count(),
            chunk_count: self.chunks.len(),
            created_at_epoch_secs: self.created_at_epoch_secs,
        };
        let json = serde_json::to_string_pretty(&metadata)
            .map_err(|e| IndexError::Corrupt {
                path: dir.to_path_buf(),
                reason: format!("metadata serialization failed: {e}"),
            })?;
        std::fs::write(dir.join(METADATA_FILE), json)?;

        debug!(path = %path.display(), chunks = self.chunks.len(), "Index snapshot saved");
        Ok(())
    }

    /// Load a snapshot from `dir` with a shared lock. Returns `None` when no
    /// snapshot exists yet; a snapshot that exists but cannot be decoded is
    /// corrupt and must be rebuilt via a full reindex.
    pub fn load(dir: &Path) -> Result<Option<Self>> {
        let path = snapshot_path(dir);
        if !path.exists() {
            return Ok(None);
        }

        let file = std::fs::File::open(&path)?;
        file.lock_shared()?;
        // Deserialize from an in-memory slice so bincode bounds-checks
        // length prefixes against the actual data instead of trusting a
        // corrupt prefix and attempting an enormous allocation.
        let bytes = std::fs::read(&path)?;
        let persisted: Self =
            bincode::deserialize(&bytes).map_err(|e| IndexError::Corrupt {
                path: path.clone(),
                reason: e.to_string(),
            })?;

        if persisted.version != Self::CURRENT_VERSION {
            return Err(IndexError::Corrupt {
                path,
                reason: format!(
                    "snapshot version {} (expected {})",
                    persisted.version,
                    Self::CURRENT_VERSION
                ),
            });
        }

        debug!(path = %path.display(), chunks = persisted.chunks.len(), "Index snapshot loaded");
        Ok(Some(persisted))
    }
}

pub fn snapshot_path(dir: &Path) -> PathBuf {
    dir.join(SNAPSHOT_FILE)
}

/// Bytes occupied by the persisted store under `dir`.
pub fn size_on_disk(dir: &Path) -> u64 {
    [SNAPSHOT_FILE, METADATA_FILE]
        .iter()
        .filter_map(|name| std::fs::metadata(dir.join(name)).ok())
        .map(|meta| meta.len())
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::ContentHash;
    use tempfile::TempDir;

    fn sample() -> PersistedIndex {
        let chunk = Chunk {
            file_path: "a.py".into(),
            start_line: 1,
            end_line: 1,
            language: "py".into(),
            text: "x = 1".into(),
            content_hash: ContentHash::of("x = 1"),
        };
        let mut manifest = Manifest::default();
        manifest.upsert("a.py".into(), ContentHash::of("x = 1"), vec![ChunkId(0)]);
        PersistedIndex {
            version: PersistedIndex::CURRENT_VERSION,
            model_id: "hashed-v1-512".into(),
            dimension: 2,
            next_chunk_id: 1,
            created_at_epoch_secs: 1_700_000_000,
            vectors: vec![(ChunkId(0), vec![1.0, 0.0])],
            chunks: vec![(ChunkId(0), chunk)],
            manifest,
        }
    }

    #[test]
    fn test_save_load_round_trip() {
        let dir = TempDir::new().unwrap();
        sample().save(dir.path()).unwrap();

        let loaded = PersistedIndex::load(dir.path()).unwrap().unwrap();
        assert_eq!(loaded.model_id, "hashed-v1-512");
        assert_eq!(loaded.vectors.len(), 1);
        assert_eq!(loaded.chunks[0].1.file_path, "a.py");
        assert_eq!(loaded.manifest.file_count(), 1);
        assert!(size_on_disk(dir.path()) > 0);
    }

    #[test]
    fn test_load_missing_is_none() {
        let dir = TempDir::new().unwrap();
        assert!(PersistedIndex::load(dir.path()).unwrap().is_none());
    }

    #[test]
    fn test_garbage_snapshot_is_corrupt() {
        let dir = TempDir::new().unwrap();
        std::fs::write(snapshot_path(dir.path()), b"not a snapshot").unwrap();
        let result = PersistedIndex::load(dir.path());
        assert!(matches!(result, Err(IndexError::Corrupt { .. })));
    }

    #[test]
    fn test_version_mismatch_is_corrupt() {
        let dir = TempDir::new().unwrap();
        let mut snapshot = sample();
        snapshot.version = 99;
        snapshot.save(dir.path()).unwrap();
        let result = PersistedIndex::load(dir.path());
        assert!(matches!(result, Err(IndexError::Corrupt { .. })));
    }
}
