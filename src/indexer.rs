//! Indexing orchestration.
//!
//! Owns the open/persist lifecycle of one index and drives the pipeline:
//! scan -> diff -> chunk -> embed -> insert, with the manifest updated
//! alongside the vector store. Chunk extraction fans out across the rayon
//! pool; all store and manifest writes happen on the single `Indexer`
//! owner, so a manifest entry and its chunks can never diverge.
//!
//! Failure discipline: per-file problems are recorded in the returned stats
//! and the run continues. The safe failure point for one file is "old
//! entries removed, new entries not committed, manifest entry dropped", so
//! a retry simply treats the file as added. Structural failures (corrupt
//! snapshot, dimension mismatch) abort the operation.

use rayon::prelude::*;
use rustc_hash::FxHashMap;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::chunking::{Chunk, Chunker};
use crate::config::Config;
use crate::discovery::{scan_tree, DiscoveryPolicy, SourceFile};
use crate::embed::provider::ProviderError;
use crate::embed::{DynProvider, EmbeddingCache};
use crate::error::{FileError, IndexError, Result};
use crate::hash::ContentHash;
use crate::index::{persistence, IndexStore};
use crate::search::{SearchFilters, SearchResponse};

const CACHE_FILE: &str = "embeddings.bin";

/// Outcome of one `index`/`update` run.
#[derive(Debug, Default, Serialize)]
pub struct IndexStats {
    pub files_scanned: usize,
    pub chunks_added: usize,
    pub chunks_removed: usize,
    /// Per-file failures; never fatal to the run.
    pub errors: Vec<FileError>,
}

/// Point-in-time description of the persisted store.
#[derive(Debug, Serialize)]
pub struct StoreStats {
    pub model_id: String,
    pub dimension: usize,
    pub file_count: usize,
    pub chunk_count: usize,
    pub index_size_on_disk: u64,
}

/// Process-wide handle on one index: open on command start, persist and
/// drop on command end. Searches take `&self`; mutation takes `&mut self`.
/// Callers that interleave the two across threads wrap the handle in a
/// reader-writer lock.
pub struct Indexer {
    config: Config,
    provider: DynProvider,
    cache: EmbeddingCache,
    store: IndexStore,
    index_dir: PathBuf,
}

impl Indexer {
    /// Open the index at the configured directory, loading a persisted
    /// snapshot when one exists. A snapshot holding vectors from a
    /// different embedding model is rejected; an empty snapshot is rebound
    /// to the configured model instead. A corrupt snapshot surfaces as
    /// [`IndexError::Corrupt`] and requires a forced reindex.
    pub fn open(config: Config, provider: DynProvider) -> Result<Self> {
        let index_dir = config.indexer.index_dir.clone();

        let store = match IndexStore::load(&index_dir)? {
            Some(store)
                if store.model_id() != provider.model_id()
                    || store.dimension() != provider.dimension() =>
            {
                if !store.is_empty() {
                    return Err(IndexError::ModelMismatch {
                        index_model: store.model_id().to_string(),
                        configured: provider.model_id().to_string(),
                    });
                }
                info!(
                    old_model = %store.model_id(),
                    new_model = %provider.model_id(),
                    "Rebinding empty index to the configured model"
                );
                IndexStore::new(provider.model_id().to_string(), provider.dimension())
            }
            Some(store) => store,
            None => IndexStore::new(provider.model_id().to_string(), provider.dimension()),
        };

        let cache = EmbeddingCache::open(
            index_dir.join(CACHE_FILE),
            provider.as_ref(),
            &config.embedding,
        )?;

        Ok(Self {
            config,
            provider,
            cache,
            store,
            index_dir,
        })
    }

    /// Open with a fresh, empty store regardless of what is on disk. Used
    /// to recover from a corrupt snapshot or an embedding-model change via
    /// forced reindex.
    pub fn open_empty(config: Config, provider: DynProvider) -> Result<Self> {
        let index_dir = config.indexer.index_dir.clone();
        let store = IndexStore::new(provider.model_id().to_string(), provider.dimension());
        let cache = EmbeddingCache::open(
            index_dir.join(CACHE_FILE),
            provider.as_ref(),
            &config.embedding,
        )?;
        Ok(Self {
            config,
            provider,
            cache,
            store,
            index_dir,
        })
    }

    /// Build or refresh the index for `root`. With `force`, the manifest
    /// and store are discarded first and every file replays the added path;
    /// the embedding cache survives (it is content-addressed and
    /// model-scoped, so a rebuild reuses it).
    pub fn index(&mut self, root: &Path, force: bool) -> Result<IndexStats> {
        if force {
            info!("Forced reindex: discarding manifest and vector store");
            self.store.clear();
        }
        self.sync_tree(root)
    }

    /// Incrementally reconcile the index with the current state of `root`.
    pub fn update(&mut self, root: &Path) -> Result<IndexStats> {
        self.sync_tree(root)
    }

    /// Persist the store to its index directory.
    pub fn persist(&self) -> Result<()> {
        self.store.save(&self.index_dir)
    }

    /// Headline numbers for the persisted store.
    pub fn stats(&self) -> StoreStats {
        StoreStats {
            model_id: self.store.model_id().to_string(),
            dimension: self.store.dimension(),
            file_count: self.store.file_count(),
            chunk_count: self.store.chunk_count(),
            index_size_on_disk: persistence::size_on_disk(&self.index_dir),
        }
    }

    /// Ranked semantic search; see [`crate::search`] for filter semantics.
    pub fn search(&self, query: &str, k: usize, filters: &SearchFilters) -> Result<SearchResponse> {
        crate::search::search(
            &self.store,
            &self.cache,
            self.provider.as_ref(),
            &self.config,
            query,
            k,
            filters,
        )
    }

    /// Chunks most similar to the named file, excluding the file itself.
    pub fn similar(&self, file_path: &str, k: usize) -> Result<SearchResponse> {
        crate::search::similar_to_file(&self.store, file_path, k)
    }

    /// Core reconciliation: classify every scanned file against the
    /// manifest and apply removals before insertions.
    fn sync_tree(&mut self, root: &Path) -> Result<IndexStats> {
        let policy = DiscoveryPolicy::from_config(&self.config.indexer);
        let outcome = scan_tree(root, &policy);

        let mut stats = IndexStats {
            files_scanned: outcome.files.len(),
            errors: outcome.errors,
            ..Default::default()
        };

        let scanned: Vec<(String, ContentHash)> = outcome
            .files
            .iter()
            .map(|file| (file.rel_path.clone(), file.hash))
            .collect();
        let diff = self.store.manifest.diff(&scanned);

        info!(
            scanned = stats.files_scanned,
            added = diff.added.len(),
            modified = diff.modified.len(),
            removed = diff.removed.len(),
            unchanged = diff.unchanged.len(),
            "Tree diff computed"
        );

        // Removed files: drop manifest entry, then the store entries it owns.
        for path in &diff.removed {
            if let Some(entry) = self.store.manifest.remove(path) {
                stats.chunks_removed += self.store.remove(&entry.chunk_ids);
            }
        }

        // Modified files: old chunks go first, then the file replays the
        // added path. If embedding fails below, the file is simply absent
        // from the index until a later run succeeds.
        for path in &diff.modified {
            if let Some(entry) = self.store.manifest.remove(path) {
                stats.chunks_removed += self.store.remove(&entry.chunk_ids);
            }
        }

        let by_path: FxHashMap<&str, &SourceFile> = outcome
            .files
            .iter()
            .map(|file| (file.rel_path.as_str(), file))
            .collect();

        let to_index: Vec<&SourceFile> = diff
            .modified
            .iter()
            .chain(diff.added.iter())
            .filter_map(|path| by_path.get(path.as_str()).copied())
            .collect();

        // Chunk extraction is CPU work with no store access; fan it out.
        let chunker = Chunker::new(&self.config.chunking);
        let mut chunked: Vec<(&SourceFile, Vec<Chunk>)> = to_index
            .par_iter()
            .map(|file| {
                let chunks = chunker.chunk_file(&file.content, &file.rel_path, &file.language);
                (*file, chunks)
            })
            .collect();
        chunked.sort_by(|a, b| a.0.rel_path.cmp(&b.0.rel_path));

        for (file, chunks) in chunked {
            match self.commit_file(file, chunks) {
                Ok(added) => stats.chunks_added += added,
                Err(error @ (IndexError::DimensionMismatch { .. } | IndexError::Corrupt { .. })) => {
                    return Err(error);
                }
                Err(error) => {
                    warn!(path = %file.rel_path, error = %error, "Failed to index file");
                    stats.errors.push(FileError::new(&file.rel_path, &error));
                }
            }
        }

        Ok(stats)
    }

    /// Embed and insert one file's chunks, then write its manifest entry.
    /// Nothing is inserted unless every chunk embedded, which keeps the
    /// "all chunks present or no manifest entry" invariant.
    fn commit_file(&mut self, file: &SourceFile, chunks: Vec<Chunk>) -> Result<usize> {
        if chunks.is_empty() {
            self.store
                .manifest
                .upsert(file.rel_path.clone(), file.hash, Vec::new());
            return Ok(0);
        }

        let items: Vec<(ContentHash, &str)> = chunks
            .iter()
            .map(|chunk| (chunk.content_hash, chunk.text.as_str()))
            .collect();
        let vectors = self
            .cache
            .embed_chunks(self.provider.as_ref(), &items, &self.config.embedding)?;

        for chunk in &chunks {
            if !vectors.contains_key(&chunk.content_hash) {
                return Err(IndexError::Provider(ProviderError::Api(
                    "provider returned no vector for chunk".into(),
                )));
            }
        }

        let mut chunk_ids = Vec::with_capacity(chunks.len());
        let count = chunks.len();
        for chunk in chunks {
            let vector = vectors[&chunk.content_hash].clone();
            let id = self.store.allocate_id();
            self.store.insert(id, chunk, vector)?;
            chunk_ids.push(id);
        }

        self.store
            .manifest
            .upsert(file.rel_path.clone(), file.hash, chunk_ids);
        Ok(count)
    }
}
