//! Content-addressed embedding cache.
//!
//! Maps content digests to previously computed vectors so unchanged chunks
//! never hit the provider twice. Misses are batched into bounded-size
//! requests, retried with exponential backoff on transient failures, and
//! persisted before the vectors are handed back, so a crash between caching
//! and index insertion cannot duplicate provider calls on retry.
//!
//! The cache is model-scoped: entries recorded under a different model id or
//! dimension are discarded wholesale on load.

use fs2::FileExt;
use rayon::prelude::*;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::provider::{EmbeddingProvider, ProviderError};
use crate::config::EmbeddingConfig;
use crate::error::{IndexError, Result};
use crate::hash::ContentHash;

const CACHE_VERSION: u32 = 1;
const QUERY_MEMO_CAPACITY: usize = 32;

/// Persistent content-hash -> vector cache plus a per-session query memo.
pub struct EmbeddingCache {
    path: PathBuf,
    model_id: String,
    dimension: usize,
    entries: FxHashMap<ContentHash, Vec<f32>>,
    pool: rayon::ThreadPool,
    query_memo: Mutex<QueryMemo>,
}

/// On-disk cache layout.
#[derive(Serialize, Deserialize)]
struct PersistedCache {
    version: u32,
    model_id: String,
    dimension: usize,
    entries: FxHashMap<ContentHash, Vec<f32>>,
}

impl EmbeddingCache {
    /// Open the cache at `path`, discarding any persisted entries recorded
    /// under a different model or dimension.
    pub fn open(path: PathBuf, provider: &dyn EmbeddingProvider, config: &EmbeddingConfig) -> Result<Self> {
        let model_id = provider.model_id().to_string();
        let dimension = provider.dimension();

        let entries = match load_entries(&path) {
            Some(persisted)
                if persisted.model_id == model_id && persisted.dimension == dimension =>
            {
                debug!(entries = persisted.entries.len(), "Loaded embedding cache");
                persisted.entries
            }
            Some(persisted) => {
                info!(
                    cached_model = %persisted.model_id,
                    configured_model = %model_id,
                    "Embedding cache belongs to a different model, starting fresh"
                );
                FxHashMap::default()
            }
            None => FxHashMap::default(),
        };

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.concurrency.max(1))
            .build()
            .map_err(|e| IndexError::Corrupt {
                path: path.clone(),
                reason: format!("failed to build embedding worker pool: {e}"),
            })?;

        Ok(Self {
            path,
            model_id,
            dimension,
            entries,
            pool,
            query_memo: Mutex::new(QueryMemo::new(QUERY_MEMO_CAPACITY)),
        })
    }

    /// Number of cached vectors.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Embed a set of `(content_hash, text)` pairs, returning a vector per
    /// distinct hash. Cache hits short-circuit without provider calls;
    /// misses go out in batches of at most `batch_size`, dispatched across
    /// at most `concurrency` in-flight requests.
    ///
    /// Successfully embedded batches are persisted even when a later batch
    /// fails, so partial progress survives the returned error.
    pub fn embed_chunks(
        &mut self,
        provider: &dyn EmbeddingProvider,
        items: &[(ContentHash, &str)],
        config: &EmbeddingConfig,
    ) -> Result<FxHashMap<ContentHash, Vec<f32>>> {
        // Deduplicate misses while preserving first-seen order.
        let mut misses: Vec<(ContentHash, &str)> = Vec::new();
        let mut seen: FxHashMap<ContentHash, ()> = FxHashMap::default();
        for (hash, text) in items {
            if !self.entries.contains_key(hash) && seen.insert(*hash, ()).is_none() {
                misses.push((*hash, text));
            }
        }

        if !misses.is_empty() {
            debug!(
                hits = items.len() - misses.len(),
                misses = misses.len(),
                "Embedding cache lookup"
            );
            self.fill_misses(provider, &misses, config)?;
        }

        let mut out = FxHashMap::default();
        for (hash, _) in items {
            if let Some(vector) = self.entries.get(hash) {
                out.insert(*hash, vector.clone());
            }
        }
        Ok(out)
    }

    /// Embed query text. Bypasses the persistent cache (queries are not
    /// chunks) but memoizes within the session so repeated queries are free.
    pub fn embed_query(
        &self,
        provider: &dyn EmbeddingProvider,
        text: &str,
        config: &EmbeddingConfig,
    ) -> Result<Vec<f32>> {
        if let Some(vector) = self.query_memo.lock().unwrap().get(text) {
            return Ok(vector);
        }

        let retry = RetryPolicy::from_config(config);
        let mut vectors = embed_with_retry(provider, &[text], &retry)?;
        let vector = vectors.pop().ok_or_else(|| {
            IndexError::Provider(ProviderError::Api("empty response for query".into()))
        })?;
        if vector.len() != self.dimension {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimension,
                got: vector.len(),
            });
        }

        self.query_memo
            .lock()
            .unwrap()
            .insert(text.to_string(), vector.clone());
        Ok(vector)
    }

    /// Request all missing vectors and merge results. Partial successes are
    /// persisted before any error is surfaced.
    fn fill_misses(
        &mut self,
        provider: &dyn EmbeddingProvider,
        misses: &[(ContentHash, &str)],
        config: &EmbeddingConfig,
    ) -> Result<()> {
        let batch_size = config.batch_size.max(1);
        let retry = RetryPolicy::from_config(config);

        let batches: Vec<&[(ContentHash, &str)]> = misses.chunks(batch_size).collect();
        let results: Vec<std::result::Result<Vec<(ContentHash, Vec<f32>)>, ProviderError>> =
            self.pool.install(|| {
                batches
                    .par_iter()
                    .map(|batch| {
                        let texts: Vec<&str> = batch.iter().map(|(_, text)| *text).collect();
                        let vectors = embed_with_retry(provider, &texts, &retry)?;
                        Ok(batch
                            .iter()
                            .map(|(hash, _)| *hash)
                            .zip(vectors)
                            .collect())
                    })
                    .collect()
            });

        let mut first_error: Option<ProviderError> = None;
        let mut inserted = 0usize;
        for result in results {
            match result {
                Ok(pairs) => {
                    for (hash, vector) in pairs {
                        if vector.len() != self.dimension {
                            return Err(IndexError::DimensionMismatch {
                                expected: self.dimension,
                                got: vector.len(),
                            });
                        }
                        self.entries.insert(hash, vector);
                        inserted += 1;
                    }
                }
                Err(error) => {
                    if first_error.is_none() {
                        first_error = Some(error);
                    }
                }
            }
        }

        if inserted > 0 {
            self.save()?;
        }

        match first_error {
            Some(error) => Err(IndexError::Provider(error)),
            None => Ok(()),
        }
    }

    /// Write the cache to disk with an exclusive lock.
    fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = std::fs::File::create(&self.path)?;
        file.lock_exclusive()?;

        let persisted = PersistedCache {
            version: CACHE_VERSION,
            model_id: self.model_id.clone(),
            dimension: self.dimension,
            entries: self.entries.clone(),
        };
        let writer = std::io::BufWriter::new(&file);
        bincode::serialize_into(writer, &persisted)?;
        Ok(())
    }
}

/// Load persisted entries if the file exists and decodes. A broken cache is
/// derived data and is silently rebuilt, unlike a broken index snapshot.
fn load_entries(path: &Path) -> Option<PersistedCache> {
    if !path.exists() {
        return None;
    }
    let file = std::fs::File::open(path).ok()?;
    file.lock_shared().ok()?;
    let reader = std::io::BufReader::new(&file);
    match bincode::deserialize_from::<_, PersistedCache>(reader) {
        Ok(persisted) if persisted.version == CACHE_VERSION => Some(persisted),
        Ok(_) => {
            warn!(path = %path.display(), "Embedding cache has an old format, rebuilding");
            None
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Embedding cache unreadable, rebuilding");
            None
        }
    }
}

/// Retry parameters for transient provider failures.
struct RetryPolicy {
    max_retries: u32,
    base_delay: Duration,
}

impl RetryPolicy {
    fn from_config(config: &EmbeddingConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: Duration::from_millis(config.retry_base_ms),
        }
    }
}

/// Call the provider, retrying transient failures with exponential backoff.
/// Non-transient failures and exhausted retries surface to the caller, which
/// decides whether to skip the affected chunks or abort.
fn embed_with_retry(
    provider: &dyn EmbeddingProvider,
    texts: &[&str],
    retry: &RetryPolicy,
) -> std::result::Result<Vec<Vec<f32>>, ProviderError> {
    let mut attempt = 0u32;
    loop {
        match provider.embed_batch(texts) {
            Ok(vectors) => return Ok(vectors),
            Err(error) if error.is_transient() && attempt < retry.max_retries => {
                let delay = retry.base_delay * 2u32.saturating_pow(attempt);
                warn!(
                    attempt = attempt + 1,
                    max = retry.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "Transient embedding failure, backing off"
                );
                std::thread::sleep(delay);
                attempt += 1;
            }
            Err(error) => return Err(error),
        }
    }
}

/// Small LRU memo for query embeddings within one session.
struct QueryMemo {
    entries: FxHashMap<String, Vec<f32>>,
    order: Vec<String>,
    capacity: usize,
}

impl QueryMemo {
    fn new(capacity: usize) -> Self {
        Self {
            entries: FxHashMap::default(),
            order: Vec::with_capacity(capacity),
            capacity,
        }
    }

    fn get(&mut self, query: &str) -> Option<Vec<f32>> {
        let vector = self.entries.get(query)?.clone();
        // Refresh recency
        self.order.retain(|q| q != query);
        self.order.push(query.to_string());
        Some(vector)
    }

    fn insert(&mut self, query: String, vector: Vec<f32>) {
        if self.entries.contains_key(&query) {
            self.order.retain(|q| *q != query);
        } else if self.entries.len() >= self.capacity {
            if !self.order.is_empty() {
                let evicted = self.order.remove(0);
                self.entries.remove(&evicted);
            }
        }
        self.entries.insert(query.clone(), vector);
        self.order.push(query);
    }
}
