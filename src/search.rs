//! Query-time ranking over the vector store.
//!
//! A query is embedded once (memoized per session), scanned against the
//! store, and post-filtered. Raw cosine similarity in [-1, 1] is normalized
//! to a [0, 1] relevance score for display; ordering is by descending raw
//! similarity with insertion-order tie-breaking, inherited from the store.
//!
//! Filters compose with AND and are applied after retrieval. When filters
//! are present the store is over-fetched by a configurable factor so that
//! `k` results can survive filtering; returning fewer than `k` is a normal
//! outcome, not an error.

use globset::Glob;
use serde::Serialize;
use tracing::{debug, warn};

use crate::chunking::Chunk;
use crate::config::Config;
use crate::embed::provider::EmbeddingProvider;
use crate::embed::EmbeddingCache;
use crate::error::Result;
use crate::index::{ChunkId, IndexStore};

/// Whether the index was usable for the query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchStatus {
    Ready,
    /// The index has never been built (or holds no chunks).
    NoIndex,
}

/// One ranked hit.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub chunk: Chunk,
    /// Normalized relevance in [0, 1].
    pub score: f32,
    /// 1-based position in the result list.
    pub rank: usize,
}

#[derive(Debug, Serialize)]
pub struct SearchResponse {
    pub status: SearchStatus,
    pub results: Vec<SearchResult>,
}

impl SearchResponse {
    fn empty(status: SearchStatus) -> Self {
        Self {
            status,
            results: Vec::new(),
        }
    }
}

/// Post-retrieval filters. All present filters must match.
#[derive(Debug, Clone, Default)]
pub struct SearchFilters {
    /// Restrict to these file extensions (lowercase, without dot).
    pub extensions: Vec<String>,
    /// Glob over the relative file path; patterns that fail to compile
    /// degrade to substring matching.
    pub path_glob: Option<String>,
    /// Drop results below this normalized score.
    pub min_score: Option<f32>,
}

impl SearchFilters {
    pub fn is_empty(&self) -> bool {
        self.extensions.is_empty() && self.path_glob.is_none() && self.min_score.is_none()
    }

    fn compile(&self) -> CompiledFilters {
        let path_matcher = self.path_glob.as_ref().map(|pattern| {
            match Glob::new(pattern) {
                Ok(glob) => PathMatcher::Glob(glob.compile_matcher()),
                Err(error) => {
                    warn!(pattern = %pattern, error = %error, "Invalid path glob, matching as substring");
                    PathMatcher::Substring(pattern.clone())
                }
            }
        });
        CompiledFilters {
            extensions: self.extensions.iter().map(|e| e.to_lowercase()).collect(),
            path_matcher,
            min_score: self.min_score,
        }
    }
}

enum PathMatcher {
    Glob(globset::GlobMatcher),
    Substring(String),
}

struct CompiledFilters {
    extensions: Vec<String>,
    path_matcher: Option<PathMatcher>,
    min_score: Option<f32>,
}

impl CompiledFilters {
    fn matches(&self, chunk: &Chunk, score: f32) -> bool {
        if !self.extensions.is_empty() && !self.extensions.contains(&chunk.language) {
            return false;
        }
        if let Some(matcher) = &self.path_matcher {
            let matched = match matcher {
                PathMatcher::Glob(glob) => glob.is_match(&chunk.file_path),
                PathMatcher::Substring(needle) => chunk.file_path.contains(needle.as_str()),
            };
            if !matched {
                return false;
            }
        }
        if let Some(min) = self.min_score {
            if score < min {
                return false;
            }
        }
        true
    }
}

/// Map cosine similarity from [-1, 1] to a [0, 1] display score.
fn normalize_score(similarity: f32) -> f32 {
    ((similarity + 1.0) / 2.0).clamp(0.0, 1.0)
}

/// Embed `query` and return the top `k` chunks passing `filters`.
pub fn search(
    store: &IndexStore,
    cache: &EmbeddingCache,
    provider: &dyn EmbeddingProvider,
    config: &Config,
    query: &str,
    k: usize,
    filters: &SearchFilters,
) -> Result<SearchResponse> {
    if store.is_empty() {
        return Ok(SearchResponse::empty(SearchStatus::NoIndex));
    }
    if k == 0 || query.trim().is_empty() {
        return Ok(SearchResponse::empty(SearchStatus::Ready));
    }

    let query_vector = cache.embed_query(provider, query, &config.embedding)?;

    let fetch = if filters.is_empty() {
        k
    } else {
        k.saturating_mul(config.search.overfetch_factor.max(1))
    };

    let mut candidates = store.search(&query_vector, fetch);
    let compiled = filters.compile();

    let mut results = collect_results(store, &candidates, &compiled, k);

    // Filters can eat the whole over-fetched window; fall back to scanning
    // everything before reporting fewer than k.
    if results.len() < k && !filters.is_empty() && candidates.len() == fetch {
        let total = store.chunk_count();
        if fetch < total {
            candidates = store.search(&query_vector, total);
            results = collect_results(store, &candidates, &compiled, k);
        }
    }

    debug!(
        query_len = query.len(),
        candidates = candidates.len(),
        results = results.len(),
        "Search completed"
    );
    Ok(SearchResponse {
        status: SearchStatus::Ready,
        results,
    })
}

/// Rank chunks similar to an indexed file: the file's chunk vectors are
/// averaged into one query and its own chunks are excluded from the results.
/// The path must match a manifest entry exactly or by unique path suffix.
pub fn similar_to_file(store: &IndexStore, file_path: &str, k: usize) -> Result<SearchResponse> {
    if store.is_empty() {
        return Ok(SearchResponse::empty(SearchStatus::NoIndex));
    }

    let Some(resolved) = resolve_path(store, file_path) else {
        warn!(path = %file_path, "File is not in the index");
        return Ok(SearchResponse::empty(SearchStatus::Ready));
    };

    let Some(entry) = store.manifest.entry(&resolved).cloned() else {
        return Ok(SearchResponse::empty(SearchStatus::Ready));
    };

    let mut centroid: Option<Vec<f32>> = None;
    let mut contributing = 0usize;
    for id in &entry.chunk_ids {
        if let Some(vector) = store.vector(*id) {
            match &mut centroid {
                None => centroid = Some(vector.to_vec()),
                Some(sum) => {
                    for (acc, value) in sum.iter_mut().zip(vector) {
                        *acc += value;
                    }
                }
            }
            contributing += 1;
        }
    }
    let Some(mut centroid) = centroid else {
        return Ok(SearchResponse::empty(SearchStatus::Ready));
    };
    for value in centroid.iter_mut() {
        *value /= contributing as f32;
    }

    // Over-fetch by the file's own chunk count, which is exactly how many
    // candidates the self-exclusion below can discard.
    let fetch = k.saturating_add(entry.chunk_ids.len());
    let candidates = store.search(&centroid, fetch);

    let mut results = Vec::with_capacity(k);
    for (id, similarity) in &candidates {
        if let Some(chunk) = store.chunk(*id) {
            if chunk.file_path == resolved {
                continue;
            }
            results.push(SearchResult {
                chunk: chunk.clone(),
                score: normalize_score(*similarity),
                rank: results.len() + 1,
            });
            if results.len() == k {
                break;
            }
        }
    }

    Ok(SearchResponse {
        status: SearchStatus::Ready,
        results,
    })
}

fn collect_results(
    store: &IndexStore,
    candidates: &[(ChunkId, f32)],
    filters: &CompiledFilters,
    k: usize,
) -> Vec<SearchResult> {
    let mut results = Vec::with_capacity(k);
    for (id, similarity) in candidates {
        let Some(chunk) = store.chunk(*id) else {
            continue;
        };
        let score = normalize_score(*similarity);
        if !filters.matches(chunk, score) {
            continue;
        }
        results.push(SearchResult {
            chunk: chunk.clone(),
            score,
            rank: results.len() + 1,
        });
        if results.len() == k {
            break;
        }
    }
    results
}

/// Exact manifest match first, then a unique suffix match so callers can
/// pass `utils/helpers.py` or an absolute path for the same file.
fn resolve_path(store: &IndexStore, file_path: &str) -> Option<String> {
    let normalized = file_path.replace('\\', "/");
    if store.manifest.entry(&normalized).is_some() {
        return Some(normalized);
    }

    let mut matches: Vec<&String> = store
        .manifest
        .files()
        .map(|(path, _)| path)
        .filter(|path| normalized.ends_with(path.as_str()) || path.ends_with(&normalized))
        .collect();
    matches.sort();
    match matches.as_slice() {
        [single] => Some((*single).clone()),
        [] => None,
        multiple => {
            warn!(
                path = %file_path,
                candidates = multiple.len(),
                "Ambiguous file path, not resolving"
            );
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::embed::hashed::HashedProvider;
    use crate::embed::EmbeddingCache;
    use crate::hash::ContentHash;
    use tempfile::TempDir;

    fn chunk(path: &str, language: &str, text: &str) -> Chunk {
        Chunk {
            file_path: path.into(),
            start_line: 1,
            end_line: 1,
            language: language.into(),
            text: text.into(),
            content_hash: ContentHash::of(text),
        }
    }

    fn store_with(entries: &[(&str, &str, Vec<f32>)]) -> IndexStore {
        let mut store = IndexStore::new("test-model".into(), 2);
        for (path, language, vector) in entries {
            let id = store.allocate_id();
            let c = chunk(path, language, &format!("text of {path}"));
            let hash = c.content_hash;
            store.insert(id, c, vector.clone()).unwrap();
            store.manifest.upsert((*path).into(), hash, vec![id]);
        }
        store
    }

    fn cache_for(provider: &HashedProvider, dir: &TempDir) -> EmbeddingCache {
        EmbeddingCache::open(
            dir.path().join("cache.bin"),
            provider,
            &Config::default().embedding,
        )
        .unwrap()
    }

    #[test]
    fn test_empty_store_reports_no_index() {
        let dir = TempDir::new().unwrap();
        let provider = HashedProvider::new(64);
        let cache = cache_for(&provider, &dir);
        let store = IndexStore::new(provider.model_id().to_string(), 64);

        let response = search(
            &store,
            &cache,
            &provider,
            &Config::default(),
            "anything",
            5,
            &SearchFilters::default(),
        )
        .unwrap();
        assert_eq!(response.status, SearchStatus::NoIndex);
        assert!(response.results.is_empty());
    }

    #[test]
    fn test_scores_normalized_and_ranked() {
        let store = store_with(&[
            ("a.py", "py", vec![1.0, 0.0]),
            ("b.py", "py", vec![0.0, 1.0]),
        ]);
        let candidates = store.search(&[1.0, 0.0], 2);
        let filters = SearchFilters::default().compile();
        let results = collect_results(&store, &candidates, &filters, 2);

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].chunk.file_path, "a.py");
        assert_eq!(results[0].rank, 1);
        assert_eq!(results[1].rank, 2);
        // Orthogonal vector maps to 0.5, identical to 1.0
        assert!((results[0].score - 1.0).abs() < 1e-5);
        assert!((results[1].score - 0.5).abs() < 1e-5);
        assert!(results.iter().all(|r| (0.0..=1.0).contains(&r.score)));
    }

    #[test]
    fn test_extension_filter() {
        let store = store_with(&[
            ("a.py", "py", vec![1.0, 0.0]),
            ("b.md", "md", vec![0.9, 0.1]),
        ]);
        let filters = SearchFilters {
            extensions: vec!["md".into()],
            ..Default::default()
        }
        .compile();
        let candidates = store.search(&[1.0, 0.0], 2);
        let results = collect_results(&store, &candidates, &filters, 2);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].chunk.file_path, "b.md");
        assert_eq!(results[0].rank, 1);
    }

    #[test]
    fn test_path_glob_filter() {
        let c = chunk("src/auth/login.py", "py", "login");
        let glob = SearchFilters {
            path_glob: Some("src/**/*.py".into()),
            ..Default::default()
        }
        .compile();
        assert!(glob.matches(&c, 1.0));

        let miss = SearchFilters {
            path_glob: Some("tests/**".into()),
            ..Default::default()
        }
        .compile();
        assert!(!miss.matches(&c, 1.0));
    }

    #[test]
    fn test_invalid_glob_degrades_to_substring() {
        // An unclosed character class cannot compile as a glob, so the
        // pattern matches as a plain substring instead.
        let c = chunk("src/data[1]/x.py", "py", "data");
        let fallback = SearchFilters {
            path_glob: Some("data[1".into()),
            ..Default::default()
        }
        .compile();
        assert!(fallback.matches(&c, 1.0));

        let other = chunk("src/other/x.py", "py", "other");
        assert!(!fallback.matches(&other, 1.0));
    }

    #[test]
    fn test_min_score_filter() {
        let store = store_with(&[
            ("a.py", "py", vec![1.0, 0.0]),
            ("b.py", "py", vec![0.0, 1.0]),
        ]);
        let filters = SearchFilters {
            min_score: Some(0.9),
            ..Default::default()
        }
        .compile();
        let candidates = store.search(&[1.0, 0.0], 2);
        let results = collect_results(&store, &candidates, &filters, 2);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].chunk.file_path, "a.py");
    }

    #[test]
    fn test_end_to_end_search_finds_relevant_chunk() {
        let dir = TempDir::new().unwrap();
        let provider = HashedProvider::new(256);
        let cache = cache_for(&provider, &dir);

        let mut store = IndexStore::new(provider.model_id().to_string(), 256);
        for (path, text) in [
            ("a.py", "def f():\n    return 1"),
            ("b.py", "def g():\n    return 2"),
            ("c.md", "notes about the weather"),
        ] {
            let id = store.allocate_id();
            let vector = provider.embed_batch(&[text]).unwrap().pop().unwrap();
            let c = chunk(path, path.rsplit('.').next().unwrap(), text);
            let hash = c.content_hash;
            store.insert(id, c, vector).unwrap();
            store.manifest.upsert(path.into(), hash, vec![id]);
        }

        let response = search(
            &store,
            &cache,
            &provider,
            &Config::default(),
            "function returning 1",
            1,
            &SearchFilters::default(),
        )
        .unwrap();
        assert_eq!(response.status, SearchStatus::Ready);
        assert_eq!(response.results.len(), 1);
        assert_eq!(response.results[0].chunk.file_path, "a.py");
        assert_eq!(response.results[0].rank, 1);
    }

    #[test]
    fn test_similar_excludes_own_file() {
        let store = store_with(&[
            ("a.py", "py", vec![1.0, 0.0]),
            ("b.py", "py", vec![0.9, 0.1]),
            ("c.py", "py", vec![0.0, 1.0]),
        ]);

        let response = similar_to_file(&store, "a.py", 2).unwrap();
        assert_eq!(response.status, SearchStatus::Ready);
        let paths: Vec<&str> = response
            .results
            .iter()
            .map(|r| r.chunk.file_path.as_str())
            .collect();
        assert!(!paths.contains(&"a.py"));
        assert_eq!(paths[0], "b.py");
    }

    #[test]
    fn test_similar_resolves_suffix_path() {
        let store = store_with(&[
            ("src/utils/helpers.py", "py", vec![1.0, 0.0]),
            ("src/main.py", "py", vec![0.5, 0.5]),
        ]);
        let response = similar_to_file(&store, "helpers.py", 1).unwrap();
        assert_eq!(response.results.len(), 1);
        assert_eq!(response.results[0].chunk.file_path, "src/main.py");
    }

    #[test]
    fn test_similar_unknown_file_is_empty() {
        let store = store_with(&[("a.py", "py", vec![1.0, 0.0])]);
        let response = similar_to_file(&store, "missing.py", 3).unwrap();
        assert_eq!(response.status, SearchStatus::Ready);
        assert!(response.results.is_empty());
    }
}
