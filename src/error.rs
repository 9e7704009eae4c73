//! Error types for indexing and retrieval.
//!
//! Per-file problems (unreadable files, exhausted embedding retries) are
//! collected into [`IndexStats`](crate::indexer::IndexStats) and never abort a
//! run. Structural problems (corrupt snapshot, dimension or model mismatch)
//! abort the current operation and require an explicit full reindex.

use std::path::PathBuf;

use crate::embed::provider::ProviderError;

/// Errors that can occur during indexing and search operations.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    /// A source file could not be read (permissions, encoding). Skipped with
    /// a warning; the run continues.
    #[error("cannot read {path}: {source}")]
    UnreadableFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Embedding provider failure after retries were exhausted.
    #[error("embedding provider error: {0}")]
    Provider(#[from] ProviderError),

    /// The persisted index could not be decoded. Callers must fall back to a
    /// full reindex.
    #[error("index at {path} is corrupt: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    /// A vector's length disagrees with the index dimension. Indicates a
    /// model or config change; never silently truncated or padded.
    #[error("vector dimension mismatch: index expects {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    /// The persisted index was built with a different embedding model than
    /// the one configured. Mixing models in one index is forbidden.
    #[error(
        "index was built with model '{index_model}' but '{configured}' is configured; \
         run a forced reindex"
    )]
    ModelMismatch {
        index_model: String,
        configured: String,
    },

    /// I/O error touching index storage.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Snapshot serialization error.
    #[error("serialization error: {0}")]
    Serialize(#[from] bincode::Error),
}

/// Result type alias using [`IndexError`].
pub type Result<T> = std::result::Result<T, IndexError>;

/// A non-fatal per-file failure recorded during an indexing run.
#[derive(Debug, Clone, serde::Serialize)]
pub struct FileError {
    /// Path of the file that failed, relative to the indexed root.
    pub path: String,
    /// Human-readable failure description.
    pub message: String,
}

impl FileError {
    pub fn new(path: impl Into<String>, error: &IndexError) -> Self {
        Self {
            path: path.into(),
            message: error.to_string(),
        }
    }
}
