//! Semantic codebase indexing and retrieval.
//!
//! Walks a project tree, splits source files into line-anchored chunks,
//! embeds them through a pluggable provider behind a content-addressed
//! cache, and answers natural-language queries with ranked, filterable
//! results. Incremental updates re-embed only files whose content hash
//! changed.

pub mod chunking;
pub mod config;
pub mod discovery;
pub mod embed;
pub mod error;
pub mod hash;
pub mod index;
pub mod indexer;
pub mod search;

pub use config::Config;
pub use error::{FileError, IndexError, Result};
pub use indexer::{IndexStats, Indexer, StoreStats};
pub use search::{SearchFilters, SearchResponse, SearchResult, SearchStatus};
