//! Configuration management for the indexer and search engine.
//!
//! Supports loading configuration from TOML files with CLI overrides.
//! Defaults match the common case: indexing a single project directory into
//! `.code_context/` next to it.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main configuration, split into per-concern sections.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub indexer: IndexerConfig,

    #[serde(default)]
    pub chunking: ChunkingConfig,

    #[serde(default)]
    pub embedding: EmbeddingConfig,

    #[serde(default)]
    pub search: SearchConfig,
}

/// File discovery and index storage settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexerConfig {
    /// Directory holding the persisted index, manifest, and embedding cache.
    #[serde(default = "default_index_dir")]
    pub index_dir: PathBuf,

    /// File extensions eligible for indexing (lowercase, without dot).
    #[serde(default = "default_include_extensions")]
    pub include_extensions: Vec<String>,

    /// Directory-name patterns to skip (matched as path substrings).
    #[serde(default = "default_exclude_dirs")]
    pub exclude_dirs: Vec<String>,

    /// Files larger than this (bytes) are skipped.
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,
}

/// Chunk extraction settings (all values in lines).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkingConfig {
    /// Window size for the fixed-size fallback chunker.
    #[serde(default = "default_window_lines")]
    pub window_lines: usize,

    /// Overlap between adjacent fixed-size windows.
    #[serde(default = "default_overlap_lines")]
    pub overlap_lines: usize,

    /// Syntactic units larger than this are re-split by line count.
    #[serde(default = "default_max_chunk_lines")]
    pub max_chunk_lines: usize,

    /// Adjacent units smaller than this are merged.
    #[serde(default = "default_min_chunk_lines")]
    pub min_chunk_lines: usize,
}

/// Embedding provider settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Provider backend: "hashed" (offline, deterministic) or "openai"
    /// (any OpenAI-compatible embeddings endpoint).
    #[serde(default = "default_provider")]
    pub provider: String,

    /// Model identifier sent to the remote provider.
    #[serde(default = "default_model")]
    pub model: String,

    /// Vector dimension for the hashed provider (remote providers report
    /// their own).
    #[serde(default = "default_hashed_dimension")]
    pub hashed_dimension: usize,

    /// Base URL of the OpenAI-compatible API.
    #[serde(default = "default_api_base")]
    pub api_base: String,

    /// Environment variable holding the API key. The key itself never
    /// appears in config files.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Expected vector dimension of the remote model.
    #[serde(default = "default_remote_dimension")]
    pub remote_dimension: usize,

    /// Maximum texts per provider request.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Retry attempts for transient provider failures.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base delay for exponential backoff between retries, in milliseconds.
    #[serde(default = "default_retry_base_ms")]
    pub retry_base_ms: u64,

    /// Per-request timeout, in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Maximum in-flight provider requests.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

/// Search-time settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Candidate multiplier when post-filters are present: the store is
    /// asked for `k * overfetch_factor` so `k` results can survive filtering.
    #[serde(default = "default_overfetch_factor")]
    pub overfetch_factor: usize,
}

fn default_index_dir() -> PathBuf {
    PathBuf::from(".code_context")
}

fn default_include_extensions() -> Vec<String> {
    [
        "py", "js", "ts", "jsx", "tsx", "java", "cpp", "c", "h", "hpp", "cs", "php", "rb", "go",
        "rs", "swift", "kt", "scala", "sh", "sql", "yaml", "yml", "json", "md", "txt", "rst",
        "toml", "cfg", "ini",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_exclude_dirs() -> Vec<String> {
    [
        "node_modules",
        ".git",
        "__pycache__",
        ".pytest_cache",
        "venv",
        ".venv",
        "env",
        "dist",
        "build",
        ".next",
        "target",
        "bin",
        "obj",
        ".mypy_cache",
        "coverage",
        ".tox",
        ".code_context",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_max_file_size() -> u64 {
    1024 * 1024 // 1MB
}

fn default_window_lines() -> usize {
    50
}

fn default_overlap_lines() -> usize {
    5
}

fn default_max_chunk_lines() -> usize {
    120
}

fn default_min_chunk_lines() -> usize {
    4
}

fn default_provider() -> String {
    "hashed".to_string()
}

fn default_model() -> String {
    "text-embedding-3-small".to_string()
}

fn default_hashed_dimension() -> usize {
    512
}

fn default_api_base() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_remote_dimension() -> usize {
    1536
}

fn default_batch_size() -> usize {
    32
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_base_ms() -> u64 {
    500
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_concurrency() -> usize {
    2
}

fn default_overfetch_factor() -> usize {
    4
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            index_dir: default_index_dir(),
            include_extensions: default_include_extensions(),
            exclude_dirs: default_exclude_dirs(),
            max_file_size: default_max_file_size(),
        }
    }
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            window_lines: default_window_lines(),
            overlap_lines: default_overlap_lines(),
            max_chunk_lines: default_max_chunk_lines(),
            min_chunk_lines: default_min_chunk_lines(),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            hashed_dimension: default_hashed_dimension(),
            api_base: default_api_base(),
            api_key_env: default_api_key_env(),
            remote_dimension: default_remote_dimension(),
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            retry_base_ms: default_retry_base_ms(),
            timeout_secs: default_timeout_secs(),
            concurrency: default_concurrency(),
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            overfetch_factor: default_overfetch_factor(),
        }
    }
}

impl Config {
    /// Load configuration from a file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Try to load configuration from default locations.
    ///
    /// Search order:
    /// 1. CODE_CONTEXT_CONFIG environment variable
    /// 2. ./code_context.toml (current directory)
    /// 3. ~/.config/code_context/config.toml (user config)
    pub fn from_default_locations() -> Result<Option<(Self, PathBuf)>> {
        if let Ok(env_path) = std::env::var("CODE_CONTEXT_CONFIG") {
            let path = PathBuf::from(&env_path);
            if path.exists() {
                let config = Self::from_file(&path)?;
                return Ok(Some((config, path)));
            }
        }

        let local_path = PathBuf::from("code_context.toml");
        if local_path.exists() {
            let config = Self::from_file(&local_path)?;
            return Ok(Some((config, local_path)));
        }

        if let Some(config_dir) = dirs::config_dir() {
            let user_path = config_dir.join("code_context").join("config.toml");
            if user_path.exists() {
                let config = Self::from_file(&user_path)?;
                return Ok(Some((config, user_path)));
            }
        }

        Ok(None)
    }

    /// Generate a template configuration file.
    pub fn generate_template() -> String {
        r#"# code_context configuration
# Generated template - customize as needed

[indexer]
# Directory holding the persisted index, manifest, and embedding cache
index_dir = ".code_context"

# Files larger than this (bytes) are skipped
max_file_size = 1048576

# Directory-name patterns to skip
exclude_dirs = [
    "node_modules", ".git", "__pycache__", "venv", ".venv",
    "dist", "build", "target", "coverage", ".code_context",
]

[chunking]
# Fixed-window fallback size and overlap, in lines
window_lines = 50
overlap_lines = 5

# Syntactic units above max are re-split; adjacent units below min are merged
max_chunk_lines = 120
min_chunk_lines = 4

[embedding]
# "hashed" runs fully offline; "openai" talks to any OpenAI-compatible endpoint
provider = "hashed"
model = "text-embedding-3-small"
api_base = "https://api.openai.com/v1"
api_key_env = "OPENAI_API_KEY"
remote_dimension = 1536

# Batching and retry behavior for remote providers
batch_size = 32
max_retries = 3
retry_base_ms = 500
timeout_secs = 30
concurrency = 2

[search]
# Candidate multiplier applied when post-filters are present
overfetch_factor = 4
"#
        .to_string()
    }

    /// Write template config to the specified path.
    pub fn write_template(path: &Path) -> Result<()> {
        let template = Self::generate_template();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        std::fs::write(path, template)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Merge CLI overrides into the configuration.
    pub fn with_overrides(mut self, index_dir: Option<PathBuf>, provider: Option<String>) -> Self {
        if let Some(dir) = index_dir {
            self.indexer.index_dir = dir;
        }
        if let Some(provider) = provider {
            self.embedding.provider = provider;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.indexer.index_dir, PathBuf::from(".code_context"));
        assert!(config.indexer.include_extensions.contains(&"rs".to_string()));
        assert!(config
            .indexer
            .exclude_dirs
            .contains(&"node_modules".to_string()));
        assert_eq!(config.embedding.provider, "hashed");
        assert_eq!(config.search.overfetch_factor, 4);
    }

    #[test]
    fn test_parse_minimal_config() {
        let toml = r#"
[indexer]
index_dir = "/tmp/idx"

[embedding]
provider = "openai"
model = "text-embedding-ada-002"
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.indexer.index_dir, PathBuf::from("/tmp/idx"));
        assert_eq!(config.embedding.provider, "openai");
        assert_eq!(config.embedding.model, "text-embedding-ada-002");
        // Unspecified sections keep their defaults
        assert_eq!(config.chunking.window_lines, 50);
    }

    #[test]
    fn test_template_parses_back() {
        let template = Config::generate_template();
        let config: Config = toml::from_str(&template).unwrap();
        assert_eq!(config.embedding.provider, "hashed");
    }

    #[test]
    fn test_overrides() {
        let config = Config::default()
            .with_overrides(Some(PathBuf::from("/elsewhere")), Some("openai".into()));
        assert_eq!(config.indexer.index_dir, PathBuf::from("/elsewhere"));
        assert_eq!(config.embedding.provider, "openai");
    }
}
