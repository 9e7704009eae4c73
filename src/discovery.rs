//! Directory scanning and file filtering.
//!
//! Walks a source tree and yields the files eligible for indexing: extension
//! allow-list, excluded-directory patterns, a size ceiling, and binary
//! content detection. Unreadable files are reported as per-file warnings and
//! skipped; a scan never aborts because of a single bad file.

use rayon::prelude::*;
use std::path::{Path, PathBuf};
use tracing::warn;
use walkdir::WalkDir;

use crate::config::IndexerConfig;
use crate::error::{FileError, IndexError};
use crate::hash::ContentHash;

/// Filtering rules applied during a scan, derived from [`IndexerConfig`].
#[derive(Debug, Clone)]
pub struct DiscoveryPolicy {
    include_extensions: Vec<String>,
    exclude_patterns: Vec<String>,
    max_file_size: u64,
}

/// A readable source file selected for indexing.
#[derive(Debug, Clone)]
pub struct SourceFile {
    /// Path relative to the scanned root, with `/` separators.
    pub rel_path: String,
    /// Lowercase extension, used as the language tag.
    pub language: String,
    /// Whole-file content digest, drives incremental diffing.
    pub hash: ContentHash,
    /// Full text content.
    pub content: String,
}

/// Result of scanning a tree: eligible files plus per-file read failures.
#[derive(Debug, Default)]
pub struct ScanOutcome {
    pub files: Vec<SourceFile>,
    pub errors: Vec<FileError>,
}

impl DiscoveryPolicy {
    pub fn from_config(config: &IndexerConfig) -> Self {
        Self {
            include_extensions: config
                .include_extensions
                .iter()
                .map(|e| e.to_lowercase())
                .collect(),
            exclude_patterns: config
                .exclude_dirs
                .iter()
                .map(|p| p.trim_matches('*').trim_matches('/').to_string())
                .collect(),
            max_file_size: config.max_file_size,
        }
    }

    fn has_included_extension(&self, path: &Path) -> bool {
        match path.extension() {
            Some(ext) => {
                let ext = ext.to_string_lossy().to_lowercase();
                self.include_extensions.iter().any(|e| *e == ext)
            }
            None => false,
        }
    }

    fn is_excluded(&self, rel_path: &Path) -> bool {
        rel_path.components().any(|component| {
            let name = component.as_os_str().to_string_lossy();
            self.exclude_patterns.iter().any(|pattern| *pattern == name)
        })
    }
}

/// Scan `root` and return the files eligible for indexing, ordered by
/// relative path for deterministic downstream processing.
pub fn scan_tree(root: &Path, policy: &DiscoveryPolicy) -> ScanOutcome {
    let mut candidates: Vec<(PathBuf, String)> = Vec::new();

    for entry in WalkDir::new(root).follow_links(true) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(error = %e, "Skipping unreadable directory entry");
                continue;
            }
        };

        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let rel = match path.strip_prefix(root) {
            Ok(rel) => rel,
            Err(_) => continue,
        };

        if policy.is_excluded(rel) || !policy.has_included_extension(path) {
            continue;
        }

        match entry.metadata() {
            Ok(meta) if meta.len() > policy.max_file_size => {
                warn!(path = %rel.display(), size = meta.len(), "Skipping oversized file");
                continue;
            }
            Ok(_) => {}
            Err(_) => continue,
        }

        candidates.push((path.to_path_buf(), normalize_rel_path(rel)));
    }

    // Reads and hashing are the expensive part; fan out across the pool.
    let mut loaded: Vec<std::result::Result<SourceFile, FileError>> = candidates
        .par_iter()
        .filter_map(|(abs_path, rel_path)| load_source_file(abs_path, rel_path))
        .collect();

    // Parallel collection order is nondeterministic; restore path order.
    loaded.sort_by(|a, b| {
        let key = |r: &std::result::Result<SourceFile, FileError>| match r {
            Ok(f) => f.rel_path.clone(),
            Err(e) => e.path.clone(),
        };
        key(a).cmp(&key(b))
    });

    let mut outcome = ScanOutcome::default();
    for item in loaded {
        match item {
            Ok(file) => outcome.files.push(file),
            Err(error) => outcome.errors.push(error),
        }
    }
    outcome
}

/// Read and hash a single candidate. Returns `None` for files that are
/// filtered (binary, empty), `Some(Err)` for genuine read failures.
fn load_source_file(
    abs_path: &Path,
    rel_path: &str,
) -> Option<std::result::Result<SourceFile, FileError>> {
    let content = match std::fs::read_to_string(abs_path) {
        Ok(content) => content,
        Err(source) => {
            warn!(path = rel_path, error = %source, "Could not read file, skipping");
            let error = IndexError::UnreadableFile {
                path: rel_path.to_string(),
                source,
            };
            return Some(Err(FileError::new(rel_path, &error)));
        }
    };

    if content.trim().is_empty() || is_binary_content(&content) {
        return None;
    }

    let language = abs_path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();

    Some(Ok(SourceFile {
        rel_path: rel_path.to_string(),
        language,
        hash: ContentHash::of(&content),
        content,
    }))
}

/// Render a relative path with forward slashes regardless of platform.
fn normalize_rel_path(rel: &Path) -> String {
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Check if content appears to be binary (null bytes or a high ratio of
/// non-printable characters in the first 8KB).
pub fn is_binary_content(content: &str) -> bool {
    let check_len = content.len().min(8192);
    let sample = &content.as_bytes()[..check_len];

    let mut non_text_count = 0;
    for &byte in sample {
        if byte == 0 {
            return true;
        }
        if byte < 32 && !matches!(byte, b'\t' | b'\n' | b'\r') {
            non_text_count += 1;
        }
    }

    non_text_count > check_len / 10
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IndexerConfig;
    use tempfile::TempDir;

    fn policy() -> DiscoveryPolicy {
        DiscoveryPolicy::from_config(&IndexerConfig::default())
    }

    #[test]
    fn test_scan_filters_by_extension() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("keep.rs"), "fn main() {}").unwrap();
        std::fs::write(dir.path().join("skip.exe"), "MZ binary").unwrap();

        let outcome = scan_tree(dir.path(), &policy());
        assert_eq!(outcome.files.len(), 1);
        assert_eq!(outcome.files[0].rel_path, "keep.rs");
        assert_eq!(outcome.files[0].language, "rs");
    }

    #[test]
    fn test_scan_skips_excluded_dirs() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("node_modules/pkg")).unwrap();
        std::fs::write(dir.path().join("node_modules/pkg/index.js"), "var x = 1;").unwrap();
        std::fs::write(dir.path().join("app.js"), "var y = 2;").unwrap();

        let outcome = scan_tree(dir.path(), &policy());
        let paths: Vec<_> = outcome.files.iter().map(|f| f.rel_path.as_str()).collect();
        assert_eq!(paths, vec!["app.js"]);
    }

    #[test]
    fn test_scan_skips_empty_files() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("empty.py"), "   \n").unwrap();
        std::fs::write(dir.path().join("full.py"), "x = 1").unwrap();

        let outcome = scan_tree(dir.path(), &policy());
        assert_eq!(outcome.files.len(), 1);
        assert_eq!(outcome.files[0].rel_path, "full.py");
    }

    #[test]
    fn test_scan_is_ordered() {
        let dir = TempDir::new().unwrap();
        for name in ["c.py", "a.py", "b.py"] {
            std::fs::write(dir.path().join(name), "x = 1").unwrap();
        }

        let outcome = scan_tree(dir.path(), &policy());
        let paths: Vec<_> = outcome.files.iter().map(|f| f.rel_path.as_str()).collect();
        assert_eq!(paths, vec!["a.py", "b.py", "c.py"]);
    }

    #[test]
    fn test_binary_detection() {
        assert!(is_binary_content("text\0with null"));
        assert!(!is_binary_content("fn main() {\n\tprintln!(\"ok\");\n}"));
    }
}
