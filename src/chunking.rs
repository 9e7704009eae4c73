//! Chunk extraction for semantic indexing.
//!
//! Splits file content into retrievable units. Prefers lightweight syntactic
//! boundaries (top-level declarations, markdown headings) keyed by language
//! tag, and falls back to fixed-size sliding windows with overlap when no
//! boundary detector applies. This is best-effort: boundary detection is a
//! line heuristic, not a parser.

use serde::{Deserialize, Serialize};

use crate::config::ChunkingConfig;
use crate::hash::ContentHash;

/// A contiguous slice of a source file treated as one retrievable unit.
///
/// Immutable once created: editing content yields a new chunk with a new
/// hash, never a mutation of an existing one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    /// Path relative to the indexed root.
    pub file_path: String,
    /// First line of the chunk, 1-based inclusive.
    pub start_line: usize,
    /// Last line of the chunk, 1-based inclusive.
    pub end_line: usize,
    /// Language tag (lowercase file extension).
    pub language: String,
    /// The chunk text.
    pub text: String,
    /// Digest of `text`, the embedding cache key.
    pub content_hash: ContentHash,
}

/// Boundary detection family for a language tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundaryStyle {
    /// Brace-delimited languages: boundaries at unindented declarations.
    Brace,
    /// Indentation languages: boundaries at column-zero `def`/`class`.
    Indent,
    /// Markdown: boundaries at headings.
    Heading,
    /// No detector; fixed windows only.
    Plain,
}

/// Map a language tag to its boundary detector.
pub fn boundary_style(language: &str) -> BoundaryStyle {
    match language {
        "rs" | "js" | "jsx" | "ts" | "tsx" | "java" | "c" | "h" | "cpp" | "hpp" | "cs" | "go"
        | "swift" | "kt" | "scala" | "php" => BoundaryStyle::Brace,
        "py" | "rb" => BoundaryStyle::Indent,
        "md" => BoundaryStyle::Heading,
        _ => BoundaryStyle::Plain,
    }
}

/// Chunk extraction strategy with configured size bounds.
pub struct Chunker {
    window_lines: usize,
    overlap_lines: usize,
    max_chunk_lines: usize,
    min_chunk_lines: usize,
}

impl Chunker {
    pub fn new(config: &ChunkingConfig) -> Self {
        Self {
            window_lines: config.window_lines.max(1),
            overlap_lines: config.overlap_lines,
            max_chunk_lines: config.max_chunk_lines.max(1),
            min_chunk_lines: config.min_chunk_lines,
        }
    }

    /// Split file content into an ordered sequence of chunks covering it.
    pub fn chunk_file(&self, content: &str, rel_path: &str, language: &str) -> Vec<Chunk> {
        let lines: Vec<&str> = content.lines().collect();
        if lines.is_empty() {
            return Vec::new();
        }

        let style = boundary_style(language);
        let units = match style {
            BoundaryStyle::Plain => self.fixed_windows(0, lines.len(), self.window_lines),
            _ => {
                let boundaries = boundary_lines(&lines, style);
                if boundaries.is_empty() {
                    self.fixed_windows(0, lines.len(), self.window_lines)
                } else {
                    self.size_bounded(units_from_boundaries(&boundaries, lines.len()))
                }
            }
        };

        units
            .into_iter()
            .filter_map(|(start, end)| {
                let text = lines[start..end].join("\n");
                if text.trim().is_empty() {
                    return None;
                }
                let content_hash = ContentHash::of(&text);
                Some(Chunk {
                    file_path: rel_path.to_string(),
                    start_line: start + 1,
                    end_line: end,
                    language: language.to_string(),
                    text,
                    content_hash,
                })
            })
            .collect()
    }

    /// Merge undersized adjacent units, then re-split oversized ones. Bounds
    /// both embedding cost and retrieval granularity.
    fn size_bounded(&self, units: Vec<(usize, usize)>) -> Vec<(usize, usize)> {
        let mut merged: Vec<(usize, usize)> = Vec::with_capacity(units.len());
        for (start, end) in units {
            match merged.last_mut() {
                Some(last) if (end - start) < self.min_chunk_lines => last.1 = end,
                Some(last) if (last.1 - last.0) < self.min_chunk_lines => last.1 = end,
                _ => merged.push((start, end)),
            }
        }

        let mut bounded = Vec::with_capacity(merged.len());
        for (start, end) in merged {
            if end - start > self.max_chunk_lines {
                bounded.extend(self.fixed_windows(start, end, self.max_chunk_lines));
            } else {
                bounded.push((start, end));
            }
        }
        bounded
    }

    /// Sliding windows of `window` lines over `[start, end)` with the
    /// configured overlap.
    fn fixed_windows(&self, start: usize, end: usize, window: usize) -> Vec<(usize, usize)> {
        let step = window.saturating_sub(self.overlap_lines).max(1);
        let mut windows = Vec::new();
        let mut i = start;
        while i < end {
            let window_end = (i + window).min(end);
            windows.push((i, window_end));
            if window_end == end {
                break;
            }
            i += step;
        }
        windows
    }
}

/// Line indices (0-based) where a new syntactic unit begins.
fn boundary_lines(lines: &[&str], style: BoundaryStyle) -> Vec<usize> {
    lines
        .iter()
        .enumerate()
        .filter(|(_, line)| is_boundary(line, style))
        .map(|(i, _)| i)
        .collect()
}

fn is_boundary(line: &str, style: BoundaryStyle) -> bool {
    match style {
        BoundaryStyle::Brace => {
            // Unindented declaration openers only; nested items stay with
            // their parent unit.
            if line.starts_with(char::is_whitespace) || line.is_empty() {
                return false;
            }
            const OPENERS: &[&str] = &[
                "fn ",
                "pub ",
                "async ",
                "struct ",
                "enum ",
                "impl ",
                "trait ",
                "mod ",
                "function ",
                "class ",
                "interface ",
                "export ",
                "func ",
                "public ",
                "private ",
                "protected ",
                "static ",
                "abstract ",
                "final ",
                "namespace ",
            ];
            OPENERS.iter().any(|opener| line.starts_with(opener))
        }
        BoundaryStyle::Indent => {
            line.starts_with("def ")
                || line.starts_with("class ")
                || line.starts_with("async def ")
                || line.starts_with('@')
        }
        BoundaryStyle::Heading => line.starts_with('#'),
        BoundaryStyle::Plain => false,
    }
}

/// Build unit ranges between consecutive boundaries. Content before the
/// first boundary becomes a leading preamble unit.
fn units_from_boundaries(boundaries: &[usize], line_count: usize) -> Vec<(usize, usize)> {
    let mut units = Vec::with_capacity(boundaries.len() + 1);
    if boundaries[0] > 0 {
        units.push((0, boundaries[0]));
    }
    for (i, &start) in boundaries.iter().enumerate() {
        let end = boundaries.get(i + 1).copied().unwrap_or(line_count);
        if end > start {
            units.push((start, end));
        }
    }
    units
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunker() -> Chunker {
        Chunker::new(&ChunkingConfig::default())
    }

    fn small_chunker() -> Chunker {
        Chunker::new(&ChunkingConfig {
            window_lines: 10,
            overlap_lines: 2,
            max_chunk_lines: 12,
            min_chunk_lines: 2,
        })
    }

    #[test]
    fn test_single_chunk_for_small_file() {
        let chunks = chunker().chunk_file("def f(): return 1", "a.py", "py");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].start_line, 1);
        assert_eq!(chunks[0].end_line, 1);
        assert_eq!(chunks[0].text, "def f(): return 1");
    }

    #[test]
    fn test_python_boundaries() {
        let content = "\
import os

def first():
    return 1

def second():
    return 2
";
        let chunks = small_chunker().chunk_file(content, "mod.py", "py");
        assert!(chunks.len() >= 2);
        assert!(chunks.last().unwrap().text.contains("def second"));
        // Chunks cover the file in order
        assert_eq!(chunks[0].start_line, 1);
        for pair in chunks.windows(2) {
            assert!(pair[0].start_line <= pair[1].start_line);
        }
    }

    #[test]
    fn test_rust_boundaries() {
        let mut content = String::from("use std::fmt;\n\n");
        content.push_str("fn alpha() {\n    let x = 1;\n    let y = 2;\n    let z = 3;\n}\n\n");
        content.push_str("pub fn beta() {\n    let a = 1;\n    let b = 2;\n    let c = 3;\n}\n");
        let chunks = chunker().chunk_file(&content, "lib.rs", "rs");
        assert!(chunks.iter().any(|c| c.text.contains("fn alpha")));
        assert!(chunks.last().unwrap().text.contains("pub fn beta"));
    }

    #[test]
    fn test_fixed_windows_overlap() {
        let content = (0..30)
            .map(|i| format!("line {i}"))
            .collect::<Vec<_>>()
            .join("\n");
        let chunks = small_chunker().chunk_file(&content, "notes.txt", "txt");
        assert!(chunks.len() > 1);
        assert_eq!(chunks[0].start_line, 1);
        assert_eq!(chunks[0].end_line, 10);
        // Step of window - overlap = 8 lines
        assert_eq!(chunks[1].start_line, 9);
        // Last chunk ends exactly at the file end
        assert_eq!(chunks.last().unwrap().end_line, 30);
    }

    #[test]
    fn test_oversized_unit_is_split() {
        let mut content = String::from("def big():\n");
        for i in 0..40 {
            content.push_str(&format!("    x{i} = {i}\n"));
        }
        let chunks = small_chunker().chunk_file(&content, "big.py", "py");
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.end_line - chunk.start_line + 1 <= 12);
        }
    }

    #[test]
    fn test_line_ranges_trace_back_to_source() {
        let content = "a\nb\nc\nd\ne";
        let chunks = chunker().chunk_file(content, "f.txt", "txt");
        let lines: Vec<&str> = content.lines().collect();
        for chunk in &chunks {
            let expected = lines[chunk.start_line - 1..chunk.end_line].join("\n");
            assert_eq!(chunk.text, expected);
        }
    }

    #[test]
    fn test_markdown_headings() {
        let content = "intro\n\n# Section A\ntext a\nmore a\n\n# Section B\ntext b\nmore b\nfinal b\n";
        let chunks = chunker().chunk_file(content, "README.md", "md");
        assert!(chunks.iter().any(|c| c.text.contains("# Section B")));
    }

    #[test]
    fn test_chunk_hash_changes_with_content() {
        let a = chunker().chunk_file("x = 1", "a.py", "py");
        let b = chunker().chunk_file("x = 2", "a.py", "py");
        assert_ne!(a[0].content_hash, b[0].content_hash);
    }
}
