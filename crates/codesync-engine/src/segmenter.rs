//! Semantic segmenter: file text to hashed chunks
//!
//! Every emitted unit is reduced to a [`HashedChunk`] right away. The text a
//! hash was computed over is dropped as soon as the hash exists; callers that
//! need it again go back to disk through [`read_chunk_content`].

use std::collections::BTreeSet;
use std::ops::Range;
use std::path::Path;

use codesync_domain::{
    BlockOrigin, ChunkMetadata, ChunkReference, ChunkType, HashedChunk, SegmenterConfig,
};
use tracing::debug;

use crate::errors::{Result, SyncError};
use crate::hasher::hash_content;

mod naming;
mod parser;
mod units;

use parser::ParserManager;
use units::{SemanticUnit, WalkContext};

pub struct Segmenter {
    parser_manager: ParserManager,
    config: SegmenterConfig,
}

impl Default for Segmenter {
    fn default() -> Self {
        Self::new(SegmenterConfig::default())
    }
}

impl Segmenter {
    pub fn new(config: SegmenterConfig) -> Self {
        Self { parser_manager: ParserManager::new(), config }
    }

    /// Split one file into hashed chunks, in line order
    pub fn segment_file(&mut self, relative_path: &str, content: &str, lang: &str) -> Vec<HashedChunk> {
        if content.trim().is_empty() {
            return Vec::new();
        }

        let lines = LineIndex::new(content);

        let Some(tree) = self.parser_manager.parse(lang, content) else {
            debug!(
                path = relative_path,
                language = lang,
                "No syntax tree available, using line windows"
            );
            return self.fallback_windows(relative_path, content, lang, &lines);
        };

        let ctx = WalkContext { source: content, lang, config: &self.config };
        let semantic = units::collect_units(tree.root_node(), &ctx);

        let mut chunks: Vec<HashedChunk> = semantic
            .iter()
            .filter_map(|unit| self.hash_unit(relative_path, content, lang, unit))
            .collect();
        chunks.extend(self.gap_fill(relative_path, content, lang, &lines, &semantic));
        chunks.sort_by_key(|chunk| (chunk.reference.line_start, chunk.reference.char_start));

        debug!(
            path = relative_path,
            semantic = semantic.len(),
            total = chunks.len(),
            "Segmented file"
        );
        chunks
    }

    fn hash_unit(
        &self,
        relative_path: &str,
        content: &str,
        lang: &str,
        unit: &SemanticUnit,
    ) -> Option<HashedChunk> {
        let reference = ChunkReference {
            relative_path: relative_path.to_string(),
            line_start: unit.start_line,
            line_end: unit.end_line,
            char_start: unit.start_byte,
            char_end: unit.end_byte,
        };
        let mut chunk = hashed(content, lang, reference, unit.chunk_type, unit.metadata.clone())?;
        chunk.name = unit.name.clone();
        Some(chunk)
    }

    /// Emit `block` chunks for the line runs no semantic unit covers
    fn gap_fill(
        &self,
        relative_path: &str,
        content: &str,
        lang: &str,
        lines: &LineIndex,
        semantic: &[SemanticUnit],
    ) -> Vec<HashedChunk> {
        let covered: BTreeSet<usize> = semantic
            .iter()
            .flat_map(|unit| unit.start_line..=unit.end_line)
            .collect();

        let mut runs = Vec::new();
        let mut current: Option<(usize, usize)> = None;
        for line in 1..=lines.len() {
            if covered.contains(&line) {
                runs.extend(current.take());
                continue;
            }
            current = match current {
                Some((start, _)) => Some((start, line)),
                None => Some((line, line)),
            };
        }
        runs.extend(current);

        runs.into_iter()
            .filter_map(|(start, end)| lines.trim_blank(content, start, end))
            .flat_map(|(start, end)| self.split_to_fit(content, lines, start, end))
            .filter_map(|(start, end)| {
                let text = lines.text(content, start, end);
                if text.trim().chars().count() < self.config.min_chunk_size {
                    return None;
                }
                let reference = lines.reference(relative_path, start, end);
                hashed(
                    content,
                    lang,
                    reference,
                    ChunkType::Block,
                    ChunkMetadata::block(BlockOrigin::GapFill),
                )
            })
            .collect()
    }

    /// Split a line run into consecutive groups that each fit `max_chunk_size`.
    /// A single line longer than the limit is its own group.
    fn split_to_fit(
        &self,
        content: &str,
        lines: &LineIndex,
        start: usize,
        end: usize,
    ) -> Vec<(usize, usize)> {
        let mut groups = Vec::new();
        let mut group_start = start;
        for line in start..=end {
            if line > group_start
                && lines.text(content, group_start, line).chars().count() > self.config.max_chunk_size
            {
                groups.push((group_start, line - 1));
                group_start = line;
            }
        }
        groups.push((group_start, end));
        groups
    }

    /// Fixed-size overlapping line windows for files without a syntax tree
    fn fallback_windows(
        &self,
        relative_path: &str,
        content: &str,
        lang: &str,
        lines: &LineIndex,
    ) -> Vec<HashedChunk> {
        let size = self.config.fallback_line_size.max(1);
        let step = self.config.fallback_step();
        let total = lines.len();

        let mut chunks = Vec::new();
        let mut start = 1;
        while start <= total {
            let end = (start + size - 1).min(total);
            if !lines.text(content, start, end).trim().is_empty() {
                let reference = lines.reference(relative_path, start, end);
                chunks.extend(hashed(
                    content,
                    lang,
                    reference,
                    ChunkType::Block,
                    ChunkMetadata::block(BlockOrigin::Fallback),
                ));
            }
            if end == total {
                break;
            }
            start += step;
        }
        chunks
    }
}

/// Hash the referenced text. The text itself does not outlive this call.
fn hashed(
    content: &str,
    lang: &str,
    reference: ChunkReference,
    chunk_type: ChunkType,
    metadata: ChunkMetadata,
) -> Option<HashedChunk> {
    let text = content.get(reference.byte_range())?;
    let content_hash = hash_content(text);
    let char_count = text.chars().count();
    Some(HashedChunk::new(content_hash, chunk_type, lang, reference, metadata, char_count))
}

/// Byte spans of every line, excluding line terminators
struct LineIndex {
    spans: Vec<Range<usize>>,
}

impl LineIndex {
    fn new(content: &str) -> Self {
        let mut spans = Vec::new();
        let mut start = 0;
        for line in content.split_inclusive('\n') {
            let body = line.trim_end_matches('\n').trim_end_matches('\r');
            spans.push(start..start + body.len());
            start += line.len();
        }
        Self { spans }
    }

    fn len(&self) -> usize {
        self.spans.len()
    }

    /// Byte range of 1-based inclusive lines
    fn byte_range(&self, start: usize, end: usize) -> Range<usize> {
        self.spans[start - 1].start..self.spans[end - 1].end
    }

    fn text<'a>(&self, content: &'a str, start: usize, end: usize) -> &'a str {
        &content[self.byte_range(start, end)]
    }

    fn is_blank(&self, content: &str, line: usize) -> bool {
        self.text(content, line, line).trim().is_empty()
    }

    /// Shrink a run so it starts and ends on non-blank lines
    fn trim_blank(&self, content: &str, mut start: usize, mut end: usize) -> Option<(usize, usize)> {
        while start <= end && self.is_blank(content, start) {
            start += 1;
        }
        while end >= start && self.is_blank(content, end) {
            end -= 1;
        }
        (start <= end).then_some((start, end))
    }

    fn reference(&self, relative_path: &str, start: usize, end: usize) -> ChunkReference {
        let bytes = self.byte_range(start, end);
        ChunkReference {
            relative_path: relative_path.to_string(),
            line_start: start,
            line_end: end,
            char_start: bytes.start,
            char_end: bytes.end,
        }
    }
}

/// Text of a chunk re-read from disk, with the hash of what was read
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkContent {
    pub content: String,
    pub hash: String,
}

/// Re-read the text a reference points at. The returned hash reflects the
/// file as it is now, which may differ from when the chunk was hashed.
pub fn read_chunk_content(root: &Path, reference: &ChunkReference) -> Result<ChunkContent> {
    let path = root.join(&reference.relative_path);
    let text = std::fs::read_to_string(&path)
        .map_err(|e| SyncError::file_processing_error_with_source(path.display().to_string(), e))?;

    let content = text.get(reference.byte_range()).ok_or_else(|| {
        SyncError::chunking_error(format!(
            "{} no longer contains bytes {}..{}",
            reference.relative_path, reference.char_start, reference.char_end
        ))
    })?;

    Ok(ChunkContent { hash: hash_content(content), content: content.to_string() })
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn lines_of(chunks: &[HashedChunk]) -> Vec<(usize, usize, ChunkType)> {
        chunks
            .iter()
            .map(|c| (c.reference.line_start, c.reference.line_end, c.chunk_type))
            .collect()
    }

    #[test]
    fn test_semantic_chunks_with_gap_fill() {
        let fixture = r#"use std::collections::HashMap;
use std::fmt::Display;
// shared helpers for the lookup table below

pub fn build_table(keys: &[String]) -> HashMap<String, usize> {
    keys.iter().enumerate().map(|(i, k)| (k.clone(), i)).collect()
}
"#;
        let mut segmenter = Segmenter::default();

        let actual = segmenter.segment_file("src/table.rs", fixture, "rust");

        let expected = vec![(1, 3, ChunkType::Block), (5, 7, ChunkType::Function)];
        assert_eq!(lines_of(&actual), expected);
        assert!(actual[0].metadata.is_gap_fill());
        assert_eq!(actual[1].name, Some("build_table".to_string()));
    }

    #[test]
    fn test_chunk_hash_covers_exact_text() {
        let fixture = "fn helper_with_a_long_name(x: u32) -> u32 {\n    x + 1\n}\n";
        let mut segmenter = Segmenter::default();

        let actual = segmenter.segment_file("a.rs", fixture, "rust");

        assert_eq!(actual.len(), 1);
        let text = &fixture[actual[0].reference.byte_range()];
        assert_eq!(actual[0].content_hash, hash_content(text));
        assert_eq!(actual[0].char_count, text.chars().count());
        assert!(text.starts_with("fn helper") && text.ends_with('}'));
    }

    #[test]
    fn test_identical_chunks_hash_equal_across_files() {
        let body = "def compute_total(items):\n    return sum(i.price for i in items)\n";
        let left = format!("import os\n\n{body}");
        let right = format!("{body}\n# trailing comment that is long enough to be a gap block\n");
        let mut segmenter = Segmenter::default();

        let left_chunks = segmenter.segment_file("a.py", &left, "python");
        let right_chunks = segmenter.segment_file("lib/b.py", &right, "python");

        let hash_of = |chunks: &[HashedChunk]| {
            chunks
                .iter()
                .find(|c| c.name.as_deref() == Some("compute_total"))
                .map(|c| c.content_hash.clone())
        };
        assert!(hash_of(&left_chunks).is_some());
        assert_eq!(hash_of(&left_chunks), hash_of(&right_chunks));
    }

    #[test]
    fn test_fallback_windows_overlap() {
        let fixture: String = (1..=12).map(|i| format!("line number {i}\n")).collect();
        let config = SegmenterConfig::default()
            .fallback_line_size(5usize)
            .fallback_overlap(2usize);
        let mut segmenter = Segmenter::new(config);

        let actual = segmenter.segment_file("notes.md", &fixture, "markdown");

        let expected = vec![
            (1, 5, ChunkType::Block),
            (4, 8, ChunkType::Block),
            (7, 11, ChunkType::Block),
            (10, 12, ChunkType::Block),
        ];
        assert_eq!(lines_of(&actual), expected);
        assert!(actual.iter().all(|c| c.metadata.is_fallback()));
    }

    #[test]
    fn test_oversized_gap_is_split() {
        let fixture: String = (1..=6)
            .map(|i| format!("// comment line {i} padded out to a decent width\n"))
            .collect();
        let config = SegmenterConfig::default()
            .min_chunk_size(10usize)
            .max_chunk_size(120usize);
        let mut segmenter = Segmenter::new(config);

        let actual = segmenter.segment_file("only_comments.rs", &fixture, "rust");

        assert!(actual.len() > 1);
        assert!(actual.iter().all(|c| c.char_count <= 120));
        assert_eq!(actual.first().map(|c| c.reference.line_start), Some(1));
        assert_eq!(actual.last().map(|c| c.reference.line_end), Some(6));
    }

    #[test]
    fn test_empty_file_has_no_chunks() {
        let mut segmenter = Segmenter::default();
        assert!(segmenter.segment_file("empty.rs", "\n\n", "rust").is_empty());
    }

    #[test]
    fn test_read_chunk_content_detects_change() {
        let dir = tempfile::tempdir().unwrap();
        let fixture = "fn stable_function_name(a: i32) -> i32 {\n    a * 3\n}\n";
        std::fs::write(dir.path().join("lib.rs"), fixture).unwrap();
        let mut segmenter = Segmenter::default();
        let chunk = segmenter.segment_file("lib.rs", fixture, "rust").remove(0);

        let actual = read_chunk_content(dir.path(), &chunk.reference).unwrap();
        assert_eq!(actual.hash, chunk.content_hash);

        std::fs::write(dir.path().join("lib.rs"), fixture.replace("a * 3", "a * 4")).unwrap();
        let actual = read_chunk_content(dir.path(), &chunk.reference).unwrap();
        assert_ne!(actual.hash, chunk.content_hash);
    }

    #[test]
    fn test_read_chunk_content_out_of_range() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.rs"), "short").unwrap();
        let reference = ChunkReference {
            relative_path: "a.rs".to_string(),
            line_start: 1,
            line_end: 3,
            char_start: 0,
            char_end: 400,
        };

        let actual = read_chunk_content(dir.path(), &reference);

        assert!(matches!(actual, Err(SyncError::ChunkingError { .. })));
    }
}
