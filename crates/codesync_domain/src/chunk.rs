//! Domain models for hashed content units

use std::collections::BTreeMap;
use std::ops::Range;

use derive_setters::Setters;
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// Maximum number of free-form extension entries a chunk may carry
pub const MAX_METADATA_EXTENSIONS: usize = 16;

/// Kind of content unit a chunk represents
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ChunkType {
    Function,
    Class,
    Method,
    Interface,
    Type,
    Enum,
    Struct,
    Impl,
    Trait,
    Block,
}

impl ChunkType {
    /// Whether this unit is something callable (carries parameters)
    pub fn is_callable(&self) -> bool {
        matches!(self, Self::Function | Self::Method)
    }
}

/// Inclusive, 1-based line span
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineRange {
    pub start: usize,
    pub end: usize,
}

impl LineRange {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start) + 1
    }

    pub fn is_empty(&self) -> bool {
        self.end < self.start
    }
}

/// Where a chunk lives on disk. Never embeds the content itself.
///
/// `char_start`/`char_end` are UTF-8 byte offsets into the file text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkReference {
    pub relative_path: String,
    pub line_start: usize,
    pub line_end: usize,
    pub char_start: usize,
    pub char_end: usize,
}

impl ChunkReference {
    pub fn line_range(&self) -> LineRange {
        LineRange::new(self.line_start, self.line_end)
    }

    pub fn byte_range(&self) -> Range<usize> {
        self.char_start..self.char_end
    }
}

/// Where a residual block came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BlockOrigin {
    /// Lines between semantic units of a parsed file
    GapFill,
    /// Fixed line window used when no syntax tree is available
    Fallback,
}

/// Per-type detail of a chunk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ChunkDetail {
    #[serde(rename_all = "camelCase")]
    Callable {
        parameters: Option<String>,
        is_async: bool,
    },
    Declaration,
    Block { origin: BlockOrigin },
}

/// Best-effort descriptive metadata. None of it participates in hashing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Setters)]
#[setters(strip_option, into)]
#[serde(rename_all = "camelCase")]
pub struct ChunkMetadata {
    pub detail: ChunkDetail,
    /// Name of the enclosing class/impl/trait, if any
    pub parent_name: Option<String>,
    pub exported: bool,
    #[setters(skip)]
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    extensions: BTreeMap<String, String>,
}

impl ChunkMetadata {
    pub fn callable(parameters: Option<String>, is_async: bool) -> Self {
        Self::with_detail(ChunkDetail::Callable { parameters, is_async })
    }

    pub fn declaration() -> Self {
        Self::with_detail(ChunkDetail::Declaration)
    }

    pub fn block(origin: BlockOrigin) -> Self {
        Self::with_detail(ChunkDetail::Block { origin })
    }

    fn with_detail(detail: ChunkDetail) -> Self {
        Self {
            detail,
            parent_name: None,
            exported: false,
            extensions: BTreeMap::new(),
        }
    }

    /// Adds an extension entry. Returns false when the map is full and the
    /// key is new.
    pub fn insert_extension(&mut self, key: impl Into<String>, value: impl Into<String>) -> bool {
        let key = key.into();
        if !self.extensions.contains_key(&key) && self.extensions.len() >= MAX_METADATA_EXTENSIONS
        {
            return false;
        }
        self.extensions.insert(key, value.into());
        true
    }

    pub fn extensions(&self) -> &BTreeMap<String, String> {
        &self.extensions
    }

    pub fn block_origin(&self) -> Option<BlockOrigin> {
        match self.detail {
            ChunkDetail::Block { origin } => Some(origin),
            _ => None,
        }
    }

    pub fn is_gap_fill(&self) -> bool {
        self.block_origin() == Some(BlockOrigin::GapFill)
    }

    pub fn is_fallback(&self) -> bool {
        self.block_origin() == Some(BlockOrigin::Fallback)
    }
}

/// A content unit reduced to its hash and location. The text that produced
/// `content_hash` is not retained.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Setters)]
#[setters(strip_option, into)]
#[serde(rename_all = "camelCase")]
pub struct HashedChunk {
    pub content_hash: String,
    #[serde(rename = "type")]
    pub chunk_type: ChunkType,
    pub name: Option<String>,
    pub language: String,
    pub reference: ChunkReference,
    pub metadata: ChunkMetadata,
    pub char_count: usize,
}

impl HashedChunk {
    pub fn new(
        content_hash: impl Into<String>,
        chunk_type: ChunkType,
        language: impl Into<String>,
        reference: ChunkReference,
        metadata: ChunkMetadata,
        char_count: usize,
    ) -> Self {
        Self {
            content_hash: content_hash.into(),
            chunk_type,
            name: None,
            language: language.into(),
            reference,
            metadata,
            char_count,
        }
    }

    pub fn relative_path(&self) -> &str {
        &self.reference.relative_path
    }

    pub fn line_range(&self) -> LineRange {
        self.reference.line_range()
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use pretty_assertions::assert_eq;

    use super::*;

    fn reference() -> ChunkReference {
        ChunkReference {
            relative_path: "src/utils.ts".to_string(),
            line_start: 3,
            line_end: 7,
            char_start: 40,
            char_end: 120,
        }
    }

    #[test]
    fn test_chunk_type_round_trips_through_strings() {
        let actual = ChunkType::from_str("interface").unwrap();
        let expected = ChunkType::Interface;
        assert_eq!(actual, expected);
        assert_eq!(ChunkType::Impl.to_string(), "impl");
    }

    #[test]
    fn test_hashed_chunk_serializes_type_key() {
        let fixture = HashedChunk::new(
            "abc",
            ChunkType::Function,
            "typescript",
            reference(),
            ChunkMetadata::callable(Some("(a, b)".to_string()), false),
            80,
        )
        .name("add");

        let actual = serde_json::to_value(&fixture).unwrap();

        assert_eq!(actual["type"], "function");
        assert_eq!(actual["contentHash"], "abc");
        assert_eq!(actual["reference"]["relativePath"], "src/utils.ts");
        assert_eq!(actual["metadata"]["detail"]["kind"], "callable");
        assert_eq!(actual["metadata"]["detail"]["parameters"], "(a, b)");
    }

    #[test]
    fn test_extension_map_is_bounded() {
        let mut fixture = ChunkMetadata::declaration();
        for i in 0..MAX_METADATA_EXTENSIONS {
            assert!(fixture.insert_extension(format!("k{i}"), "v"));
        }

        let actual_new_key = fixture.insert_extension("overflow", "v");
        let actual_existing_key = fixture.insert_extension("k0", "updated");

        assert!(!actual_new_key);
        assert!(actual_existing_key);
        assert_eq!(fixture.extensions().len(), MAX_METADATA_EXTENSIONS);
        assert_eq!(fixture.extensions()["k0"], "updated");
    }

    #[test]
    fn test_block_origin_flags() {
        let gap = ChunkMetadata::block(BlockOrigin::GapFill);
        let fallback = ChunkMetadata::block(BlockOrigin::Fallback);

        assert!(gap.is_gap_fill());
        assert!(!gap.is_fallback());
        assert!(fallback.is_fallback());
        assert_eq!(ChunkMetadata::declaration().block_origin(), None);
    }

    #[test]
    fn test_line_range_len() {
        let fixture = reference().line_range();
        assert_eq!(fixture.len(), 5);
    }
}
