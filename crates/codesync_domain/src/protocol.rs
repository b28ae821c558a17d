//! Request and response bodies of the sync protocol
//!
//! All bodies are transport-agnostic and serialize as camelCase JSON. Every
//! request is scoped by `(tenant_id, project_id)`.

use serde::{Deserialize, Serialize};
use strum_macros::Display;

use crate::chunk::{ChunkMetadata, ChunkType, LineRange};

/// Access to the scope every protocol request carries
pub trait Scoped {
    fn tenant_id(&self) -> &str;
    fn project_id(&self) -> &str;
}

macro_rules! impl_scoped {
    ($($ty:ty),+ $(,)?) => {
        $(impl Scoped for $ty {
            fn tenant_id(&self) -> &str {
                &self.tenant_id
            }

            fn project_id(&self) -> &str {
                &self.project_id
            }
        })+
    };
}

impl_scoped!(RegisterRequest, CheckRootRequest, Phase1Request, Phase2Request, SearchRequest);

/// Outcome class of a state-changing request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum SyncStatus {
    Success,
    Partial,
    Failed,
}

impl SyncStatus {
    /// Classify a request from how many of its items succeeded
    pub fn from_counts(succeeded: usize, failed: usize) -> Self {
        match (succeeded, failed) {
            (_, 0) => Self::Success,
            (0, _) => Self::Failed,
            _ => Self::Partial,
        }
    }
}

/// Per-item failure reported back to the client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkError {
    pub hash: Option<String>,
    pub code: String,
    pub message: String,
}

impl ChunkError {
    pub fn new(hash: Option<&str>, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            hash: hash.map(str::to_string),
            code: code.into(),
            message: message.into(),
        }
    }
}

/// Chunk sent during first-time registration: metadata plus content
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterChunk {
    pub hash: String,
    #[serde(rename = "type")]
    pub chunk_type: ChunkType,
    pub name: Option<String>,
    pub line_range: LineRange,
    pub char_count: usize,
    pub content: String,
    pub language: String,
    pub file_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_metadata: Option<ChunkMetadata>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub tenant_id: String,
    pub project_id: String,
    pub root: String,
    pub chunks: Vec<RegisterChunk>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterResponse {
    pub status: SyncStatus,
    pub chunks_stored: usize,
    pub chunks_skipped: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<ChunkError>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckRootRequest {
    pub tenant_id: String,
    pub project_id: String,
    pub root: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckRootResponse {
    pub changed: bool,
    /// Absent when the project was never registered
    pub remote_root: Option<String>,
}

/// Hash-only description of a chunk. Carries no content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Phase1Chunk {
    pub hash: String,
    #[serde(rename = "type")]
    pub chunk_type: ChunkType,
    pub name: Option<String>,
    pub line_range: LineRange,
    pub char_count: usize,
    pub file_path: String,
    pub language: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_metadata: Option<ChunkMetadata>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Phase1Request {
    pub tenant_id: String,
    pub project_id: String,
    pub root: String,
    pub chunks: Vec<Phase1Chunk>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Phase1Response {
    pub needed: Vec<String>,
    pub cached: Vec<String>,
}

/// Location metadata that travels with phase-2 content
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentMetadata {
    pub file_path: String,
    pub line_range: LineRange,
    pub char_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_metadata: Option<ChunkMetadata>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Phase2Chunk {
    pub hash: String,
    pub content: String,
    #[serde(rename = "type")]
    pub chunk_type: ChunkType,
    pub name: Option<String>,
    pub language: String,
    pub metadata: ContentMetadata,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Phase2Request {
    pub tenant_id: String,
    pub project_id: String,
    pub root: String,
    pub chunks: Vec<Phase2Chunk>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Phase2Response {
    pub status: SyncStatus,
    pub received: Vec<String>,
    pub derived_processed: usize,
    pub cache_hits: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<ChunkError>,
}

fn default_top_k() -> usize {
    10
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchRequest {
    pub tenant_id: String,
    pub project_id: String,
    pub query: String,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchHit {
    pub hash: String,
    pub score: f32,
    pub summary: String,
    #[serde(rename = "type")]
    pub chunk_type: ChunkType,
    pub name: Option<String>,
    pub line_range: LineRange,
    pub file_path: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResponse {
    pub results: Vec<SearchHit>,
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_status_from_counts() {
        assert_eq!(SyncStatus::from_counts(3, 0), SyncStatus::Success);
        assert_eq!(SyncStatus::from_counts(0, 0), SyncStatus::Success);
        assert_eq!(SyncStatus::from_counts(2, 1), SyncStatus::Partial);
        assert_eq!(SyncStatus::from_counts(0, 4), SyncStatus::Failed);
    }

    #[test]
    fn test_phase2_response_omits_empty_errors() {
        let fixture = Phase2Response {
            status: SyncStatus::Success,
            received: vec!["h1".to_string()],
            derived_processed: 1,
            cache_hits: 0,
            errors: vec![],
        };

        let actual = serde_json::to_value(&fixture).unwrap();
        let expected = serde_json::json!({
            "status": "success",
            "received": ["h1"],
            "derivedProcessed": 1,
            "cacheHits": 0
        });

        assert_eq!(actual, expected);
    }

    #[test]
    fn test_search_request_default_top_k() {
        let actual: SearchRequest =
            serde_json::from_str(r#"{"tenantId":"a","projectId":"p","query":"add"}"#).unwrap();

        assert_eq!(actual.top_k, 10);
        assert_eq!(actual.tenant_id(), "a");
    }
}
