//! Tenant-scoped vector records and the vector index contract

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::chunk::{ChunkMetadata, ChunkType, LineRange};

/// Per-tenant metadata stored next to each embedding
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VectorMetadata {
    pub tenant_id: String,
    pub project_id: String,
    pub content_hash: String,
    pub file_path: String,
    pub summary: String,
    #[serde(rename = "type")]
    pub chunk_type: ChunkType,
    pub name: Option<String>,
    pub line_range: LineRange,
    pub char_count: usize,
    pub language: String,
    /// Segmenter detail (parameters, async flag, parent) when the client sent it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_metadata: Option<ChunkMetadata>,
}

/// One record per (tenant, project, content) triple
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VectorRecord {
    /// `tenant_project_hash`
    pub composite_id: String,
    pub embedding: Vec<f32>,
    pub metadata: VectorMetadata,
}

/// Mandatory scope of every vector query
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VectorFilter {
    pub tenant_id: String,
    pub project_id: String,
}

impl VectorFilter {
    pub fn new(tenant_id: impl Into<String>, project_id: impl Into<String>) -> Self {
        Self { tenant_id: tenant_id.into(), project_id: project_id.into() }
    }

    pub fn matches(&self, metadata: &VectorMetadata) -> bool {
        metadata.tenant_id == self.tenant_id && metadata.project_id == self.project_id
    }
}

/// A scored match returned by a vector index
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VectorMatch {
    pub composite_id: String,
    pub score: f32,
    pub metadata: VectorMetadata,
}

/// Trait for vector index implementations
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Insert or replace records by composite id
    async fn upsert(&self, records: &[VectorRecord]) -> Result<()>;

    /// Nearest neighbours of `vector` restricted to `filter`
    async fn query(
        &self,
        vector: &[f32],
        filter: &VectorFilter,
        top_k: usize,
    ) -> Result<Vec<VectorMatch>>;

    fn name(&self) -> &str;
}
