//! Qdrant-backed vector index

use std::collections::HashMap;

use anyhow::Result as AnyResult;
use async_trait::async_trait;
use codesync_domain::{VectorFilter, VectorIndex, VectorMatch, VectorMetadata, VectorRecord};
use qdrant_client::qdrant::value::Kind;
use qdrant_client::qdrant::vectors_config::Config as VectorConfig;
use qdrant_client::qdrant::with_payload_selector::SelectorOptions;
use qdrant_client::qdrant::{
    Condition, CreateCollectionBuilder, CreateFieldIndexCollectionBuilder, Distance, FieldType,
    Filter, PointStruct, SearchPointsBuilder, UpsertPointsBuilder, Value, VectorParams,
    VectorsConfig,
};
use qdrant_client::{Payload, Qdrant};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::errors::{Result, SyncError};

/// Qdrant point ids must be UUIDs or integers; derive a stable UUID from the
/// composite id and keep the composite id itself in the payload.
pub fn point_id(composite_id: &str) -> String {
    let digest = Sha256::digest(composite_id.as_bytes());
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest[..16]);
    uuid::Uuid::from_bytes(bytes).to_string()
}

pub struct QdrantIndex {
    client: Qdrant,
    collection_name: String,
}

impl QdrantIndex {
    /// Connect and make sure the collection exists with the right dimension
    pub async fn connect(url: &str, collection_name: &str, vector_dimension: usize) -> Result<Self> {
        info!("Connecting to Qdrant at {} (collection {})", url, collection_name);

        let client = Qdrant::from_url(url)
            .build()
            .map_err(|e| SyncError::storage_failure_with_source("connect to Qdrant", e))?;

        let collections = client.list_collections().await?;
        let exists = collections
            .collections
            .iter()
            .any(|c| c.name == collection_name);

        if exists {
            Self::check_dimension(&client, collection_name, vector_dimension).await?;
        } else {
            info!("Creating collection {} ({} dimensions)", collection_name, vector_dimension);
            Self::create_collection(&client, collection_name, vector_dimension).await?;
        }

        Ok(Self { client, collection_name: collection_name.to_string() })
    }

    async fn create_collection(
        client: &Qdrant,
        collection_name: &str,
        vector_dimension: usize,
    ) -> Result<()> {
        client
            .create_collection(
                CreateCollectionBuilder::new(collection_name.to_string())
                    .vectors_config(VectorsConfig {
                        config: Some(VectorConfig::Params(VectorParams {
                            size: vector_dimension as u64,
                            distance: Distance::Cosine.into(),
                            ..Default::default()
                        })),
                    })
                    .build(),
            )
            .await?;

        for field in ["tenant_id", "project_id"] {
            client
                .create_field_index(CreateFieldIndexCollectionBuilder::new(
                    collection_name.to_string(),
                    field,
                    FieldType::Keyword,
                ))
                .await?;
        }
        Ok(())
    }

    /// A collection holds every tenant's vectors, so a mismatch is reported
    /// instead of recreating it
    async fn check_dimension(
        client: &Qdrant,
        collection_name: &str,
        vector_dimension: usize,
    ) -> Result<()> {
        let info = client.collection_info(collection_name).await?;
        let size = info
            .result
            .and_then(|r| r.config)
            .and_then(|c| c.params)
            .and_then(|p| p.vectors_config)
            .and_then(|v| v.config)
            .and_then(|config| match config {
                VectorConfig::Params(params) => Some(params.size as usize),
                _ => None,
            });

        match size {
            Some(size) if size == vector_dimension => Ok(()),
            Some(size) => Err(SyncError::configuration_error(format!(
                "collection {collection_name} has dimension {size}, deriver produces {vector_dimension}"
            ))),
            None => {
                warn!("Could not read dimension of collection {}", collection_name);
                Ok(())
            }
        }
    }

    fn to_point(record: &VectorRecord) -> Result<PointStruct> {
        let metadata = serde_json::to_string(&record.metadata)?;
        let payload = Payload::try_from(serde_json::json!({
            "composite_id": record.composite_id,
            "tenant_id": record.metadata.tenant_id,
            "project_id": record.metadata.project_id,
            "metadata": metadata,
        }))
        .map_err(|e| SyncError::internal_error(format!("payload encoding failed: {e}")))?;

        Ok(PointStruct::new(
            point_id(&record.composite_id),
            record.embedding.clone(),
            payload,
        ))
    }
}

fn payload_string(payload: &HashMap<String, Value>, key: &str) -> Option<String> {
    payload.get(key).and_then(|v| match v.kind {
        Some(Kind::StringValue(ref s)) => Some(s.clone()),
        _ => None,
    })
}

#[async_trait]
impl VectorIndex for QdrantIndex {
    async fn upsert(&self, records: &[VectorRecord]) -> AnyResult<()> {
        if records.is_empty() {
            return Ok(());
        }
        let points = records
            .iter()
            .map(Self::to_point)
            .collect::<Result<Vec<_>>>()?;

        self.client
            .upsert_points(UpsertPointsBuilder::new(self.collection_name.clone(), points).wait(true))
            .await?;
        debug!("Upserted {} points into {}", records.len(), self.collection_name);
        Ok(())
    }

    async fn query(
        &self,
        vector: &[f32],
        filter: &VectorFilter,
        top_k: usize,
    ) -> AnyResult<Vec<VectorMatch>> {
        let scope = Filter::must([
            Condition::matches("tenant_id", filter.tenant_id.clone()),
            Condition::matches("project_id", filter.project_id.clone()),
        ]);

        let response = self
            .client
            .search_points(
                SearchPointsBuilder::new(self.collection_name.clone(), vector.to_vec(), top_k as u64)
                    .filter(scope)
                    .with_payload(SelectorOptions::Enable(true)),
            )
            .await?;

        let mut matches = Vec::with_capacity(response.result.len());
        for point in response.result {
            let decoded = payload_string(&point.payload, "composite_id").zip(
                payload_string(&point.payload, "metadata")
                    .and_then(|raw| serde_json::from_str::<VectorMetadata>(&raw).ok()),
            );
            match decoded {
                Some((composite_id, metadata)) => matches.push(VectorMatch {
                    composite_id,
                    score: point.score,
                    metadata,
                }),
                None => warn!("Skipping point with unreadable payload"),
            }
        }
        Ok(matches)
    }

    fn name(&self) -> &str {
        "qdrant"
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_point_id_is_stable_uuid() {
        let first = point_id("A_p1_abc");
        let second = point_id("A_p1_abc");

        assert_eq!(first, second);
        assert_ne!(first, point_id("B_p1_abc"));
        assert!(uuid::Uuid::parse_str(&first).is_ok());
    }
}
