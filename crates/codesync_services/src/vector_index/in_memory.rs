//! In-memory vector index implementation for development and testing

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Result;
use async_trait::async_trait;
use codesync_domain::{VectorFilter, VectorIndex, VectorMatch, VectorRecord};
use tokio::sync::RwLock;
use tracing::debug;

/// In-memory vector index with brute-force cosine similarity
#[derive(Debug, Default)]
pub struct InMemoryVectorIndex {
    records: RwLock<HashMap<String, VectorRecord>>,
    fail_upserts: AtomicBool,
}

impl InMemoryVectorIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent upsert fail
    pub fn set_fail_upserts(&self, fail: bool) {
        self.fail_upserts.store(fail, Ordering::SeqCst);
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    pub async fn get(&self, composite_id: &str) -> Option<VectorRecord> {
        self.records.read().await.get(composite_id).cloned()
    }

    /// All stored records, sorted by id
    pub async fn records(&self) -> Vec<VectorRecord> {
        let mut records: Vec<VectorRecord> = self.records.read().await.values().cloned().collect();
        records.sort_by(|a, b| a.composite_id.cmp(&b.composite_id));
        records
    }

    /// Calculate cosine similarity between two vectors
    fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
        if a.len() != b.len() {
            return 0.0;
        }

        let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
        let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

        if norm_a == 0.0 || norm_b == 0.0 {
            return 0.0;
        }

        dot_product / (norm_a * norm_b)
    }
}

#[async_trait]
impl VectorIndex for InMemoryVectorIndex {
    async fn upsert(&self, records: &[VectorRecord]) -> Result<()> {
        if self.fail_upserts.load(Ordering::SeqCst) {
            return Err(anyhow::anyhow!("vector index rejected upsert"));
        }

        let mut stored = self.records.write().await;
        for record in records {
            stored.insert(record.composite_id.clone(), record.clone());
        }

        debug!("Upserted {} records", records.len());
        Ok(())
    }

    async fn query(
        &self,
        vector: &[f32],
        filter: &VectorFilter,
        top_k: usize,
    ) -> Result<Vec<VectorMatch>> {
        let records = self.records.read().await;

        let mut results: Vec<VectorMatch> = records
            .values()
            .filter(|record| filter.matches(&record.metadata))
            .map(|record| VectorMatch {
                composite_id: record.composite_id.clone(),
                score: Self::cosine_similarity(vector, &record.embedding),
                metadata: record.metadata.clone(),
            })
            .collect();

        // Sort by score (highest first), ties by id for stable output
        results.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.composite_id.cmp(&b.composite_id))
        });
        results.truncate(top_k);

        debug!("Found {} results", results.len());
        Ok(results)
    }

    fn name(&self) -> &str {
        "in-memory"
    }
}
