//! Contract of the external derivation service (summary + embedding)

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Output of one `derive` call. Both vectors are positionally aligned with the
/// input texts when the service behaves.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Derivation {
    pub summaries: Vec<String>,
    pub embeddings: Vec<Vec<f32>>,
}

impl Derivation {
    /// True when both outputs have exactly `expected` entries
    pub fn matches_arity(&self, expected: usize) -> bool {
        self.summaries.len() == expected && self.embeddings.len() == expected
    }
}

/// A single derived result, as stored in the derived-result cache
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DerivedResult {
    pub summary: String,
    pub embedding: Vec<f32>,
}

impl DerivedResult {
    pub fn new(summary: impl Into<String>, embedding: Vec<f32>) -> Self {
        Self { summary: summary.into(), embedding }
    }

    /// Placeholder substituted when derivation failed or timed out
    pub fn fallback(dimension: usize) -> Self {
        Self {
            summary: FALLBACK_SUMMARY.to_string(),
            embedding: vec![0.0; dimension],
        }
    }

    pub fn is_degenerate(&self) -> bool {
        preprocessing::is_degenerate(&self.embedding)
    }
}

pub const FALLBACK_SUMMARY: &str = "Summary unavailable";

/// Trait for the expensive external derivation (summarizer + embedder)
#[async_trait]
pub trait Deriver: Send + Sync {
    /// Derive a summary and an embedding for each text
    async fn derive(&self, texts: &[String], language: &str) -> Result<Derivation>;

    /// Get the dimension of embeddings produced by this deriver
    fn embedding_dimension(&self) -> usize;

    /// Get the name/identifier of this deriver
    fn name(&self) -> &str;

    /// Embed a free-text search query
    async fn embed_query(&self, query: &str) -> Result<Vec<f32>> {
        let derivation = self.derive(&[query.to_string()], "text").await?;
        derivation
            .embeddings
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("No embedding returned for query"))
    }
}

/// Embedding input shaping and vector checks shared by derivers
pub mod preprocessing {
    /// Upper bound on the text handed to an embedder, in bytes
    pub const MAX_EMBEDDING_INPUT: usize = 8000;

    /// `language:` tag followed by the non-blank lines of `text` with
    /// indentation stripped, cut to `MAX_EMBEDDING_INPUT` on a char boundary
    pub fn embedding_input(text: &str, language: &str) -> String {
        let mut input = format!("{language}:");
        for line in text.lines().map(str::trim).filter(|line| !line.is_empty()) {
            input.push('\n');
            input.push_str(line);
        }
        if input.len() > MAX_EMBEDDING_INPUT {
            let cut = (0..=MAX_EMBEDDING_INPUT)
                .rev()
                .find(|&i| input.is_char_boundary(i))
                .unwrap_or(0);
            input.truncate(cut);
        }
        input
    }

    fn fnv1a(token: &str) -> u64 {
        token.bytes().fold(0xcbf2_9ce4_8422_2325, |hash, byte| {
            (hash ^ u64::from(byte)).wrapping_mul(0x0100_0000_01b3)
        })
    }

    /// Deterministic bag-of-tokens embedding. Every lowercase alphanumeric
    /// token adds a signed unit to the bucket its FNV-1a hash selects, so
    /// texts sharing identifiers score close under cosine similarity. The
    /// result is unit length and never all zeros for `dimension > 0`.
    pub fn hash_embedding(text: &str, dimension: usize) -> Vec<f32> {
        let mut embedding = vec![0.0f32; dimension];
        if dimension == 0 {
            return embedding;
        }

        let lowered = text.to_lowercase();
        let mut tokens = lowered
            .split(|c: char| !c.is_alphanumeric())
            .filter(|token| !token.is_empty())
            .peekable();
        let empty = tokens.peek().is_none();

        for token in tokens.chain(empty.then_some("")) {
            let hash = fnv1a(token);
            let bucket = (hash % dimension as u64) as usize;
            let sign = if hash >> 63 == 0 { 1.0 } else { -1.0 };
            embedding[bucket] += sign;
        }

        normalize_vector(&mut embedding);
        embedding
    }

    /// Scale to unit length; zero vectors are left alone
    pub fn normalize_vector(vector: &mut [f32]) {
        let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|x| *x /= norm);
        }
    }

    pub fn is_valid_vector(vector: &[f32]) -> bool {
        vector.iter().all(|x| x.is_finite())
    }

    /// A vector that carries no signal: empty, all zeros, or not finite
    pub fn is_degenerate(vector: &[f32]) -> bool {
        vector.is_empty() || !is_valid_vector(vector) || vector.iter().all(|&x| x == 0.0)
    }
}
