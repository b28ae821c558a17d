//! Tunables for segmentation, caching and the sync protocol

use std::time::Duration;

use derive_setters::Setters;
use serde::{Deserialize, Serialize};

const DAY_SECS: u64 = 24 * 60 * 60;

/// Configuration for the semantic segmenter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Setters)]
#[setters(strip_option, into)]
#[serde(default)]
pub struct SegmenterConfig {
    /// Smallest semantic unit or gap block emitted, in characters
    pub min_chunk_size: usize,
    /// Largest semantic unit emitted before trying to split it, in characters
    pub max_chunk_size: usize,
    /// Lines per window when no syntax tree is available
    pub fallback_line_size: usize,
    /// Lines shared between consecutive fallback windows
    pub fallback_overlap: usize,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            min_chunk_size: 50,
            max_chunk_size: 2000,
            fallback_line_size: 50,
            fallback_overlap: 10,
        }
    }
}

impl SegmenterConfig {
    /// Distance between the starts of consecutive fallback windows
    pub fn fallback_step(&self) -> usize {
        self.fallback_line_size
            .saturating_sub(self.fallback_overlap)
            .max(1)
    }
}

/// TTLs of the two global caches
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Setters)]
#[setters(strip_option, into)]
#[serde(default)]
pub struct CacheConfig {
    pub dedup_ttl_secs: u64,
    pub derived_ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dedup_ttl_secs: 30 * DAY_SECS,
            derived_ttl_secs: 90 * DAY_SECS,
        }
    }
}

impl CacheConfig {
    pub fn dedup_ttl(&self) -> Duration {
        Duration::from_secs(self.dedup_ttl_secs)
    }

    pub fn derived_ttl(&self) -> Duration {
        Duration::from_secs(self.derived_ttl_secs)
    }
}

/// Largest protocol request body the server accepts and clients build
pub const DEFAULT_MAX_REQUEST_BYTES: usize = 8 * 1024 * 1024;

/// Server-side protocol limits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Setters)]
#[setters(strip_option, into)]
#[serde(default)]
pub struct ProtocolConfig {
    /// Records per vector-store / derivation sub-batch
    pub sub_batch_size: usize,
    /// Budget for a single derivation call
    pub derivation_timeout_ms: u64,
    /// Upper bound on chunks accepted in one request
    pub max_chunks_per_request: usize,
    /// Upper bound on `top_k` for searches
    pub max_top_k: usize,
    /// Request body limit of the HTTP API, in bytes
    pub max_request_bytes: usize,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            sub_batch_size: 100,
            derivation_timeout_ms: 30_000,
            max_chunks_per_request: 10_000,
            max_top_k: 100,
            max_request_bytes: DEFAULT_MAX_REQUEST_BYTES,
        }
    }
}

impl ProtocolConfig {
    pub fn derivation_timeout(&self) -> Duration {
        Duration::from_millis(self.derivation_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_default_ttls() {
        let fixture = CacheConfig::default();

        assert_eq!(fixture.dedup_ttl(), Duration::from_secs(30 * 86_400));
        assert_eq!(fixture.derived_ttl(), Duration::from_secs(90 * 86_400));
    }

    #[test]
    fn test_fallback_step_never_zero() {
        let fixture = SegmenterConfig::default()
            .fallback_line_size(10usize)
            .fallback_overlap(10usize);

        assert_eq!(fixture.fallback_step(), 1);
        assert_eq!(SegmenterConfig::default().fallback_step(), 40);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let actual: ProtocolConfig = serde_json::from_str(r#"{"sub_batch_size": 10}"#).unwrap();
        let expected = ProtocolConfig::default().sub_batch_size(10usize);
        assert_eq!(actual, expected);
    }
}
