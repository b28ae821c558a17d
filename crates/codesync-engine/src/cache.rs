//! Global dedup and derived-result caches over an expiring key-value store
//!
//! Both caches are keyed by content hash alone and shared by every tenant.
//! A store failure is logged and read as a miss: caches only buy efficiency.

use std::collections::HashMap;
use std::sync::Arc;

use codesync_domain::{CacheConfig, DerivedResult, KeyValueStore};
use futures::future::join_all;
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};

use crate::errors::{Result, SyncError};

const PRESENT: &str = "1";

pub fn dedup_key(hash: &str) -> String {
    format!("dedup:{hash}")
}

pub fn derived_key(hash: &str) -> String {
    format!("derived:{hash}")
}

pub fn root_key(tenant_id: &str, project_id: &str) -> String {
    format!("root:{tenant_id}:{project_id}")
}

fn record_lookup(cache: &'static str, hit: bool) {
    let outcome = if hit { "hit" } else { "miss" };
    metrics::counter!("codesync_cache_lookups_total", "cache" => cache, "outcome" => outcome)
        .increment(1);
}

pub struct TieredCache {
    store: Arc<dyn KeyValueStore>,
    config: CacheConfig,
    refreshes: TaskTracker,
}

impl TieredCache {
    pub fn new(store: Arc<dyn KeyValueStore>, config: CacheConfig) -> Self {
        Self { store, config, refreshes: TaskTracker::new() }
    }

    pub fn store_name(&self) -> &str {
        self.store.name()
    }

    /// Whether content with this hash was seen recently. A hit pushes the
    /// expiry out in the background.
    pub async fn is_seen(&self, hash: &str) -> bool {
        let key = dedup_key(hash);
        let hit = match self.store.get(&key).await {
            Ok(value) => value.is_some(),
            Err(e) => {
                warn!(hash, error = %e, "Dedup lookup failed, treating as miss");
                false
            }
        };
        record_lookup("dedup", hit);
        if hit {
            self.refresh_in_background(key);
        }
        hit
    }

    /// Dedup lookups for a batch, issued concurrently and keyed by hash
    pub async fn seen_batch(&self, hashes: &[String]) -> HashMap<String, bool> {
        let lookups = hashes.iter().map(|hash| async move {
            let seen = self.is_seen(hash).await;
            (hash.clone(), seen)
        });
        join_all(lookups).await.into_iter().collect()
    }

    /// Record that content with this hash is held remotely
    pub async fn mark_seen(&self, hash: &str) -> bool {
        match self
            .store
            .put(&dedup_key(hash), PRESENT, Some(self.config.dedup_ttl()))
            .await
        {
            Ok(()) => true,
            Err(e) => {
                warn!(hash, error = %e, "Dedup write failed");
                false
            }
        }
    }

    fn refresh_in_background(&self, key: String) {
        let store = Arc::clone(&self.store);
        let ttl = self.config.dedup_ttl();
        self.refreshes.spawn(async move {
            if let Err(e) = store.put(&key, PRESENT, Some(ttl)).await {
                warn!(key, error = %e, "TTL refresh failed");
            }
        });
    }

    /// Cached derivation for a hash. Unreadable or degenerate entries are misses.
    pub async fn derived(&self, hash: &str) -> Option<DerivedResult> {
        let raw = match self.store.get(&derived_key(hash)).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!(hash, error = %e, "Derived lookup failed, treating as miss");
                None
            }
        };

        let result = raw.and_then(|raw| match serde_json::from_str::<DerivedResult>(&raw) {
            Ok(result) if !result.is_degenerate() => Some(result),
            Ok(_) => {
                warn!(hash, "Ignoring degenerate cached derivation");
                None
            }
            Err(e) => {
                warn!(hash, error = %e, "Ignoring unreadable cached derivation");
                None
            }
        });
        record_lookup("derived", result.is_some());
        result
    }

    /// Derived lookups for a batch, issued concurrently; only hits are returned
    pub async fn derived_batch(&self, hashes: &[String]) -> HashMap<String, DerivedResult> {
        let lookups = hashes.iter().map(|hash| async move {
            self.derived(hash).await.map(|result| (hash.clone(), result))
        });
        join_all(lookups).await.into_iter().flatten().collect()
    }

    /// Store a derivation. Degenerate results are refused so a failed call
    /// never poisons the shared cache.
    pub async fn store_derived(&self, hash: &str, result: &DerivedResult) -> bool {
        if result.is_degenerate() {
            debug!(hash, "Refusing to cache degenerate derivation");
            return false;
        }
        let value = match serde_json::to_string(result) {
            Ok(value) => value,
            Err(e) => {
                warn!(hash, error = %e, "Could not encode derivation");
                return false;
            }
        };
        match self
            .store
            .put(&derived_key(hash), &value, Some(self.config.derived_ttl()))
            .await
        {
            Ok(()) => true,
            Err(e) => {
                warn!(hash, error = %e, "Derived write failed");
                false
            }
        }
    }

    /// Root last acknowledged for a project. Unlike cache reads this is
    /// authoritative, so a store failure is an error.
    pub async fn remote_root(&self, tenant_id: &str, project_id: &str) -> Result<Option<String>> {
        self.store
            .get(&root_key(tenant_id, project_id))
            .await
            .map_err(|e| SyncError::cache_unavailable_with_source("read remote root", e))
    }

    pub async fn set_remote_root(&self, tenant_id: &str, project_id: &str, root: &str) -> Result<()> {
        self.store
            .put(&root_key(tenant_id, project_id), root, None)
            .await
            .map_err(|e| SyncError::cache_unavailable_with_source("write remote root", e))
    }

    /// Wait for every outstanding TTL refresh
    pub async fn drain(&self) {
        self.refreshes.close();
        self.refreshes.wait().await;
        self.refreshes.reopen();
    }
}
