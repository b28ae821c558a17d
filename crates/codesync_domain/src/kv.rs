//! Contract of the expiring key-value store backing both global caches

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

/// A key-value store with optional per-key expiry. Only presence-with-expiry
/// is required; there is no eviction by memory pressure.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Fetch a live value. Expired keys read as absent.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Store a value, replacing any previous value and expiry
    async fn put(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()>;

    fn name(&self) -> &str;
}
