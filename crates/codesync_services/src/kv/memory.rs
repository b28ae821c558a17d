//! Expiring in-memory key-value store

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use codesync_domain::KeyValueStore;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::debug;

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| now < at)
    }
}

/// Minimum time between two sweeps of expired entries
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Default)]
struct Entries {
    map: HashMap<String, Entry>,
    swept_at: Option<Instant>,
}

impl Entries {
    /// Drop every expired entry, at most once per `SWEEP_INTERVAL`
    fn sweep(&mut self, now: Instant) {
        if self.swept_at.is_some_and(|at| now.duration_since(at) < SWEEP_INTERVAL) {
            return;
        }
        let before = self.map.len();
        self.map.retain(|_, entry| entry.is_live(now));
        self.swept_at = Some(now);
        if self.map.len() < before {
            debug!(dropped = before - self.map.len(), "Swept expired keys");
        }
    }
}

/// In-memory store. Expired keys are dropped when read and swept on writes.
/// Uses the tokio clock so tests can pause and advance time.
#[derive(Debug, Default)]
pub struct MemoryKeyValueStore {
    entries: RwLock<Entries>,
    unavailable: AtomicBool,
    puts: AtomicUsize,
}

impl MemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail, simulating an outage
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of successful `put` calls so far
    pub fn put_count(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    /// Expiry instant of a live key
    pub async fn expires_at(&self, key: &str) -> Option<Instant> {
        let entries = self.entries.read().await;
        entries
            .map
            .get(key)
            .filter(|entry| entry.is_live(Instant::now()))
            .and_then(|entry| entry.expires_at)
    }

    /// Entries held in memory, expired ones not yet dropped included
    pub async fn resident(&self) -> usize {
        self.entries.read().await.map.len()
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(anyhow::anyhow!("key-value store unavailable"));
        }
        Ok(())
    }
}

#[async_trait]
impl KeyValueStore for MemoryKeyValueStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.check_available()?;

        let now = Instant::now();
        {
            let entries = self.entries.read().await;
            match entries.map.get(key) {
                Some(entry) if entry.is_live(now) => return Ok(Some(entry.value.clone())),
                None => return Ok(None),
                Some(_) => {}
            }
        }

        debug!("Dropping expired key '{}'", key);
        let mut entries = self.entries.write().await;
        if entries.map.get(key).is_some_and(|entry| !entry.is_live(now)) {
            entries.map.remove(key);
        }
        Ok(None)
    }

    async fn put(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        self.check_available()?;

        let now = Instant::now();
        let entry = Entry {
            value: value.to_string(),
            expires_at: ttl.map(|ttl| now + ttl),
        };
        let mut entries = self.entries.write().await;
        entries.sweep(now);
        entries.map.insert(key.to_string(), entry);
        self.puts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_value_expires_after_ttl() {
        let fixture = MemoryKeyValueStore::new();
        fixture
            .put("dedup:h1", "1", Some(Duration::from_secs(10)))
            .await
            .unwrap();

        let actual_before = fixture.get("dedup:h1").await.unwrap();
        tokio::time::advance(Duration::from_secs(11)).await;
        let actual_after = fixture.get("dedup:h1").await.unwrap();

        assert_eq!(actual_before, Some("1".to_string()));
        assert_eq!(actual_after, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_put_without_ttl_never_expires() {
        let fixture = MemoryKeyValueStore::new();
        fixture.put("root:a:p", "r1", None).await.unwrap();

        tokio::time::advance(Duration::from_secs(365 * 86_400)).await;
        let actual = fixture.get("root:a:p").await.unwrap();

        assert_eq!(actual, Some("r1".to_string()));
        assert_eq!(fixture.expires_at("root:a:p").await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rewrite_extends_expiry() {
        let fixture = MemoryKeyValueStore::new();
        fixture.put("k", "v", Some(Duration::from_secs(10))).await.unwrap();
        let first = fixture.expires_at("k").await.unwrap();

        tokio::time::advance(Duration::from_secs(5)).await;
        fixture.put("k", "v", Some(Duration::from_secs(10))).await.unwrap();
        let second = fixture.expires_at("k").await.unwrap();

        assert_eq!(second - first, Duration::from_secs(5));
        assert_eq!(fixture.put_count(), 2);
    }

    #[tokio::test]
    async fn test_unavailable_store_errors() {
        let fixture = MemoryKeyValueStore::new();
        fixture.set_unavailable(true);

        assert!(fixture.get("k").await.is_err());
        assert!(fixture.put("k", "v", None).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_writes_sweep_keys_never_read_again() {
        let fixture = MemoryKeyValueStore::new();
        for i in 0..5 {
            fixture
                .put(&format!("dedup:h{i}"), "1", Some(Duration::from_secs(10)))
                .await
                .unwrap();
        }
        fixture.put("root:a:p", "r1", None).await.unwrap();
        assert_eq!(fixture.resident().await, 6);

        tokio::time::advance(SWEEP_INTERVAL + Duration::from_secs(1)).await;
        fixture.put("dedup:fresh", "1", Some(Duration::from_secs(10))).await.unwrap();

        assert_eq!(fixture.resident().await, 2);
        assert_eq!(fixture.get("root:a:p").await.unwrap(), Some("r1".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_waits_for_interval() {
        let fixture = MemoryKeyValueStore::new();
        fixture.put("a", "1", Some(Duration::from_secs(1))).await.unwrap();

        tokio::time::advance(Duration::from_secs(2)).await;
        fixture.put("b", "1", None).await.unwrap();

        assert_eq!(fixture.resident().await, 2);
    }
}
