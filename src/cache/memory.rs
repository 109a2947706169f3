//! In-process cache backend on a concurrent map
//!
//! Expired entries are dropped lazily on read and swept opportunistically
//! on a fraction of writes, so no background task is needed.

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value as JsonValue;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use super::{CacheBackend, CacheError, CacheStats};

#[derive(Debug, Clone)]
pub struct MemoryCacheConfig {
    /// Entry count at which writes start evicting expired entries eagerly.
    pub max_entries: usize,
    /// Chance (0.0..=1.0) that a write triggers an expired-entry sweep.
    pub cleanup_probability: f64,
}

impl Default for MemoryCacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 10_000,
            cleanup_probability: 0.01,
        }
    }
}

struct Entry {
    value: JsonValue,
    expires_at: Instant,
}

impl Entry {
    fn expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

pub struct MemoryCache {
    entries: DashMap<String, Entry>,
    config: MemoryCacheConfig,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl MemoryCache {
    pub fn new(config: MemoryCacheConfig) -> Self {
        Self {
            entries: DashMap::new(),
            config,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    fn sweep_expired(&self) {
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.expired());
        let removed = before.saturating_sub(self.entries.len());
        if removed > 0 {
            self.evictions.fetch_add(removed as u64, Ordering::Relaxed);
            tracing::trace!(removed, "swept expired cache entries");
        }
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new(MemoryCacheConfig::default())
    }
}

#[async_trait]
impl CacheBackend for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<JsonValue>, CacheError> {
        if let Some(entry) = self.entries.get(key) {
            if !entry.expired() {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Ok(Some(entry.value.clone()));
            }
        }
        // Drop the expired entry outside the read guard.
        if self
            .entries
            .remove_if(key, |_, entry| entry.expired())
            .is_some()
        {
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        Ok(None)
    }

    async fn put(&self, key: &str, value: JsonValue, ttl: Duration) -> Result<(), CacheError> {
        if self.entries.len() >= self.config.max_entries
            || rand::random::<f64>() < self.config.cleanup_probability
        {
            self.sweep_expired();
        }
        if self.entries.len() >= self.config.max_entries {
            return Err(CacheError::Backend("cache is full".to_string()));
        }
        self.entries.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn forget(&self, key: &str) -> Result<bool, CacheError> {
        Ok(self.entries.remove(key).is_some())
    }

    async fn forget_prefix(&self, prefix: &str) -> Result<u64, CacheError> {
        let before = self.entries.len();
        self.entries.retain(|key, _| !key.starts_with(prefix));
        Ok(before.saturating_sub(self.entries.len()) as u64)
    }

    async fn flush(&self) -> Result<(), CacheError> {
        self.entries.clear();
        Ok(())
    }

    fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.entries.len() as u64,
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn expired_entries_read_as_misses() {
        let cache = MemoryCache::default();
        cache
            .put("k", json!(1), Duration::from_millis(0))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(cache.get("k").await.unwrap().is_none());

        let stats = cache.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.entries, 0);
    }

    #[tokio::test]
    async fn stats_track_hits_and_misses() {
        let cache = MemoryCache::default();
        cache
            .put("k", json!("v"), Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(cache.get("k").await.unwrap(), Some(json!("v")));
        assert!(cache.get("absent").await.unwrap().is_none());

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert!((stats.hit_rate() - 0.5).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn prefix_forget_counts_removed_entries() {
        let cache = MemoryCache::default();
        for key in ["users:a", "users:b", "posts:a"] {
            cache
                .put(key, json!(null), Duration::from_secs(60))
                .await
                .unwrap();
        }
        assert_eq!(cache.forget_prefix("users:").await.unwrap(), 2);
        assert_eq!(cache.stats().entries, 1);
    }

    #[tokio::test]
    async fn full_cache_rejects_new_entries() {
        let cache = MemoryCache::new(MemoryCacheConfig {
            max_entries: 1,
            cleanup_probability: 0.0,
        });
        cache
            .put("a", json!(1), Duration::from_secs(60))
            .await
            .unwrap();
        assert!(cache.put("b", json!(2), Duration::from_secs(60)).await.is_err());
    }
}
