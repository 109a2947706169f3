//! Read-through query cache
//!
//! Cached entries are keyed by `table:signature-hash`, which keeps
//! invalidation table-granular: any write through a table drops every
//! cached query that read from it. Cache failures never fail a query;
//! they are logged and treated as misses.

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::time::Duration;

use crate::adapter::Statement;
use crate::value::Row;

pub mod memory;

pub use memory::{MemoryCache, MemoryCacheConfig};

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("cache backend error: {0}")]
    Backend(String),
    #[error("cache serialization error: {0}")]
    Serialization(String),
}

/// Counters maintained by a cache backend
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: u64,
    pub evictions: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Storage backends the query cache can sit on
#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<JsonValue>, CacheError>;
    async fn put(&self, key: &str, value: JsonValue, ttl: Duration) -> Result<(), CacheError>;
    async fn forget(&self, key: &str) -> Result<bool, CacheError>;
    /// Drops every entry whose key starts with `prefix`, returning the count.
    async fn forget_prefix(&self, prefix: &str) -> Result<u64, CacheError>;
    async fn flush(&self) -> Result<(), CacheError>;
    fn stats(&self) -> CacheStats;
}

/// Read-through cache over compiled statements
pub struct QueryCache {
    backend: Box<dyn CacheBackend>,
    default_ttl: Duration,
}

impl QueryCache {
    pub fn new(backend: Box<dyn CacheBackend>, default_ttl: Duration) -> Self {
        Self {
            backend,
            default_ttl,
        }
    }

    pub fn in_memory(default_ttl: Duration) -> Self {
        Self::new(Box::new(MemoryCache::default()), default_ttl)
    }

    fn key(table: &str, stmt: &Statement) -> String {
        let mut hasher = DefaultHasher::new();
        stmt.signature().hash(&mut hasher);
        format!("{}:{:016x}", table, hasher.finish())
    }

    /// Look the statement up. Backend failures count as misses.
    pub async fn get(&self, table: &str, stmt: &Statement) -> Option<Vec<Row>> {
        let key = Self::key(table, stmt);
        match self.backend.get(&key).await {
            Ok(Some(JsonValue::Array(items))) => {
                let mut rows = Vec::with_capacity(items.len());
                for item in items {
                    match item {
                        JsonValue::Object(map) => rows.push(Row::new(map)),
                        _ => return None,
                    }
                }
                Some(rows)
            }
            Ok(_) => None,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "cache read failed, treating as miss");
                None
            }
        }
    }

    /// Store a result set. Backend failures are absorbed.
    pub async fn put(&self, table: &str, stmt: &Statement, rows: &[Row]) {
        let key = Self::key(table, stmt);
        let value = JsonValue::Array(
            rows.iter()
                .map(|row| JsonValue::Object(row.as_map().clone()))
                .collect(),
        );
        if let Err(e) = self.backend.put(&key, value, self.default_ttl).await {
            tracing::warn!(key = %key, error = %e, "cache write failed, skipping");
        }
    }

    /// Drop every cached result that read from `table`.
    pub async fn invalidate_table(&self, table: &str) {
        let prefix = format!("{}:", table);
        match self.backend.forget_prefix(&prefix).await {
            Ok(count) if count > 0 => {
                tracing::debug!(table = %table, dropped = count, "cache invalidated");
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(table = %table, error = %e, "cache invalidation failed");
            }
        }
    }

    pub async fn flush(&self) {
        if let Err(e) = self.backend.flush().await {
            tracing::warn!(error = %e, "cache flush failed");
        }
    }

    pub fn stats(&self) -> CacheStats {
        self.backend.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::DatabaseValue;

    fn stmt(sql: &str) -> Statement {
        Statement::Sql {
            sql: sql.to_string(),
            params: vec![DatabaseValue::Int64(1)],
        }
    }

    fn row(name: &str) -> Row {
        let mut map = serde_json::Map::new();
        map.insert("name".to_string(), JsonValue::String(name.to_string()));
        Row::new(map)
    }

    #[tokio::test]
    async fn read_through_hit_after_put() {
        let cache = QueryCache::in_memory(Duration::from_secs(60));
        let statement = stmt("SELECT * FROM users WHERE id = $1");
        assert!(cache.get("users", &statement).await.is_none());

        cache.put("users", &statement, &[row("Ada")]).await;
        let rows = cache.get("users", &statement).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get::<String>("name").unwrap(), "Ada");
    }

    #[tokio::test]
    async fn different_params_are_different_entries() {
        let cache = QueryCache::in_memory(Duration::from_secs(60));
        let a = Statement::Sql {
            sql: "SELECT * FROM users WHERE id = $1".to_string(),
            params: vec![DatabaseValue::Int64(1)],
        };
        let b = Statement::Sql {
            sql: "SELECT * FROM users WHERE id = $1".to_string(),
            params: vec![DatabaseValue::Int64(2)],
        };
        cache.put("users", &a, &[row("Ada")]).await;
        assert!(cache.get("users", &b).await.is_none());
    }

    #[tokio::test]
    async fn table_invalidation_drops_only_that_table() {
        let cache = QueryCache::in_memory(Duration::from_secs(60));
        let users = stmt("SELECT * FROM users");
        let posts = stmt("SELECT * FROM posts");
        cache.put("users", &users, &[row("Ada")]).await;
        cache.put("posts", &posts, &[row("Hello")]).await;

        cache.invalidate_table("users").await;
        assert!(cache.get("users", &users).await.is_none());
        assert!(cache.get("posts", &posts).await.is_some());
    }
}
