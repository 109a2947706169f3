//! Database handle and named-connection registry
//!
//! [`Database`] ties one adapter to its optional query cache and query
//! logger; every statement the crate runs flows through it. The registry
//! at the bottom of the module holds named handles for process-wide use.

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::adapter::transaction::{run_in_transaction, AdapterTransaction, BoxFuture};
use crate::adapter::{DatabaseAdapter, ExecuteOutcome, HealthStatus, PoolStatus, Statement};
use crate::cache::{CacheStats, QueryCache};
use crate::config::{BackendKind, DatabaseConfig};
use crate::error::{OrmError, OrmResult};
use crate::logging::{PoolMonitor, QueryLogger, QueryStats};
use crate::value::Row;

/// Tuning knobs that sit above the adapter
#[derive(Debug, Clone)]
pub struct DatabaseOptions {
    /// TTL for cached result sets; `None` disables the cache entirely.
    pub cache_ttl: Option<Duration>,
    pub slow_query_threshold: Duration,
}

impl Default for DatabaseOptions {
    fn default() -> Self {
        Self {
            cache_ttl: Some(Duration::from_secs(30)),
            slow_query_threshold: Duration::from_millis(200),
        }
    }
}

pub struct Database {
    adapter: Arc<dyn DatabaseAdapter>,
    cache: Option<QueryCache>,
    logger: QueryLogger,
    config: DatabaseConfig,
}

impl Database {
    pub async fn connect(config: DatabaseConfig) -> OrmResult<Self> {
        Self::connect_with(config, DatabaseOptions::default()).await
    }

    pub async fn connect_with(
        config: DatabaseConfig,
        options: DatabaseOptions,
    ) -> OrmResult<Self> {
        let adapter = crate::adapter::connect(&config).await?;
        Ok(Self {
            adapter,
            cache: options.cache_ttl.map(QueryCache::in_memory),
            logger: QueryLogger::new(options.slow_query_threshold),
            config,
        })
    }

    /// Wraps an already-built adapter. Used by tests to substitute backends.
    pub fn from_adapter(adapter: Arc<dyn DatabaseAdapter>, options: DatabaseOptions) -> Self {
        let config = DatabaseConfig::for_kind(adapter.kind());
        Self {
            adapter,
            cache: options.cache_ttl.map(QueryCache::in_memory),
            logger: QueryLogger::new(options.slow_query_threshold),
            config,
        }
    }

    pub fn kind(&self) -> BackendKind {
        self.adapter.kind()
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    /// Runs a read statement through the cache.
    ///
    /// Only genuinely read-only statements are ever served from cache;
    /// anything else falls straight through to the adapter.
    pub async fn query_cached(&self, table: &str, stmt: &Statement) -> OrmResult<Vec<Row>> {
        if let Some(cache) = self.cache.as_ref().filter(|_| stmt.is_read()) {
            if let Some(rows) = cache.get(table, stmt).await {
                tracing::trace!(table = %table, "cache hit");
                return Ok(rows);
            }
        }

        let start = Instant::now();
        match self.adapter.query(stmt).await {
            Ok(rows) => {
                self.logger
                    .record(table, &stmt.signature(), start.elapsed(), rows.len() as u64);
                if let Some(cache) = self.cache.as_ref().filter(|_| stmt.is_read()) {
                    cache.put(table, stmt, &rows).await;
                }
                Ok(rows)
            }
            Err(e) => {
                self.logger
                    .record_error(table, &stmt.signature(), start.elapsed(), &e.to_string());
                Err(e)
            }
        }
    }

    /// Runs a write statement and drops every cached read on `table`.
    pub async fn execute_invalidating(
        &self,
        table: &str,
        stmt: &Statement,
    ) -> OrmResult<ExecuteOutcome> {
        let start = Instant::now();
        let result = self.adapter.execute(stmt).await;
        match &result {
            Ok(outcome) => {
                self.logger
                    .record(table, &stmt.signature(), start.elapsed(), outcome.rows_affected);
            }
            Err(e) => {
                self.logger
                    .record_error(table, &stmt.signature(), start.elapsed(), &e.to_string());
            }
        }
        if result.is_ok() {
            if let Some(cache) = &self.cache {
                cache.invalidate_table(table).await;
            }
        }
        result
    }

    /// Insert that hands back the stored row, however the backend does it.
    pub async fn insert_returning(
        &self,
        table: &str,
        pk_column: &str,
        pk_value: Option<&JsonValue>,
        stmt: &Statement,
    ) -> OrmResult<Row> {
        let start = Instant::now();
        let result = self
            .adapter
            .insert_returning(stmt, table, pk_column, pk_value)
            .await;
        match &result {
            Ok(_) => {
                self.logger
                    .record(table, &stmt.signature(), start.elapsed(), 1);
            }
            Err(e) => {
                self.logger
                    .record_error(table, &stmt.signature(), start.elapsed(), &e.to_string());
            }
        }
        if result.is_ok() {
            if let Some(cache) = &self.cache {
                cache.invalidate_table(table).await;
            }
        }
        result
    }

    /// Runs `f` inside a transaction, committing on `Ok` and rolling back on `Err`.
    ///
    /// The closure can write to any table, so a commit flushes the whole
    /// cache rather than guessing which entries went stale.
    pub async fn transaction<T, F>(&self, f: F) -> OrmResult<T>
    where
        T: Send,
        F: for<'t> FnOnce(&'t mut dyn AdapterTransaction) -> BoxFuture<'t, OrmResult<T>> + Send,
    {
        let result = run_in_transaction(self.adapter.as_ref(), f).await;
        if result.is_ok() {
            if let Some(cache) = &self.cache {
                cache.flush().await;
            }
        }
        result
    }

    pub async fn invalidate_table(&self, table: &str) {
        if let Some(cache) = &self.cache {
            cache.invalidate_table(table).await;
        }
    }

    pub async fn health_check(&self) -> HealthStatus {
        self.adapter.health_check().await
    }

    pub fn pool_status(&self) -> PoolStatus {
        self.adapter.pool_status()
    }

    pub fn pool_monitor(&self) -> PoolMonitor {
        PoolMonitor::new(self.adapter.clone())
    }

    pub fn query_stats(&self) -> QueryStats {
        self.logger.stats()
    }

    pub fn cache_stats(&self) -> Option<CacheStats> {
        self.cache.as_ref().map(|cache| cache.stats())
    }

    pub fn adapter(&self) -> &Arc<dyn DatabaseAdapter> {
        &self.adapter
    }

    pub async fn close(&self) -> OrmResult<()> {
        if let Some(cache) = &self.cache {
            cache.flush().await;
        }
        self.adapter.close().await
    }
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("kind", &self.kind())
            .field("cached", &self.cache.is_some())
            .finish_non_exhaustive()
    }
}

pub const DEFAULT_CONNECTION: &str = "default";

/// Named handles shared across the process
#[derive(Default)]
pub struct DatabaseRegistry {
    connections: RwLock<HashMap<String, Arc<Database>>>,
}

impl DatabaseRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, name: &str, database: Arc<Database>) -> OrmResult<()> {
        let mut connections = self.connections.write();
        if connections.contains_key(name) {
            return Err(OrmError::Configuration(format!(
                "connection '{}' is already initialized",
                name
            )));
        }
        connections.insert(name.to_string(), database);
        Ok(())
    }

    pub fn get(&self, name: &str) -> OrmResult<Arc<Database>> {
        self.connections.read().get(name).cloned().ok_or_else(|| {
            OrmError::Configuration(format!(
                "connection '{}' is not initialized; call init_database first",
                name
            ))
        })
    }

    pub fn remove(&self, name: &str) -> Option<Arc<Database>> {
        self.connections.write().remove(name)
    }

    pub fn drain(&self) -> Vec<(String, Arc<Database>)> {
        self.connections.write().drain().collect()
    }

    pub fn names(&self) -> Vec<String> {
        self.connections.read().keys().cloned().collect()
    }
}

static REGISTRY: Lazy<DatabaseRegistry> = Lazy::new(DatabaseRegistry::new);

/// Connects and registers a named handle (`None` means `"default"`).
pub async fn init_database(
    config: DatabaseConfig,
    name: Option<&str>,
) -> OrmResult<Arc<Database>> {
    let name = name.unwrap_or(DEFAULT_CONNECTION);
    let database = Arc::new(Database::connect(config).await?);
    REGISTRY.insert(name, database.clone())?;
    tracing::info!(connection = %name, kind = %database.kind(), "database registered");
    Ok(database)
}

/// Fetches a registered handle (`None` means `"default"`).
pub fn get_database(name: Option<&str>) -> OrmResult<Arc<Database>> {
    REGISTRY.get(name.unwrap_or(DEFAULT_CONNECTION))
}

/// Closes one named connection, or every connection when `name` is `None`.
pub async fn close_database(name: Option<&str>) -> OrmResult<()> {
    match name {
        Some(name) => match REGISTRY.remove(name) {
            Some(database) => database.close().await,
            None => Err(OrmError::Configuration(format!(
                "connection '{}' is not initialized; call init_database first",
                name
            ))),
        },
        None => {
            for (name, database) in REGISTRY.drain() {
                if let Err(e) = database.close().await {
                    tracing::warn!(connection = %name, error = %e, "close failed");
                }
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_rejects_duplicate_names() {
        let registry = DatabaseRegistry::new();
        let database = Arc::new(Database::from_adapter(
            crate::adapter::null_adapter(),
            DatabaseOptions::default(),
        ));
        registry.insert("primary", database.clone()).unwrap();
        let err = registry.insert("primary", database).unwrap_err();
        assert!(matches!(err, OrmError::Configuration(_)));
    }

    #[test]
    fn debug_output_names_the_backend() {
        let database = Database::from_adapter(
            crate::adapter::null_adapter(),
            DatabaseOptions::default(),
        );
        let rendered = format!("{:?}", database);
        assert!(rendered.contains("Postgres"));
        assert!(rendered.contains("cached"));
    }

    #[test]
    fn registry_miss_names_the_connection() {
        let registry = DatabaseRegistry::new();
        let err = registry.get("analytics").unwrap_err();
        assert!(err.to_string().contains("analytics"));
        assert!(err.to_string().contains("init_database"));
    }
}
