//! Adapter layer
//!
//! Each backend implements `DatabaseAdapter`: one uniform
//! query/execute/transaction/health contract over its own pooled driver.
//! The set of backends is a closed enum dispatch — `connect` picks the
//! concrete adapter from the configured `BackendKind`.

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{BackendKind, DatabaseConfig};
use crate::error::OrmResult;
use crate::model::schema::IndexDefinition;
use crate::value::{DatabaseValue, Row};

pub mod mongo;
pub mod mysql;
pub mod postgres;
pub mod transaction;

pub use transaction::{run_in_transaction, AdapterTransaction};

/// Compiled statement handed to an adapter
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    /// Parameterized SQL for the relational backends
    Sql {
        sql: String,
        params: Vec<DatabaseValue>,
    },
    /// Command for the document backend
    Document(DocumentCommand),
}

impl Statement {
    /// Stable textual signature used for cache keying.
    pub fn signature(&self) -> String {
        match self {
            Statement::Sql { sql, params } => {
                let rendered: Vec<String> =
                    params.iter().map(|p| p.to_json().to_string()).collect();
                format!("{}|{}", sql, rendered.join(","))
            }
            Statement::Document(cmd) => format!("{:?}", cmd),
        }
    }

    /// True for statements that read rather than write.
    pub fn is_read(&self) -> bool {
        match self {
            Statement::Sql { sql, .. } => {
                let head = sql.trim_start().to_ascii_uppercase();
                head.starts_with("SELECT")
            }
            Statement::Document(cmd) => {
                matches!(cmd, DocumentCommand::Find { .. } | DocumentCommand::Count { .. })
            }
        }
    }
}

/// Commands understood by the document backend
#[derive(Debug, Clone, PartialEq)]
pub enum DocumentCommand {
    Find {
        collection: String,
        filter: JsonValue,
        sort: Option<JsonValue>,
        skip: Option<u64>,
        limit: Option<i64>,
        projection: Option<JsonValue>,
    },
    Count {
        collection: String,
        filter: JsonValue,
    },
    InsertOne {
        collection: String,
        document: JsonValue,
    },
    UpdateMany {
        collection: String,
        filter: JsonValue,
        update: JsonValue,
    },
    DeleteMany {
        collection: String,
        filter: JsonValue,
    },
}

/// Result of a write statement
#[derive(Debug, Clone, Default)]
pub struct ExecuteOutcome {
    pub rows_affected: u64,
    /// Auto-increment id, where the backend reports one (MySQL)
    pub last_insert_id: Option<i64>,
    /// Backend-generated document id (MongoDB)
    pub inserted_id: Option<JsonValue>,
}

/// Point-in-time health probe result
#[derive(Debug, Clone)]
pub struct HealthStatus {
    pub healthy: bool,
    pub latency_ms: u64,
    pub error: Option<String>,
}

/// Point-in-time pool occupancy snapshot
#[derive(Debug, Clone, Default)]
pub struct PoolStatus {
    pub total: u32,
    pub active: u32,
    pub idle: u32,
    pub waiting: u32,
}

/// Uniform contract every backend driver wrapper implements
#[async_trait]
pub trait DatabaseAdapter: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Execute a read statement and return its rows.
    async fn query(&self, stmt: &Statement) -> OrmResult<Vec<Row>>;

    /// Execute a write statement and return the affected count plus any
    /// backend-generated identifiers.
    async fn execute(&self, stmt: &Statement) -> OrmResult<ExecuteOutcome>;

    /// Insert and return the stored row, including generated columns.
    /// `pk_value` is the client-supplied key when one exists; otherwise
    /// the adapter falls back to the backend's generated id.
    async fn insert_returning(
        &self,
        stmt: &Statement,
        table: &str,
        pk_column: &str,
        pk_value: Option<&JsonValue>,
    ) -> OrmResult<Row>;

    /// Begin a transaction pinned to one connection.
    async fn begin(&self) -> OrmResult<Box<dyn AdapterTransaction>>;

    /// Probe the backend with a trivial round trip.
    async fn health_check(&self) -> HealthStatus;

    /// Snapshot of pool occupancy; performs no I/O.
    fn pool_status(&self) -> PoolStatus;

    /// Idempotently create the given indexes on a table/collection.
    async fn create_indexes(&self, table: &str, indexes: &[IndexDefinition]) -> OrmResult<()>;

    /// Close the underlying pool.
    async fn close(&self) -> OrmResult<()>;
}

/// Connect the adapter matching the configured backend kind, retrying
/// transient failures per the pool's retry policy with linear backoff.
pub async fn connect(config: &DatabaseConfig) -> OrmResult<Arc<dyn DatabaseAdapter>> {
    let retries = config.pool.max_retries;
    let delay = Duration::from_millis(config.pool.retry_delay_ms);
    let mut attempt = 0u32;
    loop {
        let result: OrmResult<Arc<dyn DatabaseAdapter>> = match config.kind {
            BackendKind::Postgres => postgres::PostgresAdapter::connect(config)
                .await
                .map(|a| Arc::new(a) as Arc<dyn DatabaseAdapter>),
            BackendKind::MySql => mysql::MySqlAdapter::connect(config)
                .await
                .map(|a| Arc::new(a) as Arc<dyn DatabaseAdapter>),
            BackendKind::MongoDb => mongo::MongoAdapter::connect(config)
                .await
                .map(|a| Arc::new(a) as Arc<dyn DatabaseAdapter>),
        };
        match result {
            Ok(adapter) => {
                tracing::info!(backend = %config.kind, "database connection established");
                return Ok(adapter);
            }
            Err(e) if e.is_transient() && attempt < retries => {
                attempt += 1;
                tracing::warn!(
                    backend = %config.kind,
                    attempt,
                    retries,
                    error = %e,
                    "connect failed, retrying"
                );
                tokio::time::sleep(delay * attempt).await;
            }
            Err(e) => {
                tracing::error!(backend = %config.kind, error = %e, "connect failed");
                return Err(e);
            }
        }
    }
}

#[cfg(test)]
pub(crate) fn null_adapter() -> std::sync::Arc<dyn DatabaseAdapter> {
    struct NullAdapter;

    #[async_trait::async_trait]
    impl DatabaseAdapter for NullAdapter {
        fn kind(&self) -> crate::config::BackendKind {
            crate::config::BackendKind::Postgres
        }

        async fn query(&self, _stmt: &Statement) -> OrmResult<Vec<Row>> {
            Ok(Vec::new())
        }

        async fn execute(&self, _stmt: &Statement) -> OrmResult<ExecuteOutcome> {
            Ok(ExecuteOutcome::default())
        }

        async fn insert_returning(
            &self,
            _stmt: &Statement,
            _table: &str,
            _pk_column: &str,
            _pk_value: Option<&JsonValue>,
        ) -> OrmResult<Row> {
            Err(crate::error::OrmError::Query("null adapter".to_string()))
        }

        async fn begin(&self) -> OrmResult<Box<dyn transaction::AdapterTransaction>> {
            Err(crate::error::OrmError::Query("null adapter".to_string()))
        }

        async fn health_check(&self) -> HealthStatus {
            HealthStatus {
                healthy: true,
                latency_ms: 0,
                error: None,
            }
        }

        fn pool_status(&self) -> PoolStatus {
            PoolStatus::default()
        }

        async fn create_indexes(
            &self,
            _table: &str,
            _indexes: &[crate::model::schema::IndexDefinition],
        ) -> OrmResult<()> {
            Ok(())
        }

        async fn close(&self) -> OrmResult<()> {
            Ok(())
        }
    }

    std::sync::Arc::new(NullAdapter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statement_signature_includes_params() {
        let a = Statement::Sql {
            sql: "SELECT * FROM users WHERE id = $1".into(),
            params: vec![DatabaseValue::Int64(1)],
        };
        let b = Statement::Sql {
            sql: "SELECT * FROM users WHERE id = $1".into(),
            params: vec![DatabaseValue::Int64(2)],
        };
        assert_ne!(a.signature(), b.signature());
    }

    #[test]
    fn read_write_classification() {
        let select = Statement::Sql {
            sql: "SELECT 1".into(),
            params: vec![],
        };
        let delete = Statement::Sql {
            sql: "DELETE FROM users".into(),
            params: vec![],
        };
        assert!(select.is_read());
        assert!(!delete.is_read());

        let find = Statement::Document(DocumentCommand::Count {
            collection: "users".into(),
            filter: serde_json::json!({}),
        });
        assert!(find.is_read());
    }
}
