//! PostgreSQL adapter ("relational-A")
//!
//! Wraps a sqlx Postgres pool. Inserts use RETURNING to hand back the
//! stored row with its generated columns in one round trip.

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{Column, Pool, Postgres, Row as SqlxRow, TypeInfo};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crate::config::{DatabaseConfig, PoolSettings};
use crate::error::{OrmError, OrmResult};
use crate::model::schema::{IndexDefinition, IndexKind};
use crate::value::{DatabaseValue, Row};

use super::transaction::AdapterTransaction;
use super::{DatabaseAdapter, ExecuteOutcome, HealthStatus, PoolStatus, Statement};

pub struct PostgresAdapter {
    pool: Pool<Postgres>,
    settings: PoolSettings,
    waiting: AtomicU32,
    acquire_count: AtomicU64,
    acquire_errors: AtomicU64,
}

impl PostgresAdapter {
    pub async fn connect(config: &DatabaseConfig) -> OrmResult<Self> {
        let settings = config.pool.clone();
        let mut options = PgPoolOptions::new()
            .max_connections(settings.max)
            .min_connections(settings.min)
            .acquire_timeout(Duration::from_secs(settings.acquire_timeout_seconds));
        if let Some(idle) = settings.idle_timeout_seconds {
            options = options.idle_timeout(Duration::from_secs(idle));
        }

        let pool = options
            .connect(&config.connection_url())
            .await
            .map_err(|e| OrmError::Connection(format!("postgres connect failed: {}", e)))?;

        tracing::debug!(
            max = settings.max,
            min = settings.min,
            "postgres pool created"
        );
        Ok(Self {
            pool,
            settings,
            waiting: AtomicU32::new(0),
            acquire_count: AtomicU64::new(0),
            acquire_errors: AtomicU64::new(0),
        })
    }

    /// Acquire a connection, tracking waiters for the pool snapshot.
    async fn acquire(&self) -> OrmResult<sqlx::pool::PoolConnection<Postgres>> {
        self.waiting.fetch_add(1, Ordering::Relaxed);
        self.acquire_count.fetch_add(1, Ordering::Relaxed);
        let result = self.pool.acquire().await;
        self.waiting.fetch_sub(1, Ordering::Relaxed);
        result.map_err(|e| {
            self.acquire_errors.fetch_add(1, Ordering::Relaxed);
            OrmError::from_sqlx(e, self.settings.acquire_timeout_seconds)
        })
    }

    fn sql_of<'a>(&self, stmt: &'a Statement) -> OrmResult<(&'a str, &'a [DatabaseValue])> {
        match stmt {
            Statement::Sql { sql, params } => Ok((sql, params)),
            Statement::Document(_) => Err(OrmError::Query(
                "document command sent to the postgres adapter".to_string(),
            )),
        }
    }
}

#[async_trait]
impl DatabaseAdapter for PostgresAdapter {
    fn kind(&self) -> crate::config::BackendKind {
        crate::config::BackendKind::Postgres
    }

    async fn query(&self, stmt: &Statement) -> OrmResult<Vec<Row>> {
        let (sql, params) = self.sql_of(stmt)?;
        let mut conn = self.acquire().await?;
        let mut query = sqlx::query(sql);
        for param in params {
            query = bind_value(query, param);
        }
        let rows = query
            .fetch_all(&mut *conn)
            .await
            .map_err(|e| OrmError::from_sqlx(e, self.settings.acquire_timeout_seconds))?;
        rows.iter().map(pg_row_to_row).collect()
    }

    async fn execute(&self, stmt: &Statement) -> OrmResult<ExecuteOutcome> {
        let (sql, params) = self.sql_of(stmt)?;
        let mut conn = self.acquire().await?;
        let mut query = sqlx::query(sql);
        for param in params {
            query = bind_value(query, param);
        }
        let result = query
            .execute(&mut *conn)
            .await
            .map_err(|e| OrmError::from_sqlx(e, self.settings.acquire_timeout_seconds))?;
        Ok(ExecuteOutcome {
            rows_affected: result.rows_affected(),
            last_insert_id: None,
            inserted_id: None,
        })
    }

    async fn insert_returning(
        &self,
        stmt: &Statement,
        _table: &str,
        _pk_column: &str,
        _pk_value: Option<&JsonValue>,
    ) -> OrmResult<Row> {
        let (sql, params) = self.sql_of(stmt)?;
        let sql = format!("{} RETURNING *", sql);
        let mut conn = self.acquire().await?;
        let mut query = sqlx::query(&sql);
        for param in params {
            query = bind_value(query, param);
        }
        let row = query
            .fetch_one(&mut *conn)
            .await
            .map_err(|e| OrmError::from_sqlx(e, self.settings.acquire_timeout_seconds))?;
        pg_row_to_row(&row)
    }

    async fn begin(&self) -> OrmResult<Box<dyn AdapterTransaction>> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| OrmError::from_sqlx(e, self.settings.acquire_timeout_seconds))?;
        Ok(Box::new(PostgresTransaction {
            tx: Some(tx),
            acquire_timeout: self.settings.acquire_timeout_seconds,
        }))
    }

    async fn health_check(&self) -> HealthStatus {
        let start = Instant::now();
        match sqlx::query("SELECT 1").execute(&self.pool).await {
            Ok(_) => HealthStatus {
                healthy: true,
                latency_ms: start.elapsed().as_millis() as u64,
                error: None,
            },
            Err(e) => HealthStatus {
                healthy: false,
                latency_ms: start.elapsed().as_millis() as u64,
                error: Some(e.to_string()),
            },
        }
    }

    fn pool_status(&self) -> PoolStatus {
        let total = self.pool.size();
        let idle = self.pool.num_idle() as u32;
        PoolStatus {
            total,
            active: total.saturating_sub(idle),
            idle,
            waiting: self.waiting.load(Ordering::Relaxed),
        }
    }

    async fn create_indexes(&self, table: &str, indexes: &[IndexDefinition]) -> OrmResult<()> {
        for index in indexes {
            let name = index.name_for(table);
            let columns: Vec<String> = index.fields.iter().map(|f| format!("\"{}\"", f)).collect();
            let sql = match index.kind {
                IndexKind::Ordinary => format!(
                    "CREATE INDEX IF NOT EXISTS \"{}\" ON \"{}\" ({})",
                    name,
                    table,
                    columns.join(", ")
                ),
                IndexKind::Unique => format!(
                    "CREATE UNIQUE INDEX IF NOT EXISTS \"{}\" ON \"{}\" ({})",
                    name,
                    table,
                    columns.join(", ")
                ),
                IndexKind::Text => format!(
                    "CREATE INDEX IF NOT EXISTS \"{}\" ON \"{}\" USING GIN (to_tsvector('simple', {}))",
                    name,
                    table,
                    columns.join(" || ' ' || ")
                ),
                IndexKind::Geospatial => format!(
                    "CREATE INDEX IF NOT EXISTS \"{}\" ON \"{}\" USING GIST ({})",
                    name,
                    table,
                    columns.join(", ")
                ),
            };
            sqlx::query(&sql)
                .execute(&self.pool)
                .await
                .map_err(|e| OrmError::Query(format!("create index {} failed: {}", name, e)))?;
        }
        Ok(())
    }

    async fn close(&self) -> OrmResult<()> {
        self.pool.close().await;
        Ok(())
    }
}

struct PostgresTransaction {
    tx: Option<sqlx::Transaction<'static, Postgres>>,
    acquire_timeout: u64,
}

impl PostgresTransaction {
    fn inner(&mut self) -> OrmResult<&mut sqlx::Transaction<'static, Postgres>> {
        self.tx
            .as_mut()
            .ok_or_else(|| OrmError::Query("transaction already completed".to_string()))
    }
}

#[async_trait]
impl AdapterTransaction for PostgresTransaction {
    async fn query(&mut self, stmt: &Statement) -> OrmResult<Vec<Row>> {
        let (sql, params) = match stmt {
            Statement::Sql { sql, params } => (sql.as_str(), params.as_slice()),
            Statement::Document(_) => {
                return Err(OrmError::Query(
                    "document command sent to the postgres adapter".to_string(),
                ))
            }
        };
        let acquire_timeout = self.acquire_timeout;
        let tx = self.inner()?;
        let mut query = sqlx::query(sql);
        for param in params {
            query = bind_value(query, param);
        }
        let rows = query
            .fetch_all(&mut **tx)
            .await
            .map_err(|e| OrmError::from_sqlx(e, acquire_timeout))?;
        rows.iter().map(pg_row_to_row).collect()
    }

    async fn execute(&mut self, stmt: &Statement) -> OrmResult<ExecuteOutcome> {
        let (sql, params) = match stmt {
            Statement::Sql { sql, params } => (sql.as_str(), params.as_slice()),
            Statement::Document(_) => {
                return Err(OrmError::Query(
                    "document command sent to the postgres adapter".to_string(),
                ))
            }
        };
        let acquire_timeout = self.acquire_timeout;
        let tx = self.inner()?;
        let mut query = sqlx::query(sql);
        for param in params {
            query = bind_value(query, param);
        }
        let result = query
            .execute(&mut **tx)
            .await
            .map_err(|e| OrmError::from_sqlx(e, acquire_timeout))?;
        Ok(ExecuteOutcome {
            rows_affected: result.rows_affected(),
            last_insert_id: None,
            inserted_id: None,
        })
    }

    async fn commit(mut self: Box<Self>) -> OrmResult<()> {
        let tx = self
            .tx
            .take()
            .ok_or_else(|| OrmError::Query("transaction already completed".to_string()))?;
        tx.commit()
            .await
            .map_err(|e| OrmError::Query(format!("commit failed: {}", e)))
    }

    async fn rollback(mut self: Box<Self>) -> OrmResult<()> {
        let tx = self
            .tx
            .take()
            .ok_or_else(|| OrmError::Query("transaction already completed".to_string()))?;
        tx.rollback()
            .await
            .map_err(|e| OrmError::Query(format!("rollback failed: {}", e)))
    }
}

/// Bind a typed value to a sqlx query.
fn bind_value<'a>(
    query: sqlx::query::Query<'a, Postgres, sqlx::postgres::PgArguments>,
    value: &DatabaseValue,
) -> sqlx::query::Query<'a, Postgres, sqlx::postgres::PgArguments> {
    match value {
        DatabaseValue::Null => query.bind(Option::<String>::None),
        DatabaseValue::Bool(b) => query.bind(*b),
        DatabaseValue::Int32(i) => query.bind(*i),
        DatabaseValue::Int64(i) => query.bind(*i),
        DatabaseValue::Float64(f) => query.bind(*f),
        DatabaseValue::String(s) => query.bind(s.clone()),
        DatabaseValue::Bytes(b) => query.bind(b.clone()),
        DatabaseValue::Uuid(u) => query.bind(*u),
        DatabaseValue::DateTime(dt) => query.bind(*dt),
        DatabaseValue::Json(j) => query.bind(j.clone()),
    }
}

/// Decode a Postgres row into the uniform JSON row shape.
fn pg_row_to_row(row: &PgRow) -> OrmResult<Row> {
    let mut map = serde_json::Map::new();
    for (index, column) in row.columns().iter().enumerate() {
        let value = decode_column(row, index, column.type_info().name())?;
        map.insert(column.name().to_string(), value);
    }
    Ok(Row::new(map))
}

fn decode_column(row: &PgRow, index: usize, type_name: &str) -> OrmResult<JsonValue> {
    let decode_err =
        |e: sqlx::Error| OrmError::Serialization(format!("column {} decode failed: {}", index, e));
    let value = match type_name {
        "BOOL" => row
            .try_get::<Option<bool>, _>(index)
            .map_err(decode_err)?
            .map(JsonValue::Bool),
        "INT2" => row
            .try_get::<Option<i16>, _>(index)
            .map_err(decode_err)?
            .map(|v| JsonValue::Number((v as i64).into())),
        "INT4" => row
            .try_get::<Option<i32>, _>(index)
            .map_err(decode_err)?
            .map(|v| JsonValue::Number((v as i64).into())),
        "INT8" => row
            .try_get::<Option<i64>, _>(index)
            .map_err(decode_err)?
            .map(|v| JsonValue::Number(v.into())),
        "FLOAT4" => row
            .try_get::<Option<f32>, _>(index)
            .map_err(decode_err)?
            .and_then(|v| serde_json::Number::from_f64(v as f64))
            .map(JsonValue::Number),
        "FLOAT8" => row
            .try_get::<Option<f64>, _>(index)
            .map_err(decode_err)?
            .and_then(serde_json::Number::from_f64)
            .map(JsonValue::Number),
        "UUID" => row
            .try_get::<Option<uuid::Uuid>, _>(index)
            .map_err(decode_err)?
            .map(|v| JsonValue::String(v.to_string())),
        "TIMESTAMPTZ" | "TIMESTAMP" => row
            .try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(index)
            .map_err(decode_err)?
            .map(|v| JsonValue::String(v.to_rfc3339())),
        "JSON" | "JSONB" => row
            .try_get::<Option<JsonValue>, _>(index)
            .map_err(decode_err)?,
        _ => row
            .try_get::<Option<String>, _>(index)
            .map_err(decode_err)?
            .map(JsonValue::String),
    };
    Ok(value.unwrap_or(JsonValue::Null))
}
