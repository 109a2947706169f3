//! MySQL adapter ("relational-B")
//!
//! Same shape as the Postgres adapter, but MySQL has no RETURNING:
//! inserts execute and then refetch by the client-supplied key or the
//! reported last-insert id.

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use sqlx::mysql::{MySqlPoolOptions, MySqlRow};
use sqlx::{Column, MySql, Pool, Row as SqlxRow, TypeInfo};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crate::config::{DatabaseConfig, PoolSettings};
use crate::error::{OrmError, OrmResult};
use crate::model::schema::{IndexDefinition, IndexKind};
use crate::value::{DatabaseValue, Row};

use super::transaction::AdapterTransaction;
use super::{DatabaseAdapter, ExecuteOutcome, HealthStatus, PoolStatus, Statement};

pub struct MySqlAdapter {
    pool: Pool<MySql>,
    settings: PoolSettings,
    waiting: AtomicU32,
    acquire_errors: AtomicU64,
}

impl MySqlAdapter {
    pub async fn connect(config: &DatabaseConfig) -> OrmResult<Self> {
        let settings = config.pool.clone();
        let mut options = MySqlPoolOptions::new()
            .max_connections(settings.max)
            .min_connections(settings.min)
            .acquire_timeout(Duration::from_secs(settings.acquire_timeout_seconds));
        if let Some(idle) = settings.idle_timeout_seconds {
            options = options.idle_timeout(Duration::from_secs(idle));
        }

        let pool = options
            .connect(&config.connection_url())
            .await
            .map_err(|e| OrmError::Connection(format!("mysql connect failed: {}", e)))?;

        tracing::debug!(max = settings.max, min = settings.min, "mysql pool created");
        Ok(Self {
            pool,
            settings,
            waiting: AtomicU32::new(0),
            acquire_errors: AtomicU64::new(0),
        })
    }

    async fn acquire(&self) -> OrmResult<sqlx::pool::PoolConnection<MySql>> {
        self.waiting.fetch_add(1, Ordering::Relaxed);
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
                "document command sent to the mysql adapter".to_string(),
            )),
        }
    }

    async fn index_exists(&self, table: &str, name: &str) -> OrmResult<bool> {
        let row = sqlx::query(
            "SELECT 1 FROM information_schema.statistics \
             WHERE table_schema = DATABASE() AND table_name = ? AND index_name = ? LIMIT 1",
        )
        .bind(table)
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| OrmError::Query(format!("index lookup failed: {}", e)))?;
        Ok(row.is_some())
    }
}

#[async_trait]
impl DatabaseAdapter for MySqlAdapter {
    fn kind(&self) -> crate::config::BackendKind {
        crate::config::BackendKind::MySql
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
        rows.iter().map(mysql_row_to_row).collect()
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
        let last_insert_id = match result.last_insert_id() {
            0 => None,
            id => Some(id as i64),
        };
        Ok(ExecuteOutcome {
            rows_affected: result.rows_affected(),
            last_insert_id,
            inserted_id: None,
        })
    }

    async fn insert_returning(
        &self,
        stmt: &Statement,
        table: &str,
        pk_column: &str,
        pk_value: Option<&JsonValue>,
    ) -> OrmResult<Row> {
        let outcome = self.execute(stmt).await?;
        let key = match pk_value {
            Some(value) => value.clone(),
            None => match outcome.last_insert_id {
                Some(id) => JsonValue::Number(id.into()),
                None => {
                    return Err(OrmError::Query(
                        "insert produced no key to refetch the row by".to_string(),
                    ))
                }
            },
        };
        let refetch = Statement::Sql {
            sql: format!("SELECT * FROM `{}` WHERE `{}` = ?", table, pk_column),
            params: vec![DatabaseValue::from_json(&key)],
        };
        self.query(&refetch)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| OrmError::Query("inserted row not found on refetch".to_string()))
    }

    async fn begin(&self) -> OrmResult<Box<dyn AdapterTransaction>> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| OrmError::from_sqlx(e, self.settings.acquire_timeout_seconds))?;
        Ok(Box::new(MySqlTransaction {
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
            // CREATE INDEX has no IF NOT EXISTS on MySQL; check first.
            if self.index_exists(table, &name).await? {
                continue;
            }
            let columns: Vec<String> = index.fields.iter().map(|f| format!("`{}`", f)).collect();
            let sql = match index.kind {
                IndexKind::Ordinary => format!(
                    "CREATE INDEX `{}` ON `{}` ({})",
                    name,
                    table,
                    columns.join(", ")
                ),
                IndexKind::Unique => format!(
                    "CREATE UNIQUE INDEX `{}` ON `{}` ({})",
                    name,
                    table,
                    columns.join(", ")
                ),
                IndexKind::Text => format!(
                    "CREATE FULLTEXT INDEX `{}` ON `{}` ({})",
                    name,
                    table,
                    columns.join(", ")
                ),
                IndexKind::Geospatial => format!(
                    "CREATE SPATIAL INDEX `{}` ON `{}` ({})",
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

struct MySqlTransaction {
    tx: Option<sqlx::Transaction<'static, MySql>>,
    acquire_timeout: u64,
}

#[async_trait]
impl AdapterTransaction for MySqlTransaction {
    async fn query(&mut self, stmt: &Statement) -> OrmResult<Vec<Row>> {
        let (sql, params) = match stmt {
            Statement::Sql { sql, params } => (sql.as_str(), params.as_slice()),
            Statement::Document(_) => {
                return Err(OrmError::Query(
                    "document command sent to the mysql adapter".to_string(),
                ))
            }
        };
        let acquire_timeout = self.acquire_timeout;
        let tx = self
            .tx
            .as_mut()
            .ok_or_else(|| OrmError::Query("transaction already completed".to_string()))?;
        let mut query = sqlx::query(sql);
        for param in params {
            query = bind_value(query, param);
        }
        let rows = query
            .fetch_all(&mut **tx)
            .await
            .map_err(|e| OrmError::from_sqlx(e, acquire_timeout))?;
        rows.iter().map(mysql_row_to_row).collect()
    }

    async fn execute(&mut self, stmt: &Statement) -> OrmResult<ExecuteOutcome> {
        let (sql, params) = match stmt {
            Statement::Sql { sql, params } => (sql.as_str(), params.as_slice()),
            Statement::Document(_) => {
                return Err(OrmError::Query(
                    "document command sent to the mysql adapter".to_string(),
                ))
            }
        };
        let acquire_timeout = self.acquire_timeout;
        let tx = self
            .tx
            .as_mut()
            .ok_or_else(|| OrmError::Query("transaction already completed".to_string()))?;
        let mut query = sqlx::query(sql);
        for param in params {
            query = bind_value(query, param);
        }
        let result = query
            .execute(&mut **tx)
            .await
            .map_err(|e| OrmError::from_sqlx(e, acquire_timeout))?;
        let last_insert_id = match result.last_insert_id() {
            0 => None,
            id => Some(id as i64),
        };
        Ok(ExecuteOutcome {
            rows_affected: result.rows_affected(),
            last_insert_id,
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

fn bind_value<'a>(
    query: sqlx::query::Query<'a, MySql, sqlx::mysql::MySqlArguments>,
    value: &DatabaseValue,
) -> sqlx::query::Query<'a, MySql, sqlx::mysql::MySqlArguments> {
    match value {
        DatabaseValue::Null => query.bind(Option::<String>::None),
        DatabaseValue::Bool(b) => query.bind(*b),
        DatabaseValue::Int32(i) => query.bind(*i),
        DatabaseValue::Int64(i) => query.bind(*i),
        DatabaseValue::Float64(f) => query.bind(*f),
        DatabaseValue::String(s) => query.bind(s.clone()),
        DatabaseValue::Bytes(b) => query.bind(b.clone()),
        DatabaseValue::Uuid(u) => query.bind(u.to_string()),
        DatabaseValue::DateTime(dt) => query.bind(*dt),
        DatabaseValue::Json(j) => query.bind(j.clone()),
    }
}

fn mysql_row_to_row(row: &MySqlRow) -> OrmResult<Row> {
    let mut map = serde_json::Map::new();
    for (index, column) in row.columns().iter().enumerate() {
        let value = decode_column(row, index, column.type_info().name())?;
        map.insert(column.name().to_string(), value);
    }
    Ok(Row::new(map))
}

fn decode_column(row: &MySqlRow, index: usize, type_name: &str) -> OrmResult<JsonValue> {
    let decode_err =
        |e: sqlx::Error| OrmError::Serialization(format!("column {} decode failed: {}", index, e));
    let value = match type_name {
        "BOOLEAN" | "TINYINT(1)" => row
            .try_get::<Option<bool>, _>(index)
            .map_err(decode_err)?
            .map(JsonValue::Bool),
        "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" => row
            .try_get::<Option<i32>, _>(index)
            .map_err(decode_err)?
            .map(|v| JsonValue::Number((v as i64).into())),
        "BIGINT" => row
            .try_get::<Option<i64>, _>(index)
            .map_err(decode_err)?
            .map(|v| JsonValue::Number(v.into())),
        "FLOAT" | "DOUBLE" => row
            .try_get::<Option<f64>, _>(index)
            .map_err(decode_err)?
            .and_then(serde_json::Number::from_f64)
            .map(JsonValue::Number),
        "TIMESTAMP" => row
            .try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(index)
            .map_err(decode_err)?
            .map(|v| JsonValue::String(v.to_rfc3339())),
        "DATETIME" => row
            .try_get::<Option<chrono::NaiveDateTime>, _>(index)
            .map_err(decode_err)?
            .map(|v| JsonValue::String(v.and_utc().to_rfc3339())),
        "JSON" => row
            .try_get::<Option<JsonValue>, _>(index)
            .map_err(decode_err)?,
        _ => row
            .try_get::<Option<String>, _>(index)
            .map_err(decode_err)?
            .map(JsonValue::String),
    };
    Ok(value.unwrap_or(JsonValue::Null))
}
