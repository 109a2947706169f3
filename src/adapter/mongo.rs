//! MongoDB adapter (the document-store backend)
//!
//! Statements arrive as [`DocumentCommand`]s with serde_json filters;
//! the BSON boundary lives entirely inside this module. The driver
//! manages its own pool and exposes no counters, so pool status is
//! derived from an in-flight operation count.

use async_trait::async_trait;
use bson::{doc, Bson, Document};
use futures::stream::TryStreamExt;
use mongodb::options::{ClientOptions, FindOptions, IndexOptions};
use mongodb::{Client, ClientSession, IndexModel};
use serde_json::Value as JsonValue;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use crate::config::{DatabaseConfig, PoolSettings};
use crate::error::{OrmError, OrmResult};
use crate::model::schema::{IndexDefinition, IndexKind};
use crate::value::Row;

use super::transaction::AdapterTransaction;
use super::{DatabaseAdapter, DocumentCommand, ExecuteOutcome, HealthStatus, PoolStatus, Statement};

pub struct MongoAdapter {
    client: Client,
    db: mongodb::Database,
    settings: PoolSettings,
    in_flight: AtomicU32,
}

impl MongoAdapter {
    pub async fn connect(config: &DatabaseConfig) -> OrmResult<Self> {
        let settings = config.pool.clone();
        let mut options = ClientOptions::parse(&config.connection_url()).await?;
        options.max_pool_size = Some(settings.max);
        options.min_pool_size = Some(settings.min);
        options.connect_timeout = Some(Duration::from_secs(settings.acquire_timeout_seconds));

        let client = Client::with_options(options)
            .map_err(|e| OrmError::Connection(format!("mongodb client setup failed: {}", e)))?;
        let db = client.database(&config.connection.database);

        // The driver connects lazily; ping so failures surface here.
        db.run_command(doc! { "ping": 1 }, None).await?;

        tracing::debug!(database = %config.connection.database, "mongodb client created");
        Ok(Self {
            client,
            db,
            settings,
            in_flight: AtomicU32::new(0),
        })
    }

    fn document_of<'a>(&self, stmt: &'a Statement) -> OrmResult<&'a DocumentCommand> {
        match stmt {
            Statement::Document(command) => Ok(command),
            Statement::Sql { .. } => Err(OrmError::Query(
                "sql statement sent to the mongodb adapter".to_string(),
            )),
        }
    }
}

#[async_trait]
impl DatabaseAdapter for MongoAdapter {
    fn kind(&self) -> crate::config::BackendKind {
        crate::config::BackendKind::MongoDb
    }

    async fn query(&self, stmt: &Statement) -> OrmResult<Vec<Row>> {
        let command = self.document_of(stmt)?;
        self.in_flight.fetch_add(1, Ordering::Relaxed);
        let result = self.run_query(command).await;
        self.in_flight.fetch_sub(1, Ordering::Relaxed);
        result
    }

    async fn execute(&self, stmt: &Statement) -> OrmResult<ExecuteOutcome> {
        let command = self.document_of(stmt)?;
        self.in_flight.fetch_add(1, Ordering::Relaxed);
        let result = self.run_execute(command).await;
        self.in_flight.fetch_sub(1, Ordering::Relaxed);
        result
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
            None => outcome.inserted_id.ok_or_else(|| {
                OrmError::Query("insert produced no id to refetch the document by".to_string())
            })?,
        };
        let filter = json_to_document(&JsonValue::Object(
            std::iter::once((pk_column.to_string(), key)).collect(),
        ))?;
        let found = self
            .db
            .collection::<Document>(table)
            .find_one(filter, None)
            .await?
            .ok_or_else(|| OrmError::Query("inserted document not found on refetch".to_string()))?;
        document_to_row(found)
    }

    async fn begin(&self) -> OrmResult<Box<dyn AdapterTransaction>> {
        let mut session = self.client.start_session(None).await?;
        session.start_transaction(None).await?;
        Ok(Box::new(MongoTransaction {
            db: self.db.clone(),
            session,
        }))
    }

    async fn health_check(&self) -> HealthStatus {
        let start = Instant::now();
        match self.db.run_command(doc! { "ping": 1 }, None).await {
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
        let active = self.in_flight.load(Ordering::Relaxed).min(self.settings.max);
        PoolStatus {
            total: self.settings.max,
            active,
            idle: self.settings.max.saturating_sub(active),
            waiting: self.in_flight.load(Ordering::Relaxed).saturating_sub(self.settings.max),
        }
    }

    async fn create_indexes(&self, table: &str, indexes: &[IndexDefinition]) -> OrmResult<()> {
        let collection = self.db.collection::<Document>(table);
        for index in indexes {
            let mut keys = Document::new();
            for field in &index.fields {
                let key = match index.kind {
                    IndexKind::Ordinary | IndexKind::Unique => Bson::Int32(1),
                    IndexKind::Text => Bson::String("text".to_string()),
                    IndexKind::Geospatial => Bson::String("2dsphere".to_string()),
                };
                keys.insert(field.clone(), key);
            }
            let options = IndexOptions::builder()
                .name(index.name_for(table))
                .unique(matches!(index.kind, IndexKind::Unique))
                .build();
            let model = IndexModel::builder().keys(keys).options(options).build();
            collection.create_index(model, None).await?;
        }
        Ok(())
    }

    async fn close(&self) -> OrmResult<()> {
        // The driver tears its pool down on drop; nothing to flush.
        Ok(())
    }
}

impl MongoAdapter {
    async fn run_query(&self, command: &DocumentCommand) -> OrmResult<Vec<Row>> {
        match command {
            DocumentCommand::Find {
                collection,
                filter,
                sort,
                skip,
                limit,
                projection,
            } => {
                let options = FindOptions::builder()
                    .sort(sort.as_ref().map(json_to_document).transpose()?)
                    .skip(*skip)
                    .limit(*limit)
                    .projection(projection.as_ref().map(json_to_document).transpose()?)
                    .build();
                let mut cursor = self
                    .db
                    .collection::<Document>(collection)
                    .find(json_to_document(filter)?, options)
                    .await?;
                let mut rows = Vec::new();
                while let Some(document) = cursor.try_next().await? {
                    rows.push(document_to_row(document)?);
                }
                Ok(rows)
            }
            DocumentCommand::Count { collection, filter } => {
                let count = self
                    .db
                    .collection::<Document>(collection)
                    .count_documents(json_to_document(filter)?, None)
                    .await?;
                let mut map = serde_json::Map::new();
                map.insert("count".to_string(), JsonValue::Number(count.into()));
                Ok(vec![Row::new(map)])
            }
            _ => Err(OrmError::Query(
                "write command sent through the query path".to_string(),
            )),
        }
    }

    async fn run_execute(&self, command: &DocumentCommand) -> OrmResult<ExecuteOutcome> {
        match command {
            DocumentCommand::InsertOne {
                collection,
                document,
            } => {
                let result = self
                    .db
                    .collection::<Document>(collection)
                    .insert_one(json_to_document(document)?, None)
                    .await?;
                Ok(ExecuteOutcome {
                    rows_affected: 1,
                    last_insert_id: None,
                    inserted_id: Some(result.inserted_id.into_relaxed_extjson()),
                })
            }
            DocumentCommand::UpdateMany {
                collection,
                filter,
                update,
            } => {
                let result = self
                    .db
                    .collection::<Document>(collection)
                    .update_many(json_to_document(filter)?, json_to_document(update)?, None)
                    .await?;
                Ok(ExecuteOutcome {
                    rows_affected: result.modified_count,
                    last_insert_id: None,
                    inserted_id: None,
                })
            }
            DocumentCommand::DeleteMany { collection, filter } => {
                let result = self
                    .db
                    .collection::<Document>(collection)
                    .delete_many(json_to_document(filter)?, None)
                    .await?;
                Ok(ExecuteOutcome {
                    rows_affected: result.deleted_count,
                    last_insert_id: None,
                    inserted_id: None,
                })
            }
            _ => Err(OrmError::Query(
                "read command sent through the execute path".to_string(),
            )),
        }
    }
}

struct MongoTransaction {
    db: mongodb::Database,
    session: ClientSession,
}

#[async_trait]
impl AdapterTransaction for MongoTransaction {
    async fn query(&mut self, stmt: &Statement) -> OrmResult<Vec<Row>> {
        let command = match stmt {
            Statement::Document(command) => command,
            Statement::Sql { .. } => {
                return Err(OrmError::Query(
                    "sql statement sent to the mongodb adapter".to_string(),
                ))
            }
        };
        match command {
            DocumentCommand::Find {
                collection,
                filter,
                sort,
                skip,
                limit,
                projection,
            } => {
                let options = FindOptions::builder()
                    .sort(sort.as_ref().map(json_to_document).transpose()?)
                    .skip(*skip)
                    .limit(*limit)
                    .projection(projection.as_ref().map(json_to_document).transpose()?)
                    .build();
                let mut cursor = self
                    .db
                    .collection::<Document>(collection)
                    .find_with_session(json_to_document(filter)?, options, &mut self.session)
                    .await?;
                let mut rows = Vec::new();
                while let Some(result) = cursor.next(&mut self.session).await {
                    rows.push(document_to_row(result?)?);
                }
                Ok(rows)
            }
            DocumentCommand::Count { collection, filter } => {
                let count = self
                    .db
                    .collection::<Document>(collection)
                    .count_documents_with_session(
                        json_to_document(filter)?,
                        None,
                        &mut self.session,
                    )
                    .await?;
                let mut map = serde_json::Map::new();
                map.insert("count".to_string(), JsonValue::Number(count.into()));
                Ok(vec![Row::new(map)])
            }
            _ => Err(OrmError::Query(
                "write command sent through the query path".to_string(),
            )),
        }
    }

    async fn execute(&mut self, stmt: &Statement) -> OrmResult<ExecuteOutcome> {
        let command = match stmt {
            Statement::Document(command) => command,
            Statement::Sql { .. } => {
                return Err(OrmError::Query(
                    "sql statement sent to the mongodb adapter".to_string(),
                ))
            }
        };
        match command {
            DocumentCommand::InsertOne {
                collection,
                document,
            } => {
                let result = self
                    .db
                    .collection::<Document>(collection)
                    .insert_one_with_session(json_to_document(document)?, None, &mut self.session)
                    .await?;
                Ok(ExecuteOutcome {
                    rows_affected: 1,
                    last_insert_id: None,
                    inserted_id: Some(result.inserted_id.into_relaxed_extjson()),
                })
            }
            DocumentCommand::UpdateMany {
                collection,
                filter,
                update,
            } => {
                let result = self
                    .db
                    .collection::<Document>(collection)
                    .update_many_with_session(
                        json_to_document(filter)?,
                        json_to_document(update)?,
                        None,
                        &mut self.session,
                    )
                    .await?;
                Ok(ExecuteOutcome {
                    rows_affected: result.modified_count,
                    last_insert_id: None,
                    inserted_id: None,
                })
            }
            DocumentCommand::DeleteMany { collection, filter } => {
                let result = self
                    .db
                    .collection::<Document>(collection)
                    .delete_many_with_session(
                        json_to_document(filter)?,
                        None,
                        &mut self.session,
                    )
                    .await?;
                Ok(ExecuteOutcome {
                    rows_affected: result.deleted_count,
                    last_insert_id: None,
                    inserted_id: None,
                })
            }
            _ => Err(OrmError::Query(
                "read command sent through the execute path".to_string(),
            )),
        }
    }

    async fn commit(mut self: Box<Self>) -> OrmResult<()> {
        self.session.commit_transaction().await?;
        Ok(())
    }

    async fn rollback(mut self: Box<Self>) -> OrmResult<()> {
        self.session.abort_transaction().await?;
        Ok(())
    }
}

fn json_to_document(value: &JsonValue) -> OrmResult<Document> {
    match value {
        JsonValue::Object(map) => Document::try_from(map.clone())
            .map_err(|e| OrmError::Serialization(format!("filter is not valid bson: {}", e))),
        other => Err(OrmError::Serialization(format!(
            "expected a json object, got {}",
            other
        ))),
    }
}

fn document_to_row(document: Document) -> OrmResult<Row> {
    match Bson::Document(document).into_relaxed_extjson() {
        JsonValue::Object(map) => Ok(Row::new(map)),
        other => Err(OrmError::Serialization(format!(
            "document rendered to non-object json: {}",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn json_filter_converts_to_bson() {
        let doc = json_to_document(&json!({"status": "active", "age": {"$gte": 21}})).unwrap();
        assert_eq!(doc.get_str("status").unwrap(), "active");
        // small json integers land as Int32
        assert_eq!(
            doc.get_document("age").unwrap().get_i32("$gte").unwrap(),
            21
        );
    }

    #[test]
    fn non_object_filter_is_rejected() {
        let err = json_to_document(&json!("nope")).unwrap_err();
        assert!(matches!(err, OrmError::Serialization(_)));
    }

    #[test]
    fn document_round_trips_to_row() {
        let row = document_to_row(doc! { "name": "Ada", "score": 3_i64 }).unwrap();
        assert_eq!(row.get::<String>("name").unwrap(), "Ada");
        assert_eq!(row.get::<i64>("score").unwrap(), 3);
    }
}
