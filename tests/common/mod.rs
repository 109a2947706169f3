//! In-memory adapter and fixture models shared by the integration tests
//!
//! The mock speaks the document-command side of the adapter contract and
//! evaluates filters against plain JSON maps, so the whole stack above it
//! (builder, cache, model layer) runs for real.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use polyorm::adapter::transaction::AdapterTransaction;
use polyorm::model::Scope;
use polyorm::{
    BackendKind, Database, DatabaseAdapter, DatabaseOptions, DocumentCommand, ExecuteOutcome,
    FieldRule, HealthStatus, IndexDefinition, Model, OrmError, OrmResult, PoolStatus,
    SchemaDefinition, Statement,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

type Collections = HashMap<String, Vec<Map<String, Value>>>;

#[derive(Default)]
pub struct MockStore {
    collections: Mutex<Collections>,
    unique: Mutex<HashMap<String, Vec<Vec<String>>>>,
}

impl MockStore {
    fn run_query(&self, command: &DocumentCommand) -> OrmResult<Vec<polyorm::value::Row>> {
        match command {
            DocumentCommand::Find {
                collection,
                filter,
                sort,
                skip,
                limit,
                projection,
            } => {
                let collections = self.collections.lock();
                let mut docs: Vec<Map<String, Value>> = collections
                    .get(collection)
                    .map(|docs| {
                        docs.iter()
                            .filter(|doc| matches(doc, filter))
                            .cloned()
                            .collect()
                    })
                    .unwrap_or_default();

                if let Some(Value::Object(sort)) = sort {
                    for (column, direction) in sort.iter().rev() {
                        let descending = direction.as_i64() == Some(-1);
                        docs.sort_by(|a, b| {
                            let ordering = compare(
                                a.get(column).unwrap_or(&Value::Null),
                                b.get(column).unwrap_or(&Value::Null),
                            )
                            .unwrap_or(Ordering::Equal);
                            if descending {
                                ordering.reverse()
                            } else {
                                ordering
                            }
                        });
                    }
                }
                if let Some(skip) = skip {
                    docs.drain(..(*skip as usize).min(docs.len()));
                }
                if let Some(limit) = limit {
                    docs.truncate(*limit as usize);
                }
                if let Some(Value::Object(projection)) = projection {
                    for doc in &mut docs {
                        doc.retain(|key, _| projection.contains_key(key));
                    }
                }
                Ok(docs.into_iter().map(polyorm::value::Row::new).collect())
            }
            DocumentCommand::Count { collection, filter } => {
                let collections = self.collections.lock();
                let count = collections
                    .get(collection)
                    .map(|docs| docs.iter().filter(|doc| matches(doc, filter)).count())
                    .unwrap_or(0);
                let mut row = Map::new();
                row.insert("count".to_string(), Value::Number((count as u64).into()));
                Ok(vec![polyorm::value::Row::new(row)])
            }
            _ => Err(OrmError::Query("write command on the query path".to_string())),
        }
    }

    fn run_execute(&self, command: &DocumentCommand) -> OrmResult<ExecuteOutcome> {
        match command {
            DocumentCommand::InsertOne {
                collection,
                document,
            } => {
                let document = match document {
                    Value::Object(map) => map.clone(),
                    _ => return Err(OrmError::Query("insert of a non-object".to_string())),
                };
                self.check_unique(collection, &document)?;
                self.collections
                    .lock()
                    .entry(collection.clone())
                    .or_default()
                    .push(document);
                Ok(ExecuteOutcome {
                    rows_affected: 1,
                    last_insert_id: None,
                    inserted_id: None,
                })
            }
            DocumentCommand::UpdateMany {
                collection,
                filter,
                update,
            } => {
                let mut collections = self.collections.lock();
                let docs = collections.entry(collection.clone()).or_default();
                let mut affected = 0;
                for doc in docs.iter_mut().filter(|doc| matches(doc, filter)) {
                    apply_update(doc, update);
                    affected += 1;
                }
                Ok(ExecuteOutcome {
                    rows_affected: affected,
                    last_insert_id: None,
                    inserted_id: None,
                })
            }
            DocumentCommand::DeleteMany { collection, filter } => {
                let mut collections = self.collections.lock();
                let docs = collections.entry(collection.clone()).or_default();
                let before = docs.len();
                docs.retain(|doc| !matches(doc, filter));
                Ok(ExecuteOutcome {
                    rows_affected: (before - docs.len()) as u64,
                    last_insert_id: None,
                    inserted_id: None,
                })
            }
            _ => Err(OrmError::Query("read command on the execute path".to_string())),
        }
    }

    fn check_unique(&self, collection: &str, candidate: &Map<String, Value>) -> OrmResult<()> {
        let unique = self.unique.lock();
        let Some(field_sets) = unique.get(collection) else {
            return Ok(());
        };
        let collections = self.collections.lock();
        let Some(docs) = collections.get(collection) else {
            return Ok(());
        };
        for fields in field_sets {
            let clash = docs.iter().any(|doc| {
                fields.iter().all(|field| {
                    let existing = doc.get(field).unwrap_or(&Value::Null);
                    let incoming = candidate.get(field).unwrap_or(&Value::Null);
                    !existing.is_null() && existing == incoming
                })
            });
            if clash {
                return Err(OrmError::Query(format!(
                    "duplicate value for unique index on {}({})",
                    collection,
                    fields.join(", ")
                )));
            }
        }
        Ok(())
    }

    fn snapshot(&self) -> Collections {
        self.collections.lock().clone()
    }

    fn restore(&self, snapshot: Collections) {
        *self.collections.lock() = snapshot;
    }
}

fn matches(doc: &Map<String, Value>, filter: &Value) -> bool {
    let Some(object) = filter.as_object() else {
        return false;
    };
    object.iter().all(|(key, spec)| match key.as_str() {
        "$and" => spec
            .as_array()
            .map(|parts| parts.iter().all(|part| matches(doc, part)))
            .unwrap_or(false),
        "$or" => spec
            .as_array()
            .map(|parts| parts.iter().any(|part| matches(doc, part)))
            .unwrap_or(false),
        field => field_matches(doc.get(field), spec),
    })
}

fn field_matches(value: Option<&Value>, spec: &Value) -> bool {
    match spec {
        Value::Null => matches!(value, None | Some(Value::Null)),
        Value::Object(ops) if ops.keys().any(|k| k.starts_with('$')) => ops
            .iter()
            .all(|(op, operand)| operator_matches(value, op, operand)),
        literal => value == Some(literal),
    }
}

fn operator_matches(value: Option<&Value>, op: &str, operand: &Value) -> bool {
    match op {
        "$eq" => {
            if operand.is_null() {
                matches!(value, None | Some(Value::Null))
            } else {
                value == Some(operand)
            }
        }
        "$ne" => {
            if operand.is_null() {
                matches!(value, Some(v) if !v.is_null())
            } else {
                value != Some(operand)
            }
        }
        "$gt" => cmp_value(value, operand) == Some(Ordering::Greater),
        "$gte" => matches!(
            cmp_value(value, operand),
            Some(Ordering::Greater) | Some(Ordering::Equal)
        ),
        "$lt" => cmp_value(value, operand) == Some(Ordering::Less),
        "$lte" => matches!(
            cmp_value(value, operand),
            Some(Ordering::Less) | Some(Ordering::Equal)
        ),
        "$in" => operand
            .as_array()
            .map(|set| value.map(|v| set.contains(v)).unwrap_or(false))
            .unwrap_or(false),
        "$nin" => operand
            .as_array()
            .map(|set| value.map(|v| !set.contains(v)).unwrap_or(true))
            .unwrap_or(false),
        "$regex" => match (value.and_then(Value::as_str), operand.as_str()) {
            (Some(text), Some(pattern)) => regex::Regex::new(pattern)
                .map(|re| re.is_match(text))
                .unwrap_or(false),
            _ => false,
        },
        _ => false,
    }
}

fn cmp_value(value: Option<&Value>, operand: &Value) -> Option<Ordering> {
    compare(value?, operand)
}

fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        (Value::Null, _) => Some(Ordering::Less),
        (_, Value::Null) => Some(Ordering::Greater),
        _ => None,
    }
}

fn apply_update(doc: &mut Map<String, Value>, update: &Value) {
    let Some(object) = update.as_object() else {
        return;
    };
    if let Some(Value::Object(set)) = object.get("$set") {
        for (key, value) in set {
            doc.insert(key.clone(), value.clone());
        }
    }
    if let Some(Value::Object(inc)) = object.get("$inc") {
        for (key, amount) in inc {
            let current = doc.get(key).and_then(Value::as_i64).unwrap_or(0);
            let amount = amount.as_i64().unwrap_or(0);
            doc.insert(key.clone(), Value::Number((current + amount).into()));
        }
    }
}

pub struct MockAdapter {
    store: Arc<MockStore>,
    permits: Arc<Semaphore>,
    waiting: AtomicU32,
    in_flight: Arc<AtomicU32>,
    high_water: AtomicU32,
    query_calls: AtomicU64,
    latency: Option<Duration>,
    max: u32,
}

/// Holds a pool permit and keeps the in-flight counter honest.
struct WorkPermit {
    _permit: tokio::sync::OwnedSemaphorePermit,
    in_flight: Arc<AtomicU32>,
}

impl Drop for WorkPermit {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, AtomicOrdering::SeqCst);
    }
}

impl MockAdapter {
    pub fn new() -> Arc<Self> {
        Self::with_pool(8, None)
    }

    pub fn with_pool(max: u32, latency: Option<Duration>) -> Arc<Self> {
        Arc::new(Self {
            store: Arc::new(MockStore::default()),
            permits: Arc::new(Semaphore::new(max as usize)),
            waiting: AtomicU32::new(0),
            in_flight: Arc::new(AtomicU32::new(0)),
            high_water: AtomicU32::new(0),
            query_calls: AtomicU64::new(0),
            latency,
            max,
        })
    }

    /// The most statements ever running at once.
    pub fn high_water(&self) -> u32 {
        self.high_water.load(AtomicOrdering::SeqCst)
    }

    /// Adapter-level reads that actually happened (cache hits never show up).
    pub fn query_calls(&self) -> u64 {
        self.query_calls.load(AtomicOrdering::Relaxed)
    }

    pub fn rows_in(&self, collection: &str) -> usize {
        self.store
            .collections
            .lock()
            .get(collection)
            .map(Vec::len)
            .unwrap_or(0)
    }

    async fn simulate_work(&self) -> WorkPermit {
        self.waiting.fetch_add(1, AtomicOrdering::Relaxed);
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .expect("semaphore never closes");
        self.waiting.fetch_sub(1, AtomicOrdering::Relaxed);
        let now = self.in_flight.fetch_add(1, AtomicOrdering::SeqCst) + 1;
        self.high_water.fetch_max(now, AtomicOrdering::SeqCst);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        WorkPermit {
            _permit: permit,
            in_flight: self.in_flight.clone(),
        }
    }

    fn command_of<'a>(stmt: &'a Statement) -> OrmResult<&'a DocumentCommand> {
        match stmt {
            Statement::Document(command) => Ok(command),
            Statement::Sql { .. } => {
                Err(OrmError::Query("mock adapter only speaks documents".to_string()))
            }
        }
    }
}

#[async_trait]
impl DatabaseAdapter for MockAdapter {
    fn kind(&self) -> BackendKind {
        BackendKind::MongoDb
    }

    async fn query(&self, stmt: &Statement) -> OrmResult<Vec<polyorm::value::Row>> {
        let command = Self::command_of(stmt)?;
        let _permit = self.simulate_work().await;
        self.query_calls.fetch_add(1, AtomicOrdering::Relaxed);
        self.store.run_query(command)
    }

    async fn execute(&self, stmt: &Statement) -> OrmResult<ExecuteOutcome> {
        let command = Self::command_of(stmt)?;
        let _permit = self.simulate_work().await;
        self.store.run_execute(command)
    }

    async fn insert_returning(
        &self,
        stmt: &Statement,
        table: &str,
        pk_column: &str,
        pk_value: Option<&Value>,
    ) -> OrmResult<polyorm::value::Row> {
        self.execute(stmt).await?;
        let key = pk_value
            .cloned()
            .ok_or_else(|| OrmError::Query("mock insert needs a client key".to_string()))?;
        let collections = self.store.collections.lock();
        collections
            .get(table)
            .and_then(|docs| {
                docs.iter()
                    .find(|doc| doc.get(pk_column) == Some(&key))
                    .cloned()
            })
            .map(polyorm::value::Row::new)
            .ok_or_else(|| OrmError::Query("inserted document not found".to_string()))
    }

    async fn begin(&self) -> OrmResult<Box<dyn AdapterTransaction>> {
        Ok(Box::new(MockTransaction {
            store: self.store.clone(),
            snapshot: Some(self.store.snapshot()),
        }))
    }

    async fn health_check(&self) -> HealthStatus {
        HealthStatus {
            healthy: true,
            latency_ms: 0,
            error: None,
        }
    }

    fn pool_status(&self) -> PoolStatus {
        let idle = self.permits.available_permits() as u32;
        PoolStatus {
            total: self.max,
            active: self.max.saturating_sub(idle),
            idle,
            waiting: self.waiting.load(AtomicOrdering::Relaxed),
        }
    }

    async fn create_indexes(&self, table: &str, indexes: &[IndexDefinition]) -> OrmResult<()> {
        let mut unique = self.store.unique.lock();
        let entry = unique.entry(table.to_string()).or_default();
        for index in indexes {
            if matches!(index.kind, polyorm::IndexKind::Unique) {
                entry.push(index.fields.clone());
            }
        }
        Ok(())
    }

    async fn close(&self) -> OrmResult<()> {
        Ok(())
    }
}

struct MockTransaction {
    store: Arc<MockStore>,
    snapshot: Option<Collections>,
}

#[async_trait]
impl AdapterTransaction for MockTransaction {
    async fn query(&mut self, stmt: &Statement) -> OrmResult<Vec<polyorm::value::Row>> {
        self.store.run_query(MockAdapter::command_of(stmt)?)
    }

    async fn execute(&mut self, stmt: &Statement) -> OrmResult<ExecuteOutcome> {
        self.store.run_execute(MockAdapter::command_of(stmt)?)
    }

    async fn commit(mut self: Box<Self>) -> OrmResult<()> {
        self.snapshot = None;
        Ok(())
    }

    async fn rollback(mut self: Box<Self>) -> OrmResult<()> {
        if let Some(snapshot) = self.snapshot.take() {
            self.store.restore(snapshot);
        }
        Ok(())
    }
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn test_db(adapter: Arc<MockAdapter>) -> Database {
    init_tracing();
    Database::from_adapter(
        adapter,
        DatabaseOptions {
            cache_ttl: Some(Duration::from_secs(60)),
            slow_query_threshold: Duration::from_millis(200),
        },
    )
}

pub fn test_db_uncached(adapter: Arc<MockAdapter>) -> Database {
    init_tracing();
    Database::from_adapter(
        adapter,
        DatabaseOptions {
            cache_ttl: None,
            slow_query_threshold: Duration::from_millis(200),
        },
    )
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Option<String>,
    pub name: String,
    pub email: String,
    pub age: i64,
    #[serde(default = "default_status")]
    pub status: String,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
    #[serde(default)]
    pub deleted_at: Option<String>,
}

fn default_status() -> String {
    "active".to_string()
}

impl User {
    pub fn sample(name: &str, email: &str) -> Self {
        Self {
            id: None,
            name: name.to_string(),
            email: email.to_string(),
            age: 30,
            status: "active".to_string(),
            created_at: None,
            updated_at: None,
            deleted_at: None,
        }
    }
}

impl Model for User {
    fn table_name() -> &'static str {
        "users"
    }

    fn primary_key(&self) -> Option<Value> {
        self.id.clone().map(Value::String)
    }

    fn set_primary_key(&mut self, value: Value) {
        self.id = value.as_str().map(str::to_string);
    }

    fn uses_soft_deletes() -> bool {
        true
    }

    fn schema() -> SchemaDefinition {
        SchemaDefinition::new()
            .field("name", FieldRule::string().required().max_length(50))
            .field(
                "email",
                FieldRule::string()
                    .required()
                    .pattern(regex::Regex::new(r"^[^@\s]+@[^@\s]+$").unwrap()),
            )
            .field("age", FieldRule::integer().min(0.0).max(150.0))
    }

    fn indexes() -> Vec<IndexDefinition> {
        vec![IndexDefinition::unique("email")]
    }

    fn scopes() -> HashMap<&'static str, Scope<Self>> {
        let mut scopes: HashMap<&'static str, Scope<Self>> = HashMap::new();
        scopes.insert("active", |q| q.where_eq("status", "active"));
        scopes.insert("adults", |q| q.where_gte("age", 18));
        scopes
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Post {
    pub id: Option<String>,
    pub user_id: Option<String>,
    pub title: String,
    #[serde(default)]
    pub views: i64,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
}

impl Post {
    pub fn sample(user_id: &str, title: &str) -> Self {
        Self {
            id: None,
            user_id: Some(user_id.to_string()),
            title: title.to_string(),
            views: 0,
            created_at: None,
            updated_at: None,
        }
    }
}

impl Model for Post {
    fn table_name() -> &'static str {
        "posts"
    }

    fn primary_key(&self) -> Option<Value> {
        self.id.clone().map(Value::String)
    }

    fn set_primary_key(&mut self, value: Value) {
        self.id = value.as_str().map(str::to_string);
    }

    fn schema() -> SchemaDefinition {
        SchemaDefinition::new().field("title", FieldRule::string().required())
    }
}
