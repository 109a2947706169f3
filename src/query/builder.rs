//! Fluent query builder
//!
//! A chain accumulates a backend-agnostic descriptor; terminal methods
//! (`get`, `first`, `count`, `execute`) take `self` by value, so a chain
//! is consumed by execution and cannot be reused.

use std::fmt;
use std::marker::PhantomData;

use serde_json::Value;

use crate::adapter::Statement;
use crate::config::BackendKind;
use crate::database::Database;
use crate::error::{OrmError, OrmResult};
use crate::value::Row;

use super::types::*;

/// Query builder for one table/collection
pub struct QueryBuilder<M = ()> {
    pub(crate) kind: QueryKind,
    pub(crate) table: String,
    pub(crate) select_columns: Vec<String>,
    pub(crate) conditions: Vec<ConditionNode>,
    pub(crate) set_clauses: Vec<SetClause>,
    pub(crate) increments: Vec<(String, i64)>,
    pub(crate) order_by: Vec<(String, OrderDirection)>,
    pub(crate) limit: Option<i64>,
    pub(crate) offset: Option<u64>,
    _phantom: PhantomData<M>,
}

// Manual impls keep `M` free of `Debug`/`Clone` bounds.
impl<M> fmt::Debug for QueryBuilder<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryBuilder")
            .field("kind", &self.kind)
            .field("table", &self.table)
            .field("conditions", &self.conditions)
            .field("order_by", &self.order_by)
            .field("limit", &self.limit)
            .field("offset", &self.offset)
            .finish_non_exhaustive()
    }
}

impl<M> Clone for QueryBuilder<M> {
    fn clone(&self) -> Self {
        Self {
            kind: self.kind,
            table: self.table.clone(),
            select_columns: self.select_columns.clone(),
            conditions: self.conditions.clone(),
            set_clauses: self.set_clauses.clone(),
            increments: self.increments.clone(),
            order_by: self.order_by.clone(),
            limit: self.limit,
            offset: self.offset,
            _phantom: PhantomData,
        }
    }
}

impl<M> QueryBuilder<M> {
    pub fn table(table: impl Into<String>) -> Self {
        Self {
            kind: QueryKind::Select,
            table: table.into(),
            select_columns: Vec::new(),
            conditions: Vec::new(),
            set_clauses: Vec::new(),
            increments: Vec::new(),
            order_by: Vec::new(),
            limit: None,
            offset: None,
            _phantom: PhantomData,
        }
    }

    /// Restrict the selected columns (document backends treat this as a
    /// projection). Defaults to all columns.
    pub fn select(mut self, columns: &[&str]) -> Self {
        self.select_columns = columns.iter().map(|c| c.to_string()).collect();
        self
    }

    /// Generic predicate entry point; the convenience methods below cover
    /// the common operators.
    pub fn where_op<V: Into<Value>>(mut self, column: &str, operator: Operator, value: V) -> Self {
        self.conditions.push(ConditionNode::Condition(Condition::new(
            column,
            operator,
            Some(value.into()),
        )));
        self
    }

    pub fn where_eq<V: Into<Value>>(self, column: &str, value: V) -> Self {
        self.where_op(column, Operator::Eq, value)
    }

    pub fn where_ne<V: Into<Value>>(self, column: &str, value: V) -> Self {
        self.where_op(column, Operator::Ne, value)
    }

    pub fn where_gt<V: Into<Value>>(self, column: &str, value: V) -> Self {
        self.where_op(column, Operator::Gt, value)
    }

    pub fn where_gte<V: Into<Value>>(self, column: &str, value: V) -> Self {
        self.where_op(column, Operator::Gte, value)
    }

    pub fn where_lt<V: Into<Value>>(self, column: &str, value: V) -> Self {
        self.where_op(column, Operator::Lt, value)
    }

    pub fn where_lte<V: Into<Value>>(self, column: &str, value: V) -> Self {
        self.where_op(column, Operator::Lte, value)
    }

    pub fn where_like(self, column: &str, pattern: &str) -> Self {
        self.where_op(column, Operator::Like, pattern)
    }

    pub fn where_in<V: Into<Value>>(mut self, column: &str, values: Vec<V>) -> Self {
        self.conditions.push(ConditionNode::Condition(Condition::with_values(
            column,
            Operator::In,
            values.into_iter().map(Into::into).collect(),
        )));
        self
    }

    pub fn where_not_in<V: Into<Value>>(mut self, column: &str, values: Vec<V>) -> Self {
        self.conditions.push(ConditionNode::Condition(Condition::with_values(
            column,
            Operator::NotIn,
            values.into_iter().map(Into::into).collect(),
        )));
        self
    }

    pub fn where_null(mut self, column: &str) -> Self {
        self.conditions.push(ConditionNode::Condition(Condition::new(
            column,
            Operator::IsNull,
            None,
        )));
        self
    }

    pub fn where_not_null(mut self, column: &str) -> Self {
        self.conditions.push(ConditionNode::Condition(Condition::new(
            column,
            Operator::IsNotNull,
            None,
        )));
        self
    }

    /// Add a composite OR predicate as a single node. The closure builds
    /// the branches; the group ANDs with the rest of the chain.
    pub fn or_group<F>(mut self, f: F) -> Self
    where
        F: FnOnce(OrGroup) -> OrGroup,
    {
        let group = f(OrGroup::new());
        if !group.branches.is_empty() {
            self.conditions.push(ConditionNode::Or(group.branches));
        }
        self
    }

    pub fn order_by(mut self, column: &str, direction: OrderDirection) -> Self {
        self.order_by.push((column.to_string(), direction));
        self
    }

    pub fn order_by_asc(self, column: &str) -> Self {
        self.order_by(column, OrderDirection::Asc)
    }

    pub fn order_by_desc(self, column: &str) -> Self {
        self.order_by(column, OrderDirection::Desc)
    }

    pub fn limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Switch the chain to an INSERT of the given column/value pairs.
    /// Columns are sorted so the statement text never depends on the
    /// caller's map iteration order.
    pub fn insert(mut self, fields: serde_json::Map<String, Value>) -> Self {
        self.kind = QueryKind::Insert;
        self.set_clauses = fields
            .into_iter()
            .map(|(column, value)| SetClause { column, value })
            .collect();
        self.set_clauses.sort_by(|a, b| a.column.cmp(&b.column));
        self
    }

    /// Switch the chain to an UPDATE setting the given column/value pairs.
    pub fn update(mut self, fields: serde_json::Map<String, Value>) -> Self {
        self.kind = QueryKind::Update;
        self.set_clauses
            .extend(fields.into_iter().map(|(column, value)| SetClause { column, value }));
        self.set_clauses.sort_by(|a, b| a.column.cmp(&b.column));
        self
    }

    /// Atomic `column = column + amount` as part of an UPDATE.
    pub fn increment(mut self, column: &str, amount: i64) -> Self {
        self.kind = QueryKind::Update;
        self.increments.push((column.to_string(), amount));
        self
    }

    /// Switch the chain to a DELETE.
    pub fn delete(mut self) -> Self {
        self.kind = QueryKind::Delete;
        self
    }

    /// Compile the descriptor into a backend statement. Consumes the
    /// chain; this is the single point where backend syntax is chosen.
    pub fn compile(self, backend: BackendKind) -> OrmResult<Statement> {
        if self.table.is_empty() {
            return Err(OrmError::Query("query has no target table".to_string()));
        }
        match backend {
            BackendKind::Postgres => Ok(super::sql::compile(&self, super::sql::SqlDialect::Postgres)),
            BackendKind::MySql => Ok(super::sql::compile(&self, super::sql::SqlDialect::MySql)),
            BackendKind::MongoDb => super::document::compile(&self),
        }
    }

    // Terminal methods: compile lazily and dispatch through the handle.

    /// Execute a SELECT and return all rows.
    pub async fn get(self, db: &Database) -> OrmResult<Vec<Row>> {
        let table = self.table.clone();
        let stmt = self.compile(db.kind())?;
        db.query_cached(&table, &stmt).await
    }

    /// Execute a SELECT limited to one row.
    pub async fn first(mut self, db: &Database) -> OrmResult<Option<Row>> {
        self.limit = Some(1);
        Ok(self.get(db).await?.into_iter().next())
    }

    /// Execute a COUNT over the current predicate.
    pub async fn count(mut self, db: &Database) -> OrmResult<u64> {
        self.kind = QueryKind::Count;
        self.order_by.clear();
        let table = self.table.clone();
        let stmt = self.compile(db.kind())?;
        let rows = db.query_cached(&table, &stmt).await?;
        match rows.first() {
            Some(row) => row.get::<u64>("count"),
            None => Ok(0),
        }
    }

    /// Execute a write (INSERT/UPDATE/DELETE) and return the affected count.
    pub async fn execute(self, db: &Database) -> OrmResult<u64> {
        let table = self.table.clone();
        let stmt = self.compile(db.kind())?;
        db.execute_invalidating(&table, &stmt)
            .await
            .map(|o| o.rows_affected)
    }
}

/// Builder for the branches of an OR group
#[derive(Debug, Default)]
pub struct OrGroup {
    branches: Vec<ConditionNode>,
}

impl OrGroup {
    fn new() -> Self {
        Self { branches: Vec::new() }
    }

    /// Add a single-condition branch.
    pub fn when<V: Into<Value>>(mut self, column: &str, operator: Operator, value: V) -> Self {
        self.branches.push(ConditionNode::Condition(Condition::new(
            column,
            operator,
            Some(value.into()),
        )));
        self
    }

    pub fn when_eq<V: Into<Value>>(self, column: &str, value: V) -> Self {
        self.when(column, Operator::Eq, value)
    }

    /// Add a branch that ANDs several conditions together.
    pub fn when_all(mut self, conditions: Vec<Condition>) -> Self {
        self.branches.push(ConditionNode::And(
            conditions.into_iter().map(ConditionNode::Condition).collect(),
        ));
        self
    }
}
