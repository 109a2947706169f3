//! Typed queries over a model's table
//!
//! Wraps the raw [`QueryBuilder`] with model awareness: rows hydrate into
//! the model type, named scopes apply by name, and soft-deleted rows are
//! filtered out unless the chain opts back in.

use serde_json::Value;
use std::fmt;

use crate::database::Database;
use crate::error::{OrmError, OrmResult};
use crate::query::{Operator, OrderDirection, QueryBuilder};

use super::core::Model;

/// How a query treats soft-deleted rows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrashedMode {
    /// Soft-deleted rows are invisible.
    Exclude,
    /// Soft-deleted rows are included alongside live ones.
    Include,
    /// Only soft-deleted rows match.
    Only,
}

pub struct ModelQuery<M: Model> {
    builder: QueryBuilder<M>,
    trashed: TrashedMode,
}

impl<M: Model> ModelQuery<M> {
    pub fn new() -> Self {
        Self {
            builder: QueryBuilder::table(M::table_name()),
            trashed: TrashedMode::Exclude,
        }
    }

    pub fn where_eq<V: Into<Value>>(mut self, column: &str, value: V) -> Self {
        self.builder = self.builder.where_eq(column, value);
        self
    }

    pub fn where_ne<V: Into<Value>>(mut self, column: &str, value: V) -> Self {
        self.builder = self.builder.where_ne(column, value);
        self
    }

    pub fn where_gt<V: Into<Value>>(mut self, column: &str, value: V) -> Self {
        self.builder = self.builder.where_gt(column, value);
        self
    }

    pub fn where_gte<V: Into<Value>>(mut self, column: &str, value: V) -> Self {
        self.builder = self.builder.where_gte(column, value);
        self
    }

    pub fn where_lt<V: Into<Value>>(mut self, column: &str, value: V) -> Self {
        self.builder = self.builder.where_lt(column, value);
        self
    }

    pub fn where_lte<V: Into<Value>>(mut self, column: &str, value: V) -> Self {
        self.builder = self.builder.where_lte(column, value);
        self
    }

    pub fn where_like(mut self, column: &str, pattern: &str) -> Self {
        self.builder = self.builder.where_like(column, pattern);
        self
    }

    pub fn where_in<V: Into<Value>>(mut self, column: &str, values: Vec<V>) -> Self {
        self.builder = self.builder.where_in(column, values);
        self
    }

    pub fn where_not_in<V: Into<Value>>(mut self, column: &str, values: Vec<V>) -> Self {
        self.builder = self.builder.where_not_in(column, values);
        self
    }

    pub fn where_null(mut self, column: &str) -> Self {
        self.builder = self.builder.where_null(column);
        self
    }

    pub fn where_not_null(mut self, column: &str) -> Self {
        self.builder = self.builder.where_not_null(column);
        self
    }

    pub fn where_op<V: Into<Value>>(mut self, column: &str, operator: Operator, value: V) -> Self {
        self.builder = self.builder.where_op(column, operator, value);
        self
    }

    pub fn or_group<F>(mut self, f: F) -> Self
    where
        F: FnOnce(crate::query::OrGroup) -> crate::query::OrGroup,
    {
        self.builder = self.builder.or_group(f);
        self
    }

    /// Applies a scope the model declared under `name`.
    pub fn scope(mut self, name: &str) -> OrmResult<Self> {
        let scopes = M::scopes();
        let scope = scopes.get(name).ok_or_else(|| {
            OrmError::Query(format!(
                "model {} has no scope named '{}'",
                M::table_name(),
                name
            ))
        })?;
        self.builder = scope(self.builder);
        Ok(self)
    }

    pub fn order_by(mut self, column: &str, direction: OrderDirection) -> Self {
        self.builder = self.builder.order_by(column, direction);
        self
    }

    pub fn order_by_asc(mut self, column: &str) -> Self {
        self.builder = self.builder.order_by_asc(column);
        self
    }

    pub fn order_by_desc(mut self, column: &str) -> Self {
        self.builder = self.builder.order_by_desc(column);
        self
    }

    pub fn limit(mut self, limit: i64) -> Self {
        self.builder = self.builder.limit(limit);
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.builder = self.builder.offset(offset);
        self
    }

    pub fn with_trashed(mut self) -> Self {
        self.trashed = TrashedMode::Include;
        self
    }

    pub fn only_trashed(mut self) -> Self {
        self.trashed = TrashedMode::Only;
        self
    }

    /// The raw builder with the soft-delete filter baked in.
    pub fn into_builder(self) -> QueryBuilder<M> {
        let builder = self.builder;
        if !M::uses_soft_deletes() {
            return builder;
        }
        match self.trashed {
            TrashedMode::Exclude => builder.where_null(M::deleted_at_column()),
            TrashedMode::Only => builder.where_not_null(M::deleted_at_column()),
            TrashedMode::Include => builder,
        }
    }

    pub async fn all(self, db: &Database) -> OrmResult<Vec<M>> {
        let rows = self.into_builder().get(db).await?;
        rows.iter().map(M::from_row).collect()
    }

    pub async fn first(self, db: &Database) -> OrmResult<Option<M>> {
        match self.into_builder().first(db).await? {
            Some(row) => Ok(Some(M::from_row(&row)?)),
            None => Ok(None),
        }
    }

    pub async fn first_or_fail(self, db: &Database) -> OrmResult<M> {
        self.first(db).await?.ok_or_else(|| {
            OrmError::NotFound(format!("no {} matched the query", M::table_name()))
        })
    }

    pub async fn count(self, db: &Database) -> OrmResult<u64> {
        self.into_builder().count(db).await
    }

    pub async fn exists(self, db: &Database) -> OrmResult<bool> {
        Ok(self.count(db).await? > 0)
    }
}

impl<M: Model> fmt::Debug for ModelQuery<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelQuery")
            .field("builder", &self.builder)
            .field("trashed", &self.trashed)
            .finish()
    }
}

impl<M: Model> Default for ModelQuery<M> {
    fn default() -> Self {
        Self::new()
    }
}
