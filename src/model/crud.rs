//! Persistence operations for models
//!
//! Blanket-implemented for every [`Model`], so defining the trait is all a
//! type needs to get `create` / `find` / `save` / `delete` and friends.
//!
//! Create and save run the full lifecycle: hooks, defaults, validation
//! (collecting every failure), timestamp maintenance, then the write.

use async_trait::async_trait;
use serde_json::Value as JsonValue;

use crate::database::Database;
use crate::error::{OrmError, OrmResult};
use crate::query::QueryBuilder;

use super::core::Model;
use super::query::ModelQuery;

fn now_timestamp() -> JsonValue {
    JsonValue::String(chrono::Utc::now().to_rfc3339())
}

/// Reloads the row at `pk` so an instance can mirror what was persisted.
/// Goes through the raw builder, so soft-deleted rows are still visible.
async fn stored_state<M: Model>(db: &Database, pk: &JsonValue) -> OrmResult<M> {
    let row = QueryBuilder::<M>::table(M::table_name())
        .where_eq(M::primary_key_name(), pk.clone())
        .first(db)
        .await?
        .ok_or_else(|| {
            OrmError::NotFound(format!(
                "{} with {} = {} not found",
                M::table_name(),
                M::primary_key_name(),
                pk
            ))
        })?;
    M::from_row(&row)
}

#[async_trait]
pub trait ModelCrud: Model {
    /// Starts a typed query over this model's table.
    fn query() -> ModelQuery<Self> {
        ModelQuery::new()
    }

    /// Validates and inserts, returning the instance as stored.
    ///
    /// `before_save` and `before_create` only run once validation has
    /// passed, so hooks with side effects never fire for invalid data.
    async fn create(db: &Database, mut instance: Self) -> OrmResult<Self> {
        instance.before_validate().await?;

        let schema = Self::schema();
        {
            let mut fields = instance.to_fields()?;
            schema.apply_defaults(&mut fields);
            schema.validate(&fields).await?;
        }

        instance.before_save().await?;
        instance.before_create().await?;

        // Re-read the fields: the write hooks may have mutated the instance.
        let mut fields = instance.to_fields()?;
        schema.apply_defaults(&mut fields);

        if Self::uses_timestamps() {
            let now = now_timestamp();
            fields.insert(Self::created_at_column().to_string(), now.clone());
            fields.insert(Self::updated_at_column().to_string(), now);
        }

        let pk_column = Self::primary_key_name();
        let pk_value = match instance.primary_key() {
            Some(value) => {
                fields.insert(pk_column.to_string(), value.clone());
                Some(value)
            }
            None if db.kind().is_relational() => {
                // Let the database assign the key.
                fields.remove(pk_column);
                None
            }
            None => {
                // Document stores get a client-generated key, so the
                // stored row can always be refetched deterministically.
                let id = JsonValue::String(uuid::Uuid::new_v4().to_string());
                fields.insert(pk_column.to_string(), id.clone());
                Some(id)
            }
        };

        let stmt = QueryBuilder::<Self>::table(Self::table_name())
            .insert(fields)
            .compile(db.kind())?;
        let row = db
            .insert_returning(Self::table_name(), pk_column, pk_value.as_ref(), &stmt)
            .await?;

        let mut created = Self::from_row(&row)?;
        created.after_create().await?;
        Ok(created)
    }

    /// Looks an instance up by primary key; soft-deleted rows are invisible.
    async fn find(db: &Database, id: impl Into<JsonValue> + Send) -> OrmResult<Option<Self>> {
        Self::query()
            .where_eq(Self::primary_key_name(), id.into())
            .first(db)
            .await
    }

    async fn find_or_fail(db: &Database, id: impl Into<JsonValue> + Send) -> OrmResult<Self> {
        let id = id.into();
        Self::find(db, id.clone()).await?.ok_or_else(|| {
            OrmError::NotFound(format!(
                "{} with {} = {} not found",
                Self::table_name(),
                Self::primary_key_name(),
                id
            ))
        })
    }

    /// Validates and writes this instance's fields back to its row, then
    /// reloads so the instance matches what was stored.
    async fn save(&mut self, db: &Database) -> OrmResult<()> {
        let pk = self.primary_key().ok_or_else(|| {
            OrmError::Query(format!(
                "cannot save a {} that has no primary key",
                Self::table_name()
            ))
        })?;

        self.before_validate().await?;

        let schema = Self::schema();
        schema.validate(&self.to_fields()?).await?;

        self.before_save().await?;
        self.before_update().await?;

        let mut fields = self.to_fields()?;
        fields.remove(Self::primary_key_name());
        if Self::uses_timestamps() {
            fields.insert(Self::updated_at_column().to_string(), now_timestamp());
        }

        let stmt = QueryBuilder::<Self>::table(Self::table_name())
            .where_eq(Self::primary_key_name(), pk.clone())
            .update(fields)
            .compile(db.kind())?;
        let outcome = db.execute_invalidating(Self::table_name(), &stmt).await?;
        if outcome.rows_affected == 0 {
            return Err(OrmError::NotFound(format!(
                "{} with {} = {} not found",
                Self::table_name(),
                Self::primary_key_name(),
                pk
            )));
        }

        *self = stored_state(db, &pk).await?;
        self.after_update().await?;
        Ok(())
    }

    /// Soft-deletes when the model opts in, otherwise removes the row.
    async fn delete(&mut self, db: &Database) -> OrmResult<()> {
        self.before_delete().await?;
        let pk = self.primary_key().ok_or_else(|| {
            OrmError::Query(format!(
                "cannot delete a {} that has no primary key",
                Self::table_name()
            ))
        })?;

        let outcome = if Self::uses_soft_deletes() {
            let mut fields = serde_json::Map::new();
            fields.insert(Self::deleted_at_column().to_string(), now_timestamp());
            if Self::uses_timestamps() {
                fields.insert(Self::updated_at_column().to_string(), now_timestamp());
            }
            let stmt = QueryBuilder::<Self>::table(Self::table_name())
                .where_eq(Self::primary_key_name(), pk.clone())
                .update(fields)
                .compile(db.kind())?;
            db.execute_invalidating(Self::table_name(), &stmt).await?
        } else {
            let stmt = QueryBuilder::<Self>::table(Self::table_name())
                .where_eq(Self::primary_key_name(), pk.clone())
                .delete()
                .compile(db.kind())?;
            db.execute_invalidating(Self::table_name(), &stmt).await?
        };

        if outcome.rows_affected == 0 {
            return Err(OrmError::NotFound(format!(
                "{} with {} = {} not found",
                Self::table_name(),
                Self::primary_key_name(),
                pk
            )));
        }
        if Self::uses_soft_deletes() {
            // Pick up the deleted_at the write just stamped.
            *self = stored_state(db, &pk).await?;
        }

        self.after_delete().await?;
        Ok(())
    }

    /// Brings a soft-deleted instance back.
    async fn restore(&mut self, db: &Database) -> OrmResult<()> {
        if !Self::uses_soft_deletes() {
            return Err(OrmError::Query(format!(
                "{} does not use soft deletes",
                Self::table_name()
            )));
        }
        let pk = self.primary_key().ok_or_else(|| {
            OrmError::Query(format!(
                "cannot restore a {} that has no primary key",
                Self::table_name()
            ))
        })?;

        let mut fields = serde_json::Map::new();
        fields.insert(Self::deleted_at_column().to_string(), JsonValue::Null);
        if Self::uses_timestamps() {
            fields.insert(Self::updated_at_column().to_string(), now_timestamp());
        }
        let stmt = QueryBuilder::<Self>::table(Self::table_name())
            .where_eq(Self::primary_key_name(), pk.clone())
            .update(fields)
            .compile(db.kind())?;
        let outcome = db.execute_invalidating(Self::table_name(), &stmt).await?;
        if outcome.rows_affected == 0 {
            return Err(OrmError::NotFound(format!(
                "{} with {} = {} not found",
                Self::table_name(),
                Self::primary_key_name(),
                pk
            )));
        }

        *self = stored_state(db, &pk).await?;
        Ok(())
    }

    /// Removes the row even when the model soft-deletes.
    async fn force_delete(&mut self, db: &Database) -> OrmResult<()> {
        self.before_delete().await?;
        let pk = self.primary_key().ok_or_else(|| {
            OrmError::Query(format!(
                "cannot delete a {} that has no primary key",
                Self::table_name()
            ))
        })?;

        let stmt = QueryBuilder::<Self>::table(Self::table_name())
            .where_eq(Self::primary_key_name(), pk)
            .delete()
            .compile(db.kind())?;
        db.execute_invalidating(Self::table_name(), &stmt).await?;
        self.after_delete().await?;
        Ok(())
    }

    /// Atomically adds `amount` to a numeric column of one row.
    async fn increment(
        db: &Database,
        id: impl Into<JsonValue> + Send,
        column: &str,
        amount: i64,
    ) -> OrmResult<u64> {
        let stmt = QueryBuilder::<Self>::table(Self::table_name())
            .where_eq(Self::primary_key_name(), id.into())
            .increment(column, amount)
            .compile(db.kind())?;
        Ok(db
            .execute_invalidating(Self::table_name(), &stmt)
            .await?
            .rows_affected)
    }

    /// Creates every index the model declares. Safe to call repeatedly.
    async fn sync_indexes(db: &Database) -> OrmResult<()> {
        let indexes = Self::indexes();
        if indexes.is_empty() {
            return Ok(());
        }
        db.adapter()
            .create_indexes(Self::table_name(), &indexes)
            .await
    }
}

impl<M: Model> ModelCrud for M {}
