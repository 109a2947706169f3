//! The model contract
//!
//! A model is a plain serde struct plus the table metadata and lifecycle
//! hooks declared here. Row hydration and field extraction go through
//! serde, so models need no hand-written column mapping.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value as JsonValue};
use std::collections::HashMap;

use crate::error::{OrmError, OrmResult};
use crate::query::QueryBuilder;
use crate::value::Row;

use super::schema::{IndexDefinition, SchemaDefinition};

/// Named, reusable query fragment a model can declare
pub type Scope<M> = fn(QueryBuilder<M>) -> QueryBuilder<M>;

#[async_trait]
pub trait Model: Serialize + DeserializeOwned + Send + Sync + Sized + 'static {
    fn table_name() -> &'static str;

    fn primary_key_name() -> &'static str {
        "id"
    }

    /// `None` until the instance has been persisted.
    fn primary_key(&self) -> Option<JsonValue>;

    fn set_primary_key(&mut self, value: JsonValue);

    fn schema() -> SchemaDefinition {
        SchemaDefinition::new()
    }

    fn indexes() -> Vec<IndexDefinition> {
        Vec::new()
    }

    fn uses_timestamps() -> bool {
        true
    }

    fn uses_soft_deletes() -> bool {
        false
    }

    fn created_at_column() -> &'static str {
        "created_at"
    }

    fn updated_at_column() -> &'static str {
        "updated_at"
    }

    fn deleted_at_column() -> &'static str {
        "deleted_at"
    }

    fn scopes() -> HashMap<&'static str, Scope<Self>> {
        HashMap::new()
    }

    /// Serialized fields that are derived, never persisted.
    fn virtual_fields() -> &'static [&'static str] {
        &[]
    }

    fn from_row(row: &Row) -> OrmResult<Self> {
        serde_json::from_value(JsonValue::Object(row.as_map().clone())).map_err(|e| {
            OrmError::Serialization(format!(
                "row does not deserialize into {}: {}",
                Self::table_name(),
                e
            ))
        })
    }

    /// Persistable fields of this instance, virtual fields stripped.
    fn to_fields(&self) -> OrmResult<Map<String, JsonValue>> {
        let value = serde_json::to_value(self)
            .map_err(|e| OrmError::Serialization(format!("model serialization failed: {}", e)))?;
        let mut map = match value {
            JsonValue::Object(map) => map,
            other => {
                return Err(OrmError::Serialization(format!(
                    "model must serialize to an object, got {}",
                    other
                )))
            }
        };
        for field in Self::virtual_fields() {
            map.remove(*field);
        }
        Ok(map)
    }

    // Lifecycle hooks. Defaults do nothing; a hook that returns Err
    // aborts the operation before anything is written.

    async fn before_validate(&mut self) -> OrmResult<()> {
        Ok(())
    }

    async fn before_save(&mut self) -> OrmResult<()> {
        Ok(())
    }

    async fn before_create(&mut self) -> OrmResult<()> {
        Ok(())
    }

    async fn after_create(&mut self) -> OrmResult<()> {
        Ok(())
    }

    async fn before_update(&mut self) -> OrmResult<()> {
        Ok(())
    }

    async fn after_update(&mut self) -> OrmResult<()> {
        Ok(())
    }

    async fn before_delete(&mut self) -> OrmResult<()> {
        Ok(())
    }

    async fn after_delete(&mut self) -> OrmResult<()> {
        Ok(())
    }
}
