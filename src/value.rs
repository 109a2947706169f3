//! Value and row abstractions shared by all backends
//!
//! `DatabaseValue` is the typed parameter form bound into statements;
//! `Row` is the uniform result shape (column name to JSON value) that
//! models are hydrated from.

use serde_json::Value as JsonValue;

/// Typed value for parameter binding
#[derive(Debug, Clone, PartialEq)]
pub enum DatabaseValue {
    Null,
    Bool(bool),
    Int32(i32),
    Int64(i64),
    Float64(f64),
    String(String),
    Bytes(Vec<u8>),
    Uuid(uuid::Uuid),
    DateTime(chrono::DateTime<chrono::Utc>),
    Json(JsonValue),
}

impl DatabaseValue {
    pub fn is_null(&self) -> bool {
        matches!(self, DatabaseValue::Null)
    }

    /// Convert to a JSON value for row assembly and cache keys
    pub fn to_json(&self) -> JsonValue {
        match self {
            DatabaseValue::Null => JsonValue::Null,
            DatabaseValue::Bool(b) => JsonValue::Bool(*b),
            DatabaseValue::Int32(i) => JsonValue::Number((*i).into()),
            DatabaseValue::Int64(i) => JsonValue::Number((*i).into()),
            DatabaseValue::Float64(f) => serde_json::Number::from_f64(*f)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null),
            DatabaseValue::String(s) => JsonValue::String(s.clone()),
            DatabaseValue::Bytes(b) => JsonValue::Array(
                b.iter().map(|&x| JsonValue::Number(x.into())).collect(),
            ),
            DatabaseValue::Uuid(u) => JsonValue::String(u.to_string()),
            DatabaseValue::DateTime(dt) => JsonValue::String(dt.to_rfc3339()),
            DatabaseValue::Json(j) => j.clone(),
        }
    }

    /// Build a DatabaseValue from a JSON value.
    ///
    /// Strings that parse as UUIDs or RFC 3339 timestamps are promoted so
    /// that model fields round-trip through their native column types.
    pub fn from_json(json: &JsonValue) -> Self {
        match json {
            JsonValue::Null => DatabaseValue::Null,
            JsonValue::Bool(b) => DatabaseValue::Bool(*b),
            JsonValue::Number(n) => {
                if let Some(i) = n.as_i64() {
                    DatabaseValue::Int64(i)
                } else if let Some(f) = n.as_f64() {
                    DatabaseValue::Float64(f)
                } else {
                    DatabaseValue::Null
                }
            }
            JsonValue::String(s) => {
                if let Ok(uuid) = uuid::Uuid::parse_str(s) {
                    DatabaseValue::Uuid(uuid)
                } else if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(s) {
                    DatabaseValue::DateTime(dt.with_timezone(&chrono::Utc))
                } else {
                    DatabaseValue::String(s.clone())
                }
            }
            JsonValue::Array(_) | JsonValue::Object(_) => DatabaseValue::Json(json.clone()),
        }
    }
}

impl From<bool> for DatabaseValue {
    fn from(value: bool) -> Self {
        DatabaseValue::Bool(value)
    }
}

impl From<i32> for DatabaseValue {
    fn from(value: i32) -> Self {
        DatabaseValue::Int32(value)
    }
}

impl From<i64> for DatabaseValue {
    fn from(value: i64) -> Self {
        DatabaseValue::Int64(value)
    }
}

impl From<f64> for DatabaseValue {
    fn from(value: f64) -> Self {
        DatabaseValue::Float64(value)
    }
}

impl From<String> for DatabaseValue {
    fn from(value: String) -> Self {
        DatabaseValue::String(value)
    }
}

impl From<&str> for DatabaseValue {
    fn from(value: &str) -> Self {
        DatabaseValue::String(value.to_string())
    }
}

impl From<uuid::Uuid> for DatabaseValue {
    fn from(value: uuid::Uuid) -> Self {
        DatabaseValue::Uuid(value)
    }
}

impl From<chrono::DateTime<chrono::Utc>> for DatabaseValue {
    fn from(value: chrono::DateTime<chrono::Utc>) -> Self {
        DatabaseValue::DateTime(value)
    }
}

impl From<JsonValue> for DatabaseValue {
    fn from(value: JsonValue) -> Self {
        DatabaseValue::from_json(&value)
    }
}

impl<T> From<Option<T>> for DatabaseValue
where
    T: Into<DatabaseValue>,
{
    fn from(value: Option<T>) -> Self {
        match value {
            Some(v) => v.into(),
            None => DatabaseValue::Null,
        }
    }
}

/// One result row: column name to JSON value
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    columns: serde_json::Map<String, JsonValue>,
}

impl Row {
    pub fn new(columns: serde_json::Map<String, JsonValue>) -> Self {
        Self { columns }
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.keys().map(String::as_str).collect()
    }

    pub fn get_raw(&self, column: &str) -> Option<&JsonValue> {
        self.columns.get(column)
    }

    /// Typed column access; errors when the column is missing or the
    /// value cannot deserialize into `T`.
    pub fn get<T>(&self, column: &str) -> crate::OrmResult<T>
    where
        T: serde::de::DeserializeOwned,
    {
        let value = self.columns.get(column).ok_or_else(|| {
            crate::OrmError::Serialization(format!("column '{}' not found in row", column))
        })?;
        serde_json::from_value(value.clone()).map_err(|e| {
            crate::OrmError::Serialization(format!(
                "failed to deserialize column '{}': {}",
                column, e
            ))
        })
    }

    /// Like `get` but returns None for a missing or null column.
    pub fn try_get<T>(&self, column: &str) -> crate::OrmResult<Option<T>>
    where
        T: serde::de::DeserializeOwned,
    {
        match self.columns.get(column) {
            None | Some(JsonValue::Null) => Ok(None),
            Some(value) => serde_json::from_value(value.clone()).map(Some).map_err(|e| {
                crate::OrmError::Serialization(format!(
                    "failed to deserialize column '{}': {}",
                    column, e
                ))
            }),
        }
    }

    pub fn into_json(self) -> JsonValue {
        JsonValue::Object(self.columns)
    }

    pub fn as_map(&self) -> &serde_json::Map<String, JsonValue> {
        &self.columns
    }
}

impl From<serde_json::Map<String, JsonValue>> for Row {
    fn from(columns: serde_json::Map<String, JsonValue>) -> Self {
        Self::new(columns)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn json_round_trip_preserves_scalars() {
        for value in [
            DatabaseValue::Bool(true),
            DatabaseValue::Int64(42),
            DatabaseValue::String("plain text".into()),
        ] {
            assert_eq!(DatabaseValue::from_json(&value.to_json()), value);
        }
    }

    #[test]
    fn uuid_strings_promote_to_uuid_values() {
        let id = uuid::Uuid::new_v4();
        let value = DatabaseValue::from_json(&json!(id.to_string()));
        assert_eq!(value, DatabaseValue::Uuid(id));
    }

    #[test]
    fn row_typed_access() {
        let mut map = serde_json::Map::new();
        map.insert("id".into(), json!(7));
        map.insert("name".into(), json!("ada"));
        map.insert("deleted_at".into(), JsonValue::Null);
        let row = Row::new(map);

        assert_eq!(row.get::<i64>("id").unwrap(), 7);
        assert_eq!(row.get::<String>("name").unwrap(), "ada");
        assert_eq!(row.try_get::<String>("deleted_at").unwrap(), None);
        assert!(row.get::<i64>("missing").is_err());
    }
}
