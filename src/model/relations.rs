//! Associations between models
//!
//! Associations load on demand, one query per call; nothing is prefetched
//! or cached on the instance. Foreign keys default to the singularized
//! parent table plus `_id`, and can always be given explicitly.

use serde_json::Value as JsonValue;

use crate::database::Database;
use crate::error::{OrmError, OrmResult};

use super::core::Model;
use super::crud::ModelCrud;

/// `users` -> `user_id`. Only trailing-`s` plurals are handled; models
/// with irregular table names pass the key explicitly.
pub fn default_foreign_key<M: Model>() -> String {
    let table = M::table_name();
    let singular = table.strip_suffix('s').unwrap_or(table);
    format!("{}_id", singular)
}

fn foreign_key_value<M: Model>(instance: &M, foreign_key: &str) -> OrmResult<Option<JsonValue>> {
    let fields = instance.to_fields()?;
    match fields.get(foreign_key) {
        Some(JsonValue::Null) | None => Ok(None),
        Some(value) => Ok(Some(value.clone())),
    }
}

/// Loads the parent this instance points at through `foreign_key`.
///
/// `Ok(None)` when the key is unset or the parent row is gone.
pub async fn belongs_to<Child, Parent>(
    db: &Database,
    child: &Child,
    foreign_key: Option<&str>,
) -> OrmResult<Option<Parent>>
where
    Child: Model,
    Parent: Model,
{
    let key = foreign_key
        .map(str::to_string)
        .unwrap_or_else(default_foreign_key::<Parent>);
    match foreign_key_value(child, &key)? {
        Some(value) => Parent::find(db, value).await,
        None => Ok(None),
    }
}

/// Loads the single child pointing back at this instance.
pub async fn has_one<Parent, Child>(
    db: &Database,
    parent: &Parent,
    foreign_key: Option<&str>,
) -> OrmResult<Option<Child>>
where
    Parent: Model,
    Child: Model,
{
    let key = foreign_key
        .map(str::to_string)
        .unwrap_or_else(default_foreign_key::<Parent>);
    let pk = parent_key(parent)?;
    Child::query().where_eq(&key, pk).first(db).await
}

/// Loads every child pointing back at this instance.
pub async fn has_many<Parent, Child>(
    db: &Database,
    parent: &Parent,
    foreign_key: Option<&str>,
) -> OrmResult<Vec<Child>>
where
    Parent: Model,
    Child: Model,
{
    let key = foreign_key
        .map(str::to_string)
        .unwrap_or_else(default_foreign_key::<Parent>);
    let pk = parent_key(parent)?;
    Child::query().where_eq(&key, pk).all(db).await
}

fn parent_key<M: Model>(parent: &M) -> OrmResult<JsonValue> {
    parent.primary_key().ok_or_else(|| {
        OrmError::Query(format!(
            "cannot load associations of an unsaved {}",
            M::table_name()
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Serialize, Deserialize)]
    struct User {
        id: Option<i64>,
    }

    impl Model for User {
        fn table_name() -> &'static str {
            "users"
        }

        fn primary_key(&self) -> Option<JsonValue> {
            self.id.map(JsonValue::from)
        }

        fn set_primary_key(&mut self, value: JsonValue) {
            self.id = value.as_i64();
        }
    }

    #[test]
    fn foreign_key_singularizes_plural_tables() {
        assert_eq!(default_foreign_key::<User>(), "user_id");
    }

    #[test]
    fn unsaved_parent_is_an_error() {
        let user = User { id: None };
        assert!(matches!(
            parent_key(&user).unwrap_err(),
            OrmError::Query(_)
        ));
    }
}
