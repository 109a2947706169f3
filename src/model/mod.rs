//! The model layer
//!
//! Serde structs become persistable records by implementing [`Model`];
//! [`ModelCrud`] then supplies the operations.

pub mod core;
pub mod crud;
pub mod query;
pub mod relations;
pub mod schema;
pub mod validation;

pub use self::core::{Model, Scope};
pub use crud::ModelCrud;
pub use query::{ModelQuery, TrashedMode};
pub use relations::{belongs_to, default_foreign_key, has_many, has_one};
pub use schema::{CustomRule, FieldRule, FieldType, IndexDefinition, IndexKind, SchemaDefinition};
pub use validation::{ValidationError, ValidationErrors};
