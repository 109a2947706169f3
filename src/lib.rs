//! polyorm - one object mapper over PostgreSQL, MySQL, and MongoDB
//!
//! A serde struct plus a [`Model`] impl gives typed CRUD, validation,
//! soft deletes, and associations over any of the three backends. The
//! query builder compiles one fluent chain to parameterized SQL or to
//! document commands; reads flow through a TTL cache that writes keep
//! coherent table by table.
//!
//! ```no_run
//! use polyorm::prelude::*;
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Debug, Serialize, Deserialize)]
//! struct User {
//!     id: Option<i64>,
//!     name: String,
//!     email: String,
//! }
//!
//! impl Model for User {
//!     fn table_name() -> &'static str {
//!         "users"
//!     }
//!
//!     fn primary_key(&self) -> Option<serde_json::Value> {
//!         self.id.map(Into::into)
//!     }
//!
//!     fn set_primary_key(&mut self, value: serde_json::Value) {
//!         self.id = value.as_i64();
//!     }
//!
//!     fn schema() -> SchemaDefinition {
//!         SchemaDefinition::new()
//!             .field("name", FieldRule::string().required().max_length(100))
//!             .field("email", FieldRule::string().required())
//!     }
//! }
//!
//! # async fn demo(db: &polyorm::Database) -> polyorm::OrmResult<()> {
//! let user = User::create(
//!     db,
//!     User { id: None, name: "Ada".into(), email: "ada@example.com".into() },
//! )
//! .await?;
//!
//! let adults = User::query()
//!     .where_gte("age", 18)
//!     .order_by_asc("name")
//!     .limit(20)
//!     .all(db)
//!     .await?;
//! # let _ = (user, adults);
//! # Ok(())
//! # }
//! ```

pub mod adapter;
pub mod cache;
pub mod config;
pub mod database;
pub mod error;
pub mod logging;
pub mod migrations;
pub mod model;
pub mod query;
pub mod value;

pub use adapter::{
    DatabaseAdapter, DocumentCommand, ExecuteOutcome, HealthStatus, PoolStatus, Statement,
};
pub use cache::{CacheBackend, CacheError, CacheStats, MemoryCache, QueryCache};
pub use config::{BackendKind, ConnectionParams, DatabaseConfig, PoolSettings};
pub use database::{
    close_database, get_database, init_database, Database, DatabaseOptions, DatabaseRegistry,
};
pub use error::{OrmError, OrmResult};
pub use logging::{PoolMonitor, QueryLogger, QueryStats};
pub use migrations::{Migration, MigrationRecord, MigrationRunner};
pub use model::{
    belongs_to, has_many, has_one, CustomRule, FieldRule, FieldType, IndexDefinition, IndexKind,
    Model, ModelCrud, ModelQuery, SchemaDefinition, TrashedMode, ValidationError, ValidationErrors,
};
pub use query::{Operator, OrderDirection, QueryBuilder};

/// Everything a model definition and its call sites usually need.
pub mod prelude {
    pub use crate::config::{BackendKind, DatabaseConfig};
    pub use crate::database::{get_database, init_database, Database};
    pub use crate::error::{OrmError, OrmResult};
    pub use crate::model::{
        FieldRule, IndexDefinition, Model, ModelCrud, ModelQuery, SchemaDefinition,
    };
    pub use crate::query::{Operator, OrderDirection, QueryBuilder};
}
