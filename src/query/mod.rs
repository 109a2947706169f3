//! Query building
//!
//! One fluent builder, two compilation targets: parameterized SQL for the
//! relational backends and filter/update documents for the document store.

pub mod builder;
pub mod document;
pub mod sql;
pub mod types;

pub use builder::{OrGroup, QueryBuilder};
pub use sql::SqlDialect;
pub use types::{Condition, ConditionNode, Operator, OrderDirection, QueryKind, SetClause};
