//! Query descriptor types
//!
//! The builder accumulates these backend-agnostic types; translation to
//! SQL text or a document filter happens only at execution time.

use serde_json::Value;
use std::fmt;

/// Comparison operators shared by both query flavors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    Like,
    In,
    NotIn,
    IsNull,
    IsNotNull,
}

impl Operator {
    /// MongoDB comparison operator, where one exists. `Like`, `IsNull`,
    /// and `IsNotNull` need structural translation instead.
    pub fn mongo_token(&self) -> Option<&'static str> {
        match self {
            Operator::Eq => Some("$eq"),
            Operator::Ne => Some("$ne"),
            Operator::Gt => Some("$gt"),
            Operator::Gte => Some("$gte"),
            Operator::Lt => Some("$lt"),
            Operator::Lte => Some("$lte"),
            Operator::In => Some("$in"),
            Operator::NotIn => Some("$nin"),
            Operator::Like | Operator::IsNull | Operator::IsNotNull => None,
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operator::Eq => write!(f, "="),
            Operator::Ne => write!(f, "!="),
            Operator::Gt => write!(f, ">"),
            Operator::Gte => write!(f, ">="),
            Operator::Lt => write!(f, "<"),
            Operator::Lte => write!(f, "<="),
            Operator::Like => write!(f, "LIKE"),
            Operator::In => write!(f, "IN"),
            Operator::NotIn => write!(f, "NOT IN"),
            Operator::IsNull => write!(f, "IS NULL"),
            Operator::IsNotNull => write!(f, "IS NOT NULL"),
        }
    }
}

/// One predicate against a column
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub column: String,
    pub operator: Operator,
    /// Single comparison value; None for IS (NOT) NULL
    pub value: Option<Value>,
    /// Value set for IN / NOT IN
    pub values: Vec<Value>,
}

impl Condition {
    pub fn new(column: impl Into<String>, operator: Operator, value: Option<Value>) -> Self {
        Self {
            column: column.into(),
            operator,
            value,
            values: Vec::new(),
        }
    }

    pub fn with_values(column: impl Into<String>, operator: Operator, values: Vec<Value>) -> Self {
        Self {
            column: column.into(),
            operator,
            value: None,
            values,
        }
    }
}

/// Node in the condition tree. Top-level nodes AND together; an `Or`
/// node is the composite predicate produced by explicit OR-grouping.
#[derive(Debug, Clone, PartialEq)]
pub enum ConditionNode {
    Condition(Condition),
    /// Children joined with OR
    Or(Vec<ConditionNode>),
    /// Children joined with AND (used for branches inside an OR group)
    And(Vec<ConditionNode>),
}

/// Sort direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderDirection {
    Asc,
    Desc,
}

impl fmt::Display for OrderDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderDirection::Asc => write!(f, "ASC"),
            OrderDirection::Desc => write!(f, "DESC"),
        }
    }
}

/// Statement flavor the builder will compile to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryKind {
    Select,
    Count,
    Insert,
    Update,
    Delete,
}

/// Column assignment for INSERT / UPDATE
#[derive(Debug, Clone, PartialEq)]
pub struct SetClause {
    pub column: String,
    pub value: Value,
}
