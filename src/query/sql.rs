//! SQL compilation
//!
//! Renders the query descriptor into dialect-specific SQL. Every value is
//! bound as a parameter; nothing from the descriptor is interpolated into
//! the statement text except identifiers the caller already controls.

use crate::adapter::Statement;
use crate::value::DatabaseValue;

use super::builder::QueryBuilder;
use super::types::*;

/// SQL dialects served by the relational adapters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlDialect {
    Postgres,
    MySql,
}

impl SqlDialect {
    /// Placeholder for the n-th parameter (1-based)
    pub fn placeholder(&self, index: usize) -> String {
        match self {
            SqlDialect::Postgres => format!("${}", index),
            SqlDialect::MySql => "?".to_string(),
        }
    }

    pub fn quote(&self, identifier: &str) -> String {
        match self {
            SqlDialect::Postgres => format!("\"{}\"", identifier),
            SqlDialect::MySql => format!("`{}`", identifier),
        }
    }
}

/// Compile a descriptor for one of the relational backends.
pub fn compile<M>(query: &QueryBuilder<M>, dialect: SqlDialect) -> Statement {
    let mut params: Vec<DatabaseValue> = Vec::new();
    let sql = match query.kind {
        QueryKind::Select => build_select(query, dialect, &mut params, false),
        QueryKind::Count => build_select(query, dialect, &mut params, true),
        QueryKind::Insert => build_insert(query, dialect, &mut params),
        QueryKind::Update => build_update(query, dialect, &mut params),
        QueryKind::Delete => build_delete(query, dialect, &mut params),
    };
    Statement::Sql { sql, params }
}

fn build_select<M>(
    query: &QueryBuilder<M>,
    dialect: SqlDialect,
    params: &mut Vec<DatabaseValue>,
    count: bool,
) -> String {
    let mut sql = String::from("SELECT ");
    if count {
        sql.push_str("COUNT(*) AS count");
    } else if query.select_columns.is_empty() {
        sql.push('*');
    } else {
        let cols: Vec<String> = query
            .select_columns
            .iter()
            .map(|c| dialect.quote(c))
            .collect();
        sql.push_str(&cols.join(", "));
    }
    sql.push_str(" FROM ");
    sql.push_str(&dialect.quote(&query.table));

    push_where(&query.conditions, dialect, &mut sql, params);

    if !count {
        if !query.order_by.is_empty() {
            sql.push_str(" ORDER BY ");
            let clauses: Vec<String> = query
                .order_by
                .iter()
                .map(|(column, direction)| format!("{} {}", dialect.quote(column), direction))
                .collect();
            sql.push_str(&clauses.join(", "));
        }
        if let Some(limit) = query.limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }
        if let Some(offset) = query.offset {
            sql.push_str(&format!(" OFFSET {}", offset));
        }
    }
    sql
}

fn build_insert<M>(
    query: &QueryBuilder<M>,
    dialect: SqlDialect,
    params: &mut Vec<DatabaseValue>,
) -> String {
    let columns: Vec<String> = query
        .set_clauses
        .iter()
        .map(|c| dialect.quote(&c.column))
        .collect();
    let mut placeholders = Vec::with_capacity(query.set_clauses.len());
    for clause in &query.set_clauses {
        params.push(DatabaseValue::from_json(&clause.value));
        placeholders.push(dialect.placeholder(params.len()));
    }
    format!(
        "INSERT INTO {} ({}) VALUES ({})",
        dialect.quote(&query.table),
        columns.join(", "),
        placeholders.join(", ")
    )
}

fn build_update<M>(
    query: &QueryBuilder<M>,
    dialect: SqlDialect,
    params: &mut Vec<DatabaseValue>,
) -> String {
    let mut assignments = Vec::new();
    for clause in &query.set_clauses {
        params.push(DatabaseValue::from_json(&clause.value));
        assignments.push(format!(
            "{} = {}",
            dialect.quote(&clause.column),
            dialect.placeholder(params.len())
        ));
    }
    for (column, amount) in &query.increments {
        params.push(DatabaseValue::Int64(*amount));
        let quoted = dialect.quote(column);
        assignments.push(format!(
            "{} = {} + {}",
            quoted,
            quoted,
            dialect.placeholder(params.len())
        ));
    }
    let mut sql = format!(
        "UPDATE {} SET {}",
        dialect.quote(&query.table),
        assignments.join(", ")
    );
    push_where(&query.conditions, dialect, &mut sql, params);
    sql
}

fn build_delete<M>(
    query: &QueryBuilder<M>,
    dialect: SqlDialect,
    params: &mut Vec<DatabaseValue>,
) -> String {
    let mut sql = format!("DELETE FROM {}", dialect.quote(&query.table));
    push_where(&query.conditions, dialect, &mut sql, params);
    sql
}

fn push_where(
    conditions: &[ConditionNode],
    dialect: SqlDialect,
    sql: &mut String,
    params: &mut Vec<DatabaseValue>,
) {
    if conditions.is_empty() {
        return;
    }
    sql.push_str(" WHERE ");
    let rendered: Vec<String> = conditions
        .iter()
        .map(|node| render_node(node, dialect, params))
        .collect();
    sql.push_str(&rendered.join(" AND "));
}

fn render_node(node: &ConditionNode, dialect: SqlDialect, params: &mut Vec<DatabaseValue>) -> String {
    match node {
        ConditionNode::Condition(condition) => render_condition(condition, dialect, params),
        ConditionNode::Or(nodes) => {
            let parts: Vec<String> = nodes
                .iter()
                .map(|n| render_node(n, dialect, params))
                .collect();
            format!("({})", parts.join(" OR "))
        }
        ConditionNode::And(nodes) => {
            let parts: Vec<String> = nodes
                .iter()
                .map(|n| render_node(n, dialect, params))
                .collect();
            format!("({})", parts.join(" AND "))
        }
    }
}

fn render_condition(
    condition: &Condition,
    dialect: SqlDialect,
    params: &mut Vec<DatabaseValue>,
) -> String {
    let column = dialect.quote(&condition.column);
    match condition.operator {
        Operator::IsNull | Operator::IsNotNull => {
            format!("{} {}", column, condition.operator)
        }
        Operator::In | Operator::NotIn => {
            if condition.values.is_empty() {
                // IN over an empty set matches nothing; keep the statement valid.
                return match condition.operator {
                    Operator::In => "1 = 0".to_string(),
                    _ => "1 = 1".to_string(),
                };
            }
            let mut placeholders = Vec::with_capacity(condition.values.len());
            for value in &condition.values {
                params.push(DatabaseValue::from_json(value));
                placeholders.push(dialect.placeholder(params.len()));
            }
            format!("{} {} ({})", column, condition.operator, placeholders.join(", "))
        }
        _ => {
            let value = condition.value.as_ref().cloned().unwrap_or(serde_json::Value::Null);
            params.push(DatabaseValue::from_json(&value));
            format!("{} {} {}", column, condition.operator, dialect.placeholder(params.len()))
        }
    }
}
