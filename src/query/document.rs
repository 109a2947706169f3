//! Document-store compilation
//!
//! Renders the query descriptor into a MongoDB filter/update command.
//! Filters are built as JSON here and converted to BSON inside the
//! adapter, keeping the builder free of driver types.

use serde_json::{json, Map, Value};

use crate::adapter::{DocumentCommand, Statement};
use crate::error::{OrmError, OrmResult};

use super::builder::QueryBuilder;
use super::types::*;

/// Compile a descriptor for the document backend.
pub fn compile<M>(query: &QueryBuilder<M>) -> OrmResult<Statement> {
    let collection = query.table.clone();
    let filter = build_filter(&query.conditions)?;

    let command = match query.kind {
        QueryKind::Select => DocumentCommand::Find {
            collection,
            filter,
            sort: build_sort(&query.order_by),
            skip: query.offset,
            limit: query.limit,
            projection: build_projection(&query.select_columns),
        },
        QueryKind::Count => DocumentCommand::Count { collection, filter },
        QueryKind::Insert => {
            let mut document = Map::new();
            for clause in &query.set_clauses {
                document.insert(clause.column.clone(), clause.value.clone());
            }
            DocumentCommand::InsertOne {
                collection,
                document: Value::Object(document),
            }
        }
        QueryKind::Update => {
            let mut update = Map::new();
            if !query.set_clauses.is_empty() {
                let mut set = Map::new();
                for clause in &query.set_clauses {
                    set.insert(clause.column.clone(), clause.value.clone());
                }
                update.insert("$set".to_string(), Value::Object(set));
            }
            if !query.increments.is_empty() {
                let mut inc = Map::new();
                for (column, amount) in &query.increments {
                    inc.insert(column.clone(), json!(amount));
                }
                update.insert("$inc".to_string(), Value::Object(inc));
            }
            if update.is_empty() {
                return Err(OrmError::Query("update has no assignments".to_string()));
            }
            DocumentCommand::UpdateMany {
                collection,
                filter,
                update: Value::Object(update),
            }
        }
        QueryKind::Delete => DocumentCommand::DeleteMany { collection, filter },
    };

    Ok(Statement::Document(command))
}

fn build_filter(conditions: &[ConditionNode]) -> OrmResult<Value> {
    match conditions.len() {
        0 => Ok(Value::Object(Map::new())),
        1 => node_to_filter(&conditions[0]),
        _ => {
            let parts: Vec<Value> = conditions
                .iter()
                .map(node_to_filter)
                .collect::<OrmResult<_>>()?;
            Ok(json!({ "$and": parts }))
        }
    }
}

fn node_to_filter(node: &ConditionNode) -> OrmResult<Value> {
    match node {
        ConditionNode::Condition(condition) => condition_to_filter(condition),
        ConditionNode::Or(nodes) => {
            let parts: Vec<Value> = nodes.iter().map(node_to_filter).collect::<OrmResult<_>>()?;
            Ok(json!({ "$or": parts }))
        }
        ConditionNode::And(nodes) => {
            let parts: Vec<Value> = nodes.iter().map(node_to_filter).collect::<OrmResult<_>>()?;
            Ok(json!({ "$and": parts }))
        }
    }
}

fn condition_to_filter(condition: &Condition) -> OrmResult<Value> {
    let field = condition.column.clone();
    match condition.operator {
        // null and missing fields are equivalent under this filter, which
        // is what soft-delete visibility relies on
        Operator::IsNull => Ok(json!({ field: Value::Null })),
        Operator::IsNotNull => Ok(json!({ field: { "$ne": Value::Null } })),
        Operator::Like => {
            let pattern = match &condition.value {
                Some(Value::String(s)) => like_to_regex(s),
                _ => return Err(OrmError::Query("LIKE requires a string pattern".to_string())),
            };
            Ok(json!({ field: { "$regex": pattern } }))
        }
        Operator::In => Ok(json!({ field: { "$in": condition.values.clone() } })),
        Operator::NotIn => Ok(json!({ field: { "$nin": condition.values.clone() } })),
        _ => {
            let token = condition
                .operator
                .mongo_token()
                .ok_or_else(|| OrmError::Query(format!("operator {} has no document form", condition.operator)))?;
            let value = condition.value.clone().unwrap_or(Value::Null);
            Ok(json!({ field: { token: value } }))
        }
    }
}

/// Translate a SQL LIKE pattern into an anchored regex.
fn like_to_regex(pattern: &str) -> String {
    let mut regex = String::with_capacity(pattern.len() + 2);
    regex.push('^');
    for ch in pattern.chars() {
        match ch {
            '%' => regex.push_str(".*"),
            '_' => regex.push('.'),
            c if ".+*?()[]{}|^$\\".contains(c) => {
                regex.push('\\');
                regex.push(c);
            }
            c => regex.push(c),
        }
    }
    regex.push('$');
    regex
}

fn build_sort(order_by: &[(String, OrderDirection)]) -> Option<Value> {
    if order_by.is_empty() {
        return None;
    }
    let mut sort = Map::new();
    for (column, direction) in order_by {
        let dir = match direction {
            OrderDirection::Asc => 1,
            OrderDirection::Desc => -1,
        };
        sort.insert(column.clone(), json!(dir));
    }
    Some(Value::Object(sort))
}

fn build_projection(columns: &[String]) -> Option<Value> {
    if columns.is_empty() {
        return None;
    }
    let mut projection = Map::new();
    for column in columns {
        projection.insert(column.clone(), json!(1));
    }
    Some(Value::Object(projection))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::QueryBuilder;

    fn command_of(stmt: Statement) -> DocumentCommand {
        match stmt {
            Statement::Document(cmd) => cmd,
            other => panic!("expected document statement, got {:?}", other),
        }
    }

    #[test]
    fn find_filter_uses_comparison_operators() {
        let query = QueryBuilder::<()>::table("users")
            .where_eq("status", "active")
            .where_gt("age", 21)
            .order_by_desc("created_at")
            .limit(10)
            .offset(5);
        match command_of(compile(&query).unwrap()) {
            DocumentCommand::Find { collection, filter, sort, skip, limit, .. } => {
                assert_eq!(collection, "users");
                assert_eq!(
                    filter,
                    json!({ "$and": [
                        { "status": { "$eq": "active" } },
                        { "age": { "$gt": 21 } }
                    ]})
                );
                assert_eq!(sort, Some(json!({ "created_at": -1 })));
                assert_eq!(skip, Some(5));
                assert_eq!(limit, Some(10));
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn or_group_becomes_dollar_or() {
        let query = QueryBuilder::<()>::table("users")
            .or_group(|g| g.when_eq("role", "admin").when_eq("role", "owner"));
        match command_of(compile(&query).unwrap()) {
            DocumentCommand::Find { filter, .. } => {
                assert_eq!(
                    filter,
                    json!({ "$or": [
                        { "role": { "$eq": "admin" } },
                        { "role": { "$eq": "owner" } }
                    ]})
                );
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn null_check_matches_missing_fields_too() {
        let query = QueryBuilder::<()>::table("users").where_null("deleted_at");
        match command_of(compile(&query).unwrap()) {
            DocumentCommand::Find { filter, .. } => {
                assert_eq!(filter, json!({ "deleted_at": Value::Null }));
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn update_splits_set_and_inc() {
        let mut fields = Map::new();
        fields.insert("name".into(), json!("ada"));
        let query = QueryBuilder::<()>::table("users")
            .update(fields)
            .increment("logins", 1)
            .where_eq("id", "u-1");
        match command_of(compile(&query).unwrap()) {
            DocumentCommand::UpdateMany { filter, update, .. } => {
                assert_eq!(filter, json!({ "id": { "$eq": "u-1" } }));
                assert_eq!(
                    update,
                    json!({ "$set": { "name": "ada" }, "$inc": { "logins": 1 } })
                );
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn like_pattern_translates_to_anchored_regex() {
        assert_eq!(like_to_regex("ada%"), "^ada.*$");
        assert_eq!(like_to_regex("%a.b_"), "^.*a\\.b.$");
    }
}
