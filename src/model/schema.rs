//! Declarative field schemas and index definitions
//!
//! A model describes its persisted fields with [`SchemaDefinition`]; the
//! save path validates candidate data against it before anything touches
//! the database. All failing rules are reported together.

use async_trait::async_trait;
use regex::Regex;
use serde_json::{Map, Value as JsonValue};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use super::validation::ValidationErrors;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    String,
    Integer,
    Float,
    Boolean,
    DateTime,
    Uuid,
    Json,
}

impl FieldType {
    fn matches(&self, value: &JsonValue) -> bool {
        match self {
            FieldType::String => value.is_string(),
            FieldType::Integer => value.is_i64() || value.is_u64(),
            FieldType::Float => value.is_number(),
            FieldType::Boolean => value.is_boolean(),
            FieldType::DateTime => value
                .as_str()
                .map(|s| chrono::DateTime::parse_from_rfc3339(s).is_ok())
                .unwrap_or(false),
            FieldType::Uuid => value
                .as_str()
                .map(|s| uuid::Uuid::parse_str(s).is_ok())
                .unwrap_or(false),
            FieldType::Json => true,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            FieldType::String => "string",
            FieldType::Integer => "integer",
            FieldType::Float => "float",
            FieldType::Boolean => "boolean",
            FieldType::DateTime => "datetime",
            FieldType::Uuid => "uuid",
            FieldType::Json => "json",
        }
    }
}

/// Model-defined rule that can run arbitrary (possibly async) checks
#[async_trait]
pub trait CustomRule: Send + Sync {
    /// Returns a human-readable message on failure.
    async fn check(&self, field: &str, value: &JsonValue) -> Result<(), String>;
}

/// Constraints for one field
#[derive(Clone)]
pub struct FieldRule {
    pub field_type: FieldType,
    pub required: bool,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub min_length: Option<usize>,
    pub max_length: Option<usize>,
    pub pattern: Option<Regex>,
    pub default: Option<JsonValue>,
    custom: Option<Arc<dyn CustomRule>>,
}

impl fmt::Debug for FieldRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldRule")
            .field("field_type", &self.field_type)
            .field("required", &self.required)
            .field("min", &self.min)
            .field("max", &self.max)
            .field("min_length", &self.min_length)
            .field("max_length", &self.max_length)
            .field("pattern", &self.pattern.as_ref().map(Regex::as_str))
            .field("default", &self.default)
            .field("custom", &self.custom.is_some())
            .finish()
    }
}

impl FieldRule {
    pub fn new(field_type: FieldType) -> Self {
        Self {
            field_type,
            required: false,
            min: None,
            max: None,
            min_length: None,
            max_length: None,
            pattern: None,
            default: None,
            custom: None,
        }
    }

    pub fn string() -> Self {
        Self::new(FieldType::String)
    }

    pub fn integer() -> Self {
        Self::new(FieldType::Integer)
    }

    pub fn float() -> Self {
        Self::new(FieldType::Float)
    }

    pub fn boolean() -> Self {
        Self::new(FieldType::Boolean)
    }

    pub fn datetime() -> Self {
        Self::new(FieldType::DateTime)
    }

    pub fn uuid() -> Self {
        Self::new(FieldType::Uuid)
    }

    pub fn json() -> Self {
        Self::new(FieldType::Json)
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn min(mut self, min: f64) -> Self {
        self.min = Some(min);
        self
    }

    pub fn max(mut self, max: f64) -> Self {
        self.max = Some(max);
        self
    }

    pub fn min_length(mut self, len: usize) -> Self {
        self.min_length = Some(len);
        self
    }

    pub fn max_length(mut self, len: usize) -> Self {
        self.max_length = Some(len);
        self
    }

    pub fn pattern(mut self, pattern: Regex) -> Self {
        self.pattern = Some(pattern);
        self
    }

    pub fn default_value(mut self, value: JsonValue) -> Self {
        self.default = Some(value);
        self
    }

    pub fn custom(mut self, rule: Arc<dyn CustomRule>) -> Self {
        self.custom = Some(rule);
        self
    }

    async fn validate_into(&self, field: &str, value: Option<&JsonValue>, out: &mut ValidationErrors) {
        let value = match value {
            Some(v) if !v.is_null() => v,
            _ => {
                if self.required {
                    out.add(field, "required", format!("{} is required", field));
                }
                return;
            }
        };

        if !self.field_type.matches(value) {
            out.add(
                field,
                "type",
                format!("{} must be a {}", field, self.field_type.name()),
            );
            // Range/length checks would only produce noise on the wrong type.
            return;
        }

        if let Some(number) = value.as_f64() {
            if let Some(min) = self.min {
                if number < min {
                    out.add(field, "min", format!("{} must be at least {}", field, min));
                }
            }
            if let Some(max) = self.max {
                if number > max {
                    out.add(field, "max", format!("{} must be at most {}", field, max));
                }
            }
        }

        if let Some(text) = value.as_str() {
            let length = text.chars().count();
            if let Some(min) = self.min_length {
                if length < min {
                    out.add(
                        field,
                        "min_length",
                        format!("{} must be at least {} characters", field, min),
                    );
                }
            }
            if let Some(max) = self.max_length {
                if length > max {
                    out.add(
                        field,
                        "max_length",
                        format!("{} must be at most {} characters", field, max),
                    );
                }
            }
            if let Some(pattern) = &self.pattern {
                if !pattern.is_match(text) {
                    out.add(field, "format", format!("{} has an invalid format", field));
                }
            }
        }

        if let Some(custom) = &self.custom {
            if let Err(message) = custom.check(field, value).await {
                out.add(field, "custom", message);
            }
        }
    }
}

/// All persisted fields of a model and their rules
#[derive(Debug, Clone, Default)]
pub struct SchemaDefinition {
    fields: BTreeMap<String, FieldRule>,
}

impl SchemaDefinition {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, name: impl Into<String>, rule: FieldRule) -> Self {
        self.fields.insert(name.into(), rule);
        self
    }

    pub fn rule(&self, name: &str) -> Option<&FieldRule> {
        self.fields.get(name)
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    /// Checks `data` against every rule, collecting all failures.
    pub async fn validate(&self, data: &Map<String, JsonValue>) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        for (name, rule) in &self.fields {
            rule.validate_into(name, data.get(name), &mut errors).await;
        }
        errors.into_result()
    }

    /// Fills in declared defaults for fields the data leaves unset.
    pub fn apply_defaults(&self, data: &mut Map<String, JsonValue>) {
        for (name, rule) in &self.fields {
            if let Some(default) = &rule.default {
                let unset = match data.get(name) {
                    None => true,
                    Some(JsonValue::Null) => true,
                    Some(_) => false,
                };
                if unset {
                    data.insert(name.clone(), default.clone());
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexKind {
    Ordinary,
    Unique,
    Text,
    Geospatial,
}

/// One secondary index a model wants on its table
#[derive(Debug, Clone)]
pub struct IndexDefinition {
    pub name: Option<String>,
    pub fields: Vec<String>,
    pub kind: IndexKind,
}

impl IndexDefinition {
    pub fn new(fields: Vec<String>, kind: IndexKind) -> Self {
        Self {
            name: None,
            fields,
            kind,
        }
    }

    pub fn ordinary(field: impl Into<String>) -> Self {
        Self::new(vec![field.into()], IndexKind::Ordinary)
    }

    pub fn unique(field: impl Into<String>) -> Self {
        Self::new(vec![field.into()], IndexKind::Unique)
    }

    pub fn text(field: impl Into<String>) -> Self {
        Self::new(vec![field.into()], IndexKind::Text)
    }

    pub fn geospatial(field: impl Into<String>) -> Self {
        Self::new(vec![field.into()], IndexKind::Geospatial)
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Explicit name if given, otherwise `{table}_{fields}_idx`.
    pub fn name_for(&self, table: &str) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => format!("{}_{}_idx", table, self.fields.join("_")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema() -> SchemaDefinition {
        SchemaDefinition::new()
            .field("name", FieldRule::string().required().max_length(10))
            .field("age", FieldRule::integer().min(0.0).max(150.0))
            .field(
                "email",
                FieldRule::string()
                    .required()
                    .pattern(Regex::new(r"^[^@\s]+@[^@\s]+$").unwrap()),
            )
    }

    #[tokio::test]
    async fn all_failures_are_collected_in_one_pass() {
        let mut data = Map::new();
        data.insert("age".to_string(), json!(-3));
        data.insert("email".to_string(), json!("not-an-email"));

        let errors = schema().validate(&data).await.unwrap_err();
        assert_eq!(errors.len(), 3);
        assert_eq!(errors.field_errors("name")[0].code, "required");
        assert_eq!(errors.field_errors("age")[0].code, "min");
        assert_eq!(errors.field_errors("email")[0].code, "format");
    }

    #[tokio::test]
    async fn valid_data_passes() {
        let mut data = Map::new();
        data.insert("name".to_string(), json!("Ada"));
        data.insert("age".to_string(), json!(36));
        data.insert("email".to_string(), json!("ada@example.com"));
        assert!(schema().validate(&data).await.is_ok());
    }

    #[tokio::test]
    async fn wrong_type_skips_range_checks() {
        let mut data = Map::new();
        data.insert("name".to_string(), json!("Ada"));
        data.insert("age".to_string(), json!("old"));
        data.insert("email".to_string(), json!("ada@example.com"));

        let errors = schema().validate(&data).await.unwrap_err();
        assert_eq!(errors.field_errors("age").len(), 1);
        assert_eq!(errors.field_errors("age")[0].code, "type");
    }

    #[tokio::test]
    async fn custom_rules_run_after_builtins() {
        struct NoAdmin;

        #[async_trait]
        impl CustomRule for NoAdmin {
            async fn check(&self, _field: &str, value: &JsonValue) -> Result<(), String> {
                if value.as_str() == Some("admin") {
                    Err("admin is reserved".to_string())
                } else {
                    Ok(())
                }
            }
        }

        let schema = SchemaDefinition::new()
            .field("name", FieldRule::string().custom(Arc::new(NoAdmin)));
        let mut data = Map::new();
        data.insert("name".to_string(), json!("admin"));

        let errors = schema.validate(&data).await.unwrap_err();
        assert_eq!(errors.field_errors("name")[0].code, "custom");
    }

    #[test]
    fn defaults_fill_only_unset_fields() {
        let schema = SchemaDefinition::new()
            .field("status", FieldRule::string().default_value(json!("active")))
            .field("name", FieldRule::string().default_value(json!("anonymous")));
        let mut data = Map::new();
        data.insert("name".to_string(), json!("Ada"));
        data.insert("status".to_string(), JsonValue::Null);

        schema.apply_defaults(&mut data);
        assert_eq!(data["status"], json!("active"));
        assert_eq!(data["name"], json!("Ada"));
    }

    #[test]
    fn index_names_derive_from_table_and_fields() {
        let index = IndexDefinition::unique("email");
        assert_eq!(index.name_for("users"), "users_email_idx");
        let named = IndexDefinition::ordinary("age").named("age_lookup");
        assert_eq!(named.name_for("users"), "age_lookup");
    }
}
