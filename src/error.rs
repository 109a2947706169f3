//! Error types for the database layer
//!
//! One taxonomy covers connection management, query execution, model
//! validation, and migrations. Cache failures have their own type in the
//! cache module because they are absorbed rather than propagated.

use crate::model::validation::ValidationErrors;

/// Result type alias for all database-layer operations
pub type OrmResult<T> = Result<T, OrmError>;

/// Error type for database-layer operations
#[derive(Debug, thiserror::Error)]
pub enum OrmError {
    /// Initial connect failed, or the pool is closed/unreachable
    #[error("Connection error: {0}")]
    Connection(String),

    /// Pool acquisition did not complete within the configured timeout
    #[error("Pool acquisition timed out after {timeout_seconds}s")]
    PoolTimeout { timeout_seconds: u64 },

    /// Field validation failed; every failing field is collected
    #[error("Validation failed: {0}")]
    Validation(ValidationErrors),

    /// Malformed statement or backend constraint violation, with the
    /// backend's native error text wrapped
    #[error("Query error: {0}")]
    Query(String),

    /// Update/delete targeted a record that no longer exists
    #[error("Record not found: {0}")]
    NotFound(String),

    /// A migration failed; the remaining sequence is halted
    #[error("Migration error: {0}")]
    Migration(String),

    /// Model <-> row mapping failed
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid configuration supplied by the external config loader
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl OrmError {
    /// Classify a sqlx error, separating pool timeouts from other
    /// connection and query failures.
    pub fn from_sqlx(err: sqlx::Error, acquire_timeout_seconds: u64) -> Self {
        match err {
            sqlx::Error::PoolTimedOut => OrmError::PoolTimeout {
                timeout_seconds: acquire_timeout_seconds,
            },
            sqlx::Error::PoolClosed => OrmError::Connection("pool is closed".to_string()),
            sqlx::Error::Io(e) => OrmError::Connection(e.to_string()),
            sqlx::Error::Database(e) => OrmError::Query(e.to_string()),
            other => OrmError::Query(other.to_string()),
        }
    }

    /// True when the error is worth retrying under the connect retry policy.
    pub fn is_transient(&self) -> bool {
        matches!(self, OrmError::Connection(_) | OrmError::PoolTimeout { .. })
    }
}

impl From<serde_json::Error> for OrmError {
    fn from(err: serde_json::Error) -> Self {
        OrmError::Serialization(err.to_string())
    }
}

impl From<ValidationErrors> for OrmError {
    fn from(errors: ValidationErrors) -> Self {
        OrmError::Validation(errors)
    }
}

impl From<mongodb::error::Error> for OrmError {
    fn from(err: mongodb::error::Error) -> Self {
        use mongodb::error::ErrorKind;
        match err.kind.as_ref() {
            ErrorKind::ServerSelection { message, .. } => OrmError::Connection(message.clone()),
            ErrorKind::Io(e) => OrmError::Connection(e.to_string()),
            _ => OrmError::Query(err.to_string()),
        }
    }
}
