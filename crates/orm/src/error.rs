//! Error types for the ORM core
//!
//! Covers entity lookup failures, mass-assignment guarding, relation
//! resolution, and query building/execution.

use std::fmt;

/// Result type alias for entity operations
pub type ModelResult<T> = Result<T, ModelError>;

/// ORM error type alias
pub type OrmError = ModelError;

/// ORM result type alias
pub type OrmResult<T> = ModelResult<T>;

/// Error types for ORM operations
#[derive(Debug, Clone)]
pub enum ModelError {
    /// Database connection or query error
    Database(String),
    /// Entity not found in storage (carries the entity's table name)
    NotFound(String),
    /// A write to a guarded attribute was rejected
    MassAssignment(String),
    /// Primary key is missing or invalid
    MissingPrimaryKey,
    /// Relation resolution failed
    Relationship(String),
    /// The named relation is not declared on the entity type.
    /// Programmer error; callers are not expected to recover from this.
    UnknownRelation(String),
    /// Serialization/deserialization error
    Serialization(String),
    /// Query building error
    Query(String),
    /// Connection resolution error
    Connection(String),
    /// Entity definition / scope configuration error
    Configuration(String),
    /// A requested column was absent from the fetched row
    ColumnNotFound(String),
    /// Lifecycle hook error
    Event(String),
}

impl fmt::Display for ModelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelError::Database(msg) => write!(f, "Database error: {}", msg),
            ModelError::NotFound(table) => write!(f, "Record not found in table '{}'", table),
            ModelError::MassAssignment(key) => {
                write!(f, "Mass assignment rejected for attribute '{}'", key)
            }
            ModelError::MissingPrimaryKey => write!(f, "Primary key is missing or invalid"),
            ModelError::Relationship(msg) => write!(f, "Relationship error: {}", msg),
            ModelError::UnknownRelation(name) => {
                write!(f, "Relation '{}' is not declared on this entity type", name)
            }
            ModelError::Serialization(msg) => write!(f, "Serialization error: {}", msg),
            ModelError::Query(msg) => write!(f, "Query error: {}", msg),
            ModelError::Connection(msg) => write!(f, "Connection error: {}", msg),
            ModelError::Configuration(msg) => write!(f, "Configuration error: {}", msg),
            ModelError::ColumnNotFound(col) => write!(f, "Column '{}' not found in row", col),
            ModelError::Event(msg) => write!(f, "Event error: {}", msg),
        }
    }
}

impl std::error::Error for ModelError {}

// Convert from sqlx errors
impl From<sqlx::Error> for ModelError {
    fn from(err: sqlx::Error) -> Self {
        ModelError::Database(err.to_string())
    }
}

// Convert from serde_json errors
impl From<serde_json::Error> for ModelError {
    fn from(err: serde_json::Error) -> Self {
        ModelError::Serialization(err.to_string())
    }
}

// Convert from anyhow errors (adapter/backend boundary)
impl From<anyhow::Error> for ModelError {
    fn from(err: anyhow::Error) -> Self {
        ModelError::Database(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_carries_table_name() {
        let err = ModelError::NotFound("users".to_string());
        assert_eq!(err.to_string(), "Record not found in table 'users'");
    }

    #[test]
    fn test_mass_assignment_display() {
        let err = ModelError::MassAssignment("role".to_string());
        assert!(err.to_string().contains("role"));
    }

    #[test]
    fn test_unknown_relation_display() {
        let err = ModelError::UnknownRelation("posts".to_string());
        assert!(err.to_string().contains("posts"));
    }
}
