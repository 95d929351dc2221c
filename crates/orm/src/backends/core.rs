//! Core database backend traits
//!
//! These traits abstract away driver-specific row and connection handling and
//! are the boundary across which the ORM receives row-like tuples.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::Value as JsonValue;

use crate::error::{ModelError, ModelResult};

/// Abstract database connection. Implementations own their interior
/// mutability; the ORM only ever holds `&dyn DatabaseConnection`.
#[async_trait]
pub trait DatabaseConnection: Send + Sync {
    /// Execute a statement and return the affected row count
    async fn execute(&self, sql: &str, params: &[DatabaseValue]) -> ModelResult<u64>;

    /// Execute a query and return all result rows
    async fn fetch_all(
        &self,
        sql: &str,
        params: &[DatabaseValue],
    ) -> ModelResult<Vec<Box<dyn DatabaseRow>>>;

    /// Execute a query and return the first result row, if any
    async fn fetch_optional(
        &self,
        sql: &str,
        params: &[DatabaseValue],
    ) -> ModelResult<Option<Box<dyn DatabaseRow>>>;
}

/// Abstract database row
pub trait DatabaseRow: Send + Sync {
    /// Get a column value by name
    fn get(&self, name: &str) -> ModelResult<DatabaseValue>;

    /// Get the column names of this row
    fn column_names(&self) -> Vec<String>;

    /// Convert the row into an attribute map
    fn to_map(&self) -> ModelResult<BTreeMap<String, JsonValue>> {
        let mut map = BTreeMap::new();
        for name in self.column_names() {
            let value = self.get(&name)?;
            map.insert(name, value.to_json());
        }
        Ok(map)
    }
}

/// Database value enumeration for type-safe parameter binding
#[derive(Debug, Clone, PartialEq)]
pub enum DatabaseValue {
    Null,
    Bool(bool),
    Int64(i64),
    Float64(f64),
    String(String),
    Uuid(uuid::Uuid),
    DateTime(chrono::DateTime<chrono::Utc>),
    Date(chrono::NaiveDate),
    Json(JsonValue),
    Array(Vec<DatabaseValue>),
}

impl DatabaseValue {
    /// Check if the value is null
    pub fn is_null(&self) -> bool {
        matches!(self, DatabaseValue::Null)
    }

    /// Convert to a JSON value
    pub fn to_json(&self) -> JsonValue {
        match self {
            DatabaseValue::Null => JsonValue::Null,
            DatabaseValue::Bool(b) => JsonValue::Bool(*b),
            DatabaseValue::Int64(i) => JsonValue::Number(serde_json::Number::from(*i)),
            DatabaseValue::Float64(f) => serde_json::Number::from_f64(*f)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null),
            DatabaseValue::String(s) => JsonValue::String(s.clone()),
            DatabaseValue::Uuid(u) => JsonValue::String(u.to_string()),
            DatabaseValue::DateTime(dt) => JsonValue::String(dt.to_rfc3339()),
            DatabaseValue::Date(d) => JsonValue::String(d.to_string()),
            DatabaseValue::Json(j) => j.clone(),
            DatabaseValue::Array(arr) => {
                JsonValue::Array(arr.iter().map(|v| v.to_json()).collect())
            }
        }
    }

    /// Create a DatabaseValue from a JSON value
    pub fn from_json(json: JsonValue) -> Self {
        match json {
            JsonValue::Null => DatabaseValue::Null,
            JsonValue::Bool(b) => DatabaseValue::Bool(b),
            JsonValue::Number(n) => {
                if let Some(i) = n.as_i64() {
                    DatabaseValue::Int64(i)
                } else if let Some(f) = n.as_f64() {
                    DatabaseValue::Float64(f)
                } else {
                    DatabaseValue::Null
                }
            }
            JsonValue::String(s) => DatabaseValue::String(s),
            JsonValue::Array(arr) => {
                DatabaseValue::Array(arr.into_iter().map(DatabaseValue::from_json).collect())
            }
            JsonValue::Object(_) => DatabaseValue::Json(json),
        }
    }
}

impl From<bool> for DatabaseValue {
    fn from(value: bool) -> Self {
        DatabaseValue::Bool(value)
    }
}

impl From<i64> for DatabaseValue {
    fn from(value: i64) -> Self {
        DatabaseValue::Int64(value)
    }
}

impl From<i32> for DatabaseValue {
    fn from(value: i32) -> Self {
        DatabaseValue::Int64(i64::from(value))
    }
}

impl From<f64> for DatabaseValue {
    fn from(value: f64) -> Self {
        DatabaseValue::Float64(value)
    }
}

impl From<String> for DatabaseValue {
    fn from(value: String) -> Self {
        DatabaseValue::String(value)
    }
}

impl From<&str> for DatabaseValue {
    fn from(value: &str) -> Self {
        DatabaseValue::String(value.to_string())
    }
}

impl From<uuid::Uuid> for DatabaseValue {
    fn from(value: uuid::Uuid) -> Self {
        DatabaseValue::Uuid(value)
    }
}

impl From<chrono::DateTime<chrono::Utc>> for DatabaseValue {
    fn from(value: chrono::DateTime<chrono::Utc>) -> Self {
        DatabaseValue::DateTime(value)
    }
}

impl From<chrono::NaiveDate> for DatabaseValue {
    fn from(value: chrono::NaiveDate) -> Self {
        DatabaseValue::Date(value)
    }
}

impl<T> From<Option<T>> for DatabaseValue
where
    T: Into<DatabaseValue>,
{
    fn from(value: Option<T>) -> Self {
        match value {
            Some(v) => v.into(),
            None => DatabaseValue::Null,
        }
    }
}

/// Convert a fetched row into the attribute map the hydrator consumes,
/// reporting a `ColumnNotFound` for rows that cannot be fully read.
pub(crate) fn row_to_attributes(
    row: &dyn DatabaseRow,
) -> ModelResult<BTreeMap<String, JsonValue>> {
    row.to_map()
        .map_err(|e| match e {
            ModelError::ColumnNotFound(c) => ModelError::ColumnNotFound(c),
            other => ModelError::Serialization(other.to_string()),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_json_round_trip() {
        let value = DatabaseValue::from_json(json!(42));
        assert_eq!(value, DatabaseValue::Int64(42));
        assert_eq!(value.to_json(), json!(42));

        let value = DatabaseValue::from_json(json!("hello"));
        assert_eq!(value.to_json(), json!("hello"));

        let value = DatabaseValue::from_json(JsonValue::Null);
        assert!(value.is_null());
    }

    #[test]
    fn test_datetime_serializes_as_rfc3339() {
        let dt = chrono::DateTime::parse_from_rfc3339("2024-03-01T10:00:00Z")
            .unwrap()
            .with_timezone(&chrono::Utc);
        let value = DatabaseValue::DateTime(dt);
        assert_eq!(value.to_json(), json!("2024-03-01T10:00:00+00:00"));
    }

    #[test]
    fn test_option_conversion() {
        let some: DatabaseValue = Some(7i64).into();
        assert_eq!(some, DatabaseValue::Int64(7));
        let none: DatabaseValue = Option::<i64>::None.into();
        assert!(none.is_null());
    }
}
