//! Query execution against a database connection
//!
//! Bridges the builder to the backend boundary: parameters are converted to
//! `DatabaseValue`s, fetched rows come back as attribute maps.

use std::collections::BTreeMap;

use serde_json::Value;

use super::builder::QueryBuilder;
use crate::backends::core::{row_to_attributes, DatabaseConnection, DatabaseValue};
use crate::error::ModelResult;

impl QueryBuilder {
    fn bind_params(params: Vec<Value>) -> Vec<DatabaseValue> {
        params.into_iter().map(DatabaseValue::from_json).collect()
    }

    /// Fetch all rows as attribute maps
    pub async fn fetch_rows(
        &self,
        conn: &dyn DatabaseConnection,
    ) -> ModelResult<Vec<BTreeMap<String, Value>>> {
        let (sql, params) = self.to_sql_with_params();
        tracing::debug!(sql = %sql, "fetch");
        let rows = conn.fetch_all(&sql, &Self::bind_params(params)).await?;
        rows.iter().map(|row| row_to_attributes(row.as_ref())).collect()
    }

    /// Fetch the first row, if any
    pub async fn fetch_optional_row(
        &self,
        conn: &dyn DatabaseConnection,
    ) -> ModelResult<Option<BTreeMap<String, Value>>> {
        let (sql, params) = self.to_sql_with_params();
        tracing::debug!(sql = %sql, "fetch one");
        let row = conn.fetch_optional(&sql, &Self::bind_params(params)).await?;
        row.map(|r| row_to_attributes(r.as_ref())).transpose()
    }

    /// Execute a DML statement and return the affected row count
    pub async fn execute(&self, conn: &dyn DatabaseConnection) -> ModelResult<u64> {
        let (sql, params) = self.to_sql_with_params();
        tracing::debug!(sql = %sql, "execute");
        conn.execute(&sql, &Self::bind_params(params)).await
    }

    /// Execute an INSERT carrying a RETURNING clause and read the generated
    /// key from the returned row
    pub async fn insert_get_id(
        &self,
        conn: &dyn DatabaseConnection,
        key: &str,
    ) -> ModelResult<Option<Value>> {
        let (sql, params) = self.to_sql_with_params();
        tracing::debug!(sql = %sql, "insert");
        let row = conn.fetch_optional(&sql, &Self::bind_params(params)).await?;
        match row {
            Some(row) => Ok(Some(row.get(key)?.to_json())),
            None => Ok(None),
        }
    }

    /// Count matching rows
    pub async fn count(&self, conn: &dyn DatabaseConnection) -> ModelResult<i64> {
        let counter = self
            .clone()
            .select(vec!["COUNT(*) AS aggregate".to_string()])
            .strip_ordering();
        let row = counter.fetch_optional_row(conn).await?;
        Ok(row
            .and_then(|r| r.get("aggregate").and_then(Value::as_i64))
            .unwrap_or(0))
    }

    /// Collect a single column's values across all matching rows
    pub async fn pluck(
        &self,
        conn: &dyn DatabaseConnection,
        column: &str,
    ) -> ModelResult<Vec<Value>> {
        let rows = self
            .clone()
            .select(vec![column.to_string()])
            .fetch_rows(conn)
            .await?;
        Ok(rows
            .into_iter()
            .map(|mut r| r.remove(column).unwrap_or(Value::Null))
            .collect())
    }
}
