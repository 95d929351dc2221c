//! PostgreSQL backend over sqlx
//!
//! Wraps a `PgPool` behind [`DatabaseConnection`] so the ORM core stays
//! driver-agnostic. Column values are decoded by Postgres type name into
//! [`DatabaseValue`].

use async_trait::async_trait;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{Column, Pool, Postgres, Row as SqlxRow, TypeInfo};

use super::core::{DatabaseConnection, DatabaseRow, DatabaseValue};
use crate::error::{ModelError, ModelResult};

/// PostgreSQL connection implementation backed by a sqlx pool
pub struct PostgresConnection {
    pool: Pool<Postgres>,
}

impl PostgresConnection {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// Connect to the given database URL with default pool settings
    pub async fn connect(database_url: &str) -> ModelResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .map_err(|e| {
                ModelError::Connection(format!("Failed to create PostgreSQL pool: {}", e))
            })?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &Pool<Postgres> {
        &self.pool
    }
}

#[async_trait]
impl DatabaseConnection for PostgresConnection {
    async fn execute(&self, sql: &str, params: &[DatabaseValue]) -> ModelResult<u64> {
        tracing::debug!(sql = sql, "executing statement");
        let mut query = sqlx::query(sql);
        for param in params {
            query = bind_database_value(query, param)?;
        }
        let result = query
            .execute(&self.pool)
            .await
            .map_err(|e| ModelError::Database(format!("Query execution failed: {}", e)))?;
        Ok(result.rows_affected())
    }

    async fn fetch_all(
        &self,
        sql: &str,
        params: &[DatabaseValue],
    ) -> ModelResult<Vec<Box<dyn DatabaseRow>>> {
        tracing::debug!(sql = sql, "fetching rows");
        let mut query = sqlx::query(sql);
        for param in params {
            query = bind_database_value(query, param)?;
        }
        let rows = query
            .fetch_all(&self.pool)
            .await
            .map_err(|e| ModelError::Database(format!("Query fetch failed: {}", e)))?;
        Ok(rows
            .into_iter()
            .map(|row| Box::new(PostgresRow::new(row)) as Box<dyn DatabaseRow>)
            .collect())
    }

    async fn fetch_optional(
        &self,
        sql: &str,
        params: &[DatabaseValue],
    ) -> ModelResult<Option<Box<dyn DatabaseRow>>> {
        let mut query = sqlx::query(sql);
        for param in params {
            query = bind_database_value(query, param)?;
        }
        let row = query
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| ModelError::Database(format!("Query fetch failed: {}", e)))?;
        Ok(row.map(|r| Box::new(PostgresRow::new(r)) as Box<dyn DatabaseRow>))
    }
}

/// One fetched PostgreSQL row
pub struct PostgresRow {
    row: PgRow,
}

impl PostgresRow {
    pub fn new(row: PgRow) -> Self {
        Self { row }
    }
}

impl DatabaseRow for PostgresRow {
    fn get(&self, name: &str) -> ModelResult<DatabaseValue> {
        let index = self
            .row
            .columns()
            .iter()
            .position(|col| col.name() == name)
            .ok_or_else(|| ModelError::ColumnNotFound(name.to_string()))?;
        decode_column(&self.row, index)
    }

    fn column_names(&self) -> Vec<String> {
        self.row
            .columns()
            .iter()
            .map(|col| col.name().to_string())
            .collect()
    }
}

/// Bind a DatabaseValue to a sqlx query
fn bind_database_value<'a>(
    query: sqlx::query::Query<'a, Postgres, sqlx::postgres::PgArguments>,
    value: &DatabaseValue,
) -> ModelResult<sqlx::query::Query<'a, Postgres, sqlx::postgres::PgArguments>> {
    match value {
        DatabaseValue::Null => Ok(query.bind(Option::<String>::None)),
        DatabaseValue::Bool(b) => Ok(query.bind(*b)),
        DatabaseValue::Int64(i) => Ok(query.bind(*i)),
        DatabaseValue::Float64(f) => Ok(query.bind(*f)),
        DatabaseValue::String(s) => Ok(query.bind(s.clone())),
        DatabaseValue::Uuid(u) => Ok(query.bind(*u)),
        DatabaseValue::DateTime(dt) => Ok(query.bind(*dt)),
        DatabaseValue::Date(d) => Ok(query.bind(*d)),
        DatabaseValue::Json(j) => Ok(query.bind(j.clone())),
        DatabaseValue::Array(_) => Err(ModelError::Query(
            "Array binding is not supported for PostgreSQL parameters".to_string(),
        )),
    }
}

/// Decode a PostgreSQL column value into a DatabaseValue by type name
fn decode_column(row: &PgRow, index: usize) -> ModelResult<DatabaseValue> {
    let column = &row.columns()[index];
    let type_name = column.type_info().name();

    let decode_err =
        |e: sqlx::Error| ModelError::Database(format!("Failed to decode column: {}", e));

    match type_name {
        "BOOL" => Ok(row
            .try_get::<Option<bool>, _>(index)
            .map_err(decode_err)?
            .map(DatabaseValue::Bool)
            .unwrap_or(DatabaseValue::Null)),
        "INT2" | "INT4" | "INT8" => Ok(row
            .try_get::<Option<i64>, _>(index)
            .map_err(decode_err)?
            .map(DatabaseValue::Int64)
            .unwrap_or(DatabaseValue::Null)),
        "FLOAT4" | "FLOAT8" | "NUMERIC" => Ok(row
            .try_get::<Option<f64>, _>(index)
            .map_err(decode_err)?
            .map(DatabaseValue::Float64)
            .unwrap_or(DatabaseValue::Null)),
        "UUID" => Ok(row
            .try_get::<Option<uuid::Uuid>, _>(index)
            .map_err(decode_err)?
            .map(DatabaseValue::Uuid)
            .unwrap_or(DatabaseValue::Null)),
        "TIMESTAMPTZ" | "TIMESTAMP" => Ok(row
            .try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(index)
            .map_err(decode_err)?
            .map(DatabaseValue::DateTime)
            .unwrap_or(DatabaseValue::Null)),
        "DATE" => Ok(row
            .try_get::<Option<chrono::NaiveDate>, _>(index)
            .map_err(decode_err)?
            .map(DatabaseValue::Date)
            .unwrap_or(DatabaseValue::Null)),
        "JSON" | "JSONB" => Ok(row
            .try_get::<Option<serde_json::Value>, _>(index)
            .map_err(decode_err)?
            .map(DatabaseValue::Json)
            .unwrap_or(DatabaseValue::Null)),
        _ => Ok(row
            .try_get::<Option<String>, _>(index)
            .map_err(decode_err)?
            .map(DatabaseValue::String)
            .unwrap_or(DatabaseValue::Null)),
    }
}
