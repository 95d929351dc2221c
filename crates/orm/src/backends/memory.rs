//! In-memory scripted connection
//!
//! Serves queued result sets in FIFO order and records every executed
//! statement, so tests can assert both the data flow and the exact number
//! and shape of statements the engine issued.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;

use super::core::{DatabaseConnection, DatabaseRow, DatabaseValue};
use crate::error::{ModelError, ModelResult};

/// One statement as it was handed to the connection
#[derive(Debug, Clone)]
pub struct ExecutedStatement {
    pub sql: String,
    pub params: Vec<DatabaseValue>,
}

#[derive(Default)]
struct MemoryState {
    results: VecDeque<Vec<MemoryRow>>,
    affected: VecDeque<u64>,
    log: Vec<ExecutedStatement>,
}

/// Scripted connection for tests. Queue result sets with [`push_rows`]
/// (consumed by fetches in order) and affected-row counts with
/// [`push_affected`] (consumed by executes; defaults to 1 when exhausted).
///
/// [`push_rows`]: MemoryConnection::push_rows
/// [`push_affected`]: MemoryConnection::push_affected
#[derive(Default)]
pub struct MemoryConnection {
    state: Mutex<MemoryState>,
}

impl MemoryConnection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a result set for the next fetch
    pub fn push_rows(&self, rows: Vec<MemoryRow>) {
        if let Ok(mut state) = self.state.lock() {
            state.results.push_back(rows);
        }
    }

    /// Queue an affected-row count for the next execute
    pub fn push_affected(&self, count: u64) {
        if let Ok(mut state) = self.state.lock() {
            state.affected.push_back(count);
        }
    }

    /// Everything executed so far, in order
    pub fn statements(&self) -> Vec<ExecutedStatement> {
        self.state
            .lock()
            .map(|s| s.log.clone())
            .unwrap_or_default()
    }

    /// Count of executed statements whose SQL starts with the given prefix
    pub fn statements_with_prefix(&self, prefix: &str) -> usize {
        self.statements()
            .iter()
            .filter(|s| s.sql.starts_with(prefix))
            .count()
    }

    fn lock(&self) -> ModelResult<std::sync::MutexGuard<'_, MemoryState>> {
        self.state
            .lock()
            .map_err(|_| ModelError::Connection("memory connection lock poisoned".to_string()))
    }
}

#[async_trait]
impl DatabaseConnection for MemoryConnection {
    async fn execute(&self, sql: &str, params: &[DatabaseValue]) -> ModelResult<u64> {
        let mut state = self.lock()?;
        state.log.push(ExecutedStatement {
            sql: sql.to_string(),
            params: params.to_vec(),
        });
        Ok(state.affected.pop_front().unwrap_or(1))
    }

    async fn fetch_all(
        &self,
        sql: &str,
        params: &[DatabaseValue],
    ) -> ModelResult<Vec<Box<dyn DatabaseRow>>> {
        let mut state = self.lock()?;
        state.log.push(ExecutedStatement {
            sql: sql.to_string(),
            params: params.to_vec(),
        });
        let rows = state.results.pop_front().unwrap_or_default();
        Ok(rows
            .into_iter()
            .map(|r| Box::new(r) as Box<dyn DatabaseRow>)
            .collect())
    }

    async fn fetch_optional(
        &self,
        sql: &str,
        params: &[DatabaseValue],
    ) -> ModelResult<Option<Box<dyn DatabaseRow>>> {
        let rows = self.fetch_all(sql, params).await?;
        Ok(rows.into_iter().next())
    }
}

/// A scripted row: column name to value
#[derive(Debug, Clone, Default)]
pub struct MemoryRow {
    columns: BTreeMap<String, DatabaseValue>,
}

impl MemoryRow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a row from column/value pairs
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<DatabaseValue>,
    {
        Self {
            columns: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    pub fn set(mut self, name: impl Into<String>, value: impl Into<DatabaseValue>) -> Self {
        self.columns.insert(name.into(), value.into());
        self
    }
}

impl DatabaseRow for MemoryRow {
    fn get(&self, name: &str) -> ModelResult<DatabaseValue> {
        self.columns
            .get(name)
            .cloned()
            .ok_or_else(|| ModelError::ColumnNotFound(name.to_string()))
    }

    fn column_names(&self) -> Vec<String> {
        self.columns.keys().cloned().collect()
    }
}

/// Shorthand used throughout the test suites
pub fn row<I, K, V>(pairs: I) -> MemoryRow
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<DatabaseValue>,
{
    MemoryRow::from_pairs(pairs)
}
