//! Query builder INSERT / UPDATE / DELETE operations

use serde_json::Value;

use super::builder::QueryBuilder;
use super::types::{QueryType, SetClause};

impl QueryBuilder {
    /// Turn this builder into an INSERT for the given table
    pub fn insert_into(mut self, table: &str) -> Self {
        self.query_type = QueryType::Insert;
        self.insert_table = Some(table.to_string());
        self
    }

    /// Turn this builder into an UPDATE for the given table
    pub fn update_table_named(mut self, table: &str) -> Self {
        self.query_type = QueryType::Update;
        self.update_table = Some(table.to_string());
        self
    }

    /// Turn this builder into a DELETE for the given table
    pub fn delete_from(mut self, table: &str) -> Self {
        self.query_type = QueryType::Delete;
        self.delete_table = Some(table.to_string());
        self
    }

    /// Add a column assignment for INSERT or UPDATE
    pub fn set<T: Into<Value>>(mut self, column: &str, value: T) -> Self {
        let value = value.into();
        self.set_clauses.push(SetClause {
            column: column.to_string(),
            value: if value.is_null() { None } else { Some(value) },
        });
        self
    }

    /// Add many column assignments at once
    pub fn set_many<I, K>(mut self, assignments: I) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        for (column, value) in assignments {
            self.set_clauses.push(SetClause {
                column: column.into(),
                value: if value.is_null() { None } else { Some(value) },
            });
        }
        self
    }

    /// Explicitly assign NULL to a column
    pub fn set_null(mut self, column: &str) -> Self {
        self.set_clauses.push(SetClause {
            column: column.to_string(),
            value: None,
        });
        self
    }

    /// Request a RETURNING clause on an INSERT (used for generated keys)
    pub fn returning(mut self, column: &str) -> Self {
        self.returning = Some(column.to_string());
        self
    }

    /// The kind of statement this builder currently describes
    pub fn statement_kind(&self) -> &QueryType {
        &self.query_type
    }
}
