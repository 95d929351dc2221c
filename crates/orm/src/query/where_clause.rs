//! Query builder WHERE clause operations

use serde_json::Value;

use super::builder::QueryBuilder;
use super::types::*;

impl QueryBuilder {
    fn push_condition(
        mut self,
        column: &str,
        operator: QueryOperator,
        value: Option<Value>,
        values: Vec<Value>,
        boolean: WhereBoolean,
    ) -> Self {
        self.where_conditions.push(WhereCondition {
            column: column.to_string(),
            operator,
            value,
            values,
            boolean,
        });
        self
    }

    /// Add WHERE condition with equality
    pub fn where_eq<T: Into<Value>>(self, column: &str, value: T) -> Self {
        self.push_condition(
            column,
            QueryOperator::Equal,
            Some(value.into()),
            Vec::new(),
            WhereBoolean::And,
        )
    }

    /// Add WHERE condition with not equal
    pub fn where_ne<T: Into<Value>>(self, column: &str, value: T) -> Self {
        self.push_condition(
            column,
            QueryOperator::NotEqual,
            Some(value.into()),
            Vec::new(),
            WhereBoolean::And,
        )
    }

    /// Add WHERE condition with greater than
    pub fn where_gt<T: Into<Value>>(self, column: &str, value: T) -> Self {
        self.push_condition(
            column,
            QueryOperator::GreaterThan,
            Some(value.into()),
            Vec::new(),
            WhereBoolean::And,
        )
    }

    /// Add WHERE condition with greater than or equal
    pub fn where_gte<T: Into<Value>>(self, column: &str, value: T) -> Self {
        self.push_condition(
            column,
            QueryOperator::GreaterThanOrEqual,
            Some(value.into()),
            Vec::new(),
            WhereBoolean::And,
        )
    }

    /// Add WHERE condition with less than
    pub fn where_lt<T: Into<Value>>(self, column: &str, value: T) -> Self {
        self.push_condition(
            column,
            QueryOperator::LessThan,
            Some(value.into()),
            Vec::new(),
            WhereBoolean::And,
        )
    }

    /// Add WHERE condition with less than or equal
    pub fn where_lte<T: Into<Value>>(self, column: &str, value: T) -> Self {
        self.push_condition(
            column,
            QueryOperator::LessThanOrEqual,
            Some(value.into()),
            Vec::new(),
            WhereBoolean::And,
        )
    }

    /// Add WHERE condition with LIKE
    pub fn where_like(self, column: &str, pattern: &str) -> Self {
        self.push_condition(
            column,
            QueryOperator::Like,
            Some(Value::String(pattern.to_string())),
            Vec::new(),
            WhereBoolean::And,
        )
    }

    /// Add WHERE condition with IN
    pub fn where_in<T: Into<Value>>(self, column: &str, values: Vec<T>) -> Self {
        self.push_condition(
            column,
            QueryOperator::In,
            None,
            values.into_iter().map(|v| v.into()).collect(),
            WhereBoolean::And,
        )
    }

    /// Add WHERE condition with NOT IN
    pub fn where_not_in<T: Into<Value>>(self, column: &str, values: Vec<T>) -> Self {
        self.push_condition(
            column,
            QueryOperator::NotIn,
            None,
            values.into_iter().map(|v| v.into()).collect(),
            WhereBoolean::And,
        )
    }

    /// Add WHERE condition with IS NULL
    pub fn where_null(self, column: &str) -> Self {
        self.push_condition(
            column,
            QueryOperator::IsNull,
            None,
            Vec::new(),
            WhereBoolean::And,
        )
    }

    /// Add WHERE condition with IS NOT NULL
    pub fn where_not_null(self, column: &str) -> Self {
        self.push_condition(
            column,
            QueryOperator::IsNotNull,
            None,
            Vec::new(),
            WhereBoolean::And,
        )
    }

    /// Add a raw WHERE fragment. Used for correlated column references that
    /// must never become bound parameters.
    pub fn where_raw(mut self, fragment: &str) -> Self {
        self.where_conditions
            .push(WhereCondition::raw(fragment, WhereBoolean::And));
        self
    }

    /// Add a raw WHERE fragment combined with OR
    pub fn or_where_raw(mut self, fragment: &str) -> Self {
        self.where_conditions
            .push(WhereCondition::raw(fragment, WhereBoolean::Or));
        self
    }

    /// Add WHERE equality combined with OR
    pub fn or_where_eq<T: Into<Value>>(self, column: &str, value: T) -> Self {
        self.push_condition(
            column,
            QueryOperator::Equal,
            Some(value.into()),
            Vec::new(),
            WhereBoolean::Or,
        )
    }
}
