//! Query builder core

use super::types::*;

/// Builder for constructing database statements. All clause storage is owned,
/// so `Clone` always produces an independent query state.
#[derive(Debug, Clone, Default)]
pub struct QueryBuilder {
    pub(crate) query_type: QueryType,
    pub(crate) select_fields: Vec<String>,
    pub(crate) from_table: Option<String>,
    pub(crate) insert_table: Option<String>,
    pub(crate) update_table: Option<String>,
    pub(crate) delete_table: Option<String>,
    pub(crate) set_clauses: Vec<SetClause>,
    pub(crate) where_conditions: Vec<WhereCondition>,
    pub(crate) joins: Vec<JoinClause>,
    pub(crate) order_by: Vec<(String, OrderDirection)>,
    pub(crate) group_by: Vec<String>,
    pub(crate) limit_count: Option<i64>,
    pub(crate) offset_value: Option<i64>,
    pub(crate) distinct: bool,
    pub(crate) returning: Option<String>,
}

impl QueryBuilder {
    /// Create a new empty select builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a select builder targeting a table
    pub fn table(name: impl Into<String>) -> Self {
        Self {
            from_table: Some(name.into()),
            ..Self::default()
        }
    }

    /// The table this select reads from
    pub fn from_table_name(&self) -> Option<&str> {
        self.from_table.as_deref()
    }

    /// The conditions currently on the builder
    pub fn conditions(&self) -> &[WhereCondition] {
        &self.where_conditions
    }

    /// True when no explicit select list has been set
    pub fn select_is_empty(&self) -> bool {
        self.select_fields.is_empty()
    }
}
