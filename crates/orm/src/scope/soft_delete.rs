//! Soft-delete scope
//!
//! Excludes soft-deleted rows from every query, substitutes deletes with a
//! timestamp update, and extends the builder with `with_trashed` and
//! `only_trashed` macros. `restore`/`force_delete` are driven through the
//! scope's restore assignments.

use chrono::Utc;
use serde_json::Value;

use super::Scope;
use crate::builder::EntityBuilder;
use crate::model::EntityDefinition;
use crate::query::{QueryBuilder, QueryOperator, QueryType};

/// Identifier under which the scope registers itself
pub const SOFT_DELETE: &str = "soft_delete";

pub struct SoftDeleteScope {
    column: String,
}

impl SoftDeleteScope {
    pub fn new() -> Self {
        Self {
            column: "deleted_at".to_string(),
        }
    }

    pub fn with_column(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
        }
    }

    pub fn column(&self) -> &str {
        &self.column
    }

    fn qualified_column(&self, definition: &EntityDefinition) -> String {
        format!("{}.{}", definition.table(), self.column)
    }
}

impl Default for SoftDeleteScope {
    fn default() -> Self {
        Self::new()
    }
}

impl Scope for SoftDeleteScope {
    fn identifier(&self) -> &str {
        SOFT_DELETE
    }

    fn apply(&self, query: &mut QueryBuilder, definition: &EntityDefinition) {
        let column = self.qualified_column(definition);
        *query = std::mem::take(query).where_null(&column);
    }

    fn remove(&self, query: &mut QueryBuilder, definition: &EntityDefinition) {
        let column = self.qualified_column(definition);
        query
            .where_conditions
            .retain(|c| !(c.operator == QueryOperator::IsNull && c.column == column));
    }

    fn extend(&self, builder: EntityBuilder) -> EntityBuilder {
        let column = self.column.clone();
        builder
            .register_macro("with_trashed", |b| b.without_scope(SOFT_DELETE))
            .register_macro("only_trashed", move |b| {
                let qualified = format!("{}.{}", b.definition().table(), column);
                b.without_scope(SOFT_DELETE).where_not_null(&qualified)
            })
    }

    fn intercept_delete(
        &self,
        query: &mut QueryBuilder,
        definition: &EntityDefinition,
    ) -> Option<Vec<(String, Value)>> {
        if *query.statement_kind() != QueryType::Delete {
            return None;
        }
        let now = Value::String(Utc::now().to_rfc3339());
        let conditions = std::mem::take(query).where_conditions;
        let mut update = QueryBuilder::new()
            .update_table_named(definition.table())
            .set(&self.column, now.clone());
        update.where_conditions = conditions;
        *query = update;
        Some(vec![(self.column.clone(), now)])
    }

    fn restore_assignments(&self, _definition: &EntityDefinition) -> Option<Vec<(String, Value)>> {
        Some(vec![(self.column.clone(), Value::Null)])
    }
}
