//! Global query scopes
//!
//! A scope is applied to every query built for an entity type unless
//! explicitly removed. Removal is structural: a scope finds and strips
//! exactly the predicates it added, matching on predicate kind and column
//! rather than position. A scope may also extend the builder with named
//! macros and intercept the delete operation entirely.

pub mod soft_delete;

use serde_json::Value;

use crate::builder::EntityBuilder;
use crate::model::EntityDefinition;
use crate::query::QueryBuilder;

pub use soft_delete::SoftDeleteScope;

/// A predicate/behavior bundle attached to an entity type
pub trait Scope: Send + Sync {
    /// Stable identifier used to remove the scope by name
    fn identifier(&self) -> &str;

    /// Add this scope's default predicates to a query
    fn apply(&self, query: &mut QueryBuilder, definition: &EntityDefinition);

    /// Strip exactly the predicates this scope added, by structural match
    fn remove(&self, query: &mut QueryBuilder, definition: &EntityDefinition);

    /// Register additional named macros on the builder
    fn extend(&self, builder: EntityBuilder) -> EntityBuilder {
        builder
    }

    /// Substitute the pending delete with another statement. Returns the
    /// attribute assignments it applied so the entity can mirror them, or
    /// `None` when the scope does not intercept deletes.
    fn intercept_delete(
        &self,
        _query: &mut QueryBuilder,
        _definition: &EntityDefinition,
    ) -> Option<Vec<(String, Value)>> {
        None
    }

    /// Assignments that undo this scope's delete substitution, if it
    /// performs one. Drives the builder's `restore` operation.
    fn restore_assignments(&self, _definition: &EntityDefinition) -> Option<Vec<(String, Value)>> {
        None
    }
}
