//! Pivot rows for many-to-many associations
//!
//! Pivot columns are selected under a `pivot_` prefix alongside the related
//! row, then stripped off into a separate record attached to the related
//! entity as its `pivot` relation.

use serde::Serialize;
use serde_json::Value;

use crate::model::{Entity, EntityDefinition, Related};

/// Prefix under which pivot columns are selected
pub(crate) const PIVOT_PREFIX: &str = "pivot_";

/// Relation name the stripped pivot record is attached under
pub(crate) const PIVOT_RELATION: &str = "pivot";

/// Accessors for the join-table record attached to a related entity
pub struct PivotRecord;

impl PivotRecord {
    /// The pivot record attached to an entity fetched through a many-to-many
    /// relation
    pub fn of(entity: &Entity) -> Option<&Entity> {
        entity.get_relation(PIVOT_RELATION).and_then(Related::as_one)
    }

    /// Move `pivot_`-prefixed attributes off the related entity into a pivot
    /// record hydrated against the join table
    pub(crate) fn strip(related: &mut Entity, pivot_table: &str) {
        let pivot_keys: Vec<String> = related
            .attributes()
            .keys()
            .filter(|k| k.starts_with(PIVOT_PREFIX))
            .cloned()
            .collect();
        if pivot_keys.is_empty() {
            return;
        }

        let mut pivot_attributes = std::collections::BTreeMap::new();
        for key in pivot_keys {
            if let Some(value) = related.attribute_store_mut().remove(&key) {
                pivot_attributes.insert(key[PIVOT_PREFIX.len()..].to_string(), value);
            }
        }
        related.sync_original();

        let pivot = Entity::hydrate(EntityDefinition::pivot(pivot_table), pivot_attributes);
        related.set_relation(PIVOT_RELATION, Related::One(Some(Box::new(pivot))));
    }
}

/// Outcome of a `sync` call: the three disjoint id sets it acted on
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SyncChanges {
    pub attached: Vec<Value>,
    pub detached: Vec<Value>,
    pub updated: Vec<Value>,
}

impl SyncChanges {
    /// True when anything was attached or updated; callers use this to decide
    /// whether to touch the owning side
    pub fn has_changes(&self) -> bool {
        !self.attached.is_empty() || !self.updated.is_empty()
    }
}
