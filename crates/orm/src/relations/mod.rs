//! Relation engine
//!
//! Every relation variant follows the same two-phase constraint lifecycle:
//! base constraints scope the query to one parent at construction (skipped in
//! no-constraints introspection mode), and eager constraints scope it to a
//! whole parent batch so N parents cost one additional query. Matching runs
//! in memory against dictionaries keyed by the join columns.
//!
//! Relations are declared on an [`EntityDefinition`] through the
//! [`RelationDef`] registry. Related definitions are referenced lazily so
//! mutually-related types can declare each other.

pub mod belongs_to;
pub mod belongs_to_many;
pub mod has_many;
pub mod has_one;
pub mod morph_many;
pub mod morph_one;
pub mod morph_to;
pub mod pivot;
pub mod through;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::backends::DatabaseConnection;
use crate::builder::EntityBuilder;
use crate::error::{ModelError, ModelResult};
use crate::loading::ConstraintFn;
use crate::model::{Entity, EntityDefinition};
use crate::model::Related;
use crate::query::QueryBuilder;

pub use belongs_to::BelongsTo;
pub use belongs_to_many::BelongsToMany;
pub use has_many::HasMany;
pub use has_one::HasOne;
pub use morph_many::MorphMany;
pub use morph_one::MorphOne;
pub use morph_to::MorphTo;
pub use pivot::{PivotRecord, SyncChanges};
pub use through::{BelongsToThrough, HasManyThrough, HasOneThrough};

/// Lazy reference to a related entity definition. Resolved when a relation is
/// built, which lets mutually-related types declare each other.
pub type DefinitionRef = Arc<dyn Fn() -> Arc<EntityDefinition> + Send + Sync>;

/// A definition reference resolving to an already-built definition
pub fn def_ref(definition: &Arc<EntityDefinition>) -> DefinitionRef {
    let definition = definition.clone();
    Arc::new(move || definition.clone())
}

fn resolve(definition: &DefinitionRef) -> Arc<EntityDefinition> {
    definition.as_ref()()
}

/// A declared association, materialized as a constrained query against the
/// related entity type.
#[async_trait]
pub trait Relation: Send + Sync {
    /// The related-side query this relation owns
    fn builder(&self) -> &EntityBuilder;

    fn builder_mut(&mut self) -> &mut EntityBuilder;

    /// Constrain the owned query to a whole batch of parents
    fn add_eager_constraints(&mut self, parents: &[Entity]);

    /// Seed every parent with the relation's empty default (null for to-one,
    /// an empty collection for to-many) before matching
    fn init_relation(&self, parents: &mut [Entity], name: &str);

    /// Attach fetched results onto their parents via the join-column
    /// dictionary
    fn match_eager(&self, parents: &mut [Entity], results: Vec<Entity>, name: &str);

    /// Resolve the relation for the single parent it was constructed against
    async fn get_results(&self, conn: &dyn DatabaseConnection) -> ModelResult<Related>;

    /// Re-express the relation as a correlated count sub-query against the
    /// given outer table. The correlation predicate is a raw column
    /// reference, never a bound parameter.
    fn existence_query(&self, parent_table: &str) -> ModelResult<QueryBuilder>;

    /// Run the owned query, including any relation-specific result shaping
    async fn fetch_results(&self, conn: &dyn DatabaseConnection) -> ModelResult<Vec<Entity>> {
        self.builder().clone().get(conn).await
    }

    /// Rewrite the owned builder through a caller-supplied constraint
    fn apply_constraint(&mut self, constraint: &ConstraintFn) {
        let builder = self.builder().clone();
        *self.builder_mut() = constraint(builder);
    }

    /// Resolve this relation for a parent batch: eager constraints, empty
    /// defaults, one fetch, dictionary matching.
    async fn eager_load(
        &mut self,
        parents: &mut [Entity],
        name: &str,
        conn: &dyn DatabaseConnection,
    ) -> ModelResult<()> {
        self.add_eager_constraints(parents);
        self.init_relation(parents, name);
        let results = self.fetch_results(conn).await?;
        self.match_eager(parents, results, name);
        Ok(())
    }
}

/// Registry entry declaring one relation on an entity type. Holds lazy
/// references to the related definition(s) plus the key names; `build`
/// produces the live relation for a parent instance.
#[derive(Clone)]
pub enum RelationDef {
    HasOne {
        related: DefinitionRef,
        foreign_key: String,
        local_key: String,
    },
    HasMany {
        related: DefinitionRef,
        foreign_key: String,
        local_key: String,
    },
    BelongsTo {
        related: DefinitionRef,
        foreign_key: String,
        owner_key: String,
    },
    BelongsToMany {
        related: DefinitionRef,
        pivot_table: String,
        foreign_pivot_key: String,
        related_pivot_key: String,
        parent_key: String,
        related_key: String,
        pivot_columns: Vec<String>,
        pivot_timestamps: bool,
    },
    HasOneThrough {
        related: DefinitionRef,
        through: DefinitionRef,
        first_key: String,
        second_key: String,
        local_key: String,
        second_local_key: String,
    },
    HasManyThrough {
        related: DefinitionRef,
        through: DefinitionRef,
        first_key: String,
        second_key: String,
        local_key: String,
        second_local_key: String,
    },
    BelongsToThrough {
        related: DefinitionRef,
        through: DefinitionRef,
        through_parent_key: String,
        through_local_key: String,
        foreign_key: String,
        owner_key: String,
    },
    MorphOne {
        related: DefinitionRef,
        morph_type: String,
        morph_id: String,
        local_key: String,
    },
    MorphMany {
        related: DefinitionRef,
        morph_type: String,
        morph_id: String,
        local_key: String,
    },
    MorphTo {
        morph_type: String,
        morph_id: String,
        morph_map: HashMap<String, DefinitionRef>,
    },
    MorphToMany {
        related: DefinitionRef,
        pivot_table: String,
        morph_type: String,
        foreign_pivot_key: String,
        related_pivot_key: String,
        parent_key: String,
        related_key: String,
        pivot_columns: Vec<String>,
        pivot_timestamps: bool,
    },
}

impl RelationDef {
    pub fn has_one(related: DefinitionRef, foreign_key: &str, local_key: &str) -> Self {
        RelationDef::HasOne {
            related,
            foreign_key: foreign_key.to_string(),
            local_key: local_key.to_string(),
        }
    }

    pub fn has_many(related: DefinitionRef, foreign_key: &str, local_key: &str) -> Self {
        RelationDef::HasMany {
            related,
            foreign_key: foreign_key.to_string(),
            local_key: local_key.to_string(),
        }
    }

    pub fn belongs_to(related: DefinitionRef, foreign_key: &str, owner_key: &str) -> Self {
        RelationDef::BelongsTo {
            related,
            foreign_key: foreign_key.to_string(),
            owner_key: owner_key.to_string(),
        }
    }

    pub fn belongs_to_many(
        related: DefinitionRef,
        pivot_table: &str,
        foreign_pivot_key: &str,
        related_pivot_key: &str,
    ) -> Self {
        RelationDef::BelongsToMany {
            related,
            pivot_table: pivot_table.to_string(),
            foreign_pivot_key: foreign_pivot_key.to_string(),
            related_pivot_key: related_pivot_key.to_string(),
            parent_key: "id".to_string(),
            related_key: "id".to_string(),
            pivot_columns: Vec::new(),
            pivot_timestamps: false,
        }
    }

    /// Add extra pivot columns to a many-to-many declaration
    pub fn with_pivot_columns(mut self, columns: Vec<&str>) -> Self {
        match &mut self {
            RelationDef::BelongsToMany { pivot_columns, .. }
            | RelationDef::MorphToMany { pivot_columns, .. } => {
                *pivot_columns = columns.into_iter().map(String::from).collect();
            }
            _ => {}
        }
        self
    }

    /// Enable timestamp columns on a many-to-many declaration's pivot table
    pub fn with_pivot_timestamps(mut self) -> Self {
        match &mut self {
            RelationDef::BelongsToMany {
                pivot_timestamps, ..
            }
            | RelationDef::MorphToMany {
                pivot_timestamps, ..
            } => *pivot_timestamps = true,
            _ => {}
        }
        self
    }

    pub fn morph_one(related: DefinitionRef, name: &str, local_key: &str) -> Self {
        RelationDef::MorphOne {
            related,
            morph_type: format!("{}_type", name),
            morph_id: format!("{}_id", name),
            local_key: local_key.to_string(),
        }
    }

    pub fn morph_many(related: DefinitionRef, name: &str, local_key: &str) -> Self {
        RelationDef::MorphMany {
            related,
            morph_type: format!("{}_type", name),
            morph_id: format!("{}_id", name),
            local_key: local_key.to_string(),
        }
    }

    pub fn morph_to(name: &str, morph_map: HashMap<String, DefinitionRef>) -> Self {
        RelationDef::MorphTo {
            morph_type: format!("{}_type", name),
            morph_id: format!("{}_id", name),
            morph_map,
        }
    }

    pub fn morph_to_many(
        related: DefinitionRef,
        name: &str,
        pivot_table: &str,
        foreign_pivot_key: &str,
        related_pivot_key: &str,
    ) -> Self {
        RelationDef::MorphToMany {
            related,
            pivot_table: pivot_table.to_string(),
            morph_type: format!("{}_type", name),
            foreign_pivot_key: foreign_pivot_key.to_string(),
            related_pivot_key: related_pivot_key.to_string(),
            parent_key: "id".to_string(),
            related_key: "id".to_string(),
            pivot_columns: Vec::new(),
            pivot_timestamps: false,
        }
    }

    pub fn has_one_through(
        related: DefinitionRef,
        through: DefinitionRef,
        first_key: &str,
        second_key: &str,
    ) -> Self {
        RelationDef::HasOneThrough {
            related,
            through,
            first_key: first_key.to_string(),
            second_key: second_key.to_string(),
            local_key: "id".to_string(),
            second_local_key: "id".to_string(),
        }
    }

    pub fn has_many_through(
        related: DefinitionRef,
        through: DefinitionRef,
        first_key: &str,
        second_key: &str,
    ) -> Self {
        RelationDef::HasManyThrough {
            related,
            through,
            first_key: first_key.to_string(),
            second_key: second_key.to_string(),
            local_key: "id".to_string(),
            second_local_key: "id".to_string(),
        }
    }

    pub fn belongs_to_through(
        related: DefinitionRef,
        through: DefinitionRef,
        through_parent_key: &str,
        foreign_key: &str,
    ) -> Self {
        RelationDef::BelongsToThrough {
            related,
            through,
            through_parent_key: through_parent_key.to_string(),
            through_local_key: "id".to_string(),
            foreign_key: foreign_key.to_string(),
            owner_key: "id".to_string(),
        }
    }

    /// Construct the live relation for a parent. `constraints` selects
    /// between the parent-scoped form and no-constraints introspection mode.
    pub fn build(&self, parent: &Entity, constraints: bool) -> ModelResult<Box<dyn Relation>> {
        match self {
            RelationDef::HasOne {
                related,
                foreign_key,
                local_key,
            } => Ok(Box::new(HasOne::new(
                parent,
                resolve(related),
                foreign_key,
                local_key,
                constraints,
            ))),
            RelationDef::HasMany {
                related,
                foreign_key,
                local_key,
            } => Ok(Box::new(HasMany::new(
                parent,
                resolve(related),
                foreign_key,
                local_key,
                constraints,
            ))),
            RelationDef::BelongsTo {
                related,
                foreign_key,
                owner_key,
            } => Ok(Box::new(BelongsTo::new(
                parent,
                resolve(related),
                foreign_key,
                owner_key,
                constraints,
            ))),
            RelationDef::BelongsToMany { .. } | RelationDef::MorphToMany { .. } => {
                Ok(Box::new(self.build_belongs_to_many(parent, constraints)?))
            }
            RelationDef::HasOneThrough {
                related,
                through,
                first_key,
                second_key,
                local_key,
                second_local_key,
            } => Ok(Box::new(HasOneThrough::new(
                parent,
                resolve(related),
                resolve(through),
                first_key,
                second_key,
                local_key,
                second_local_key,
                constraints,
            ))),
            RelationDef::HasManyThrough {
                related,
                through,
                first_key,
                second_key,
                local_key,
                second_local_key,
            } => Ok(Box::new(HasManyThrough::new(
                parent,
                resolve(related),
                resolve(through),
                first_key,
                second_key,
                local_key,
                second_local_key,
                constraints,
            ))),
            RelationDef::BelongsToThrough {
                related,
                through,
                through_parent_key,
                through_local_key,
                foreign_key,
                owner_key,
            } => Ok(Box::new(BelongsToThrough::new(
                parent,
                resolve(related),
                resolve(through),
                through_parent_key,
                through_local_key,
                foreign_key,
                owner_key,
                constraints,
            ))),
            RelationDef::MorphOne {
                related,
                morph_type,
                morph_id,
                local_key,
            } => Ok(Box::new(MorphOne::new(
                parent,
                resolve(related),
                morph_type,
                morph_id,
                local_key,
                constraints,
            ))),
            RelationDef::MorphMany {
                related,
                morph_type,
                morph_id,
                local_key,
            } => Ok(Box::new(MorphMany::new(
                parent,
                resolve(related),
                morph_type,
                morph_id,
                local_key,
                constraints,
            ))),
            RelationDef::MorphTo {
                morph_type,
                morph_id,
                morph_map,
            } => {
                let resolved: HashMap<String, Arc<EntityDefinition>> = morph_map
                    .iter()
                    .map(|(class, definition)| (class.clone(), resolve(definition)))
                    .collect();
                Ok(Box::new(MorphTo::new(
                    parent, morph_type, morph_id, resolved, constraints,
                )))
            }
        }
    }

    /// Construct the concrete many-to-many relation, exposing the pivot
    /// operations (`attach`/`detach`/`sync`) the boxed trait object hides.
    pub fn build_belongs_to_many(
        &self,
        parent: &Entity,
        constraints: bool,
    ) -> ModelResult<BelongsToMany> {
        match self {
            RelationDef::BelongsToMany {
                related,
                pivot_table,
                foreign_pivot_key,
                related_pivot_key,
                parent_key,
                related_key,
                pivot_columns,
                pivot_timestamps,
            } => Ok(BelongsToMany::new(
                parent,
                resolve(related),
                pivot_table,
                foreign_pivot_key,
                related_pivot_key,
                parent_key,
                related_key,
                pivot_columns.clone(),
                *pivot_timestamps,
                None,
                constraints,
            )),
            RelationDef::MorphToMany {
                related,
                pivot_table,
                morph_type,
                foreign_pivot_key,
                related_pivot_key,
                parent_key,
                related_key,
                pivot_columns,
                pivot_timestamps,
            } => Ok(BelongsToMany::new(
                parent,
                resolve(related),
                pivot_table,
                foreign_pivot_key,
                related_pivot_key,
                parent_key,
                related_key,
                pivot_columns.clone(),
                *pivot_timestamps,
                Some((
                    morph_type.clone(),
                    parent.definition().morph_class().to_string(),
                )),
                constraints,
            )),
            _ => Err(ModelError::Relationship(
                "relation is not a many-to-many association".to_string(),
            )),
        }
    }
}

/// Canonical dictionary key for a join-column value, tolerant of the
/// numeric/string split the same way dirty comparison is.
pub(crate) fn key_string(value: &Value) -> String {
    match value {
        Value::String(s) => {
            if let Ok(i) = s.trim().parse::<i64>() {
                i.to_string()
            } else {
                s.clone()
            }
        }
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

/// Distinct, non-null values of one attribute across a parent batch
pub(crate) fn collect_keys(parents: &[Entity], attribute: &str) -> Vec<Value> {
    let mut seen = std::collections::HashSet::new();
    let mut keys = Vec::new();
    for parent in parents {
        if let Some(value) = parent.get_attribute(attribute) {
            if !value.is_null() && seen.insert(key_string(&value)) {
                keys.push(value);
            }
        }
    }
    keys
}

/// Dictionary from join-column value to the first matching row
pub(crate) fn dictionary_one(
    results: Vec<Entity>,
    key: &str,
) -> std::collections::HashMap<String, Entity> {
    let mut dict = std::collections::HashMap::new();
    for entity in results {
        if let Some(value) = entity.get_attribute(key) {
            dict.entry(key_string(&value)).or_insert(entity);
        }
    }
    dict
}

/// Dictionary from join-column value to all matching rows
pub(crate) fn dictionary_many(
    results: Vec<Entity>,
    key: &str,
) -> std::collections::HashMap<String, Vec<Entity>> {
    let mut dict: std::collections::HashMap<String, Vec<Entity>> =
        std::collections::HashMap::new();
    for entity in results {
        if let Some(value) = entity.get_attribute(key) {
            dict.entry(key_string(&value)).or_default().push(entity);
        }
    }
    dict
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_key_string_collapses_numeric_spellings() {
        assert_eq!(key_string(&json!(1)), key_string(&json!("1")));
        assert_eq!(key_string(&json!("abc")), "abc");
        assert_ne!(key_string(&json!(1)), key_string(&json!(2)));
    }

    #[test]
    fn test_collect_keys_deduplicates_and_skips_null() {
        let def = EntityDefinition::builder("users").guarded(vec![]).build();
        let make = |id: Value| {
            let mut row = std::collections::BTreeMap::new();
            row.insert("id".to_string(), id);
            Entity::hydrate(def.clone(), row)
        };
        let parents = vec![
            make(json!(1)),
            make(json!(1)),
            make(json!(null)),
            make(json!(2)),
        ];
        let keys = collect_keys(&parents, "id");
        assert_eq!(keys, vec![json!(1), json!(2)]);
    }

    #[test]
    fn test_def_ref_resolves_to_same_definition() {
        let def = EntityDefinition::builder("users").build();
        let reference = def_ref(&def);
        assert!(Arc::ptr_eq(&reference(), &def));
    }
}
