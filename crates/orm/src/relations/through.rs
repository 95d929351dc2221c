//! Relations reaching across an intermediate table
//!
//! The final query is two joins removed from the root entity, so eager
//! matching selects the intermediate table's key under the `through_key`
//! alias to recover which grandparent each row belongs to.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use super::{collect_keys, dictionary_many, dictionary_one, key_string, Relation};
use crate::backends::DatabaseConnection;
use crate::builder::EntityBuilder;
use crate::error::ModelResult;
use crate::model::{Entity, EntityDefinition, Related};
use crate::query::QueryBuilder;

/// Alias under which the bridge column is selected for eager matching
pub(crate) const THROUGH_KEY: &str = "through_key";

struct ThroughCore {
    builder: EntityBuilder,
    related: Arc<EntityDefinition>,
    through: Arc<EntityDefinition>,
    /// Column on the intermediate table pointing at the parent
    first_key: String,
    /// Column on the parent the intermediate points at
    local_key: String,
}

impl ThroughCore {
    /// Join `related` to `through` and, in constrained mode, scope to one
    /// parent. `join_left`/`join_right` are the ON columns.
    fn new(
        parent: &Entity,
        related: Arc<EntityDefinition>,
        through: Arc<EntityDefinition>,
        first_key: &str,
        local_key: &str,
        join_left: String,
        join_right: String,
        constraints: bool,
    ) -> Self {
        let mut builder = EntityBuilder::new(related.clone());
        {
            let query = builder.query_mut();
            *query = std::mem::take(query).join(through.table(), &join_left, &join_right);
        }
        if constraints {
            let key = parent.get_attribute(local_key).unwrap_or(Value::Null);
            builder = builder.where_eq(&format!("{}.{}", through.table(), first_key), key);
        }
        Self {
            builder,
            related,
            through,
            first_key: first_key.to_string(),
            local_key: local_key.to_string(),
        }
    }

    fn add_eager_constraints(&mut self, parents: &[Entity]) {
        let keys = collect_keys(parents, &self.local_key);
        let bridge = format!("{}.{}", self.through.table(), self.first_key);
        let builder = self.builder.clone();
        self.builder = builder
            .select(vec![
                format!("{}.*", self.related.table()),
                format!("{} AS {}", bridge, THROUGH_KEY),
            ])
            .where_in(&bridge, keys);
    }

    fn existence_query(&self, parent_table: &str) -> QueryBuilder {
        self.builder
            .query()
            .clone()
            .select(vec!["COUNT(*)".to_string()])
            .strip_ordering()
            .where_raw(&format!(
                "{}.{} = {}.{}",
                self.through.table(),
                self.first_key,
                parent_table,
                self.local_key
            ))
    }
}

/// Has-many across an intermediate table
pub struct HasManyThrough {
    core: ThroughCore,
}

impl HasManyThrough {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        parent: &Entity,
        related: Arc<EntityDefinition>,
        through: Arc<EntityDefinition>,
        first_key: &str,
        second_key: &str,
        local_key: &str,
        second_local_key: &str,
        constraints: bool,
    ) -> Self {
        let join_left = format!("{}.{}", through.table(), second_local_key);
        let join_right = format!("{}.{}", related.table(), second_key);
        Self {
            core: ThroughCore::new(
                parent,
                related,
                through,
                first_key,
                local_key,
                join_left,
                join_right,
                constraints,
            ),
        }
    }
}

#[async_trait]
impl Relation for HasManyThrough {
    fn builder(&self) -> &EntityBuilder {
        &self.core.builder
    }

    fn builder_mut(&mut self) -> &mut EntityBuilder {
        &mut self.core.builder
    }

    fn add_eager_constraints(&mut self, parents: &[Entity]) {
        self.core.add_eager_constraints(parents);
    }

    fn init_relation(&self, parents: &mut [Entity], name: &str) {
        for parent in parents.iter_mut() {
            parent.set_relation(name, Related::Many(Vec::new()));
        }
    }

    fn match_eager(&self, parents: &mut [Entity], results: Vec<Entity>, name: &str) {
        let dictionary = dictionary_many(results, THROUGH_KEY);
        for parent in parents.iter_mut() {
            if let Some(key) = parent.get_attribute(&self.core.local_key) {
                if let Some(related) = dictionary.get(&key_string(&key)) {
                    parent.set_relation(name, Related::Many(related.clone()));
                }
            }
        }
    }

    async fn get_results(&self, conn: &dyn DatabaseConnection) -> ModelResult<Related> {
        Ok(Related::Many(self.core.builder.clone().get(conn).await?))
    }

    fn existence_query(&self, parent_table: &str) -> ModelResult<QueryBuilder> {
        Ok(self.core.existence_query(parent_table))
    }
}

/// Has-one across an intermediate table
pub struct HasOneThrough {
    core: ThroughCore,
}

impl HasOneThrough {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        parent: &Entity,
        related: Arc<EntityDefinition>,
        through: Arc<EntityDefinition>,
        first_key: &str,
        second_key: &str,
        local_key: &str,
        second_local_key: &str,
        constraints: bool,
    ) -> Self {
        let join_left = format!("{}.{}", through.table(), second_local_key);
        let join_right = format!("{}.{}", related.table(), second_key);
        Self {
            core: ThroughCore::new(
                parent,
                related,
                through,
                first_key,
                local_key,
                join_left,
                join_right,
                constraints,
            ),
        }
    }
}

#[async_trait]
impl Relation for HasOneThrough {
    fn builder(&self) -> &EntityBuilder {
        &self.core.builder
    }

    fn builder_mut(&mut self) -> &mut EntityBuilder {
        &mut self.core.builder
    }

    fn add_eager_constraints(&mut self, parents: &[Entity]) {
        self.core.add_eager_constraints(parents);
    }

    fn init_relation(&self, parents: &mut [Entity], name: &str) {
        for parent in parents.iter_mut() {
            parent.set_relation(name, Related::One(None));
        }
    }

    fn match_eager(&self, parents: &mut [Entity], results: Vec<Entity>, name: &str) {
        let dictionary = dictionary_one(results, THROUGH_KEY);
        for parent in parents.iter_mut() {
            if let Some(key) = parent.get_attribute(&self.core.local_key) {
                if let Some(related) = dictionary.get(&key_string(&key)) {
                    parent.set_relation(name, Related::One(Some(Box::new(related.clone()))));
                }
            }
        }
    }

    async fn get_results(&self, conn: &dyn DatabaseConnection) -> ModelResult<Related> {
        let result = self.core.builder.clone().first(conn).await?;
        Ok(Related::One(result.map(Box::new)))
    }

    fn existence_query(&self, parent_table: &str) -> ModelResult<QueryBuilder> {
        Ok(self.core.existence_query(parent_table))
    }
}

/// Belongs-to across an intermediate table: the parent holds a key to the
/// intermediate, which in turn belongs to the related type.
pub struct BelongsToThrough {
    core: ThroughCore,
}

impl BelongsToThrough {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        parent: &Entity,
        related: Arc<EntityDefinition>,
        through: Arc<EntityDefinition>,
        through_parent_key: &str,
        through_local_key: &str,
        foreign_key: &str,
        owner_key: &str,
        constraints: bool,
    ) -> Self {
        let join_left = format!("{}.{}", through.table(), foreign_key);
        let join_right = format!("{}.{}", related.table(), owner_key);
        Self {
            core: ThroughCore::new(
                parent,
                related,
                through,
                through_local_key,
                through_parent_key,
                join_left,
                join_right,
                constraints,
            ),
        }
    }
}

#[async_trait]
impl Relation for BelongsToThrough {
    fn builder(&self) -> &EntityBuilder {
        &self.core.builder
    }

    fn builder_mut(&mut self) -> &mut EntityBuilder {
        &mut self.core.builder
    }

    fn add_eager_constraints(&mut self, parents: &[Entity]) {
        self.core.add_eager_constraints(parents);
    }

    fn init_relation(&self, parents: &mut [Entity], name: &str) {
        for parent in parents.iter_mut() {
            parent.set_relation(name, Related::One(None));
        }
    }

    fn match_eager(&self, parents: &mut [Entity], results: Vec<Entity>, name: &str) {
        let dictionary = dictionary_one(results, THROUGH_KEY);
        for parent in parents.iter_mut() {
            if let Some(key) = parent.get_attribute(&self.core.local_key) {
                if let Some(related) = dictionary.get(&key_string(&key)) {
                    parent.set_relation(name, Related::One(Some(Box::new(related.clone()))));
                }
            }
        }
    }

    async fn get_results(&self, conn: &dyn DatabaseConnection) -> ModelResult<Related> {
        let result = self.core.builder.clone().first(conn).await?;
        Ok(Related::One(result.map(Box::new)))
    }

    fn existence_query(&self, parent_table: &str) -> ModelResult<QueryBuilder> {
        Ok(self.core.existence_query(parent_table))
    }
}
