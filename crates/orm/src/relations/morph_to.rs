//! Inverse polymorphic relation
//!
//! One foreign key, but the related type varies per row via a stored
//! discriminator. Batch resolution groups parents by discriminator value and
//! issues one query per distinct type actually present, so the query count is
//! data-dependent.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use super::{dictionary_one, key_string, Relation};
use crate::backends::DatabaseConnection;
use crate::builder::EntityBuilder;
use crate::error::{ModelError, ModelResult};
use crate::model::{Entity, EntityDefinition, Related};
use crate::query::QueryBuilder;

pub struct MorphTo {
    /// Collects caller constraints and nested eager paths; replayed onto each
    /// per-type query at resolution time. Never executed itself.
    template: EntityBuilder,
    morph_type: String,
    morph_id: String,
    morph_map: HashMap<String, Arc<EntityDefinition>>,
    parent_type: Option<String>,
    parent_id: Option<serde_json::Value>,
}

impl MorphTo {
    pub(crate) fn new(
        parent: &Entity,
        morph_type: &str,
        morph_id: &str,
        morph_map: HashMap<String, Arc<EntityDefinition>>,
        _constraints: bool,
    ) -> Self {
        let parent_type = parent
            .get_attribute(morph_type)
            .and_then(|v| v.as_str().map(String::from));
        let parent_id = parent.get_attribute(morph_id).filter(|v| !v.is_null());
        Self {
            template: EntityBuilder::bare(parent.definition().clone()),
            morph_type: morph_type.to_string(),
            morph_id: morph_id.to_string(),
            morph_map,
            parent_type,
            parent_id,
        }
    }

    fn definition_for(&self, discriminator: &str) -> ModelResult<Arc<EntityDefinition>> {
        self.morph_map.get(discriminator).cloned().ok_or_else(|| {
            ModelError::Relationship(format!(
                "no entity type registered for discriminator '{}'",
                discriminator
            ))
        })
    }

    /// A related-type query carrying the template's constraints and eager plan
    fn builder_for(&self, definition: Arc<EntityDefinition>) -> EntityBuilder {
        let mut builder = EntityBuilder::new(definition);
        builder.adopt_template(&self.template);
        builder
    }
}

#[async_trait]
impl Relation for MorphTo {
    fn builder(&self) -> &EntityBuilder {
        &self.template
    }

    fn builder_mut(&mut self) -> &mut EntityBuilder {
        &mut self.template
    }

    fn add_eager_constraints(&mut self, _parents: &[Entity]) {
        // constraints are applied per distinct type inside eager_load
    }

    fn init_relation(&self, parents: &mut [Entity], name: &str) {
        for parent in parents.iter_mut() {
            parent.set_relation(name, Related::One(None));
        }
    }

    fn match_eager(&self, _parents: &mut [Entity], _results: Vec<Entity>, _name: &str) {
        // matching happens per distinct type inside eager_load
    }

    async fn get_results(&self, conn: &dyn DatabaseConnection) -> ModelResult<Related> {
        let (discriminator, id) = match (&self.parent_type, &self.parent_id) {
            (Some(t), Some(id)) => (t.clone(), id.clone()),
            _ => return Ok(Related::One(None)),
        };
        let definition = self.definition_for(&discriminator)?;
        let key = definition.qualified_key();
        let result = self
            .builder_for(definition)
            .where_eq(&key, id)
            .first(conn)
            .await?;
        Ok(Related::One(result.map(Box::new)))
    }

    fn existence_query(&self, _parent_table: &str) -> ModelResult<QueryBuilder> {
        Err(ModelError::Relationship(
            "existence queries are not supported for morph-to relations".to_string(),
        ))
    }

    async fn eager_load(
        &mut self,
        parents: &mut [Entity],
        name: &str,
        conn: &dyn DatabaseConnection,
    ) -> ModelResult<()> {
        self.init_relation(parents, name);

        // group parent indices by discriminator value; ordered so the
        // per-type queries run in a stable sequence
        let mut groups: std::collections::BTreeMap<String, Vec<usize>> =
            std::collections::BTreeMap::new();
        for (index, parent) in parents.iter().enumerate() {
            let discriminator = parent
                .get_attribute(&self.morph_type)
                .and_then(|v| v.as_str().map(String::from));
            let id = parent.get_attribute(&self.morph_id).filter(|v| !v.is_null());
            if let (Some(discriminator), Some(_)) = (discriminator, id) {
                groups.entry(discriminator).or_default().push(index);
            }
        }

        // one query per distinct discriminator value present in the batch
        for (discriminator, indices) in groups {
            let definition = self.definition_for(&discriminator)?;
            let key = definition.primary_key().to_string();
            let qualified = definition.qualified_key();

            let mut seen = std::collections::HashSet::new();
            let mut ids = Vec::new();
            for &index in &indices {
                if let Some(id) = parents[index].get_attribute(&self.morph_id) {
                    if seen.insert(key_string(&id)) {
                        ids.push(id);
                    }
                }
            }

            let results = self
                .builder_for(definition)
                .where_in(&qualified, ids)
                .get(conn)
                .await?;
            let dictionary = dictionary_one(results, &key);

            for index in indices {
                if let Some(id) = parents[index].get_attribute(&self.morph_id) {
                    if let Some(related) = dictionary.get(&key_string(&id)) {
                        parents[index]
                            .set_relation(name, Related::One(Some(Box::new(related.clone()))));
                    }
                }
            }
        }

        Ok(())
    }
}
