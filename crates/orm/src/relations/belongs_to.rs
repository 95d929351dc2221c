//! Belongs-to relation: the parent carries the foreign key

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use super::{collect_keys, dictionary_one, key_string, Relation};
use crate::backends::DatabaseConnection;
use crate::builder::EntityBuilder;
use crate::error::ModelResult;
use crate::model::{Entity, EntityDefinition, Related};
use crate::query::QueryBuilder;

pub struct BelongsTo {
    builder: EntityBuilder,
    related: Arc<EntityDefinition>,
    foreign_key: String,
    owner_key: String,
}

impl BelongsTo {
    pub(crate) fn new(
        parent: &Entity,
        related: Arc<EntityDefinition>,
        foreign_key: &str,
        owner_key: &str,
        constraints: bool,
    ) -> Self {
        let mut builder = EntityBuilder::new(related.clone());
        if constraints {
            let key = parent.get_attribute(foreign_key).unwrap_or(Value::Null);
            builder = builder.where_eq(owner_key, key);
        }
        Self {
            builder,
            related,
            foreign_key: foreign_key.to_string(),
            owner_key: owner_key.to_string(),
        }
    }
}

#[async_trait]
impl Relation for BelongsTo {
    fn builder(&self) -> &EntityBuilder {
        &self.builder
    }

    fn builder_mut(&mut self) -> &mut EntityBuilder {
        &mut self.builder
    }

    fn add_eager_constraints(&mut self, parents: &[Entity]) {
        let keys = collect_keys(parents, &self.foreign_key);
        let builder = self.builder.clone();
        self.builder = builder.where_in(&self.owner_key, keys);
    }

    fn init_relation(&self, parents: &mut [Entity], name: &str) {
        for parent in parents.iter_mut() {
            parent.set_relation(name, Related::One(None));
        }
    }

    fn match_eager(&self, parents: &mut [Entity], results: Vec<Entity>, name: &str) {
        let dictionary = dictionary_one(results, &self.owner_key);
        for parent in parents.iter_mut() {
            if let Some(key) = parent.get_attribute(&self.foreign_key) {
                if let Some(related) = dictionary.get(&key_string(&key)) {
                    parent.set_relation(name, Related::One(Some(Box::new(related.clone()))));
                }
            }
        }
    }

    async fn get_results(&self, conn: &dyn DatabaseConnection) -> ModelResult<Related> {
        let result = self.builder.clone().first(conn).await?;
        Ok(Related::One(result.map(Box::new)))
    }

    fn existence_query(&self, parent_table: &str) -> ModelResult<QueryBuilder> {
        Ok(self
            .builder
            .query()
            .clone()
            .select(vec!["COUNT(*)".to_string()])
            .strip_ordering()
            .where_raw(&format!(
                "{}.{} = {}.{}",
                self.related.table(),
                self.owner_key,
                parent_table,
                self.foreign_key
            )))
    }
}
