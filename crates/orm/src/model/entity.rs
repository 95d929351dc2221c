//! The active-record entity
//!
//! An [`Entity`] binds one persisted record: an attribute store, the resolved
//! relation cache, and the `exists` flag tying the instance to a stored row.
//! Entities are dynamic records; their shape comes entirely from the
//! [`EntityDefinition`] they were built against.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;

use super::attributes::{normalize_date_value, AttributeStore};
use super::definition::EntityDefinition;
use crate::backends::DatabaseConnection;
use crate::error::{ModelError, ModelResult};
use crate::relations::Relation;

/// A resolved relation value attached to an entity
#[derive(Debug, Clone)]
pub enum Related {
    /// To-one result; `None` when no related row matched
    One(Option<Box<Entity>>),
    /// To-many result; empty when no related rows matched, never absent
    Many(Vec<Entity>),
}

impl Related {
    pub fn as_one(&self) -> Option<&Entity> {
        match self {
            Related::One(one) => one.as_deref(),
            Related::Many(_) => None,
        }
    }

    pub fn as_many(&self) -> Option<&[Entity]> {
        match self {
            Related::Many(many) => Some(many),
            Related::One(_) => None,
        }
    }

    pub fn is_collection(&self) -> bool {
        matches!(self, Related::Many(_))
    }
}

/// One in-memory record bound to (at most) one stored row
#[derive(Debug, Clone)]
pub struct Entity {
    definition: Arc<EntityDefinition>,
    attributes: AttributeStore,
    relations: BTreeMap<String, Related>,
    exists: bool,
}

impl Entity {
    /// A fresh, not-yet-persisted entity
    pub fn new(definition: Arc<EntityDefinition>) -> Self {
        Self {
            definition,
            attributes: AttributeStore::new(),
            relations: BTreeMap::new(),
            exists: false,
        }
    }

    /// Hydrate from a fetched row; the entity starts clean and existing
    pub fn hydrate(definition: Arc<EntityDefinition>, row: BTreeMap<String, Value>) -> Self {
        Self {
            definition,
            attributes: AttributeStore::from_row(row),
            relations: BTreeMap::new(),
            exists: true,
        }
    }

    pub fn definition(&self) -> &Arc<EntityDefinition> {
        &self.definition
    }

    pub fn exists(&self) -> bool {
        self.exists
    }

    pub(crate) fn set_exists(&mut self, exists: bool) {
        self.exists = exists;
    }

    /// Read an attribute, routing through the declared accessor and
    /// normalizing date-cast columns
    pub fn get_attribute(&self, key: &str) -> Option<Value> {
        let mut value = self.attributes.get(key).cloned();
        if let Some(v) = &value {
            if self.definition.is_date(key) {
                value = Some(normalize_date_value(v).unwrap_or_else(|_| v.clone()));
            }
        }
        if let Some(accessor) = self.definition.accessor(key) {
            return accessor(self, value);
        }
        value
    }

    /// Write an attribute, routing through the declared mutator and
    /// normalizing date-cast columns
    pub fn set_attribute(&mut self, key: &str, value: impl Into<Value>) -> ModelResult<&mut Self> {
        let mut value = value.into();
        if let Some(mutator) = self.definition.mutator(key) {
            let mutator = mutator.clone();
            value = mutator(self, value);
        }
        if self.definition.is_date(key) {
            value = normalize_date_value(&value)?;
        }
        self.attributes.set(key, value);
        Ok(self)
    }

    /// Mass-assign attributes under the definition's guarding policy.
    ///
    /// A totally-guarded type rejects every key. With a non-empty allow-list,
    /// keys outside it are discarded; the call fails when nothing at all
    /// passed the policy.
    pub fn fill<I, K>(&mut self, attrs: I) -> ModelResult<&mut Self>
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        let mut offered = 0usize;
        let mut applied = 0usize;
        let mut first_rejected: Option<String> = None;

        for (key, value) in attrs {
            let key = key.into();
            offered += 1;
            if self.definition.totally_guarded() {
                return Err(ModelError::MassAssignment(key));
            }
            if self.definition.is_fillable(&key) {
                self.set_attribute(&key, value)?;
                applied += 1;
            } else if first_rejected.is_none() {
                first_rejected = Some(key);
            }
        }

        if offered > 0 && applied == 0 && !self.definition.fillable().is_empty() {
            if let Some(key) = first_rejected {
                return Err(ModelError::MassAssignment(key));
            }
        }
        Ok(self)
    }

    /// Raw stored attributes (no accessors applied)
    pub fn attributes(&self) -> &BTreeMap<String, Value> {
        self.attributes.all()
    }

    pub(crate) fn attribute_store_mut(&mut self) -> &mut AttributeStore {
        &mut self.attributes
    }

    /// The current primary key value, if set
    pub fn primary_key(&self) -> Option<Value> {
        self.attributes
            .get(self.definition.primary_key())
            .filter(|v| !v.is_null())
            .cloned()
    }

    pub fn is_dirty(&self, keys: &[&str]) -> bool {
        self.attributes.is_dirty(keys)
    }

    pub fn get_dirty(&self) -> BTreeMap<String, Value> {
        self.attributes.dirty()
    }

    pub(crate) fn sync_original(&mut self) {
        self.attributes.sync_original();
    }

    /// A cached relation value, if it has been resolved
    pub fn get_relation(&self, name: &str) -> Option<&Related> {
        self.relations.get(name)
    }

    pub fn relation_is_loaded(&self, name: &str) -> bool {
        self.relations.contains_key(name)
    }

    pub fn set_relation(&mut self, name: impl Into<String>, value: Related) {
        self.relations.insert(name.into(), value);
    }

    /// Construct the declared relation by name. `constraints` selects between
    /// the parent-scoped form and the no-constraints introspection form used
    /// for batch loading and existence queries.
    pub fn relation(&self, name: &str, constraints: bool) -> ModelResult<Box<dyn Relation>> {
        let def = self
            .definition
            .relation(name)
            .ok_or_else(|| ModelError::UnknownRelation(name.to_string()))?;
        def.build(self, constraints)
    }

    /// The concrete many-to-many relation for a declared association,
    /// exposing the pivot operations (`attach`/`detach`/`sync`) the boxed
    /// trait object hides
    pub fn belongs_to_many(&self, name: &str) -> ModelResult<crate::relations::BelongsToMany> {
        let def = self
            .definition
            .relation(name)
            .ok_or_else(|| ModelError::UnknownRelation(name.to_string()))?;
        def.build_belongs_to_many(self, true)
    }

    /// Resolve a relation for this entity, caching the result. Repeated calls
    /// return the cached value without touching the connection.
    pub async fn load(
        &mut self,
        name: &str,
        conn: &dyn DatabaseConnection,
    ) -> ModelResult<&Related> {
        if !self.relations.contains_key(name) {
            let mut relation = self.relation(name, true)?;
            let value = relation.get_results(conn).await?;
            self.relations.insert(name.to_string(), value);
        }
        Ok(&self.relations[name])
    }
}
