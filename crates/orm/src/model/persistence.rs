//! Entity persistence lifecycle
//!
//! Insert/update/delete with lifecycle hooks around each phase. The `*ing`
//! hooks can veto: the operation is abandoned and the call returns `false`
//! without an error. Updates touch only the dirty attribute subset; a clean
//! entity saves without issuing a statement.

use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;

use super::definition::EntityDefinition;
use super::entity::Entity;
use crate::backends::DatabaseConnection;
use crate::builder::EntityBuilder;
use crate::error::{ModelError, ModelResult};
use crate::observers::{fire, Hook};
use crate::query::QueryBuilder;

impl Entity {
    /// Persist this entity: insert when new, update the dirty subset when it
    /// already exists. Returns `Ok(false)` when a hook vetoed the operation.
    pub async fn save(&mut self, conn: &dyn DatabaseConnection) -> ModelResult<bool> {
        if !fire(self, Hook::Saving).await? {
            return Ok(false);
        }

        let saved = if self.exists() {
            self.perform_update(conn).await?
        } else {
            self.perform_insert(conn).await?
        };

        if !saved {
            return Ok(false);
        }

        fire(self, Hook::Saved).await?;
        Ok(true)
    }

    async fn perform_insert(&mut self, conn: &dyn DatabaseConnection) -> ModelResult<bool> {
        if !fire(self, Hook::Creating).await? {
            return Ok(false);
        }

        if self.definition().timestamps() {
            let now = fresh_timestamp();
            if self.get_attribute("created_at").is_none() {
                self.set_attribute("created_at", now.clone())?;
            }
            self.set_attribute("updated_at", now)?;
        }

        let definition = self.definition().clone();
        let mut query = QueryBuilder::new().insert_into(definition.table());
        for (column, value) in self.attributes() {
            query = query.set(column, value.clone());
        }

        if definition.increments() && self.primary_key().is_none() {
            query = query.returning(definition.primary_key());
            if let Some(id) = query.insert_get_id(conn, definition.primary_key()).await? {
                self.set_attribute(definition.primary_key(), id)?;
            }
        } else {
            query.execute(conn).await?;
        }

        self.set_exists(true);
        self.sync_original();
        fire(self, Hook::Created).await?;
        Ok(true)
    }

    async fn perform_update(&mut self, conn: &dyn DatabaseConnection) -> ModelResult<bool> {
        if self.get_dirty().is_empty() {
            // nothing to write; still a successful save
            return Ok(true);
        }

        if !fire(self, Hook::Updating).await? {
            return Ok(false);
        }

        if self.definition().timestamps() {
            self.set_attribute("updated_at", fresh_timestamp())?;
        }

        let definition = self.definition().clone();
        let key = self.primary_key().ok_or(ModelError::MissingPrimaryKey)?;
        let dirty = self.get_dirty();

        let mut query = QueryBuilder::new().update_table_named(definition.table());
        for (column, value) in &dirty {
            if column != definition.primary_key() {
                query = query.set(column, value.clone());
            }
        }
        query = query.where_eq(definition.primary_key(), key);
        query.execute(conn).await?;

        self.sync_original();
        fire(self, Hook::Updated).await?;
        Ok(true)
    }

    /// Delete the stored row. A registered scope may substitute the delete
    /// with an update (soft delete); the substitution is transparent here.
    /// Returns `Ok(false)` when the `deleting` hook vetoed.
    pub async fn delete(&mut self, conn: &dyn DatabaseConnection) -> ModelResult<bool> {
        let definition = self.definition().clone();
        let key = self.primary_key().ok_or(ModelError::MissingPrimaryKey)?;

        if !fire(self, Hook::Deleting).await? {
            return Ok(false);
        }

        let mut query = QueryBuilder::new()
            .delete_from(definition.table())
            .where_eq(definition.primary_key(), key);

        let mut assignments: Option<Vec<(String, Value)>> = None;
        for scope in definition.scopes() {
            if let Some(applied) = scope.intercept_delete(&mut query, &definition) {
                tracing::debug!(table = definition.table(), "delete intercepted by scope");
                assignments = Some(applied);
                break;
            }
        }

        query.execute(conn).await?;

        if let Some(applied) = assignments {
            for (column, value) in applied {
                self.set_attribute(&column, value)?;
            }
            self.sync_original();
        }

        fire(self, Hook::Deleted).await?;
        self.set_exists(false);
        Ok(true)
    }

    /// Delete the stored row unconditionally, bypassing scope interception
    pub async fn force_delete(&mut self, conn: &dyn DatabaseConnection) -> ModelResult<bool> {
        let definition = self.definition().clone();
        let key = self.primary_key().ok_or(ModelError::MissingPrimaryKey)?;

        if !fire(self, Hook::Deleting).await? {
            return Ok(false);
        }

        QueryBuilder::new()
            .delete_from(definition.table())
            .where_eq(definition.primary_key(), key)
            .execute(conn)
            .await?;

        fire(self, Hook::Deleted).await?;
        self.set_exists(false);
        Ok(true)
    }

    /// A query builder for the entity type
    pub fn query(definition: &Arc<EntityDefinition>) -> EntityBuilder {
        EntityBuilder::new(definition.clone())
    }

    /// Fetch every row of the entity type
    pub async fn all(
        definition: &Arc<EntityDefinition>,
        conn: &dyn DatabaseConnection,
    ) -> ModelResult<Vec<Entity>> {
        Self::query(definition).get(conn).await
    }

    /// Look up one entity by primary key
    pub async fn find(
        definition: &Arc<EntityDefinition>,
        conn: &dyn DatabaseConnection,
        id: Value,
    ) -> ModelResult<Option<Entity>> {
        Self::query(definition).find(conn, id).await
    }

    /// Mass-assign and persist a new entity in one step
    pub async fn create<I, K>(
        definition: &Arc<EntityDefinition>,
        conn: &dyn DatabaseConnection,
        attrs: I,
    ) -> ModelResult<Entity>
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        let mut entity = Entity::new(definition.clone());
        entity.fill(attrs)?;
        entity.save(conn).await?;
        Ok(entity)
    }
}

fn fresh_timestamp() -> Value {
    Value::String(Utc::now().to_rfc3339())
}
