//! Many-to-many relation through a pivot table
//!
//! Also covers the polymorphic flavor: with a morph constraint set, every
//! pivot predicate and insert additionally carries the discriminator column.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;

use super::pivot::{PivotRecord, PIVOT_PREFIX};
use super::{collect_keys, key_string, Relation};
use crate::backends::DatabaseConnection;
use crate::builder::EntityBuilder;
use crate::error::{ModelError, ModelResult};
use crate::model::{Entity, EntityDefinition, Related};
use crate::query::QueryBuilder;
use crate::relations::pivot::SyncChanges;

pub struct BelongsToMany {
    builder: EntityBuilder,
    related: Arc<EntityDefinition>,
    pivot_table: String,
    foreign_pivot_key: String,
    related_pivot_key: String,
    parent_key: String,
    related_key: String,
    pivot_columns: Vec<String>,
    pivot_timestamps: bool,
    /// Discriminator column and value for the polymorphic flavor
    morph: Option<(String, String)>,
    parent_key_value: Option<Value>,
}

impl BelongsToMany {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        parent: &Entity,
        related: Arc<EntityDefinition>,
        pivot_table: &str,
        foreign_pivot_key: &str,
        related_pivot_key: &str,
        parent_key: &str,
        related_key: &str,
        pivot_columns: Vec<String>,
        pivot_timestamps: bool,
        morph: Option<(String, String)>,
        constraints: bool,
    ) -> Self {
        let mut builder = EntityBuilder::new(related.clone());
        {
            let query = builder.query_mut();
            *query = std::mem::take(query).join(
                pivot_table,
                &format!("{}.{}", pivot_table, related_pivot_key),
                &format!("{}.{}", related.table(), related_key),
            );
        }

        let parent_key_value = parent.get_attribute(parent_key).filter(|v| !v.is_null());

        if constraints {
            let key = parent_key_value.clone().unwrap_or(Value::Null);
            builder = builder.where_eq(&format!("{}.{}", pivot_table, foreign_pivot_key), key);
            if let Some((column, class)) = &morph {
                builder = builder.where_eq(
                    &format!("{}.{}", pivot_table, column),
                    Value::String(class.clone()),
                );
            }
        }

        Self {
            builder,
            related,
            pivot_table: pivot_table.to_string(),
            foreign_pivot_key: foreign_pivot_key.to_string(),
            related_pivot_key: related_pivot_key.to_string(),
            parent_key: parent_key.to_string(),
            related_key: related_key.to_string(),
            pivot_columns,
            pivot_timestamps,
            morph,
            parent_key_value,
        }
    }

    fn qualified_pivot(&self, column: &str) -> String {
        format!("{}.{}", self.pivot_table, column)
    }

    /// Pivot columns carried onto each fetched related row
    fn selected_pivot_columns(&self) -> Vec<String> {
        let mut columns = vec![
            self.foreign_pivot_key.clone(),
            self.related_pivot_key.clone(),
        ];
        columns.extend(self.pivot_columns.iter().cloned());
        if self.pivot_timestamps {
            columns.push("created_at".to_string());
            columns.push("updated_at".to_string());
        }
        columns
    }

    fn parent_key_value(&self) -> ModelResult<Value> {
        self.parent_key_value
            .clone()
            .ok_or(ModelError::MissingPrimaryKey)
    }

    fn morph_where(&self, query: QueryBuilder) -> QueryBuilder {
        match &self.morph {
            Some((column, class)) => {
                query.where_eq(&self.qualified_pivot(column), Value::String(class.clone()))
            }
            None => query,
        }
    }

    /// Base query for pivot-table DML, scoped to this parent
    fn pivot_query(&self) -> ModelResult<QueryBuilder> {
        let parent = self.parent_key_value()?;
        let mut query = QueryBuilder::table(&self.pivot_table)
            .where_eq(&self.foreign_pivot_key, parent);
        if let Some((column, class)) = &self.morph {
            query = query.where_eq(column.as_str(), Value::String(class.clone()));
        }
        Ok(query)
    }

    /// The related ids currently present in the pivot table for this parent
    pub async fn current_ids(&self, conn: &dyn DatabaseConnection) -> ModelResult<Vec<Value>> {
        self.pivot_query()?
            .pluck(conn, &self.related_pivot_key)
            .await
    }

    /// Insert one pivot row per id, merging extra attributes and populating
    /// timestamps when the pivot declares them
    pub async fn attach(
        &self,
        conn: &dyn DatabaseConnection,
        ids: &[Value],
        extra: &[(String, Value)],
    ) -> ModelResult<()> {
        let parent = self.parent_key_value()?;
        for id in ids {
            let mut insert = QueryBuilder::new()
                .insert_into(&self.pivot_table)
                .set(&self.foreign_pivot_key, parent.clone())
                .set(&self.related_pivot_key, id.clone());
            if let Some((column, class)) = &self.morph {
                insert = insert.set(column, Value::String(class.clone()));
            }
            for (column, value) in extra {
                insert = insert.set(column, value.clone());
            }
            if self.pivot_timestamps {
                let now = Value::String(Utc::now().to_rfc3339());
                insert = insert.set("created_at", now.clone()).set("updated_at", now);
            }
            insert.execute(conn).await?;
        }
        Ok(())
    }

    /// Delete matching pivot rows; no ids means detach everything for the
    /// parent
    pub async fn detach(
        &self,
        conn: &dyn DatabaseConnection,
        ids: Option<&[Value]>,
    ) -> ModelResult<u64> {
        let parent = self.parent_key_value()?;
        let mut query = QueryBuilder::new()
            .delete_from(&self.pivot_table)
            .where_eq(&self.foreign_pivot_key, parent);
        if let Some((column, class)) = &self.morph {
            query = query.where_eq(column.as_str(), Value::String(class.clone()));
        }
        if let Some(ids) = ids {
            if ids.is_empty() {
                return Ok(0);
            }
            query = query.where_in(&self.related_pivot_key, ids.to_vec());
        }
        query.execute(conn).await
    }

    /// Update one existing pivot row matched by both foreign keys
    pub async fn update_existing_pivot(
        &self,
        conn: &dyn DatabaseConnection,
        id: &Value,
        attrs: &[(String, Value)],
    ) -> ModelResult<u64> {
        let parent = self.parent_key_value()?;
        let mut query = QueryBuilder::new().update_table_named(&self.pivot_table);
        for (column, value) in attrs {
            query = query.set(column, value.clone());
        }
        if self.pivot_timestamps {
            query = query.set("updated_at", Value::String(Utc::now().to_rfc3339()));
        }
        query = query
            .where_eq(&self.foreign_pivot_key, parent)
            .where_eq(&self.related_pivot_key, id.clone());
        if let Some((column, class)) = &self.morph {
            query = query.where_eq(column.as_str(), Value::String(class.clone()));
        }
        query.execute(conn).await
    }

    /// Diff the requested records against the current pivot rows: ids absent
    /// from the request are detached (unless `detaching` is off), new ids are
    /// attached, and ids present on both sides with non-empty extra
    /// attributes get their pivot row updated.
    pub async fn sync(
        &self,
        conn: &dyn DatabaseConnection,
        records: &[(Value, Vec<(String, Value)>)],
        detaching: bool,
    ) -> ModelResult<SyncChanges> {
        let current = self.current_ids(conn).await?;
        let current_keys: std::collections::HashSet<String> =
            current.iter().map(key_string).collect();
        let requested_keys: std::collections::HashSet<String> =
            records.iter().map(|(id, _)| key_string(id)).collect();

        let mut changes = SyncChanges::default();

        let detach_ids: Vec<Value> = current
            .iter()
            .filter(|id| !requested_keys.contains(&key_string(id)))
            .cloned()
            .collect();
        if detaching && !detach_ids.is_empty() {
            self.detach(conn, Some(&detach_ids)).await?;
            changes.detached = detach_ids;
        }

        for (id, extra) in records {
            if !current_keys.contains(&key_string(id)) {
                self.attach(conn, std::slice::from_ref(id), extra).await?;
                changes.attached.push(id.clone());
            } else if !extra.is_empty() {
                self.update_existing_pivot(conn, id, extra).await?;
                changes.updated.push(id.clone());
            }
        }

        Ok(changes)
    }

    /// `sync` without extra pivot attributes
    pub async fn sync_ids(
        &self,
        conn: &dyn DatabaseConnection,
        ids: Vec<Value>,
        detaching: bool,
    ) -> ModelResult<SyncChanges> {
        let records: Vec<(Value, Vec<(String, Value)>)> =
            ids.into_iter().map(|id| (id, Vec::new())).collect();
        self.sync(conn, &records, detaching).await
    }
}

#[async_trait]
impl Relation for BelongsToMany {
    fn builder(&self) -> &EntityBuilder {
        &self.builder
    }

    fn builder_mut(&mut self) -> &mut EntityBuilder {
        &mut self.builder
    }

    fn add_eager_constraints(&mut self, parents: &[Entity]) {
        let keys = collect_keys(parents, &self.parent_key);
        let builder = self.builder.clone();
        let constrained = builder.where_in(&self.qualified_pivot(&self.foreign_pivot_key), keys);
        self.builder = match &self.morph {
            Some((column, class)) => constrained.where_eq(
                &self.qualified_pivot(column),
                Value::String(class.clone()),
            ),
            None => constrained,
        };
    }

    fn init_relation(&self, parents: &mut [Entity], name: &str) {
        for parent in parents.iter_mut() {
            parent.set_relation(name, Related::Many(Vec::new()));
        }
    }

    fn match_eager(&self, parents: &mut [Entity], results: Vec<Entity>, name: &str) {
        // dictionary keyed by the pivot record's parent-side foreign key
        let mut dictionary: std::collections::HashMap<String, Vec<Entity>> =
            std::collections::HashMap::new();
        for entity in results {
            let key = PivotRecord::of(&entity)
                .and_then(|pivot| pivot.get_attribute(&self.foreign_pivot_key));
            if let Some(key) = key {
                dictionary.entry(key_string(&key)).or_default().push(entity);
            }
        }

        for parent in parents.iter_mut() {
            if let Some(key) = parent.get_attribute(&self.parent_key) {
                if let Some(related) = dictionary.get(&key_string(&key)) {
                    parent.set_relation(name, Related::Many(related.clone()));
                }
            }
        }
    }

    async fn get_results(&self, conn: &dyn DatabaseConnection) -> ModelResult<Related> {
        Ok(Related::Many(self.fetch_results(conn).await?))
    }

    /// Fetch with pivot columns aliased in, then strip them off into the
    /// attached pivot records
    async fn fetch_results(&self, conn: &dyn DatabaseConnection) -> ModelResult<Vec<Entity>> {
        let mut builder = self.builder.clone();
        if builder.query().select_is_empty() {
            let mut fields = vec![format!("{}.*", self.related.table())];
            for column in self.selected_pivot_columns() {
                fields.push(format!(
                    "{} AS {}{}",
                    self.qualified_pivot(&column),
                    PIVOT_PREFIX,
                    column
                ));
            }
            builder = builder.select(fields);
        }

        let mut results = builder.get(conn).await?;
        for entity in &mut results {
            PivotRecord::strip(entity, &self.pivot_table);
        }
        Ok(results)
    }

    fn existence_query(&self, parent_table: &str) -> ModelResult<QueryBuilder> {
        let query = self
            .builder
            .query()
            .clone()
            .select(vec!["COUNT(*)".to_string()])
            .strip_ordering()
            .where_raw(&format!(
                "{}.{} = {}.{}",
                self.pivot_table, self.foreign_pivot_key, parent_table, self.parent_key
            ));
        Ok(self.morph_where(query))
    }
}
