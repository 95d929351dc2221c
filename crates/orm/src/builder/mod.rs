//! Entity query builder
//!
//! Wraps one [`QueryBuilder`] bound to one entity type: fluent constraint
//! delegation, key lookups, eager-load registration, relation existence
//! sub-queries, relation counts, global-scope removal, and caller-defined
//! macros. Cloning deep-clones the held query, so two builders never share
//! mutable query state.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use crate::backends::DatabaseConnection;
use crate::error::{ModelError, ModelResult};
use crate::loading::{eager_load_relations, ConstraintFn, EagerLoadPlan};
use crate::model::{Entity, EntityDefinition};
use crate::query::{QueryBuilder, WhereBoolean, WhereCondition};

/// Caller-defined builder verb
pub type MacroFn = Arc<dyn Fn(EntityBuilder) -> EntityBuilder + Send + Sync>;

/// Per-entity-type query façade
#[derive(Clone)]
pub struct EntityBuilder {
    definition: Arc<EntityDefinition>,
    query: QueryBuilder,
    eager: EagerLoadPlan,
    macros: HashMap<String, MacroFn>,
}

impl std::fmt::Debug for EntityBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityBuilder")
            .field("table", &self.definition.table())
            .field("eager", &self.eager)
            .finish_non_exhaustive()
    }
}

impl EntityBuilder {
    /// Build a query for the entity type with its global scopes applied and
    /// scope macros registered
    pub fn new(definition: Arc<EntityDefinition>) -> Self {
        let mut builder = Self::bare(definition);
        let definition = builder.definition.clone();
        for scope in definition.scopes() {
            scope.apply(&mut builder.query, &definition);
            builder = scope.extend(builder);
        }
        builder
    }

    /// Build a query without applying global scopes. Used for constraint
    /// templates that are replayed onto other builders.
    pub(crate) fn bare(definition: Arc<EntityDefinition>) -> Self {
        Self {
            query: QueryBuilder::table(definition.table()),
            definition,
            eager: EagerLoadPlan::new(),
            macros: HashMap::new(),
        }
    }

    pub fn definition(&self) -> &Arc<EntityDefinition> {
        &self.definition
    }

    pub fn query(&self) -> &QueryBuilder {
        &self.query
    }

    pub fn query_mut(&mut self) -> &mut QueryBuilder {
        &mut self.query
    }

    pub fn eager_plan(&self) -> &EagerLoadPlan {
        &self.eager
    }

    pub fn eager_plan_mut(&mut self) -> &mut EagerLoadPlan {
        &mut self.eager
    }

    /// Copy a template's constraints and eager plan onto this builder
    pub(crate) fn adopt_template(&mut self, template: &EntityBuilder) {
        self.query
            .where_conditions
            .extend(template.query.where_conditions.iter().cloned());
        self.eager.extend_from(&template.eager);
    }

    // --- fluent delegation to the held query -------------------------------

    pub fn select(mut self, columns: Vec<String>) -> Self {
        self.query = self.query.select(columns);
        self
    }

    pub fn add_select(mut self, expression: impl Into<String>) -> Self {
        self.query = self.query.add_select(expression);
        self
    }

    pub fn where_eq<T: Into<Value>>(mut self, column: &str, value: T) -> Self {
        self.query = self.query.where_eq(column, value);
        self
    }

    pub fn where_ne<T: Into<Value>>(mut self, column: &str, value: T) -> Self {
        self.query = self.query.where_ne(column, value);
        self
    }

    pub fn where_gt<T: Into<Value>>(mut self, column: &str, value: T) -> Self {
        self.query = self.query.where_gt(column, value);
        self
    }

    pub fn where_gte<T: Into<Value>>(mut self, column: &str, value: T) -> Self {
        self.query = self.query.where_gte(column, value);
        self
    }

    pub fn where_lt<T: Into<Value>>(mut self, column: &str, value: T) -> Self {
        self.query = self.query.where_lt(column, value);
        self
    }

    pub fn where_lte<T: Into<Value>>(mut self, column: &str, value: T) -> Self {
        self.query = self.query.where_lte(column, value);
        self
    }

    pub fn where_like(mut self, column: &str, pattern: &str) -> Self {
        self.query = self.query.where_like(column, pattern);
        self
    }

    pub fn where_in<T: Into<Value>>(mut self, column: &str, values: Vec<T>) -> Self {
        self.query = self.query.where_in(column, values);
        self
    }

    pub fn where_not_in<T: Into<Value>>(mut self, column: &str, values: Vec<T>) -> Self {
        self.query = self.query.where_not_in(column, values);
        self
    }

    pub fn where_null(mut self, column: &str) -> Self {
        self.query = self.query.where_null(column);
        self
    }

    pub fn where_not_null(mut self, column: &str) -> Self {
        self.query = self.query.where_not_null(column);
        self
    }

    pub fn where_raw(mut self, fragment: &str) -> Self {
        self.query = self.query.where_raw(fragment);
        self
    }

    pub fn order_by(mut self, column: &str) -> Self {
        self.query = self.query.order_by(column);
        self
    }

    pub fn order_by_desc(mut self, column: &str) -> Self {
        self.query = self.query.order_by_desc(column);
        self
    }

    pub fn group_by(mut self, column: &str) -> Self {
        self.query = self.query.group_by(column);
        self
    }

    pub fn limit(mut self, count: i64) -> Self {
        self.query = self.query.limit(count);
        self
    }

    pub fn offset(mut self, count: i64) -> Self {
        self.query = self.query.offset(count);
        self
    }

    // --- scopes and macros -------------------------------------------------

    /// Structurally strip the named global scope's predicates
    pub fn without_scope(mut self, identifier: &str) -> Self {
        let definition = self.definition.clone();
        if let Some(scope) = definition.scope_by_identifier(identifier) {
            scope.remove(&mut self.query, &definition);
        }
        self
    }

    /// Strip every global scope
    pub fn without_global_scopes(mut self) -> Self {
        let definition = self.definition.clone();
        for scope in definition.scopes() {
            scope.remove(&mut self.query, &definition);
        }
        self
    }

    /// Register a caller-defined builder verb
    pub fn register_macro<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(EntityBuilder) -> EntityBuilder + Send + Sync + 'static,
    {
        self.macros.insert(name.into(), Arc::new(f));
        self
    }

    /// Invoke a named verb: registered macros first, then the entity type's
    /// named scopes; anything else is an error.
    pub fn call(self, name: &str) -> ModelResult<Self> {
        if let Some(macro_fn) = self.macros.get(name).cloned() {
            return Ok(macro_fn(self));
        }
        if let Some(scope) = self.definition.local_scope(name).cloned() {
            return Ok(scope(self));
        }
        Err(ModelError::Query(format!("unknown builder verb '{}'", name)))
    }

    /// Include soft-deleted rows (macro registered by the soft-delete scope)
    pub fn with_trashed(self) -> ModelResult<Self> {
        self.call("with_trashed")
    }

    /// Only soft-deleted rows
    pub fn only_trashed(self) -> ModelResult<Self> {
        self.call("only_trashed")
    }

    // --- eager loading -----------------------------------------------------

    /// Register an eager-load path (dotted nesting allowed)
    pub fn with(mut self, name: &str) -> Self {
        self.eager.add(name, None);
        self
    }

    /// Register an eager-load path with a constraint on its query
    pub fn with_constrained<F>(mut self, name: &str, constraint: F) -> Self
    where
        F: Fn(EntityBuilder) -> EntityBuilder + Send + Sync + 'static,
    {
        self.eager.add(name, Some(Arc::new(constraint)));
        self
    }

    /// Unregister an eager-load path and everything nested under it
    pub fn without(mut self, name: &str) -> Self {
        self.eager.remove(name);
        self
    }

    // --- relation existence ------------------------------------------------

    /// Constrain to parents having at least one related row
    pub fn has(self, name: &str) -> ModelResult<Self> {
        self.add_has_constraint(name, None, false, WhereBoolean::And)
    }

    /// `has` with a constraint on the related query
    pub fn where_has<F>(self, name: &str, constraint: F) -> ModelResult<Self>
    where
        F: Fn(EntityBuilder) -> EntityBuilder + Send + Sync + 'static,
    {
        self.add_has_constraint(name, Some(Arc::new(constraint)), false, WhereBoolean::And)
    }

    /// Constrain to parents having no related rows
    pub fn doesnt_have(self, name: &str) -> ModelResult<Self> {
        self.add_has_constraint(name, None, true, WhereBoolean::And)
    }

    /// `doesnt_have` with a constraint on the related query
    pub fn where_doesnt_have<F>(self, name: &str, constraint: F) -> ModelResult<Self>
    where
        F: Fn(EntityBuilder) -> EntityBuilder + Send + Sync + 'static,
    {
        self.add_has_constraint(name, Some(Arc::new(constraint)), true, WhereBoolean::And)
    }

    pub fn or_has(self, name: &str) -> ModelResult<Self> {
        self.add_has_constraint(name, None, false, WhereBoolean::Or)
    }

    pub fn or_where_has<F>(self, name: &str, constraint: F) -> ModelResult<Self>
    where
        F: Fn(EntityBuilder) -> EntityBuilder + Send + Sync + 'static,
    {
        self.add_has_constraint(name, Some(Arc::new(constraint)), false, WhereBoolean::Or)
    }

    pub fn or_doesnt_have(self, name: &str) -> ModelResult<Self> {
        self.add_has_constraint(name, None, true, WhereBoolean::Or)
    }

    /// Inject a correlated count sub-query for the named relation, built from
    /// the relation's own constraint assembly. Dotted names recurse: the
    /// nested segment becomes an existence constraint on the relation's own
    /// builder.
    fn add_has_constraint(
        mut self,
        name: &str,
        constraint: Option<ConstraintFn>,
        negate: bool,
        boolean: WhereBoolean,
    ) -> ModelResult<Self> {
        let sub = self.relation_count_query(name, constraint)?;
        let comparison = if negate { "< 1" } else { ">= 1" };
        let fragment = format!("({}) {}", sub.to_sql(), comparison);
        self.query
            .where_conditions
            .push(WhereCondition::raw(fragment, boolean));
        Ok(self)
    }

    /// The bare-count sub-query for a relation, correlated to this builder's
    /// table through a raw column reference
    fn relation_count_query(
        &self,
        name: &str,
        constraint: Option<ConstraintFn>,
    ) -> ModelResult<QueryBuilder> {
        let probe = Entity::new(self.definition.clone());

        if let Some((head, rest)) = name.split_once('.') {
            let mut relation = probe.relation(head, false)?;
            let nested = relation
                .builder()
                .clone()
                .add_has_constraint(rest, constraint, false, WhereBoolean::And)?;
            *relation.builder_mut() = nested;
            return relation.existence_query(self.definition.table());
        }

        let mut relation = probe.relation(name, false)?;
        if let Some(constraint) = &constraint {
            relation.apply_constraint(constraint);
        }
        relation.existence_query(self.definition.table())
    }

    /// Add a correlated count sub-select aliased `<relation>_count`
    pub fn with_count(self, name: &str) -> ModelResult<Self> {
        self.with_count_as(name, &format!("{}_count", name), |b| b)
    }

    /// `with_count` with a constraint and an explicit alias
    pub fn with_count_as<F>(mut self, name: &str, alias: &str, constraint: F) -> ModelResult<Self>
    where
        F: Fn(EntityBuilder) -> EntityBuilder + Send + Sync + 'static,
    {
        let sub = self.relation_count_query(name, Some(Arc::new(constraint)))?;
        if self.query.select_is_empty() {
            let table = self.definition.table().to_string();
            self.query = self.query.add_select(format!("{}.*", table));
        }
        self.query = self
            .query
            .add_select(format!("({}) AS {}", sub.to_sql(), alias));
        Ok(self)
    }

    // --- retrieval ---------------------------------------------------------

    /// Execute, hydrate each row, and resolve any registered eager loads
    pub async fn get(self, conn: &dyn DatabaseConnection) -> ModelResult<Vec<Entity>> {
        let rows = self.query.fetch_rows(conn).await?;
        let mut entities: Vec<Entity> = rows
            .into_iter()
            .map(|row| Entity::hydrate(self.definition.clone(), row))
            .collect();
        if !self.eager.is_empty() {
            eager_load_relations(&mut entities, &self.eager, conn).await?;
        }
        Ok(entities)
    }

    /// Take one row
    pub async fn first(self, conn: &dyn DatabaseConnection) -> ModelResult<Option<Entity>> {
        let results = self.limit(1).get(conn).await?;
        Ok(results.into_iter().next())
    }

    /// Take one row or fail with the entity type's not-found error
    pub async fn first_or_fail(self, conn: &dyn DatabaseConnection) -> ModelResult<Entity> {
        let table = self.definition.table().to_string();
        self.first(conn)
            .await?
            .ok_or(ModelError::NotFound(table))
    }

    /// Take one row, or build a fallback entity
    pub async fn first_or<F>(self, conn: &dyn DatabaseConnection, default: F) -> ModelResult<Entity>
    where
        F: FnOnce() -> Entity,
    {
        Ok(self.first(conn).await?.unwrap_or_else(default))
    }

    /// Equality lookup on the primary key
    pub async fn find(self, conn: &dyn DatabaseConnection, id: Value) -> ModelResult<Option<Entity>> {
        let key = self.definition.qualified_key();
        self.where_eq(&key, id).first(conn).await
    }

    /// `IN` lookup on the primary key
    pub async fn find_many(
        self,
        conn: &dyn DatabaseConnection,
        ids: Vec<Value>,
    ) -> ModelResult<Vec<Entity>> {
        let key = self.definition.qualified_key();
        self.where_in(&key, ids).get(conn).await
    }

    /// `find` that raises the entity type's not-found error on a miss
    pub async fn find_or_fail(self, conn: &dyn DatabaseConnection, id: Value) -> ModelResult<Entity> {
        let table = self.definition.table().to_string();
        self.find(conn, id)
            .await?
            .ok_or(ModelError::NotFound(table))
    }

    /// Count matching rows
    pub async fn count(self, conn: &dyn DatabaseConnection) -> ModelResult<i64> {
        self.query.count(conn).await
    }

    /// Whether any row matches
    pub async fn exists_row(self, conn: &dyn DatabaseConnection) -> ModelResult<bool> {
        Ok(self.query.count(conn).await? > 0)
    }

    /// Collect one column across matching rows
    pub async fn pluck(
        self,
        conn: &dyn DatabaseConnection,
        column: &str,
    ) -> ModelResult<Vec<Value>> {
        self.query.pluck(conn, column).await
    }

    /// One column of the first matching row
    pub async fn value(
        self,
        conn: &dyn DatabaseConnection,
        column: &str,
    ) -> ModelResult<Option<Value>> {
        Ok(self
            .first(conn)
            .await?
            .and_then(|entity| entity.get_attribute(column)))
    }

    // --- bulk DML ----------------------------------------------------------

    /// UPDATE every matching row with the given assignments
    pub async fn update_all(
        self,
        conn: &dyn DatabaseConnection,
        assignments: Vec<(String, Value)>,
    ) -> ModelResult<u64> {
        let mut update = QueryBuilder::new()
            .update_table_named(self.definition.table())
            .set_many(assignments);
        update.where_conditions = self.query.where_conditions;
        update.execute(conn).await
    }

    /// DELETE every matching row
    pub async fn delete_all(self, conn: &dyn DatabaseConnection) -> ModelResult<u64> {
        let mut delete = QueryBuilder::new().delete_from(self.definition.table());
        delete.where_conditions = self.query.where_conditions;
        delete.execute(conn).await
    }

    /// Undo the delete substitution of a delete-intercepting scope for every
    /// matching row (soft-deleted rows come back)
    pub async fn restore(self, conn: &dyn DatabaseConnection) -> ModelResult<u64> {
        let definition = self.definition.clone();
        let scope = definition
            .scopes()
            .iter()
            .find(|s| s.restore_assignments(&definition).is_some())
            .ok_or_else(|| {
                ModelError::Configuration(
                    "entity type has no restorable delete scope".to_string(),
                )
            })?;
        let assignments = scope
            .restore_assignments(&definition)
            .unwrap_or_default();
        let identifier = scope.identifier().to_string();
        self.without_scope(&identifier)
            .update_all(conn, assignments)
            .await
    }

    /// Delete matching rows for real, bypassing delete-intercepting scopes
    pub async fn force_delete(self, conn: &dyn DatabaseConnection) -> ModelResult<u64> {
        self.without_global_scopes().delete_all(conn).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::memory::{row, MemoryConnection};
    use crate::model::EntityDefinition;
    use serde_json::json;

    fn users() -> Arc<EntityDefinition> {
        EntityDefinition::builder("users").guarded(vec![]).build()
    }

    #[tokio::test]
    async fn test_find_queries_by_primary_key() {
        let conn = MemoryConnection::new();
        conn.push_rows(vec![row([("id", 1i64)]).set("name", "Ada")]);

        let found = EntityBuilder::new(users())
            .find(&conn, json!(1))
            .await
            .unwrap()
            .expect("row expected");
        assert_eq!(found.get_attribute("name"), Some(json!("Ada")));

        let log = conn.statements();
        assert!(log[0].sql.contains("WHERE users.id = $1"));
        assert!(log[0].sql.contains("LIMIT 1"));
    }

    #[tokio::test]
    async fn test_find_or_fail_raises_not_found() {
        let conn = MemoryConnection::new();
        let err = EntityBuilder::new(users())
            .find_or_fail(&conn, json!(42))
            .await
            .unwrap_err();
        assert!(matches!(err, ModelError::NotFound(table) if table == "users"));
    }

    #[tokio::test]
    async fn test_first_or_builds_fallback() {
        let conn = MemoryConnection::new();
        let def = users();
        let entity = EntityBuilder::new(def.clone())
            .first_or(&conn, || Entity::new(def.clone()))
            .await
            .unwrap();
        assert!(!entity.exists());
    }

    #[test]
    fn test_clone_produces_independent_query_state() {
        let base = EntityBuilder::new(users()).where_eq("active", true);
        let branched = base.clone().where_eq("admin", true);
        assert_eq!(base.query().conditions().len(), 1);
        assert_eq!(branched.query().conditions().len(), 2);
    }

    #[test]
    fn test_unknown_verb_is_an_error() {
        let builder = EntityBuilder::new(users());
        assert!(matches!(
            builder.call("sparkle"),
            Err(ModelError::Query(_))
        ));
    }

    #[test]
    fn test_macro_takes_precedence_over_scope() {
        let def = EntityDefinition::builder("users")
            .local_scope("active", |b| b.where_eq("active", true))
            .build();
        let builder = EntityBuilder::new(def)
            .register_macro("active", |b| b.where_eq("macro_applied", true));
        let called = builder.call("active").unwrap();
        assert_eq!(called.query().conditions()[0].column, "macro_applied");
    }

    #[test]
    fn test_local_scope_resolution() {
        let def = EntityDefinition::builder("users")
            .local_scope("active", |b| b.where_eq("active", true))
            .build();
        let called = EntityBuilder::new(def).call("active").unwrap();
        assert_eq!(called.query().conditions()[0].column, "active");
    }
}
