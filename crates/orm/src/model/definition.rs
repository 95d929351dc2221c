//! Entity type descriptors
//!
//! One immutable [`EntityDefinition`] exists per entity type, built once at
//! startup and shared by `Arc`. Everything the engine needs to know about a
//! type lives here: table and key metadata, the mass-assignment policy, date
//! casts, accessors/mutators, the relation registry, global and named scopes,
//! and the observer list. There is no class-keyed global state.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;

use crate::builder::EntityBuilder;
use crate::events::EntityObserver;
use crate::model::entity::Entity;
use crate::relations::RelationDef;
use crate::scope::Scope;

/// Attribute read transform: receives the entity and the raw stored value
pub type AccessorFn = Arc<dyn Fn(&Entity, Option<Value>) -> Option<Value> + Send + Sync>;

/// Attribute write transform: receives the entity and the incoming value
pub type MutatorFn = Arc<dyn Fn(&Entity, Value) -> Value + Send + Sync>;

/// Named query scope, applied on demand by name
pub type LocalScopeFn = Arc<dyn Fn(EntityBuilder) -> EntityBuilder + Send + Sync>;

/// Immutable descriptor for one entity type
pub struct EntityDefinition {
    table: String,
    primary_key: String,
    increments: bool,
    connection: Option<String>,
    timestamps: bool,
    fillable: Vec<String>,
    guarded: Vec<String>,
    dates: Vec<String>,
    morph_class: String,
    relations: BTreeMap<String, RelationDef>,
    scopes: Vec<Arc<dyn Scope>>,
    local_scopes: BTreeMap<String, LocalScopeFn>,
    accessors: BTreeMap<String, AccessorFn>,
    mutators: BTreeMap<String, MutatorFn>,
    observers: Vec<Arc<dyn EntityObserver>>,
}

impl std::fmt::Debug for EntityDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityDefinition")
            .field("table", &self.table)
            .field("primary_key", &self.primary_key)
            .field("relations", &self.relations.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl EntityDefinition {
    /// Start building a definition for the given table
    pub fn builder(table: impl Into<String>) -> DefinitionBuilder {
        DefinitionBuilder::new(table)
    }

    /// Minimal definition for a pivot table row
    pub(crate) fn pivot(table: &str) -> Arc<Self> {
        DefinitionBuilder::new(table).guarded(Vec::new()).build()
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn primary_key(&self) -> &str {
        &self.primary_key
    }

    /// Primary key qualified with the table name
    pub fn qualified_key(&self) -> String {
        format!("{}.{}", self.table, self.primary_key)
    }

    pub fn increments(&self) -> bool {
        self.increments
    }

    pub fn connection(&self) -> Option<&str> {
        self.connection.as_deref()
    }

    pub fn timestamps(&self) -> bool {
        self.timestamps
    }

    pub fn fillable(&self) -> &[String] {
        &self.fillable
    }

    pub fn guarded(&self) -> &[String] {
        &self.guarded
    }

    /// True when the type is guarded-all: no allow-list and a `*` deny-list
    pub fn totally_guarded(&self) -> bool {
        self.fillable.is_empty() && self.guarded.iter().any(|g| g == "*")
    }

    /// Whether a single key may be mass-assigned
    pub fn is_fillable(&self, key: &str) -> bool {
        if !self.fillable.is_empty() {
            return self.fillable.iter().any(|f| f == key);
        }
        !self.guarded.iter().any(|g| g == "*" || g == key)
    }

    /// Whether a column is cast to the canonical date representation
    pub fn is_date(&self, key: &str) -> bool {
        if self.timestamps && (key == "created_at" || key == "updated_at") {
            return true;
        }
        self.dates.iter().any(|d| d == key)
    }

    /// Discriminator value stored for this type in polymorphic columns
    pub fn morph_class(&self) -> &str {
        &self.morph_class
    }

    pub fn relation(&self, name: &str) -> Option<&RelationDef> {
        self.relations.get(name)
    }

    pub fn relation_names(&self) -> Vec<&str> {
        self.relations.keys().map(|k| k.as_str()).collect()
    }

    pub fn scopes(&self) -> &[Arc<dyn Scope>] {
        &self.scopes
    }

    pub fn scope_by_identifier(&self, identifier: &str) -> Option<&Arc<dyn Scope>> {
        self.scopes.iter().find(|s| s.identifier() == identifier)
    }

    pub fn local_scope(&self, name: &str) -> Option<&LocalScopeFn> {
        self.local_scopes.get(name)
    }

    pub fn accessor(&self, key: &str) -> Option<&AccessorFn> {
        self.accessors.get(key)
    }

    pub fn mutator(&self, key: &str) -> Option<&MutatorFn> {
        self.mutators.get(key)
    }

    pub fn observers(&self) -> &[Arc<dyn EntityObserver>] {
        &self.observers
    }
}

/// Builder for [`EntityDefinition`]
pub struct DefinitionBuilder {
    table: String,
    primary_key: String,
    increments: bool,
    connection: Option<String>,
    timestamps: bool,
    fillable: Vec<String>,
    guarded: Vec<String>,
    dates: Vec<String>,
    morph_class: Option<String>,
    relations: BTreeMap<String, RelationDef>,
    scopes: Vec<Arc<dyn Scope>>,
    local_scopes: BTreeMap<String, LocalScopeFn>,
    accessors: BTreeMap<String, AccessorFn>,
    mutators: BTreeMap<String, MutatorFn>,
    observers: Vec<Arc<dyn EntityObserver>>,
}

impl DefinitionBuilder {
    fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            primary_key: "id".to_string(),
            increments: true,
            connection: None,
            timestamps: false,
            fillable: Vec::new(),
            guarded: vec!["*".to_string()],
            dates: Vec::new(),
            morph_class: None,
            relations: BTreeMap::new(),
            scopes: Vec::new(),
            local_scopes: BTreeMap::new(),
            accessors: BTreeMap::new(),
            mutators: BTreeMap::new(),
            observers: Vec::new(),
        }
    }

    pub fn primary_key(mut self, key: impl Into<String>) -> Self {
        self.primary_key = key.into();
        self
    }

    pub fn increments(mut self, increments: bool) -> Self {
        self.increments = increments;
        self
    }

    pub fn connection(mut self, name: impl Into<String>) -> Self {
        self.connection = Some(name.into());
        self
    }

    pub fn timestamps(mut self) -> Self {
        self.timestamps = true;
        self
    }

    pub fn fillable(mut self, keys: Vec<&str>) -> Self {
        self.fillable = keys.into_iter().map(String::from).collect();
        self
    }

    pub fn guarded(mut self, keys: Vec<&str>) -> Self {
        self.guarded = keys.into_iter().map(String::from).collect();
        self
    }

    pub fn dates(mut self, keys: Vec<&str>) -> Self {
        self.dates = keys.into_iter().map(String::from).collect();
        self
    }

    pub fn morph_class(mut self, class: impl Into<String>) -> Self {
        self.morph_class = Some(class.into());
        self
    }

    pub fn relation(mut self, name: impl Into<String>, def: RelationDef) -> Self {
        self.relations.insert(name.into(), def);
        self
    }

    pub fn scope(mut self, scope: Arc<dyn Scope>) -> Self {
        self.scopes.push(scope);
        self
    }

    pub fn local_scope<F>(mut self, name: impl Into<String>, scope: F) -> Self
    where
        F: Fn(EntityBuilder) -> EntityBuilder + Send + Sync + 'static,
    {
        self.local_scopes.insert(name.into(), Arc::new(scope));
        self
    }

    pub fn accessor<F>(mut self, key: impl Into<String>, f: F) -> Self
    where
        F: Fn(&Entity, Option<Value>) -> Option<Value> + Send + Sync + 'static,
    {
        self.accessors.insert(key.into(), Arc::new(f));
        self
    }

    pub fn mutator<F>(mut self, key: impl Into<String>, f: F) -> Self
    where
        F: Fn(&Entity, Value) -> Value + Send + Sync + 'static,
    {
        self.mutators.insert(key.into(), Arc::new(f));
        self
    }

    pub fn observer(mut self, observer: Arc<dyn EntityObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn build(self) -> Arc<EntityDefinition> {
        Arc::new(EntityDefinition {
            morph_class: self.morph_class.unwrap_or_else(|| self.table.clone()),
            table: self.table,
            primary_key: self.primary_key,
            increments: self.increments,
            connection: self.connection,
            timestamps: self.timestamps,
            fillable: self.fillable,
            guarded: self.guarded,
            dates: self.dates,
            relations: self.relations,
            scopes: self.scopes,
            local_scopes: self.local_scopes,
            accessors: self.accessors,
            mutators: self.mutators,
            observers: self.observers,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_guarded_all() {
        let def = EntityDefinition::builder("users").build();
        assert_eq!(def.table(), "users");
        assert_eq!(def.primary_key(), "id");
        assert!(def.totally_guarded());
        assert!(!def.is_fillable("name"));
    }

    #[test]
    fn test_fillable_allow_list_wins() {
        let def = EntityDefinition::builder("users")
            .fillable(vec!["name", "email"])
            .build();
        assert!(!def.totally_guarded());
        assert!(def.is_fillable("name"));
        assert!(!def.is_fillable("role"));
    }

    #[test]
    fn test_guarded_deny_list() {
        let def = EntityDefinition::builder("users")
            .guarded(vec!["role"])
            .build();
        assert!(def.is_fillable("name"));
        assert!(!def.is_fillable("role"));
    }

    #[test]
    fn test_timestamps_imply_date_casts() {
        let def = EntityDefinition::builder("users").timestamps().build();
        assert!(def.is_date("created_at"));
        assert!(def.is_date("updated_at"));
        assert!(!def.is_date("name"));
    }

    #[test]
    fn test_morph_class_defaults_to_table() {
        let def = EntityDefinition::builder("posts").build();
        assert_eq!(def.morph_class(), "posts");
        let custom = EntityDefinition::builder("posts").morph_class("post").build();
        assert_eq!(custom.morph_class(), "post");
    }
}
