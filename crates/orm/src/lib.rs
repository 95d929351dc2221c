//! # quarry-orm: active-record entity mapping
//!
//! Maps persisted rows to in-memory entities, resolves declared relations
//! between entity types, and assembles multi-entity object graphs from a
//! minimal number of queries: batch eager loading with dictionary matching,
//! a polymorphic relation hierarchy, diff-based pivot synchronization, and
//! removable global scopes such as soft deletes.

pub mod backends;
pub mod builder;
pub mod error;
pub mod event_error;
pub mod events;
pub mod loading;
pub mod model;
pub mod observers;
pub mod query;
pub mod relations;
pub mod resolver;
pub mod scope;

// Re-export core types
pub use backends::{DatabaseConnection, DatabaseRow, DatabaseValue};
pub use builder::EntityBuilder;
pub use error::{ModelError, ModelResult, OrmError, OrmResult};
pub use event_error::EventError;
pub use events::EntityObserver;
pub use loading::EagerLoadPlan;
pub use model::{Entity, EntityDefinition, Related};
pub use query::QueryBuilder;
pub use relations::{BelongsToMany, PivotRecord, Relation, RelationDef, SyncChanges};
pub use resolver::ConnectionResolver;
pub use scope::{Scope, SoftDeleteScope};
