//! Entity, attribute state, and per-type descriptors

pub mod attributes;
pub mod definition;
pub mod entity;
pub mod persistence;

pub use attributes::{normalize_date_value, values_equivalent, AttributeStore};
pub use definition::{AccessorFn, DefinitionBuilder, EntityDefinition, LocalScopeFn, MutatorFn};
pub use entity::{Entity, Related};
