//! Lifecycle hooks
//!
//! Observers attach to an [`EntityDefinition`] and are invoked around every
//! persistence phase. Returning [`EventError::halt`] from a `*ing` hook
//! vetoes the operation; any other error aborts it as a failure.
//!
//! [`EntityDefinition`]: crate::model::EntityDefinition

use async_trait::async_trait;

use crate::event_error::EventError;
use crate::model::Entity;

/// Observer of an entity type's persistence lifecycle. Every hook defaults to
/// a no-op; implementations override the phases they care about.
#[async_trait]
pub trait EntityObserver: Send + Sync {
    async fn creating(&self, _entity: &mut Entity) -> Result<(), EventError> {
        Ok(())
    }

    async fn created(&self, _entity: &Entity) -> Result<(), EventError> {
        Ok(())
    }

    async fn updating(&self, _entity: &mut Entity) -> Result<(), EventError> {
        Ok(())
    }

    async fn updated(&self, _entity: &Entity) -> Result<(), EventError> {
        Ok(())
    }

    async fn saving(&self, _entity: &mut Entity) -> Result<(), EventError> {
        Ok(())
    }

    async fn saved(&self, _entity: &Entity) -> Result<(), EventError> {
        Ok(())
    }

    async fn deleting(&self, _entity: &mut Entity) -> Result<(), EventError> {
        Ok(())
    }

    async fn deleted(&self, _entity: &Entity) -> Result<(), EventError> {
        Ok(())
    }
}
