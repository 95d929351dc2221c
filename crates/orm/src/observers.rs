//! Hook dispatch
//!
//! Observers run in registration order. For the veto-capable `*ing` phases
//! the first halt wins: iteration stops and the caller receives `false`
//! without running the remaining observers.

use crate::error::{ModelError, ModelResult};
use crate::event_error::EventError;
use crate::model::Entity;

/// Persistence phases observers can hook
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Hook {
    Saving,
    Creating,
    Updating,
    Deleting,
    Saved,
    Created,
    Updated,
    Deleted,
}

/// Run a hook across the entity's observers. Returns `Ok(false)` when an
/// observer vetoed, `Err` when one failed.
pub(crate) async fn fire(entity: &mut Entity, hook: Hook) -> ModelResult<bool> {
    let observers = entity.definition().observers().to_vec();
    for observer in observers {
        let result = match hook {
            Hook::Saving => observer.saving(entity).await,
            Hook::Creating => observer.creating(entity).await,
            Hook::Updating => observer.updating(entity).await,
            Hook::Deleting => observer.deleting(entity).await,
            Hook::Saved => observer.saved(entity).await,
            Hook::Created => observer.created(entity).await,
            Hook::Updated => observer.updated(entity).await,
            Hook::Deleted => observer.deleted(entity).await,
        };
        match result {
            Ok(()) => {}
            Err(err) if err.is_halt() => return Ok(false),
            Err(err) => return Err(ModelError::Event(err.to_string())),
        }
    }
    Ok(true)
}
