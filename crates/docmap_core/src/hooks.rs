//! Lifecycle hooks fired around inserts, updates and deletes.

use crate::error::CoreResult;
use crate::session::Session;
use crate::types::EntityRef;

/// Lifecycle events of a root document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleEvent {
    /// Before a new document is inserted.
    PreInsert,
    /// After a document was inserted and got its id.
    PostInsert,
    /// Before a modified document is updated.
    PreUpdate,
    /// After a document was updated.
    PostUpdate,
    /// Before a document is removed.
    PreDelete,
    /// After a document was removed.
    PostDelete,
}

/// Callbacks registered for a class.
///
/// Every method defaults to doing nothing. Pre-hooks may still modify the
/// document; the changes are part of the write that follows. An error from
/// any hook aborts the operation.
pub trait LifecycleHook: Send + Sync {
    /// Called before insert.
    fn pre_insert(&self, _session: &mut Session, _document: EntityRef) -> CoreResult<()> {
        Ok(())
    }

    /// Called after insert.
    fn post_insert(&self, _session: &mut Session, _document: EntityRef) -> CoreResult<()> {
        Ok(())
    }

    /// Called before update.
    fn pre_update(&self, _session: &mut Session, _document: EntityRef) -> CoreResult<()> {
        Ok(())
    }

    /// Called after update.
    fn post_update(&self, _session: &mut Session, _document: EntityRef) -> CoreResult<()> {
        Ok(())
    }

    /// Called before delete.
    fn pre_delete(&self, _session: &mut Session, _document: EntityRef) -> CoreResult<()> {
        Ok(())
    }

    /// Called after delete.
    fn post_delete(&self, _session: &mut Session, _document: EntityRef) -> CoreResult<()> {
        Ok(())
    }

    /// Dispatches an event to the matching method.
    fn dispatch(
        &self,
        event: LifecycleEvent,
        session: &mut Session,
        document: EntityRef,
    ) -> CoreResult<()> {
        match event {
            LifecycleEvent::PreInsert => self.pre_insert(session, document),
            LifecycleEvent::PostInsert => self.post_insert(session, document),
            LifecycleEvent::PreUpdate => self.pre_update(session, document),
            LifecycleEvent::PostUpdate => self.post_update(session, document),
            LifecycleEvent::PreDelete => self.pre_delete(session, document),
            LifecycleEvent::PostDelete => self.post_delete(session, document),
        }
    }
}
