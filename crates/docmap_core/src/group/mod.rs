//! Relation groups: lazily materialized collections with pending changes.
//!
//! A group tracks three sequences: the saved members (materialized on first
//! access by the group's [`SavedDataLoader`]), the members queued for
//! addition and the members queued for removal. The effective content is
//! the saved members followed by the added ones, minus the removed ones.
//!
//! Groups back embedded-many slots and reference-many relations. Standalone
//! groups with a custom loader can be created with
//! [`Session::create_group`].

mod loader;

pub use loader::{SavedDataLoader, StaticLoader};
pub(crate) use loader::{EmbeddedLoader, PolymorphicReferenceLoader, ReferenceLoader};

use crate::error::{CoreError, CoreResult};
use crate::query::{Filter, Query};
use crate::session::Session;
use crate::side_table::keys;
use crate::types::{EntityRef, GroupRef, RootAndPath};
use docmap_codec::Value;
use std::sync::Arc;
use tracing::trace;

/// What a group holds, which decides member validation and persistence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupKind {
    /// Custom group with no persistence of its own.
    Plain,
    /// Embedded documents stored inside the owning document.
    Embedded,
    /// Root documents whose ids are stored in a raw field.
    Reference,
    /// Root documents of several classes, stored with a discriminator.
    PolymorphicReference,
}

pub(crate) struct GroupState {
    pub loader: Arc<dyn SavedDataLoader>,
    pub add: Vec<EntityRef>,
    pub remove: Vec<EntityRef>,
    pub saved: Option<Vec<EntityRef>>,
}

impl GroupState {
    pub fn new(loader: Arc<dyn SavedDataLoader>) -> Self {
        Self {
            loader,
            add: Vec::new(),
            remove: Vec::new(),
            saved: None,
        }
    }

    pub fn kind(&self) -> GroupKind {
        self.loader.kind()
    }

    pub fn has_pending(&self) -> bool {
        !self.add.is_empty() || !self.remove.is_empty()
    }

    /// Materialized saved members followed by added members.
    pub fn members(&self) -> impl Iterator<Item = EntityRef> + '_ {
        self.saved
            .iter()
            .flatten()
            .chain(self.add.iter())
            .copied()
    }
}

/// Documents passed to [`GroupMut::add`], [`GroupMut::remove`] and
/// [`GroupMut::replace`]: one handle or any sequence of handles.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Members(pub Vec<EntityRef>);

impl From<EntityRef> for Members {
    fn from(entity: EntityRef) -> Self {
        Self(vec![entity])
    }
}

impl From<Vec<EntityRef>> for Members {
    fn from(entities: Vec<EntityRef>) -> Self {
        Self(entities)
    }
}

impl From<&[EntityRef]> for Members {
    fn from(entities: &[EntityRef]) -> Self {
        Self(entities.to_vec())
    }
}

impl From<&Vec<EntityRef>> for Members {
    fn from(entities: &Vec<EntityRef>) -> Self {
        Self(entities.clone())
    }
}

impl<const N: usize> From<[EntityRef; N]> for Members {
    fn from(entities: [EntityRef; N]) -> Self {
        Self(entities.to_vec())
    }
}

impl Session {
    /// Creates a standalone group backed by a custom loader.
    pub fn create_group(&mut self, loader: Arc<dyn SavedDataLoader>) -> GroupRef {
        let group = GroupRef(self.next_instance());
        self.groups.insert(group, GroupState::new(loader));
        trace!(%group, "group created");
        group
    }

    /// Returns a view to read and change a group.
    pub fn group(&mut self, group: GroupRef) -> GroupMut<'_> {
        GroupMut {
            session: self,
            group,
        }
    }

    /// Saved members, materializing them on first access.
    pub(crate) fn group_saved(&mut self, group: GroupRef) -> CoreResult<Vec<EntityRef>> {
        let state = self.group_state(group)?;
        if let Some(saved) = &state.saved {
            return Ok(saved.clone());
        }
        let loader = Arc::clone(&state.loader);
        let loaded = loader.load(self, group)?;
        trace!(%group, count = loaded.len(), "group saved data materialized");
        self.group_state_mut(group)?.saved = Some(loaded.clone());
        Ok(loaded)
    }

    /// Drops pending changes; when there were any, also drops the saved
    /// members so they are reloaded from the updated source.
    ///
    /// Embedded members dropped this way are disposed.
    pub(crate) fn group_reset(&mut self, group: GroupRef) -> CoreResult<()> {
        let state = self.group_state_mut(group)?;
        let drop_saved = state.has_pending();
        let dropped: Vec<EntityRef> = if drop_saved {
            state.members().chain(state.remove.iter().copied()).collect()
        } else {
            Vec::new()
        };
        let embedded = state.kind() == GroupKind::Embedded;
        state.add.clear();
        state.remove.clear();
        if drop_saved {
            state.saved = None;
            self.side.remove(group, keys::SAVED_DATA);
        }
        if embedded {
            self.dispose_detached_members(group, dropped)?;
        }
        Ok(())
    }

    /// Disposes members of an embedded group that still sit at one of the
    /// group's positions. Members moved elsewhere in the meantime survive.
    pub(crate) fn dispose_detached_members(
        &mut self,
        group: GroupRef,
        members: Vec<EntityRef>,
    ) -> CoreResult<()> {
        let group_rap = self
            .side
            .get::<RootAndPath>(group, keys::ROOT_AND_PATH)
            .ok()
            .cloned();
        for member in members {
            if !self.contains(member) {
                continue;
            }
            let owned = match (&group_rap, self.root_and_path(member)?) {
                (Some(group_rap), Some(member_rap)) => {
                    member_rap.root == group_rap.root
                        && member_rap
                            .path
                            .strip_prefix(group_rap.path.as_str())
                            .and_then(|rest| rest.strip_prefix('.'))
                            .is_some_and(|rest| !rest.contains('.'))
                }
                (None, None) => true,
                _ => false,
            };
            if owned {
                trace!(%group, %member, "detached member disposed");
                self.dispose(member)?;
            }
        }
        Ok(())
    }

    /// Stamps the position of an embedded group and of its members.
    pub(crate) fn set_group_root_and_path(
        &mut self,
        group: GroupRef,
        rap: RootAndPath,
    ) -> CoreResult<()> {
        let state = self.group_state(group)?;
        let saved = state.saved.clone().unwrap_or_default();
        let added = state.add.clone();
        self.side.set(group, keys::ROOT_AND_PATH, rap.clone());
        for (i, member) in saved.into_iter().enumerate() {
            self.set_root_and_path(member, rap.root, format!("{}.{i}", rap.path))?;
        }
        for (i, member) in added.into_iter().enumerate() {
            self.set_root_and_path(member, rap.root, format!("{}._add{i}", rap.path))?;
        }
        Ok(())
    }

    fn check_group_member(
        &self,
        group: GroupRef,
        kind: GroupKind,
        member: EntityRef,
    ) -> CoreResult<()> {
        let state = self.state(member)?;
        let expected = match kind {
            GroupKind::Plain => return Ok(()),
            GroupKind::Embedded => {
                self.embedded_state(member)?;
                self.side.get::<String>(group, keys::DOCUMENT_CLASS)?
            }
            GroupKind::Reference => {
                self.document_state(member)?;
                self.side.get::<String>(group, keys::DOCUMENT_CLASS)?
            }
            GroupKind::PolymorphicReference => {
                self.document_state(member)?;
                return Ok(());
            }
        };
        if self.metadata().is_a(&state.class.name, expected) {
            Ok(())
        } else {
            Err(CoreError::invalid_argument(format!(
                "{member} is a {}, {group} holds {expected}",
                state.class.name
            )))
        }
    }
}

/// Mutable view of one group.
///
/// Obtained from [`Session::group`]. Every method fails with `NotFound`
/// when the group has been disposed.
pub struct GroupMut<'s> {
    session: &'s mut Session,
    group: GroupRef,
}

impl GroupMut<'_> {
    /// Handle of the viewed group.
    #[must_use]
    pub fn handle(&self) -> GroupRef {
        self.group
    }

    /// Kind of the group.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for a disposed group.
    pub fn kind(&self) -> CoreResult<GroupKind> {
        Ok(self.session.group_state(self.group)?.kind())
    }

    /// Queues documents for addition.
    ///
    /// Embedded members are stamped with the path `<group path>._add<i>`,
    /// `i` being their position in the add queue.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if a document does not fit the group.
    pub fn add(&mut self, members: impl Into<Members>) -> CoreResult<()> {
        let Members(members) = members.into();
        let kind = self.kind()?;
        for member in &members {
            self.session.check_group_member(self.group, kind, *member)?;
        }
        let rap = self
            .session
            .side
            .get::<RootAndPath>(self.group, keys::ROOT_AND_PATH)
            .ok()
            .cloned();
        for member in members {
            let state = self.session.group_state_mut(self.group)?;
            state.add.push(member);
            let index = state.add.len() - 1;
            if let (GroupKind::Embedded, Some(rap)) = (kind, &rap) {
                self.session
                    .set_root_and_path(member, rap.root, format!("{}._add{index}", rap.path))?;
            }
        }
        Ok(())
    }

    /// Queues documents for removal.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for a disposed group.
    pub fn remove(&mut self, members: impl Into<Members>) -> CoreResult<()> {
        let Members(members) = members.into();
        self.session
            .group_state_mut(self.group)?
            .remove
            .extend(members);
        Ok(())
    }

    /// Members queued for addition.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for a disposed group.
    pub fn add_queue(&self) -> CoreResult<Vec<EntityRef>> {
        Ok(self.session.group_state(self.group)?.add.clone())
    }

    /// Members queued for removal.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for a disposed group.
    pub fn remove_queue(&self) -> CoreResult<Vec<EntityRef>> {
        Ok(self.session.group_state(self.group)?.remove.clone())
    }

    /// Empties the add queue.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for a disposed group.
    pub fn clear_add(&mut self) -> CoreResult<()> {
        self.session.group_state_mut(self.group)?.add.clear();
        Ok(())
    }

    /// Empties the removal queue.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for a disposed group.
    pub fn clear_remove(&mut self) -> CoreResult<()> {
        self.session.group_state_mut(self.group)?.remove.clear();
        Ok(())
    }

    /// Forgets the materialized saved members; the next access reloads them.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for a disposed group.
    pub fn clear_saved(&mut self) -> CoreResult<()> {
        self.session.group_state_mut(self.group)?.saved = None;
        Ok(())
    }

    /// Returns true once the saved members have been materialized.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for a disposed group.
    pub fn is_saved_initialized(&self) -> CoreResult<bool> {
        Ok(self.session.group_state(self.group)?.saved.is_some())
    }

    /// Saved members, materializing them on first access.
    ///
    /// # Errors
    ///
    /// Returns the loader's error.
    pub fn saved(&mut self) -> CoreResult<Vec<EntityRef>> {
        self.session.group_saved(self.group)
    }

    /// Saved members followed by added members, without removed ones.
    ///
    /// A member queued twice is listed twice.
    ///
    /// # Errors
    ///
    /// Returns the loader's error.
    pub fn all(&mut self) -> CoreResult<Vec<EntityRef>> {
        let saved = self.session.group_saved(self.group)?;
        let state = self.session.group_state(self.group)?;
        Ok(saved
            .iter()
            .chain(&state.add)
            .filter(|member| !state.remove.contains(member))
            .copied()
            .collect())
    }

    /// Number of members in [`all`](Self::all).
    ///
    /// # Errors
    ///
    /// Returns the loader's error.
    pub fn count(&mut self) -> CoreResult<usize> {
        Ok(self.all()?.len())
    }

    /// Replaces the content: clears both queues, queues every saved member
    /// for removal and queues `members` for addition.
    ///
    /// # Errors
    ///
    /// Returns the loader's error or `InvalidArgument` for unfit members.
    pub fn replace(&mut self, members: impl Into<Members>) -> CoreResult<()> {
        self.clear_add()?;
        self.clear_remove()?;
        let saved = self.saved()?;
        self.remove(saved)?;
        self.add(members)
    }

    /// Clears both queues. If either was non-empty the saved members (and
    /// raw saved data) are dropped as well.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for a disposed group.
    pub fn reset(&mut self) -> CoreResult<()> {
        self.session.group_reset(self.group)
    }

    /// Pre-seeds the raw saved data of an embedded group.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for a disposed group.
    pub fn set_saved_data(&mut self, data: Vec<Value>) -> CoreResult<()> {
        self.session.group_state(self.group)?;
        self.session.side.set(self.group, keys::SAVED_DATA, data);
        Ok(())
    }

    /// Raw saved data, if seeded.
    #[must_use]
    pub fn saved_data(&self) -> Option<Vec<Value>> {
        self.session
            .side
            .get::<Vec<Value>>(self.group, keys::SAVED_DATA)
            .ok()
            .cloned()
    }

    /// Query for the documents a reference group points at.
    ///
    /// The filter is resolved when the query runs, so it reflects the raw
    /// field at that time.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` for groups that are not reference groups.
    pub fn create_query(&self) -> CoreResult<Query> {
        match self.kind()? {
            GroupKind::Reference | GroupKind::PolymorphicReference => {}
            other => {
                return Err(CoreError::invalid_state(format!(
                    "{} is a {other:?} group, not a reference group",
                    self.group
                )))
            }
        }
        let side = &self.session.side;
        let owner = *side.get::<EntityRef>(self.group, keys::PARENT)?;
        let field = side.get::<String>(self.group, keys::FIELD)?.clone();
        let class = side.get::<String>(self.group, keys::DOCUMENT_CLASS)?.clone();
        Ok(Query::new(class).filter(Filter::ReferencedBy { owner, field }))
    }
}
