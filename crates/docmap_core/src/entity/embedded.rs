//! Embedded documents: position tracking, embedded slots and groups.

use crate::error::{CoreError, CoreResult};
use crate::group::EmbeddedLoader;
use crate::session::Session;
use crate::side_table::keys;
use crate::types::{EntityRef, GroupRef, RootAndPath};
use docmap_codec::Value;
use std::sync::Arc;

impl Session {
    /// Records where an embedded document lives inside its root, and
    /// propagates the position to its embedded children and groups.
    ///
    /// Children get `<path>.<slot>`, saved group members `<path>.<slot>.<i>`
    /// and pending group additions `<path>.<slot>._add<i>`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if `embedded` is a root document or `root`
    /// is not one.
    pub fn set_root_and_path(
        &mut self,
        embedded: EntityRef,
        root: EntityRef,
        path: impl Into<String>,
    ) -> CoreResult<()> {
        self.document_state(root)?;
        let state = self.embedded_state(embedded)?;
        let rap = RootAndPath::new(root, path);
        let children: Vec<(String, EntityRef)> = state
            .embeddeds_one
            .iter()
            .filter_map(|(name, child)| child.map(|c| (name.clone(), c)))
            .collect();
        let groups: Vec<(String, GroupRef)> = state
            .embeddeds_many
            .iter()
            .map(|(name, group)| (name.clone(), *group))
            .collect();

        self.side.set(embedded, keys::ROOT_AND_PATH, rap.clone());
        for (name, child) in children {
            self.set_root_and_path(child, root, format!("{}.{name}", rap.path))?;
        }
        for (name, group) in groups {
            self.set_group_root_and_path(group, rap.child(&name))?;
        }
        Ok(())
    }

    /// Position of an embedded document, or `None` while detached.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for root documents.
    pub fn root_and_path(&self, embedded: EntityRef) -> CoreResult<Option<RootAndPath>> {
        self.embedded_state(embedded)?;
        Ok(self
            .side
            .get::<RootAndPath>(embedded, keys::ROOT_AND_PATH)
            .ok()
            .cloned())
    }

    /// Position for a child stored in slot `name` of `parent`.
    pub(crate) fn child_root_and_path(
        &self,
        parent: EntityRef,
        name: &str,
    ) -> CoreResult<Option<RootAndPath>> {
        if self.state(parent)?.is_document() {
            return Ok(Some(RootAndPath::new(parent, name)));
        }
        Ok(self.root_and_path(parent)?.map(|rap| rap.child(name)))
    }

    /// Returns true if the embedded-one slot holding this document was
    /// replaced since the last clean point.
    ///
    /// Only the slot directly above the document counts. Documents living
    /// in an embedded group, or below one, report false.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for root documents.
    pub fn is_embedded_one_changed_in_parent(&self, embedded: EntityRef) -> CoreResult<bool> {
        let Some(rap) = self.root_and_path(embedded)? else {
            return Ok(false);
        };
        let segments: Vec<&str> = rap.path.split('.').collect();
        let Some((last, parents)) = segments.split_last() else {
            return Ok(false);
        };

        let mut current = rap.root;
        for segment in parents {
            match self.state(current)?.embeddeds_one.get(*segment) {
                Some(Some(child)) => current = *child,
                _ => return Ok(false),
            }
        }
        self.is_embedded_one_changed(current, last)
    }

    /// Returns true if any embedded-one slot on the way from `root` down
    /// `path` was replaced since the last clean point.
    ///
    /// Embedded groups are followed through their saved members; a segment
    /// naming an added member or a position that is not materialized stops
    /// the walk.
    pub(crate) fn is_replaced_on_path(&self, root: EntityRef, path: &str) -> CoreResult<bool> {
        let mut segments = path.split('.');
        let mut current = root;
        while let Some(segment) = segments.next() {
            if self.is_embedded_one_changed(current, segment)? {
                return Ok(true);
            }
            let state = self.state(current)?;
            if let Some(child) = state.embeddeds_one.get(segment) {
                match child {
                    Some(child) => current = *child,
                    None => return Ok(false),
                }
                continue;
            }
            let Some(group) = state.embeddeds_many.get(segment) else {
                return Ok(false);
            };
            let member = segments
                .next()
                .and_then(|index| index.parse::<usize>().ok())
                .and_then(|index| {
                    self.groups
                        .get(group)
                        .and_then(|group| group.saved.as_ref())
                        .and_then(|saved| saved.get(index).copied())
                });
            match member {
                Some(member) => current = member,
                None => return Ok(false),
            }
        }
        Ok(false)
    }

    /// Returns true if this document, or a document above it, was added to
    /// an embedded group since the last save.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for root documents.
    pub fn is_embedded_many_new(&self, embedded: EntityRef) -> CoreResult<bool> {
        Ok(self
            .root_and_path(embedded)?
            .is_some_and(|rap| rap.path.contains("._add")))
    }

    /// Document in an embedded-one slot, fetched lazily when persisted.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an undeclared slot, or a store error.
    pub fn embedded_one(&mut self, entity: EntityRef, name: &str) -> CoreResult<Option<EntityRef>> {
        let state = self.state(entity)?;
        let slot = state
            .class
            .embedded_one_meta(name)
            .cloned()
            .ok_or_else(|| {
                CoreError::not_found(format!("embedded one {}.{name}", state.class.name))
            })?;
        if let Some(current) = state.embeddeds_one.get(name) {
            return Ok(*current);
        }

        let Some(stored) = self.fetch_slot(entity, name)? else {
            return Ok(None);
        };
        let child = match stored {
            Value::Map(raw) => Some(self.hydrate_embedded(entity, name, &slot.class, &raw)?),
            _ => None,
        };
        self.state_mut(entity)?
            .embeddeds_one
            .insert(name.to_string(), child);
        Ok(child)
    }

    /// Replaces the document in an embedded-one slot.
    ///
    /// The first replacement since the last clean point records the
    /// previous occupant. The new child takes the slot's position.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an undeclared slot and `InvalidArgument` for a
    /// child of the wrong class.
    pub fn set_embedded_one(
        &mut self,
        entity: EntityRef,
        name: &str,
        child: Option<EntityRef>,
    ) -> CoreResult<()> {
        let state = self.state(entity)?;
        let slot = state
            .class
            .embedded_one_meta(name)
            .cloned()
            .ok_or_else(|| {
                CoreError::not_found(format!("embedded one {}.{name}", state.class.name))
            })?;
        if let Some(child) = child {
            let child_class = &self.embedded_state(child)?.class.name;
            if !self.metadata().is_a(child_class, &slot.class) {
                return Err(CoreError::invalid_argument(format!(
                    "{child} is a {child_class}, slot {name} holds {}",
                    slot.class
                )));
            }
        }

        let current = self.embedded_one(entity, name)?;
        let key = keys::embedded_one(name);
        if !self.side.has(entity, &key) {
            self.side.set(entity, key, current);
        }
        if let Some(child) = child {
            if let Some(rap) = self.child_root_and_path(entity, name)? {
                self.set_root_and_path(child, rap.root, rap.path)?;
            }
        }
        self.state_mut(entity)?
            .embeddeds_one
            .insert(name.to_string(), child);
        Ok(())
    }

    /// Returns true if the slot holds loaded data and was replaced since
    /// the last clean point.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for a disposed handle.
    pub fn is_embedded_one_changed(&self, entity: EntityRef, name: &str) -> CoreResult<bool> {
        Ok(self.state(entity)?.embeddeds_one.contains_key(name)
            && self.side.has(entity, &keys::embedded_one(name)))
    }

    /// Occupant of an embedded-one slot at the last clean point.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for a disposed handle.
    pub fn original_embedded_one(
        &self,
        entity: EntityRef,
        name: &str,
    ) -> CoreResult<Option<EntityRef>> {
        match self
            .side
            .get::<Option<EntityRef>>(entity, &keys::embedded_one(name))
        {
            Ok(original) => Ok(*original),
            Err(_) => Ok(self
                .state(entity)?
                .embeddeds_one
                .get(name)
                .copied()
                .flatten()),
        }
    }

    /// Group backing an embedded-many slot, created on first access.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an undeclared slot.
    pub fn embeddeds_many(&mut self, entity: EntityRef, name: &str) -> CoreResult<GroupRef> {
        let state = self.state(entity)?;
        let slot = state
            .class
            .embedded_many_meta(name)
            .cloned()
            .ok_or_else(|| {
                CoreError::not_found(format!("embedded many {}.{name}", state.class.name))
            })?;
        if let Some(group) = state.embeddeds_many.get(name) {
            return Ok(*group);
        }

        let rap = self.child_root_and_path(entity, name)?;
        let group = self.create_group(Arc::new(EmbeddedLoader));
        self.side.set(group, keys::DOCUMENT_CLASS, slot.class);
        self.side.set(group, keys::PARENT, entity);
        self.side.set(group, keys::FIELD, name.to_string());
        if let Some(rap) = rap {
            self.side.set(group, keys::ROOT_AND_PATH, rap);
        }
        self.state_mut(entity)?
            .embeddeds_many
            .insert(name.to_string(), group);
        Ok(group)
    }
}
