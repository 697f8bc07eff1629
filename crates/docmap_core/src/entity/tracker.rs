//! Field access, modification tracking and hydration.

use crate::error::{CoreError, CoreResult};
use crate::metadata::FieldMeta;
use crate::session::Session;
use crate::side_table::keys;
use crate::types::{EntityRef, GroupRef};
use docmap_codec::{Map, Value};
use std::collections::BTreeMap;
use tracing::{debug, trace};

impl Session {
    fn field_meta(&self, entity: EntityRef, name: &str) -> CoreResult<FieldMeta> {
        let class = &self.state(entity)?.class;
        class
            .field_meta(name)
            .cloned()
            .ok_or_else(|| CoreError::not_found(format!("field {}.{name}", class.name)))
    }

    /// Root and stored path of a slot of `entity`, when the slot can be
    /// fetched from the store.
    ///
    /// Nothing can be fetched for new documents, detached embedded documents,
    /// members added to a group since the last save, or documents placed in
    /// a replaced embedded slot: the store holds no data for them yet.
    pub(crate) fn lazy_slot_path(
        &self,
        entity: EntityRef,
        stored_name: &str,
    ) -> CoreResult<Option<(EntityRef, String)>> {
        if !self.config().lazy_loading {
            return Ok(None);
        }
        let state = self.state(entity)?;
        if state.is_document() {
            return Ok(state.id.map(|_| (entity, stored_name.to_string())));
        }
        let Some(rap) = self.root_and_path(entity)? else {
            return Ok(None);
        };
        if self.is_new(rap.root)?
            || self.is_embedded_many_new(entity)?
            || self.is_replaced_on_path(rap.root, &rap.path)?
        {
            return Ok(None);
        }
        Ok(Some((rap.root, format!("{}.{stored_name}", rap.path))))
    }

    /// Fetches one slot with a projected read of the owning root document
    /// and records the path in the root's field cache.
    ///
    /// Returns `None` when the slot cannot be fetched, and `Some(Null)` when
    /// the store holds nothing at the path.
    pub(crate) fn fetch_slot(
        &mut self,
        entity: EntityRef,
        stored_name: &str,
    ) -> CoreResult<Option<Value>> {
        let Some((root, path)) = self.lazy_slot_path(entity, stored_name)? else {
            return Ok(None);
        };
        let (collection, id) = {
            let state = self.document_state(root)?;
            let id = state
                .id
                .ok_or_else(|| CoreError::invalid_state(format!("{root} is new")))?;
            (state.class.collection_name()?.to_string(), id)
        };

        debug!(collection = collection.as_str(), %id, path = path.as_str(), "lazy load");
        let raw = self
            .store()
            .find_one(&collection, id, Some(&[path.clone()]))?;
        self.add_field_cache(root, &path)?;
        Ok(Some(
            raw.and_then(|doc| Value::Map(doc).get_path(&path).cloned())
                .unwrap_or(Value::Null),
        ))
    }

    fn load_field(&mut self, entity: EntityRef, meta: &FieldMeta) -> CoreResult<Value> {
        let Some(stored) = self.fetch_slot(entity, &meta.db_name)? else {
            return Ok(Value::Null);
        };
        let native = self.types().to_native(&meta.type_name, &stored)?;
        self.state_mut(entity)?
            .fields
            .insert(meta.name.clone(), native.clone());
        Ok(native)
    }

    /// Current value of a field, fetched lazily for persisted documents.
    ///
    /// Fields never set on a new document read as null.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an undeclared field, or a store error from the
    /// lazy read.
    pub fn get_field(&mut self, entity: EntityRef, name: &str) -> CoreResult<Value> {
        let meta = self.field_meta(entity, name)?;
        if let Some(value) = self.state(entity)?.fields.get(name) {
            return Ok(value.clone());
        }
        self.load_field(entity, &meta)
    }

    /// Sets a field, recording its original value on the first change.
    ///
    /// The current value is loaded first, so the recorded original is the
    /// stored one. Setting a field back to its original value leaves it
    /// marked as modified.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an undeclared field.
    pub fn set_field(
        &mut self,
        entity: EntityRef,
        name: &str,
        value: impl Into<Value>,
    ) -> CoreResult<()> {
        let value = value.into();
        let meta = self.field_meta(entity, name)?;
        if !self.state(entity)?.fields.contains_key(name) {
            self.load_field(entity, &meta)?;
        }

        let state = self.state_mut(entity)?;
        if !state.fields_modified.contains_key(name) {
            let original = state.fields.get(name).cloned().unwrap_or_default();
            state.fields_modified.insert(name.to_string(), original);
        }
        state.fields.insert(name.to_string(), value);
        trace!(%entity, field = name, "field set");

        if state.class.is_reference_field(name) {
            self.invalidate_references(entity, name)?;
        }
        Ok(())
    }

    /// Returns true if the field changed since the last clean point.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for a disposed handle.
    pub fn is_field_modified(&self, entity: EntityRef, name: &str) -> CoreResult<bool> {
        Ok(self.state(entity)?.fields_modified.contains_key(name))
    }

    /// Value of the field at the last clean point.
    ///
    /// Unmodified fields return their current loaded value, or null if the
    /// field was never loaded or set.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for a disposed handle.
    pub fn get_original_field_value(&self, entity: EntityRef, name: &str) -> CoreResult<Value> {
        let state = self.state(entity)?;
        Ok(state
            .fields_modified
            .get(name)
            .or_else(|| state.fields.get(name))
            .cloned()
            .unwrap_or_default())
    }

    /// Field name to original value of every modified field.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for a disposed handle.
    pub fn fields_modified(&self, entity: EntityRef) -> CoreResult<BTreeMap<String, Value>> {
        Ok(self.state(entity)?.fields_modified.clone())
    }

    /// Forgets field modifications without touching values.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for a disposed handle.
    pub fn clear_fields_modified(&mut self, entity: EntityRef) -> CoreResult<()> {
        self.state_mut(entity)?.fields_modified.clear();
        Ok(())
    }

    /// Returns true if the root document owning `entity` is persisted.
    pub(crate) fn owning_root_persisted(&self, entity: EntityRef) -> CoreResult<bool> {
        let state = self.state(entity)?;
        if state.is_document() {
            return Ok(state.id.is_some());
        }
        match self.root_and_path(entity)? {
            Some(rap) => Ok(self.state(rap.root)?.id.is_some()),
            None => Ok(false),
        }
    }

    /// Returns true if the entity or anything embedded in it changed.
    ///
    /// Replaced embedded slots and removed group members only count once
    /// the owning root is persisted; a new root is inserted whole anyway.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for a disposed handle.
    pub fn is_modified(&self, entity: EntityRef) -> CoreResult<bool> {
        let state = self.state(entity)?;
        if !state.fields_modified.is_empty() {
            return Ok(true);
        }
        let persisted = self.owning_root_persisted(entity)?;
        for (name, child) in &state.embeddeds_one {
            if persisted && self.side.has(entity, &keys::embedded_one(name)) {
                return Ok(true);
            }
            if let Some(child) = child {
                if self.is_modified(*child)? {
                    return Ok(true);
                }
            }
        }
        for group in state.embeddeds_many.values() {
            let group = self.group_state(*group)?;
            if !group.add.is_empty() || (persisted && !group.remove.is_empty()) {
                return Ok(true);
            }
            for member in group.saved.iter().flatten() {
                if self.is_modified(*member)? {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    /// Marks the entity and everything embedded in it as clean.
    ///
    /// Field records and replaced-slot records are dropped and children are
    /// cleaned recursively. Every embedded group forgets its queues and its
    /// materialized members, which are reloaded on the next access.
    /// Replaced slot occupants and group members left behind are disposed.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for a disposed handle.
    pub fn clear_modified(&mut self, entity: EntityRef) -> CoreResult<()> {
        let state = self.state_mut(entity)?;
        state.fields_modified.clear();
        let children: Vec<EntityRef> = state.embedded_children().collect();
        let slots: Vec<(String, Option<EntityRef>)> = state
            .embeddeds_one
            .iter()
            .map(|(name, child)| (name.clone(), *child))
            .collect();
        let groups: Vec<GroupRef> = state.embeddeds_many.values().copied().collect();

        let mut replaced = Vec::new();
        for (name, current) in slots {
            let original = self
                .side
                .get::<Option<EntityRef>>(entity, &keys::embedded_one(&name))
                .ok()
                .copied()
                .flatten();
            if let Some(original) = original.filter(|original| Some(*original) != current) {
                replaced.push((name, original));
            }
        }
        self.side.remove_prefixed(entity, &keys::embedded_one(""));
        for (name, original) in replaced {
            if self.contains(original)
                && self.root_and_path(original)? == self.child_root_and_path(entity, &name)?
            {
                trace!(%entity, slot = name.as_str(), %original, "replaced occupant disposed");
                self.dispose(original)?;
            }
        }

        for child in children {
            self.clear_modified(child)?;
        }
        for group in groups {
            let members: Vec<EntityRef> = self.group_state(group)?.members().collect();
            for member in &members {
                if self.contains(*member) {
                    self.clear_modified(*member)?;
                }
            }
            let state = self.group_state_mut(group)?;
            let pending = state.has_pending();
            let removed = std::mem::take(&mut state.remove);
            state.add.clear();
            state.saved = None;
            if pending {
                self.side.remove(group, keys::SAVED_DATA);
            }
            self.dispose_detached_members(group, members.into_iter().chain(removed).collect())?;
        }
        Ok(())
    }

    /// Hydrates an entity from a raw stored record, without tracking.
    ///
    /// With `clean` the entity first forgets every loaded value and pending
    /// change. Without it the record is merged: fields and slots the caller
    /// changed keep their in-memory values.
    ///
    /// # Errors
    ///
    /// Returns a conversion error for values the declared types reject.
    pub fn set_document_data(
        &mut self,
        entity: EntityRef,
        raw: &Map,
        clean: bool,
    ) -> CoreResult<()> {
        let class = self.class_of(entity)?;
        if clean {
            self.forget_loaded(entity)?;
        }
        if class.is_document() {
            if let Some(id) = raw.get(crate::store::ID_FIELD).and_then(Value::as_id) {
                self.state_mut(entity)?.id = Some(id);
            }
        }

        for field in &class.fields {
            let Some(stored) = raw.get(&field.db_name) else {
                continue;
            };
            if self.state(entity)?.fields_modified.contains_key(&field.name) {
                continue;
            }
            let native = self.types().to_native(&field.type_name, stored)?;
            self.state_mut(entity)?
                .fields
                .insert(field.name.clone(), native);
        }

        for slot in &class.embeddeds_one {
            let Some(stored) = raw.get(&slot.name) else {
                continue;
            };
            if self.side.has(entity, &keys::embedded_one(&slot.name)) {
                continue;
            }
            let existing = self
                .state(entity)?
                .embeddeds_one
                .get(&slot.name)
                .copied()
                .flatten();
            let child = match (stored, existing) {
                (Value::Map(child_raw), Some(child)) => {
                    self.set_document_data(child, child_raw, false)?;
                    Some(child)
                }
                (Value::Map(child_raw), None) => {
                    Some(self.hydrate_embedded(entity, &slot.name, &slot.class, child_raw)?)
                }
                _ => None,
            };
            self.state_mut(entity)?
                .embeddeds_one
                .insert(slot.name.clone(), child);
        }

        for slot in &class.embeddeds_many {
            let Some(Value::Array(items)) = raw.get(&slot.name) else {
                continue;
            };
            let group = self.embeddeds_many(entity, &slot.name)?;
            if self.group_state(group)?.saved.is_none() {
                self.side.set(group, keys::SAVED_DATA, items.clone());
            }
        }
        Ok(())
    }

    /// Creates an embedded child of `parent` in slot `name` from raw data.
    pub(crate) fn hydrate_embedded(
        &mut self,
        parent: EntityRef,
        name: &str,
        class: &str,
        raw: &Map,
    ) -> CoreResult<EntityRef> {
        let base = self.metadata().get(class)?;
        let concrete = self.metadata().resolve(&base, raw)?;
        let child = self.allocate(concrete);
        if let Some(rap) = self.child_root_and_path(parent, name)? {
            self.set_root_and_path(child, rap.root, rap.path)?;
        }
        self.set_document_data(child, raw, false)?;
        Ok(child)
    }

    /// Drops loaded values, pending changes and materialized relations.
    fn forget_loaded(&mut self, entity: EntityRef) -> CoreResult<()> {
        let state = self.state_mut(entity)?;
        state.fields.clear();
        state.fields_modified.clear();
        state.references_one.clear();
        let children: Vec<EntityRef> = std::mem::take(&mut state.embeddeds_one)
            .into_values()
            .flatten()
            .collect();
        let embedded_groups: Vec<GroupRef> = state.embeddeds_many.values().copied().collect();
        let reference_groups: Vec<GroupRef> = state.references_many.values().copied().collect();
        self.side.remove_prefixed(entity, &keys::embedded_one(""));

        for child in children {
            if self.contains(child) {
                self.dispose(child)?;
            }
        }
        for group in embedded_groups {
            let members: Vec<EntityRef> = self.group_state(group)?.members().collect();
            for member in members {
                if self.contains(member) {
                    self.dispose(member)?;
                }
            }
            self.side.remove(group, keys::SAVED_DATA);
            self.clear_group(group)?;
        }
        for group in reference_groups {
            self.clear_group(group)?;
        }
        Ok(())
    }

    fn clear_group(&mut self, group: GroupRef) -> CoreResult<()> {
        let state = self.group_state_mut(group)?;
        state.add.clear();
        state.remove.clear();
        state.saved = None;
        Ok(())
    }

    /// A raw reference field changed: drop resolved relations that no
    /// longer match it.
    fn invalidate_references(&mut self, entity: EntityRef, field: &str) -> CoreResult<()> {
        let state = self.state(entity)?;
        let class = std::sync::Arc::clone(&state.class);
        let raw = state.fields.get(field).cloned().unwrap_or_default();

        for reference in class.references_one.iter().filter(|r| r.field == field) {
            let resolved = self
                .state(entity)?
                .references_one
                .get(&reference.name)
                .copied();
            let Some(resolved) = resolved else { continue };
            let resolved_id = match resolved {
                Some(target) => self.state(target)?.id.map(Value::Id),
                None => Some(Value::Null),
            };
            if resolved_id.as_ref() != Some(&raw) {
                self.state_mut(entity)?
                    .references_one
                    .remove(&reference.name);
            }
        }

        for reference in class.references_many.iter().filter(|r| r.field == field) {
            let group = self
                .state(entity)?
                .references_many
                .get(&reference.name)
                .copied();
            if let Some(group) = group {
                let state = self.group_state_mut(group)?;
                if !state.has_pending() {
                    state.saved = None;
                }
            }
        }
        Ok(())
    }
}
