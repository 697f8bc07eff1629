//! Persistence of root documents: save, delete and refresh.
//!
//! Saving walks the dirty state of each document and writes only what
//! changed. New documents are inserted whole, in one batch per collection;
//! persisted documents get one update each, built from their modified
//! fields, replaced embedded slots and pending group changes.

use crate::error::{CoreError, CoreResult};
use crate::hooks::LifecycleEvent;
use crate::session::Session;
use crate::side_table::keys;
use crate::store::{Update, ID_FIELD};
use crate::types::{DocumentId, EntityRef, GroupRef};
use docmap_codec::{Map, Value};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

/// Options of [`Session::save`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SaveOptions {
    /// Save new or modified referenced documents first.
    pub save_references: bool,
}

impl Default for SaveOptions {
    fn default() -> Self {
        Self {
            save_references: true,
        }
    }
}

impl SaveOptions {
    /// Creates default options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether referenced documents are saved first.
    #[must_use]
    pub const fn save_references(mut self, value: bool) -> Self {
        self.save_references = value;
        self
    }
}

/// Write a save would perform for one document.
#[derive(Debug, Clone, PartialEq)]
pub enum SaveQuery {
    /// The full document of a new entity, without `_id`.
    Insert(Map),
    /// The changes of a persisted entity.
    Update(Update),
}

/// Documents queued for insert into one collection.
type InsertBatch = Vec<(EntityRef, DocumentId, Map)>;

impl Session {
    /// Saves one document.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for embedded documents, or a hook, store
    /// or conversion error.
    pub fn save(&mut self, document: EntityRef, options: SaveOptions) -> CoreResult<()> {
        self.save_all(&[document], options)
    }

    /// Saves several documents, batching inserts per collection.
    ///
    /// After a successful write each document is marked clean, its groups
    /// are reset and new documents are registered in the identity map.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for embedded documents, or a hook, store
    /// or conversion error.
    pub fn save_all(&mut self, documents: &[EntityRef], options: SaveOptions) -> CoreResult<()> {
        let mut visited = HashSet::new();
        self.save_batch(documents, options, &mut visited)
    }

    fn save_batch(
        &mut self,
        documents: &[EntityRef],
        options: SaveOptions,
        visited: &mut HashSet<EntityRef>,
    ) -> CoreResult<()> {
        let batch: Vec<EntityRef> = documents
            .iter()
            .copied()
            .filter(|d| visited.insert(*d))
            .collect();
        for document in &batch {
            self.document_state(*document)?;
        }
        if options.save_references {
            for document in &batch {
                self.save_references(*document, options, visited)?;
            }
        }

        let mut inserts: Vec<(String, InsertBatch)> = Vec::new();
        let mut updates = Vec::new();
        for document in batch {
            if self.is_new(document)? {
                self.fire(LifecycleEvent::PreInsert, document)?;
                self.update_reference_fields(document)?;
                let mut raw = self.insert_document(document)?;
                let id = self.id_generator().generate();
                raw.insert(ID_FIELD.to_string(), Value::Id(id));
                let collection = self.state(document)?.class.collection_name()?.to_string();
                match inserts.iter_mut().find(|(c, _)| *c == collection) {
                    Some((_, queued)) => queued.push((document, id, raw)),
                    None => inserts.push((collection, vec![(document, id, raw)])),
                }
            } else {
                updates.push(document);
            }
        }

        for (collection, queued) in inserts {
            let raws = queued.iter().map(|(_, _, raw)| raw.clone()).collect();
            self.store().insert_many(&collection, raws)?;
            debug!(
                collection = collection.as_str(),
                count = queued.len(),
                "documents inserted"
            );
            for (document, id, _) in queued {
                self.set_id(document, id)?;
                self.identity.insert(&collection, id, document);
                self.clear_modified(document)?;
                self.reset_groups(document)?;
                self.fire(LifecycleEvent::PostInsert, document)?;
            }
        }

        for document in updates {
            self.update_reference_fields(document)?;
            if !self.is_modified(document)? {
                continue;
            }
            self.fire(LifecycleEvent::PreUpdate, document)?;
            self.update_reference_fields(document)?;
            let update = self.update_query(document, "")?;
            if !update.is_empty() {
                let (collection, id) = self.persisted_key(document)?;
                self.store().update(&collection, id, &update)?;
                debug!(collection = collection.as_str(), %id, "document updated");
            }
            self.refresh_saved_data(document)?;
            self.clear_modified(document)?;
            self.reset_groups(document)?;
            self.fire(LifecycleEvent::PostUpdate, document)?;
        }
        Ok(())
    }

    /// Saves new or modified documents referenced by `document`.
    fn save_references(
        &mut self,
        document: EntityRef,
        options: SaveOptions,
        visited: &mut HashSet<EntityRef>,
    ) -> CoreResult<()> {
        let mut targets = Vec::new();
        self.collect_reference_targets(document, &mut targets)?;
        let mut pending = Vec::new();
        for target in targets {
            if visited.contains(&target) || pending.contains(&target) {
                continue;
            }
            if self.is_new(target)? || self.is_modified(target)? {
                pending.push(target);
            }
        }
        if pending.is_empty() {
            return Ok(());
        }
        self.save_batch(&pending, options, visited)
    }

    fn collect_reference_targets(
        &self,
        entity: EntityRef,
        targets: &mut Vec<EntityRef>,
    ) -> CoreResult<()> {
        let state = self.state(entity)?;
        targets.extend(state.references_one.values().filter_map(|t| *t));
        for group in state.references_many.values() {
            targets.extend(self.group_state(*group)?.members());
        }
        for child in state.embedded_children() {
            self.collect_reference_targets(child, targets)?;
        }
        for group in state.embeddeds_many.values() {
            for member in self.group_state(*group)?.members() {
                if self.contains(member) {
                    self.collect_reference_targets(member, targets)?;
                }
            }
        }
        Ok(())
    }

    fn persisted_key(&self, document: EntityRef) -> CoreResult<(String, DocumentId)> {
        let state = self.document_state(document)?;
        let id = state
            .id
            .ok_or_else(|| CoreError::invalid_state(format!("{document} is new")))?;
        Ok((state.class.collection_name()?.to_string(), id))
    }

    /// Brings the raw saved data of embedded groups in line with the
    /// changes just written, for groups that keep their saved members.
    fn refresh_saved_data(&mut self, entity: EntityRef) -> CoreResult<()> {
        let state = self.state(entity)?;
        let children: Vec<EntityRef> = state.embedded_children().collect();
        let groups: Vec<GroupRef> = state.embeddeds_many.values().copied().collect();
        for child in children {
            self.refresh_saved_data(child)?;
        }
        for group in groups {
            let (saved, pending) = {
                let state = self.group_state(group)?;
                (state.saved.clone(), state.has_pending())
            };
            let (Some(saved), false) = (saved, pending) else {
                continue;
            };
            let Ok(data) = self.side.get::<Vec<Value>>(group, keys::SAVED_DATA) else {
                continue;
            };
            let mut data = data.clone();
            for (i, member) in saved.into_iter().enumerate() {
                if !self.contains(member) || !self.is_modified(member)? {
                    continue;
                }
                let update = self.update_query(member, "")?;
                if let Some(Value::Map(raw)) = data.get_mut(i) {
                    update.apply_to(raw);
                }
                self.refresh_saved_data(member)?;
            }
            self.side.set(group, keys::SAVED_DATA, data);
        }
        Ok(())
    }

    /// Resets every group of the entity and of everything embedded in it.
    pub(crate) fn reset_groups(&mut self, entity: EntityRef) -> CoreResult<()> {
        let state = self.state(entity)?;
        let children: Vec<EntityRef> = state.embedded_children().collect();
        let groups: Vec<GroupRef> = state.groups().collect();
        let embedded_groups: Vec<GroupRef> = state.embeddeds_many.values().copied().collect();

        for child in children {
            self.reset_groups(child)?;
        }
        for group in embedded_groups {
            let members: Vec<EntityRef> = self.group_state(group)?.members().collect();
            for member in members {
                if self.contains(member) {
                    self.reset_groups(member)?;
                }
            }
        }
        for group in groups {
            self.group_reset(group)?;
        }
        Ok(())
    }

    /// The write a save would perform for a document.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for embedded documents, or a conversion
    /// error.
    pub fn query_for_save(&mut self, document: EntityRef) -> CoreResult<SaveQuery> {
        if self.is_new(document)? {
            Ok(SaveQuery::Insert(self.insert_document(document)?))
        } else {
            Ok(SaveQuery::Update(self.update_query(document, "")?))
        }
    }

    /// Full stored form of an entity and everything embedded in it.
    pub(crate) fn insert_document(&mut self, entity: EntityRef) -> CoreResult<Map> {
        self.stored_form(entity, false)
    }

    /// Stored form of an entity as it was at the last clean point.
    fn original_document(&mut self, entity: EntityRef) -> CoreResult<Map> {
        self.stored_form(entity, true)
    }

    fn stored_form(&mut self, entity: EntityRef, original: bool) -> CoreResult<Map> {
        let state = self.state(entity)?.clone();
        let class = Arc::clone(&state.class);
        let mut raw = Map::new();

        if let (Some(field), Some(value)) = (&class.discriminator_field, &class.discriminator_value)
        {
            raw.insert(field.clone(), Value::Text(value.clone()));
        }

        for field in &class.fields {
            let value = if original {
                state
                    .fields_modified
                    .get(&field.name)
                    .or_else(|| state.fields.get(&field.name))
            } else {
                state.fields.get(&field.name)
            };
            if let Some(value) = value.filter(|v| !v.is_null()) {
                raw.insert(
                    field.db_name.clone(),
                    self.types().to_store(&field.type_name, value)?,
                );
            }
        }

        for slot in &class.embeddeds_one {
            let child = if original {
                self.original_embedded_one(entity, &slot.name)?
            } else {
                state.embeddeds_one.get(&slot.name).copied().flatten()
            };
            if let Some(child) = child {
                raw.insert(
                    slot.name.clone(),
                    Value::Map(self.stored_form(child, original)?),
                );
            }
        }

        for slot in &class.embeddeds_many {
            let Some(group) = state.embeddeds_many.get(&slot.name).copied() else {
                continue;
            };
            let items = if original {
                match self.group(group).saved_data() {
                    Some(data) => data,
                    None => {
                        let mut items = Vec::new();
                        for member in self.group(group).saved()? {
                            items.push(Value::Map(self.stored_form(member, true)?));
                        }
                        items
                    }
                }
            } else {
                let mut items = Vec::new();
                for member in self.group(group).all()? {
                    items.push(Value::Map(self.stored_form(member, false)?));
                }
                items
            };
            if !items.is_empty() {
                raw.insert(slot.name.clone(), Value::Array(items));
            }
        }
        Ok(raw)
    }

    /// Changes of a persisted entity, with paths below `prefix`.
    pub(crate) fn update_query(&mut self, entity: EntityRef, prefix: &str) -> CoreResult<Update> {
        let state = self.state(entity)?.clone();
        let class = Arc::clone(&state.class);
        let mut update = Update::new();

        for name in state.fields_modified.keys() {
            let Some(field) = class.field_meta(name) else {
                continue;
            };
            let path = format!("{prefix}{}", field.db_name);
            match state.fields.get(name) {
                Some(value) if !value.is_null() => {
                    let stored = self.types().to_store(&field.type_name, value)?;
                    update.set.insert(path, stored);
                }
                _ => {
                    update.unset.insert(path);
                }
            }
        }

        for slot in &class.embeddeds_one {
            let Some(current) = state.embeddeds_one.get(&slot.name).copied() else {
                continue;
            };
            let path = format!("{prefix}{}", slot.name);
            if self.is_embedded_one_changed(entity, &slot.name)? {
                match current {
                    Some(child) => {
                        let stored = self.insert_document(child)?;
                        update.set.insert(path, Value::Map(stored));
                    }
                    None => {
                        update.unset.insert(path);
                    }
                }
            } else if let Some(child) = current {
                if self.is_modified(child)? {
                    update.merge(self.update_query(child, &format!("{path}."))?);
                }
            }
        }

        for slot in &class.embeddeds_many {
            let Some(group) = state.embeddeds_many.get(&slot.name).copied() else {
                continue;
            };
            let path = format!("{prefix}{}", slot.name);
            let (saved, add, remove) = {
                let group = self.group_state(group)?;
                (group.saved.clone(), group.add.clone(), group.remove.clone())
            };
            let saved_data = self
                .side
                .get::<Vec<Value>>(group, keys::SAVED_DATA)
                .ok()
                .cloned();

            for (i, member) in saved.iter().flatten().enumerate() {
                if !remove.contains(member) && self.is_modified(*member)? {
                    update.merge(self.update_query(*member, &format!("{path}.{i}."))?);
                }
            }

            let mut pulled = Vec::new();
            for member in &remove {
                let position = saved
                    .as_ref()
                    .and_then(|saved| saved.iter().position(|m| m == member));
                let stored = position
                    .and_then(|i| saved_data.as_ref().and_then(|data| data.get(i)))
                    .cloned();
                match stored {
                    Some(stored) => pulled.push(stored),
                    None => pulled.push(Value::Map(self.original_document(*member)?)),
                }
            }
            if !pulled.is_empty() {
                update.pull_all.insert(path.clone(), pulled);
            }

            let mut pushed = Vec::new();
            for member in add.iter().filter(|m| !remove.contains(*m)) {
                pushed.push(Value::Map(self.insert_document(*member)?));
            }
            if !pushed.is_empty() {
                update.push_all.insert(path, pushed);
            }
        }
        Ok(update)
    }

    /// Deletes one document.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for embedded documents, or a hook or store
    /// error.
    pub fn delete(&mut self, document: EntityRef) -> CoreResult<()> {
        self.delete_all(&[document])
    }

    /// Deletes several documents with one removal per collection.
    ///
    /// Deleted documents become new again: their id is taken away, they
    /// leave the identity map and their query hashes are dropped. New
    /// documents are skipped. Documents whose removal fails keep their id.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for embedded documents, or a hook or store
    /// error.
    pub fn delete_all(&mut self, documents: &[EntityRef]) -> CoreResult<()> {
        let mut removals: Vec<(String, Vec<(EntityRef, DocumentId)>)> = Vec::new();
        for document in documents.iter().copied() {
            if self.is_new(document)? {
                continue;
            }
            self.fire(LifecycleEvent::PreDelete, document)?;
            let (collection, id) = self.persisted_key(document)?;
            match removals.iter_mut().find(|(c, _)| *c == collection) {
                Some((_, queued)) => queued.push((document, id)),
                None => removals.push((collection, vec![(document, id)])),
            }
        }

        for (collection, queued) in removals {
            let ids: Vec<DocumentId> = queued.iter().map(|(_, id)| *id).collect();
            let removed = self.store().remove(&collection, &ids)?;
            debug!(collection = collection.as_str(), removed, "documents deleted");
            for (document, id) in queued {
                self.get_and_remove_id(document)?;
                self.identity.remove(&collection, id);
                self.clear_query_hashes(document)?;
                self.fire(LifecycleEvent::PostDelete, document)?;
            }
        }
        Ok(())
    }

    /// Reloads a persisted document from the store, discarding every
    /// pending change.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` for new documents and `DocumentNotFound` if
    /// the store no longer holds the document.
    pub fn refresh(&mut self, document: EntityRef) -> CoreResult<()> {
        if self.is_new(document)? {
            return Err(CoreError::invalid_state(format!(
                "{document} is new and cannot be refreshed"
            )));
        }
        let (collection, id) = self.persisted_key(document)?;
        let raw = self
            .store()
            .find_one(&collection, id, None)?
            .ok_or(CoreError::DocumentNotFound {
                collection: collection.clone(),
                id,
            })?;
        debug!(collection = collection.as_str(), %id, "document refreshed");
        self.set_document_data(document, &raw, true)
    }
}
