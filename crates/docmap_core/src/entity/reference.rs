//! References to other root documents.

use crate::error::{CoreError, CoreResult};
use crate::group::{PolymorphicReferenceLoader, ReferenceLoader, SavedDataLoader};
use crate::metadata::{ReferenceManyMeta, ReferenceOneMeta};
use crate::session::Session;
use crate::side_table::keys;
use crate::store::ID_FIELD;
use crate::types::{EntityRef, GroupRef};
use docmap_codec::Value;
use std::sync::Arc;

impl Session {
    fn reference_one_meta(&self, entity: EntityRef, name: &str) -> CoreResult<ReferenceOneMeta> {
        let class = &self.state(entity)?.class;
        class
            .reference_one_meta(name)
            .cloned()
            .ok_or_else(|| CoreError::not_found(format!("reference {}.{name}", class.name)))
    }

    fn reference_many_meta(
        &self,
        entity: EntityRef,
        name: &str,
    ) -> CoreResult<ReferenceManyMeta> {
        let class = &self.state(entity)?.class;
        class
            .reference_many_meta(name)
            .cloned()
            .ok_or_else(|| CoreError::not_found(format!("reference {}.{name}", class.name)))
    }

    /// Document referenced by a single reference, resolved from the raw id
    /// field on first access through the identity map.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an undeclared reference, or a store error.
    pub fn reference_one(&mut self, entity: EntityRef, name: &str) -> CoreResult<Option<EntityRef>> {
        let meta = self.reference_one_meta(entity, name)?;
        if let Some(resolved) = self.state(entity)?.references_one.get(name) {
            return Ok(*resolved);
        }

        let raw = self.get_field(entity, &meta.field)?;
        if self.is_document(entity)? {
            self.add_reference_cache(entity, name)?;
        }
        let target = match raw {
            Value::Id(id) => self.find_by_ids(&meta.class, &[id])?.into_iter().next(),
            _ => None,
        };
        self.state_mut(entity)?
            .references_one
            .insert(name.to_string(), target);
        Ok(target)
    }

    /// Points a single reference at another document.
    ///
    /// The raw id field follows immediately when the target is persisted;
    /// for a new target it is filled in when the owner is saved.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an undeclared reference and `InvalidArgument`
    /// for a target that is embedded or of the wrong class.
    pub fn set_reference_one(
        &mut self,
        entity: EntityRef,
        name: &str,
        target: Option<EntityRef>,
    ) -> CoreResult<()> {
        let meta = self.reference_one_meta(entity, name)?;
        if let Some(target) = target {
            let class = &self.document_state(target)?.class.name;
            if !self.metadata().is_a(class, &meta.class) {
                return Err(CoreError::invalid_argument(format!(
                    "{target} is a {class}, reference {name} points at {}",
                    meta.class
                )));
            }
        }
        self.state_mut(entity)?
            .references_one
            .insert(name.to_string(), target);
        self.sync_reference_one(entity, &meta)
    }

    /// Group backing a reference-many relation, created on first access.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an undeclared reference.
    pub fn references_many(&mut self, entity: EntityRef, name: &str) -> CoreResult<GroupRef> {
        let meta = self.reference_many_meta(entity, name)?;
        if let Some(group) = self.state(entity)?.references_many.get(name) {
            return Ok(*group);
        }

        let loader: Arc<dyn SavedDataLoader> = match meta.polymorphism {
            Some(_) => Arc::new(PolymorphicReferenceLoader),
            None => Arc::new(ReferenceLoader),
        };
        let group = self.create_group(loader);
        self.side.set(group, keys::DOCUMENT_CLASS, meta.class);
        self.side.set(group, keys::PARENT, entity);
        self.side.set(group, keys::FIELD, meta.field);
        self.side.set(group, keys::REFERENCE, name.to_string());
        if let Some(polymorphism) = meta.polymorphism {
            self.side.set(
                group,
                keys::DISCRIMINATOR_FIELD,
                polymorphism.discriminator_field,
            );
            self.side.set(
                group,
                keys::DISCRIMINATOR_MAP,
                polymorphism.discriminator_map,
            );
        }
        self.state_mut(entity)?
            .references_many
            .insert(name.to_string(), group);
        Ok(group)
    }

    /// Writes the ids of resolved references into their raw fields, for the
    /// entity and everything embedded in it.
    ///
    /// Raw fields are only set when their value actually changes. Targets
    /// that are still new are skipped.
    pub(crate) fn update_reference_fields(&mut self, entity: EntityRef) -> CoreResult<()> {
        let state = self.state(entity)?;
        let class = Arc::clone(&state.class);
        let children: Vec<EntityRef> = state.embedded_children().collect();
        let groups: Vec<GroupRef> = state.embeddeds_many.values().copied().collect();

        for meta in &class.references_one {
            self.sync_reference_one(entity, meta)?;
        }
        for meta in &class.references_many {
            self.sync_reference_many(entity, meta)?;
        }
        for child in children {
            self.update_reference_fields(child)?;
        }
        for group in groups {
            let members: Vec<EntityRef> = self.group_state(group)?.members().collect();
            for member in members {
                if self.contains(member) {
                    self.update_reference_fields(member)?;
                }
            }
        }
        Ok(())
    }

    fn sync_reference_one(&mut self, entity: EntityRef, meta: &ReferenceOneMeta) -> CoreResult<()> {
        let Some(resolved) = self.state(entity)?.references_one.get(&meta.name).copied() else {
            return Ok(());
        };
        let desired = match resolved {
            None => Value::Null,
            Some(target) => match self.state(target)?.id {
                Some(id) => Value::Id(id),
                None => return Ok(()),
            },
        };
        if self.get_field(entity, &meta.field)? != desired {
            self.set_field(entity, &meta.field, desired)?;
        }
        Ok(())
    }

    fn sync_reference_many(
        &mut self,
        entity: EntityRef,
        meta: &ReferenceManyMeta,
    ) -> CoreResult<()> {
        let Some(group) = self.state(entity)?.references_many.get(&meta.name).copied() else {
            return Ok(());
        };
        if !self.group_state(group)?.has_pending() {
            return Ok(());
        }

        let members = self.group(group).all()?;
        let mut elements = Vec::with_capacity(members.len());
        for member in members {
            let state = self.state(member)?;
            let Some(id) = state.id else { continue };
            elements.push(match &meta.polymorphism {
                Some(polymorphism) => Value::map([
                    (ID_FIELD.to_string(), Value::Id(id)),
                    (
                        polymorphism.discriminator_field.clone(),
                        Value::Text(polymorphism.value_for(&state.class.name)),
                    ),
                ]),
                None => Value::Id(id),
            });
        }
        let desired = Value::Array(elements);
        if self.get_field(entity, &meta.field)? != desired {
            self.set_field(entity, &meta.field, desired)?;
        }
        Ok(())
    }
}
