//! Per-instance entity data held by a session.

use crate::metadata::ClassMetadata;
use crate::types::{DocumentId, EntityRef, GroupRef};
use docmap_codec::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Loaded data and change records of one entity.
///
/// A key present in `fields`, `embeddeds_one` or `references_one` means the
/// slot has been loaded or assigned; an absent key means it was never read
/// and may still be fetched lazily.
#[derive(Debug, Clone)]
pub(crate) struct EntityState {
    pub class: Arc<ClassMetadata>,
    /// Id of a persisted root document.
    pub id: Option<DocumentId>,
    /// Native field values.
    pub fields: BTreeMap<String, Value>,
    /// Original value of every field changed since the last clean point.
    pub fields_modified: BTreeMap<String, Value>,
    pub embeddeds_one: BTreeMap<String, Option<EntityRef>>,
    pub embeddeds_many: BTreeMap<String, GroupRef>,
    pub references_one: BTreeMap<String, Option<EntityRef>>,
    pub references_many: BTreeMap<String, GroupRef>,
}

impl EntityState {
    pub fn new(class: Arc<ClassMetadata>) -> Self {
        Self {
            class,
            id: None,
            fields: BTreeMap::new(),
            fields_modified: BTreeMap::new(),
            embeddeds_one: BTreeMap::new(),
            embeddeds_many: BTreeMap::new(),
            references_one: BTreeMap::new(),
            references_many: BTreeMap::new(),
        }
    }

    pub fn is_document(&self) -> bool {
        self.class.is_document()
    }

    /// Every group owned by this entity.
    pub fn groups(&self) -> impl Iterator<Item = GroupRef> + '_ {
        self.embeddeds_many
            .values()
            .chain(self.references_many.values())
            .copied()
    }

    /// Every embedded child currently assigned.
    pub fn embedded_children(&self) -> impl Iterator<Item = EntityRef> + '_ {
        self.embeddeds_one.values().filter_map(|child| *child)
    }
}
