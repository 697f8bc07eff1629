//! Strategies that materialize the saved members of a group.

use super::GroupKind;
use crate::error::CoreResult;
use crate::metadata::Polymorphism;
use crate::session::Session;
use crate::side_table::keys;
use crate::store::ID_FIELD;
use crate::types::{DocumentId, EntityRef, GroupRef, RootAndPath};
use docmap_codec::Value;
use std::collections::BTreeMap;
use tracing::trace;

/// Produces the saved members of a group on first access.
///
/// Loaders receive the session so they can read the group's wiring from
/// the side table, query the store and hydrate entities.
pub trait SavedDataLoader: Send + Sync {
    /// Kind of group this loader backs.
    fn kind(&self) -> GroupKind {
        GroupKind::Plain
    }

    /// Materializes the saved members.
    fn load(&self, session: &mut Session, group: GroupRef) -> CoreResult<Vec<EntityRef>>;
}

/// Loader returning a fixed list of members.
#[derive(Debug, Clone, Default)]
pub struct StaticLoader {
    members: Vec<EntityRef>,
}

impl StaticLoader {
    /// Creates a loader returning `members`.
    #[must_use]
    pub fn new(members: Vec<EntityRef>) -> Self {
        Self { members }
    }
}

impl SavedDataLoader for StaticLoader {
    fn load(&self, _session: &mut Session, _group: GroupRef) -> CoreResult<Vec<EntityRef>> {
        Ok(self.members.clone())
    }
}

/// Embedded documents: hydrated from pre-seeded raw data, or fetched with a
/// projected read of the owning root document.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct EmbeddedLoader;

impl SavedDataLoader for EmbeddedLoader {
    fn kind(&self) -> GroupKind {
        GroupKind::Embedded
    }

    fn load(&self, session: &mut Session, group: GroupRef) -> CoreResult<Vec<EntityRef>> {
        let class = session
            .side
            .get::<String>(group, keys::DOCUMENT_CLASS)?
            .clone();
        let rap = session
            .side
            .get::<RootAndPath>(group, keys::ROOT_AND_PATH)
            .ok()
            .cloned();
        let data = match session.side.get::<Vec<Value>>(group, keys::SAVED_DATA) {
            Ok(data) => data.clone(),
            Err(_) => {
                let parent = *session.side.get::<EntityRef>(group, keys::PARENT)?;
                let field = session.side.get::<String>(group, keys::FIELD)?.clone();
                let items = match session.fetch_slot(parent, &field)? {
                    Some(Value::Array(items)) => items,
                    _ => Vec::new(),
                };
                session.side.set(group, keys::SAVED_DATA, items.clone());
                items
            }
        };

        let base = session.metadata().get(&class)?;
        let mut members = Vec::with_capacity(data.len());
        for (i, item) in data.into_iter().enumerate() {
            let Value::Map(raw) = item else { continue };
            let concrete = session.metadata().resolve(&base, &raw)?;
            let member = session.allocate(concrete);
            if let Some(rap) = &rap {
                session.set_root_and_path(member, rap.root, format!("{}.{i}", rap.path))?;
            }
            session.set_document_data(member, &raw, false)?;
            members.push(member);
        }
        Ok(members)
    }
}

/// Reference group wiring read from the side table.
struct ReferenceWiring {
    parent: EntityRef,
    field: String,
    class: String,
    reference: Option<String>,
}

impl ReferenceWiring {
    fn read(session: &Session, group: GroupRef) -> CoreResult<Self> {
        let side = session.side_table();
        Ok(Self {
            parent: *side.get::<EntityRef>(group, keys::PARENT)?,
            field: side.get::<String>(group, keys::FIELD)?.clone(),
            class: side.get::<String>(group, keys::DOCUMENT_CLASS)?.clone(),
            reference: side.get::<String>(group, keys::REFERENCE).ok().cloned(),
        })
    }

    /// Reads the raw field and records the relation in the field cache.
    fn raw_elements(&self, session: &mut Session) -> CoreResult<Vec<Value>> {
        let raw = session.get_field(self.parent, &self.field)?;
        if let Some(reference) = &self.reference {
            if session.is_document(self.parent)? {
                session.add_reference_cache(self.parent, reference)?;
            }
        }
        Ok(match raw {
            Value::Array(items) => items,
            _ => Vec::new(),
        })
    }
}

/// Root documents whose ids are listed in a raw field of the owner.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct ReferenceLoader;

impl SavedDataLoader for ReferenceLoader {
    fn kind(&self) -> GroupKind {
        GroupKind::Reference
    }

    fn load(&self, session: &mut Session, group: GroupRef) -> CoreResult<Vec<EntityRef>> {
        let wiring = ReferenceWiring::read(session, group)?;
        let ids: Vec<DocumentId> = wiring
            .raw_elements(session)?
            .iter()
            .filter_map(Value::as_id)
            .collect();
        session.find_by_ids(&wiring.class, &ids)
    }
}

/// Root documents of several classes. Each raw element is a map holding
/// `_id` and the discriminator; one batch is fetched per class.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct PolymorphicReferenceLoader;

impl SavedDataLoader for PolymorphicReferenceLoader {
    fn kind(&self) -> GroupKind {
        GroupKind::PolymorphicReference
    }

    fn load(&self, session: &mut Session, group: GroupRef) -> CoreResult<Vec<EntityRef>> {
        let wiring = ReferenceWiring::read(session, group)?;
        let polymorphism = Polymorphism {
            discriminator_field: session
                .side
                .get::<String>(group, keys::DISCRIMINATOR_FIELD)?
                .clone(),
            discriminator_map: session
                .side
                .get_or_default::<Option<BTreeMap<String, String>>>(
                    group,
                    keys::DISCRIMINATOR_MAP,
                    None,
                ),
        };

        let mut buckets: Vec<(String, Vec<DocumentId>)> = Vec::new();
        for element in wiring.raw_elements(session)? {
            let id = element.get(ID_FIELD).and_then(Value::as_id);
            let value = element
                .get(&polymorphism.discriminator_field)
                .and_then(Value::as_text);
            let (Some(id), Some(value)) = (id, value) else {
                continue;
            };
            let class = polymorphism.class_for(value);
            match buckets.iter_mut().find(|(c, _)| c == class) {
                Some((_, ids)) => ids.push(id),
                None => buckets.push((class.to_string(), vec![id])),
            }
        }

        let mut members = Vec::new();
        for (class, ids) in buckets {
            trace!(%group, class = class.as_str(), count = ids.len(), "polymorphic batch");
            members.extend(session.find_by_ids(&class, &ids)?);
        }
        Ok(members)
    }
}
