//! Structured dump of an entity's loaded state.

use crate::error::CoreResult;
use crate::session::Session;
use crate::types::EntityRef;
use docmap_codec::{Map, Value};
use std::sync::Arc;

impl Session {
    /// Dumps the loaded state of an entity.
    ///
    /// The result is a map with the sections `fields`, `references_one`,
    /// `references_many`, `embeddeds_one` and `embeddeds_many`; empty
    /// sections are left out. Raw reference fields are shown through their
    /// references, as ids. Nothing unloaded is fetched except the saved
    /// members of groups already in use.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for a disposed handle, or a group loader error.
    pub fn debug(&mut self, entity: EntityRef) -> CoreResult<Value> {
        let state = self.state(entity)?.clone();
        let class = Arc::clone(&state.class);
        let mut dump = Map::new();

        let fields: Map = state
            .fields
            .iter()
            .filter(|(name, _)| !class.is_reference_field(name))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();
        insert_section(&mut dump, "fields", fields);

        let mut references_one = Map::new();
        for (name, target) in &state.references_one {
            let id = match target {
                Some(target) => self.state(*target)?.id.map_or(Value::Null, Value::Id),
                None => Value::Null,
            };
            references_one.insert(name.clone(), id);
        }
        insert_section(&mut dump, "references_one", references_one);

        let mut references_many = Map::new();
        for (name, group) in &state.references_many {
            let mut ids = Vec::new();
            for member in self.group(*group).all()? {
                if let Some(id) = self.state(member)?.id {
                    ids.push(Value::Id(id));
                }
            }
            references_many.insert(name.clone(), Value::Array(ids));
        }
        insert_section(&mut dump, "references_many", references_many);

        let mut embeddeds_one = Map::new();
        for (name, child) in &state.embeddeds_one {
            let value = match child {
                Some(child) => self.debug(*child)?,
                None => Value::Null,
            };
            embeddeds_one.insert(name.clone(), value);
        }
        insert_section(&mut dump, "embeddeds_one", embeddeds_one);

        let mut embeddeds_many = Map::new();
        for (name, group) in &state.embeddeds_many {
            let mut members = Vec::new();
            for member in self.group(*group).all()? {
                members.push(self.debug(member)?);
            }
            embeddeds_many.insert(name.clone(), Value::Array(members));
        }
        insert_section(&mut dump, "embeddeds_many", embeddeds_many);

        Ok(Value::Map(dump))
    }
}

fn insert_section(dump: &mut Map, name: &str, section: Map) {
    if !section.is_empty() {
        dump.insert(name.to_string(), Value::Map(section));
    }
}
