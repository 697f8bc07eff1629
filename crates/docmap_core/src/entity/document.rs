//! Root document operations: ids, query hashes and the field cache.

use crate::error::CoreResult;
use crate::session::Session;
use crate::side_table::keys;
use crate::types::{DocumentId, EntityRef};
use docmap_codec::Value;
use tracing::trace;

const CACHE_FIELDS: &str = "fields";
const CACHE_REFERENCES: &str = "references";

impl Session {
    /// Returns true until the document has an id.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for embedded documents.
    pub fn is_new(&self, document: EntityRef) -> CoreResult<bool> {
        Ok(self.document_state(document)?.id.is_none())
    }

    /// Id of a persisted document.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for embedded documents.
    pub fn id(&self, document: EntityRef) -> CoreResult<Option<DocumentId>> {
        Ok(self.document_state(document)?.id)
    }

    /// Assigns an id, marking the document persisted.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for embedded documents.
    pub fn set_id(&mut self, document: EntityRef, id: DocumentId) -> CoreResult<()> {
        self.document_state(document)?;
        self.state_mut(document)?.id = Some(id);
        Ok(())
    }

    /// Takes the id away, marking the document new again.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for embedded documents.
    pub fn get_and_remove_id(&mut self, document: EntityRef) -> CoreResult<Option<DocumentId>> {
        self.document_state(document)?;
        Ok(self.state_mut(document)?.id.take())
    }

    /// Records that the document was loaded through the query with `hash`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for embedded documents.
    pub fn add_query_hash(&mut self, document: EntityRef, hash: impl Into<String>) -> CoreResult<()> {
        self.document_state(document)?;
        self.side
            .get_by_reference(document, keys::QUERY_HASHES, Vec::<String>::new())?
            .push(hash.into());
        Ok(())
    }

    /// Query hashes recorded for the document, in insertion order.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for embedded documents.
    pub fn query_hashes(&self, document: EntityRef) -> CoreResult<Vec<String>> {
        self.document_state(document)?;
        Ok(self
            .side
            .get_or_default(document, keys::QUERY_HASHES, Vec::<String>::new()))
    }

    /// Removes the first occurrence of a query hash.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for embedded documents.
    pub fn remove_query_hash(&mut self, document: EntityRef, hash: &str) -> CoreResult<()> {
        self.document_state(document)?;
        if self.side.has(document, keys::QUERY_HASHES) {
            let hashes = self.side.get_by_reference(
                document,
                keys::QUERY_HASHES,
                Vec::<String>::new(),
            )?;
            if let Some(position) = hashes.iter().position(|h| h == hash) {
                hashes.remove(position);
            }
        }
        Ok(())
    }

    /// Forgets every query hash of the document.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for embedded documents.
    pub fn clear_query_hashes(&mut self, document: EntityRef) -> CoreResult<()> {
        self.document_state(document)?;
        self.side.remove(document, keys::QUERY_HASHES);
        Ok(())
    }

    /// Records a field path as used by every query that loaded the document.
    ///
    /// Each cache entry keyed by one of the document's query hashes gets
    /// `fields.<path> = 1`; later runs of those queries project the
    /// recorded paths. Does nothing when the field cache is disabled.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for embedded documents, or a cache error.
    pub fn add_field_cache(&mut self, document: EntityRef, path: &str) -> CoreResult<()> {
        if !self.config().use_field_cache {
            return Ok(());
        }
        for hash in self.query_hashes(document)? {
            let mut entry = self.cache_entry(&hash)?;
            let fields = entry
                .entry(CACHE_FIELDS.to_string())
                .or_insert_with(Value::empty_map);
            if fields.as_map().is_none() {
                *fields = Value::empty_map();
            }
            if let Some(fields) = fields.as_map_mut() {
                fields.insert(path.to_string(), Value::Integer(1));
            }
            trace!(hash = hash.as_str(), path, "field cache updated");
            self.cache().set(&hash, Value::Map(entry))?;
        }
        Ok(())
    }

    /// Records a reference as used by every query that loaded the document.
    ///
    /// The name is appended to the entry's `references` list once; later
    /// runs of those queries resolve it eagerly.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for embedded documents, or a cache error.
    pub fn add_reference_cache(&mut self, document: EntityRef, reference: &str) -> CoreResult<()> {
        if !self.config().use_field_cache {
            return Ok(());
        }
        for hash in self.query_hashes(document)? {
            let mut entry = self.cache_entry(&hash)?;
            let references = entry
                .entry(CACHE_REFERENCES.to_string())
                .or_insert_with(|| Value::Array(Vec::new()));
            if !matches!(references, Value::Array(_)) {
                *references = Value::Array(Vec::new());
            }
            let name = Value::from(reference);
            if let Value::Array(items) = references {
                if items.contains(&name) {
                    continue;
                }
                items.push(name);
            }
            trace!(hash = hash.as_str(), reference, "reference cache updated");
            self.cache().set(&hash, Value::Map(entry))?;
        }
        Ok(())
    }

    fn cache_entry(&self, hash: &str) -> CoreResult<docmap_codec::Map> {
        Ok(match self.cache().get(hash)? {
            Some(Value::Map(entry)) => entry,
            _ => docmap_codec::Map::new(),
        })
    }

    /// Field paths recorded in the cache entry of a query hash.
    pub(crate) fn cached_fields(&self, hash: &str) -> CoreResult<Option<Vec<String>>> {
        Ok(self
            .cache_entry(hash)?
            .get(CACHE_FIELDS)
            .and_then(Value::as_map)
            .map(|fields| fields.keys().cloned().collect()))
    }

    /// References recorded in the cache entry of a query hash.
    pub(crate) fn cached_references(&self, hash: &str) -> CoreResult<Vec<String>> {
        Ok(self
            .cache_entry(hash)?
            .get(CACHE_REFERENCES)
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_text)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default())
    }
}
