//! Queries, hydration of raw records and batched lookups by id.
//!
//! Every query has a hash: the hex SHA-256 of its resolved shape. Documents
//! remember the hashes of the queries that loaded them, and report back the
//! fields and references they end up using. The next run of the same query
//! projects only those fields and resolves those references eagerly.

use crate::error::{CoreError, CoreResult};
use crate::metadata::ClassMetadata;
use crate::session::Session;
use crate::store::{StoreFilter, ID_FIELD};
use crate::types::{DocumentId, EntityRef};
use docmap_codec::{encode, Map, Value};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fmt::Write as _;
use tracing::{debug, trace};

/// Selection of documents, resolved against the session when run.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// Every document of the class.
    All,
    /// Documents with one of the ids.
    IdIn(Vec<DocumentId>),
    /// Documents whose field equals the value.
    Eq(String, Value),
    /// Documents listed in a raw reference field of `owner`.
    ReferencedBy {
        /// Document holding the raw field.
        owner: EntityRef,
        /// Raw reference field.
        field: String,
    },
    /// Documents matching every filter.
    And(Vec<Filter>),
}

/// A query over one class.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    class: String,
    filter: Filter,
    fields: Option<Vec<String>>,
    references: Vec<String>,
    limit: Option<usize>,
}

impl Query {
    /// Queries every document of a class.
    pub fn new(class: impl Into<String>) -> Self {
        Self {
            class: class.into(),
            filter: Filter::All,
            fields: None,
            references: Vec::new(),
            limit: None,
        }
    }

    /// Sets the filter.
    #[must_use]
    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = filter;
        self
    }

    /// Loads only the listed fields; the field cache is bypassed.
    #[must_use]
    pub fn fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    /// Resolves the listed references eagerly.
    #[must_use]
    pub fn references<I, S>(mut self, references: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.references = references.into_iter().map(Into::into).collect();
        self
    }

    /// Returns at most `limit` documents.
    #[must_use]
    pub const fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Queried class.
    #[must_use]
    pub fn class(&self) -> &str {
        &self.class
    }

    /// The filter.
    #[must_use]
    pub fn filter_ref(&self) -> &Filter {
        &self.filter
    }
}

#[derive(Serialize)]
struct QueryShape<'a> {
    class: &'a str,
    collection: &'a str,
    filter: &'a StoreFilter,
    fields: Option<&'a [String]>,
    references: &'a [String],
    limit: Option<usize>,
}

impl QueryShape<'_> {
    fn hash(&self) -> CoreResult<String> {
        let digest = Sha256::digest(encode(self)?);
        let mut hash = String::with_capacity(digest.len() * 2);
        for byte in digest {
            let _ = write!(hash, "{byte:02x}");
        }
        Ok(hash)
    }
}

impl Session {
    fn resolve_filter(&mut self, filter: &Filter, class: &ClassMetadata) -> CoreResult<StoreFilter> {
        Ok(match filter {
            Filter::All => StoreFilter::All,
            Filter::IdIn(ids) => StoreFilter::IdIn(ids.clone()),
            Filter::Eq(name, value) => match class.field_meta(name) {
                Some(field) => StoreFilter::Eq(
                    field.db_name.clone(),
                    self.types().to_store(&field.type_name, value)?,
                ),
                None if name == ID_FIELD => StoreFilter::Eq(name.clone(), value.clone()),
                None => {
                    return Err(CoreError::not_found(format!(
                        "field {}.{name}",
                        class.name
                    )))
                }
            },
            Filter::ReferencedBy { owner, field } => {
                let ids = match self.get_field(*owner, field)? {
                    Value::Array(items) => items
                        .iter()
                        .filter_map(|item| item.as_id().or_else(|| item.get(ID_FIELD)?.as_id()))
                        .collect(),
                    Value::Id(id) => vec![id],
                    _ => Vec::new(),
                };
                StoreFilter::IdIn(ids)
            }
            Filter::And(filters) => StoreFilter::And(
                filters
                    .iter()
                    .map(|f| self.resolve_filter(f, class))
                    .collect::<CoreResult<_>>()?,
            ),
        })
    }

    fn store_filter(&mut self, query: &Query, class: &ClassMetadata) -> CoreResult<StoreFilter> {
        let filter = self.resolve_filter(&query.filter, class)?;
        // Subclasses share the collection of their base.
        Ok(match (&class.discriminator_field, &class.discriminator_value) {
            (Some(field), Some(value)) => StoreFilter::And(vec![
                StoreFilter::Eq(field.clone(), Value::Text(value.clone())),
                filter,
            ]),
            _ => filter,
        })
    }

    /// Hash identifying a query in the field cache.
    ///
    /// # Errors
    ///
    /// Returns `UnknownClass` or an error resolving the filter.
    pub fn query_hash(&mut self, query: &Query) -> CoreResult<String> {
        let class = self.metadata().get(&query.class)?;
        let filter = self.store_filter(query, &class)?;
        QueryShape {
            class: &class.name,
            collection: class.collection_name()?,
            filter: &filter,
            fields: query.fields.as_deref(),
            references: &query.references,
            limit: query.limit,
        }
        .hash()
    }

    /// Runs a query and hydrates the results through the identity map.
    ///
    /// Without explicit fields the projection recorded in the field cache
    /// is used. Every result remembers the query hash, and references
    /// requested by the query or recorded in the cache are resolved with one
    /// batch per relation.
    ///
    /// # Errors
    ///
    /// Returns `UnknownClass`, a store error or a cache error.
    pub fn execute(&mut self, query: &Query) -> CoreResult<Vec<EntityRef>> {
        let class = self.metadata().get(&query.class)?;
        let collection = class.collection_name()?.to_string();
        for name in &query.references {
            if class.reference_one_meta(name).is_none() && class.reference_many_meta(name).is_none()
            {
                return Err(CoreError::not_found(format!("reference {}.{name}", class.name)));
            }
        }

        let filter = self.store_filter(query, &class)?;
        let hash = QueryShape {
            class: &class.name,
            collection: &collection,
            filter: &filter,
            fields: query.fields.as_deref(),
            references: &query.references,
            limit: query.limit,
        }
        .hash()?;

        let mut projection = match &query.fields {
            Some(fields) => Some(
                fields
                    .iter()
                    .map(|f| class.field_meta(f).map_or_else(|| f.clone(), |m| m.db_name.clone()))
                    .collect::<Vec<_>>(),
            ),
            None if self.config().use_field_cache => self.cached_fields(&hash)?,
            None => None,
        };
        if let (Some(paths), Some(field)) = (&mut projection, &class.discriminator_field) {
            if !paths.contains(field) {
                paths.push(field.clone());
            }
        }

        debug!(
            collection = collection.as_str(),
            hash = hash.as_str(),
            projected = projection.is_some(),
            "executing query"
        );
        let mut raws = self
            .store()
            .find(&collection, &filter, projection.as_deref())?;
        if let Some(limit) = query.limit {
            raws.truncate(limit);
        }

        let mut results = Vec::with_capacity(raws.len());
        for raw in raws {
            let document = self.load(&query.class, raw)?;
            if !self.query_hashes(document)?.contains(&hash) {
                self.add_query_hash(document, hash.clone())?;
            }
            results.push(document);
        }

        let mut references = query.references.clone();
        if self.config().use_field_cache {
            for cached in self.cached_references(&hash)? {
                if !references.contains(&cached) {
                    references.push(cached);
                }
            }
        }
        for name in &references {
            self.resolve_references(&class, &results, name)?;
        }
        Ok(results)
    }

    fn resolve_references(
        &mut self,
        class: &ClassMetadata,
        documents: &[EntityRef],
        name: &str,
    ) -> CoreResult<()> {
        if let Some(meta) = class.reference_one_meta(name) {
            let mut ids = Vec::new();
            for document in documents {
                if let Value::Id(id) = self.get_field(*document, &meta.field)? {
                    ids.push(id);
                }
            }
            trace!(reference = name, count = ids.len(), "eager reference batch");
            self.find_by_ids(&meta.class, &ids)?;
            for document in documents {
                self.reference_one(*document, name)?;
            }
        } else if class.reference_many_meta(name).is_some() {
            for document in documents {
                let group = self.references_many(*document, name)?;
                self.group(group).saved()?;
            }
        }
        Ok(())
    }

    /// Hydrates a raw record of a class.
    ///
    /// A document already in the identity map is reused; the record is
    /// merged into it without overwriting pending changes. Otherwise the
    /// concrete class is resolved through the discriminator and a new
    /// instance is registered.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the record has no `_id`, or
    /// `UnknownClass`.
    pub fn load(&mut self, class: &str, raw: Map) -> CoreResult<EntityRef> {
        let id = raw
            .get(ID_FIELD)
            .and_then(Value::as_id)
            .ok_or_else(|| CoreError::invalid_argument(format!("{class} record without {ID_FIELD}")))?;
        let base = self.metadata().get(class)?;
        let collection = base.collection_name()?.to_string();

        if let Some(document) = self.identity.get(&collection, id) {
            trace!(collection = collection.as_str(), %id, "identity map hit");
            self.set_document_data(document, &raw, false)?;
            return Ok(document);
        }

        let concrete = self.metadata().resolve(&base, &raw)?;
        let document = self.allocate(concrete);
        self.state_mut(document)?.id = Some(id);
        self.identity.insert(&collection, id, document);
        self.set_document_data(document, &raw, false)?;
        Ok(document)
    }

    /// Documents of a class by id, in the requested order.
    ///
    /// Ids already in the identity map cost nothing; the rest are fetched
    /// with one batch. Ids the store does not know are skipped.
    ///
    /// # Errors
    ///
    /// Returns `UnknownClass` or a store error.
    pub fn find_by_ids(&mut self, class: &str, ids: &[DocumentId]) -> CoreResult<Vec<EntityRef>> {
        let base = self.metadata().get(class)?;
        let collection = base.collection_name()?.to_string();

        let mut missing: Vec<DocumentId> = Vec::new();
        for id in ids {
            if !self.identity.contains(&collection, *id) && !missing.contains(id) {
                missing.push(*id);
            }
        }
        if !missing.is_empty() {
            debug!(
                collection = collection.as_str(),
                count = missing.len(),
                "fetching documents by id"
            );
            let raws = self
                .store()
                .find(&collection, &StoreFilter::IdIn(missing), None)?;
            for raw in raws {
                self.load(class, raw)?;
            }
        }

        Ok(ids
            .iter()
            .filter_map(|id| self.identity.get(&collection, *id))
            .collect())
    }

    /// One document of a class by id.
    ///
    /// # Errors
    ///
    /// Returns `UnknownClass` or a store error.
    pub fn find_by_id(&mut self, class: &str, id: DocumentId) -> CoreResult<Option<EntityRef>> {
        Ok(self.find_by_ids(class, &[id])?.into_iter().next())
    }
}
