//! The session: every entity and group of one unit of work.
//!
//! Entities and groups live in an arena owned by the session and are
//! addressed by copyable handles ([`EntityRef`], [`GroupRef`]). Parent and
//! child pointers are handles too, so the object graph can be walked in
//! both directions without shared ownership.
//!
//! A session is single-threaded; run one session per unit of work. The
//! type registry, metadata, document store and cache are shared between
//! sessions.

use crate::config::SessionConfig;
use crate::convert::TypeRegistry;
use crate::entity::{generator_by_name, EntityState, IdGenerator};
use crate::error::{CoreError, CoreResult};
use crate::group::GroupState;
use crate::hooks::{LifecycleEvent, LifecycleHook};
use crate::identity::IdentityMap;
use crate::metadata::{ClassMetadata, MetadataRegistry};
use crate::side_table::SideTable;
use crate::store::DocumentStore;
use crate::types::{EntityRef, GroupRef, InstanceId};
use docmap_storage::{Cache, InMemoryCache};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, trace};

/// Builder for [`Session`].
pub struct SessionBuilder {
    config: SessionConfig,
    metadata: Arc<MetadataRegistry>,
    store: Arc<dyn DocumentStore>,
    types: Option<Arc<TypeRegistry>>,
    cache: Option<Arc<dyn Cache>>,
    id_generator: Option<Box<dyn IdGenerator>>,
}

impl SessionBuilder {
    /// Sets the configuration.
    #[must_use]
    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Shares a type registry. Defaults to a fresh registry of built-ins.
    #[must_use]
    pub fn types(mut self, types: Arc<TypeRegistry>) -> Self {
        self.types = Some(types);
        self
    }

    /// Shares a query cache. Defaults to an in-memory cache.
    #[must_use]
    pub fn cache(mut self, cache: Arc<dyn Cache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Uses a custom id generator instead of the configured one.
    #[must_use]
    pub fn id_generator(mut self, generator: Box<dyn IdGenerator>) -> Self {
        self.id_generator = Some(generator);
        self
    }

    /// Validates the metadata and builds the session.
    ///
    /// # Errors
    ///
    /// Returns an error if the metadata is inconsistent, a field names an
    /// unregistered type, or the configured id generator does not exist.
    pub fn build(self) -> CoreResult<Session> {
        self.metadata.validate()?;
        let types = self
            .types
            .unwrap_or_else(|| Arc::new(TypeRegistry::new()));
        for name in self.metadata.class_names() {
            let class = self.metadata.get(name)?;
            if let Some(field) = class.fields.iter().find(|f| !types.has(&f.type_name)) {
                return Err(CoreError::not_found(format!(
                    "type {} of {name}.{}",
                    field.type_name, field.name
                )));
            }
        }
        let id_generator = match self.id_generator {
            Some(generator) => generator,
            None => generator_by_name(&self.config.id_generator)?,
        };
        let cache = self
            .cache
            .unwrap_or_else(|| Arc::new(InMemoryCache::new()));

        debug!(
            generator = id_generator.name(),
            field_cache = self.config.use_field_cache,
            lazy = self.config.lazy_loading,
            "session opened"
        );
        Ok(Session {
            config: self.config,
            metadata: self.metadata,
            types,
            store: self.store,
            cache,
            id_generator,
            next_instance: 0,
            entities: HashMap::new(),
            groups: HashMap::new(),
            side: SideTable::new(),
            identity: IdentityMap::new(),
            hooks: HashMap::new(),
        })
    }
}

/// A unit of work over a document store.
pub struct Session {
    config: SessionConfig,
    metadata: Arc<MetadataRegistry>,
    types: Arc<TypeRegistry>,
    store: Arc<dyn DocumentStore>,
    cache: Arc<dyn Cache>,
    id_generator: Box<dyn IdGenerator>,
    next_instance: u64,
    pub(crate) entities: HashMap<EntityRef, EntityState>,
    pub(crate) groups: HashMap<GroupRef, GroupState>,
    pub(crate) side: SideTable,
    pub(crate) identity: IdentityMap,
    hooks: HashMap<String, Vec<Arc<dyn LifecycleHook>>>,
}

impl Session {
    /// Starts building a session.
    pub fn builder(
        metadata: Arc<MetadataRegistry>,
        store: Arc<dyn DocumentStore>,
    ) -> SessionBuilder {
        SessionBuilder {
            config: SessionConfig::default(),
            metadata,
            store,
            types: None,
            cache: None,
            id_generator: None,
        }
    }

    /// Creates a session with default configuration.
    ///
    /// # Errors
    ///
    /// See [`SessionBuilder::build`].
    pub fn new(
        metadata: Arc<MetadataRegistry>,
        store: Arc<dyn DocumentStore>,
    ) -> CoreResult<Self> {
        Self::builder(metadata, store).build()
    }

    /// The session configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// The registered classes.
    pub fn metadata(&self) -> &Arc<MetadataRegistry> {
        &self.metadata
    }

    /// The type converters.
    pub fn types(&self) -> &Arc<TypeRegistry> {
        &self.types
    }

    /// The document store.
    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    /// The query cache.
    pub fn cache(&self) -> &Arc<dyn Cache> {
        &self.cache
    }

    /// The side table of this session.
    pub fn side_table(&self) -> &SideTable {
        &self.side
    }

    /// Mutable access to the side table.
    pub fn side_table_mut(&mut self) -> &mut SideTable {
        &mut self.side
    }

    /// The identity map of this session.
    pub fn identity_map(&self) -> &IdentityMap {
        &self.identity
    }

    pub(crate) fn id_generator(&self) -> &dyn IdGenerator {
        self.id_generator.as_ref()
    }

    /// Registers a lifecycle hook for a class and its subclasses.
    ///
    /// # Errors
    ///
    /// Returns `UnknownClass` if the class is not registered.
    pub fn add_hook(&mut self, class: &str, hook: Arc<dyn LifecycleHook>) -> CoreResult<()> {
        self.metadata.get(class)?;
        self.hooks.entry(class.to_string()).or_default().push(hook);
        Ok(())
    }

    pub(crate) fn fire(&mut self, event: LifecycleEvent, document: EntityRef) -> CoreResult<()> {
        let class = self.state(document)?.class.name.clone();
        let hooks: Vec<Arc<dyn LifecycleHook>> = self
            .hooks
            .iter()
            .filter(|(registered, _)| self.metadata.is_a(&class, registered))
            .flat_map(|(_, hooks)| hooks.iter().cloned())
            .collect();
        for hook in hooks {
            trace!(?event, %document, class = class.as_str(), "lifecycle hook");
            hook.dispatch(event, self, document)?;
        }
        Ok(())
    }

    pub(crate) fn next_instance(&mut self) -> InstanceId {
        self.next_instance += 1;
        InstanceId::new(self.next_instance)
    }

    /// Creates an entity without applying defaults.
    pub(crate) fn allocate(&mut self, class: Arc<ClassMetadata>) -> EntityRef {
        let entity = EntityRef(self.next_instance());
        trace!(%entity, class = class.name.as_str(), "entity allocated");
        self.entities.insert(entity, EntityState::new(class));
        entity
    }

    /// Creates a new entity of a class, with field defaults applied.
    ///
    /// Defaults go through the tracked setter, so they count as
    /// modifications and are part of the first insert.
    ///
    /// # Errors
    ///
    /// Returns `UnknownClass` if the class is not registered.
    pub fn create(&mut self, class: &str) -> CoreResult<EntityRef> {
        let class = self.metadata.get(class)?;
        let defaults: Vec<(String, docmap_codec::Value)> = class
            .fields
            .iter()
            .filter_map(|f| f.default.clone().map(|d| (f.name.clone(), d)))
            .collect();
        let entity = self.allocate(class);
        for (name, value) in defaults {
            self.set_field(entity, &name, value)?;
        }
        Ok(entity)
    }

    pub(crate) fn state(&self, entity: EntityRef) -> CoreResult<&EntityState> {
        self.entities
            .get(&entity)
            .ok_or_else(|| CoreError::not_found(entity.to_string()))
    }

    pub(crate) fn state_mut(&mut self, entity: EntityRef) -> CoreResult<&mut EntityState> {
        self.entities
            .get_mut(&entity)
            .ok_or_else(|| CoreError::not_found(entity.to_string()))
    }

    pub(crate) fn group_state(&self, group: GroupRef) -> CoreResult<&GroupState> {
        self.groups
            .get(&group)
            .ok_or_else(|| CoreError::not_found(group.to_string()))
    }

    pub(crate) fn group_state_mut(&mut self, group: GroupRef) -> CoreResult<&mut GroupState> {
        self.groups
            .get_mut(&group)
            .ok_or_else(|| CoreError::not_found(group.to_string()))
    }

    /// Returns the state of a root document.
    pub(crate) fn document_state(&self, entity: EntityRef) -> CoreResult<&EntityState> {
        let state = self.state(entity)?;
        if state.is_document() {
            Ok(state)
        } else {
            Err(CoreError::invalid_argument(format!(
                "{entity} ({}) is not a root document",
                state.class.name
            )))
        }
    }

    /// Returns the state of an embedded document.
    pub(crate) fn embedded_state(&self, entity: EntityRef) -> CoreResult<&EntityState> {
        let state = self.state(entity)?;
        if state.is_document() {
            Err(CoreError::invalid_argument(format!(
                "{entity} ({}) is not an embedded document",
                state.class.name
            )))
        } else {
            Ok(state)
        }
    }

    /// Returns true if the handle designates a live entity.
    #[must_use]
    pub fn contains(&self, entity: EntityRef) -> bool {
        self.entities.contains_key(&entity)
    }

    /// Number of live entities.
    #[must_use]
    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    /// Class of an entity.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for a disposed handle.
    pub fn class_of(&self, entity: EntityRef) -> CoreResult<Arc<ClassMetadata>> {
        Ok(Arc::clone(&self.state(entity)?.class))
    }

    /// Returns true if the entity is a root document.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for a disposed handle.
    pub fn is_document(&self, entity: EntityRef) -> CoreResult<bool> {
        Ok(self.state(entity)?.is_document())
    }

    /// Drops an entity, its embedded children and its groups from the
    /// session, purging their side-table entries and identity map slot.
    ///
    /// Referenced documents are not disposed.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for a disposed handle.
    pub fn dispose(&mut self, entity: EntityRef) -> CoreResult<()> {
        let state = self
            .entities
            .remove(&entity)
            .ok_or_else(|| CoreError::not_found(entity.to_string()))?;
        self.side.remove_owner(entity);
        if let (Some(collection), Some(id)) = (&state.class.collection, state.id) {
            if self.identity.get(collection, id) == Some(entity) {
                self.identity.remove(collection, id);
            }
        }
        for child in state.embedded_children() {
            if self.contains(child) {
                self.dispose(child)?;
            }
        }
        for group in state.embeddeds_many.values() {
            if let Some(group_state) = self.groups.get(group) {
                let members: Vec<EntityRef> = group_state.members().collect();
                for member in members {
                    if self.contains(member) {
                        self.dispose(member)?;
                    }
                }
            }
        }
        for group in state.groups() {
            self.dispose_group(group);
        }
        trace!(%entity, "entity disposed");
        Ok(())
    }

    pub(crate) fn dispose_group(&mut self, group: GroupRef) {
        self.groups.remove(&group);
        self.side.remove_owner(group);
    }

    /// Drops every entity, group and side-table entry.
    pub fn clear(&mut self) {
        debug!(
            entities = self.entities.len(),
            groups = self.groups.len(),
            "session cleared"
        );
        self.entities.clear();
        self.groups.clear();
        self.side.clear();
        self.identity.clear();
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("config", &self.config)
            .field("entities", &self.entities.len())
            .field("groups", &self.groups.len())
            .field("identity_map", &self.identity.len())
            .field("side_table", &self.side)
            .finish_non_exhaustive()
    }
}
