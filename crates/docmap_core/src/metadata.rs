//! Class metadata: the declared shape of documents and embedded documents.
//!
//! A class declares its fields, embedded slots and references. Document
//! classes map to a collection; embedded classes only ever live inside a
//! root document. Classes are registered once in a [`MetadataRegistry`],
//! which validates the whole model before a session uses it.

use crate::error::{CoreError, CoreResult};
use docmap_codec::{Map, Value};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

/// A declared scalar field.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldMeta {
    /// Name used by the entity API.
    pub name: String,
    /// Name of the key in stored records.
    pub db_name: String,
    /// Name of the type converter.
    pub type_name: String,
    /// Value assigned when an entity is created.
    pub default: Option<Value>,
}

impl FieldMeta {
    /// Declares a field stored under its own name.
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            db_name: name.clone(),
            name,
            type_name: type_name.into(),
            default: None,
        }
    }

    /// Stores the field under another key.
    #[must_use]
    pub fn db_name(mut self, db_name: impl Into<String>) -> Self {
        self.db_name = db_name.into();
        self
    }

    /// Sets the value assigned at creation.
    #[must_use]
    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }
}

/// A declared embedded slot (one or many).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbeddedMeta {
    /// Slot name, also the key in stored records.
    pub name: String,
    /// Class of the embedded documents.
    pub class: String,
}

/// A declared single reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceOneMeta {
    /// Relation name.
    pub name: String,
    /// Class of the referenced document.
    pub class: String,
    /// Raw field holding the referenced id.
    pub field: String,
}

/// Discriminator settings of a polymorphic reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Polymorphism {
    /// Key of the discriminator inside each stored element.
    pub discriminator_field: String,
    /// Discriminator value to class name. Without a map the discriminator
    /// value is the class name itself.
    pub discriminator_map: Option<BTreeMap<String, String>>,
}

impl Polymorphism {
    /// Resolves a discriminator value to a class name.
    #[must_use]
    pub fn class_for<'a>(&'a self, value: &'a str) -> &'a str {
        self.discriminator_map
            .as_ref()
            .and_then(|map| map.get(value))
            .map_or(value, String::as_str)
    }

    /// Returns the discriminator value stored for a class.
    #[must_use]
    pub fn value_for(&self, class: &str) -> String {
        self.discriminator_map
            .as_ref()
            .and_then(|map| map.iter().find(|(_, c)| c.as_str() == class))
            .map_or_else(|| class.to_string(), |(value, _)| value.clone())
    }
}

/// A declared reference to many documents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceManyMeta {
    /// Relation name.
    pub name: String,
    /// Class of the referenced documents (base class when polymorphic).
    pub class: String,
    /// Raw field holding the referenced ids.
    pub field: String,
    /// Set when elements carry a discriminator.
    pub polymorphism: Option<Polymorphism>,
}

/// Declared shape of one class.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassMetadata {
    /// Class name.
    pub name: String,
    /// Collection of a document class; `None` for embedded classes.
    pub collection: Option<String>,
    /// Scalar fields.
    pub fields: Vec<FieldMeta>,
    /// Single embedded slots.
    pub embeddeds_one: Vec<EmbeddedMeta>,
    /// Embedded groups.
    pub embeddeds_many: Vec<EmbeddedMeta>,
    /// Single references.
    pub references_one: Vec<ReferenceOneMeta>,
    /// Reference groups.
    pub references_many: Vec<ReferenceManyMeta>,
    /// Field identifying the concrete class in an inheritance tree.
    pub discriminator_field: Option<String>,
    /// Discriminator value of this class.
    pub discriminator_value: Option<String>,
    /// Parent class this class extends.
    pub parent: Option<String>,
}

impl ClassMetadata {
    fn blank(name: String, collection: Option<String>) -> Self {
        Self {
            name,
            collection,
            fields: Vec::new(),
            embeddeds_one: Vec::new(),
            embeddeds_many: Vec::new(),
            references_one: Vec::new(),
            references_many: Vec::new(),
            discriminator_field: None,
            discriminator_value: None,
            parent: None,
        }
    }

    /// Declares a document class stored in `collection`.
    pub fn document(name: impl Into<String>, collection: impl Into<String>) -> Self {
        Self::blank(name.into(), Some(collection.into()))
    }

    /// Declares an embedded class.
    pub fn embedded(name: impl Into<String>) -> Self {
        Self::blank(name.into(), None)
    }

    /// Adds a field stored under its own name.
    #[must_use]
    pub fn field(self, name: impl Into<String>, type_name: impl Into<String>) -> Self {
        self.field_with(FieldMeta::new(name, type_name))
    }

    /// Adds a fully described field.
    #[must_use]
    pub fn field_with(mut self, field: FieldMeta) -> Self {
        self.fields.push(field);
        self
    }

    /// Adds a single embedded slot.
    #[must_use]
    pub fn embedded_one(mut self, name: impl Into<String>, class: impl Into<String>) -> Self {
        self.embeddeds_one.push(EmbeddedMeta {
            name: name.into(),
            class: class.into(),
        });
        self
    }

    /// Adds an embedded group.
    #[must_use]
    pub fn embedded_many(mut self, name: impl Into<String>, class: impl Into<String>) -> Self {
        self.embeddeds_many.push(EmbeddedMeta {
            name: name.into(),
            class: class.into(),
        });
        self
    }

    /// Adds a single reference whose id is stored in `field`.
    #[must_use]
    pub fn reference_one(
        mut self,
        name: impl Into<String>,
        class: impl Into<String>,
        field: impl Into<String>,
    ) -> Self {
        self.references_one.push(ReferenceOneMeta {
            name: name.into(),
            class: class.into(),
            field: field.into(),
        });
        self
    }

    /// Adds a reference group whose ids are stored in `field`.
    #[must_use]
    pub fn reference_many(
        mut self,
        name: impl Into<String>,
        class: impl Into<String>,
        field: impl Into<String>,
    ) -> Self {
        self.references_many.push(ReferenceManyMeta {
            name: name.into(),
            class: class.into(),
            field: field.into(),
            polymorphism: None,
        });
        self
    }

    /// Adds a reference group whose elements carry a discriminator.
    #[must_use]
    pub fn polymorphic_reference_many(
        mut self,
        name: impl Into<String>,
        class: impl Into<String>,
        field: impl Into<String>,
        polymorphism: Polymorphism,
    ) -> Self {
        self.references_many.push(ReferenceManyMeta {
            name: name.into(),
            class: class.into(),
            field: field.into(),
            polymorphism: Some(polymorphism),
        });
        self
    }

    /// Makes this class the base of an inheritance tree keyed by `field`.
    #[must_use]
    pub fn discriminator(mut self, field: impl Into<String>) -> Self {
        self.discriminator_field = Some(field.into());
        self
    }

    /// Makes this class extend `parent`, identified by `value`.
    #[must_use]
    pub fn extends(mut self, parent: impl Into<String>, value: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self.discriminator_value = Some(value.into());
        self
    }

    /// Returns true for document classes.
    #[must_use]
    pub fn is_document(&self) -> bool {
        self.collection.is_some()
    }

    /// Collection of a document class.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` for embedded classes.
    pub fn collection_name(&self) -> CoreResult<&str> {
        self.collection.as_deref().ok_or_else(|| {
            CoreError::invalid_state(format!("{} is an embedded class", self.name))
        })
    }

    /// Looks up a field by name.
    #[must_use]
    pub fn field_meta(&self, name: &str) -> Option<&FieldMeta> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Looks up a single embedded slot.
    #[must_use]
    pub fn embedded_one_meta(&self, name: &str) -> Option<&EmbeddedMeta> {
        self.embeddeds_one.iter().find(|e| e.name == name)
    }

    /// Looks up an embedded group.
    #[must_use]
    pub fn embedded_many_meta(&self, name: &str) -> Option<&EmbeddedMeta> {
        self.embeddeds_many.iter().find(|e| e.name == name)
    }

    /// Looks up a single reference.
    #[must_use]
    pub fn reference_one_meta(&self, name: &str) -> Option<&ReferenceOneMeta> {
        self.references_one.iter().find(|r| r.name == name)
    }

    /// Looks up a reference group.
    #[must_use]
    pub fn reference_many_meta(&self, name: &str) -> Option<&ReferenceManyMeta> {
        self.references_many.iter().find(|r| r.name == name)
    }

    /// Returns true if `field` holds the raw value of a reference.
    #[must_use]
    pub fn is_reference_field(&self, field: &str) -> bool {
        self.references_one.iter().any(|r| r.field == field)
            || self.references_many.iter().any(|r| r.field == field)
    }

    fn member_names(&self) -> impl Iterator<Item = &str> {
        self.fields
            .iter()
            .map(|f| f.name.as_str())
            .chain(self.embeddeds_one.iter().map(|e| e.name.as_str()))
            .chain(self.embeddeds_many.iter().map(|e| e.name.as_str()))
            .chain(self.references_one.iter().map(|r| r.name.as_str()))
            .chain(self.references_many.iter().map(|r| r.name.as_str()))
    }

    fn check_unique_members(&self) -> CoreResult<()> {
        let mut seen = BTreeSet::new();
        for name in self.member_names() {
            if !seen.insert(name) {
                return Err(CoreError::invalid_argument(format!(
                    "{} declares {name} twice",
                    self.name
                )));
            }
        }
        let mut stored = BTreeSet::new();
        for field in &self.fields {
            if !stored.insert(field.db_name.as_str()) {
                return Err(CoreError::invalid_argument(format!(
                    "{} stores two fields under {}",
                    self.name, field.db_name
                )));
            }
        }
        Ok(())
    }

    /// Declares the raw fields of references that were not declared.
    fn add_reference_fields(&mut self) {
        let raw: Vec<String> = self
            .references_one
            .iter()
            .map(|r| r.field.clone())
            .chain(self.references_many.iter().map(|r| r.field.clone()))
            .collect();
        for field in raw {
            if self.field_meta(&field).is_none() {
                self.fields.push(FieldMeta::new(field, "raw"));
            }
        }
    }

    /// Prepends the members of `parent`.
    fn inherit_from(&mut self, parent: &ClassMetadata) {
        fn merge<T: Clone>(own: &mut Vec<T>, inherited: &[T]) {
            let mut merged = inherited.to_vec();
            merged.append(own);
            *own = merged;
        }
        merge(&mut self.fields, &parent.fields);
        merge(&mut self.embeddeds_one, &parent.embeddeds_one);
        merge(&mut self.embeddeds_many, &parent.embeddeds_many);
        merge(&mut self.references_one, &parent.references_one);
        merge(&mut self.references_many, &parent.references_many);
        self.discriminator_field.clone_from(&parent.discriminator_field);
    }
}

/// All registered classes.
#[derive(Debug, Default, Clone)]
pub struct MetadataRegistry {
    classes: BTreeMap<String, Arc<ClassMetadata>>,
    /// Base class name to discriminator value to class name.
    subclasses: HashMap<String, BTreeMap<String, String>>,
}

impl MetadataRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a class.
    ///
    /// A class that extends another inherits the parent's members, collection
    /// and discriminator field; the parent must be registered first.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyExists` for a duplicate class name, `UnknownClass`
    /// for a missing parent and `InvalidArgument` for malformed declarations.
    pub fn register(&mut self, mut class: ClassMetadata) -> CoreResult<()> {
        if self.classes.contains_key(&class.name) {
            return Err(CoreError::already_exists(format!("class {}", class.name)));
        }

        let mut ancestors = Vec::new();
        if let Some(parent_name) = class.parent.clone() {
            let parent = self.get(&parent_name)?;
            if parent.discriminator_field.is_none() {
                return Err(CoreError::invalid_argument(format!(
                    "{} extends {parent_name}, which declares no discriminator",
                    class.name
                )));
            }
            if parent.collection != class.collection {
                return Err(CoreError::invalid_argument(format!(
                    "{} must share the collection of {parent_name}",
                    class.name
                )));
            }
            class.inherit_from(&parent);

            let mut next = Some(parent);
            while let Some(ancestor) = next {
                next = ancestor
                    .parent
                    .as_deref()
                    .map(|name| self.get(name))
                    .transpose()?;
                ancestors.push(ancestor.name.clone());
            }
        }

        class.add_reference_fields();
        class.check_unique_members()?;

        if let Some(value) = &class.discriminator_value {
            for ancestor in &ancestors {
                let map = self.subclasses.entry(ancestor.clone()).or_default();
                if map.contains_key(value) {
                    return Err(CoreError::already_exists(format!(
                        "discriminator {value} below {ancestor}"
                    )));
                }
                map.insert(value.clone(), class.name.clone());
            }
        }

        self.classes.insert(class.name.clone(), Arc::new(class));
        Ok(())
    }

    /// Builder form of [`register`](Self::register).
    ///
    /// # Errors
    ///
    /// Same as [`register`](Self::register).
    pub fn with(mut self, class: ClassMetadata) -> CoreResult<Self> {
        self.register(class)?;
        Ok(self)
    }

    /// Looks up a class.
    ///
    /// # Errors
    ///
    /// Returns `UnknownClass` when the class is not registered.
    pub fn get(&self, name: &str) -> CoreResult<Arc<ClassMetadata>> {
        self.classes
            .get(name)
            .cloned()
            .ok_or_else(|| CoreError::unknown_class(name))
    }

    /// Returns true if the class is registered.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.classes.contains_key(name)
    }

    /// Registered class names, sorted.
    pub fn class_names(&self) -> impl Iterator<Item = &str> {
        self.classes.keys().map(String::as_str)
    }

    /// Resolves the concrete class of a raw record read as `base`.
    ///
    /// # Errors
    ///
    /// Returns `UnknownClass` if the discriminator names a missing class.
    pub fn resolve(&self, base: &Arc<ClassMetadata>, raw: &Map) -> CoreResult<Arc<ClassMetadata>> {
        let Some(field) = &base.discriminator_field else {
            return Ok(Arc::clone(base));
        };
        let value = raw.get(field).and_then(Value::as_text);
        match value
            .filter(|v| base.discriminator_value.as_deref() != Some(*v))
            .and_then(|v| self.subclasses.get(&base.name).and_then(|m| m.get(v)))
        {
            Some(class) => self.get(class),
            None => Ok(Arc::clone(base)),
        }
    }

    /// Returns true if `class` is `ancestor` or extends it.
    #[must_use]
    pub fn is_a(&self, class: &str, ancestor: &str) -> bool {
        let mut current = Some(class.to_string());
        while let Some(name) = current {
            if name == ancestor {
                return true;
            }
            current = self.classes.get(&name).and_then(|c| c.parent.clone());
        }
        false
    }

    /// Checks that every relation names a registered class of the right
    /// kind and that embedded classes never contain themselves.
    ///
    /// # Errors
    ///
    /// Returns `UnknownClass` or `InvalidArgument` describing the first
    /// problem found.
    pub fn validate(&self) -> CoreResult<()> {
        for class in self.classes.values() {
            for field in &class.fields {
                if field.name.is_empty() || field.db_name.contains('.') {
                    return Err(CoreError::invalid_argument(format!(
                        "{}: invalid field {:?}",
                        class.name, field.name
                    )));
                }
            }
            for embedded in class.embeddeds_one.iter().chain(&class.embeddeds_many) {
                if self.get(&embedded.class)?.is_document() {
                    return Err(CoreError::invalid_argument(format!(
                        "{}.{} embeds document class {}",
                        class.name, embedded.name, embedded.class
                    )));
                }
            }
            let referenced = class
                .references_one
                .iter()
                .map(|r| (&r.name, &r.class))
                .chain(class.references_many.iter().map(|r| (&r.name, &r.class)));
            for (name, target) in referenced {
                if !self.get(target)?.is_document() {
                    return Err(CoreError::invalid_argument(format!(
                        "{}.{name} references embedded class {target}",
                        class.name
                    )));
                }
            }
        }
        for name in self.classes.keys() {
            self.check_embedding_cycle(name, &mut Vec::new())?;
        }
        Ok(())
    }

    fn check_embedding_cycle(&self, name: &str, stack: &mut Vec<String>) -> CoreResult<()> {
        if stack.iter().any(|s| s == name) {
            stack.push(name.to_string());
            return Err(CoreError::invalid_argument(format!(
                "embedding cycle: {}",
                stack.join(" -> ")
            )));
        }
        let class = self.get(name)?;
        stack.push(name.to_string());
        for embedded in class.embeddeds_one.iter().chain(&class.embeddeds_many) {
            self.check_embedding_cycle(&embedded.class, stack)?;
        }
        stack.pop();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blog() -> MetadataRegistry {
        let mut registry = MetadataRegistry::new();
        registry
            .register(ClassMetadata::document("Author", "authors").field("name", "string"))
            .unwrap();
        registry
            .register(ClassMetadata::embedded("Comment").field("text", "string"))
            .unwrap();
        registry
            .register(
                ClassMetadata::document("Article", "articles")
                    .field("title", "string")
                    .embedded_many("comments", "Comment")
                    .reference_one("author", "Author", "author_id")
                    .discriminator("type"),
            )
            .unwrap();
        registry
    }

    #[test]
    fn lookup_and_reference_fields() {
        let registry = blog();
        let article = registry.get("Article").unwrap();
        assert!(article.is_document());
        assert_eq!(article.collection_name().unwrap(), "articles");
        let raw = article.field_meta("author_id").unwrap();
        assert_eq!(raw.type_name, "raw");
        assert!(article.is_reference_field("author_id"));
        assert!(registry.validate().is_ok());
    }

    #[test]
    fn unknown_class() {
        let registry = blog();
        assert!(matches!(
            registry.get("Missing"),
            Err(CoreError::UnknownClass { .. })
        ));
    }

    #[test]
    fn duplicate_class_rejected() {
        let mut registry = blog();
        let err = registry
            .register(ClassMetadata::embedded("Comment"))
            .unwrap_err();
        assert!(matches!(err, CoreError::AlreadyExists { .. }));
    }

    #[test]
    fn duplicate_member_rejected() {
        let mut registry = MetadataRegistry::new();
        let err = registry
            .register(
                ClassMetadata::embedded("Twice")
                    .field("a", "string")
                    .embedded_one("a", "Twice"),
            )
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidArgument { .. }));
    }

    #[test]
    fn subclass_inherits_and_resolves() {
        let mut registry = blog();
        registry
            .register(
                ClassMetadata::document("NewsArticle", "articles")
                    .extends("Article", "news")
                    .field("agency", "string"),
            )
            .unwrap();
        let news = registry.get("NewsArticle").unwrap();
        assert!(news.field_meta("title").is_some());
        assert!(news.field_meta("agency").is_some());
        assert_eq!(news.discriminator_field.as_deref(), Some("type"));

        let base = registry.get("Article").unwrap();
        let mut raw = Map::new();
        raw.insert("type".into(), Value::from("news"));
        assert_eq!(registry.resolve(&base, &raw).unwrap().name, "NewsArticle");
        raw.insert("type".into(), Value::from("other"));
        assert_eq!(registry.resolve(&base, &raw).unwrap().name, "Article");
        assert!(registry.is_a("NewsArticle", "Article"));
        assert!(!registry.is_a("Article", "NewsArticle"));
    }

    #[test]
    fn subclass_needs_discriminator_on_parent() {
        let mut registry = blog();
        let err = registry
            .register(ClassMetadata::document("Writer", "authors").extends("Author", "w"))
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidArgument { .. }));
    }

    #[test]
    fn embedding_cycle_detected() {
        let mut registry = MetadataRegistry::new();
        registry
            .register(ClassMetadata::embedded("A").embedded_one("b", "B"))
            .unwrap();
        registry
            .register(ClassMetadata::embedded("B").embedded_many("a", "A"))
            .unwrap();
        let err = registry.validate().unwrap_err();
        assert!(err.to_string().contains("cycle"));
    }

    #[test]
    fn embedding_a_document_is_rejected() {
        let mut registry = blog();
        registry
            .register(ClassMetadata::document("Bad", "bad").embedded_one("author", "Author"))
            .unwrap();
        assert!(matches!(
            registry.validate(),
            Err(CoreError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn polymorphism_lookups() {
        let poly = Polymorphism {
            discriminator_field: "type".into(),
            discriminator_map: Some(BTreeMap::from([
                ("a".to_string(), "Author".to_string()),
                ("c".to_string(), "Category".to_string()),
            ])),
        };
        assert_eq!(poly.class_for("a"), "Author");
        assert_eq!(poly.class_for("zzz"), "zzz");
        assert_eq!(poly.value_for("Category"), "c");

        let plain = Polymorphism {
            discriminator_field: "type".into(),
            discriminator_map: None,
        };
        assert_eq!(plain.class_for("Author"), "Author");
        assert_eq!(plain.value_for("Author"), "Author");
    }
}
