//! Core type definitions for docmap.

use std::fmt;

/// Identifier of a persisted root document.
pub type DocumentId = docmap_codec::ObjectId;

/// Handle of one in-memory instance (entity or group) inside a session.
///
/// Instance IDs are assigned at construction, monotonically increasing and
/// never reused within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct InstanceId(pub u64);

impl InstanceId {
    /// Creates a new instance ID.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw ID value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "inst:{}", self.0)
    }
}

/// Handle of an entity (root document or embedded document).
///
/// Two handles are equal exactly when they designate the same in-memory
/// instance; the identity map guarantees one handle per persisted id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntityRef(pub(crate) InstanceId);

impl EntityRef {
    /// Returns the underlying instance ID.
    #[must_use]
    pub const fn instance(self) -> InstanceId {
        self.0
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "entity:{}", self.0 .0)
    }
}

impl From<EntityRef> for InstanceId {
    fn from(entity: EntityRef) -> Self {
        entity.0
    }
}

/// Handle of a group of related entities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GroupRef(pub(crate) InstanceId);

impl GroupRef {
    /// Returns the underlying instance ID.
    #[must_use]
    pub const fn instance(self) -> InstanceId {
        self.0
    }
}

impl fmt::Display for GroupRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "group:{}", self.0 .0)
    }
}

impl From<GroupRef> for InstanceId {
    fn from(group: GroupRef) -> Self {
        group.0
    }
}

/// Position of an embedded document inside a root document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootAndPath {
    /// The root document.
    pub root: EntityRef,
    /// Dotted path from the root, e.g. `comments.0.author`.
    pub path: String,
}

impl RootAndPath {
    /// Creates a new root and path pair.
    pub fn new(root: EntityRef, path: impl Into<String>) -> Self {
        Self {
            root,
            path: path.into(),
        }
    }

    /// Returns the path of a child slot below this position.
    #[must_use]
    pub fn child(&self, name: &str) -> Self {
        Self {
            root: self.root,
            path: format!("{}.{name}", self.path),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instance_id_ordering() {
        assert!(InstanceId::new(1) < InstanceId::new(2));
    }

    #[test]
    fn handles_display() {
        let e = EntityRef(InstanceId::new(4));
        let g = GroupRef(InstanceId::new(5));
        assert_eq!(format!("{e}"), "entity:4");
        assert_eq!(format!("{g}"), "group:5");
        assert_eq!(format!("{}", InstanceId::from(g)), "inst:5");
    }

    #[test]
    fn root_and_path_child() {
        let rap = RootAndPath::new(EntityRef(InstanceId::new(1)), "comments.0");
        assert_eq!(rap.child("author").path, "comments.0.author");
    }
}
