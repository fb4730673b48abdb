use std::sync::Arc;

use crate::{Entity, EntityId};

/// A MIME type row; the broker seeds a handful of well-known ones on
/// startup (§4.4) and otherwise inserts on first use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MimeType {
    pub id: EntityId,
    pub name: Arc<str>,
}

impl Entity for MimeType {
    fn id(&self) -> EntityId {
        self.id
    }
}

/// A flag definition (e.g. `\Seen`, `\Flagged`). Flags are global, not
/// per-collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Flag {
    pub id: EntityId,
    pub name: Arc<str>,
}

impl Entity for Flag {
    fn id(&self) -> EntityId {
        self.id
    }
}

/// A resource registration (the owner of a subtree of collections).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resource {
    pub id: EntityId,
    pub name: Arc<str>,
    pub is_virtual: bool,
}

impl Entity for Resource {
    fn id(&self) -> EntityId {
        self.id
    }
}

/// A tag, identified by a globally unique `gid` independent of its
/// numeric id (so resources can reference a tag before it has been
/// assigned a local id).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tag {
    pub id: EntityId,
    pub gid: Arc<str>,
    pub tag_type: Arc<str>,
    pub parent_id: Option<EntityId>,
}

impl Entity for Tag {
    fn id(&self) -> EntityId {
        self.id
    }
}
