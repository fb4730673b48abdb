use std::sync::Arc;

use crate::{Entity, EntityId};

/// Payload location: inline rows carry the bytes directly, externalized
/// rows only carry the filename under the data root (§4.7).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PartData {
    Inline(Arc<[u8]>),
    External { filename: Arc<str> },
}

impl PartData {
    pub fn len(&self) -> Option<usize> {
        match self {
            PartData::Inline(bytes) => Some(bytes.len()),
            PartData::External { .. } => None,
        }
    }

    pub fn is_external(&self) -> bool {
        matches!(self, PartData::External { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Part {
    pub id: EntityId,
    pub item_id: EntityId,
    pub name: Arc<str>,
    pub data: PartData,
    pub size: u64,
    pub revision: u32,
}

impl Entity for Part {
    fn id(&self) -> EntityId {
        self.id
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item {
    pub id: EntityId,
    /// Merge discriminator used by the synchronizer in preference to
    /// `remote_id` when configured and nonempty (§4.11).
    pub gid: Option<Arc<str>>,
    pub remote_id: Option<Arc<str>>,
    pub remote_revision: Option<Arc<str>>,
    pub collection_id: EntityId,
    pub mime_type: Arc<str>,
    pub revision: u32,
    pub size: u64,
    /// Set when the item was created from the client side and has not
    /// yet been confirmed by its owning resource (§4.4 `appendPimItem`).
    pub dirty: bool,
    pub atime: i64,
    pub flags: Arc<[Arc<str>]>,
    pub tags: Arc<[EntityId]>,
}

impl Entity for Item {
    fn id(&self) -> EntityId {
        self.id
    }
}

impl Item {
    pub fn has_flag(&self, flag: &str) -> bool {
        self.flags.iter().any(|f| f.as_ref() == flag)
    }

    /// The synchronizer's merge key: GID when present, else remote id.
    pub fn merge_key(&self) -> Option<&str> {
        self.gid
            .as_deref()
            .or(self.remote_id.as_deref())
            .filter(|key| !key.is_empty())
    }
}
