use std::collections::HashMap;
use std::sync::Arc;

use crate::{Entity, EntityId};

/// A collection's local part filter when `cache_policy.inherit` resolves
/// to something other than "keep everything" (§4.4 cache-policy
/// resolution).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalParts {
    All,
    Only(Arc<[Arc<str>]>),
}

/// Cache policy, either as configured on a single collection or as the
/// already-resolved effective value after walking the ancestor chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachePolicy {
    pub inherit: bool,
    /// Minutes between scheduled syncs, `-1` meaning "never".
    pub check_interval: i32,
    /// Minutes a cached payload stays valid, `-1` meaning "forever".
    pub cache_timeout: i32,
    pub sync_on_demand: bool,
    pub local_parts: LocalParts,
}

impl CachePolicy {
    /// System default used once no ancestor overrides inheritance
    /// (§4.4: interval=-1, timeout=-1, syncOnDemand=false, localParts=ALL).
    pub fn system_default() -> Self {
        Self {
            inherit: false,
            check_interval: -1,
            cache_timeout: -1,
            sync_on_demand: false,
            local_parts: LocalParts::All,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Collection {
    pub id: EntityId,
    pub name: Arc<str>,
    pub parent_id: Option<EntityId>,
    pub resource_id: EntityId,
    pub remote_id: Option<Arc<str>>,
    pub remote_revision: Option<Arc<str>>,
    pub is_virtual: bool,
    pub cache_policy: CachePolicy,
    pub attributes: Arc<HashMap<Arc<str>, Arc<[u8]>>>,
}

impl Entity for Collection {
    fn id(&self) -> EntityId {
        self.id
    }
}

impl Collection {
    pub fn attribute(&self, name: &str) -> Option<&[u8]> {
        self.attributes.get(name).map(|bytes| bytes.as_ref())
    }

    /// Returns a copy with one attribute added/replaced, reusing every
    /// other field by `Arc` clone rather than deep-copying the map.
    pub fn with_attribute(&self, name: Arc<str>, value: Arc<[u8]>) -> Self {
        let mut attributes = (*self.attributes).clone();
        attributes.insert(name, value);
        Self {
            attributes: Arc::new(attributes),
            ..self.clone()
        }
    }

    pub fn without_attribute(&self, name: &str) -> Self {
        let mut attributes = (*self.attributes).clone();
        attributes.remove(name);
        Self {
            attributes: Arc::new(attributes),
            ..self.clone()
        }
    }
}
