use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;

use crate::EntityId;

/// Process-wide, opt-in cache keyed by both id and name, the shape §4.2
/// prescribes for `MimeType`, `Flag`, `Tag`, `Resource` and `Collection`.
/// Disabled by default; the storage engine's startup sequence enables it
/// once schema initialization has completed, and the notification
/// collector invalidates entries as change notifications are emitted.
pub struct EntityCache<T: Clone> {
    enabled: AtomicBool,
    by_id: DashMap<EntityId, T>,
    id_by_name: DashMap<Arc<str>, EntityId>,
}

impl<T: Clone> Default for EntityCache<T> {
    fn default() -> Self {
        Self {
            enabled: AtomicBool::new(false),
            by_id: DashMap::new(),
            id_by_name: DashMap::new(),
        }
    }
}

impl<T: Clone> EntityCache<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enable(&self) {
        self.enabled.store(true, Ordering::Release);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub fn insert(&self, id: EntityId, name: Arc<str>, value: T) {
        if !self.is_enabled() {
            return;
        }
        self.id_by_name.insert(name, id);
        self.by_id.insert(id, value);
    }

    pub fn get_by_id(&self, id: EntityId) -> Option<T> {
        if !self.is_enabled() {
            return None;
        }
        self.by_id.get(&id).map(|entry| entry.clone())
    }

    pub fn get_by_name(&self, name: &str) -> Option<T> {
        if !self.is_enabled() {
            return None;
        }
        let id = *self.id_by_name.get(name)?;
        self.get_by_id(id)
    }

    /// Drops both the id and name entries for `id`, if present.
    pub fn invalidate(&self, id: EntityId) {
        self.by_id.remove(&id);
        self.id_by_name.retain(|_, mapped_id| *mapped_id != id);
    }

    pub fn clear(&self) {
        self.by_id.clear();
        self.id_by_name.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_cache_never_returns_hits() {
        let cache: EntityCache<i32> = EntityCache::new();
        cache.insert(1, Arc::from("text/plain"), 42);
        assert_eq!(cache.get_by_id(1), None);
        assert_eq!(cache.get_by_name("text/plain"), None);
    }

    #[test]
    fn enabled_cache_serves_both_lookup_paths() {
        let cache: EntityCache<i32> = EntityCache::new();
        cache.enable();
        cache.insert(1, Arc::from("text/plain"), 42);
        assert_eq!(cache.get_by_id(1), Some(42));
        assert_eq!(cache.get_by_name("text/plain"), Some(42));
    }

    #[test]
    fn invalidate_removes_both_indices() {
        let cache: EntityCache<i32> = EntityCache::new();
        cache.enable();
        cache.insert(1, Arc::from("text/plain"), 42);
        cache.invalidate(1);
        assert_eq!(cache.get_by_id(1), None);
        assert_eq!(cache.get_by_name("text/plain"), None);
    }
}
