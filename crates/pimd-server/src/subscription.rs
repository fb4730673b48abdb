//! The connection handler's own side of a client's `Subscribe`/
//! `ModifySubscription` state (§4.10's subscription shape, server end):
//! which notifications a connection should actually be forwarded, kept in
//! sync by `SubscriptionCreate`/`SubscriptionModify` and
//! `CollectionSubscribe`/`CollectionUnsubscribe`.

use std::collections::HashSet;

use pimd_model::EntityId;
use pimd_notify::ChangeEvent;

/// What changed, reduced to the handful of things a subscription filter
/// actually needs: an affected collection (direct, or an item's owning
/// collection) and whether it was a collection- or item-level event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EventKind {
    Item,
    Collection,
}

#[derive(Debug, Clone, Default)]
pub struct Subscription {
    pub all_monitored: bool,
    pub exclusive: bool,
    pub collections: HashSet<EntityId>,
    pub items: HashSet<EntityId>,
    pub tags: HashSet<EntityId>,
    pub resources: HashSet<Box<str>>,
    pub mime_types: HashSet<Box<str>>,
    pub ignored_sessions: HashSet<Box<str>>,
}

impl Subscription {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe_collection(&mut self, collection_id: EntityId) {
        self.collections.insert(collection_id);
    }

    pub fn unsubscribe_collection(&mut self, collection_id: EntityId) {
        self.collections.remove(&collection_id);
    }

    /// Whether `event` should be forwarded to this connection as an
    /// untagged notification. A freshly created subscription (the
    /// zero-value default: nothing monitored, not `all`) matches nothing,
    /// mirroring "no client listener connected" from §4.10 step 1.
    pub fn matches(&self, event: &ChangeEvent) -> bool {
        if self.all_monitored {
            return true;
        }
        match event {
            ChangeEvent::ItemAdded(item) => self.matches_item(item.collection_id, &item.tags),
            ChangeEvent::ItemChanged { item, .. } => self.matches_item(item.collection_id, &item.tags),
            ChangeEvent::ItemsRemoved(entries) => entries.iter().any(|e| self.collections.contains(&e.collection_id)),
            ChangeEvent::ItemsFlagsChanged { items, .. } => items.iter().any(|id| self.items.contains(id)),
            ChangeEvent::CollectionAdded(collection) => self.matches_collection(collection.id),
            ChangeEvent::CollectionChanged { collection, .. } => self.matches_collection(collection.id),
            ChangeEvent::CollectionsRemoved(entries) => entries.iter().any(|e| self.matches_collection(e.id)),
            ChangeEvent::TransactionCommitted | ChangeEvent::TransactionRolledBack => false,
        }
    }

    fn matches_item(&self, collection_id: EntityId, tag_ids: &[EntityId]) -> bool {
        self.collections.contains(&collection_id) || tag_ids.iter().any(|id| self.tags.contains(id))
    }

    fn matches_collection(&self, collection_id: EntityId) -> bool {
        self.collections.contains(&collection_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pimd_model::{CachePolicy, Collection};
    use std::collections::HashMap;
    use std::sync::Arc;

    fn collection(id: EntityId) -> Collection {
        Collection {
            id,
            name: Arc::from("inbox"),
            parent_id: None,
            resource_id: 1,
            remote_id: None,
            remote_revision: None,
            is_virtual: false,
            cache_policy: CachePolicy::system_default(),
            attributes: Arc::new(HashMap::new()),
        }
    }

    #[test]
    fn fresh_subscription_matches_nothing() {
        let sub = Subscription::new();
        assert!(!sub.matches(&ChangeEvent::CollectionAdded(collection(1))));
    }

    #[test]
    fn subscribing_a_collection_matches_its_events() {
        let mut sub = Subscription::new();
        sub.subscribe_collection(5);
        assert!(sub.matches(&ChangeEvent::CollectionAdded(collection(5))));
        assert!(!sub.matches(&ChangeEvent::CollectionAdded(collection(6))));
    }

    #[test]
    fn all_monitored_matches_everything() {
        let mut sub = Subscription::new();
        sub.all_monitored = true;
        assert!(sub.matches(&ChangeEvent::CollectionAdded(collection(99))));
        assert!(sub.matches(&ChangeEvent::TransactionCommitted) == false);
    }

    #[test]
    fn unsubscribing_drops_future_matches() {
        let mut sub = Subscription::new();
        sub.subscribe_collection(5);
        sub.unsubscribe_collection(5);
        assert!(!sub.matches(&ChangeEvent::CollectionAdded(collection(5))));
    }
}
