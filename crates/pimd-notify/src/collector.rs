use std::sync::Arc;

use pimd_model::{Collection, EntityId, Item};

use crate::bus::ChangeBus;
use crate::event::{ChangeEvent, CollectionChangeEntry, ItemChangeEntry};

#[derive(Default)]
struct PendingItems {
    added: Vec<Item>,
    changed: Vec<(Item, Vec<Arc<str>>)>,
    removed: Vec<ItemChangeEntry>,
    flags_changed: Vec<(Vec<EntityId>, Vec<Arc<str>>, Vec<Arc<str>>)>,
}

#[derive(Default)]
struct PendingCollections {
    added: Vec<Collection>,
    changed: Vec<(Collection, Vec<Arc<str>>)>,
    removed: Vec<CollectionChangeEntry>,
}

/// Accumulates added/changed/removed entries for the lifetime of one open
/// transaction (§4.5). A fresh collector should be created per
/// transaction; dropping one without calling [`Self::commit`] or
/// [`Self::rollback`] simply discards everything, matching "on rollback,
/// clear all lists, emit nothing".
pub struct TransactionCollector {
    bus: ChangeBus,
    items: PendingItems,
    collections: PendingCollections,
}

impl TransactionCollector {
    pub fn new(bus: ChangeBus) -> Self {
        Self {
            bus,
            items: PendingItems::default(),
            collections: PendingCollections::default(),
        }
    }

    pub fn note_item_added(&mut self, item: Item) {
        self.items.added.push(item);
    }

    pub fn note_item_changed(&mut self, item: Item, changed_parts: Vec<Arc<str>>) {
        self.items.changed.push((item, changed_parts));
    }

    pub fn note_items_removed(&mut self, entries: Vec<ItemChangeEntry>) {
        self.items.removed.extend(entries);
    }

    pub fn note_items_flags_changed(&mut self, items: Vec<EntityId>, added: Vec<Arc<str>>, removed: Vec<Arc<str>>) {
        self.items.flags_changed.push((items, added, removed));
    }

    pub fn note_collection_added(&mut self, collection: Collection) {
        self.collections.added.push(collection);
    }

    pub fn note_collection_changed(&mut self, collection: Collection, changed_attributes: Vec<Arc<str>>) {
        self.collections.changed.push((collection, changed_attributes));
    }

    pub fn note_collections_removed(&mut self, entries: Vec<CollectionChangeEntry>) {
        self.collections.removed.extend(entries);
    }

    /// Applies the four-step emission order from §4.5: added, then
    /// removed (dropping any changed entry for a removed id, and any
    /// added entry for an id also removed in the same transaction), then
    /// the remaining changed entries — collections before items.
    pub fn commit(mut self) {
        let removed_collection_ids: Vec<EntityId> =
            self.collections.removed.iter().map(|entry| entry.id).collect();
        self.collections
            .added
            .retain(|collection| !removed_collection_ids.contains(&collection.id));
        for collection in std::mem::take(&mut self.collections.added) {
            let id = collection.id;
            self.bus.publish(ChangeEvent::CollectionAdded(collection));
            self.collections.changed.retain(|(c, _)| c.id != id);
        }
        if !self.collections.removed.is_empty() {
            for id in &removed_collection_ids {
                self.collections.changed.retain(|(c, _)| c.id != *id);
            }
            self.bus
                .publish(ChangeEvent::CollectionsRemoved(std::mem::take(&mut self.collections.removed)));
        }
        for (collection, changed_attributes) in std::mem::take(&mut self.collections.changed) {
            self.bus.publish(ChangeEvent::CollectionChanged {
                collection,
                changed_attributes,
            });
        }

        let removed_item_ids: Vec<EntityId> = self.items.removed.iter().map(|entry| entry.id).collect();
        self.items.added.retain(|item| !removed_item_ids.contains(&item.id));
        for item in std::mem::take(&mut self.items.added) {
            let id = item.id;
            self.bus.publish(ChangeEvent::ItemAdded(item));
            self.items.changed.retain(|(i, _)| i.id != id);
        }
        if !self.items.removed.is_empty() {
            for id in &removed_item_ids {
                self.items.changed.retain(|(i, _)| i.id != *id);
            }
            self.bus
                .publish(ChangeEvent::ItemsRemoved(std::mem::take(&mut self.items.removed)));
        }
        for (item, changed_parts) in std::mem::take(&mut self.items.changed) {
            self.bus.publish(ChangeEvent::ItemChanged { item, changed_parts });
        }
        for (items, added, removed) in std::mem::take(&mut self.items.flags_changed) {
            self.bus
                .publish(ChangeEvent::ItemsFlagsChanged { items, added, removed });
        }

        self.bus.publish(ChangeEvent::TransactionCommitted);
    }

    pub fn rollback(self) {
        self.bus.publish(ChangeEvent::TransactionRolledBack);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use pimd_model::CachePolicy;

    fn sample_collection(id: EntityId) -> Collection {
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

    #[tokio::test]
    async fn added_then_changed_coalesces_to_added_only() {
        let bus = ChangeBus::new(16);
        let mut rx = bus.subscribe();
        let mut collector = TransactionCollector::new(bus);

        let collection = sample_collection(1);
        collector.note_collection_added(collection.clone());
        collector.note_collection_changed(collection, vec![Arc::from("name")]);
        collector.commit();

        let first = rx.recv().await.unwrap();
        assert!(matches!(first, ChangeEvent::CollectionAdded(c) if c.id == 1));
        let second = rx.recv().await.unwrap();
        assert!(matches!(second, ChangeEvent::TransactionCommitted));
    }

    #[tokio::test]
    async fn rollback_emits_nothing_but_the_rollback_marker() {
        let bus = ChangeBus::new(16);
        let mut rx = bus.subscribe();
        let mut collector = TransactionCollector::new(bus);
        collector.note_collection_added(sample_collection(1));
        collector.rollback();

        let event = rx.recv().await.unwrap();
        assert!(matches!(event, ChangeEvent::TransactionRolledBack));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn changed_entry_for_a_removed_collection_is_dropped() {
        let bus = ChangeBus::new(16);
        let mut rx = bus.subscribe();
        let mut collector = TransactionCollector::new(bus);
        let collection = sample_collection(2);
        collector.note_collection_changed(collection, vec![Arc::from("name")]);
        collector.note_collections_removed(vec![CollectionChangeEntry {
            id: 2,
            parent_id: None,
            resource: Arc::from("res"),
        }]);
        collector.commit();

        let first = rx.recv().await.unwrap();
        assert!(matches!(first, ChangeEvent::CollectionsRemoved(_)));
        let second = rx.recv().await.unwrap();
        assert!(matches!(second, ChangeEvent::TransactionCommitted));
    }
}
