//! Testable Property 4 (spec §8): for a single transaction producing
//! events E1..En, the post-commit emit order is all Adds (insertion
//! order), then all Removes (insertion order), then all Modifies
//! (insertion order); Add+Remove of the same entity cancels, Add+Modify
//! collapses to Add.

use std::collections::HashMap;
use std::sync::Arc;

use pimd_model::{CachePolicy, Collection, EntityId, Item};
use pimd_notify::{ChangeBus, ChangeEvent, CollectionChangeEntry, ItemChangeEntry, TransactionCollector};

use crate::support::{block_on, TckCase, TckSuite};

fn collection(id: EntityId, name: &str) -> Collection {
    Collection {
        id,
        name: Arc::from(name),
        parent_id: None,
        resource_id: 1,
        remote_id: None,
        remote_revision: None,
        is_virtual: false,
        cache_policy: CachePolicy::system_default(),
        attributes: Arc::new(HashMap::new()),
    }
}

fn item(id: EntityId, collection_id: EntityId) -> Item {
    Item {
        id,
        gid: None,
        remote_id: None,
        remote_revision: None,
        collection_id,
        mime_type: Arc::from("message/rfc822"),
        revision: 0,
        size: 0,
        dirty: false,
        atime: 0,
        flags: Arc::from(vec![]),
        tags: Arc::from(vec![]),
    }
}

async fn collect(run: impl FnOnce(&mut TransactionCollector)) -> Vec<ChangeEvent> {
    let bus = ChangeBus::new(64);
    let mut rx = bus.subscribe();
    let mut collector = TransactionCollector::new(bus);
    run(&mut collector);
    collector.commit();

    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn adds_then_removes_then_modifies_across_both_entity_kinds() {
    block_on(async {
        let events = collect(|collector| {
            collector.note_collection_added(collection(1, "added-collection"));
            collector.note_collection_changed(collection(2, "changed-collection"), vec![Arc::from("name")]);
            collector.note_collections_removed(vec![CollectionChangeEntry {
                id: 3,
                parent_id: None,
                resource: Arc::from("res"),
            }]);
            collector.note_item_added(item(10, 1));
            collector.note_item_changed(item(11, 1), vec![Arc::from("PLD:RFC822")]);
            collector.note_items_removed(vec![ItemChangeEntry {
                id: 12,
                collection_id: 1,
                mime_type: Arc::from("message/rfc822"),
                resource: Arc::from("res"),
            }]);
        })
        .await;

        let kinds: Vec<&'static str> = events
            .iter()
            .map(|event| match event {
                ChangeEvent::CollectionAdded(_) => "collection_added",
                ChangeEvent::CollectionsRemoved(_) => "collections_removed",
                ChangeEvent::CollectionChanged { .. } => "collection_changed",
                ChangeEvent::ItemAdded(_) => "item_added",
                ChangeEvent::ItemsRemoved(_) => "items_removed",
                ChangeEvent::ItemChanged { .. } => "item_changed",
                ChangeEvent::ItemsFlagsChanged { .. } => "items_flags_changed",
                ChangeEvent::TransactionCommitted => "transaction_committed",
                ChangeEvent::TransactionRolledBack => "transaction_rolled_back",
            })
            .collect();

        assert_eq!(
            kinds,
            vec![
                "collection_added",
                "collections_removed",
                "collection_changed",
                "item_added",
                "items_removed",
                "item_changed",
                "transaction_committed",
            ],
            "collections must fully emit (added, removed, changed) before any item event, \
             and within each entity kind the order must be added, removed, changed"
        );
    });
}

fn add_then_remove_of_the_same_collection_cancels() {
    block_on(async {
        let events = collect(|collector| {
            collector.note_collection_added(collection(5, "ephemeral"));
            collector.note_collections_removed(vec![CollectionChangeEntry {
                id: 5,
                parent_id: None,
                resource: Arc::from("res"),
            }]);
        })
        .await;

        // The added entry is suppressed because id 5 is also removed in
        // this transaction; only the removal and the commit marker
        // survive.
        assert!(!events.iter().any(|e| matches!(e, ChangeEvent::CollectionAdded(c) if c.id == 5)));
        assert!(events.iter().any(|e| matches!(e, ChangeEvent::CollectionsRemoved(entries) if entries.iter().any(|e| e.id == 5))));
    });
}

fn add_then_modify_of_the_same_item_collapses_to_add() {
    block_on(async {
        let events = collect(|collector| {
            let created = item(20, 1);
            collector.note_item_added(created.clone());
            collector.note_item_changed(created, vec![Arc::from("PLD:RFC822")]);
        })
        .await;

        let item_events: Vec<&ChangeEvent> = events
            .iter()
            .filter(|e| matches!(e, ChangeEvent::ItemAdded(_) | ChangeEvent::ItemChanged { .. }))
            .collect();
        assert_eq!(item_events.len(), 1, "add+modify of the same item must collapse to a single event");
        assert!(matches!(item_events[0], ChangeEvent::ItemAdded(_)));
    });
}

fn rollback_emits_only_the_rollback_marker() {
    block_on(async {
        let bus = ChangeBus::new(16);
        let mut rx = bus.subscribe();
        let mut collector = TransactionCollector::new(bus);
        collector.note_item_added(item(30, 1));
        collector.note_collection_added(collection(31, "discarded"));
        collector.rollback();

        let first = rx.recv().await.unwrap();
        assert!(matches!(first, ChangeEvent::TransactionRolledBack));
        assert!(rx.try_recv().is_err(), "nothing else should have been emitted on rollback");
    });
}

const CASES: &[TckCase] = &[
    TckCase {
        name: "adds_then_removes_then_modifies_across_both_entity_kinds",
        test: adds_then_removes_then_modifies_across_both_entity_kinds,
    },
    TckCase {
        name: "add_then_remove_of_the_same_collection_cancels",
        test: add_then_remove_of_the_same_collection_cancels,
    },
    TckCase {
        name: "add_then_modify_of_the_same_item_collapses_to_add",
        test: add_then_modify_of_the_same_item_collapses_to_add,
    },
    TckCase {
        name: "rollback_emits_only_the_rollback_marker",
        test: rollback_emits_only_the_rollback_marker,
    },
];

static SUITE: TckSuite = TckSuite {
    name: "notification_ordering",
    cases: CASES,
};

pub fn suite() -> &'static TckSuite {
    &SUITE
}
