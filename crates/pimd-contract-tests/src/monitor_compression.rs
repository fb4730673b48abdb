//! Testable Property 7 (spec §8): for any sequence of change events
//! queued between two `pop_ready` drains, the compressed output equals
//! applying Add+Remove-cancels and Add+Modify-collapses-to-Add, and two
//! `ItemsFlagsChanged` entries on the same item set merge their added/
//! removed sets via `(set1 ∪ set2) \ subtract` (§8 scenario S7).

use std::sync::Arc;

use pimd_model::{EntityId, Item};
use pimd_notify::{ChangeEvent, ItemChangeEntry};

use pimd_client::{Monitor, MonitorSignal};

use crate::support::{TckCase, TckSuite};

fn sample_item(id: EntityId, collection_id: EntityId) -> Item {
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

fn an_unlistened_signal_never_reaches_the_pending_queue() {
    let mut monitor = Monitor::new();
    monitor.subscription.all_monitored = true;
    // No `listen()` call at all: the lazy-ignore filter must drop the
    // event before it is ever considered for compression.
    monitor.handle_event(ChangeEvent::ItemAdded(sample_item(1, 10)));
    assert_eq!(monitor.pending_len(), 0);
}

fn a_refcounted_but_unreferenced_collection_is_dropped_once_refcounting_is_in_use() {
    let mut monitor = Monitor::new();
    monitor.subscription.all_monitored = true;
    monitor.listen(MonitorSignal::CollectionChanged);

    // Once any `reference()` call has ever been made, collections that
    // are neither ref'd nor sitting in the purge buffer are filtered out.
    monitor.reference(99);
    monitor.dereference(99);

    let untouched = pimd_model::Collection {
        id: 5,
        name: Arc::from("untouched"),
        parent_id: None,
        resource_id: 1,
        remote_id: None,
        remote_revision: None,
        is_virtual: false,
        cache_policy: pimd_model::CachePolicy::system_default(),
        attributes: Arc::new(std::collections::HashMap::new()),
    };
    monitor.handle_event(ChangeEvent::CollectionChanged {
        collection: untouched,
        changed_attributes: vec![],
    });
    assert_eq!(monitor.pending_len(), 0, "a collection outside the refcount/purge-buffer set must be dropped");
}

fn add_then_remove_of_the_same_item_cancels_leaving_only_the_removal() {
    let mut monitor = Monitor::new();
    monitor.subscription.all_monitored = true;
    monitor.listen(MonitorSignal::ItemAdded);
    monitor.listen(MonitorSignal::ItemsRemoved);

    monitor.handle_event(ChangeEvent::ItemAdded(sample_item(7, 10)));
    monitor.handle_event(ChangeEvent::ItemsRemoved(vec![ItemChangeEntry {
        id: 7,
        collection_id: 10,
        mime_type: Arc::from("message/rfc822"),
        resource: Arc::from("res"),
    }]));

    assert_eq!(monitor.pending_len(), 1);
    assert!(matches!(monitor.pop_ready(), Some(ChangeEvent::ItemsRemoved(entries)) if entries.len() == 1));
}

fn add_then_modify_of_the_same_item_collapses_to_a_single_add() {
    let mut monitor = Monitor::new();
    monitor.subscription.all_monitored = true;
    monitor.listen(MonitorSignal::ItemAdded);
    monitor.listen(MonitorSignal::ItemChanged);

    let item = sample_item(8, 10);
    monitor.handle_event(ChangeEvent::ItemAdded(item.clone()));
    monitor.handle_event(ChangeEvent::ItemChanged { item, changed_parts: vec![Arc::from("PLD:RFC822")] });

    assert_eq!(monitor.pending_len(), 1);
    assert!(matches!(monitor.pop_ready(), Some(ChangeEvent::ItemAdded(_))));
}

fn three_consecutive_flag_changes_merge_into_one_union_minus_result() {
    let mut monitor = Monitor::new();
    monitor.subscription.all_monitored = true;
    monitor.listen(MonitorSignal::ItemsFlagsChanged);

    let seen: Arc<str> = Arc::from("\\Seen");
    let flagged: Arc<str> = Arc::from("\\Flagged");
    let answered: Arc<str> = Arc::from("\\Answered");
    let draft: Arc<str> = Arc::from("\\Draft");

    monitor.handle_event(ChangeEvent::ItemsFlagsChanged {
        items: vec![1, 2],
        added: vec![seen.clone()],
        removed: vec![],
    });
    monitor.handle_event(ChangeEvent::ItemsFlagsChanged {
        items: vec![1, 2],
        added: vec![flagged.clone()],
        removed: vec![],
    });
    monitor.handle_event(ChangeEvent::ItemsFlagsChanged {
        items: vec![1, 2],
        added: vec![answered.clone()],
        removed: vec![seen.clone(), draft],
    });

    assert_eq!(monitor.pending_len(), 1, "three compatible flag-change events on the same item set must stay compressed to one");
    match monitor.pop_ready() {
        Some(ChangeEvent::ItemsFlagsChanged { added, removed, .. }) => {
            assert_eq!(added, vec![flagged, answered], "Seen was added then removed within the run and must not survive");
            assert!(removed.is_empty(), "Draft was only ever removed, never added, so it drops out of the subtraction entirely");
        }
        other => panic!("expected a compressed ItemsFlagsChanged, got {other:?}"),
    }
}

fn flag_changes_on_disjoint_item_sets_do_not_merge() {
    let mut monitor = Monitor::new();
    monitor.subscription.all_monitored = true;
    monitor.listen(MonitorSignal::ItemsFlagsChanged);

    let seen: Arc<str> = Arc::from("\\Seen");
    monitor.handle_event(ChangeEvent::ItemsFlagsChanged {
        items: vec![1, 2],
        added: vec![seen.clone()],
        removed: vec![],
    });
    monitor.handle_event(ChangeEvent::ItemsFlagsChanged {
        items: vec![3, 4],
        added: vec![seen],
        removed: vec![],
    });

    assert_eq!(monitor.pending_len(), 2, "flag changes on a disjoint item set must not be merged together");
}

const CASES: &[TckCase] = &[
    TckCase {
        name: "an_unlistened_signal_never_reaches_the_pending_queue",
        test: an_unlistened_signal_never_reaches_the_pending_queue,
    },
    TckCase {
        name: "a_refcounted_but_unreferenced_collection_is_dropped_once_refcounting_is_in_use",
        test: a_refcounted_but_unreferenced_collection_is_dropped_once_refcounting_is_in_use,
    },
    TckCase {
        name: "add_then_remove_of_the_same_item_cancels_leaving_only_the_removal",
        test: add_then_remove_of_the_same_item_cancels_leaving_only_the_removal,
    },
    TckCase {
        name: "add_then_modify_of_the_same_item_collapses_to_a_single_add",
        test: add_then_modify_of_the_same_item_collapses_to_a_single_add,
    },
    TckCase {
        name: "three_consecutive_flag_changes_merge_into_one_union_minus_result",
        test: three_consecutive_flag_changes_merge_into_one_union_minus_result,
    },
    TckCase {
        name: "flag_changes_on_disjoint_item_sets_do_not_merge",
        test: flag_changes_on_disjoint_item_sets_do_not_merge,
    },
];

static SUITE: TckSuite = TckSuite {
    name: "monitor_compression",
    cases: CASES,
};

pub fn suite() -> &'static TckSuite {
    &SUITE
}
