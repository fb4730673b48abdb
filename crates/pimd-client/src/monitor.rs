//! Client monitor (§4.10, C10): subscription state, the three bounded
//! entity caches, notification compression and the ref/purge buffer for
//! monitored collections.
//!
//! The subscription shape mirrors
//! `pimd_server::subscription::Subscription` (the server's own
//! half of the same state, kept in sync by the same `Subscribe`/
//! `ModifySubscription` commands) but lives here independently since a
//! client binary has no business depending on the broker's connection
//! handler crate.

use std::collections::{HashMap, HashSet, VecDeque};

use pimd_model::{Collection, EntityId, Item, Tag};
use pimd_notify::ChangeEvent;

use crate::cache::BoundedCache;

/// Purge-buffer capacity (§4.10 "MAXBUFFERSIZE=10").
pub const MAX_PURGE_BUFFER: usize = 10;

/// Default capacity for each of the monitor's three entity caches. Not
/// spec-mandated; chosen generously enough that a typical single-window
/// UI rarely evicts an item it is still displaying.
pub const DEFAULT_CACHE_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MonitorSignal {
    ItemAdded,
    ItemChanged,
    ItemsRemoved,
    ItemsFlagsChanged,
    CollectionAdded,
    CollectionChanged,
    CollectionsRemoved,
    CollectionStatisticsChanged,
}

fn signal_for(event: &ChangeEvent) -> Option<MonitorSignal> {
    match event {
        ChangeEvent::ItemAdded(_) => Some(MonitorSignal::ItemAdded),
        ChangeEvent::ItemChanged { .. } => Some(MonitorSignal::ItemChanged),
        ChangeEvent::ItemsRemoved(_) => Some(MonitorSignal::ItemsRemoved),
        ChangeEvent::ItemsFlagsChanged { .. } => Some(MonitorSignal::ItemsFlagsChanged),
        ChangeEvent::CollectionAdded(_) => Some(MonitorSignal::CollectionAdded),
        ChangeEvent::CollectionChanged { .. } => Some(MonitorSignal::CollectionChanged),
        ChangeEvent::CollectionsRemoved(_) => Some(MonitorSignal::CollectionsRemoved),
        ChangeEvent::TransactionCommitted | ChangeEvent::TransactionRolledBack => None,
    }
}

/// The subscription half the monitor owns client-side (§4.10 first
/// paragraph).
#[derive(Debug, Clone, Default)]
pub struct MonitorSubscription {
    pub all_monitored: bool,
    pub exclusive: bool,
    pub collections: HashSet<EntityId>,
    pub items: HashSet<EntityId>,
    pub tags: HashSet<EntityId>,
    pub resources: HashSet<Box<str>>,
    pub mime_types: HashSet<Box<str>>,
    pub ignored_sessions: HashSet<Box<str>>,
    /// Set by any `set*` edit, cleared by [`Monitor::flush_subscription_if_dirty`]
    /// (§4.10 "arm a 0-ms timer so a burst ... results in a single
    /// `ModifySubscription` command").
    dirty: bool,
}

impl MonitorSubscription {
    fn matches_collection(&self, collection_id: EntityId) -> bool {
        self.all_monitored || self.collections.contains(&collection_id)
    }

    fn matches_item(&self, collection_id: EntityId, tag_ids: &[EntityId]) -> bool {
        self.all_monitored
            || self.collections.contains(&collection_id)
            || tag_ids.iter().any(|id| self.tags.contains(id))
    }

    fn matches(&self, event: &ChangeEvent) -> bool {
        match event {
            ChangeEvent::ItemAdded(item) => self.matches_item(item.collection_id, &item.tags),
            ChangeEvent::ItemChanged { item, .. } => self.matches_item(item.collection_id, &item.tags),
            ChangeEvent::ItemsRemoved(entries) => entries.iter().any(|e| self.matches_collection(e.collection_id)),
            ChangeEvent::ItemsFlagsChanged { items, .. } => {
                self.all_monitored || items.iter().any(|id| self.items.contains(id))
            }
            ChangeEvent::CollectionAdded(c) => self.matches_collection(c.id),
            ChangeEvent::CollectionChanged { collection, .. } => self.matches_collection(collection.id),
            ChangeEvent::CollectionsRemoved(entries) => entries.iter().any(|e| self.matches_collection(e.id)),
            ChangeEvent::TransactionCommitted | ChangeEvent::TransactionRolledBack => false,
        }
    }
}

pub struct Monitor {
    pub subscription: MonitorSubscription,
    item_cache: BoundedCache<EntityId, Item>,
    collection_cache: BoundedCache<EntityId, Collection>,
    tag_cache: BoundedCache<EntityId, Tag>,
    pending: VecDeque<ChangeEvent>,
    listeners: HashMap<MonitorSignal, usize>,
    refcounts: HashMap<EntityId, usize>,
    purge_buffer: VecDeque<EntityId>,
    /// Collection ids with a pending statistics change, flushed as a
    /// batch every 500ms (§4.10 "statistics compression") rather than
    /// carried through the generic compression pipeline, which only
    /// understands the `ChangeEvent` variants the server actually emits.
    pending_stats: HashSet<EntityId>,
}

impl Monitor {
    pub fn new() -> Self {
        Self {
            subscription: MonitorSubscription::default(),
            item_cache: BoundedCache::new(DEFAULT_CACHE_CAPACITY),
            collection_cache: BoundedCache::new(DEFAULT_CACHE_CAPACITY),
            tag_cache: BoundedCache::new(DEFAULT_CACHE_CAPACITY),
            pending: VecDeque::new(),
            listeners: HashMap::new(),
            refcounts: HashMap::new(),
            purge_buffer: VecDeque::new(),
            pending_stats: HashSet::new(),
        }
    }

    pub fn listen(&mut self, signal: MonitorSignal) {
        *self.listeners.entry(signal).or_insert(0) += 1;
    }

    pub fn unlisten(&mut self, signal: MonitorSignal) {
        if let Some(count) = self.listeners.get_mut(&signal) {
            *count = count.saturating_sub(1);
        }
    }

    pub fn listener_count(&self, signal: MonitorSignal) -> usize {
        self.listeners.get(&signal).copied().unwrap_or(0)
    }

    fn mark_dirty(&mut self) {
        self.subscription.dirty = true;
    }

    pub fn set_collection_monitored(&mut self, collection_id: EntityId, monitored: bool) {
        if monitored {
            self.subscription.collections.insert(collection_id);
        } else {
            self.subscription.collections.remove(&collection_id);
        }
        self.mark_dirty();
    }

    pub fn is_subscription_dirty(&self) -> bool {
        self.subscription.dirty
    }

    /// Called once the 0-ms coalescing timer fires; returns whether a
    /// `ModifySubscription` command should actually be sent.
    pub fn flush_subscription_if_dirty(&mut self) -> bool {
        let was_dirty = self.subscription.dirty;
        self.subscription.dirty = false;
        was_dirty
    }

    /// §4.10 incoming-notification pipeline, steps 1 and 4: lazy-ignore
    /// filter, then push onto the pending FIFO with compression against
    /// the most recent compatible entry.
    pub fn handle_event(&mut self, event: ChangeEvent) {
        if matches!(event, ChangeEvent::TransactionCommitted | ChangeEvent::TransactionRolledBack) {
            return;
        }

        let Some(signal) = signal_for(&event) else { return };
        if self.listener_count(signal) == 0 {
            return;
        }
        if !self.subscription.matches(&event) {
            return;
        }
        if self.refcount_filters_out(&event) {
            return;
        }

        self.push_compressed(event);
    }

    /// §4.10 step 1, second clause: drop events for collections that are
    /// neither ref'd nor sitting in the purge buffer, when refcounting is
    /// in use (i.e. at least one `ref()` call has ever been made).
    fn refcount_filters_out(&self, event: &ChangeEvent) -> bool {
        if self.refcounts.is_empty() && self.purge_buffer.is_empty() {
            return false;
        }
        let collection_id = match event {
            ChangeEvent::CollectionChanged { collection, .. } => Some(collection.id),
            ChangeEvent::CollectionAdded(c) => Some(c.id),
            _ => None,
        };
        match collection_id {
            Some(id) => !self.refcounts.contains_key(&id) && !self.purge_buffer.contains(&id),
            None => false,
        }
    }

    fn push_compressed(&mut self, event: ChangeEvent) {
        match &event {
            ChangeEvent::ItemsRemoved(removed) => {
                let removed_ids: HashSet<EntityId> = removed.iter().map(|e| e.id).collect();
                self.pending.retain(|pending| !matches!(pending, ChangeEvent::ItemAdded(item) if removed_ids.contains(&item.id)));
            }
            ChangeEvent::ItemChanged { item, .. } => {
                if self.pending.iter().any(|pending| matches!(pending, ChangeEvent::ItemAdded(added) if added.id == item.id)) {
                    return;
                }
            }
            ChangeEvent::ItemsFlagsChanged { items, added, removed } => {
                if let Some(pos) = self.pending.iter().position(|pending| {
                    matches!(pending, ChangeEvent::ItemsFlagsChanged { items: existing, .. } if same_item_set(existing, items))
                }) {
                    if let ChangeEvent::ItemsFlagsChanged { added: a1, removed: r1, .. } = self.pending.remove(pos).expect("position just found") {
                        let merged_added = union_minus(&a1, added, removed);
                        let merged_removed = union_minus(&r1, removed, added);
                        self.pending.push_back(ChangeEvent::ItemsFlagsChanged {
                            items: items.clone(),
                            added: merged_added,
                            removed: merged_removed,
                        });
                        return;
                    }
                }
            }
            _ => {}
        }
        self.pending.push_back(event);
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// §4.10 step 5-6: pops the oldest pending notification if its
    /// referenced entities are all cache-resident, warming the cache from
    /// `fetched` (a stand-in for the fetch a real client would issue
    /// through [`crate::session::Session`]) when they are not yet known.
    pub fn pop_ready(&mut self) -> Option<ChangeEvent> {
        let event = self.pending.pop_front()?;
        match &event {
            ChangeEvent::ItemAdded(item) | ChangeEvent::ItemChanged { item, .. } => {
                self.item_cache.insert(item.id, item.clone());
            }
            ChangeEvent::CollectionAdded(c) | ChangeEvent::CollectionChanged { collection: c, .. } => {
                self.collection_cache.insert(c.id, c.clone());
            }
            _ => {}
        }
        Some(event)
    }

    pub fn cache_item(&mut self, item: Item) {
        self.item_cache.insert(item.id, item);
    }

    pub fn cache_collection(&mut self, collection: Collection) {
        self.collection_cache.insert(collection.id, collection);
    }

    pub fn cache_tag(&mut self, tag: Tag) {
        self.tag_cache.insert(tag.id, tag);
    }

    pub fn cached_item(&mut self, id: EntityId) -> Option<&Item> {
        self.item_cache.get(&id)
    }

    pub fn cached_collection(&mut self, id: EntityId) -> Option<&Collection> {
        self.collection_cache.get(&id)
    }

    pub fn cached_tag(&mut self, id: EntityId) -> Option<&Tag> {
        self.tag_cache.get(&id)
    }

    /// §4.10 "ref-counting and purge buffer": pins a collection.
    pub fn reference(&mut self, collection_id: EntityId) {
        *self.refcounts.entry(collection_id).or_insert(0) += 1;
        self.purge_buffer.retain(|id| *id != collection_id);
    }

    /// Releases a pin; on reaching zero the collection moves to the purge
    /// buffer, deduplicated on insert, evicting the oldest entry once the
    /// buffer exceeds [`MAX_PURGE_BUFFER`].
    pub fn dereference(&mut self, collection_id: EntityId) {
        let remaining = match self.refcounts.get_mut(&collection_id) {
            Some(count) => {
                *count = count.saturating_sub(1);
                *count
            }
            None => return,
        };
        if remaining > 0 {
            return;
        }
        self.refcounts.remove(&collection_id);
        self.purge_buffer.retain(|id| *id != collection_id);
        self.purge_buffer.push_back(collection_id);
        if self.purge_buffer.len() > MAX_PURGE_BUFFER {
            if let Some(evicted) = self.purge_buffer.pop_front() {
                self.collection_cache.remove(&evicted);
            }
        }
    }

    pub fn is_referenced(&self, collection_id: EntityId) -> bool {
        self.refcounts.contains_key(&collection_id)
    }

    /// §4.10 "statistics compression": coalesces into a set, flushed as
    /// one signal per collection on the caller's 500ms tick.
    pub fn note_statistics_changed(&mut self, collection_id: EntityId) {
        self.pending_stats.insert(collection_id);
    }

    pub fn flush_statistics(&mut self) -> Vec<EntityId> {
        self.pending_stats.drain().collect()
    }
}

impl Default for Monitor {
    fn default() -> Self {
        Self::new()
    }
}

fn same_item_set(a: &[EntityId], b: &[EntityId]) -> bool {
    let mut a_sorted = a.to_vec();
    let mut b_sorted = b.to_vec();
    a_sorted.sort_unstable();
    b_sorted.sort_unstable();
    a_sorted == b_sorted
}

/// `(set1 ∪ set2) \ subtract`, preserving `set1`'s order then any new
/// entries from `set2` (§8 Testable Property 7).
fn union_minus(set1: &[std::sync::Arc<str>], set2: &[std::sync::Arc<str>], subtract: &[std::sync::Arc<str>]) -> Vec<std::sync::Arc<str>> {
    let mut result: Vec<std::sync::Arc<str>> = Vec::new();
    for flag in set1.iter().chain(set2.iter()) {
        if !subtract.contains(flag) && !result.contains(flag) {
            result.push(flag.clone());
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use pimd_notify::ItemChangeEntry;
    use std::sync::Arc;

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

    #[test]
    fn no_listener_means_event_is_dropped() {
        let mut monitor = Monitor::new();
        monitor.subscription.all_monitored = true;
        monitor.handle_event(ChangeEvent::ItemAdded(sample_item(1, 10)));
        assert_eq!(monitor.pending_len(), 0);
    }

    #[test]
    fn matching_subscription_with_a_listener_is_queued() {
        let mut monitor = Monitor::new();
        monitor.subscription.all_monitored = true;
        monitor.listen(MonitorSignal::ItemAdded);
        monitor.handle_event(ChangeEvent::ItemAdded(sample_item(1, 10)));
        assert_eq!(monitor.pending_len(), 1);
    }

    #[test]
    fn add_then_remove_cancels() {
        let mut monitor = Monitor::new();
        monitor.subscription.all_monitored = true;
        monitor.listen(MonitorSignal::ItemAdded);
        monitor.listen(MonitorSignal::ItemsRemoved);

        monitor.handle_event(ChangeEvent::ItemAdded(sample_item(1, 10)));
        monitor.handle_event(ChangeEvent::ItemsRemoved(vec![ItemChangeEntry {
            id: 1,
            collection_id: 10,
            mime_type: Arc::from("message/rfc822"),
            resource: Arc::from("res"),
        }]));

        assert_eq!(monitor.pending_len(), 1);
        assert!(matches!(monitor.pop_ready(), Some(ChangeEvent::ItemsRemoved(_))));
    }

    #[test]
    fn add_then_modify_collapses_to_add() {
        let mut monitor = Monitor::new();
        monitor.subscription.all_monitored = true;
        monitor.listen(MonitorSignal::ItemAdded);
        monitor.listen(MonitorSignal::ItemChanged);

        let item = sample_item(1, 10);
        monitor.handle_event(ChangeEvent::ItemAdded(item.clone()));
        monitor.handle_event(ChangeEvent::ItemChanged { item, changed_parts: vec![] });

        assert_eq!(monitor.pending_len(), 1);
        assert!(matches!(monitor.pop_ready(), Some(ChangeEvent::ItemAdded(_))));
    }

    #[test]
    fn two_flag_changes_on_the_same_items_compress_by_union_minus_intersection() {
        let mut monitor = Monitor::new();
        monitor.subscription.all_monitored = true;
        monitor.listen(MonitorSignal::ItemsFlagsChanged);

        let seen: Arc<str> = Arc::from("\\Seen");
        let flagged: Arc<str> = Arc::from("\\Flagged");
        let answered: Arc<str> = Arc::from("\\Answered");

        monitor.handle_event(ChangeEvent::ItemsFlagsChanged {
            items: vec![1, 2],
            added: vec![seen.clone(), flagged.clone()],
            removed: vec![],
        });
        monitor.handle_event(ChangeEvent::ItemsFlagsChanged {
            items: vec![1, 2],
            added: vec![answered.clone()],
            removed: vec![flagged.clone()],
        });

        assert_eq!(monitor.pending_len(), 1);
        match monitor.pop_ready() {
            Some(ChangeEvent::ItemsFlagsChanged { added, removed, .. }) => {
                assert_eq!(added, vec![seen, answered]);
                assert_eq!(removed, vec![flagged]);
            }
            other => panic!("expected a compressed ItemsFlagsChanged, got {other:?}"),
        }
    }

    #[test]
    fn purge_buffer_evicts_oldest_past_capacity() {
        let mut monitor = Monitor::new();
        for id in 1..=(MAX_PURGE_BUFFER as EntityId + 1) {
            monitor.reference(id);
            monitor.dereference(id);
        }
        assert!(!monitor.is_referenced(1));
        assert_eq!(monitor.purge_buffer.len(), MAX_PURGE_BUFFER);
        assert!(!monitor.purge_buffer.contains(&1));
    }

    #[test]
    fn rereferencing_removes_from_purge_buffer() {
        let mut monitor = Monitor::new();
        monitor.reference(1);
        monitor.dereference(1);
        assert!(monitor.purge_buffer.contains(&1));
        monitor.reference(1);
        assert!(!monitor.purge_buffer.contains(&1));
    }
}
