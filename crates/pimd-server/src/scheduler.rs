//! Collection maintenance scheduler (§4.8, C8): an ordered deadline -> set
//! of collections map, with coalescing of nearby wake-ups and a clamped
//! minimum per-collection interval.
//!
//! Modeled as a plain data structure rather than a timer-driven object, per
//! Design Notes §9's direction to replace signal/slot event loops with
//! explicit state machines: the caller owns the `tokio::time::Sleep` (or
//! whatever drives wall-clock time) and calls [`CollectionScheduler::pop_due`]
//! when it fires. This keeps the coalescing/ordering logic fully
//! unit-testable without a runtime.

use std::collections::BTreeMap;
use std::time::Duration;

use pimd_model::EntityId;

/// Minimum spacing the scheduler enforces between two checks of the same
/// collection, regardless of what `collection_schedule_interval` asks for.
const MIN_INTERVAL: Duration = Duration::from_secs(5 * 60);
/// Window within which a newly scheduled deadline snaps to an existing one
/// instead of creating a second near-simultaneous wake-up (§4.8).
const COALESCE_WINDOW: Duration = Duration::from_secs(60);

/// A monotonic instant, expressed as nanoseconds since some epoch the
/// caller defines. Kept as a bare integer (rather than `std::time::Instant`)
/// so the scheduler's ordering logic is deterministic and testable without
/// a wall clock.
pub type Deadline = u64;

#[derive(Debug, Default)]
pub struct CollectionScheduler {
    /// Deadline -> collections due at that instant. A `BTreeMap` keeps the
    /// earliest deadline at the front in O(log n), matching the "ordered
    /// multi-map" shape of §4.8.
    entries: BTreeMap<Deadline, Vec<EntityId>>,
    /// Reverse index so re-scheduling or dropping a collection doesn't
    /// require a linear scan of every bucket.
    scheduled_at: std::collections::HashMap<EntityId, Deadline>,
    inhibited: bool,
}

impl CollectionScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clamps a subclass-provided interval to the scheduler's floor
    /// (§4.8: "clamps this to a minimum interval, default 5 minutes").
    pub fn clamp_interval(interval: Duration) -> Duration {
        interval.max(MIN_INTERVAL)
    }

    /// Schedules (or reschedules) `collection` for `proposed` nanoseconds
    /// from the scheduler's reference point, snapping to an existing
    /// nearby deadline if one is within [`COALESCE_WINDOW`].
    pub fn schedule(&mut self, collection: EntityId, proposed: Deadline) {
        self.drop_collection(collection);

        let window = COALESCE_WINDOW.as_nanos() as u64;
        let snap_target = self
            .entries
            .range(proposed.saturating_sub(window)..=proposed.saturating_add(window))
            .map(|(deadline, _)| *deadline)
            .min_by_key(|deadline| deadline.abs_diff(proposed));

        let deadline = snap_target.unwrap_or(proposed);
        self.entries.entry(deadline).or_default().push(collection);
        self.scheduled_at.insert(collection, deadline);
    }

    /// Drops `collection` from whatever bucket it currently occupies, if
    /// any. Used both for removal and as the first step of a reschedule.
    pub fn drop_collection(&mut self, collection: EntityId) {
        if let Some(deadline) = self.scheduled_at.remove(&collection) {
            if let Some(bucket) = self.entries.get_mut(&deadline) {
                bucket.retain(|id| *id != collection);
                if bucket.is_empty() {
                    self.entries.remove(&deadline);
                }
            }
        }
    }

    /// The earliest deadline with anything scheduled, or `None` if empty
    /// or globally inhibited.
    pub fn next_deadline(&self) -> Option<Deadline> {
        if self.inhibited {
            return None;
        }
        self.entries.keys().next().copied()
    }

    /// Pops every collection sharing the earliest deadline (§4.8 "pop all
    /// entries sharing the earliest deadline"). Returns an empty vec if
    /// there is nothing due or the scheduler is inhibited.
    pub fn pop_due(&mut self) -> Vec<EntityId> {
        if self.inhibited {
            return Vec::new();
        }
        let Some((&deadline, _)) = self.entries.iter().next() else {
            return Vec::new();
        };
        let due = self.entries.remove(&deadline).unwrap_or_default();
        for id in &due {
            self.scheduled_at.remove(id);
        }
        due
    }

    pub fn inhibit(&mut self) {
        self.inhibited = true;
    }

    pub fn uninhibit(&mut self) {
        self.inhibited = false;
    }

    pub fn is_inhibited(&self) -> bool {
        self.inhibited
    }

    pub fn len(&self) -> usize {
        self.scheduled_at.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scheduled_at.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nearby_deadlines_coalesce_to_the_existing_one() {
        let mut scheduler = CollectionScheduler::new();
        let one_second = Duration::from_secs(1).as_nanos() as u64;
        scheduler.schedule(1, 1_000_000_000);
        scheduler.schedule(2, 1_000_000_000 + one_second);
        assert_eq!(scheduler.len(), 2);
        assert_eq!(scheduler.next_deadline(), Some(1_000_000_000));
        let due = scheduler.pop_due();
        assert_eq!(due.len(), 2);
    }

    #[test]
    fn far_apart_deadlines_stay_separate() {
        let mut scheduler = CollectionScheduler::new();
        scheduler.schedule(1, 0);
        scheduler.schedule(2, COALESCE_WINDOW.as_nanos() as u64 * 10);
        assert_eq!(scheduler.pop_due(), vec![1]);
        assert_eq!(scheduler.pop_due(), vec![2]);
    }

    #[test]
    fn rescheduling_moves_a_collection_to_its_new_bucket() {
        let mut scheduler = CollectionScheduler::new();
        scheduler.schedule(1, 0);
        scheduler.schedule(1, 10_000_000_000);
        assert_eq!(scheduler.next_deadline(), Some(10_000_000_000));
        assert_eq!(scheduler.len(), 1);
    }

    #[test]
    fn dropping_the_head_advances_to_the_next_deadline() {
        let mut scheduler = CollectionScheduler::new();
        scheduler.schedule(1, 0);
        scheduler.schedule(2, COALESCE_WINDOW.as_nanos() as u64 * 10);
        scheduler.drop_collection(1);
        assert_eq!(scheduler.next_deadline(), Some(COALESCE_WINDOW.as_nanos() as u64 * 10));
    }

    #[test]
    fn inhibited_scheduler_reports_no_due_work() {
        let mut scheduler = CollectionScheduler::new();
        scheduler.schedule(1, 0);
        scheduler.inhibit();
        assert_eq!(scheduler.next_deadline(), None);
        assert!(scheduler.pop_due().is_empty());
        scheduler.uninhibit();
        assert_eq!(scheduler.pop_due(), vec![1]);
    }

    #[test]
    fn clamp_interval_enforces_the_floor() {
        assert_eq!(CollectionScheduler::clamp_interval(Duration::from_secs(1)), MIN_INTERVAL);
        let ten_minutes = Duration::from_secs(600);
        assert_eq!(CollectionScheduler::clamp_interval(ten_minutes), ten_minutes);
    }
}
