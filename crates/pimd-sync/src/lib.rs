//! Item synchronizer (§4.11, C11): reconciles a remote item set delivered
//! by a resource agent against a collection, using batched create-or-merge
//! plus a bulk delete for anything the remote side no longer has.
//!
//! The synchronizer is a small pull-based state machine rather than a
//! signal emitter: callers push remote items in with [`ItemSynchronizer::deliver_items`]
//! and drain queued [`SyncEvent`]s with [`ItemSynchronizer::drain_events`],
//! which keeps it testable without a running event loop — the same
//! "build a state machine, don't call back into the caller" adjustment
//! Design Notes §9 asks for everywhere signals/slots show up in the
//! extract.

mod error;

use std::collections::VecDeque;
use std::sync::Arc;

use pimd_model::EntityId;
use pimd_storage::{DataStore, NewItem, NewPart};
use tracing::{instrument, warn};

pub use error::SyncError;

/// How the remote item set was delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    /// The caller delivers the *entire* remote set; anything local with a
    /// remote id absent from the delivered set is deleted once delivery
    /// completes.
    Full,
    /// The caller delivers only what changed plus an explicit removal
    /// list; no local listing is performed.
    Incremental,
}

/// Transaction grouping policy for batches (§4.11).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionPolicy {
    /// One transaction per batch (the default): a batch either commits in
    /// full or rolls back in full, and the next batch only starts once
    /// the previous one has committed.
    Multiple,
    /// A single transaction spans the entire sync; nothing commits until
    /// [`ItemSynchronizer::delivery_done`] succeeds.
    Single,
    /// No transaction wrapping at all; each store call runs in
    /// autocommit mode. Fastest, least safe against partial failure.
    None,
}

/// One item as delivered by the resource agent, before it is known
/// whether it matches an existing local item.
#[derive(Debug, Clone)]
pub struct RemoteItem {
    pub remote_id: Option<Arc<str>>,
    pub gid: Option<Arc<str>>,
    pub remote_revision: Option<Arc<str>>,
    pub mime_type: Arc<str>,
    pub parts: Vec<(Arc<str>, Vec<u8>)>,
}

impl RemoteItem {
    fn merge_key(&self) -> (Option<&str>, Option<&str>) {
        (self.gid.as_deref(), self.remote_id.as_deref())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SyncOutcome {
    pub created: usize,
    pub merged: usize,
    pub removed: usize,
    pub skipped: usize,
}

/// Events the synchronizer surfaces for the caller to relay upward (to a
/// job's `result`/progress signals in the client, or to log lines in a
/// resource-side driver).
#[derive(Debug, Clone)]
pub enum SyncEvent {
    /// A batch committed; `processed` is the running total across the
    /// whole sync so far.
    TransactionCommitted { processed: usize },
    /// The pending queue has drained below the batch size in streaming
    /// mode — the caller may request more items from its remote source.
    ReadyForNextBatch(usize),
    /// Terminal: the synchronizer will not accept further items after
    /// this is emitted.
    Result { outcome: SyncOutcome, error: Option<SyncError> },
}

pub struct ItemSyncOptions {
    pub batch_size: usize,
    pub transaction_policy: TransactionPolicy,
    /// When set, [`ItemSynchronizer::delivery_done`] must be called
    /// explicitly even if `total_items_hint` is reached (streaming mode).
    pub disable_automatic_delivery_done: bool,
    /// Caller-declared total item count; once `delivered == total` and
    /// `disable_automatic_delivery_done` is false, delivery completes
    /// automatically (§4.11).
    pub total_items_hint: Option<usize>,
}

impl Default for ItemSyncOptions {
    fn default() -> Self {
        Self {
            batch_size: 10,
            transaction_policy: TransactionPolicy::Multiple,
            disable_automatic_delivery_done: false,
            total_items_hint: None,
        }
    }
}

pub struct ItemSynchronizer {
    store: Arc<DataStore>,
    collection_id: EntityId,
    mode: SyncMode,
    options: ItemSyncOptions,
    queue: VecDeque<RemoteItem>,
    removals: Vec<RemoteItem>,
    /// Remote ids seen across the whole delivery, used by full sync to
    /// find local items the remote side no longer reports.
    seen_remote_ids: std::collections::HashSet<Arc<str>>,
    delivered: usize,
    processed: usize,
    created_count: usize,
    merged_count: usize,
    removed_count: usize,
    skipped_count: usize,
    done: bool,
    finished: bool,
    first_error: Option<SyncError>,
    events: VecDeque<SyncEvent>,
    single_tx_open: bool,
}

impl ItemSynchronizer {
    pub fn new(store: Arc<DataStore>, collection_id: EntityId, mode: SyncMode, options: ItemSyncOptions) -> Self {
        Self {
            store,
            collection_id,
            mode,
            options,
            queue: VecDeque::new(),
            removals: Vec::new(),
            seen_remote_ids: std::collections::HashSet::new(),
            delivered: 0,
            processed: 0,
            created_count: 0,
            merged_count: 0,
            removed_count: 0,
            skipped_count: 0,
            done: false,
            finished: false,
            first_error: None,
            events: VecDeque::new(),
            single_tx_open: false,
        }
    }

    pub fn drain_events(&mut self) -> Vec<SyncEvent> {
        self.events.drain(..).collect()
    }

    /// Adds a batch of added/changed remote items to the pending queue and
    /// processes as many full batches as are now available. Items with no
    /// remote id are skipped with a warning (§4.11): without a remote id
    /// there is nothing to merge against and a blind insert would create
    /// an unmergeable duplicate on the next sync.
    #[instrument(skip(self, items))]
    pub async fn deliver_items(&mut self, items: Vec<RemoteItem>) {
        if self.finished {
            return;
        }
        for item in items {
            if item.remote_id.as_deref().map(|s| s.is_empty()).unwrap_or(true) && item.gid.is_none() {
                warn!("remote item delivered without a remote id or gid, skipping");
                self.skipped_count += 1;
                continue;
            }
            if let Some(remote_id) = item.remote_id.clone() {
                self.seen_remote_ids.insert(remote_id);
            }
            self.delivered += 1;
            self.queue.push_back(item);
        }
        if !self.options.disable_automatic_delivery_done {
            if let Some(total) = self.options.total_items_hint {
                if self.delivered >= total {
                    self.done = true;
                }
            }
        }
        self.drain_ready_batches().await;
    }

    /// Feeds the explicit removal list for incremental sync (§4.11).
    pub fn deliver_removals(&mut self, items: Vec<RemoteItem>) {
        if self.finished {
            return;
        }
        self.removals.extend(items);
    }

    /// Must be called explicitly in streaming mode once the caller has no
    /// more items to deliver; flushes whatever remains even if smaller
    /// than one batch.
    #[instrument(skip(self))]
    pub async fn delivery_done(&mut self) {
        if self.finished {
            return;
        }
        self.done = true;
        self.drain_ready_batches().await;
        self.finalize().await;
    }

    /// Idempotent cancellation: sets the error to [`SyncError::UserCanceled`],
    /// marks delivery done, and flushes straight to `Result` without
    /// processing whatever remains in the queue.
    #[instrument(skip(self))]
    pub async fn rollback(&mut self) {
        if self.finished {
            return;
        }
        if self.single_tx_open {
            let _ = self.store.driver().rollback_transaction().await;
            self.single_tx_open = false;
        }
        self.first_error.get_or_insert(SyncError::UserCanceled);
        self.queue.clear();
        self.done = true;
        self.emit_result();
    }

    async fn drain_ready_batches(&mut self) {
        if self.first_error.is_some() {
            return;
        }
        while self.queue.len() >= self.options.batch_size {
            if !self.process_one_batch().await {
                return;
            }
        }
        if self.queue.len() < self.options.batch_size {
            self.events.push_back(SyncEvent::ReadyForNextBatch(self.options.batch_size - self.queue.len()));
        }
        if self.done && self.first_error.is_none() {
            self.finalize().await;
        }
    }

    async fn finalize(&mut self) {
        if self.finished || self.first_error.is_some() {
            if !self.finished {
                self.emit_result();
            }
            return;
        }
        // Flush the final partial batch, then apply the two deletion
        // sources: the explicit incremental removal list, and (Full mode
        // only) whatever local item still has a remote id absent from the
        // delivered set.
        while !self.queue.is_empty() {
            if !self.process_one_batch().await {
                return;
            }
        }
        if let Err(err) = self.apply_removals().await {
            self.first_error = Some(err);
            self.emit_result();
            return;
        }
        if self.single_tx_open {
            if let Err(err) = self.store.driver().commit_transaction().await {
                self.first_error = Some(SyncError::Storage(err.to_string()));
            }
            self.single_tx_open = false;
        }
        self.emit_result();
    }

    /// Processes one batch (or the whole remaining queue if it is smaller
    /// than `batch_size` and delivery is done). Returns `false` if an
    /// error stopped processing.
    async fn process_one_batch(&mut self) -> bool {
        let take = self.options.batch_size.min(self.queue.len());
        if take == 0 {
            return true;
        }
        let batch: Vec<RemoteItem> = self.queue.drain(..take).collect();

        let use_batch_transaction = matches!(self.options.transaction_policy, TransactionPolicy::Multiple);
        if matches!(self.options.transaction_policy, TransactionPolicy::Single) && !self.single_tx_open {
            if let Err(err) = self.store.driver().begin_transaction().await {
                self.first_error = Some(SyncError::Storage(err.to_string()));
                self.events.push_back(SyncEvent::Result {
                    outcome: SyncOutcome::default(),
                    error: self.first_error.clone(),
                });
                self.finished = true;
                return false;
            }
            self.single_tx_open = true;
        }
        if use_batch_transaction {
            if let Err(err) = self.store.driver().begin_transaction().await {
                self.first_error = Some(SyncError::Storage(err.to_string()));
                self.emit_result();
                return false;
            }
        }

        let mut collector = self.store.new_collector();
        let mut outcome = SyncOutcome::default();
        let mut batch_error = None;
        for item in &batch {
            match self.reconcile_one(&mut collector, item).await {
                Ok(Reconciled::Created) => outcome.created += 1,
                Ok(Reconciled::Merged) => outcome.merged += 1,
                Err(err) => {
                    batch_error = Some(err);
                    break;
                }
            }
        }

        if let Some(err) = batch_error {
            if use_batch_transaction {
                collector.rollback();
                let _ = self.store.driver().rollback_transaction().await;
            } else {
                collector.rollback();
            }
            self.first_error = Some(err);
            self.queue.clear();
            self.emit_result();
            return false;
        }

        if use_batch_transaction {
            if let Err(err) = self.store.driver().commit_transaction().await {
                collector.rollback();
                self.first_error = Some(SyncError::Storage(err.to_string()));
                self.emit_result();
                return false;
            }
        }
        collector.commit();
        self.processed += outcome.created + outcome.merged;
        self.created_count += outcome.created;
        self.merged_count += outcome.merged;
        self.events.push_back(SyncEvent::TransactionCommitted { processed: self.processed });
        true
    }

    async fn reconcile_one(
        &self,
        collector: &mut pimd_notify::TransactionCollector,
        item: &RemoteItem,
    ) -> Result<Reconciled, SyncError> {
        let (gid, remote_id) = item.merge_key();
        let existing = self
            .store
            .find_item_by_merge_key(self.collection_id, gid, remote_id)
            .await
            .map_err(|err| SyncError::Storage(err.to_string()))?;

        let parts: Vec<NewPart> = item.parts.iter().map(|(name, data)| NewPart { name: name.clone(), data: data.clone() }).collect();

        match existing {
            Some(item_id) => {
                self.store
                    .modify_pim_item(collector, item_id, item.remote_revision.clone(), parts)
                    .await
                    .map_err(|err| SyncError::Storage(err.to_string()))?;
                Ok(Reconciled::Merged)
            }
            None => {
                self.store
                    .append_pim_item(
                        collector,
                        NewItem {
                            mime_type: item.mime_type.clone(),
                            collection_id: self.collection_id,
                            remote_id: item.remote_id.clone(),
                            remote_revision: item.remote_revision.clone(),
                            gid: item.gid.clone(),
                            parts,
                        },
                    )
                    .await
                    .map_err(|err| SyncError::Storage(err.to_string()))?;
                Ok(Reconciled::Created)
            }
        }
    }

    async fn apply_removals(&mut self) -> Result<(), SyncError> {
        let mut to_delete: Vec<EntityId> = Vec::new();

        for removal in self.removals.drain(..) {
            let (gid, remote_id) = removal.merge_key();
            if let Some(id) = self
                .store
                .find_item_by_merge_key(self.collection_id, gid, remote_id)
                .await
                .map_err(|err| SyncError::Storage(err.to_string()))?
            {
                to_delete.push(id);
            }
        }

        if self.mode == SyncMode::Full {
            let local_refs = self
                .store
                .list_item_refs_for_collection(self.collection_id)
                .await
                .map_err(|err| SyncError::Storage(err.to_string()))?;
            for (id, remote_id) in local_refs {
                if let Some(remote_id) = remote_id {
                    if !self.seen_remote_ids.contains(remote_id.as_ref()) {
                        to_delete.push(id);
                    }
                }
            }
        }

        if to_delete.is_empty() {
            return Ok(());
        }
        let mut collector = self.store.new_collector();
        self.store
            .cleanup_pim_items(&mut collector, &to_delete)
            .await
            .map_err(|err| SyncError::Storage(err.to_string()))?;
        collector.commit();
        self.removed_count += to_delete.len();
        Ok(())
    }

    fn emit_result(&mut self) {
        self.finished = true;
        let outcome = SyncOutcome {
            created: self.created_count,
            merged: self.merged_count,
            removed: self.removed_count,
            skipped: self.skipped_count,
        };
        self.events.push_back(SyncEvent::Result {
            outcome,
            error: self.first_error.clone(),
        });
    }
}

enum Reconciled {
    Created,
    Merged,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pimd_model::CachePolicy;
    use pimd_notify::ChangeBus;
    use pimd_query::SqliteDriver;
    use pimd_storage::NewCollection;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn memory_store() -> Arc<DataStore> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let driver = SqliteDriver::new(pool);
        let bus = ChangeBus::new(16);
        let data_root = std::env::temp_dir().join(format!("pimd-sync-test-{}", uuid::Uuid::new_v4()));
        Arc::new(DataStore::initialize(driver, bus, data_root).await.unwrap())
    }

    async fn seed_collection(store: &DataStore) -> EntityId {
        store.driver().exec("INSERT INTO resources (name) VALUES ('res')", &[]).await.unwrap();
        let mut collector = store.new_collector();
        let collection = store
            .append_collection(
                &mut collector,
                NewCollection {
                    name: Arc::from("inbox"),
                    parent_id: None,
                    resource_id: 1,
                    remote_id: None,
                    remote_revision: None,
                    is_virtual: false,
                    cache_policy: CachePolicy::system_default(),
                },
            )
            .await
            .unwrap();
        collector.commit();
        collection.id
    }

    fn item(remote_id: &str) -> RemoteItem {
        RemoteItem {
            remote_id: Some(Arc::from(remote_id)),
            gid: None,
            remote_revision: Some(Arc::from("rev-1")),
            mime_type: Arc::from("text/vcard"),
            parts: vec![(Arc::from("PLD:RFC822"), b"hello".to_vec())],
        }
    }

    #[tokio::test]
    async fn full_batch_creates_items_and_reports_ready_for_next() {
        let store = memory_store().await;
        let collection_id = seed_collection(&store).await;
        let mut sync = ItemSynchronizer::new(
            store.clone(),
            collection_id,
            SyncMode::Incremental,
            ItemSyncOptions { batch_size: 2, ..Default::default() },
        );

        sync.deliver_items(vec![item("r1"), item("r2")]).await;
        let events = sync.drain_events();
        assert!(matches!(events[0], SyncEvent::TransactionCommitted { processed: 2 }));
        assert!(matches!(events[1], SyncEvent::ReadyForNextBatch(2)));

        sync.delivery_done().await;
        let events = sync.drain_events();
        let outcome = events.iter().find_map(|e| match e {
            SyncEvent::Result { outcome, error } => {
                assert!(error.is_none());
                Some(*outcome)
            }
            _ => None,
        });
        assert_eq!(outcome.unwrap().created, 2);
    }

    #[tokio::test]
    async fn redelivering_same_remote_id_merges_instead_of_duplicating() {
        let store = memory_store().await;
        let collection_id = seed_collection(&store).await;
        let mut sync = ItemSynchronizer::new(
            store.clone(),
            collection_id,
            SyncMode::Incremental,
            ItemSyncOptions { batch_size: 1, ..Default::default() },
        );

        sync.deliver_items(vec![item("r1")]).await;
        sync.drain_events();
        sync.deliver_items(vec![item("r1")]).await;
        sync.drain_events();
        sync.delivery_done().await;
        let events = sync.drain_events();
        let outcome = events.iter().find_map(|e| match e {
            SyncEvent::Result { outcome, .. } => Some(*outcome),
            _ => None,
        });
        let outcome = outcome.unwrap();
        assert_eq!(outcome.created, 1);
        assert_eq!(outcome.merged, 1);

        let refs = store.list_item_refs_for_collection(collection_id).await.unwrap();
        assert_eq!(refs.len(), 1);
    }

    #[tokio::test]
    async fn full_sync_removes_items_missing_from_delivered_set() {
        let store = memory_store().await;
        let collection_id = seed_collection(&store).await;

        let mut seed_sync = ItemSynchronizer::new(store.clone(), collection_id, SyncMode::Full, ItemSyncOptions::default());
        seed_sync.deliver_items(vec![item("keep"), item("drop")]).await;
        seed_sync.drain_events();
        seed_sync.delivery_done().await;
        seed_sync.drain_events();

        let mut sync = ItemSynchronizer::new(store.clone(), collection_id, SyncMode::Full, ItemSyncOptions::default());
        sync.deliver_items(vec![item("keep")]).await;
        sync.drain_events();
        sync.delivery_done().await;
        let events = sync.drain_events();
        let outcome = events.iter().find_map(|e| match e {
            SyncEvent::Result { outcome, .. } => Some(*outcome),
            _ => None,
        });
        let outcome = outcome.unwrap();
        assert_eq!(outcome.merged, 1);
        assert_eq!(outcome.removed, 1);

        let refs = store.list_item_refs_for_collection(collection_id).await.unwrap();
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].1.as_deref(), Some("keep"));
    }

    #[tokio::test]
    async fn item_without_remote_id_or_gid_is_skipped() {
        let store = memory_store().await;
        let collection_id = seed_collection(&store).await;
        let mut sync = ItemSynchronizer::new(store.clone(), collection_id, SyncMode::Incremental, ItemSyncOptions::default());

        let mut bad = item("ignored");
        bad.remote_id = None;
        sync.deliver_items(vec![bad]).await;
        sync.delivery_done().await;
        let events = sync.drain_events();
        let outcome = events.iter().find_map(|e| match e {
            SyncEvent::Result { outcome, .. } => Some(*outcome),
            _ => None,
        });
        let outcome = outcome.unwrap();
        assert_eq!(outcome.created, 0);
        assert_eq!(outcome.skipped, 1);
    }

    #[tokio::test]
    async fn rollback_is_idempotent_and_surfaces_user_canceled() {
        let store = memory_store().await;
        let collection_id = seed_collection(&store).await;
        let mut sync = ItemSynchronizer::new(store.clone(), collection_id, SyncMode::Incremental, ItemSyncOptions::default());

        sync.rollback().await;
        sync.rollback().await;
        let events = sync.drain_events();
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], SyncEvent::Result { error: Some(SyncError::UserCanceled), .. }));
    }
}
