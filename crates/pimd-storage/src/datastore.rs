use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use pimd_model::{
    CachePolicy, Collection, Entity, EntityCache, EntityId, Flag, FromRow, Item, LocalParts, MimeType, Part, PartData,
    Relation, Resource, Tag,
};
use pimd_notify::{ChangeBus, CollectionChangeEntry, ItemChangeEntry, TransactionCollector};
use pimd_query::{CompareOp, DeleteBuilder, InsertBuilder, SelectBuilder, SqliteDriver, UpdateBuilder, Value};
use sqlx::Row;
use tracing::instrument;

use crate::error::StorageError;
use crate::files;
use crate::row_impls::encode_local_parts;
use crate::schema;

/// Conventional part name the connection handler sets to mark an item
/// hidden from ordinary listings (§4.4 `unhidePimItem`).
const HIDDEN_PART_NAME: &str = "ATR:HIDDEN";
/// Prefix identifying payload-bearing parts, as opposed to metadata parts,
/// for `invalidateItemCache` (§4.4).
const PAYLOAD_PART_PREFIX: &str = "PLD:";
/// Fallback inline/external threshold (§4.7), overridden by
/// [`DataStore::set_external_payload_threshold`] from the server's
/// `ServerConfig` at startup.
const DEFAULT_EXTERNAL_PAYLOAD_THRESHOLD: u64 = 4096;

fn now_unix() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs() as i64
}

pub struct NewCollection {
    pub name: Arc<str>,
    pub parent_id: Option<EntityId>,
    pub resource_id: EntityId,
    pub remote_id: Option<Arc<str>>,
    pub remote_revision: Option<Arc<str>>,
    pub is_virtual: bool,
    pub cache_policy: CachePolicy,
}

pub struct NewPart {
    pub name: Arc<str>,
    pub data: Vec<u8>,
}

pub struct NewItem {
    pub mime_type: Arc<str>,
    pub collection_id: EntityId,
    pub remote_id: Option<Arc<str>>,
    pub remote_revision: Option<Arc<str>>,
    pub gid: Option<Arc<str>>,
    pub parts: Vec<NewPart>,
}

/// The storage engine (§4.4): owns the SQLite driver, the process-wide
/// entity caches, the change bus, and the data root for externalized
/// payloads.
pub struct DataStore {
    driver: SqliteDriver,
    bus: ChangeBus,
    data_root: PathBuf,
    external_payload_threshold: std::sync::atomic::AtomicU64,
    pub mime_types: EntityCache<MimeType>,
    pub flags: EntityCache<Flag>,
    pub resources: EntityCache<Resource>,
    pub tags: EntityCache<Tag>,
    pub collections: EntityCache<Collection>,
}

impl DataStore {
    /// Runs schema initialization and enables the process-wide caches.
    /// Must be called exactly once, before any other task touches the
    /// driver (§4.4 "initialization ... from the process main thread").
    pub async fn initialize(driver: SqliteDriver, bus: ChangeBus, data_root: PathBuf) -> Result<Self, StorageError> {
        schema::initialize(&driver).await?;
        let store = Self {
            driver,
            bus,
            data_root,
            external_payload_threshold: std::sync::atomic::AtomicU64::new(DEFAULT_EXTERNAL_PAYLOAD_THRESHOLD),
            mime_types: EntityCache::new(),
            flags: EntityCache::new(),
            resources: EntityCache::new(),
            tags: EntityCache::new(),
            collections: EntityCache::new(),
        };
        store.mime_types.enable();
        store.flags.enable();
        store.resources.enable();
        store.tags.enable();
        store.collections.enable();
        Ok(store)
    }

    pub fn driver(&self) -> &SqliteDriver {
        &self.driver
    }

    pub fn new_collector(&self) -> TransactionCollector {
        TransactionCollector::new(self.bus.clone())
    }

    /// Overrides the inline/external payload threshold (§4.7), normally
    /// called once at startup from `ServerConfig::external_payload_threshold`.
    pub fn set_external_payload_threshold(&self, threshold: u64) {
        self.external_payload_threshold.store(threshold, std::sync::atomic::Ordering::Relaxed);
    }

    fn external_payload_threshold(&self) -> u64 {
        self.external_payload_threshold.load(std::sync::atomic::Ordering::Relaxed)
    }

    /// Writes one part's payload, deciding inline vs. external purely by
    /// size (§4.7 step 1) and returning the column values a row should
    /// hold. `revision` is the filename's `_rN` suffix; callers own
    /// picking the next value (0 for a brand-new part, previous+1 on
    /// replacement).
    async fn write_part_payload(
        &self,
        part_id: EntityId,
        revision: u32,
        data: &[u8],
    ) -> Result<(Option<String>, bool, Option<Vec<u8>>), StorageError> {
        if data.len() as u64 > self.external_payload_threshold() {
            let filename = files::write_external(&self.data_root, part_id, revision, data).await?;
            Ok((Some(filename), true, None))
        } else {
            Ok((None, false, Some(data.to_vec())))
        }
    }

    // ---- flag operations (§4.4) ----

    /// Overwrites the full flag set of every item in `items`: deletes all
    /// existing associations for them, then inserts the given set.
    #[instrument(skip(self, collector))]
    pub async fn set_items_flags(
        &self,
        collector: &mut TransactionCollector,
        items: &[EntityId],
        flags: &[Arc<str>],
    ) -> Result<(), StorageError> {
        if items.is_empty() {
            return Ok(());
        }
        let existing = self.flag_names_for_items(items).await?;
        let flag_ids = self.flag_ids_insert_if_absent(flags).await?;

        let (sql, params) = DeleteBuilder::new("item_flags")
            .add_value_condition("item_id", CompareOp::In, id_list(items))
            .build();
        self.driver.exec(&sql, &params).await?;

        if !flag_ids.is_empty() {
            let (sql, params) = InsertBuilder::new("item_flags")
                .set_column_value("item_id", id_list(items))
                .set_column_value("flag_id", id_list(&flag_ids))
                .build();
            self.driver.exec(&sql, &params).await?;
        }

        let added: Vec<Arc<str>> = flags.iter().filter(|f| !existing.contains(f.as_ref())).cloned().collect();
        let removed: Vec<Arc<str>> = existing
            .into_iter()
            .filter(|f| !flags.iter().any(|new| new.as_ref() == f.as_str()))
            .map(Arc::from)
            .collect();
        collector.note_items_flags_changed(items.to_vec(), added, removed);
        Ok(())
    }

    /// Adds `flags` to `items` without disturbing any other flag already
    /// present; when `check_if_exists` is set, pairs that already exist
    /// are skipped rather than producing a duplicate-key error.
    #[instrument(skip(self, collector))]
    pub async fn append_items_flags(
        &self,
        collector: &mut TransactionCollector,
        items: &[EntityId],
        flags: &[Arc<str>],
        check_if_exists: bool,
    ) -> Result<(), StorageError> {
        if items.is_empty() || flags.is_empty() {
            return Ok(());
        }
        let flag_ids = self.flag_ids_insert_if_absent(flags).await?;

        let mut net_added: Vec<Arc<str>> = Vec::new();
        for (flag, flag_id) in flags.iter().zip(flag_ids.iter().copied()) {
            let candidate_items: Vec<EntityId> = if check_if_exists {
                let existing = self.item_ids_with_flag(items, flag_id).await?;
                items.iter().copied().filter(|id| !existing.contains(id)).collect()
            } else {
                items.to_vec()
            };
            if candidate_items.is_empty() {
                continue;
            }
            let (sql, params) = InsertBuilder::new("item_flags")
                .set_column_value("item_id", id_list(&candidate_items))
                .set_column_value("flag_id", Value::Int(flag_id))
                .build();
            let affected = self.driver.exec(&sql, &params).await?;
            if affected > 0 {
                net_added.push(flag.clone());
            }
        }
        if !net_added.is_empty() {
            collector.note_items_flags_changed(items.to_vec(), net_added, Vec::new());
        }
        Ok(())
    }

    /// Deletes every (item, flag) pair in the cartesian product of
    /// `items` x `flags` that currently exists, and reports only the
    /// flags actually removed by at least one row.
    #[instrument(skip(self, collector))]
    pub async fn remove_items_flags(
        &self,
        collector: &mut TransactionCollector,
        items: &[EntityId],
        flags: &[Arc<str>],
    ) -> Result<(), StorageError> {
        if items.is_empty() || flags.is_empty() {
            return Ok(());
        }
        let existing = self.flag_names_for_items(items).await?;
        let flag_ids = self.flag_ids_for_names(flags).await?;
        if !flag_ids.is_empty() {
            let (sql, params) = DeleteBuilder::new("item_flags")
                .add_value_condition("item_id", CompareOp::In, id_list(items))
                .add_value_condition("flag_id", CompareOp::In, id_list(&flag_ids))
                .build();
            self.driver.exec(&sql, &params).await?;
        }
        let removed: Vec<Arc<str>> = flags.iter().filter(|f| existing.contains(f.as_ref())).cloned().collect();
        if !removed.is_empty() {
            collector.note_items_flags_changed(items.to_vec(), Vec::new(), removed);
        }
        Ok(())
    }

    async fn flag_names_for_items(&self, items: &[EntityId]) -> Result<std::collections::HashSet<String>, StorageError> {
        let (sql, params) = SelectBuilder::new()
            .add_table("item_flags")
            .add_join(pimd_query::JoinKind::Inner, "flags", "item_flags.flag_id", "flags.id")
            .add_column("DISTINCT flags.name")
            .add_value_condition("item_flags.item_id", CompareOp::In, id_list(items))
            .build();
        let rows = self.driver.query(&sql, &params).await?;
        Ok(rows
            .into_iter()
            .map(|row| row.try_get::<String, _>(0).unwrap_or_default())
            .collect())
    }

    async fn item_ids_with_flag(&self, items: &[EntityId], flag_id: EntityId) -> Result<Vec<EntityId>, StorageError> {
        let (sql, params) = SelectBuilder::new()
            .add_table("item_flags")
            .add_column("item_id")
            .add_value_condition("item_id", CompareOp::In, id_list(items))
            .add_value_condition("flag_id", CompareOp::Equals, flag_id)
            .build();
        let rows = self.driver.query(&sql, &params).await?;
        Ok(rows.into_iter().filter_map(|row| row.try_get::<i64, _>(0).ok()).collect())
    }

    async fn flag_ids_for_names(&self, names: &[Arc<str>]) -> Result<Vec<EntityId>, StorageError> {
        let mut ids = Vec::with_capacity(names.len());
        for name in names {
            if let Some(flag) = self.flags.get_by_name(name) {
                ids.push(flag.id);
                continue;
            }
            let (sql, params) = SelectBuilder::new()
                .add_table("flags")
                .add_column("id")
                .add_value_condition("name", CompareOp::Equals, name.as_ref())
                .build();
            if let Some(row) = self.driver.query(&sql, &params).await?.into_iter().next() {
                ids.push(row.try_get::<i64, _>(0)?);
            }
        }
        Ok(ids)
    }

    async fn flag_ids_insert_if_absent(&self, names: &[Arc<str>]) -> Result<Vec<EntityId>, StorageError> {
        let mut ids = Vec::with_capacity(names.len());
        for name in names {
            ids.push(self.insert_flag_if_absent(name).await?);
        }
        Ok(ids)
    }

    async fn insert_flag_if_absent(&self, name: &Arc<str>) -> Result<EntityId, StorageError> {
        if let Some(flag) = self.flags.get_by_name(name) {
            return Ok(flag.id);
        }
        self.driver
            .exec(
                "INSERT OR IGNORE INTO flags (name) VALUES (?)",
                &[Value::Text(name.to_string())],
            )
            .await?;
        let (sql, params) = SelectBuilder::new()
            .add_table("flags")
            .add_columns(["id", "name"])
            .add_value_condition("name", CompareOp::Equals, name.as_ref())
            .build();
        let row = self
            .driver
            .query(&sql, &params)
            .await?
            .into_iter()
            .next()
            .ok_or(StorageError::NotFound { kind: "flag", id: 0 })?;
        let flag = Flag::from_row(&row)?;
        self.flags.insert(flag.id, flag.name.clone(), flag.clone());
        Ok(flag.id)
    }

    // ---- part operations (§4.4) ----

    #[instrument(skip(self, collector))]
    pub async fn remove_item_parts(
        &self,
        collector: &mut TransactionCollector,
        item_id: EntityId,
        part_names: &[Arc<str>],
    ) -> Result<(), StorageError> {
        if part_names.is_empty() {
            return Ok(());
        }
        let (select_sql, select_params) = SelectBuilder::new()
            .add_table("parts")
            .add_columns(["id", "item_id", "name", "data", "filename", "external", "size", "revision"])
            .add_value_condition("item_id", CompareOp::Equals, item_id)
            .add_value_condition(
                "name",
                CompareOp::In,
                Value::List(part_names.iter().map(|n| Value::Text(n.to_string())).collect()),
            )
            .build();
        let rows = self.driver.query(&select_sql, &select_params).await?;
        for row in &rows {
            let part = Part::from_row(row)?;
            if let PartData::External { filename } = &part.data {
                files::remove_external(&self.data_root, filename).await;
            }
        }

        let (sql, params) = DeleteBuilder::new("parts")
            .add_value_condition("item_id", CompareOp::Equals, item_id)
            .add_value_condition(
                "name",
                CompareOp::In,
                Value::List(part_names.iter().map(|n| Value::Text(n.to_string())).collect()),
            )
            .build();
        self.driver.exec(&sql, &params).await?;

        let item = self.fetch_item(item_id).await?;
        collector.note_item_changed(item, part_names.to_vec());
        Ok(())
    }

    /// Drops cached payloads from every non-dirty payload part of `item`,
    /// retaining the row (and its revision) so metadata parts and
    /// bookkeeping survive (§4.4).
    #[instrument(skip(self))]
    pub async fn invalidate_item_cache(&self, item_id: EntityId) -> Result<(), StorageError> {
        let (select_sql, select_params) = SelectBuilder::new()
            .add_table("parts")
            .add_columns(["id", "item_id", "name", "data", "filename", "external", "size", "revision"])
            .add_value_condition("item_id", CompareOp::Equals, item_id)
            .add_value_condition("dirty", CompareOp::Equals, 0i64)
            .add_value_condition("name", CompareOp::Like, format!("{PAYLOAD_PART_PREFIX}%"))
            .build();
        let rows = self.driver.query(&select_sql, &select_params).await?;
        for row in &rows {
            let part = Part::from_row(row)?;
            if let PartData::External { filename } = &part.data {
                files::remove_external(&self.data_root, filename).await;
            }
            let (sql, params) = UpdateBuilder::new("parts")
                .set_column_value("data", Value::Null)
                .set_column_value("filename", Value::Null)
                .set_column_value("external", 0i64)
                .set_column_value("size", 0i64)
                .add_value_condition("id", CompareOp::Equals, part.id)
                .build();
            self.driver.exec(&sql, &params).await?;
        }
        Ok(())
    }

    // ---- collection operations (§4.4) ----

    #[instrument(skip(self, collector))]
    pub async fn append_collection(
        &self,
        collector: &mut TransactionCollector,
        new_collection: NewCollection,
    ) -> Result<Collection, StorageError> {
        let (sql, params) = InsertBuilder::new("collections")
            .set_column_value("name", new_collection.name.to_string())
            .set_column_value("parent_id", new_collection.parent_id.map(Value::Int).unwrap_or(Value::Null))
            .set_column_value("resource_id", new_collection.resource_id)
            .set_column_value(
                "remote_id",
                new_collection.remote_id.as_deref().map(|s| Value::Text(s.to_string())).unwrap_or(Value::Null),
            )
            .set_column_value(
                "remote_revision",
                new_collection
                    .remote_revision
                    .as_deref()
                    .map(|s| Value::Text(s.to_string()))
                    .unwrap_or(Value::Null),
            )
            .set_column_value("is_virtual", new_collection.is_virtual as i64)
            .set_column_value("cache_inherit", new_collection.cache_policy.inherit as i64)
            .set_column_value("cache_check_interval", new_collection.cache_policy.check_interval as i64)
            .set_column_value("cache_timeout", new_collection.cache_policy.cache_timeout as i64)
            .set_column_value("cache_sync_on_demand", new_collection.cache_policy.sync_on_demand as i64)
            .set_column_value("cache_local_parts", encode_local_parts(&new_collection.cache_policy.local_parts))
            .build();
        self.driver.exec(&sql, &params).await.map_err(|err| match err {
            pimd_query::QueryError::Driver(sqlx::Error::Database(db)) if db.is_unique_violation() => StorageError::Conflict {
                kind: "collection",
            },
            other => other.into(),
        })?;

        let row = self
            .driver
            .query(
                "SELECT id, name, parent_id, resource_id, remote_id, remote_revision, is_virtual, cache_inherit, \
                 cache_check_interval, cache_timeout, cache_sync_on_demand, cache_local_parts FROM collections \
                 WHERE rowid = last_insert_rowid()",
                &[],
            )
            .await?
            .into_iter()
            .next()
            .ok_or(StorageError::NotFound { kind: "collection", id: 0 })?;
        let collection = Collection::from_row(&row)?;
        self.collections.insert(collection.id, collection.name.clone(), collection.clone());
        collector.note_collection_added(collection.clone());
        Ok(collection)
    }

    /// Removes a collection: emits `itemsRemoved` for its direct items
    /// before touching any row, deletes their external payload files, then
    /// deletes the collection row (child collections, items, parts and
    /// attributes all cascade via `ON DELETE CASCADE`).
    #[instrument(skip(self, collector))]
    pub async fn cleanup_collection(&self, collector: &mut TransactionCollector, collection_id: EntityId) -> Result<(), StorageError> {
        let collection = self.fetch_collection(collection_id).await?;
        let resource = self.fetch_resource(collection.resource_id).await?;

        let item_rows = self
            .driver
            .query(
                "SELECT id, mimetype_id FROM items WHERE collection_id = ?",
                &[Value::Int(collection_id)],
            )
            .await?;
        let mut entries = Vec::with_capacity(item_rows.len());
        let mut item_ids = Vec::with_capacity(item_rows.len());
        for row in &item_rows {
            let item_id: i64 = row.try_get(0)?;
            let mimetype_id: i64 = row.try_get(1)?;
            let mime_type = self.fetch_mime_type_name(mimetype_id).await?;
            item_ids.push(item_id);
            entries.push(ItemChangeEntry {
                id: item_id,
                collection_id,
                mime_type,
                resource: resource.name.clone(),
            });
        }
        if !entries.is_empty() {
            collector.note_items_removed(entries);
            self.remove_external_files_for_items(&item_ids).await?;
        }

        self.driver
            .exec("DELETE FROM collections WHERE id = ?", &[Value::Int(collection_id)])
            .await?;
        self.collections.invalidate(collection_id);

        collector.note_collections_removed(vec![CollectionChangeEntry {
            id: collection_id,
            parent_id: collection.parent_id,
            resource: resource.name,
        }]);
        Ok(())
    }

    /// Moves a collection under `new_parent_id`, rejecting the move if it
    /// would create a cycle. Wrapped in a nested transaction since a
    /// cross-resource move recursively touches every item underneath.
    #[instrument(skip(self, collector))]
    pub async fn move_collection(
        &self,
        collector: &mut TransactionCollector,
        collection_id: EntityId,
        new_parent_id: EntityId,
    ) -> Result<Collection, StorageError> {
        if self.is_ancestor_of(collection_id, new_parent_id).await? {
            return Err(StorageError::CyclicMove {
                id: collection_id,
                new_parent: new_parent_id,
            });
        }

        let scope = self.driver.scoped_transaction().await?;
        let collection = self.fetch_collection(collection_id).await?;
        let new_parent = self.fetch_collection(new_parent_id).await?;

        self.driver
            .exec(
                "UPDATE collections SET parent_id = ? WHERE id = ?",
                &[Value::Int(new_parent_id), Value::Int(collection_id)],
            )
            .await?;

        if collection.resource_id != new_parent.resource_id {
            // §3: resource id must match the parent's resource id throughout
            // the subtree, and §4.4 requires the dirty-marking to recurse
            // into every descendant collection's items, not just the moved
            // collection's own.
            let subtree = self.subtree_collection_ids(collection_id).await?;
            let (sql, params) = UpdateBuilder::new("collections")
                .set_column_value("resource_id", new_parent.resource_id)
                .add_value_condition("id", CompareOp::In, id_list(&subtree))
                .build();
            self.driver.exec(&sql, &params).await?;

            let now = now_unix();
            let (sql, params) = UpdateBuilder::new("items")
                .set_column_value("remote_id", Value::Null)
                .set_column_value("remote_revision", Value::Null)
                .set_column_value("dirty", 1i64)
                .set_column_value("atime", now)
                .add_value_condition("collection_id", CompareOp::In, id_list(&subtree))
                .build();
            self.driver.exec(&sql, &params).await?;

            for id in subtree {
                self.collections.invalidate(id);
            }
        }
        scope.commit().await?;

        self.collections.invalidate(collection_id);
        let moved = self.fetch_collection(collection_id).await?;
        collector.note_collection_changed(moved.clone(), vec![Arc::from("parent_id")]);
        Ok(moved)
    }

    /// Returns `root_id` plus every descendant collection id, walked
    /// breadth-first via `parent_id`.
    async fn subtree_collection_ids(&self, root_id: EntityId) -> Result<Vec<EntityId>, StorageError> {
        let mut ids = vec![root_id];
        let mut frontier = vec![root_id];
        while !frontier.is_empty() {
            let (sql, params) = SelectBuilder::new()
                .add_table("collections")
                .add_column("id")
                .add_value_condition("parent_id", CompareOp::In, id_list(&frontier))
                .build();
            let rows = self.driver.query(&sql, &params).await?;
            frontier = rows
                .into_iter()
                .filter_map(|row| row.try_get::<i64, _>(0).ok())
                .collect();
            ids.extend(frontier.iter().copied());
        }
        Ok(ids)
    }

    async fn is_ancestor_of(&self, ancestor_id: EntityId, start_id: EntityId) -> Result<bool, StorageError> {
        let mut current = Some(start_id);
        while let Some(id) = current {
            if id == ancestor_id {
                return Ok(true);
            }
            current = self.parent_of(id).await?;
        }
        Ok(false)
    }

    async fn parent_of(&self, collection_id: EntityId) -> Result<Option<EntityId>, StorageError> {
        let row = self
            .driver
            .query(
                "SELECT parent_id FROM collections WHERE id = ?",
                &[Value::Int(collection_id)],
            )
            .await?
            .into_iter()
            .next();
        match row {
            Some(row) => Ok(row.try_get::<Option<i64>, _>(0)?),
            None => Ok(None),
        }
    }

    #[instrument(skip(self, collector))]
    pub async fn append_mime_type_for_collection(
        &self,
        collector: &mut TransactionCollector,
        collection_id: EntityId,
        mime_type_name: &str,
    ) -> Result<(), StorageError> {
        let mimetype_id = self.insert_mime_type_if_absent(mime_type_name).await?;
        self.driver
            .exec(
                "INSERT OR IGNORE INTO collection_mimetypes (collection_id, mimetype_id) VALUES (?, ?)",
                &[Value::Int(collection_id), Value::Int(mimetype_id)],
            )
            .await?;
        let collection = self.fetch_collection(collection_id).await?;
        collector.note_collection_changed(collection, vec![Arc::from("mimetypes")]);
        Ok(())
    }

    #[instrument(skip(self, collector))]
    pub async fn add_collection_attribute(
        &self,
        collector: &mut TransactionCollector,
        collection_id: EntityId,
        name: &str,
        value: &[u8],
    ) -> Result<(), StorageError> {
        self.driver
            .exec(
                "INSERT INTO collection_attributes (collection_id, name, value) VALUES (?, ?, ?) \
                 ON CONFLICT(collection_id, name) DO UPDATE SET value = excluded.value",
                &[Value::Int(collection_id), Value::Text(name.to_string()), Value::Blob(value.to_vec())],
            )
            .await?;
        self.collections.invalidate(collection_id);
        let collection = self.fetch_collection(collection_id).await?;
        collector.note_collection_changed(collection, vec![Arc::from(name)]);
        Ok(())
    }

    #[instrument(skip(self, collector))]
    pub async fn remove_collection_attribute(
        &self,
        collector: &mut TransactionCollector,
        collection_id: EntityId,
        name: &str,
    ) -> Result<(), StorageError> {
        self.driver
            .exec(
                "DELETE FROM collection_attributes WHERE collection_id = ? AND name = ?",
                &[Value::Int(collection_id), Value::Text(name.to_string())],
            )
            .await?;
        self.collections.invalidate(collection_id);
        let collection = self.fetch_collection(collection_id).await?;
        collector.note_collection_changed(collection, vec![Arc::from(name)]);
        Ok(())
    }

    // ---- mime type operations (§4.4) ----

    pub async fn insert_mime_type_if_absent(&self, name: &str) -> Result<EntityId, StorageError> {
        if let Some(mime_type) = self.mime_types.get_by_name(name) {
            return Ok(mime_type.id);
        }
        self.driver
            .exec("INSERT OR IGNORE INTO mime_types (name) VALUES (?)", &[Value::Text(name.to_string())])
            .await?;
        let row = self
            .driver
            .query(
                "SELECT id, name FROM mime_types WHERE name = ?",
                &[Value::Text(name.to_string())],
            )
            .await?
            .into_iter()
            .next()
            .ok_or(StorageError::NotFound { kind: "mime_type", id: 0 })?;
        let mime_type = MimeType::from_row(&row)?;
        self.mime_types.insert(mime_type.id, mime_type.name.clone(), mime_type.clone());
        Ok(mime_type.id)
    }

    // ---- item operations (§4.4) ----

    /// Inserts a new item: marked dirty when it has no remote id (client
    /// origin) and clean otherwise (resource origin), with `atime` set to
    /// now; each provided part's size is fixed up from its actual payload
    /// length before insertion.
    #[instrument(skip(self, collector, new_item))]
    pub async fn append_pim_item(
        &self,
        collector: &mut TransactionCollector,
        new_item: NewItem,
    ) -> Result<(Item, Vec<Part>), StorageError> {
        let mimetype_id = self.insert_mime_type_if_absent(&new_item.mime_type).await?;
        let dirty = new_item.remote_id.as_deref().map(|s| s.is_empty()).unwrap_or(true);
        let now = now_unix();

        let (sql, params) = InsertBuilder::new("items")
            .set_column_value("gid", new_item.gid.as_deref().map(|s| Value::Text(s.to_string())).unwrap_or(Value::Null))
            .set_column_value(
                "remote_id",
                new_item.remote_id.as_deref().map(|s| Value::Text(s.to_string())).unwrap_or(Value::Null),
            )
            .set_column_value(
                "remote_revision",
                new_item
                    .remote_revision
                    .as_deref()
                    .map(|s| Value::Text(s.to_string()))
                    .unwrap_or(Value::Null),
            )
            .set_column_value("collection_id", new_item.collection_id)
            .set_column_value("mimetype_id", mimetype_id)
            .set_column_value("revision", 0i64)
            .set_column_value("size", 0i64)
            .set_column_value("dirty", dirty as i64)
            .set_column_value("atime", now)
            .build();
        self.driver.exec(&sql, &params).await?;

        let item_row = self
            .driver
            .query(
                "SELECT items.id, items.gid, items.remote_id, items.remote_revision, items.collection_id, \
                 mime_types.name AS mime_type, items.revision, items.size, items.dirty, items.atime \
                 FROM items INNER JOIN mime_types ON items.mimetype_id = mime_types.id \
                 WHERE items.rowid = last_insert_rowid()",
                &[],
            )
            .await?
            .into_iter()
            .next()
            .ok_or(StorageError::NotFound { kind: "item", id: 0 })?;
        let mut item = Item::from_row(&item_row)?;

        let mut total_size = 0u64;
        let mut parts = Vec::with_capacity(new_item.parts.len());
        for new_part in &new_item.parts {
            let size = new_part.data.len() as u64;
            total_size += size;
            // Placeholder row first: the external filename scheme is
            // `<partId>_r<rev>`, so the part id must exist before a
            // payload over threshold can be written to disk (§4.7).
            let (sql, params) = InsertBuilder::new("parts")
                .set_column_value("item_id", item.id)
                .set_column_value("name", new_part.name.to_string())
                .set_column_value("data", Value::Null)
                .set_column_value("filename", Value::Null)
                .set_column_value("external", 0i64)
                .set_column_value("size", size as i64)
                .set_column_value("revision", 0i64)
                .build();
            self.driver.exec(&sql, &params).await?;
            let part_id: i64 = self
                .driver
                .query("SELECT id FROM parts WHERE rowid = last_insert_rowid()", &[])
                .await?
                .into_iter()
                .next()
                .and_then(|row| row.try_get::<i64, _>("id").ok())
                .ok_or(StorageError::NotFound { kind: "part", id: 0 })?;

            let (filename, external, inline_data) = self.write_part_payload(part_id, 0, &new_part.data).await?;
            self.driver
                .exec(
                    "UPDATE parts SET data = ?, filename = ?, external = ? WHERE id = ?",
                    &[
                        inline_data.map(Value::Blob).unwrap_or(Value::Null),
                        filename.map(Value::Text).unwrap_or(Value::Null),
                        Value::Int(external as i64),
                        Value::Int(part_id),
                    ],
                )
                .await?;

            let part_row = self
                .driver
                .query(
                    "SELECT id, item_id, name, data, filename, external, size, revision FROM parts WHERE id = ?",
                    &[Value::Int(part_id)],
                )
                .await?
                .into_iter()
                .next()
                .ok_or(StorageError::NotFound { kind: "part", id: part_id })?;
            parts.push(Part::from_row(&part_row)?);
        }

        if total_size > 0 {
            self.driver
                .exec("UPDATE items SET size = ? WHERE id = ?", &[Value::Int(total_size as i64), Value::Int(item.id)])
                .await?;
            item.size = total_size;
        }

        collector.note_item_added(item.clone());
        Ok((item, parts))
    }

    /// Removes a batch of items: emits `itemsRemoved` before deleting
    /// anything, then clears flags, deletes parts (and their external
    /// files) and the item rows (virtual-collection references cascade).
    #[instrument(skip(self, collector))]
    pub async fn cleanup_pim_items(&self, collector: &mut TransactionCollector, item_ids: &[EntityId]) -> Result<(), StorageError> {
        if item_ids.is_empty() {
            return Ok(());
        }
        let (sql, params) = SelectBuilder::new()
            .add_table("items")
            .add_join(pimd_query::JoinKind::Inner, "mime_types", "items.mimetype_id", "mime_types.id")
            .add_join(pimd_query::JoinKind::Inner, "collections", "items.collection_id", "collections.id")
            .add_join(pimd_query::JoinKind::Inner, "resources", "collections.resource_id", "resources.id")
            .add_columns(["items.id", "items.collection_id", "mime_types.name", "resources.name"])
            .add_value_condition("items.id", CompareOp::In, id_list(item_ids))
            .build();
        let rows = self.driver.query(&sql, &params).await?;
        let entries: Vec<ItemChangeEntry> = rows
            .into_iter()
            .map(|row| {
                Ok::<_, StorageError>(ItemChangeEntry {
                    id: row.try_get(0)?,
                    collection_id: row.try_get(1)?,
                    mime_type: Arc::from(row.try_get::<String, _>(2)?),
                    resource: Arc::from(row.try_get::<String, _>(3)?),
                })
            })
            .collect::<Result<_, _>>()?;
        if entries.is_empty() {
            return Ok(());
        }
        collector.note_items_removed(entries);

        self.remove_external_files_for_items(item_ids).await?;

        let (sql, params) = DeleteBuilder::new("items")
            .add_value_condition("id", CompareOp::In, id_list(item_ids))
            .build();
        self.driver.exec(&sql, &params).await?;
        Ok(())
    }

    async fn remove_external_files_for_items(&self, item_ids: &[EntityId]) -> Result<(), StorageError> {
        let (sql, params) = SelectBuilder::new()
            .add_table("parts")
            .add_column("filename")
            .add_value_condition("item_id", CompareOp::In, id_list(item_ids))
            .add_value_condition("external", CompareOp::Equals, 1i64)
            .build();
        let rows = self.driver.query(&sql, &params).await?;
        for row in rows {
            if let Ok(filename) = row.try_get::<String, _>(0) {
                files::remove_external(&self.data_root, &filename).await;
            }
        }
        Ok(())
    }

    #[instrument(skip(self, collector))]
    pub async fn unhide_pim_item(&self, collector: &mut TransactionCollector, item_id: EntityId) -> Result<(), StorageError> {
        self.remove_item_parts(collector, item_id, &[Arc::from(HIDDEN_PART_NAME)]).await
    }

    #[instrument(skip(self, collector))]
    pub async fn unhide_all_pim_items(&self, collector: &mut TransactionCollector, collection_id: EntityId) -> Result<(), StorageError> {
        let rows = self
            .driver
            .query(
                "SELECT items.id FROM items INNER JOIN parts ON parts.item_id = items.id \
                 WHERE items.collection_id = ? AND parts.name = ?",
                &[Value::Int(collection_id), Value::Text(HIDDEN_PART_NAME.to_string())],
            )
            .await?;
        for row in rows {
            let item_id: i64 = row.try_get(0)?;
            self.unhide_pim_item(collector, item_id).await?;
        }
        Ok(())
    }

    // ---- cache-policy resolution (§4.4) ----

    /// Walks toward the root until a non-inheriting ancestor is found and
    /// returns its policy; falls back to [`CachePolicy::system_default`]
    /// if no ancestor overrides inheritance.
    pub async fn resolve_effective_cache_policy(&self, collection: &Collection) -> Result<CachePolicy, StorageError> {
        if !collection.cache_policy.inherit {
            return Ok(collection.cache_policy.clone());
        }
        let mut current = collection.parent_id;
        while let Some(id) = current {
            let ancestor = self.fetch_collection(id).await?;
            if !ancestor.cache_policy.inherit {
                return Ok(ancestor.cache_policy);
            }
            current = ancestor.parent_id;
        }
        Ok(CachePolicy::system_default())
    }

    // ---- virtual collections (§4.4) ----

    pub async fn virtual_collections_for_item(&self, item_id: EntityId) -> Result<Vec<EntityId>, StorageError> {
        let rows = self
            .driver
            .query(
                "SELECT collection_id FROM virtual_collection_items WHERE item_id = ?",
                &[Value::Int(item_id)],
            )
            .await?;
        Ok(rows.into_iter().filter_map(|row| row.try_get::<i64, _>(0).ok()).collect())
    }

    /// Returns a multi-map from virtual-collection id to the shallow
    /// (id, remote id, remote revision) of each referenced item.
    pub async fn virtual_collections_for_items(
        &self,
        item_ids: &[EntityId],
    ) -> Result<HashMap<EntityId, Vec<(EntityId, Option<Arc<str>>, Option<Arc<str>>)>>, StorageError> {
        if item_ids.is_empty() {
            return Ok(HashMap::new());
        }
        let (sql, params) = SelectBuilder::new()
            .add_table("virtual_collection_items")
            .add_join(
                pimd_query::JoinKind::Inner,
                "items",
                "virtual_collection_items.item_id",
                "items.id",
            )
            .add_columns([
                "virtual_collection_items.collection_id",
                "items.id",
                "items.remote_id",
                "items.remote_revision",
            ])
            .add_value_condition("virtual_collection_items.item_id", CompareOp::In, id_list(item_ids))
            .build();
        let rows = self.driver.query(&sql, &params).await?;
        let mut map: HashMap<EntityId, Vec<(EntityId, Option<Arc<str>>, Option<Arc<str>>)>> = HashMap::new();
        for row in rows {
            let collection_id: i64 = row.try_get(0)?;
            let item_id: i64 = row.try_get(1)?;
            let remote_id: Option<String> = row.try_get(2)?;
            let remote_revision: Option<String> = row.try_get(3)?;
            map.entry(collection_id).or_default().push((
                item_id,
                remote_id.map(Arc::from),
                remote_revision.map(Arc::from),
            ));
        }
        Ok(map)
    }

    // ---- lookups ----

    pub async fn fetch_item(&self, item_id: EntityId) -> Result<Item, StorageError> {
        let row = self
            .driver
            .query(
                "SELECT items.id, items.gid, items.remote_id, items.remote_revision, items.collection_id, \
                 mime_types.name AS mime_type, items.revision, items.size, items.dirty, items.atime \
                 FROM items INNER JOIN mime_types ON items.mimetype_id = mime_types.id \
                 WHERE items.id = ?",
                &[Value::Int(item_id)],
            )
            .await?
            .into_iter()
            .next()
            .ok_or(StorageError::NotFound { kind: "item", id: item_id })?;
        Item::from_row(&row).map_err(StorageError::from)
    }

    pub async fn fetch_collection(&self, collection_id: EntityId) -> Result<Collection, StorageError> {
        if let Some(collection) = self.collections.get_by_id(collection_id) {
            return Ok(collection);
        }
        let row = self
            .driver
            .query(
                "SELECT id, name, parent_id, resource_id, remote_id, remote_revision, is_virtual, cache_inherit, \
                 cache_check_interval, cache_timeout, cache_sync_on_demand, cache_local_parts FROM collections \
                 WHERE id = ?",
                &[Value::Int(collection_id)],
            )
            .await?
            .into_iter()
            .next()
            .ok_or(StorageError::NotFound {
                kind: "collection",
                id: collection_id,
            })?;
        let collection = Collection::from_row(&row)?;
        self.collections.insert(collection.id, collection.name.clone(), collection.clone());
        Ok(collection)
    }

    async fn fetch_resource(&self, resource_id: EntityId) -> Result<Resource, StorageError> {
        if let Some(resource) = self.resources.get_by_id(resource_id) {
            return Ok(resource);
        }
        let row = self
            .driver
            .query(
                "SELECT id, name, is_virtual FROM resources WHERE id = ?",
                &[Value::Int(resource_id)],
            )
            .await?
            .into_iter()
            .next()
            .ok_or(StorageError::NotFound {
                kind: "resource",
                id: resource_id,
            })?;
        let resource = Resource::from_row(&row)?;
        self.resources.insert(resource.id, resource.name.clone(), resource.clone());
        Ok(resource)
    }

    async fn fetch_mime_type_name(&self, mimetype_id: EntityId) -> Result<Arc<str>, StorageError> {
        if let Some(mime_type) = self.mime_types.get_by_id(mimetype_id) {
            return Ok(mime_type.name);
        }
        let row = self
            .driver
            .query("SELECT id, name FROM mime_types WHERE id = ?", &[Value::Int(mimetype_id)])
            .await?
            .into_iter()
            .next()
            .ok_or(StorageError::NotFound {
                kind: "mime_type",
                id: mimetype_id,
            })?;
        let mime_type = MimeType::from_row(&row)?;
        self.mime_types.insert(mime_type.id, mime_type.name.clone(), mime_type.clone());
        Ok(mime_type.name)
    }

    // ---- item synchronizer support (§4.11) ----

    /// The shallow `(id, remote_id)` listing a full sync diffs the
    /// delivered remote set against to find local-only deletions. Cache-only
    /// in spirit: no joins, no payload, just enough to build the deletion
    /// set.
    pub async fn list_item_refs_for_collection(
        &self,
        collection_id: EntityId,
    ) -> Result<Vec<(EntityId, Option<Arc<str>>)>, StorageError> {
        let rows = self
            .driver
            .query(
                "SELECT id, remote_id FROM items WHERE collection_id = ?",
                &[Value::Int(collection_id)],
            )
            .await?;
        rows.into_iter()
            .map(|row| {
                let id: EntityId = row.try_get(0)?;
                let remote_id: Option<String> = row.try_get(1)?;
                Ok((id, remote_id.map(Arc::from)))
            })
            .collect::<Result<_, sqlx::Error>>()
            .map_err(StorageError::from)
    }

    /// Merge discriminator lookup (§4.11): GID takes precedence over
    /// remote id when both are present, mirroring [`Item::merge_key`].
    pub async fn find_item_by_merge_key(
        &self,
        collection_id: EntityId,
        gid: Option<&str>,
        remote_id: Option<&str>,
    ) -> Result<Option<EntityId>, StorageError> {
        if let Some(gid) = gid.filter(|g| !g.is_empty()) {
            let rows = self
                .driver
                .query(
                    "SELECT id FROM items WHERE collection_id = ? AND gid = ?",
                    &[Value::Int(collection_id), Value::Text(gid.to_string())],
                )
                .await?;
            if let Some(row) = rows.into_iter().next() {
                return Ok(Some(row.try_get(0)?));
            }
            return Ok(None);
        }
        if let Some(remote_id) = remote_id.filter(|r| !r.is_empty()) {
            let rows = self
                .driver
                .query(
                    "SELECT id FROM items WHERE collection_id = ? AND remote_id = ?",
                    &[Value::Int(collection_id), Value::Text(remote_id.to_string())],
                )
                .await?;
            if let Some(row) = rows.into_iter().next() {
                return Ok(Some(row.try_get(0)?));
            }
        }
        Ok(None)
    }

    /// Applies a remote change to an already-existing local item: bumps
    /// the revision, replaces the given parts wholesale, refreshes
    /// `remote_revision`/`atime` and clears `dirty` (the resource has now
    /// confirmed this item). Emits `itemChanged` with the touched part
    /// names.
    #[instrument(skip(self, collector, parts))]
    pub async fn modify_pim_item(
        &self,
        collector: &mut TransactionCollector,
        item_id: EntityId,
        remote_revision: Option<Arc<str>>,
        parts: Vec<NewPart>,
    ) -> Result<Item, StorageError> {
        let now = now_unix();
        self.driver
            .exec(
                "UPDATE items SET revision = revision + 1, remote_revision = ?, dirty = 0, atime = ? WHERE id = ?",
                &[
                    remote_revision.as_deref().map(|s| Value::Text(s.to_string())).unwrap_or(Value::Null),
                    Value::Int(now),
                    Value::Int(item_id),
                ],
            )
            .await?;

        let mut total_size = 0u64;
        let mut changed_parts = Vec::with_capacity(parts.len());
        for new_part in &parts {
            let size = new_part.data.len() as u64;
            total_size += size;

            // Existing part rows are keyed `UNIQUE(item_id, name)`. A
            // replacement keeps the row's id (the external filename scheme
            // is `<partId>_r<rev>`) and bumps `revision` so a stale reader
            // of the previous external file is never pointed at a
            // half-written one (§4.7, §5 "external payload files").
            let existing = self
                .driver
                .query(
                    "SELECT id, filename, external, revision FROM parts WHERE item_id = ? AND name = ?",
                    &[Value::Int(item_id), Value::Text(new_part.name.to_string())],
                )
                .await?
                .into_iter()
                .next();

            let (part_id, next_revision, old_external_filename) = match existing {
                Some(row) => {
                    let id: i64 = row.try_get("id")?;
                    let was_external: i64 = row.try_get("external")?;
                    let prev_revision: i64 = row.try_get("revision")?;
                    let old_filename = if was_external != 0 {
                        row.try_get::<Option<String>, _>("filename")?
                    } else {
                        None
                    };
                    (id, (prev_revision as u32) + 1, old_filename)
                }
                None => {
                    let (sql, params) = InsertBuilder::new("parts")
                        .set_column_value("item_id", item_id)
                        .set_column_value("name", new_part.name.to_string())
                        .set_column_value("data", Value::Null)
                        .set_column_value("filename", Value::Null)
                        .set_column_value("external", 0i64)
                        .set_column_value("size", size as i64)
                        .set_column_value("revision", 0i64)
                        .build();
                    self.driver.exec(&sql, &params).await?;
                    let id: i64 = self
                        .driver
                        .query("SELECT id FROM parts WHERE rowid = last_insert_rowid()", &[])
                        .await?
                        .into_iter()
                        .next()
                        .and_then(|row| row.try_get::<i64, _>("id").ok())
                        .ok_or(StorageError::NotFound { kind: "part", id: 0 })?;
                    (id, 0u32, None)
                }
            };

            let (filename, external, inline_data) = self.write_part_payload(part_id, next_revision, &new_part.data).await?;
            self.driver
                .exec(
                    "UPDATE parts SET data = ?, filename = ?, external = ?, size = ?, revision = ? WHERE id = ?",
                    &[
                        inline_data.map(Value::Blob).unwrap_or(Value::Null),
                        filename.map(Value::Text).unwrap_or(Value::Null),
                        Value::Int(external as i64),
                        Value::Int(size as i64),
                        Value::Int(next_revision as i64),
                        Value::Int(part_id),
                    ],
                )
                .await?;

            if let Some(old_filename) = old_external_filename {
                files::remove_external(&self.data_root, &old_filename).await;
            }

            changed_parts.push(new_part.name.clone());
        }

        if !parts.is_empty() {
            self.driver
                .exec("UPDATE items SET size = ? WHERE id = ?", &[Value::Int(total_size as i64), Value::Int(item_id)])
                .await?;
        }

        let item = self.fetch_item(item_id).await?;
        collector.note_item_changed(item.clone(), changed_parts);
        Ok(item)
    }

    /// Reassigns an item to a different collection, bumping its revision
    /// the same way a resource-initiated move would (§4.4 `moveCollection`
    /// applies the analogous bookkeeping one level up).
    #[instrument(skip(self, collector))]
    pub async fn move_pim_item(
        &self,
        collector: &mut TransactionCollector,
        item_id: EntityId,
        new_collection_id: EntityId,
    ) -> Result<Item, StorageError> {
        let now = now_unix();
        self.driver
            .exec(
                "UPDATE items SET collection_id = ?, revision = revision + 1, atime = ? WHERE id = ?",
                &[Value::Int(new_collection_id), Value::Int(now), Value::Int(item_id)],
            )
            .await?;
        let item = self.fetch_item(item_id).await?;
        collector.note_item_changed(item.clone(), vec![]);
        Ok(item)
    }

    // ---- tag operations (§4.4, spec §6.1 "Tag lifecycle") ----

    /// Creates a tag, or returns the existing row if `gid` is already
    /// taken (tags are looked up by caller-supplied GID so a resource can
    /// reference one before it has a local id).
    #[instrument(skip(self))]
    pub async fn create_tag(
        &self,
        gid: Arc<str>,
        tag_type: Arc<str>,
        parent_id: Option<EntityId>,
    ) -> Result<Tag, StorageError> {
        if let Some(tag) = self.tags.get_by_name(&gid) {
            return Ok(tag);
        }
        self.driver
            .exec(
                "INSERT OR IGNORE INTO tags (gid, tag_type, parent_id) VALUES (?, ?, ?)",
                &[
                    Value::Text(gid.to_string()),
                    Value::Text(tag_type.to_string()),
                    parent_id.map(Value::Int).unwrap_or(Value::Null),
                ],
            )
            .await?;
        self.fetch_tag_by_gid(&gid).await
    }

    /// Updates a tag's type and parent in place; the GID, being its
    /// stable identity, never changes.
    #[instrument(skip(self))]
    pub async fn modify_tag(
        &self,
        tag_id: EntityId,
        tag_type: Arc<str>,
        parent_id: Option<EntityId>,
    ) -> Result<Tag, StorageError> {
        let (sql, params) = UpdateBuilder::new("tags")
            .set_column_value("tag_type", tag_type.to_string())
            .set_column_value("parent_id", parent_id.map(Value::Int).unwrap_or(Value::Null))
            .add_value_condition("id", CompareOp::Equals, tag_id)
            .build();
        self.driver.exec(&sql, &params).await?;
        self.tags.invalidate(tag_id);
        self.fetch_tag(tag_id).await
    }

    /// Deletes a tag and every `item_tags` association referencing it.
    #[instrument(skip(self))]
    pub async fn delete_tag(&self, tag_id: EntityId) -> Result<(), StorageError> {
        let (sql, params) = DeleteBuilder::new("item_tags")
            .add_value_condition("tag_id", CompareOp::Equals, tag_id)
            .build();
        self.driver.exec(&sql, &params).await?;
        let (sql, params) = DeleteBuilder::new("tags")
            .add_value_condition("id", CompareOp::Equals, tag_id)
            .build();
        self.driver.exec(&sql, &params).await?;
        self.tags.invalidate(tag_id);
        Ok(())
    }

    pub async fn fetch_tag(&self, tag_id: EntityId) -> Result<Tag, StorageError> {
        if let Some(tag) = self.tags.get_by_id(tag_id) {
            return Ok(tag);
        }
        let row = self
            .driver
            .query("SELECT id, gid, tag_type, parent_id FROM tags WHERE id = ?", &[Value::Int(tag_id)])
            .await?
            .into_iter()
            .next()
            .ok_or(StorageError::NotFound { kind: "tag", id: tag_id })?;
        let tag = Tag::from_row(&row)?;
        self.tags.insert(tag.id, tag.gid.clone(), tag.clone());
        Ok(tag)
    }

    async fn fetch_tag_by_gid(&self, gid: &str) -> Result<Tag, StorageError> {
        if let Some(tag) = self.tags.get_by_name(gid) {
            return Ok(tag);
        }
        let row = self
            .driver
            .query(
                "SELECT id, gid, tag_type, parent_id FROM tags WHERE gid = ?",
                &[Value::Text(gid.to_string())],
            )
            .await?
            .into_iter()
            .next()
            .ok_or(StorageError::NotFound { kind: "tag", id: 0 })?;
        let tag = Tag::from_row(&row)?;
        self.tags.insert(tag.id, tag.gid.clone(), tag.clone());
        Ok(tag)
    }

    /// All tags currently attached to `item_id`.
    pub async fn tags_for_item(&self, item_id: EntityId) -> Result<Vec<Tag>, StorageError> {
        let (sql, params) = SelectBuilder::new()
            .add_table("item_tags")
            .add_join(pimd_query::JoinKind::Inner, "tags", "item_tags.tag_id", "tags.id")
            .add_columns(["tags.id", "tags.gid", "tags.tag_type", "tags.parent_id"])
            .add_value_condition("item_tags.item_id", CompareOp::Equals, item_id)
            .build();
        let rows = self.driver.query(&sql, &params).await?;
        rows.iter().map(Tag::from_row).collect::<Result<_, _>>().map_err(StorageError::from)
    }

    /// Overwrites the full tag set of `item_id`: deletes all existing
    /// associations, then inserts `tag_ids`, mirroring
    /// [`Self::set_items_flags`]'s replace-in-place semantics. Reports
    /// the change as a part-less item-changed notification tagged
    /// `"TAGS"`, there being no dedicated tag-change signal on the wire.
    #[instrument(skip(self, collector))]
    pub async fn set_item_tags(
        &self,
        collector: &mut TransactionCollector,
        item_id: EntityId,
        tag_ids: &[EntityId],
    ) -> Result<(), StorageError> {
        let (sql, params) = DeleteBuilder::new("item_tags")
            .add_value_condition("item_id", CompareOp::Equals, item_id)
            .build();
        self.driver.exec(&sql, &params).await?;
        for tag_id in tag_ids {
            let (sql, params) = InsertBuilder::new("item_tags")
                .set_column_value("item_id", item_id)
                .set_column_value("tag_id", *tag_id)
                .build();
            self.driver.exec(&sql, &params).await?;
        }
        let item = self.fetch_item(item_id).await?;
        collector.note_item_changed(item, vec![Arc::from("TAGS")]);
        Ok(())
    }

    // ---- relation operations (ItemLink/ItemUnlink, §6.1) ----

    /// Registers `relation_type` in `relation_types` if this is its first
    /// use, then links the two items. Idempotent: linking an already-linked
    /// pair under the same type is a no-op.
    pub async fn link_items(
        &self,
        left_id: EntityId,
        right_id: EntityId,
        relation_type: &str,
    ) -> Result<(), StorageError> {
        self.driver
            .exec(
                "INSERT OR IGNORE INTO relation_types (name) VALUES (?)",
                &[Value::Text(relation_type.to_string())],
            )
            .await?;
        let (sql, params) = InsertBuilder::new("relations")
            .set_column_value("left_id", left_id)
            .set_column_value("right_id", right_id)
            .set_column_value("relation_type", relation_type.to_string())
            .build();
        // `relations` is keyed on the full (left, right, type) triple, so
        // a duplicate link is a benign unique-constraint hit.
        match self.driver.exec(&sql, &params).await {
            Ok(_) => Ok(()),
            Err(pimd_query::QueryError::Driver(sqlx::Error::Database(db))) if db.is_unique_violation() => Ok(()),
            Err(other) => Err(other.into()),
        }
    }

    pub async fn unlink_items(
        &self,
        left_id: EntityId,
        right_id: EntityId,
        relation_type: &str,
    ) -> Result<(), StorageError> {
        let (sql, params) = DeleteBuilder::new("relations")
            .add_value_condition("left_id", CompareOp::Equals, left_id)
            .add_value_condition("right_id", CompareOp::Equals, right_id)
            .add_value_condition("relation_type", CompareOp::Equals, relation_type.to_string())
            .build();
        self.driver.exec(&sql, &params).await?;
        Ok(())
    }

    pub async fn relations_for_item(&self, item_id: EntityId) -> Result<Vec<Relation>, StorageError> {
        let (sql, params) = SelectBuilder::new()
            .add_table("relations")
            .add_columns(["left_id", "right_id", "relation_type"])
            .add_value_condition("left_id", CompareOp::Equals, item_id)
            .build();
        let rows = self.driver.query(&sql, &params).await?;
        rows.iter().map(Relation::from_row).collect::<Result<_, _>>().map_err(StorageError::from)
    }
}

fn id_list(ids: &[EntityId]) -> Value {
    Value::List(ids.iter().map(|id| Value::Int(*id)).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn memory_store() -> DataStore {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let driver = SqliteDriver::new(pool);
        let bus = ChangeBus::new(16);
        let data_root = std::env::temp_dir().join(format!("pimd-test-{}", uuid::Uuid::new_v4()));
        DataStore::initialize(driver, bus, data_root).await.unwrap()
    }

    async fn seed_resource_and_collection(store: &DataStore) -> EntityId {
        store
            .driver
            .exec("INSERT INTO resources (name) VALUES ('res')", &[])
            .await
            .unwrap();
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

    #[tokio::test]
    async fn append_and_cleanup_pim_item_round_trips() {
        let store = memory_store().await;
        let collection_id = seed_resource_and_collection(&store).await;

        let mut collector = store.new_collector();
        let (item, parts) = store
            .append_pim_item(
                &mut collector,
                NewItem {
                    mime_type: Arc::from("text/vcard"),
                    collection_id,
                    remote_id: None,
                    remote_revision: None,
                    gid: Some(Arc::from("gid-1")),
                    parts: vec![NewPart {
                        name: Arc::from("PLD:RFC822"),
                        data: b"hello".to_vec(),
                    }],
                },
            )
            .await
            .unwrap();
        collector.commit();

        assert!(item.dirty);
        assert_eq!(parts.len(), 1);
        assert_eq!(item.size, 5);

        let mut collector = store.new_collector();
        store.cleanup_pim_items(&mut collector, &[item.id]).await.unwrap();
        collector.commit();

        let result = store.fetch_item(item.id).await;
        assert!(matches!(result, Err(StorageError::NotFound { .. })));
    }

    #[tokio::test]
    async fn set_items_flags_reports_added_and_removed() {
        let store = memory_store().await;
        let collection_id = seed_resource_and_collection(&store).await;
        let mut collector = store.new_collector();
        let (item, _) = store
            .append_pim_item(
                &mut collector,
                NewItem {
                    mime_type: Arc::from("text/vcard"),
                    collection_id,
                    remote_id: None,
                    remote_revision: None,
                    gid: None,
                    parts: vec![],
                },
            )
            .await
            .unwrap();
        collector.commit();

        let mut collector = store.new_collector();
        store
            .set_items_flags(&mut collector, &[item.id], &[Arc::from("\\Seen")])
            .await
            .unwrap();
        collector.commit();

        let mut collector = store.new_collector();
        store
            .set_items_flags(&mut collector, &[item.id], &[Arc::from("\\Flagged")])
            .await
            .unwrap();
        collector.commit();

        let names = store.flag_names_for_items(&[item.id]).await.unwrap();
        assert!(names.contains("\\Flagged"));
        assert!(!names.contains("\\Seen"));
    }

    #[tokio::test]
    async fn set_items_flags_produces_the_full_cartesian_product() {
        let store = memory_store().await;
        let collection_id = seed_resource_and_collection(&store).await;

        let mut ids = Vec::new();
        for _ in 0..3 {
            let mut collector = store.new_collector();
            let (item, _) = store
                .append_pim_item(
                    &mut collector,
                    NewItem {
                        mime_type: Arc::from("text/vcard"),
                        collection_id,
                        remote_id: None,
                        remote_revision: None,
                        gid: None,
                        parts: vec![],
                    },
                )
                .await
                .unwrap();
            collector.commit();
            ids.push(item.id);
        }

        let mut collector = store.new_collector();
        store
            .set_items_flags(&mut collector, &ids, &[Arc::from("\\Seen"), Arc::from("\\Flagged")])
            .await
            .unwrap();
        collector.commit();

        for id in &ids {
            let names = store.flag_names_for_items(&[*id]).await.unwrap();
            assert!(names.contains("\\Seen"), "item {id} missing \\Seen");
            assert!(names.contains("\\Flagged"), "item {id} missing \\Flagged");
        }

        let (sql, params) = SelectBuilder::new()
            .add_table("item_flags")
            .add_column("COUNT(*)")
            .add_value_condition("item_id", CompareOp::In, id_list(&ids))
            .build();
        let rows = store.driver.query(&sql, &params).await.unwrap();
        let count: i64 = rows[0].try_get(0).unwrap();
        assert_eq!(count, 6);
    }

    #[tokio::test]
    async fn move_collection_rejects_cycle() {
        let store = memory_store().await;
        let root_id = seed_resource_and_collection(&store).await;

        let mut collector = store.new_collector();
        let child = store
            .append_collection(
                &mut collector,
                NewCollection {
                    name: Arc::from("child"),
                    parent_id: Some(root_id),
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

        let mut collector = store.new_collector();
        let result = store.move_collection(&mut collector, root_id, child.id).await;
        assert!(matches!(result, Err(StorageError::CyclicMove { .. })));
    }

    #[tokio::test]
    async fn cross_resource_move_recurses_into_the_whole_subtree() {
        let store = memory_store().await;
        let root_id = seed_resource_and_collection(&store).await;

        let mut collector = store.new_collector();
        let child = store
            .append_collection(
                &mut collector,
                NewCollection {
                    name: Arc::from("child"),
                    parent_id: Some(root_id),
                    resource_id: 1,
                    remote_id: None,
                    remote_revision: None,
                    is_virtual: false,
                    cache_policy: CachePolicy::system_default(),
                },
            )
            .await
            .unwrap();
        let grandchild = store
            .append_collection(
                &mut collector,
                NewCollection {
                    name: Arc::from("grandchild"),
                    parent_id: Some(child.id),
                    resource_id: 1,
                    remote_id: None,
                    remote_revision: None,
                    is_virtual: false,
                    cache_policy: CachePolicy::system_default(),
                },
            )
            .await
            .unwrap();
        let (item, _) = store
            .append_pim_item(
                &mut collector,
                NewItem {
                    mime_type: Arc::from("text/vcard"),
                    collection_id: grandchild.id,
                    remote_id: Some(Arc::from("remote-1")),
                    remote_revision: Some(Arc::from("rev-1")),
                    gid: None,
                    parts: vec![],
                },
            )
            .await
            .unwrap();
        collector.commit();

        store
            .driver
            .exec("INSERT INTO resources (name) VALUES ('res-2')", &[])
            .await
            .unwrap();
        let mut collector = store.new_collector();
        let other_resource_root = store
            .append_collection(
                &mut collector,
                NewCollection {
                    name: Arc::from("other-root"),
                    parent_id: None,
                    resource_id: 2,
                    remote_id: None,
                    remote_revision: None,
                    is_virtual: false,
                    cache_policy: CachePolicy::system_default(),
                },
            )
            .await
            .unwrap();
        collector.commit();

        let mut collector = store.new_collector();
        store
            .move_collection(&mut collector, root_id, other_resource_root.id)
            .await
            .unwrap();
        collector.commit();

        let moved_root = store.fetch_collection(root_id).await.unwrap();
        let moved_child = store.fetch_collection(child.id).await.unwrap();
        let moved_grandchild = store.fetch_collection(grandchild.id).await.unwrap();
        assert_eq!(moved_root.resource_id, 2);
        assert_eq!(moved_child.resource_id, 2);
        assert_eq!(moved_grandchild.resource_id, 2);

        let moved_item = store.fetch_item(item.id).await.unwrap();
        assert!(moved_item.dirty);
        assert_eq!(moved_item.remote_id, None);
        assert_eq!(moved_item.remote_revision, None);
    }

    #[tokio::test]
    async fn create_tag_is_idempotent_on_gid() {
        let store = memory_store().await;
        let first = store.create_tag(Arc::from("tag-1"), Arc::from("PLAIN"), None).await.unwrap();
        let second = store.create_tag(Arc::from("tag-1"), Arc::from("PLAIN"), None).await.unwrap();
        assert_eq!(first.id, second.id);
    }

    #[tokio::test]
    async fn modify_tag_updates_type_and_parent() {
        let store = memory_store().await;
        let parent = store.create_tag(Arc::from("parent"), Arc::from("PLAIN"), None).await.unwrap();
        let tag = store.create_tag(Arc::from("child"), Arc::from("PLAIN"), None).await.unwrap();
        let updated = store.modify_tag(tag.id, Arc::from("GENERIC"), Some(parent.id)).await.unwrap();
        assert_eq!(updated.tag_type.as_ref(), "GENERIC");
        assert_eq!(updated.parent_id, Some(parent.id));
    }

    #[tokio::test]
    async fn delete_tag_removes_item_associations() {
        let store = memory_store().await;
        let root_id = seed_resource_and_collection(&store).await;
        let tag = store.create_tag(Arc::from("to-delete"), Arc::from("PLAIN"), None).await.unwrap();

        let mut collector = store.new_collector();
        let (item, _parts) = store
            .append_pim_item(
                &mut collector,
                NewItem {
                    mime_type: Arc::from("text/plain"),
                    collection_id: root_id,
                    remote_id: None,
                    remote_revision: None,
                    gid: None,
                    parts: vec![],
                },
            )
            .await
            .unwrap();
        store.set_item_tags(&mut collector, item.id, &[tag.id]).await.unwrap();
        collector.commit();

        assert_eq!(store.tags_for_item(item.id).await.unwrap().len(), 1);
        store.delete_tag(tag.id).await.unwrap();
        assert!(store.tags_for_item(item.id).await.unwrap().is_empty());
        assert!(matches!(store.fetch_tag(tag.id).await, Err(StorageError::NotFound { kind: "tag", .. })));
    }

    #[tokio::test]
    async fn set_item_tags_replaces_the_full_set() {
        let store = memory_store().await;
        let root_id = seed_resource_and_collection(&store).await;
        let a = store.create_tag(Arc::from("a"), Arc::from("PLAIN"), None).await.unwrap();
        let b = store.create_tag(Arc::from("b"), Arc::from("PLAIN"), None).await.unwrap();

        let mut collector = store.new_collector();
        let (item, _parts) = store
            .append_pim_item(
                &mut collector,
                NewItem {
                    mime_type: Arc::from("text/plain"),
                    collection_id: root_id,
                    remote_id: None,
                    remote_revision: None,
                    gid: None,
                    parts: vec![],
                },
            )
            .await
            .unwrap();
        store.set_item_tags(&mut collector, item.id, &[a.id, b.id]).await.unwrap();
        store.set_item_tags(&mut collector, item.id, &[b.id]).await.unwrap();
        collector.commit();

        let tags = store.tags_for_item(item.id).await.unwrap();
        assert_eq!(tags.len(), 1);
        assert_eq!(tags[0].id, b.id);
    }

    #[tokio::test]
    async fn linking_items_is_idempotent() {
        let store = memory_store().await;
        let root_id = seed_resource_and_collection(&store).await;
        let mut collector = store.new_collector();
        let (left, _) = store
            .append_pim_item(
                &mut collector,
                NewItem {
                    mime_type: Arc::from("text/plain"),
                    collection_id: root_id,
                    remote_id: None,
                    remote_revision: None,
                    gid: None,
                    parts: vec![],
                },
            )
            .await
            .unwrap();
        let (right, _) = store
            .append_pim_item(
                &mut collector,
                NewItem {
                    mime_type: Arc::from("text/plain"),
                    collection_id: root_id,
                    remote_id: None,
                    remote_revision: None,
                    gid: None,
                    parts: vec![],
                },
            )
            .await
            .unwrap();
        collector.commit();

        store.link_items(left.id, right.id, "GENERIC").await.unwrap();
        store.link_items(left.id, right.id, "GENERIC").await.unwrap();
        assert_eq!(store.relations_for_item(left.id).await.unwrap().len(), 1);

        store.unlink_items(left.id, right.id, "GENERIC").await.unwrap();
        assert!(store.relations_for_item(left.id).await.unwrap().is_empty());
    }

    /// §8 S5: a part over the externalization threshold is written to
    /// `<partId>_r0`; replacing it moves to `_r1` and the old revision's
    /// file is gone.
    #[tokio::test]
    async fn large_part_is_externalized_and_replacement_bumps_revision() {
        let store = memory_store().await;
        store.set_external_payload_threshold(4096);
        let collection_id = seed_resource_and_collection(&store).await;

        let mut collector = store.new_collector();
        let (item, parts) = store
            .append_pim_item(
                &mut collector,
                NewItem {
                    mime_type: Arc::from("message/rfc822"),
                    collection_id,
                    remote_id: None,
                    remote_revision: None,
                    gid: None,
                    parts: vec![NewPart {
                        name: Arc::from("PLD:RFC822"),
                        data: vec![7u8; 5000],
                    }],
                },
            )
            .await
            .unwrap();
        collector.commit();

        let part = &parts[0];
        let PartData::External { filename } = &part.data else {
            panic!("expected an externalized part");
        };
        assert_eq!(filename.as_ref(), format!("{}_r0", part.id));
        assert_eq!(part.size, 5000);
        let on_disk = tokio::fs::metadata(store.data_root.join(filename.as_ref())).await.unwrap();
        assert_eq!(on_disk.len(), 5000);

        let mut collector = store.new_collector();
        let updated = store
            .modify_pim_item(
                &mut collector,
                item.id,
                None,
                vec![NewPart {
                    name: Arc::from("PLD:RFC822"),
                    data: vec![9u8; 6000],
                }],
            )
            .await
            .unwrap();
        collector.commit();
        assert_eq!(updated.size, 6000);

        let refreshed = store
            .driver
            .query(
                "SELECT id, item_id, name, data, filename, external, size, revision FROM parts WHERE item_id = ?",
                &[Value::Int(item.id)],
            )
            .await
            .unwrap();
        let refreshed_part = Part::from_row(&refreshed[0]).unwrap();
        let PartData::External { filename: new_filename } = &refreshed_part.data else {
            panic!("expected the replacement to stay externalized");
        };
        assert_eq!(new_filename.as_ref(), format!("{}_r1", part.id));
        assert!(tokio::fs::metadata(store.data_root.join(filename.as_ref())).await.is_err());
    }

    /// §8 #6 / S6: a collection chain of inherit=true collections resolves
    /// to the nearest ancestor with inherit=false, and re-querying after
    /// that ancestor's policy changes reflects the new values.
    #[tokio::test]
    async fn cache_policy_resolves_to_nearest_non_inheriting_ancestor() {
        let store = memory_store().await;
        store
            .driver
            .exec("INSERT INTO resources (name) VALUES ('res')", &[])
            .await
            .unwrap();

        let grandparent_policy = CachePolicy {
            inherit: false,
            check_interval: 30,
            cache_timeout: 60,
            sync_on_demand: true,
            local_parts: LocalParts::Only(vec![Arc::from("RFC822")]),
        };
        let inheriting_policy = CachePolicy {
            inherit: true,
            check_interval: -1,
            cache_timeout: -1,
            sync_on_demand: false,
            local_parts: LocalParts::All,
        };
        let mut collector = store.new_collector();
        let grandparent = store
            .append_collection(
                &mut collector,
                NewCollection {
                    name: Arc::from("grandparent"),
                    parent_id: None,
                    resource_id: 1,
                    remote_id: None,
                    remote_revision: None,
                    is_virtual: false,
                    cache_policy: grandparent_policy,
                },
            )
            .await
            .unwrap();
        let parent = store
            .append_collection(
                &mut collector,
                NewCollection {
                    name: Arc::from("parent"),
                    parent_id: Some(grandparent.id),
                    resource_id: 1,
                    remote_id: None,
                    remote_revision: None,
                    is_virtual: false,
                    cache_policy: inheriting_policy.clone(),
                },
            )
            .await
            .unwrap();
        let child = store
            .append_collection(
                &mut collector,
                NewCollection {
                    name: Arc::from("child"),
                    parent_id: Some(parent.id),
                    resource_id: 1,
                    remote_id: None,
                    remote_revision: None,
                    is_virtual: false,
                    cache_policy: inheriting_policy,
                },
            )
            .await
            .unwrap();
        collector.commit();

        let resolved = store.resolve_effective_cache_policy(&child).await.unwrap();
        assert_eq!(resolved.check_interval, 30);
        assert_eq!(resolved.cache_timeout, 60);
        assert!(resolved.sync_on_demand);

        store
            .driver
            .exec(
                "UPDATE collections SET cache_timeout = 120 WHERE id = ?",
                &[Value::Int(grandparent.id)],
            )
            .await
            .unwrap();
        let refetched_child = store.fetch_collection(child.id).await.unwrap();
        let resolved_again = store.resolve_effective_cache_policy(&refetched_child).await.unwrap();
        assert_eq!(resolved_again.cache_timeout, 120);
    }
}
