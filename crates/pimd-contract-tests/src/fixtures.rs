//! Fixture builders shared by the suites that need a real (in-memory)
//! storage engine rather than a hand-built value, so each suite isn't
//! re-deriving the same `DataStore::initialize` boilerplate the crate's
//! own `#[cfg(test)]` modules already show for their narrower cases.

use std::path::PathBuf;
use std::sync::Arc;

use pimd_model::{CachePolicy, EntityId};
use pimd_notify::ChangeBus;
use pimd_query::SqliteDriver;
use pimd_storage::{DataStore, NewCollection};
use sqlx::sqlite::SqlitePoolOptions;

pub async fn memory_store() -> (DataStore, tempfile::TempDir) {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("failed to open an in-memory sqlite pool");
    let driver = SqliteDriver::new(pool);
    let bus = ChangeBus::new(32);
    let data_root = tempfile::tempdir().expect("failed to create a scratch data root");
    let store = DataStore::initialize(driver, bus, PathBuf::from(data_root.path()))
        .await
        .expect("schema initialization failed");
    (store, data_root)
}

/// Seeds a single resource row and one top-level collection under it,
/// returning the collection id. Most suites only need one collection to
/// attach items/parts to.
pub async fn seed_resource_and_collection(store: &DataStore) -> EntityId {
    store
        .driver()
        .exec("INSERT INTO resources (name) VALUES ('res')", &[])
        .await
        .expect("failed to seed resource row");
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
        .expect("failed to append seed collection");
    collector.commit();
    collection.id
}

/// Appends a collection under `parent_id` (`None` for a top-level
/// collection) with the given policy, returning its id.
pub async fn append_child_collection(store: &DataStore, parent_id: Option<EntityId>, name: &str, cache_policy: CachePolicy) -> EntityId {
    let mut collector = store.new_collector();
    let collection = store
        .append_collection(
            &mut collector,
            NewCollection {
                name: Arc::from(name),
                parent_id,
                resource_id: 1,
                remote_id: None,
                remote_revision: None,
                is_virtual: false,
                cache_policy,
            },
        )
        .await
        .expect("failed to append child collection");
    collector.commit();
    collection.id
}
