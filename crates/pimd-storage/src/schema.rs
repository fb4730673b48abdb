use pimd_query::SqliteDriver;
use tracing::info;

use crate::error::StorageError;

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS mime_types (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL UNIQUE
    )",
    "CREATE TABLE IF NOT EXISTS flags (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL UNIQUE
    )",
    "CREATE TABLE IF NOT EXISTS resources (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL UNIQUE,
        is_virtual INTEGER NOT NULL DEFAULT 0
    )",
    "CREATE TABLE IF NOT EXISTS collections (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL,
        parent_id INTEGER REFERENCES collections(id) ON DELETE CASCADE,
        resource_id INTEGER NOT NULL REFERENCES resources(id),
        remote_id TEXT,
        remote_revision TEXT,
        is_virtual INTEGER NOT NULL DEFAULT 0,
        cache_inherit INTEGER NOT NULL DEFAULT 1,
        cache_check_interval INTEGER NOT NULL DEFAULT -1,
        cache_timeout INTEGER NOT NULL DEFAULT -1,
        cache_sync_on_demand INTEGER NOT NULL DEFAULT 0,
        cache_local_parts TEXT NOT NULL DEFAULT 'ALL',
        UNIQUE(parent_id, name)
    )",
    "CREATE TABLE IF NOT EXISTS collection_attributes (
        collection_id INTEGER NOT NULL REFERENCES collections(id) ON DELETE CASCADE,
        name TEXT NOT NULL,
        value BLOB NOT NULL,
        PRIMARY KEY (collection_id, name)
    )",
    "CREATE TABLE IF NOT EXISTS collection_mimetypes (
        collection_id INTEGER NOT NULL REFERENCES collections(id) ON DELETE CASCADE,
        mimetype_id INTEGER NOT NULL REFERENCES mime_types(id),
        PRIMARY KEY (collection_id, mimetype_id)
    )",
    "CREATE TABLE IF NOT EXISTS items (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        gid TEXT,
        remote_id TEXT,
        remote_revision TEXT,
        collection_id INTEGER NOT NULL REFERENCES collections(id) ON DELETE CASCADE,
        mimetype_id INTEGER NOT NULL REFERENCES mime_types(id),
        revision INTEGER NOT NULL DEFAULT 0,
        size INTEGER NOT NULL DEFAULT 0,
        dirty INTEGER NOT NULL DEFAULT 0,
        atime INTEGER NOT NULL DEFAULT 0
    )",
    "CREATE TABLE IF NOT EXISTS item_flags (
        item_id INTEGER NOT NULL REFERENCES items(id) ON DELETE CASCADE,
        flag_id INTEGER NOT NULL REFERENCES flags(id),
        PRIMARY KEY (item_id, flag_id)
    )",
    "CREATE TABLE IF NOT EXISTS item_tags (
        item_id INTEGER NOT NULL REFERENCES items(id) ON DELETE CASCADE,
        tag_id INTEGER NOT NULL REFERENCES tags(id),
        PRIMARY KEY (item_id, tag_id)
    )",
    "CREATE TABLE IF NOT EXISTS parts (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        item_id INTEGER NOT NULL REFERENCES items(id) ON DELETE CASCADE,
        name TEXT NOT NULL,
        data BLOB,
        filename TEXT,
        external INTEGER NOT NULL DEFAULT 0,
        size INTEGER NOT NULL DEFAULT 0,
        revision INTEGER NOT NULL DEFAULT 0,
        dirty INTEGER NOT NULL DEFAULT 0,
        UNIQUE(item_id, name)
    )",
    "CREATE TABLE IF NOT EXISTS tags (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        gid TEXT NOT NULL UNIQUE,
        tag_type TEXT NOT NULL,
        parent_id INTEGER REFERENCES tags(id)
    )",
    "CREATE TABLE IF NOT EXISTS relation_types (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL UNIQUE
    )",
    "CREATE TABLE IF NOT EXISTS relations (
        left_id INTEGER NOT NULL REFERENCES items(id) ON DELETE CASCADE,
        right_id INTEGER NOT NULL REFERENCES items(id) ON DELETE CASCADE,
        relation_type TEXT NOT NULL,
        PRIMARY KEY (left_id, right_id, relation_type)
    )",
    "CREATE TABLE IF NOT EXISTS virtual_collection_items (
        collection_id INTEGER NOT NULL REFERENCES collections(id) ON DELETE CASCADE,
        item_id INTEGER NOT NULL REFERENCES items(id) ON DELETE CASCADE,
        PRIMARY KEY (collection_id, item_id)
    )",
];

/// Well-known MIME types seeded once at startup so resources do not race
/// each other inserting the same handful of values (§4.4).
const SEED_MIME_TYPES: &[&str] = &[
    "inode/directory",
    "message/rfc822",
    "text/vcard",
    "text/calendar",
    "application/octet-stream",
];

/// Runs exactly once, from the process main thread, before any other
/// task opens a connection (§4.4). Creates missing tables, seeds initial
/// rows, and tunes the connection for a single-writer embedded workload.
pub async fn initialize(driver: &SqliteDriver) -> Result<(), StorageError> {
    driver.exec("PRAGMA journal_mode = WAL", &[]).await?;
    driver.exec("PRAGMA synchronous = NORMAL", &[]).await?;
    driver.exec("PRAGMA foreign_keys = ON", &[]).await?;

    for statement in SCHEMA {
        driver.exec(statement, &[]).await?;
    }

    for name in SEED_MIME_TYPES {
        driver
            .exec(
                "INSERT OR IGNORE INTO mime_types (name) VALUES (?)",
                &[pimd_query::Value::Text((*name).to_string())],
            )
            .await?;
    }

    info!("storage schema initialized");
    Ok(())
}
