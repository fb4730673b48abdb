use std::sync::Arc;

use pimd_model::{Collection, Flag, FromRow, Item, LocalParts, MimeType, ModelError, Part, PartData, Relation, Resource, Tag};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

fn get<'r, T: sqlx::Decode<'r, sqlx::Sqlite> + sqlx::Type<sqlx::Sqlite>>(
    row: &'r SqliteRow,
    column: &'static str,
) -> Result<T, ModelError> {
    row.try_get(column)
        .map_err(|err| ModelError::UnexpectedType {
            column,
            detail: err.to_string(),
        })
}

/// Encodes a [`LocalParts`] value for the `collections.cache_local_parts`
/// column: the sentinel `"ALL"` or a comma-joined part-name list.
pub(crate) fn encode_local_parts(parts: &LocalParts) -> String {
    match parts {
        LocalParts::All => "ALL".to_string(),
        LocalParts::Only(names) => names.iter().map(|n| n.as_ref()).collect::<Vec<_>>().join(","),
    }
}

fn decode_local_parts(raw: &str) -> LocalParts {
    if raw == "ALL" {
        LocalParts::All
    } else {
        LocalParts::Only(raw.split(',').filter(|s| !s.is_empty()).map(Arc::from).collect())
    }
}

impl FromRow<SqliteRow> for MimeType {
    fn from_row(row: &SqliteRow) -> Result<Self, ModelError> {
        Ok(MimeType {
            id: get(row, "id")?,
            name: Arc::from(get::<String>(row, "name")?),
        })
    }
}

impl FromRow<SqliteRow> for Flag {
    fn from_row(row: &SqliteRow) -> Result<Self, ModelError> {
        Ok(Flag {
            id: get(row, "id")?,
            name: Arc::from(get::<String>(row, "name")?),
        })
    }
}

impl FromRow<SqliteRow> for Resource {
    fn from_row(row: &SqliteRow) -> Result<Self, ModelError> {
        Ok(Resource {
            id: get(row, "id")?,
            name: Arc::from(get::<String>(row, "name")?),
            is_virtual: get::<i64>(row, "is_virtual")? != 0,
        })
    }
}

impl FromRow<SqliteRow> for Tag {
    fn from_row(row: &SqliteRow) -> Result<Self, ModelError> {
        Ok(Tag {
            id: get(row, "id")?,
            gid: Arc::from(get::<String>(row, "gid")?),
            tag_type: Arc::from(get::<String>(row, "tag_type")?),
            parent_id: get::<Option<i64>>(row, "parent_id")?,
        })
    }
}

impl FromRow<SqliteRow> for Relation {
    fn from_row(row: &SqliteRow) -> Result<Self, ModelError> {
        Ok(Relation {
            left_id: get(row, "left_id")?,
            right_id: get(row, "right_id")?,
            relation_type: Arc::from(get::<String>(row, "relation_type")?),
        })
    }
}

/// Requires the row to carry a `resolved_cache_*` set of columns already
/// folded down to this collection's own configured values; effective
/// (ancestor-resolved) values are computed separately by the datastore.
impl FromRow<SqliteRow> for Collection {
    fn from_row(row: &SqliteRow) -> Result<Self, ModelError> {
        use std::collections::HashMap;
        Ok(Collection {
            id: get(row, "id")?,
            name: Arc::from(get::<String>(row, "name")?),
            parent_id: get::<Option<i64>>(row, "parent_id")?,
            resource_id: get(row, "resource_id")?,
            remote_id: get::<Option<String>>(row, "remote_id")?.map(Arc::from),
            remote_revision: get::<Option<String>>(row, "remote_revision")?.map(Arc::from),
            is_virtual: get::<i64>(row, "is_virtual")? != 0,
            cache_policy: pimd_model::CachePolicy {
                inherit: get::<i64>(row, "cache_inherit")? != 0,
                check_interval: get::<i64>(row, "cache_check_interval")? as i32,
                cache_timeout: get::<i64>(row, "cache_timeout")? as i32,
                sync_on_demand: get::<i64>(row, "cache_sync_on_demand")? != 0,
                local_parts: decode_local_parts(&get::<String>(row, "cache_local_parts")?),
            },
            attributes: Arc::new(HashMap::new()),
        })
    }
}

/// Requires a join against `mime_types` projecting its `name` as
/// `mime_type`; flags and tags are populated separately by the datastore
/// since they live in their own join tables.
impl FromRow<SqliteRow> for Item {
    fn from_row(row: &SqliteRow) -> Result<Self, ModelError> {
        Ok(Item {
            id: get(row, "id")?,
            gid: get::<Option<String>>(row, "gid")?.map(Arc::from),
            remote_id: get::<Option<String>>(row, "remote_id")?.map(Arc::from),
            remote_revision: get::<Option<String>>(row, "remote_revision")?.map(Arc::from),
            collection_id: get(row, "collection_id")?,
            mime_type: Arc::from(get::<String>(row, "mime_type")?),
            revision: get::<i64>(row, "revision")? as u32,
            size: get::<i64>(row, "size")? as u64,
            dirty: get::<i64>(row, "dirty")? != 0,
            atime: get(row, "atime")?,
            flags: Arc::from(Vec::new()),
            tags: Arc::from(Vec::new()),
        })
    }
}

impl FromRow<SqliteRow> for Part {
    fn from_row(row: &SqliteRow) -> Result<Self, ModelError> {
        let external = get::<i64>(row, "external")? != 0;
        let data = if external {
            let filename = get::<Option<String>>(row, "filename")?.ok_or(ModelError::MissingColumn("filename"))?;
            PartData::External {
                filename: Arc::from(filename),
            }
        } else {
            let bytes = get::<Option<Vec<u8>>>(row, "data")?.unwrap_or_default();
            PartData::Inline(Arc::from(bytes))
        };
        Ok(Part {
            id: get(row, "id")?,
            item_id: get(row, "item_id")?,
            name: Arc::from(get::<String>(row, "name")?),
            data,
            size: get::<i64>(row, "size")? as u64,
            revision: get::<i64>(row, "revision")? as u32,
        })
    }
}
