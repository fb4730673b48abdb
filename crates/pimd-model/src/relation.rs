use std::sync::Arc;

use crate::EntityId;

/// A registered relation kind (e.g. `GENERIC`); kept in its own table so
/// the set of relation types is extensible without a schema change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationType {
    pub id: EntityId,
    pub name: Arc<str>,
}

/// A directed link between two items, typed by [`RelationType`]. Used for
/// item-to-item associations that are not collection membership (§4.11
/// uses `ItemLink`/`ItemUnlink` against the same link table).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relation {
    pub left_id: EntityId,
    pub right_id: EntityId,
    pub relation_type: Arc<str>,
}
