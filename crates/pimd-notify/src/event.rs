use std::sync::Arc;

use pimd_model::{Collection, EntityId, Item};

/// A removed entity must carry every field a listener might need at
/// emission time — by the time the transaction commits, a DataStore
/// lookup would find nothing (§4.5 "caller contract").
#[derive(Debug, Clone)]
pub struct ItemChangeEntry {
    pub id: EntityId,
    pub collection_id: EntityId,
    pub mime_type: Arc<str>,
    pub resource: Arc<str>,
}

#[derive(Debug, Clone)]
pub struct CollectionChangeEntry {
    pub id: EntityId,
    pub parent_id: Option<EntityId>,
    pub resource: Arc<str>,
}

/// Every event a committed transaction can fan out. `Transaction*`
/// variants mirror the DataStore signals the collector itself listens to
/// internally (§4.4) and are also published so external observers (e.g.
/// the collection scheduler) can react to commit boundaries.
#[derive(Debug, Clone)]
pub enum ChangeEvent {
    ItemAdded(Item),
    ItemChanged { item: Item, changed_parts: Vec<Arc<str>> },
    ItemsRemoved(Vec<ItemChangeEntry>),
    ItemsFlagsChanged {
        items: Vec<EntityId>,
        added: Vec<Arc<str>>,
        removed: Vec<Arc<str>>,
    },
    CollectionAdded(Collection),
    CollectionChanged {
        collection: Collection,
        changed_attributes: Vec<Arc<str>>,
    },
    CollectionsRemoved(Vec<CollectionChangeEntry>),
    TransactionCommitted,
    TransactionRolledBack,
}
