use pimd_model::EntityId;

/// The connection-level state machine §4.6 dispatches against: which verb
/// families are reachable depends only on this, never on which handler
/// object happens to be active.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Freshly accepted; only `Login` is valid.
    NonAuthenticated,
    /// Past `Login`; most collection/item/tag/subscription/transaction
    /// verbs are valid.
    Authenticated,
    /// A collection has been selected via `SelectResource`; collection-
    /// scoped verbs (fetch, subscribe) operate against it implicitly.
    Selected { collection_id: EntityId },
    /// Tearing down; only connection cleanup runs.
    LoggingOut,
}

impl ConnectionState {
    pub fn label(self) -> &'static str {
        match self {
            ConnectionState::NonAuthenticated => "NonAuthenticated",
            ConnectionState::Authenticated => "Authenticated",
            ConnectionState::Selected { .. } => "Selected",
            ConnectionState::LoggingOut => "LoggingOut",
        }
    }

    pub fn selected_collection(self) -> Option<EntityId> {
        match self {
            ConnectionState::Selected { collection_id } => Some(collection_id),
            _ => None,
        }
    }
}
