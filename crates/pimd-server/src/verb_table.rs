//! Assembles the static [`pimd_dispatch::VerbTable`] (§6.1) binding every
//! wire verb to its `#[pimd_macros::handler]`-wrapped function. Built once
//! at process start and shared read-only across every connection task.

use pimd_wire::Verb;

use crate::context::HandlerContext;
use crate::error::ServerError;
use crate::handlers;

pub type VerbTable = pimd_dispatch::VerbTable<HandlerContext, serde_json::Value, ServerError>;

pub fn build_verb_table() -> VerbTable {
    VerbTable::new()
        .register(Verb::Login, handlers::login)
        .register(Verb::TransactionBegin, handlers::transaction_begin)
        .register(Verb::TransactionCommit, handlers::transaction_commit)
        .register(Verb::TransactionRollback, handlers::transaction_rollback)
        .register(Verb::TransactionSelectResource, handlers::transaction_select_resource)
        .register(Verb::CollectionCreate, handlers::collection_create)
        .register(Verb::CollectionModify, handlers::collection_modify)
        .register(Verb::CollectionMove, handlers::collection_move)
        .register(Verb::CollectionDelete, handlers::collection_delete)
        .register(Verb::CollectionFetchStatistics, handlers::collection_fetch_statistics)
        .register(Verb::CollectionSubscribe, handlers::collection_subscribe)
        .register(Verb::CollectionUnsubscribe, handlers::collection_unsubscribe)
        .register(Verb::ItemCreate, handlers::item_create)
        .register(Verb::ItemModify, handlers::item_modify)
        .register(Verb::ItemModifyFlags, handlers::item_modify_flags)
        .register(Verb::ItemMove, handlers::item_move)
        .register(Verb::ItemDelete, handlers::item_delete)
        .register(Verb::ItemLink, handlers::item_link)
        .register(Verb::ItemUnlink, handlers::item_unlink)
        .register(Verb::ItemFetch, handlers::item_fetch)
        .register(Verb::TagCreate, handlers::tag_create)
        .register(Verb::TagModify, handlers::tag_modify)
        .register(Verb::TagDelete, handlers::tag_delete)
        .register(Verb::TagFetch, handlers::tag_fetch)
        .register(Verb::SearchModify, handlers::search_modify)
        .register(Verb::SearchResult, handlers::search_result)
        .register(Verb::SubscriptionCreate, handlers::subscription_create)
        .register(Verb::SubscriptionModify, handlers::subscription_modify)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_wire_verb_has_a_handler() {
        let table = build_verb_table();
        for verb in [
            Verb::Login,
            Verb::TransactionBegin,
            Verb::TransactionCommit,
            Verb::TransactionRollback,
            Verb::TransactionSelectResource,
            Verb::CollectionCreate,
            Verb::CollectionModify,
            Verb::CollectionMove,
            Verb::CollectionDelete,
            Verb::CollectionFetchStatistics,
            Verb::CollectionSubscribe,
            Verb::CollectionUnsubscribe,
            Verb::ItemCreate,
            Verb::ItemModify,
            Verb::ItemModifyFlags,
            Verb::ItemMove,
            Verb::ItemDelete,
            Verb::ItemLink,
            Verb::ItemUnlink,
            Verb::ItemFetch,
            Verb::TagCreate,
            Verb::TagModify,
            Verb::TagDelete,
            Verb::TagFetch,
            Verb::SearchModify,
            Verb::SearchResult,
            Verb::SubscriptionCreate,
            Verb::SubscriptionModify,
        ] {
            assert!(table.get(verb).is_some(), "missing handler for {verb}");
        }
    }
}
