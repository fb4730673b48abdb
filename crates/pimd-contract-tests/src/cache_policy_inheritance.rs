//! Testable Property 6 (spec §8): for any collection with `inherit =
//! true`, the engine's effective-policy output equals that of the
//! nearest ancestor with `inherit = false`, or the system default when
//! no such ancestor exists (§8 scenario S6).

use std::sync::Arc;

use pimd_model::{CachePolicy, LocalParts};
use pimd_query::Value;

use crate::fixtures::{append_child_collection, memory_store};
use crate::support::{block_on, TckCase, TckSuite};

fn inheriting_chain_resolves_to_the_nearest_non_inheriting_ancestor() {
    block_on(async {
        let (store, _data_root) = memory_store().await;
        store.driver().exec("INSERT INTO resources (name) VALUES ('res')", &[]).await.unwrap();

        let grandparent_policy = CachePolicy {
            inherit: false,
            check_interval: 30,
            cache_timeout: 60,
            sync_on_demand: true,
            local_parts: LocalParts::Only(Arc::from(vec![Arc::from("RFC822")])),
        };
        let inheriting_policy = CachePolicy {
            inherit: true,
            check_interval: -1,
            cache_timeout: -1,
            sync_on_demand: false,
            local_parts: LocalParts::All,
        };

        // memory_store's own fixture helper seeds one top-level
        // collection; build a three-generation chain on top of it with
        // only the root overriding inheritance.
        let grandparent_id = append_child_collection(&store, None, "grandparent", grandparent_policy).await;
        let parent_id = append_child_collection(&store, Some(grandparent_id), "parent", inheriting_policy.clone()).await;
        let child_id = append_child_collection(&store, Some(parent_id), "child", inheriting_policy).await;

        let child = store.fetch_collection(child_id).await.expect("child must exist");
        let resolved = store.resolve_effective_cache_policy(&child).await.expect("resolution must succeed");
        assert_eq!(resolved.check_interval, 30);
        assert_eq!(resolved.cache_timeout, 60);
        assert!(resolved.sync_on_demand);

        // Mutating the overriding ancestor's policy and re-resolving must
        // observe the new value, not a stale snapshot.
        store
            .driver()
            .exec("UPDATE collections SET cache_timeout = 120 WHERE id = ?", &[Value::Int(grandparent_id)])
            .await
            .unwrap();
        let refetched_child = store.fetch_collection(child_id).await.unwrap();
        let resolved_again = store.resolve_effective_cache_policy(&refetched_child).await.unwrap();
        assert_eq!(resolved_again.cache_timeout, 120, "resolution must reflect the ancestor's new value, not a cached one");
    });
}

fn a_non_inheriting_collection_resolves_to_its_own_policy() {
    block_on(async {
        let (store, _data_root) = memory_store().await;
        store.driver().exec("INSERT INTO resources (name) VALUES ('res')", &[]).await.unwrap();

        let own_policy = CachePolicy {
            inherit: false,
            check_interval: 5,
            cache_timeout: 10,
            sync_on_demand: false,
            local_parts: LocalParts::All,
        };
        let id = append_child_collection(&store, None, "standalone", own_policy.clone()).await;
        let collection = store.fetch_collection(id).await.unwrap();
        let resolved = store.resolve_effective_cache_policy(&collection).await.unwrap();
        assert_eq!(resolved, own_policy);
    });
}

fn an_inheriting_collection_with_no_overriding_ancestor_falls_back_to_system_default() {
    block_on(async {
        let (store, _data_root) = memory_store().await;
        store.driver().exec("INSERT INTO resources (name) VALUES ('res')", &[]).await.unwrap();

        let inheriting_policy = CachePolicy {
            inherit: true,
            check_interval: -1,
            cache_timeout: -1,
            sync_on_demand: false,
            local_parts: LocalParts::All,
        };
        let root_id = append_child_collection(&store, None, "root-inherits-too", inheriting_policy).await;
        let root = store.fetch_collection(root_id).await.unwrap();
        let resolved = store.resolve_effective_cache_policy(&root).await.unwrap();
        assert_eq!(resolved, CachePolicy::system_default());
    });
}

const CASES: &[TckCase] = &[
    TckCase {
        name: "inheriting_chain_resolves_to_the_nearest_non_inheriting_ancestor",
        test: inheriting_chain_resolves_to_the_nearest_non_inheriting_ancestor,
    },
    TckCase {
        name: "a_non_inheriting_collection_resolves_to_its_own_policy",
        test: a_non_inheriting_collection_resolves_to_its_own_policy,
    },
    TckCase {
        name: "an_inheriting_collection_with_no_overriding_ancestor_falls_back_to_system_default",
        test: an_inheriting_collection_with_no_overriding_ancestor_falls_back_to_system_default,
    },
];

static SUITE: TckSuite = TckSuite {
    name: "cache_policy_inheritance",
    cases: CASES,
};

pub fn suite() -> &'static TckSuite {
    &SUITE
}
