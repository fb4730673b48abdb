use std::fmt;
use std::str::FromStr;

/// Every command verb the broker understands (§6.1). Subscription and
/// transaction control share the connection-level command path; the
/// per-entity CRUD verbs are parameterized by [`Entity`](Verb) below.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verb {
    Login,

    CollectionCreate,
    CollectionModify,
    CollectionMove,
    CollectionDelete,
    CollectionFetchStatistics,
    CollectionSubscribe,
    CollectionUnsubscribe,

    ItemCreate,
    ItemModify,
    ItemModifyFlags,
    ItemMove,
    ItemDelete,
    ItemLink,
    ItemUnlink,
    ItemFetch,

    TagCreate,
    TagModify,
    TagDelete,
    TagFetch,

    SearchModify,
    SearchResult,

    SubscriptionCreate,
    SubscriptionModify,

    TransactionBegin,
    TransactionCommit,
    TransactionRollback,
    TransactionSelectResource,
}

impl Verb {
    pub fn as_str(self) -> &'static str {
        match self {
            Verb::Login => "LOGIN",
            Verb::CollectionCreate => "COLCREATE",
            Verb::CollectionModify => "COLMODIFY",
            Verb::CollectionMove => "COLMOVE",
            Verb::CollectionDelete => "COLDELETE",
            Verb::CollectionFetchStatistics => "COLSTATS",
            Verb::CollectionSubscribe => "COLSUBSCRIBE",
            Verb::CollectionUnsubscribe => "COLUNSUBSCRIBE",
            Verb::ItemCreate => "ITEMCREATE",
            Verb::ItemModify => "ITEMMODIFY",
            Verb::ItemModifyFlags => "ITEMMODIFYFLAGS",
            Verb::ItemMove => "ITEMMOVE",
            Verb::ItemDelete => "ITEMDELETE",
            Verb::ItemLink => "ITEMLINK",
            Verb::ItemUnlink => "ITEMUNLINK",
            Verb::ItemFetch => "ITEMFETCH",
            Verb::TagCreate => "TAGCREATE",
            Verb::TagModify => "TAGMODIFY",
            Verb::TagDelete => "TAGDELETE",
            Verb::TagFetch => "TAGFETCH",
            Verb::SearchModify => "SEARCHMODIFY",
            Verb::SearchResult => "SEARCHRESULT",
            Verb::SubscriptionCreate => "SUBSCRIBE",
            Verb::SubscriptionModify => "MODIFYSUBSCRIPTION",
            Verb::TransactionBegin => "BEGIN",
            Verb::TransactionCommit => "COMMIT",
            Verb::TransactionRollback => "ROLLBACK",
            Verb::TransactionSelectResource => "SELECTRESOURCE",
        }
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Verb {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "LOGIN" => Verb::Login,
            "COLCREATE" => Verb::CollectionCreate,
            "COLMODIFY" => Verb::CollectionModify,
            "COLMOVE" => Verb::CollectionMove,
            "COLDELETE" => Verb::CollectionDelete,
            "COLSTATS" => Verb::CollectionFetchStatistics,
            "COLSUBSCRIBE" => Verb::CollectionSubscribe,
            "COLUNSUBSCRIBE" => Verb::CollectionUnsubscribe,
            "ITEMCREATE" => Verb::ItemCreate,
            "ITEMMODIFY" => Verb::ItemModify,
            "ITEMMODIFYFLAGS" => Verb::ItemModifyFlags,
            "ITEMMOVE" => Verb::ItemMove,
            "ITEMDELETE" => Verb::ItemDelete,
            "ITEMLINK" => Verb::ItemLink,
            "ITEMUNLINK" => Verb::ItemUnlink,
            "ITEMFETCH" => Verb::ItemFetch,
            "TAGCREATE" => Verb::TagCreate,
            "TAGMODIFY" => Verb::TagModify,
            "TAGDELETE" => Verb::TagDelete,
            "TAGFETCH" => Verb::TagFetch,
            "SEARCHMODIFY" => Verb::SearchModify,
            "SEARCHRESULT" => Verb::SearchResult,
            "SUBSCRIBE" => Verb::SubscriptionCreate,
            "MODIFYSUBSCRIPTION" => Verb::SubscriptionModify,
            "BEGIN" => Verb::TransactionBegin,
            "COMMIT" => Verb::TransactionCommit,
            "ROLLBACK" => Verb::TransactionRollback,
            "SELECTRESOURCE" => Verb::TransactionSelectResource,
            _ => return Err(()),
        })
    }
}
