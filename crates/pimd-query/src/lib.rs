//! Backend-agnostic query builders (§4.3) plus a SQLite driver wrapper
//! that turns them into bound `sqlx` queries and layers a nested
//! transaction counter on top of `sqlx`'s single-level transactions.

mod builder;
mod driver;
mod error;
mod value;

pub use builder::{
    ColumnCondition, CountQueryBuilder, DeleteBuilder, InsertBuilder, JoinKind, SelectBuilder,
    UpdateBuilder, ValueCondition,
};
pub use driver::{ScopedTransaction, SqliteDriver};
pub use error::QueryError;
pub use value::{CompareOp, Value};
