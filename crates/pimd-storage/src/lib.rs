//! The storage engine (§4.4): schema initialization, the CRUD operations
//! handlers call, cache-policy resolution and virtual-collection lookups.

mod datastore;
mod error;
mod files;
mod row_impls;
mod schema;

pub use datastore::{DataStore, NewCollection, NewItem, NewPart};
pub use error::StorageError;
