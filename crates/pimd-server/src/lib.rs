//! Connection handler, part streamer and collection scheduler (C6-C8).
//!
//! This crate owns everything that lives for the lifetime of one accepted
//! socket plus the process-wide collection maintenance scheduler; the
//! wire codec (`pimd-wire`), the storage engine (`pimd-storage`) and the
//! change bus (`pimd-notify`) it wraps are each someone else's crate.

pub mod connection;
pub mod context;
pub mod error;
pub mod handlers;
pub mod parts;
pub mod response;
pub mod scheduler;
pub mod state;
pub mod subscription;
pub mod verb_table;

pub use connection::{run_connection, ConnectionConfig};
pub use context::HandlerContext;
pub use error::{ErrorDisposition, ServerError};
pub use parts::{stream_literal, verify_direct_upload, StreamedPart, DEFAULT_EXTERNALIZATION_THRESHOLD};
pub use response::ResponseQueue;
pub use scheduler::CollectionScheduler;
pub use state::ConnectionState;
pub use subscription::Subscription;
pub use verb_table::{build_verb_table, VerbTable};
