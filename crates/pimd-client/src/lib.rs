//! Client-side session/job engine and client monitor (§4.9-4.10, C9-C10).
//!
//! This crate has no socket of its own: [`session::Session`] and
//! [`monitor::Monitor`] are driven by whatever I/O layer a concrete
//! client binary wires up (reading tagged lines with `pimd-wire`,
//! writing them back over a `UnixStream`), the same way `pimd-server`'s
//! [`ConnectionState`](../pimd_server/struct.ConnectionState.html) is
//! driven by `pimd-server::connection::run_connection` rather than doing
//! its own I/O.

pub mod cache;
pub mod error;
pub mod events;
pub mod job;
pub mod monitor;
pub mod session;

pub use cache::BoundedCache;
pub use error::ClientError;
pub use events::Publisher;
pub use job::{ExpectedRevision, Job, JobId, JobIdGenerator, JobState, KillMode};
pub use monitor::{Monitor, MonitorSignal, MonitorSubscription, DEFAULT_CACHE_CAPACITY, MAX_PURGE_BUFFER};
pub use session::{default_session, default_session_name, Session, SessionEvent, DEFAULT_PIPELINE_CAPACITY};
