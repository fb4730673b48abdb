//! Ambient contracts shared across the `pimd` broker crates.
//!
//! Nothing here is protocol- or storage-specific: a layered error type, a
//! small config loader, id newtypes and a tracing bootstrap helper, scoped
//! down to what a single-host broker actually needs.

pub mod config;
pub mod error;
pub mod ids;
pub mod logging;

pub use config::{ClientConnectionConfig, ConfigError, ServerConfig};
pub use error::{ErrorCategory, IntoPimError, PimError};
pub use ids::{ConnectionId, ConnectionIdGenerator, RequestTag, SessionId, TagGenerator};
